use std::fs;
use std::io::{self, ErrorKind};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::protocol::{
    read_message, write_message, Command, DataResponse, Empty, PermissionResponse,
    ReadProcRequest, ReadProcResponse, ServerError, Status,
};
use super::{legacy_encode, BatteryStatsService};
use crate::Context;

/// Which peers may talk to the service
#[derive(Clone, Debug)]
pub struct PeerPolicy {
    own_uid: u32,
    allowed: Vec<u32>,
}

impl PeerPolicy {
    pub fn new(own_uid: u32, allowed: Vec<u32>) -> Self {
        Self { own_uid, allowed }
    }

    /// Root, the uid running the service and the configured extra uids
    pub fn for_current_process(allowed: Vec<u32>) -> Self {
        Self::new(current_uid(), allowed)
    }

    pub fn allows(&self, uid: u32) -> bool {
        uid == 0 || uid == self.own_uid || self.allowed.contains(&uid)
    }
}

/// Serves a [BatteryStatsService] on a Unix domain socket, one thread per
/// connection
pub struct ProxyServer {
    listener: UnixListener,
    path: PathBuf,
    service: Arc<BatteryStatsService>,
    policy: Arc<PeerPolicy>,
}

impl ProxyServer {
    pub fn bind(path: &Path, service: Arc<BatteryStatsService>, policy: PeerPolicy) -> crate::Result<Self> {
        if path.exists() {
            log::debug!("removing stale socket {:?}", path);
            fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        // Access is decided per peer uid
        fs::set_permissions(path, fs::Permissions::from_mode(0o666))?;
        log::info!("battery stats proxy listening on {:?}", path);

        Ok(Self {
            listener,
            path: path.to_path_buf(),
            service,
            policy: Arc::new(policy),
        })
    }

    pub fn from_ctx(ctx: &dyn Context, service: Arc<BatteryStatsService>) -> crate::Result<Self> {
        let path = ctx.get_socket_path()?;
        let allowed = ctx.get_config()?.service.allowed_uids.clone();
        Self::bind(&path, service, PeerPolicy::for_current_process(allowed))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until the listener fails
    pub fn serve(&self) -> crate::Result<()> {
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            let service = Arc::clone(&self.service);
            let policy = Arc::clone(&self.policy);
            thread::spawn(move || {
                if let Err(e) = handle_connection(stream, &service, &policy) {
                    log::error!("proxy connection failed: {}", e);
                }
            });
        }
        Ok(())
    }
}

impl Drop for ProxyServer {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn handle_connection(
    mut stream: UnixStream,
    service: &BatteryStatsService,
    policy: &PeerPolicy,
) -> io::Result<()> {
    let uid = peer_uid(&stream)?;
    log::debug!("proxy connection from uid {}", uid);

    loop {
        let (tag, payload) = match read_message(&mut stream) {
            Ok(msg) => msg,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };
        let (status, response) = handle_request(service, policy, uid, tag, &payload);
        write_message(&mut stream, status as u32, &response)?;
    }
}

/// Turn one request into a status and JSON response
pub(crate) fn handle_request(
    service: &BatteryStatsService,
    policy: &PeerPolicy,
    uid: u32,
    tag: u32,
    payload: &str,
) -> (Status, String) {
    if !policy.allows(uid) {
        log::warn!("refusing proxy request from uid {}", uid);
        return fail(format!("uid {} is not allowed to use this service", uid));
    }

    let Some(cmd) = Command::from_u32(tag) else {
        return fail(format!(
            "unknown command {:?}",
            String::from_utf8_lossy(&tag.to_be_bytes())
        ));
    };
    log::debug!("proxy request {:?} from uid {}", cmd, uid);

    let res = match cmd {
        Command::GetStatistics => parse::<Empty>(payload).and_then(|_| {
            service
                .get_statistics()
                .map(|data| DataResponse { data })
                .map_err(|e| e.to_string())
                .and_then(to_json)
        }),
        Command::HasPermission => parse::<Empty>(payload).and_then(|_| {
            to_json(PermissionResponse {
                granted: service.has_battery_stats_permission(),
            })
        }),
        Command::ReadProcFile => parse::<ReadProcRequest>(payload).and_then(|req| {
            let resp = match service.read_proc_file(&req.path) {
                Ok(data) => ReadProcResponse::Ok { data },
                Err(error) => ReadProcResponse::Err { error },
            };
            to_json(resp)
        }),
        Command::ReadProcFileLegacy => parse::<ReadProcRequest>(payload).and_then(|req| {
            let res = service.read_proc_file(&req.path);
            to_json(DataResponse {
                data: legacy_encode(&res),
            })
        }),
    };

    match res {
        Ok(js) => (Status::Ok, js),
        Err(msg) => fail(msg),
    }
}

fn parse<T: DeserializeOwned>(payload: &str) -> Result<T, String> {
    serde_json::from_str(payload).map_err(|e| format!("invalid request: {}", e))
}

fn to_json<T: Serialize>(value: T) -> Result<String, String> {
    serde_json::to_string(&value).map_err(|e| e.to_string())
}

fn fail(err: String) -> (Status, String) {
    let js = serde_json::to_string(&ServerError { err })
        .unwrap_or_else(|_| String::from(r#"{"err":"unknown error"}"#));
    (Status::Fail, js)
}

#[cfg(unix)]
fn current_uid() -> u32 {
    unsafe { libc::getuid() as u32 }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn peer_uid(stream: &UnixStream) -> io::Result<u32> {
    use std::os::unix::io::AsRawFd;

    let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut cred as *mut libc::ucred as *mut libc::c_void,
            &mut len,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(cred.uid as u32)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn peer_uid(_stream: &UnixStream) -> io::Result<u32> {
    Err(io::Error::new(
        ErrorKind::Unsupported,
        "peer credentials aren't available on this platform",
    ))
}
