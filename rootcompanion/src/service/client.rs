use std::io;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::procfile::ProcFileResult;
use super::protocol::{
    read_message, write_message, Command, DataResponse, Empty, PermissionResponse,
    ReadProcRequest, ReadProcResponse, ServerError, Status,
};
use crate::Context;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("server error: {0}")]
    ServerError(String),

    #[error("io error: {0}")]
    IO(io::Error),

    #[error("the server returned an invalid response")]
    InvalidResponse,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::IO(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidInput(value.to_string())
    }
}

/// Client for the battery stats proxy
pub struct ProxyClient {
    stream: UnixStream,
}

impl ProxyClient {
    pub fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)?;
        Ok(Self { stream })
    }

    pub fn from_ctx(ctx: &dyn Context) -> Result<Self> {
        let path = ctx
            .get_socket_path()
            .map_err(|e| Error::InvalidInput(e.to_string()))?;
        Self::connect(&path)
    }

    /// Give up on responses that take longer than `timeout`
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    pub fn get_statistics(&mut self) -> Result<Vec<u8>> {
        let resp: DataResponse = self.transact(Command::GetStatistics, &Empty {})?;
        Ok(resp.data)
    }

    pub fn has_battery_stats_permission(&mut self) -> Result<bool> {
        let resp: PermissionResponse = self.transact(Command::HasPermission, &Empty {})?;
        Ok(resp.granted)
    }

    pub fn read_proc_file(&mut self, path: &str) -> Result<ProcFileResult> {
        let resp: ReadProcResponse = self.transact(
            Command::ReadProcFile,
            &ReadProcRequest { path: path.into() },
        )?;
        Ok(match resp {
            ReadProcResponse::Ok { data } => Ok(data),
            ReadProcResponse::Err { error } => Err(error),
        })
    }

    /// The file contents or a sentinel, see
    /// [legacy_encode](super::procfile::legacy_encode)
    pub fn read_proc_file_legacy(&mut self, path: &str) -> Result<Vec<u8>> {
        let resp: DataResponse = self.transact(
            Command::ReadProcFileLegacy,
            &ReadProcRequest { path: path.into() },
        )?;
        Ok(resp.data)
    }

    pub fn transact<T: Serialize + ?Sized, R: DeserializeOwned>(
        &mut self,
        cmd: Command,
        payload: &T,
    ) -> Result<R> {
        let serialized = serde_json::to_string(payload)?;
        log::debug!("sending {:?}: {}", cmd, serialized);
        write_message(&mut self.stream, cmd as u32, &serialized)?;

        let (tag, data) = read_message(&mut self.stream)?;
        match Status::from_u32(tag) {
            Some(Status::Ok) => {}
            Some(Status::Fail) => {
                let err: ServerError = serde_json::from_str(&data).map_err(|e| {
                    log::error!("error response {} wasn't valid {:?}", data, e);
                    Error::InvalidResponse
                })?;
                return Err(Error::ServerError(err.err));
            }
            None => {
                log::error!("unknown response status {:#x}", tag);
                return Err(Error::InvalidResponse);
            }
        }

        log::trace!("json response: {}", data);
        serde_json::from_str(&data).map_err(|e| {
            log::error!("error decoding response {}: {:?}", data, e);
            Error::InvalidResponse
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::service::server::{PeerPolicy, ProxyServer};
    use crate::service::{BatteryStatsService, ReadProcError};
    use crate::testing::{result_with, tmp_dir, MockRootShell, MockStatsProvider, TmpDir};
    use rstest::*;
    use std::sync::Arc;

    fn start_server(tmp_dir: &TmpDir, svc: BatteryStatsService) -> std::path::PathBuf {
        let path = tmp_dir.get_path().join("proxy.sock");
        let server = ProxyServer::bind(&path, Arc::new(svc), PeerPolicy::for_current_process(vec![]))
            .expect("bind");
        std::thread::spawn(move || {
            let _ = server.serve();
        });
        path
    }

    #[rstest]
    fn test_round_trip(tmp_dir: TmpDir) {
        let mut stats = MockStatsProvider::new();
        stats
            .expect_get_statistics()
            .returning(|| Ok(vec![0, 1, 2, 0xff]));
        let mut shell = MockRootShell::new();
        shell
            .expect_execute_cancelable()
            .returning(|_, _| Ok(result_with(0, &[])));

        let path = start_server(
            &tmp_dir,
            BatteryStatsService::new(Arc::new(stats), Arc::new(shell), true),
        );
        let file = tmp_dir.create_file_name("readable", Some("cpu0 12\0junk"));

        let mut client = ProxyClient::connect(&path).expect("connect");
        client.set_timeout(Some(Duration::from_secs(10))).unwrap();

        assert!(client.has_battery_stats_permission().unwrap());
        assert_eq!(client.get_statistics().unwrap(), vec![0, 1, 2, 0xff]);
        assert_eq!(
            client.read_proc_file(file.to_str().unwrap()).unwrap(),
            Ok(b"cpu0 12".to_vec())
        );
        assert_eq!(
            client.read_proc_file_legacy(file.to_str().unwrap()).unwrap(),
            b"cpu0 12".to_vec()
        );

        let missing = tmp_dir.get_path().join("missing");
        assert!(matches!(
            client.read_proc_file(missing.to_str().unwrap()).unwrap(),
            Err(ReadProcError::Io(_))
        ));
    }

    #[rstest]
    fn test_server_error(tmp_dir: TmpDir) {
        let mut stats = MockStatsProvider::new();
        stats
            .expect_get_statistics()
            .returning(|| Err(crate::Error::ServiceUnavailable("no batterystats".into())));

        let path = start_server(
            &tmp_dir,
            BatteryStatsService::new(Arc::new(stats), Arc::new(MockRootShell::new()), false),
        );
        let mut client = ProxyClient::connect(&path).expect("connect");
        client.set_timeout(Some(Duration::from_secs(10))).unwrap();

        match client.get_statistics() {
            Err(Error::ServerError(msg)) => assert!(msg.contains("no batterystats"), "{}", msg),
            other => panic!("expected server error, got {:?}", other),
        }
        assert!(!client.has_battery_stats_permission().unwrap());
    }
}
