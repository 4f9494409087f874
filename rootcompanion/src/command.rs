use std::borrow::Cow;
use std::ffi::OsStr;
use std::io;
use std::process::{Command, ExitStatus, Output, Stdio};
use std::time::Duration;

use crossbeam::channel::{bounded, never, Receiver};
use crossbeam::select;
use log::Level::Debug;
use log::{debug, log_enabled};

/// Output of a non-interactive command run on the device.
pub struct CmdOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CmdOutput {
    /// Converts to a `Result` object that is `Ok` only if the [ExitStatus] is
    /// success.
    pub fn err_on_status(self) -> crate::Result<Self> {
        if self.status.success() {
            return Ok(self);
        }

        // Killed by a signal, there is no exit code to report
        let code = self.status.code().unwrap_or(-1);

        Err(crate::Error::CommandError(
            code,
            self.stderr_utf8_lossy().to_string(),
        ))
    }

    #[inline]
    pub fn ok(&self) -> bool {
        self.status.success()
    }

    #[inline]
    pub fn stdout_utf8_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    #[inline]
    pub fn stderr_utf8_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

impl From<Output> for CmdOutput {
    fn from(output: Output) -> Self {
        Self {
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

/// Quotes a string with single quotes
pub fn quote(s: &str) -> String {
    let mut new = String::with_capacity(s.len() + 2);
    new.push('\'');
    for c in s.chars() {
        if c == '\'' {
            new.push_str("'\"'\"'");
        } else {
            new.push(c);
        }
    }
    new.push('\'');
    new
}

pub fn run_cmd<C, S>(cmd: C, args: &[S]) -> io::Result<CmdOutput>
where
    C: AsRef<OsStr>,
    S: AsRef<OsStr>,
{
    if log_enabled!(Debug) {
        log_cmd(&cmd, args);
    }
    Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map(|output| output.into())
}

/// Run a command, giving up on it after `timeout`.
///
/// The optional [cancel] channel kills the child early when anything is
/// received on it (or it is disconnected). A child that is given up on is
/// killed, not leaked.
pub fn run_cmd_timeout<C, S>(
    cmd: C,
    args: &[S],
    timeout: Duration,
    cancel: Option<Receiver<()>>,
) -> crate::Result<CmdOutput>
where
    C: AsRef<OsStr>,
    S: AsRef<OsStr>,
{
    if log_enabled!(Debug) {
        log_cmd(&cmd, args);
    }

    let child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let pid = child.id();
    let (tx, rx) = bounded(1);

    std::thread::spawn(move || {
        let _ = tx.send(child.wait_with_output());
    });

    let cancel = cancel.unwrap_or_else(never);

    select! {
        recv(rx) -> res => match res {
            Ok(out) => Ok(out?.into()),
            Err(_) => Err(crate::Error::new_generic("command wait thread went away")),
        },
        recv(cancel) -> _ => {
            kill_pid(pid);
            Err(crate::Error::Cancelled)
        },
        default(timeout) => {
            kill_pid(pid);
            Err(crate::Error::Timeout(timeout))
        },
    }
}

#[cfg(unix)]
pub(crate) fn kill_pid(pid: u32) {
    debug!("killing pid {}", pid);
    let res = unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };
    if res != 0 {
        log::warn!(
            "failed to kill pid {}: {}",
            pid,
            io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
pub(crate) fn kill_pid(pid: u32) {
    log::warn!("can't kill pid {} on this platform", pid);
}

pub fn log_cmd<C, S>(cmd: &C, args: &[S])
where
    C: AsRef<OsStr>,
    S: AsRef<OsStr>,
{
    let nargs = args.len();
    if nargs > 0 {
        let mut args_string = String::new();
        for (i, e) in args.iter().enumerate() {
            args_string.push_str(&e.as_ref().to_string_lossy());
            if i < nargs - 1 {
                args_string.push(' ');
            }
        }
        debug!(
            "Running command: `{} {}`",
            cmd.as_ref().to_string_lossy(),
            args_string
        );
    } else {
        debug!("Running command: `{}`", cmd.as_ref().to_string_lossy());
    }
}
