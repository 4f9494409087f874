use std::io::{self, ErrorKind};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shell::{cat_command, RootShell};
use crate::utils::{read_file_bounded, truncate_at_nul};

/// How much of a file a direct read returns
pub const PROC_READ_LIMIT: usize = 32768;

/// Ceiling for the root `cat` fallback
pub const ROOT_READ_TIMEOUT: Duration = Duration::from_millis(3000);

/// Why a file couldn't be read
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", content = "detail", rename_all = "kebab-case")]
pub enum ReadProcError {
    #[error("root access was denied")]
    RootDenied,

    /// `exit` is -1 when the read timed out or was cancelled
    #[error("root shell read failed (exit {exit:?})")]
    ShellFailed { exit: Option<i32> },

    #[error("read failed: {0}")]
    Io(String),
}

pub type ProcFileResult = std::result::Result<Vec<u8>, ReadProcError>;

/// Read a file the caller may not be able to read itself.
///
/// A direct read returns at most [PROC_READ_LIMIT] bytes. When that is
/// refused the file is read with `cat` through the root shell instead, the
/// shell's lines each come back followed by `\n`. Either way the data stops
/// at the first NUL.
pub fn read_proc_file(path: &str, shell: &dyn RootShell) -> ProcFileResult {
    let direct = read_file_bounded(Path::new(path), PROC_READ_LIMIT);
    finish_read(path, direct, shell)
}

fn finish_read(path: &str, direct: io::Result<Vec<u8>>, shell: &dyn RootShell) -> ProcFileResult {
    let mut data = match direct {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            log::debug!("{} isn't readable directly, trying root", path);
            read_as_root(path, shell)?
        }
        Err(e) => {
            log::warn!("failed to read {}: {}", path, e);
            return Err(ReadProcError::Io(e.to_string()));
        }
    };
    truncate_at_nul(&mut data);
    Ok(data)
}

fn read_as_root(path: &str, shell: &dyn RootShell) -> ProcFileResult {
    let res = match shell.run(&cat_command(path), ROOT_READ_TIMEOUT) {
        Ok(res) => res,
        Err(e) if e.is_root_denied() => return Err(ReadProcError::RootDenied),
        Err(e @ (crate::Error::Timeout(_) | crate::Error::Cancelled)) => {
            log::warn!("root read of {} gave up: {}", path, e);
            return Err(ReadProcError::ShellFailed { exit: Some(-1) });
        }
        Err(e) => {
            log::warn!("root read of {} failed: {}", path, e);
            return Err(ReadProcError::Io(e.to_string()));
        }
    };

    if !res.ok() {
        return Err(ReadProcError::ShellFailed {
            exit: Some(res.exit),
        });
    }
    Ok(res.output_bytes())
}

/// Encode a result the way older clients expect it: the data itself, or a
/// sentinel of `R` for root denial and `E` (followed by the exit code as a
/// byte when there is one) for everything else.
pub fn legacy_encode(res: &ProcFileResult) -> Vec<u8> {
    match res {
        Ok(data) => data.clone(),
        Err(ReadProcError::RootDenied) => vec![b'R'],
        Err(ReadProcError::ShellFailed { exit: Some(code) }) => vec![b'E', *code as u8],
        Err(ReadProcError::ShellFailed { exit: None }) | Err(ReadProcError::Io(_)) => vec![b'E'],
    }
}
