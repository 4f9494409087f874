use std::io;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::utils::path_must_str;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unable to obtain root access. Please make sure you grant this app root authority")]
    RootAccessDenied,

    #[error("Unable to find the path to the APK. Is it already uninstalled? Did you remember to reboot after uninstalling? Current location appears to be: {0}")]
    PathResolution(String),

    #[error("Unable to copy the file \"{src}\" to \"{dst}\". You may need to try this manually using a root file manager.")]
    CopyFailed { src: String, dst: String },

    #[error("Unable to delete the file: {0}")]
    DeleteFailed(String),

    #[error("Unable to reboot automatically ({0}). Please reboot your phone manually.")]
    RebootFailed(String),

    #[error("battery statistics service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Unable to install backup script - this is probably OK. {0}")]
    BackupScriptInstall(String),

    #[error("{0}")]
    IO(io::Error),

    #[error("command failed with status {0}: {1}")]
    CommandError(i32, String),

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("task was cancelled by user")]
    Cancelled,

    #[error("failed to get basedirs")]
    NoBaseDirs,

    #[error("generic error: {0}")]
    Generic(String),

    #[error("invalid config {0}: {1}")]
    InvalidConfig(String, String),

    #[error("file {0} doesn't exist")]
    MissingFile(String),
}

impl Error {
    pub fn new_generic<S: ToString + ?Sized>(s: &S) -> Self {
        Self::Generic(s.to_string())
    }

    pub fn new_cfg<S: ToString + ?Sized>(path: &Path, s: &S) -> Self {
        let as_str = path_must_str(path.as_ref());
        Self::InvalidConfig(as_str.into(), s.to_string())
    }

    /// Whether the error means the root shell could not be used at all, as
    /// opposed to a command that ran and failed
    pub fn is_root_denied(&self) -> bool {
        matches!(self, Self::RootAccessDenied)
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for Error {
    fn from(value: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Generic(value.to_string())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::IO(err)
    }
}
