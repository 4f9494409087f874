pub mod context;
pub use context::{Context, DefaultContext};

pub mod config;

pub mod errors;
pub use errors::{Error, Result};

pub mod command;
pub use command::run_cmd;

pub mod shell;
pub use shell::{RootShell, SuShell};

pub mod rootfs;

pub mod package;
pub use package::{PackageManager, ShellPackageManager};

pub mod privapp;

pub mod install;
pub use install::InstallManager;

pub mod stats;

pub mod service;

pub mod tasks;

pub mod utils;
pub use utils::fs::DEVICE_PATH_SEP;

#[cfg(test)]
pub mod testing;
