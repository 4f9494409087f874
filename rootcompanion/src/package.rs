use std::ffi::OsStr;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;

use crate::command::{run_cmd_timeout, CmdOutput};
use crate::Context;

pub const BATTERY_STATS_PERMISSION: &'static str = "android.permission.BATTERY_STATS";

/// `pm` and `dumpsys` can hang while the system server is still starting
pub const PM_TIMEOUT: Duration = Duration::from_secs(15);

lazy_static! {
    static ref DATA_DIR: Regex = Regex::new(r"^\s*dataDir=(\S+)\s*$").unwrap();
    static ref RUNTIME_GRANT: Regex =
        Regex::new(r"^\s*([A-Za-z0-9_.]+):\s*granted=(true|false)").unwrap();
    static ref SECTION_HEADER: Regex = Regex::new(r"^(\s*)[A-Za-z][A-Za-z ]*:\s*$").unwrap();
}

/// What the package manager knows about an installed package
#[derive(Clone, Debug, PartialEq)]
pub struct PackageInfo {
    pub name: String,
    /// Path of the installed APK
    pub source_dir: String,
    /// The package's private data directory
    pub data_dir: Option<String>,
}

/// Queries against the platform's package manager
pub trait PackageManager: Send + Sync {
    fn package_info(&self, package: &str) -> crate::Result<PackageInfo>;

    fn has_permission(&self, package: &str, permission: &str) -> crate::Result<bool>;
}

/// [PackageManager] that shells out to `pm` and `dumpsys package`
pub struct ShellPackageManager {
    pm: String,
    dumpsys: String,
    timeout: Duration,
}

impl ShellPackageManager {
    pub fn new<S: Into<String>>(pm: S, dumpsys: S) -> Self {
        Self {
            pm: pm.into(),
            dumpsys: dumpsys.into(),
            timeout: PM_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_ctx(ctx: &dyn Context) -> Self {
        Self::new(
            ctx.maybe_get_bin("pm").unwrap_or_else(|| "pm".into()),
            ctx.maybe_get_bin("dumpsys").unwrap_or_else(|| "dumpsys".into()),
        )
    }

    fn run<S: AsRef<OsStr>>(&self, bin: &str, args: &[S]) -> crate::Result<CmdOutput> {
        run_cmd_timeout(bin, args, self.timeout, None)
    }

    fn dump_package(&self, package: &str) -> crate::Result<String> {
        let out = self.run(&self.dumpsys, &["package", package])?.err_on_status()?;
        Ok(out.stdout_utf8_lossy().into_owned())
    }
}

impl PackageManager for ShellPackageManager {
    fn package_info(&self, package: &str) -> crate::Result<PackageInfo> {
        let out = self.run(&self.pm, &["path", package])?;
        if !out.ok() {
            return Err(crate::Error::PathResolution(format!(
                "{} is not installed: {}",
                package,
                out.stderr_utf8_lossy().trim()
            )));
        }

        let source_dir = parse_pm_path(&out.stdout_utf8_lossy()).ok_or_else(|| {
            crate::Error::PathResolution(format!("no APK path reported for {}", package))
        })?;

        let data_dir = match self.dump_package(package) {
            Ok(dump) => parse_data_dir(&dump),
            Err(e) => {
                log::warn!("failed to dump package {}: {}", package, e);
                None
            }
        };

        Ok(PackageInfo {
            name: package.into(),
            source_dir,
            data_dir,
        })
    }

    fn has_permission(&self, package: &str, permission: &str) -> crate::Result<bool> {
        let dump = self.dump_package(package)?;
        Ok(parse_permission_granted(&dump, permission))
    }
}

/// Pick the APK out of `pm path` output, preferring `base.apk` when the
/// package is split
pub fn parse_pm_path(output: &str) -> Option<String> {
    let paths: Vec<&str> = output
        .lines()
        .filter_map(|it| it.trim().strip_prefix("package:"))
        .filter(|it| !it.is_empty())
        .collect();

    paths
        .iter()
        .find(|it| it.ends_with("/base.apk"))
        .or_else(|| paths.first())
        .map(|it| it.to_string())
}

pub fn parse_data_dir(dump: &str) -> Option<String> {
    dump.lines()
        .find_map(|line| DATA_DIR.captures(line))
        .and_then(|caps| caps.get(1))
        .map(|it| it.as_str().to_string())
}

/// Whether `dumpsys package` output shows `permission` as granted.
///
/// Newer releases list `<perm>: granted=<bool>` under the install and runtime
/// permission sections, older ones just list names under
/// `grantedPermissions:`.
pub fn parse_permission_granted(dump: &str, permission: &str) -> bool {
    let mut granted_indent: Option<usize> = None;

    for line in dump.lines() {
        if let Some(caps) = RUNTIME_GRANT.captures(line) {
            if &caps[1] == permission && &caps[2] == "true" {
                return true;
            }
            continue;
        }

        let indent = line.len() - line.trim_start().len();
        let trimmed = line.trim();

        if let Some(section) = granted_indent {
            if indent > section && !trimmed.is_empty() {
                if trimmed == permission {
                    return true;
                }
                continue;
            }
            granted_indent = None;
        }

        if trimmed == "grantedPermissions:" && SECTION_HEADER.is_match(line) {
            granted_indent = Some(indent);
        }
    }
    false
}
