use std::fmt::Display;
use std::path::Path;
use std::time::Duration;
use std::{borrow::Cow, path::PathBuf};
use toml::{Table, Value};

use crate::utils::{path_must_str, read_file};

pub const DEFAULT_PACKAGE_NAME: &'static str = "com.gsamlabs.bbm.rootcompanion";
pub const DEFAULT_INSTALL_NAME: &'static str = "GSamBatteryMonitorRootHelper";
pub const DEFAULT_NAMESPACE: &'static str = "gsamlabs";
pub const DEFAULT_SU: &'static str = "su";
pub const DEFAULT_SOCKET: &'static str = "/data/local/tmp/rootcompanion.sock";
pub const DEFAULT_ROOT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum Error {
    InvalidType,
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::InvalidType => "InvalidType",
            }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub struct ConfigMap<'c> {
    path: &'c Path,
    name: Option<Cow<'c, str>>,
    table: &'c Table,
}

/// Settings for the package being managed
#[derive(Clone, Debug, PartialEq)]
pub struct PackageConfig {
    /// The Android package name
    pub name: String,
    /// Directory and file name used under /system/priv-app on Lollipop+
    pub install_name: String,
    /// Substring the private data directory must contain before we are
    /// willing to delete it
    pub namespace: String,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_PACKAGE_NAME.into(),
            install_name: DEFAULT_INSTALL_NAME.into(),
            namespace: DEFAULT_NAMESPACE.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RootConfig {
    /// The `su` binary, either a name looked up in PATH or an absolute path
    pub su: String,
    /// Default ceiling for root commands that don't pick their own
    pub timeout: Duration,
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            su: DEFAULT_SU.into(),
            timeout: DEFAULT_ROOT_TIMEOUT,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServiceConfig {
    pub socket: PathBuf,
    /// Extra uids allowed to call the proxy service. Root and the uid running
    /// the service are always allowed.
    pub allowed_uids: Vec<u32>,
    /// Binder transaction code of `getStatistics`, overrides the per
    /// platform default
    pub stats_transaction: Option<u32>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from(DEFAULT_SOCKET),
            allowed_uids: Vec::new(),
            stats_transaction: None,
        }
    }
}

/// The full configuration, every section falls back to its defaults when it
/// isn't present in the file
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompanionConfig {
    pub package: PackageConfig,
    pub root: RootConfig,
    pub service: ServiceConfig,
}

impl CompanionConfig {
    pub fn parse(source: &Path) -> crate::Result<Self> {
        parse_config(source, Self::from_map)
    }

    pub fn from_map(cfg: &ConfigMap) -> crate::Result<Self> {
        let mut it = Self::default();

        if let Some(pkg) = cfg.maybe_get_map_typecheck("package")? {
            if let Some(name) = pkg.maybe_get_str_typecheck("name")? {
                it.package.name = name.into();
            }
            if let Some(name) = pkg.maybe_get_str_typecheck("install-name")? {
                it.package.install_name = name.into();
            }
            if let Some(ns) = pkg.maybe_get_str_typecheck("namespace")? {
                if ns.is_empty() {
                    return Err(pkg.invalid_key("namespace", "non-empty string"));
                }
                it.package.namespace = ns.into();
            }
        }

        if let Some(root) = cfg.maybe_get_map_typecheck("root")? {
            if let Some(su) = root.maybe_get_str_typecheck("su")? {
                it.root.su = su.into();
            }
            if let Some(ms) = root.maybe_get_int_typecheck("timeout-ms")? {
                if ms <= 0 {
                    return Err(root.invalid_key("timeout-ms", "positive int"));
                }
                it.root.timeout = Duration::from_millis(ms as u64);
            }
        }

        if let Some(svc) = cfg.maybe_get_map_typecheck("service")? {
            if let Some(sock) = svc.maybe_get_str_typecheck("socket")? {
                it.service.socket = PathBuf::from(sock);
            }
            if let Some(uids) = svc.maybe_get_int_array_typecheck("allowed-uids")? {
                it.service.allowed_uids = uids
                    .into_iter()
                    .map(|uid| {
                        u32::try_from(uid).map_err(|_| svc.invalid_key("allowed-uids", "uid"))
                    })
                    .collect::<crate::Result<Vec<u32>>>()?;
            }
            if let Some(code) = svc.maybe_get_int_typecheck("stats-transaction")? {
                let code = u32::try_from(code)
                    .ok()
                    .filter(|it| *it > 0)
                    .ok_or_else(|| svc.invalid_key("stats-transaction", "positive int"))?;
                it.service.stats_transaction = Some(code);
            }
        }

        Ok(it)
    }
}

pub fn parse_config<R, F>(file: &Path, f: F) -> crate::Result<R>
where
    F: FnOnce(&ConfigMap) -> crate::Result<R>,
{
    let as_str = read_file(file)?;

    let table: Table = match toml::from_str(&as_str) {
        Ok(v) => v,
        Err(e) => return Err(crate::Error::new_cfg(file, &e)),
    };

    let base = ConfigMap {
        name: None,
        path: file,
        table: &table,
    };

    f(&base)
}

impl<'c> ConfigMap<'c> {
    fn get_full_path<'a>(&'a self) -> Option<&'a str> {
        self.name.as_ref().map(|it| it.as_ref())
    }

    fn key_path<'a>(&self, key: &'a str) -> Cow<'a, str> {
        match self.get_full_path() {
            None => Cow::Borrowed(key),
            Some(v) => Cow::Owned(format!("{}.{}", v, key)),
        }
    }

    /// Helper to create a crate::Error for an invalid key
    pub fn invalid_key(&self, key: &str, expected: &str) -> crate::Error {
        let path = self.key_path(key);
        crate::Error::InvalidConfig(
            path_must_str(self.path).into(),
            format!(
                "invalid value for key: {} (expected type: {})",
                path, expected
            ),
        )
    }

    fn get(&self, key: &str) -> Option<&'c Value> {
        self.table.get(key)
    }

    pub fn maybe_get_int(&self, key: &str) -> Result<Option<i64>> {
        match self.get(key) {
            Some(v) => match v.as_integer() {
                Some(v) => Ok(Some(v)),
                None => Err(Error::InvalidType),
            },
            None => Ok(None),
        }
    }

    pub fn maybe_get_int_typecheck(&self, key: &str) -> crate::Result<Option<i64>> {
        self.maybe_get_int(key)
            .map_err(|_| self.invalid_key(key, "int"))
    }

    pub fn maybe_get_int_array(&self, key: &str) -> Result<Option<Vec<i64>>> {
        let arr = match self.get(key) {
            Some(v) => v.as_array().ok_or(Error::InvalidType)?,
            None => return Ok(None),
        };
        arr.iter()
            .map(|it| it.as_integer().ok_or(Error::InvalidType))
            .collect::<Result<Vec<i64>>>()
            .map(Some)
    }

    pub fn maybe_get_int_array_typecheck(&self, key: &str) -> crate::Result<Option<Vec<i64>>> {
        self.maybe_get_int_array(key)
            .map_err(|_| self.invalid_key(key, "array of ints"))
    }

    pub fn maybe_get_str(&self, key: &str) -> Result<Option<&'c str>> {
        match self.get(key) {
            Some(v) => match v.as_str() {
                Some(v) => Ok(Some(v)),
                None => Err(Error::InvalidType),
            },
            None => Ok(None),
        }
    }

    pub fn maybe_get_str_typecheck(&self, key: &str) -> crate::Result<Option<&'c str>> {
        self.maybe_get_str(key)
            .map_err(|_| self.invalid_key(key, "string"))
    }

    pub fn maybe_get_map(&'c self, key: &'c str) -> Result<Option<ConfigMap<'c>>> {
        match self.get(key) {
            Some(v) => match v.as_table() {
                Some(table) => {
                    let name = match &self.get_full_path() {
                        Some(parents) => Cow::Owned(format!("{parents}.{key}")),
                        None => Cow::Borrowed(key),
                    };
                    Ok(Some(Self {
                        name: Some(name),
                        path: self.path,
                        table,
                    }))
                }
                None => Err(Error::InvalidType),
            },
            None => Ok(None),
        }
    }

    pub fn maybe_get_map_typecheck(&'c self, key: &'c str) -> crate::Result<Option<ConfigMap<'c>>> {
        self.maybe_get_map(key)
            .map_err(|_| self.invalid_key(key, "table"))
    }
}

#[cfg(test)]
mod test {
    use crate::testing::{tmp_dir, TmpDir};

    use super::*;
    use rstest::*;

    #[rstest]
    fn test_full_config(tmp_dir: TmpDir) {
        let content = r#"
[package]
name = "com.example.helper"
install-name = "ExampleHelper"
namespace = "example"

[root]
su = "/system/xbin/su"
timeout-ms = 2500

[service]
socket = "/dev/socket/helper"
allowed-uids = [10123, 10124]
stats-transaction = 15
"#;
        let file = tmp_dir.create_file_name("rootcompanion.toml", Some(content));
        let cfg = CompanionConfig::parse(&file).expect("parse config");

        assert_eq!(cfg.package.name, "com.example.helper");
        assert_eq!(cfg.package.install_name, "ExampleHelper");
        assert_eq!(cfg.package.namespace, "example");
        assert_eq!(cfg.root.su, "/system/xbin/su");
        assert_eq!(cfg.root.timeout, Duration::from_millis(2500));
        assert_eq!(cfg.service.socket, PathBuf::from("/dev/socket/helper"));
        assert_eq!(cfg.service.allowed_uids, vec![10123, 10124]);
        assert_eq!(cfg.service.stats_transaction, Some(15));
    }

    #[rstest]
    fn test_defaults(tmp_dir: TmpDir) {
        let file = tmp_dir.create_file_name("empty.toml", Some("[root]\nsu = \"su\"\n"));
        let cfg = CompanionConfig::parse(&file).expect("parse config");
        assert_eq!(cfg, CompanionConfig::default());
        assert_eq!(cfg.package.install_name, DEFAULT_INSTALL_NAME);
    }

    #[rstest]
    #[case("[root]\ntimeout-ms = \"fast\"\n", "root.timeout-ms")]
    #[case("[root]\ntimeout-ms = 0\n", "root.timeout-ms")]
    #[case("[service]\nallowed-uids = [\"shell\"]\n", "service.allowed-uids")]
    #[case("[service]\nallowed-uids = [-1]\n", "service.allowed-uids")]
    #[case("[service]\nstats-transaction = 0\n", "service.stats-transaction")]
    #[case("[package]\nnamespace = \"\"\n", "package.namespace")]
    #[case("package = 12\n", "package")]
    fn test_invalid(tmp_dir: TmpDir, #[case] content: &str, #[case] key: &str) {
        let file = tmp_dir.create_file_name("bad.toml", Some(content));
        match CompanionConfig::parse(&file) {
            Err(crate::Error::InvalidConfig(_, msg)) => {
                assert!(msg.contains(key), "{} should mention {}", msg, key)
            }
            other => panic!("expected InvalidConfig, got {:?}", other),
        }
    }

    #[rstest]
    fn test_not_toml(tmp_dir: TmpDir) {
        let file = tmp_dir.create_file_name("garbage.toml", Some("[[[ nope"));
        assert!(matches!(
            CompanionConfig::parse(&file),
            Err(crate::Error::InvalidConfig(_, _))
        ));
    }
}
