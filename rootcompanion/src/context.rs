use blanket::blanket;
use once_cell::sync::OnceCell;
use std::env;
use std::fmt::Display;
use std::path::PathBuf;

use directories::BaseDirs;
use lazy_static::lazy_static;
use regex::Regex;
use which::which;

use crate::command::run_cmd;
use crate::config::CompanionConfig;
use crate::utils::ensure_dir_exists;
use crate::Error;

use std::ops::DerefMut;
use std::sync::Mutex;

/// First SDK level of KitKat, where the battery stats service was renamed
pub const SDK_KITKAT: u32 = 19;
/// First SDK level of Lollipop, where priv-app moved to per package directories
pub const SDK_LOLLIPOP: u32 = 21;

const FALLBACK_SDK: u32 = 33;

lazy_static! {
    static ref GETPROP_LINE: Regex = Regex::new(r"^\[([^\]]+)\]:\s*\[([^\]]*)\]$").unwrap();
}

#[derive(Clone)]
struct CachedBin {
    name: String,
    path: String,
}

fn find_program(prog: &str) -> Option<String> {
    which(prog).ok().map(|it| it.to_string_lossy().into())
}

/// The Android version the process is running on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlatformVersion {
    /// `ro.build.version.sdk`
    pub sdk: u32,
    /// `ro.build.version.release`, e.g. `4.4.2` or `14`
    pub release: String,
}

impl PlatformVersion {
    pub fn new<S: Into<String>>(sdk: u32, release: S) -> Self {
        Self {
            sdk,
            release: release.into(),
        }
    }

    /// The leading component of the release string
    pub fn release_major(&self) -> Option<u32> {
        let major = self.release.split('.').next()?;
        major.trim().parse().ok()
    }

    /// Whether priv-app uses the Lollipop `<name>/<name>.apk` layout.
    ///
    /// Decided on the release major version, the SDK level is only consulted
    /// if the release string is garbage.
    pub fn is_lollipop_or_later(&self) -> bool {
        match self.release_major() {
            Some(major) => major >= 5,
            None => self.sdk >= SDK_LOLLIPOP,
        }
    }

    pub fn is_kitkat_or_later(&self) -> bool {
        self.sdk >= SDK_KITKAT
    }
}

impl Display for PlatformVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Android {} (SDK {})", self.release, self.sdk)
    }
}

/// Context is a trait for an object that can help standardize file locations,
/// find binaries, and lookup env vars.
///
/// Most methods on this trait have a default implementation that is perfectly
/// safe to leave unchanged.
#[blanket(derive(Ref, Box))]
pub trait Context: Send + Sync {
    /// Returns the Android version of the device we're running on
    fn get_platform_version(&self) -> PlatformVersion;

    fn get_config(&self) -> crate::Result<&CompanionConfig>;

    fn maybe_get_env(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn maybe_get_bin(&self, bin: &str) -> Option<String> {
        find_program(bin)
    }

    /// The config file, `$ROOTCOMPANION_CONFIG` if set
    fn get_config_file(&self) -> crate::Result<PathBuf> {
        if let Some(path) = self.maybe_get_env("ROOTCOMPANION_CONFIG") {
            return Ok(PathBuf::from(path));
        }
        self.get_user_config_dir()
            .map(|it| it.join("rootcompanion.toml"))
    }

    /// Socket the proxy service listens on, `$ROOTCOMPANION_SOCKET` wins over
    /// the config file
    fn get_socket_path(&self) -> crate::Result<PathBuf> {
        if let Some(path) = self.maybe_get_env("ROOTCOMPANION_SOCKET") {
            return Ok(PathBuf::from(path));
        }
        Ok(self.get_config()?.service.socket.clone())
    }

    /// Directory for staging files before they're copied as root
    fn get_staging_dir(&self) -> crate::Result<PathBuf> {
        Ok(env::temp_dir())
    }

    fn get_user_local_dir(&self) -> crate::Result<PathBuf> {
        let bd = BaseDirs::new().ok_or(Error::NoBaseDirs)?;
        let dir = bd.data_local_dir().join("rootcompanion");
        ensure_dir_exists(&dir)?;
        Ok(dir)
    }

    fn get_user_config_dir(&self) -> crate::Result<PathBuf> {
        let bd = BaseDirs::new().ok_or(Error::NoBaseDirs)?;
        Ok(bd.config_dir().join("rootcompanion"))
    }
}

pub struct DefaultContext {
    platform_version: OnceCell<PlatformVersion>,
    bin_cache: Mutex<Vec<CachedBin>>,
    config: OnceCell<CompanionConfig>,
}

impl Clone for DefaultContext {
    fn clone(&self) -> Self {
        let cache = self.bin_cache.lock().expect("failed to lock");
        Self {
            platform_version: self.platform_version.clone(),
            bin_cache: Mutex::new(cache.clone()),
            config: self.config.clone(),
        }
    }
}

impl DefaultContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the given config instead of loading one from disk
    pub fn with_config(config: CompanionConfig) -> Self {
        let it = Self::default();
        let _ = it.config.set(config);
        it
    }
}

impl Default for DefaultContext {
    fn default() -> Self {
        Self {
            platform_version: OnceCell::new(),
            bin_cache: Mutex::new(Vec::new()),
            config: OnceCell::new(),
        }
    }
}

impl Context for DefaultContext {
    fn get_config(&self) -> crate::Result<&CompanionConfig> {
        self.config.get_or_try_init(|| -> crate::Result<CompanionConfig> {
            let path = self.get_config_file()?;
            if !path.exists() {
                log::debug!("no config at {:?}, using defaults", path);
                Ok(CompanionConfig::default())
            } else {
                CompanionConfig::parse(&path)
            }
        })
    }

    fn get_platform_version(&self) -> PlatformVersion {
        self.platform_version
            .get_or_init(|| {
                let sdk = self
                    .get_sdk_via_env()
                    .or_else(|| self.getprop("ro.build.version.sdk")?.parse().ok())
                    .unwrap_or_else(|| {
                        log::warn!(
                            "failed to determine api level, use hard coded value {}",
                            FALLBACK_SDK
                        );
                        FALLBACK_SDK
                    });

                let release = self
                    .maybe_get_env("ROOTCOMPANION_ANDROID_RELEASE")
                    .or_else(|| self.getprop("ro.build.version.release"))
                    .unwrap_or_default();

                PlatformVersion { sdk, release }
            })
            .clone()
    }

    fn maybe_get_bin(&self, prog: &str) -> Option<String> {
        let mut cache_guard = self.bin_cache.lock().expect("failed to lock");
        let cache = cache_guard.deref_mut();
        if let Some(val) = cache.iter().find(|it| it.name == prog) {
            return Some(val.path.clone());
        }

        let found = find_program(prog)?;

        cache.push(CachedBin {
            name: prog.into(),
            path: found.clone(),
        });

        Some(found)
    }
}

impl DefaultContext {
    fn get_sdk_via_env(&self) -> Option<u32> {
        let env_level = self.maybe_get_env("ROOTCOMPANION_ANDROID_API_LEVEL")?;
        u32::from_str_radix(&env_level, 10).ok()
    }

    fn getprop(&self, key: &str) -> Option<String> {
        let bin = self.maybe_get_bin("getprop")?;

        if let Ok(out) = run_cmd(&bin, &[key]) {
            if out.ok() {
                let value = out.stdout_utf8_lossy().trim().to_string();
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }

        // Some builds only answer the full listing
        let out = run_cmd(&bin, &[] as &[&str]).ok()?;
        if !out.ok() {
            return None;
        }
        find_getprop_value(&out.stdout_utf8_lossy(), key)
    }
}

/// Find the value of `key` in the full `getprop` listing
fn find_getprop_value(listing: &str, key: &str) -> Option<String> {
    listing.lines().find_map(|line| {
        let caps = GETPROP_LINE.captures(line.trim())?;
        if caps.get(1)?.as_str() == key {
            Some(caps.get(2)?.as_str().to_string())
        } else {
            None
        }
    })
}
