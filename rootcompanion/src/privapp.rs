use itertools::Itertools;

use crate::context::PlatformVersion;
use crate::utils::{device_file_name, DEVICE_PATH_SEP};

pub const PRIV_APP_DIR: &'static str = "/system/priv-app";
pub const ADDON_D_DIR: &'static str = "/system/addon.d";

/// The file name of the installed APK, or the whole path with
/// `include_full_path`.
///
/// With `wildcard`, everything from the last `-` on is replaced with `*` so
/// `com.example-2.apk` matches the copy made from `com.example-1.apk`.
/// Names without a `-` (or with one only at the start) are left alone.
pub fn apk_name(source_dir: &str, include_full_path: bool, wildcard: bool) -> crate::Result<String> {
    if source_dir.is_empty() {
        return Err(crate::Error::PathResolution("empty APK path".into()));
    }

    let name = if include_full_path {
        if !source_dir.contains(DEVICE_PATH_SEP) {
            return Err(crate::Error::PathResolution(format!(
                "not an absolute path: {}",
                source_dir
            )));
        }
        source_dir
    } else {
        match device_file_name(source_dir) {
            Some(name) if !name.is_empty() => name,
            _ => {
                return Err(crate::Error::PathResolution(format!(
                    "no file name in APK path: {}",
                    source_dir
                )))
            }
        }
    };

    if !wildcard {
        return Ok(name.into());
    }

    Ok(match name.rfind('-') {
        Some(idx) if idx > 0 => format!("{}*", &name[..idx]),
        _ => name.into(),
    })
}

/// Where the privileged copy lives for the given platform
pub fn priv_app_path(
    version: &PlatformVersion,
    source_dir: &str,
    install_name: &str,
    wildcard: bool,
) -> crate::Result<String> {
    if version.is_lollipop_or_later() {
        return Ok(format!(
            "{PRIV_APP_DIR}/{name}/{name}.apk",
            name = install_name
        ));
    }
    let name = apk_name(source_dir, false, wildcard)?;
    Ok(format!("{}/{}", PRIV_APP_DIR, name))
}

/// The canonical privileged copy of the package
#[derive(Clone, Debug, PartialEq)]
pub struct PrivAppTarget {
    /// Absolute path of the APK copy
    pub path: String,
    /// The per package directory holding the copy on Lollipop+
    pub dir: Option<String>,
    /// Pattern to find copies made from an earlier APK name, pre-Lollipop only
    pub wildcard: Option<String>,
}

impl PrivAppTarget {
    pub fn resolve(
        version: &PlatformVersion,
        source_dir: &str,
        install_name: &str,
    ) -> crate::Result<Self> {
        let path = priv_app_path(version, source_dir, install_name, false)?;
        if version.is_lollipop_or_later() {
            return Ok(Self {
                path,
                dir: Some(format!("{}/{}", PRIV_APP_DIR, install_name)),
                wildcard: None,
            });
        }

        let pattern = apk_name(source_dir, false, true)?;
        let wildcard = if pattern.ends_with('*') {
            Some(pattern)
        } else {
            None
        };
        Ok(Self {
            path,
            dir: None,
            wildcard,
        })
    }

    /// What has to be removed to get rid of the copy
    pub fn removal_path(&self) -> &str {
        self.dir.as_deref().unwrap_or(&self.path)
    }
}

/// Entries in `candidates` matching a trailing `*` pattern, sorted so the
/// first entry is the one to act on.
///
/// A pattern without `*` only matches itself.
pub fn wildcard_matches<I, S>(pattern: &str, candidates: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let (prefix, exact) = match pattern.strip_suffix('*') {
        Some(prefix) => (prefix, false),
        None => (pattern, true),
    };

    candidates
        .into_iter()
        .map(|it| it.as_ref().to_string())
        .filter(|it| if exact { it == prefix } else { it.starts_with(prefix) })
        .sorted()
        .dedup()
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::*;

    fn kitkat() -> PlatformVersion {
        PlatformVersion::new(19, "4.4.2")
    }

    fn lollipop() -> PlatformVersion {
        PlatformVersion::new(21, "5.0.1")
    }

    #[rstest]
    #[case("/data/app/com.gsamlabs.bbm.rootcompanion-1.apk", false, false, "com.gsamlabs.bbm.rootcompanion-1.apk")]
    #[case("/data/app/com.gsamlabs.bbm.rootcompanion-1.apk", false, true, "com.gsamlabs.bbm.rootcompanion*")]
    #[case("/data/app/com.gsamlabs.bbm.rootcompanion-1.apk", true, true, "/data/app/com.gsamlabs.bbm.rootcompanion*")]
    #[case("/data/app/com.gsamlabs.bbm.rootcompanion-1.apk", true, false, "/data/app/com.gsamlabs.bbm.rootcompanion-1.apk")]
    #[case("/data/app/plain.apk", false, true, "plain.apk")]
    #[case("/data/app/-leading.apk", false, true, "-leading.apk")]
    #[case("/data/app/a-b-2.apk", false, true, "a-b*")]
    fn test_apk_name(
        #[case] source: &str,
        #[case] full: bool,
        #[case] wildcard: bool,
        #[case] expected: &str,
    ) {
        assert_eq!(apk_name(source, full, wildcard).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("no-slash.apk")]
    #[case("/data/app/")]
    fn test_apk_name_unresolvable(#[case] source: &str) {
        assert!(matches!(
            apk_name(source, false, false),
            Err(crate::Error::PathResolution(_))
        ));
    }

    #[test]
    fn test_priv_app_path_pre_lollipop() {
        let path = priv_app_path(
            &kitkat(),
            "/data/app/com.gsamlabs.bbm.rootcompanion-2.apk",
            "GSamBatteryMonitorRootHelper",
            false,
        )
        .unwrap();
        assert_eq!(path, "/system/priv-app/com.gsamlabs.bbm.rootcompanion-2.apk");

        let path = priv_app_path(
            &kitkat(),
            "/data/app/com.gsamlabs.bbm.rootcompanion-2.apk",
            "GSamBatteryMonitorRootHelper",
            true,
        )
        .unwrap();
        assert_eq!(path, "/system/priv-app/com.gsamlabs.bbm.rootcompanion*");
    }

    #[rstest]
    #[case("/data/app/com.gsamlabs.bbm.rootcompanion-1/base.apk")]
    #[case("/data/app/anything-else.apk")]
    #[case("")]
    fn test_priv_app_path_lollipop_is_fixed(#[case] source: &str) {
        for wildcard in [false, true] {
            assert_eq!(
                priv_app_path(&lollipop(), source, "GSamBatteryMonitorRootHelper", wildcard).unwrap(),
                "/system/priv-app/GSamBatteryMonitorRootHelper/GSamBatteryMonitorRootHelper.apk"
            );
        }
    }

    #[test]
    fn test_target_resolve() {
        let target = PrivAppTarget::resolve(&lollipop(), "/data/app/x/base.apk", "Helper").unwrap();
        assert_eq!(target.path, "/system/priv-app/Helper/Helper.apk");
        assert_eq!(target.removal_path(), "/system/priv-app/Helper");
        assert_eq!(target.wildcard, None);

        let target = PrivAppTarget::resolve(&kitkat(), "/data/app/com.x-1.apk", "Helper").unwrap();
        assert_eq!(target.path, "/system/priv-app/com.x-1.apk");
        assert_eq!(target.removal_path(), "/system/priv-app/com.x-1.apk");
        assert_eq!(target.wildcard.as_deref(), Some("com.x*"));

        let target = PrivAppTarget::resolve(&kitkat(), "/data/app/plain.apk", "Helper").unwrap();
        assert_eq!(target.wildcard, None);
    }

    #[test]
    fn test_wildcard_matches_sorted() {
        let found = wildcard_matches(
            "com.gsamlabs.bbm.rootcompanion*",
            [
                "com.gsamlabs.bbm.rootcompanion-2.apk",
                "Settings.apk",
                "com.gsamlabs.bbm.rootcompanion-1.apk",
                "Com.gsamlabs.bbm.rootcompanion-0.apk",
            ],
        );
        assert_eq!(
            found,
            vec![
                "com.gsamlabs.bbm.rootcompanion-1.apk".to_string(),
                "com.gsamlabs.bbm.rootcompanion-2.apk".to_string(),
            ]
        );
    }

    #[test]
    fn test_wildcard_matches_exact() {
        let found = wildcard_matches("plain.apk", ["plain.apk", "plain.apk.bak"]);
        assert_eq!(found, vec!["plain.apk".to_string()]);
        assert!(wildcard_matches("x*", Vec::<String>::new()).is_empty());
    }
}
