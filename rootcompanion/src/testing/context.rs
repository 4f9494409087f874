use std::collections::HashMap;
use std::path::{Path, PathBuf};

use mockall::mock;
use rstest::fixture;

use super::TmpDir;

use crate::config::CompanionConfig;
use crate::context::PlatformVersion;
use crate::Context;

#[fixture]
pub fn test_context() -> TestContext {
    TestContext::default()
}

#[fixture]
pub fn mock_context() -> MockContext {
    MockContext::new()
}

/// A [Context] with a fixed platform and config whose directories all live
/// in a throwaway temp directory
pub struct TestContext {
    dir: TmpDir,
    env: HashMap<String, String>,
    version: PlatformVersion,
    config: CompanionConfig,
}

impl TestContext {
    pub fn new(version: PlatformVersion, config: CompanionConfig) -> Self {
        Self {
            dir: TmpDir::new(),
            env: HashMap::new(),
            version,
            config,
        }
    }

    pub fn set_env<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) -> &mut Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn get_base_dir(&self) -> &Path {
        self.dir.get_path()
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new(PlatformVersion::new(34, "14"), CompanionConfig::default())
    }
}

impl Context for TestContext {
    fn get_platform_version(&self) -> PlatformVersion {
        self.version.clone()
    }

    fn get_config(&self) -> crate::Result<&CompanionConfig> {
        Ok(&self.config)
    }

    fn maybe_get_env(&self, key: &str) -> Option<String> {
        self.env.get(key).map(String::from)
    }

    /// Nothing is on the path, so no real tool gets run by accident
    fn maybe_get_bin(&self, _bin: &str) -> Option<String> {
        None
    }

    fn get_staging_dir(&self) -> crate::Result<PathBuf> {
        Ok(self.get_base_dir().to_path_buf())
    }

    fn get_user_config_dir(&self) -> crate::Result<PathBuf> {
        Ok(self.get_base_dir().join("config"))
    }

    fn get_user_local_dir(&self) -> crate::Result<PathBuf> {
        Ok(self.get_base_dir().join("local"))
    }
}

mock! {
    pub Context {}

    impl crate::Context for Context {
        fn get_platform_version(&self) -> PlatformVersion;
        fn get_config<'a>(&'a self) -> crate::Result<&'a CompanionConfig>;
        fn maybe_get_env(&self, key: &str) -> Option<String>;
        fn maybe_get_bin(&self, bin: &str) -> Option<String>;
    }
}
