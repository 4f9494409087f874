use crossbeam::channel::Receiver;
use mockall::mock;
use rstest::fixture;

use crate::package::PackageInfo;
use crate::shell::{CommandResult, RootCommand};

mock! {
    pub RootShell {}

    impl crate::shell::RootShell for RootShell {
        fn is_root_available(&self) -> bool;
        fn check_access(&self) -> crate::Result<()>;
        fn execute_cancelable(
            &self,
            cmd: &RootCommand,
            cancel: Option<Receiver<()>>,
        ) -> crate::Result<CommandResult>;
    }
}

mock! {
    pub PackageManager {}

    impl crate::package::PackageManager for PackageManager {
        fn package_info(&self, package: &str) -> crate::Result<PackageInfo>;
        fn has_permission(&self, package: &str, permission: &str) -> crate::Result<bool>;
    }
}

mock! {
    pub StatsProvider {}

    impl crate::stats::StatsProvider for StatsProvider {
        fn get_statistics(&self) -> crate::Result<Vec<u8>>;
    }
}

#[fixture]
pub fn mock_root_shell() -> MockRootShell {
    MockRootShell::new()
}

#[fixture]
pub fn mock_package_manager() -> MockPackageManager {
    MockPackageManager::new()
}

/// A finished root command with the given exit status and output lines
pub fn result_with(exit: i32, lines: &[&str]) -> CommandResult {
    CommandResult {
        id: 0,
        exit,
        output: lines.iter().map(|it| it.as_bytes().to_vec()).collect(),
    }
}
