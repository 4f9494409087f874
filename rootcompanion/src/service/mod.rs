use std::sync::Arc;

use crate::package::{PackageManager, BATTERY_STATS_PERMISSION};
use crate::shell::RootShell;
use crate::stats::{ServiceCallStats, StatsProvider};
use crate::Context;

pub mod client;
pub mod procfile;
pub mod protocol;
pub mod server;

pub use client::ProxyClient;
pub use procfile::{legacy_encode, read_proc_file, ProcFileResult, ReadProcError};
pub use server::ProxyServer;

/// The state behind the proxy service
pub struct BatteryStatsService {
    stats: Arc<dyn StatsProvider>,
    shell: Arc<dyn RootShell>,
    has_permission: bool,
}

impl BatteryStatsService {
    pub fn new(stats: Arc<dyn StatsProvider>, shell: Arc<dyn RootShell>, has_permission: bool) -> Self {
        Self {
            stats,
            shell,
            has_permission,
        }
    }

    /// Build the service for the configured package, checking its permission
    /// grant once up front
    pub fn from_ctx(
        ctx: &dyn Context,
        shell: Arc<dyn RootShell>,
        pm: &dyn PackageManager,
    ) -> crate::Result<Self> {
        let cfg = ctx.get_config()?;
        let has_permission = match pm.has_permission(&cfg.package.name, BATTERY_STATS_PERMISSION) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("couldn't check permission for {}: {}", cfg.package.name, e);
                false
            }
        };
        log::info!(
            "{} {} {}",
            cfg.package.name,
            if has_permission { "holds" } else { "doesn't hold" },
            BATTERY_STATS_PERMISSION
        );

        let mut stats = ServiceCallStats::new(
            Arc::clone(&shell),
            ctx.get_platform_version(),
            cfg.root.timeout,
        );
        if let Some(code) = cfg.service.stats_transaction {
            stats = stats.with_transaction(code);
        }
        Ok(Self::new(Arc::new(stats), shell, has_permission))
    }

    pub fn get_statistics(&self) -> crate::Result<Vec<u8>> {
        self.stats.get_statistics()
    }

    /// Whether the package held the permission when the service was created
    pub fn has_battery_stats_permission(&self) -> bool {
        self.has_permission
    }

    pub fn read_proc_file(&self, path: &str) -> ProcFileResult {
        read_proc_file(path, self.shell.as_ref())
    }
}
