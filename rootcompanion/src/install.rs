use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver};

use crate::package::{PackageInfo, PackageManager, BATTERY_STATS_PERMISSION};
use crate::privapp::{wildcard_matches, PrivAppTarget, ADDON_D_DIR, PRIV_APP_DIR};
use crate::rootfs::RootFs;
use crate::shell::{RootCommand, RootShell};
use crate::tasks::{EventMonitor, TaskCancelCheck, TaskCanceller};
use crate::utils::{device_parent, path_must_str};
use crate::Context;

pub const BACKUP_SCRIPT_NAME: &'static str = "91-gsamrootcompanion_backup.sh";

/// addon.d hook that carries the privileged copy across ROM updates
pub const BACKUP_SCRIPT: &'static str = include_str!("../assets/91-gsamrootcompanion_backup.sh");

pub const REBOOT_TIMEOUT: Duration = Duration::from_secs(20);

const DATA_APP_DIR: &'static str = "/data/app/";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The change only takes effect after a reboot
    RebootRequired,
    Done,
}

/// Progress of a running operation
#[derive(Clone, Debug, PartialEq)]
pub enum InstallEvent {
    CheckingRoot,
    Copying { src: String, dst: String },
    InstallingBackupScript,
    Deleting(String),
    Rebooting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Install,
    Uninstall,
    Reboot,
    InstallBackupScript,
}

/// Snapshot of where things stand, gathered without asking for root
#[derive(Clone, Debug, PartialEq)]
pub struct InstallStatus {
    pub root_available: bool,
    pub has_permission: bool,
    pub source_dir: Option<String>,
    pub target: Option<String>,
    pub addon_d: bool,
}

/// Moves the package in and out of the privileged app directory
#[derive(Clone)]
pub struct InstallManager {
    ctx: Arc<dyn Context>,
    shell: Arc<dyn RootShell>,
    pm: Arc<dyn PackageManager>,
    cancel: Option<TaskCancelCheck>,
}

impl InstallManager {
    pub fn new(ctx: Arc<dyn Context>, shell: Arc<dyn RootShell>, pm: Arc<dyn PackageManager>) -> Self {
        Self {
            ctx,
            shell,
            pm,
            cancel: None,
        }
    }

    /// Stop between steps (and abandon a pending reboot) once `check` says
    /// the task was cancelled
    pub fn with_cancel(mut self, check: TaskCancelCheck) -> Self {
        self.cancel = Some(check);
        self
    }

    fn check_cancelled(&self) -> crate::Result<()> {
        match &self.cancel {
            Some(c) => c.check(),
            None => Ok(()),
        }
    }

    fn rootfs(&self) -> crate::Result<RootFs<'_>> {
        let timeout = self.ctx.get_config()?.root.timeout;
        Ok(RootFs::new(self.shell.as_ref(), timeout))
    }

    fn package_name(&self) -> crate::Result<String> {
        Ok(self.ctx.get_config()?.package.name.clone())
    }

    fn require_root(&self, monitor: &dyn EventMonitor<InstallEvent>) -> crate::Result<()> {
        monitor.on_event(InstallEvent::CheckingRoot);
        self.shell.check_access().map_err(|e| {
            if !e.is_root_denied() {
                log::warn!("root check failed: {}", e);
            }
            crate::Error::RootAccessDenied
        })
    }

    fn package_info(&self) -> crate::Result<PackageInfo> {
        let info = self.pm.package_info(&self.package_name()?)?;
        if info.source_dir.is_empty() || !info.source_dir.contains('/') {
            return Err(crate::Error::PathResolution(info.source_dir));
        }
        Ok(info)
    }

    fn target(&self, source_dir: &str) -> crate::Result<PrivAppTarget> {
        let cfg = self.ctx.get_config()?;
        PrivAppTarget::resolve(
            &self.ctx.get_platform_version(),
            source_dir,
            &cfg.package.install_name,
        )
    }

    pub fn is_root_available(&self) -> bool {
        self.shell.is_root_available()
    }

    pub fn has_battery_stats_permission(&self) -> crate::Result<bool> {
        self.pm
            .has_permission(&self.package_name()?, BATTERY_STATS_PERMISSION)
    }

    pub fn status(&self) -> crate::Result<InstallStatus> {
        let has_permission = self.has_battery_stats_permission().unwrap_or_else(|e| {
            log::warn!("couldn't check permission: {}", e);
            false
        });

        let (source_dir, target) = match self.package_info() {
            Ok(info) => {
                let target = self.target(&info.source_dir).ok().map(|it| it.path);
                (Some(info.source_dir), target)
            }
            Err(e) => {
                log::debug!("no package info: {}", e);
                (None, None)
            }
        };

        Ok(InstallStatus {
            root_available: self.is_root_available(),
            has_permission,
            source_dir,
            target,
            addon_d: Path::new(ADDON_D_DIR).is_dir(),
        })
    }

    /// Copy the installed APK into the privileged app directory
    pub fn install_as_system_app(
        &self,
        monitor: &dyn EventMonitor<InstallEvent>,
    ) -> crate::Result<InstallOutcome> {
        self.require_root(monitor)?;
        self.check_cancelled()?;

        let info = self.package_info()?;
        let target = self.target(&info.source_dir)?;

        monitor.on_event(InstallEvent::Copying {
            src: info.source_dir.clone(),
            dst: target.path.clone(),
        });
        let fs = self.rootfs()?;
        let copied = fs.copy_file(&info.source_dir, &target.path, true, true);

        log::debug!(
            "copy from {} to {} succeeded: {:?}",
            info.source_dir,
            target.path,
            copied.as_ref().ok()
        );
        if !copied? {
            return Err(crate::Error::CopyFailed {
                src: info.source_dir,
                dst: target.path,
            });
        }

        self.check_cancelled()?;
        monitor.on_event(InstallEvent::InstallingBackupScript);
        if let Err(e) = self.install_backup_script() {
            log::warn!("{}", e);
        }

        Ok(InstallOutcome::RebootRequired)
    }

    /// Put the addon.d backup hook in place. Does nothing when the ROM has
    /// no addon.d directory.
    pub fn install_backup_script(&self) -> crate::Result<bool> {
        let fs = self.rootfs()?;
        let wrap = |e: crate::Error| crate::Error::BackupScriptInstall(e.to_string());

        if !fs.is_dir(ADDON_D_DIR).map_err(wrap)? {
            log::debug!("{} doesn't exist, skipping the backup script", ADDON_D_DIR);
            return Ok(false);
        }

        let staged = self.stage_backup_script().map_err(|e| {
            crate::Error::BackupScriptInstall(format!("Failed creating local asset file: {}", e))
        })?;
        let src = path_must_str(staged.path());
        let dst = format!("{}/{}", ADDON_D_DIR, BACKUP_SCRIPT_NAME);

        if !fs.copy_file(src, &dst, true, true).map_err(wrap)? {
            return Err(crate::Error::BackupScriptInstall(
                crate::Error::CopyFailed {
                    src: src.into(),
                    dst,
                }
                .to_string(),
            ));
        }
        log::info!("installed backup script {}", dst);
        Ok(true)
    }

    fn stage_backup_script(&self) -> crate::Result<tempfile::NamedTempFile> {
        let dir = self.ctx.get_staging_dir()?;
        let mut file = tempfile::Builder::new()
            .prefix("rootcompanion")
            .suffix(".sh")
            .tempfile_in(&dir)?;
        file.write_all(BACKUP_SCRIPT.as_bytes())?;
        file.flush()?;
        set_executable(file.path())?;
        Ok(file)
    }

    /// Remove the privileged copy and everything the package left behind
    pub fn uninstall_app(
        &self,
        monitor: &dyn EventMonitor<InstallEvent>,
    ) -> crate::Result<InstallOutcome> {
        self.require_root(monitor)?;
        self.check_cancelled()?;

        let fs = self.rootfs()?;
        let info = match self.package_info() {
            Ok(info) => Some(info),
            Err(e) => {
                log::warn!("no package info, only the fixed location will be removed: {}", e);
                None
            }
        };

        let version = self.ctx.get_platform_version();
        let install_name = self.ctx.get_config()?.package.install_name.clone();
        let source_dir = info.as_ref().map(|it| it.source_dir.as_str()).unwrap_or("");

        let canonical = if version.is_lollipop_or_later() {
            Some(PrivAppTarget::resolve(&version, source_dir, &install_name)?)
        } else {
            info.as_ref()
                .map(|it| PrivAppTarget::resolve(&version, &it.source_dir, &install_name))
                .transpose()?
        };

        let mut deleted = false;
        let mut removed_path = None;
        if let Some(target) = &canonical {
            let path = target.removal_path();
            monitor.on_event(InstallEvent::Deleting(path.into()));
            deleted = fs.delete(path, true)?;
            log::debug!("deleting {} succeeded: {}", path, deleted);
            removed_path = Some(path.to_string());
        }

        if !deleted {
            if let Some(pattern) = canonical.as_ref().and_then(|it| it.wildcard.clone()) {
                if let Some(found) = self.discover_priv_app(&fs, &pattern)? {
                    monitor.on_event(InstallEvent::Deleting(found.clone()));
                    deleted = fs.delete(&found, true)?;
                    log::debug!("deleting {} succeeded: {}", found, deleted);
                    removed_path = Some(found);
                }
            }
        }

        if deleted {
            self.check_cancelled()?;
            if let Some(info) = &info {
                self.delete_leftovers(&fs, info, monitor)?;
            }
            let script = format!("{}/{}", ADDON_D_DIR, BACKUP_SCRIPT_NAME);
            let gone = fs.delete(&script, true)?;
            log::debug!("deleting {} succeeded: {}", script, gone);
        }

        if !deleted && self.has_battery_stats_permission()? {
            let path = removed_path
                .or_else(|| canonical.map(|it| it.path))
                .unwrap_or_else(|| PRIV_APP_DIR.into());
            return Err(crate::Error::DeleteFailed(path));
        }

        Ok(InstallOutcome::RebootRequired)
    }

    /// Find a copy made from an earlier APK name
    fn discover_priv_app(&self, fs: &RootFs, pattern: &str) -> crate::Result<Option<String>> {
        if pattern.is_empty() || pattern.starts_with('.') {
            return Err(crate::Error::PathResolution(format!(
                "refusing to search for {:?}",
                pattern
            )));
        }

        let entries = match fs.list_dir(PRIV_APP_DIR) {
            Ok(v) => v,
            Err(crate::Error::CommandError(code, msg)) => {
                log::warn!("listing {} failed ({}): {}", PRIV_APP_DIR, code, msg.trim());
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let matches = wildcard_matches(pattern, entries);
        if matches.len() > 1 {
            log::warn!("{} matches {:?}, removing the first", pattern, matches);
        }
        Ok(matches
            .into_iter()
            .next()
            .map(|name| format!("{}/{}", PRIV_APP_DIR, name)))
    }

    fn delete_leftovers(
        &self,
        fs: &RootFs,
        info: &PackageInfo,
        monitor: &dyn EventMonitor<InstallEvent>,
    ) -> crate::Result<()> {
        if let Some(app_dir) = device_parent(&info.source_dir) {
            if app_dir.starts_with(DATA_APP_DIR) && app_dir.len() > DATA_APP_DIR.len() {
                monitor.on_event(InstallEvent::Deleting(app_dir.into()));
                let gone = fs.delete(app_dir, false)?;
                log::debug!("deleting {} succeeded: {}", app_dir, gone);
            }
        }

        let namespace = &self.ctx.get_config()?.package.namespace;
        if let Some(data_dir) = &info.data_dir {
            if data_dir.contains(namespace.as_str()) {
                monitor.on_event(InstallEvent::Deleting(data_dir.clone()));
                let gone = fs.delete(data_dir, false)?;
                log::debug!("deleting {} succeeded: {}", data_dir, gone);
            } else {
                log::warn!("not deleting {}, it isn't under {}", data_dir, namespace);
            }
        }
        Ok(())
    }

    /// Ask the device to reboot through the root shell
    pub fn reboot_device(&self, monitor: &dyn EventMonitor<InstallEvent>) -> crate::Result<()> {
        monitor.on_event(InstallEvent::Rebooting);
        let cmd = RootCommand::new(0, "reboot", REBOOT_TIMEOUT);
        let cancel = self.cancel.as_ref().map(|it| it.channel());

        match self.shell.execute_cancelable(&cmd, cancel) {
            Ok(res) if res.ok() => Ok(()),
            Ok(res) => Err(crate::Error::RebootFailed(format!(
                "reboot exited with {}",
                res.exit
            ))),
            Err(crate::Error::Cancelled) => Err(crate::Error::Cancelled),
            Err(e) => Err(crate::Error::RebootFailed(e.to_string())),
        }
    }

    pub fn run(
        &self,
        op: Operation,
        monitor: &dyn EventMonitor<InstallEvent>,
    ) -> crate::Result<InstallOutcome> {
        match op {
            Operation::Install => self.install_as_system_app(monitor),
            Operation::Uninstall => self.uninstall_app(monitor),
            Operation::Reboot => self.reboot_device(monitor).map(|_| InstallOutcome::Done),
            Operation::InstallBackupScript => {
                monitor.on_event(InstallEvent::InstallingBackupScript);
                self.require_root(monitor)?;
                self.install_backup_script().map(|_| InstallOutcome::Done)
            }
        }
    }
}

/// Run `op` on its own thread. Events go to `monitor`, the result arrives on
/// the returned channel. Dropping the canceller cancels the operation.
pub fn spawn_operation(
    manager: InstallManager,
    op: Operation,
    monitor: Box<dyn EventMonitor<InstallEvent>>,
) -> (TaskCanceller, Receiver<crate::Result<InstallOutcome>>) {
    let (canceller, check) = TaskCanceller::new();
    let (tx, rx) = bounded(1);
    let manager = manager.with_cancel(check);

    std::thread::spawn(move || {
        let res = manager.run(op, &monitor);
        if let Err(e) = &res {
            log::debug!("{:?} failed: {}", op, e);
        }
        let _ = tx.send(res);
    });

    (canceller, rx)
}

fn set_executable(path: &Path) -> std::io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}
