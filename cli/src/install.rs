use std::time::Duration;

use anyhow::bail;
use clap::{self, Args};
use crossbeam::channel::{select, tick, Receiver};

use rootcompanion::install::{spawn_operation, InstallEvent, InstallOutcome, Operation};
use rootcompanion::tasks::ChannelEventMonitor;
use rootcompanion::{DefaultContext, InstallManager};

use crate::progress::StatusLine;
use crate::utils::{confirm, get_install_manager};

#[derive(Args)]
pub struct Install {
    /// Reboot without asking once the copy is in place
    #[arg(short, long, action = clap::ArgAction::SetTrue, default_value_t = false)]
    yes: bool,

    /// Don't offer to reboot
    #[arg(long, action = clap::ArgAction::SetTrue, default_value_t = false)]
    no_reboot: bool,

    /// Install even if the permission is already granted
    #[arg(long, action = clap::ArgAction::SetTrue, default_value_t = false)]
    force: bool,
}

impl Install {
    pub fn run(&self) -> anyhow::Result<()> {
        let ctx = DefaultContext::new();
        let manager = get_install_manager(&ctx)?;

        if !self.force && manager.has_battery_stats_permission().unwrap_or(false) {
            println!("Already installed as a system app, the permission is granted");
            return Ok(());
        }

        let outcome = run_with_status(&manager, Operation::Install, "Installing as a system app")?;
        println!("Installed, the permission is granted after a reboot");
        maybe_reboot(&manager, outcome, self.yes, self.no_reboot)
    }
}

#[derive(Args)]
pub struct Uninstall {
    /// Reboot without asking once the copy is removed
    #[arg(short, long, action = clap::ArgAction::SetTrue, default_value_t = false)]
    yes: bool,

    /// Don't offer to reboot
    #[arg(long, action = clap::ArgAction::SetTrue, default_value_t = false)]
    no_reboot: bool,
}

impl Uninstall {
    pub fn run(&self) -> anyhow::Result<()> {
        let ctx = DefaultContext::new();
        let manager = get_install_manager(&ctx)?;
        let outcome = run_with_status(&manager, Operation::Uninstall, "Removing the system app")?;
        println!("Removed, the app is a regular app again after a reboot");
        maybe_reboot(&manager, outcome, self.yes, self.no_reboot)
    }
}

#[derive(Args)]
pub struct Reboot {
    /// Don't ask for confirmation
    #[arg(short, long, action = clap::ArgAction::SetTrue, default_value_t = false)]
    yes: bool,
}

impl Reboot {
    pub fn run(&self) -> anyhow::Result<()> {
        if !confirm("Reboot the device now?", self.yes) {
            return Ok(());
        }
        let ctx = DefaultContext::new();
        let manager = get_install_manager(&ctx)?;
        run_with_status(&manager, Operation::Reboot, "Rebooting")?;
        Ok(())
    }
}

pub fn install_backup_script() -> anyhow::Result<()> {
    let ctx = DefaultContext::new();
    let manager = get_install_manager(&ctx)?;
    run_with_status(
        &manager,
        Operation::InstallBackupScript,
        "Installing the addon.d backup script",
    )?;
    Ok(())
}

fn maybe_reboot(
    manager: &InstallManager,
    outcome: InstallOutcome,
    yes: bool,
    no_reboot: bool,
) -> anyhow::Result<()> {
    if outcome != InstallOutcome::RebootRequired || no_reboot {
        return Ok(());
    }
    if !confirm("Reboot now?", yes) {
        println!("Reboot the device to finish");
        return Ok(());
    }
    run_with_status(manager, Operation::Reboot, "Rebooting")?;
    Ok(())
}

/// Run `op` in the background, showing a spinner with the latest event until
/// it finishes
fn run_with_status(
    manager: &InstallManager,
    op: Operation,
    message: &str,
) -> anyhow::Result<InstallOutcome> {
    let (monitor, events) = ChannelEventMonitor::create();
    let (_canceller, result) = spawn_operation(manager.clone(), op, Box::new(monitor));

    let mut status = StatusLine::new(message);
    let res = wait_for_result(&mut status, &events, &result);
    status.finish(res.is_ok());
    res
}

fn wait_for_result(
    status: &mut StatusLine,
    events: &Receiver<InstallEvent>,
    result: &Receiver<rootcompanion::Result<InstallOutcome>>,
) -> anyhow::Result<InstallOutcome> {
    let ticker = tick(Duration::from_millis(100));
    loop {
        select! {
            recv(events) -> evt => {
                if let Ok(evt) = evt {
                    log::info!("{:?}", evt);
                    status.set_message(describe_event(&evt));
                }
            },
            recv(result) -> res => {
                return match res {
                    Ok(Ok(outcome)) => Ok(outcome),
                    Ok(Err(e)) => bail!("{}", e),
                    Err(_) => bail!("the worker exited without a result"),
                };
            },
            recv(ticker) -> _ => status.tick(),
        }
    }
}

fn describe_event(evt: &InstallEvent) -> String {
    match evt {
        InstallEvent::CheckingRoot => String::from("Waiting for root access"),
        InstallEvent::Copying { src, dst } => format!("Copying {} to {}", src, dst),
        InstallEvent::InstallingBackupScript => String::from("Installing the addon.d backup script"),
        InstallEvent::Deleting(path) => format!("Deleting {}", path),
        InstallEvent::Rebooting => String::from("Rebooting"),
    }
}
