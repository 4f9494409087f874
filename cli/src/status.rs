use rootcompanion::privapp::ADDON_D_DIR;
use rootcompanion::{Context, DefaultContext};

use crate::utils::get_install_manager;

pub fn run() -> anyhow::Result<()> {
    let ctx = DefaultContext::new();
    let manager = get_install_manager(&ctx)?;
    let status = manager.status()?;
    let cfg = ctx.get_config()?;

    println!("package:      {}", cfg.package.name);
    println!("platform:     {}", ctx.get_platform_version());
    println!("root:         {}", yes_no(status.root_available));
    println!("permission:   {}", if status.has_permission { "granted" } else { "not granted" });
    println!(
        "apk:          {}",
        status.source_dir.as_deref().unwrap_or("unknown")
    );
    println!(
        "system copy:  {}",
        status.target.as_deref().unwrap_or("unknown")
    );
    println!("{}: {}", ADDON_D_DIR, yes_no(status.addon_d));
    Ok(())
}

fn yes_no(v: bool) -> &'static str {
    if v {
        "yes"
    } else {
        "no"
    }
}
