use std::sync::Arc;

use anyhow::Context as AnyhowContext;
use promptly::prompt_default;

use rootcompanion::service::ProxyClient;
use rootcompanion::{Context, DefaultContext, InstallManager, ShellPackageManager, SuShell};

/// Build an [InstallManager] backed by the real root shell and package
/// manager
pub fn get_install_manager(ctx: &DefaultContext) -> anyhow::Result<InstallManager> {
    let shell = SuShell::from_ctx(ctx).with_context(|| "setting up the root shell")?;
    let pm = ShellPackageManager::from_ctx(ctx);
    Ok(InstallManager::new(
        Arc::new(ctx.clone()),
        Arc::new(shell),
        Arc::new(pm),
    ))
}

pub fn get_client(ctx: &dyn Context) -> anyhow::Result<ProxyClient> {
    let socket = ctx.get_socket_path()?;
    ProxyClient::from_ctx(ctx)
        .with_context(|| format!("connecting to the proxy service at {:?}", socket))
}

/// Ask before doing something the user can't take back, `yes` skips the
/// question
pub fn confirm(question: &str, yes: bool) -> bool {
    if yes {
        return true;
    }
    match prompt_default(question, false) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("prompt failed: {}", e);
            false
        }
    }
}
