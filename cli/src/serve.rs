use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as AnyhowContext;
use clap::{self, Args};

use rootcompanion::service::server::PeerPolicy;
use rootcompanion::service::{BatteryStatsService, ProxyServer};
use rootcompanion::{Context, DefaultContext, ShellPackageManager, SuShell};

#[derive(Args)]
pub struct Serve {
    /// Listen on this socket instead of the configured one
    #[arg(short = 'S', long)]
    socket: Option<PathBuf>,

    /// Extra uid allowed to use the service, may be repeated
    #[arg(short = 'u', long = "allow-uid")]
    allow_uids: Vec<u32>,
}

impl Serve {
    pub fn run(&self) -> anyhow::Result<()> {
        let ctx = DefaultContext::new();
        let shell = Arc::new(SuShell::from_ctx(&ctx)?);
        let pm = ShellPackageManager::from_ctx(&ctx);
        let service = Arc::new(BatteryStatsService::from_ctx(&ctx, shell, &pm)?);

        let socket = match &self.socket {
            Some(path) => path.clone(),
            None => ctx.get_socket_path()?,
        };
        let mut allowed = ctx.get_config()?.service.allowed_uids.clone();
        allowed.extend(self.allow_uids.iter().copied());

        let server = ProxyServer::bind(&socket, service, PeerPolicy::for_current_process(allowed))
            .with_context(|| format!("starting the proxy service on {:?}", socket))?;

        println!("Serving on {:?}", server.path());
        server.serve()?;
        Ok(())
    }
}
