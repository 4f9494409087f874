use std::fs;
use std::io::{stdout, Write};
use std::path::PathBuf;
use std::process::exit;

use anyhow::Context as AnyhowContext;
use clap::{self, Args};

use rootcompanion::service::ReadProcError;
use rootcompanion::DefaultContext;

use crate::utils::get_client;

#[derive(Args)]
pub struct Stats {
    /// Write the statistics to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl Stats {
    pub fn run(&self) -> anyhow::Result<()> {
        let ctx = DefaultContext::new();
        let mut client = get_client(&ctx)?;
        let data = client.get_statistics()?;

        match &self.output {
            Some(path) => {
                fs::write(path, &data).with_context(|| format!("writing {:?}", path))?;
                println!("Wrote {} bytes to {:?}", data.len(), path);
            }
            None => stdout().write_all(&data)?,
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct ReadProc {
    /// Use the legacy request and print the raw sentinel encoded response
    #[arg(long, action = clap::ArgAction::SetTrue, default_value_t = false)]
    legacy: bool,

    /// File to read
    #[arg()]
    path: String,
}

impl ReadProc {
    pub fn run(&self) -> anyhow::Result<()> {
        let ctx = DefaultContext::new();
        let mut client = get_client(&ctx)?;

        if self.legacy {
            let data = client.read_proc_file_legacy(&self.path)?;
            stdout().write_all(&data)?;
            return Ok(());
        }

        match client.read_proc_file(&self.path)? {
            Ok(data) => stdout().write_all(&data)?,
            Err(e) => {
                eprintln!("{}: {}", self.path, e);
                exit(exit_code(&e));
            }
        }
        Ok(())
    }
}

fn exit_code(err: &ReadProcError) -> i32 {
    match err {
        ReadProcError::RootDenied => 2,
        ReadProcError::ShellFailed { .. } => 3,
        ReadProcError::Io(_) => 1,
    }
}

pub fn permission() -> anyhow::Result<()> {
    let ctx = DefaultContext::new();
    let mut client = get_client(&ctx)?;
    let granted = client.has_battery_stats_permission()?;
    println!("{}", if granted { "granted" } else { "not granted" });
    if !granted {
        exit(1);
    }
    Ok(())
}
