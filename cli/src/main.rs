use std::borrow::Cow;
use std::path::PathBuf;

use anyhow::Context as AnyhowContext;
use clap::{Parser, Subcommand};
use flexi_logger::{FileSpec, LevelFilter, LogSpecification, Logger, LoggerHandle, WriteMode};

use rootcompanion::{Context, DefaultContext};

mod install;
use install::{Install, Reboot, Uninstall};

mod progress;

mod query;
use query::{ReadProc, Stats};

mod serve;
use serve::Serve;

mod status;
mod utils;

const SIMPLE_VERSION_STRING: &'static str =
    include!(concat!(env!("OUT_DIR"), "/simple_version_string"));
const VERSION_STRING: &'static str = include!(concat!(env!("OUT_DIR"), "/version_string"));

#[derive(Parser)]
#[command(name = "rootcompanion")]
#[command(version(SIMPLE_VERSION_STRING))]
#[command(long_version(VERSION_STRING))]
struct Cli {
    /// `-e`, `--log-stderr`: Flag value, when enabled will cause logs to be output to `stderr`
    /// instead of a log file. Disabled by default (logs go to a file by default)
    #[arg(short = 'e', long, help = "Log to stderr instead of a file", action = clap::ArgAction::SetTrue, default_value_t = false)]
    log_stderr: bool,

    /// `-f`, `--log-file`: Path to desired log output file location. Optional, defaults to
    /// `log` in the user's local data directory
    #[arg(short = 'f', long, help = "Send log output to the given file")]
    log_file: Option<PathBuf>,

    /// `-s`, `--log-spec`: Debug options for [flexi_logger](https://docs.rs/flexi_logger/latest/flexi_logger/struct.LogSpecification.html)
    #[arg(short = 's', long, help = "Log spec for flexi_logger")]
    log_spec: Option<String>,

    /// `-l`, `--log-level`: Set the desired log verbosity. Defaults to 0, all values are listed
    /// below:
    ///
    /// | Value | Log Level |
    /// | ----- | --------- |
    /// | **0** | **Warn** |
    /// | 1 | Info |
    /// | 2 | Debug |
    /// | 3 | Trace |
    #[arg(
        short = 'l',
        long,
        help = "Set the log level, 0 = warn, 1 = info, etc",
        long_help = None,
        default_value_t = 0
    )]
    log_level: u8,

    /// The command being called. See [Commands] for the implemented options
    #[command(subcommand)]
    command: Commands,
}

/// The currently implemented commands
#[derive(Subcommand)]
enum Commands {
    /// Display the full version string and exit
    #[command()]
    Version,

    /// Show root, permission and install state
    #[command()]
    Status,

    /// Copy the app into /system/priv-app so it is granted BATTERY_STATS
    #[command()]
    Install(Install),

    /// Remove the privileged copy and the app's leftovers
    #[command()]
    Uninstall(Uninstall),

    /// Reboot the device through the root shell
    #[command()]
    Reboot(Reboot),

    /// Install only the addon.d script that keeps the app across ROM updates
    #[command()]
    InstallBackupScript,

    /// Run the battery stats proxy service
    #[command()]
    Serve(Serve),

    /// Fetch the raw battery statistics from the proxy service
    #[command()]
    Stats(Stats),

    /// Read a file through the proxy service, falling back to root
    #[command()]
    ReadProc(ReadProc),

    /// Ask the proxy service whether BATTERY_STATS is held
    #[command()]
    Permission,
}

impl Cli {
    fn configure_loggers(&self, ctx: &DefaultContext) -> anyhow::Result<LoggerHandle> {
        let log_spec = match &self.log_spec {
            Some(s) => {
                LogSpecification::parse(s).with_context(|| format!("parsing log spec {}", s))?
            }
            None => {
                if self.log_level > 0 {
                    let lvl = if self.log_level == 1 {
                        LevelFilter::Info
                    } else if self.log_level == 2 {
                        LevelFilter::Debug
                    } else {
                        LevelFilter::Trace
                    };
                    LogSpecification::builder()
                        .module("rootcompanion", lvl)
                        .build()
                } else {
                    LogSpecification::env().with_context(|| "getting log spec from env")?
                }
            }
        };

        let mut logger = Logger::with(log_spec);

        if !self.log_stderr {
            let path = match &self.log_file {
                Some(v) => {
                    if v.is_absolute() {
                        Some(Cow::Borrowed(v))
                    } else {
                        let full_path = std::env::current_dir()?.join(v);
                        Some(Cow::Owned(full_path))
                    }
                }
                None => ctx
                    .get_user_local_dir()
                    .map(|it| Cow::Owned(it.join("log")))
                    .ok(),
            };

            if let Some(p) = &path {
                logger = logger
                    .log_to_file(
                        FileSpec::try_from(p.as_ref()).with_context(|| "creating filespec")?,
                    )
                    .append()
                    .write_mode(WriteMode::BufferAndFlush);
            }
        }

        Ok(logger.start().with_context(|| "starting logger")?)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = &cli.command {
        println!("{}", VERSION_STRING);
        return Ok(());
    }

    let ctx = DefaultContext::default();

    let log_handle = cli.configure_loggers(&ctx)?;

    let res = match cli.command {
        Commands::Status => status::run(),
        Commands::Install(c) => c.run(),
        Commands::Uninstall(c) => c.run(),
        Commands::Reboot(c) => c.run(),
        Commands::InstallBackupScript => install::install_backup_script(),
        Commands::Serve(c) => c.run(),
        Commands::Stats(c) => c.run(),
        Commands::ReadProc(c) => c.run(),
        Commands::Permission => query::permission(),

        Commands::Version => panic!("unreachable"),
    };

    log_handle.flush();
    res
}
