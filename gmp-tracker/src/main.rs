use std::path::PathBuf;
use std::process::ExitCode;

use clap::{arg, command, Parser, ValueEnum};
use error_stack::ResultExt;
use gmp_tracker::commands::{status, watch, SubCommand};
use gmp_tracker::config::Config;
use gmp_tracker::report::LoggableError;
use gmp_tracker::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use valuable::Valuable;

#[derive(Debug, Parser, Valuable)]
#[command(version)]
struct Args {
    /// Set the paths for config file lookup. Can be defined multiple times (configs get merged)
    #[arg(short, long, default_values_os_t = vec![PathBuf::from("~/.gmp-tracker/config.toml"), PathBuf::from("config.toml")])]
    pub config: Vec<PathBuf>,

    /// Set the output style of the logs
    #[arg(short, long, value_enum, default_value_t = Output::Text)]
    pub output: Output,

    #[clap(subcommand)]
    pub cmd: SubCommand,
}

#[derive(Debug, Clone, Parser, ValueEnum, Valuable)]
enum Output {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Args = Args::parse();
    set_up_logger(&args.output);

    let cfg = init_config(&args.config);
    info!(args = args.as_value(), "starting");

    let result = match args.cmd {
        SubCommand::Status(args) => status::run(cfg, args).await,
        SubCommand::Watch(args) => watch::run(cfg, args).await.inspect(|_| {
            info!("shutting down");
        }),
    };

    match result {
        Ok(response) => {
            if let Some(resp) = response {
                println!("{resp}");
            }
            ExitCode::SUCCESS
        }
        Err(report) => {
            error!(err = LoggableError::from(&report).as_value(), "{report:#}");

            // print detailed error report as the last output if in text mode
            if matches!(args.output, Output::Text) {
                eprintln!("{report:?}");
            }

            ExitCode::FAILURE
        }
    }
}

fn set_up_logger(output: &Output) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match output {
        Output::Json => {
            tracing_subscriber::fmt()
                .json()
                .flatten_event(true)
                .with_env_filter(filter)
                .init();
        }
        Output::Text => {
            tracing_subscriber::fmt()
                .compact()
                .with_env_filter(filter)
                .init();
        }
    };
}

fn init_config(config_paths: &[PathBuf]) -> Config {
    Config::load(config_paths)
        .change_context(Error::LoadConfig)
        .inspect_err(|report| error!(err = LoggableError::from(report).as_value(), "{report}"))
        .unwrap_or_default()
}
