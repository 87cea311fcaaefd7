//! Binary entry point for the adeval CLI.

mod cli;

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use adeval::config::ConfigError;
use adeval::{
    AdeConfig, AzureCli, Cancellation, ProcessCommandRunner, ProvisionRequest, ProvisioningMode,
    ResourceNameGenerator, RunError, RunReport, RunRequest, ValidationRun, VolumeTarget,
};
use cli::Cli;

#[derive(Debug, Error)]
enum CliError {
    #[error("usage error: {0}")]
    Usage(String),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Run(#[from] RunError),
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = i32::from(err.use_stderr());
            err.print().ok();
            process::exit(code);
        }
    };

    let exit_code = match run(cli).await {
        Ok(report) => {
            write_report(io::stdout(), &report);
            0
        }
        Err(err) => {
            write_error(io::stderr(), &err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<RunReport, CliError> {
    let target: VolumeTarget = cli
        .volume_type
        .parse()
        .map_err(|err: adeval::mode::ParseVolumeTargetError| CliError::Usage(err.to_string()))?;
    let names = match cli.prefix {
        Some(prefix) => ResourceNameGenerator::with_prefix(prefix)
            .map_err(|err| CliError::Usage(err.to_string()))?,
        None => ResourceNameGenerator::random(),
    };

    let config = AdeConfig::load_without_cli_args()?;
    let settings = config.provision_settings().map_err(|err| match err {
        ConfigError::PartialOverride { .. } => CliError::Usage(err.to_string()),
        other => CliError::Config(other),
    })?;

    let (trigger, cancellation) = Cancellation::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; stopping at the next wait and tearing down");
            trigger.cancel();
        }
    });

    let request = RunRequest {
        provision: ProvisionRequest {
            image: cli.image,
            location: cli.location,
            target,
            mode: ProvisioningMode::from_flags(cli.singlepass, cli.encrypt_format_all),
            rhui: cli.rhui,
        },
        auto_delete: !cli.keep_resources,
    };
    let validation = ValidationRun::new(
        AzureCli::new(config.az_bin.clone(), ProcessCommandRunner),
        names,
        settings,
    )
    .with_cancellation(cancellation);

    let mut stdout = io::stdout();
    Ok(validation.execute(&request, &mut stdout).await?)
}

fn write_report(mut target: impl Write, report: &RunReport) {
    let states = report
        .states
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ");
    writeln!(target, "prefix: {}", report.prefix).ok();
    writeln!(target, "status: {}", report.status).ok();
    writeln!(target, "states: {states}").ok();
    if let Some(pre_reboot) = report.pre_reboot {
        writeln!(target, "pre-reboot: {}s", pre_reboot.as_secs()).ok();
    }
    writeln!(target, "restarts: {}", report.restarts).ok();
    writeln!(target, "total: {}s", report.total.as_secs()).ok();
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
