use std::process::ExitCode;

use egress_sync::config::SyncConfig;
use egress_sync::logging::init_tracing;
use egress_sync::runtime::SyncRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    DryRun,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--dry-run" | "-n" => mode = CliMode::DryRun,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: egress-sync [--dry-run]");
        println!("  --dry-run   List files that would be transferred and exit");
        return Ok(ExitCode::SUCCESS);
    }

    init_tracing();
    let config = SyncConfig::from_env()?;
    let runtime = SyncRuntime::bootstrap(&config)?;
    match mode {
        CliMode::DryRun => runtime.dry_run().await,
        _ => runtime.run_once().await,
    }
}
