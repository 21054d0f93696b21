use todosyncd::daemon::{DaemonConfig, DaemonRuntime};
use todosyncd::sync::engine::PassOutcome;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Once,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--once" => mode = CliMode::Once,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("todosyncd=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: todosyncd [--once]");
        println!("  --once   Run a single sync pass, print its report as JSON and exit");
        return Ok(());
    }

    init_tracing();
    let config = DaemonConfig::from_env()?;
    let daemon = DaemonRuntime::bootstrap(config).await?;
    match mode {
        CliMode::Once => {
            match daemon.run_once().await? {
                PassOutcome::Completed(report) => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                PassOutcome::Rejected => tracing::info!("another sync pass is running"),
            }
            Ok(())
        }
        _ => daemon.run().await,
    }
}
