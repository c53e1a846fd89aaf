mod workload;

use clap::Parser;

use workload::{BenchArgs, BenchError};

#[derive(Parser)]
#[command(name = "ingest-bench", about = "Drive the in-memory embedding ingest engine")]
struct Cli {
    #[command(flatten)]
    args: BenchArgs,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli.args).await {
        tracing::error!(error = %e, "ingest-bench failed");
        std::process::exit(1);
    }
}

async fn run(args: BenchArgs) -> Result<(), BenchError> {
    let config = workload::load_config(&args.config)?;
    tracing::info!(
        config = %args.config,
        topics = config.topics.len(),
        max_batch_size = config.delivery.max_batch_size,
        "configuration loaded"
    );

    let report = workload::run(&config, &args).await?;
    tracing::info!(
        records = report.records,
        delivered = report.delivered,
        invocations = report.invocations,
        failures = report.failures,
        payload_bytes = report.payload_bytes,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "workload complete"
    );
    Ok(())
}
