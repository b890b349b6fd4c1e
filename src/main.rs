use clap::Parser;

/// Entry point of the container metrics agent.
///
/// Configuration comes from command line flags with environment fallbacks; see
/// `--help`.
///
/// # Examples
///
/// ```bash
/// RUST_LOG=info container-metrics --report 10 --host influx:8086 --database metrics
/// ```
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let config = container_metrics::config::Config::parse();
    container_metrics::run(config).await?;
    Ok(())
}
