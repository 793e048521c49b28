use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pulsewatch::MonitorConfig;

#[derive(Parser)]
#[command(
    name = "pulsewatch",
    about = "Streaming anomaly detection and alerting for time-series metrics",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (falls back to $PULSEWATCH_CONFIG, then /etc/pulsewatch/pulsewatch.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (detection engine + API server)
    Serve {
        /// Bind address, overrides [server].bind
        #[arg(long)]
        bind: Option<String>,
    },

    /// Replay a JSON Lines sample file through the detector
    Replay {
        /// Input file, one sample object per line
        #[arg(long)]
        input: PathBuf,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = MonitorConfig::resolve(cli.config.as_deref())?;
    pulsewatch::logging::init(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting PulseWatch daemon");
            pulsewatch::serve(config).await?;
        }
        Commands::Replay { input, json } => {
            tracing::info!(input = %input.display(), "Replaying samples");
            let report = pulsewatch::replay::run_file(config, &input).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\n=== PulseWatch Replay ===");
                println!("Samples:    {}", report.samples);
                println!("Accepted:   {}", report.accepted);
                println!("Rejected:   {}", report.rejected);
                println!("Anomalies:  {}", report.anomalies);
                println!("Deliveries: {}", report.deliveries);
                if report.alerts.is_empty() {
                    println!("\nNo alerts raised.");
                } else {
                    println!();
                    println!(
                        "{:<24} | {:<5} | {:<8} | {:<12} | {:>8} | Opened",
                        "Slot", "Kind", "Severity", "State", "Z"
                    );
                    println!("{:-<24}-|-{:-<5}-|-{:-<8}-|-{:-<12}-|-{:->8}-|-{:-<25}", "", "", "", "", "", "");
                    for alert in &report.alerts {
                        println!(
                            "{:<24} | {:<5} | {:<8} | {:<12} | {:>8.2} | {}",
                            alert.key().to_string(),
                            alert.kind().to_string(),
                            alert.severity.to_string(),
                            alert.state.to_string(),
                            alert.anomaly.z_score,
                            alert.opened_at.to_rfc3339()
                        );
                    }
                }
                println!("=========================\n");
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
