use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keypool::{config, Client, Target};

#[derive(Parser)]
#[command(name = "keypool")]
#[command(version, about = "Latency-ranked TLS endpoint selection with failover", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (environment variables are used when omitted)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Disable TLS certificate verification
    #[arg(long, global = true)]
    insecure: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a hostname through the configured resolvers
    Resolve {
        /// Hostname to look up
        host: String,
    },

    /// Discover the servers behind host:port, dial the best one and probe
    Dial {
        /// Remote address (host:port)
        hostport: String,

        /// Name to verify server certificates against (defaults to host)
        #[arg(long)]
        server_name: Option<String>,

        /// Probe rounds to run after the first dial
        #[arg(long, default_value = "3")]
        rounds: u32,

        /// Pause between rounds in milliseconds
        #[arg(long, default_value = "500")]
        interval_ms: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let mut config = config::load_config(cli.config.as_deref())?;
    if cli.insecure {
        config.tls.insecure_skip_verify = true;
    }

    let client = Arc::new(Client::from_config(&config).context("Failed to build client")?);

    match cli.command {
        Commands::Resolve { host } => {
            let ips = client.lookup_ips(&host).await?;
            for ip in ips {
                println!("{}", ip);
            }
        }
        Commands::Dial {
            hostport,
            server_name,
            rounds,
            interval_ms,
        } => {
            let remote = match server_name {
                Some(name) => {
                    let (host, port) = keypool::client::split_host_port(&hostport)?;
                    client.lookup_server_with_name(&name, &host, port).await?
                }
                None => client.lookup_server(&hostport).await?,
            };
            cmd_dial(&client, &remote, rounds, Duration::from_millis(interval_ms)).await?;
        }
    }

    Ok(())
}

async fn cmd_dial(client: &Arc<Client>, remote: &Target, rounds: u32, interval: Duration) -> Result<()> {
    let conn = remote
        .dial(client)
        .await
        .context("No remote accepted a connection")?;
    println!("connected to {}", conn.peer());
    conn.release().await;

    for round in 1..=rounds {
        tokio::time::sleep(interval).await;

        match remote.dial(client).await {
            Ok(conn) => {
                let probe = conn.probe().await;
                println!(
                    "round {}: {} {}",
                    round,
                    conn.peer(),
                    if probe.is_ok() { "ok" } else { "probe failed" }
                );
                conn.release().await;
            }
            Err(e) => println!("round {}: {}", round, e),
        }

        if let Some(group) = remote.as_group() {
            print_ranking(group).await;
        }
    }

    Ok(())
}

async fn print_ranking(group: &keypool::Group) {
    for (rank, member) in group.stats().await.iter().enumerate() {
        let latency = member
            .latency
            .map(|d| format!("{:.3}ms", d.as_secs_f64() * 1000.0))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:>2}. {:<40} latency={:<10} errors={}",
            rank + 1,
            member.label,
            latency,
            member.error_count
        );
    }
}
