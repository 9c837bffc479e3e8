//! droidcast entry point.
//!
//! ```text
//! droidcast devices [--json]                  List attached devices
//! droidcast info [--json]                     Show bridge connection state
//! droidcast tcpip                             Switch the USB device to network mode
//! droidcast connect <ip> [--port N]           Connect a network device
//! droidcast disconnect [host[:port]]          Disconnect one or all network devices
//! droidcast mirror [-d ID] [-o FILE]          Mirror video bytes until Ctrl-C
//! droidcast --config <path>                   Load a custom config TOML
//! droidcast --gen-config                      Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use droidcast::config::AppConfig;
use droidcast::service::MirrorService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "droidcast", about = "Mirror an Android device's screen over adb")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "droidcast.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List attached devices.
    Devices {
        #[arg(long)]
        json: bool,
    },
    /// Show the active network endpoint and device listing.
    Info {
        #[arg(long)]
        json: bool,
    },
    /// Switch the first USB device to network mode and connect to it.
    Tcpip,
    /// Connect to a device over the network.
    Connect {
        ip: String,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Disconnect a network device, or all of them.
    Disconnect { endpoint: Option<String> },
    /// Mirror a device's video stream.
    Mirror {
        /// Device id; defaults to the first connectable device.
        #[arg(short, long)]
        device: Option<String>,
        /// Output file; stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Overrides `session.bit_rate`.
        #[arg(short, long)]
        bit_rate: Option<String>,
    },
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        println!("{}", AppConfig::default().to_toml()?);
        return Ok(());
    }

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let mut config = AppConfig::load(&cli.config);
    if let Cmd::Mirror {
        bit_rate: Some(rate),
        ..
    } = &command
    {
        config.session.bit_rate = rate.clone();
    }

    // Init tracing on stderr; stdout may carry video.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("droidcast v{}", env!("CARGO_PKG_VERSION"));
    info!("adb: {}", config.bridge.adb_path.display());

    let service = MirrorService::new(config);

    match command {
        Cmd::Devices { json } => {
            let devices = service.devices().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if devices.is_empty() {
                println!("no devices attached");
            } else {
                for d in devices {
                    println!("{}\t{}", d.id, d.state);
                }
            }
        }
        Cmd::Info { json } => {
            let info = service.connection_info().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                match &info.active_endpoint {
                    Some(endpoint) => println!("network endpoint: {endpoint}"),
                    None => println!("network endpoint: none"),
                }
                for d in &info.devices {
                    let kind = if d.is_network { "network" } else { "usb" };
                    println!("{}\t{}\t{kind}", d.id, d.state);
                }
            }
        }
        Cmd::Tcpip => {
            let ip = service.enable_network().await?;
            println!("connected to {ip}");
        }
        Cmd::Connect { ip, port } => {
            let id = service.connect(&ip, port).await?;
            println!("connected to {id}");
        }
        Cmd::Disconnect { endpoint } => {
            service.disconnect(endpoint.as_deref()).await?;
            println!("disconnected");
        }
        Cmd::Mirror { device, output, .. } => {
            let stop = CancellationToken::new();

            // Ctrl-C handler.
            let stop_on_signal = stop.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Ctrl-C received; shutting down");
                stop_on_signal.cancel();
            });

            let (end, stats) = service.mirror(device.as_deref(), output, stop).await?;
            info!(
                reason = ?end,
                bytes = stats.delivered_bytes,
                dropped = stats.dropped,
                "mirroring finished"
            );
        }
    }

    Ok(())
}
