use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use jiff::Zoned;
use rilink::{EventKind, Link, LinkConfig, LinkState, RawCodec, RequestError, RequestKind};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "rilink")]
#[command(about = "Command/response link to a radio modem socket")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/rilink/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Modem socket path, or @name for the abstract namespace
    #[arg(long, global = true)]
    socket: Option<String>,

    /// Modem slot
    #[arg(long, global = true)]
    slot: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stay connected and print unsolicited events
    Monitor {
        /// Only print these events (name or id); repeatable
        #[arg(long = "event")]
        events: Vec<EventKind>,

        /// Print the link dump every N seconds (0 = never)
        #[arg(long, default_value = "0")]
        dump_interval: u64,
    },

    /// Send one request and print the response
    Request {
        /// Request kind, by name or id
        kind: RequestKind,

        /// Request payload as hex
        #[arg(long, default_value = "")]
        payload: String,

        /// Seconds to wait for the connection and the response
        #[arg(long, default_value = "10")]
        timeout: u64,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Print the link dump afterwards
        #[arg(long)]
        dump: bool,
    },

    /// List known request and event kinds
    Kinds,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum OutputFormat {
    Text,
    Json,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(cli: &Cli) -> Result<LinkConfig> {
    let mut config = LinkConfig::load(cli.config.as_deref())?;
    if let Some(socket) = &cli.socket {
        config.socket = socket.clone();
    }
    if let Some(slot) = cli.slot {
        config.slot = slot;
    }
    Ok(config)
}

fn timestamp() -> String {
    Zoned::now().strftime("%H:%M:%S").to_string()
}

async fn wait_connected(link: &Link<RawCodec>, timeout: Duration) -> Result<()> {
    let mut states = link.state_changes();
    tokio::time::timeout(timeout, states.wait_for(|state| *state == LinkState::Connected))
        .await
        .map_err(|_| anyhow!("Modem did not accept a connection within {}s", timeout.as_secs()))?
        .map_err(|_| anyhow!("Link stopped before connecting"))?;
    Ok(())
}

async fn monitor(link: Link<RawCodec>, events: Vec<EventKind>, dump_interval: u64) -> Result<()> {
    let kinds = if events.is_empty() {
        EventKind::ALL.to_vec()
    } else {
        events
    };

    let mut printers = Vec::new();
    for kind in kinds {
        let mut subscription = link.subscribe(kind);
        printers.push(tokio::spawn(async move {
            while let Some(body) = subscription.recv().await {
                println!("{} {} {}", timestamp(), kind, hex::encode(&body));
            }
        }));
    }

    let mut states = link.state_changes();
    let mut dumps = tokio::time::interval(Duration::from_secs(dump_interval.max(1)));
    dumps.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                eprintln!("{} link {}", timestamp(), state);
            }
            _ = dumps.tick(), if dump_interval > 0 => {
                println!("{}", serde_json::to_string_pretty(&link.dump())?);
            }
        }
    }

    link.shutdown().await;
    for printer in printers {
        printer.abort();
    }
    Ok(())
}

async fn request(
    link: Link<RawCodec>,
    kind: RequestKind,
    payload: &str,
    timeout: Duration,
    format: OutputFormat,
    dump: bool,
) -> Result<()> {
    let params = hex::decode(payload).context("Payload is not valid hex")?;
    wait_connected(&link, timeout).await?;

    let pending = link.issue(kind, &params);
    let serial = pending.serial();
    let result = tokio::time::timeout(timeout, pending)
        .await
        .unwrap_or(Err(RequestError::TimedOut { kind }));

    match format {
        OutputFormat::Text => match &result {
            Ok(body) => println!("{} #{} ok {}", kind, serial, hex::encode(body)),
            Err(e) => println!("{} #{} failed: {}", kind, serial, e),
        },
        OutputFormat::Json => {
            let json = match &result {
                Ok(body) => serde_json::json!({
                    "kind": kind,
                    "serial": serial,
                    "ok": true,
                    "payload": hex::encode(body),
                }),
                Err(e) => serde_json::json!({
                    "kind": kind,
                    "serial": serial,
                    "ok": false,
                    "error": e.to_string(),
                }),
            };
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }

    if dump {
        println!("{}", serde_json::to_string_pretty(&link.dump())?);
    }
    link.shutdown().await;

    result.map(|_| ()).map_err(Into::into)
}

fn print_kinds() {
    println!("Requests:");
    for kind in RequestKind::ALL {
        println!("  {:>5}  {}", kind.as_i32(), kind);
    }
    println!("Events:");
    for kind in EventKind::ALL {
        println!("  {:>5}  {}", kind.as_i32(), kind);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Kinds) {
        print_kinds();
        return Ok(());
    }

    let config = load_config(&cli)?;
    let link = Link::spawn(config, RawCodec);

    match cli.command {
        Commands::Monitor {
            events,
            dump_interval,
        } => monitor(link, events, dump_interval).await,
        Commands::Request {
            kind,
            payload,
            timeout,
            format,
            dump,
        } => {
            request(
                link,
                kind,
                &payload,
                Duration::from_secs(timeout),
                format,
                dump,
            )
            .await
        }
        Commands::Kinds => Ok(()),
    }
}
