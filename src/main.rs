use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use usbmode::config::{self, AppConfig};
use usbmode::engine::ModeSettingEngine;
use usbmode::events::{self, EventBus, SystemEvent};
use usbmode::gadget::Backend;
use usbmode::host::{ConnmanTethering, IpNetwork, NoAppSync, Services, ShellHost};
use usbmode::modes::{ModeCatalog, ModeDefinition};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// usbmode command line arguments
#[derive(Parser, Debug)]
#[command(name = "usbmode")]
#[command(version, about = "USB gadget mode switching", long_about = None)]
struct CliArgs {
    /// Configuration file (default: $USBMODE_CONFIG or /etc/usbmode/usbmode.toml)
    #[arg(short = 'c', long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Use the diagnostic mode directory
    #[arg(long, global = true)]
    diag: bool,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available modes
    Modes,

    /// Show one mode definition as JSON
    Show { mode: String },

    /// Activate a mode
    Set {
        mode: String,

        /// Stay alive for this many seconds, then report values changed by
        /// somebody else
        #[arg(long, value_name = "SECS")]
        watch: Option<u64>,
    },

    /// Deactivate a mode
    Unset { mode: String },

    /// Clean up after a previously loaded gadget module
    Cleanup {
        /// Kernel module of the mode being left
        #[arg(long)]
        module: Option<String>,

        /// Mode that stays selected
        #[arg(long, default_value = "")]
        current: String,

        /// Mode being left
        #[arg(long)]
        outgoing: Option<String>,
    },

    /// Print the effective configuration as JSON
    Config,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose, args.json_logs);

    let config_path = config::config_path(args.config.as_deref());
    let config = config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    tracing::debug!("Configuration: {}", config_path.display());

    let catalog = ModeCatalog::load_configured(&config, args.diag);

    match args.command {
        Command::Modes => {
            for mode in catalog.iter() {
                println!("{}\t{}", mode.name, mode.kernel_module);
            }
        }
        Command::Show { mode } => {
            let mode = lookup(&catalog, &mode)?;
            println!("{}", serde_json::to_string_pretty(&mode)?);
        }
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Set { mode, watch } => {
            let mode = lookup(&catalog, &mode)?;
            let (mut engine, mut rx) = build_engine(&config);
            match engine.backend() {
                Some(backend) => tracing::debug!("Gadget backend: {:?}", backend.name()),
                None => tracing::warn!("No usable gadget backend"),
            }

            let result = engine.set(&mode);
            log_events(&mut rx);
            result.with_context(|| format!("setting mode {}", mode.name))?;
            tracing::info!("Mode {} set", mode.name);

            if let Some(secs) = watch {
                // Keeps the runtime alive for a pending network retry
                tokio::time::sleep(Duration::from_secs(secs)).await;
                let reports = engine.verify_values();
                log_events(&mut rx);
                println!("{}", serde_json::to_string_pretty(&reports)?);
            }
            engine.shutdown();
        }
        Command::Unset { mode } => {
            let mode = lookup(&catalog, &mode)?;
            let (mut engine, mut rx) = build_engine(&config);
            engine.unset(Some(&mode));
            log_events(&mut rx);
        }
        Command::Cleanup {
            module,
            current,
            outgoing,
        } => {
            let outgoing = outgoing
                .map(|name| lookup(&catalog, &name))
                .transpose()?;
            let (mut engine, mut rx) = build_engine(&config);
            engine.cleanup(module.as_deref(), &current, outgoing.as_ref())?;
            log_events(&mut rx);
        }
    }

    Ok(())
}

fn lookup(catalog: &ModeCatalog, name: &str) -> anyhow::Result<ModeDefinition> {
    catalog.get(name).cloned().ok_or_else(|| {
        anyhow!(
            "Unknown mode '{}' (available: {})",
            name,
            catalog.names().join(", ")
        )
    })
}

/// Build an engine wired to the host collaborators
fn build_engine(config: &AppConfig) -> (ModeSettingEngine, broadcast::Receiver<SystemEvent>) {
    let services = Services {
        host: Arc::new(ShellHost::new()),
        network: Arc::new(IpNetwork::new(config.network.clone())),
        appsync: Arc::new(NoAppSync),
        tethering: Arc::new(ConnmanTethering),
    };
    let events = Arc::new(EventBus::new());
    let rx = events.subscribe();
    let backend = Backend::probe(config);
    (ModeSettingEngine::new(config, backend, services, events), rx)
}

fn log_events(rx: &mut broadcast::Receiver<SystemEvent>) {
    for event in events::drain(rx) {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::info!("event: {}", json),
            Err(e) => tracing::warn!("event {}: {}", event.event_name(), e),
        }
    }
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8, json: bool) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "usbmode=error",
        LogLevel::Warn => "usbmode=warn",
        LogLevel::Info => "usbmode=info",
        LogLevel::Verbose => "usbmode=debug",
        LogLevel::Debug => "usbmode=debug,tokio=debug",
        LogLevel::Trace => "usbmode=trace,tokio=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let result = if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
    };
    if let Err(err) = result {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
