// Kbswitch CLI
// Switches the keyboard layout when configured USB keyboards come and go

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use kbswitch_core::coordinator::SignalSource;
use kbswitch_core::device::DeviceEventSource;
use kbswitch_core::{
    Config, DeviceMonitor, DeviceQuery, EvaluationOutcome, FirstAvailable, LayoutActivator,
    LayoutId, LogSink, LogindSignals, Shutdown, SuspendDetector, SwitchingCoordinator,
    ThreadScheduler, UdevEnumerator, UdevEventSource, XkbBackend,
};

/// Device-driven keyboard layout switcher
#[derive(Parser, Debug)]
#[command(name = "kbswitch")]
#[command(version)]
#[command(about = "Switch keyboard layout when USB keyboards are attached or removed", long_about = None)]
struct Args {
    /// TOML configuration file (defaults to ~/.config/kbswitch/config.toml)
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Validate config and exit
    #[arg(long)]
    check_config: bool,

    /// List attached USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Apply the layout for the current devices once and exit
    #[arg(long)]
    once: bool,
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .init();
}

/// Explicit path, or the default location if one can be determined
fn config_path(args: &Args) -> Option<PathBuf> {
    args.config.clone().or_else(Config::default_path)
}

/// Load the configuration. A missing default file means built-in defaults;
/// a missing explicit file is an error.
fn load_config(path: Option<&Path>, explicit: bool) -> Result<Config> {
    match path {
        Some(path) if explicit || path.exists() => Config::from_toml_path(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        Some(path) => {
            log::info!("No config at {}, using defaults", path.display());
            Ok(Config::default())
        }
        None => {
            log::info!("No config directory, using defaults");
            Ok(Config::default())
        }
    }
}

fn list_devices(config: &Config) -> Result<()> {
    let query = DeviceQuery::new(Arc::new(UdevEnumerator::new())).with_policy(config.query);
    let devices = query.list_devices().context("Error finding USB devices")?;

    println!("Found {} USB device(s):", devices.len());
    for (path, fingerprint) in &devices {
        let mapped = fingerprint.and_then(|fp| {
            config
                .devices
                .iter()
                .find(|mapping| mapping.fingerprint == fp)
        });
        match mapped {
            Some(mapping) => println!("  {} -> {} ({})", path, mapping.layout, mapping.name),
            None => println!("  {}", path),
        }
    }
    Ok(())
}

fn print_summary(config: &Config) {
    println!("Configuration is valid");
    println!(
        "  default layout: {} ({})",
        config.default_layout,
        config.catalog.display_name(config.default_layout)
    );
    for mapping in &config.devices {
        println!(
            "  {} [{}] -> {} ({})",
            mapping.name,
            mapping.fingerprint,
            mapping.layout,
            config.catalog.display_name(mapping.layout)
        );
    }
    for layout in unnamed_layouts(config) {
        println!("  warning: no XKB names for {}, it can never be activated", layout);
    }
}

/// Default and mapped layouts with no XKB layout/variant entry
fn unnamed_layouts(config: &Config) -> Vec<LayoutId> {
    let mut missing: Vec<LayoutId> = Vec::new();
    let wanted = std::iter::once(config.default_layout)
        .chain(config.devices.iter().map(|mapping| mapping.layout));
    for layout in wanted {
        if !config.xkb_layouts.iter().any(|xkb| xkb.id == layout) && !missing.contains(&layout) {
            missing.push(layout);
        }
    }
    missing
}

fn build(config: &Config, stop: &Arc<Shutdown>) -> (Arc<SwitchingCoordinator>, Arc<XkbBackend>) {
    let query = DeviceQuery::new(Arc::new(UdevEnumerator::new()))
        .with_policy(config.query)
        .with_shutdown(Arc::clone(stop));
    let source: Arc<dyn DeviceEventSource> = Arc::new(UdevEventSource::new());
    let monitor = Arc::new(DeviceMonitor::with_settings(
        query,
        Some(source),
        config.devices.clone(),
        config.monitor,
    ));

    let backend = Arc::new(XkbBackend::new(config.xkb_layouts.clone()));
    let activator = LayoutActivator::new(Box::new(Arc::clone(&backend)));

    let coordinator = Arc::new(SwitchingCoordinator::new(
        config.to_switch_config(),
        monitor,
        activator,
        Arc::new(LogSink),
        Arc::new(ThreadScheduler::new()),
    ));
    (coordinator, backend)
}

fn run(args: &Args, path: Option<PathBuf>, config: Config) -> Result<()> {
    let stop = Arc::new(Shutdown::new());
    let (coordinator, backend) = build(&config, &stop);

    if args.once {
        return match coordinator.initialize() {
            Some(EvaluationOutcome::Failed(e)) => bail!("Could not apply layout: {}", e),
            _ => Ok(()),
        };
    }

    let mut signals =
        Signals::new([SIGINT, SIGTERM, SIGHUP]).context("Failed to register signal handlers")?;

    // Clock-jump detection only covers resume; used when logind is unreachable
    let system: Arc<dyn SignalSource> = Arc::new(FirstAvailable::new(vec![
        Arc::new(LogindSignals::new()) as Arc<dyn SignalSource>,
        Arc::new(SuspendDetector::default()),
    ]));
    let mode = coordinator.start(&[system]);
    log::info!("kbswitch running, device monitor in {} mode", mode);

    for signal in signals.forever() {
        match signal {
            SIGHUP => match load_config(path.as_deref(), args.config.is_some()) {
                Ok(reloaded) => {
                    if reloaded.query != config.query || reloaded.monitor != config.monitor {
                        log::warn!("[monitor] changes take effect after a restart");
                    }
                    backend.set_layouts(reloaded.xkb_layouts.clone());
                    coordinator.reload(reloaded.to_switch_config());
                }
                Err(e) => log::error!("{:#}; keeping current configuration", e),
            },
            SIGINT | SIGTERM => {
                log::info!("Received signal {}, shutting down", signal);
                break;
            }
            _ => {}
        }
    }

    stop.trigger();
    coordinator.shutdown();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let path = config_path(&args);
    let config = load_config(path.as_deref(), args.config.is_some())?;

    if args.list_devices {
        return list_devices(&config);
    }

    if args.check_config {
        print_summary(&config);
        return Ok(());
    }

    run(&args, path, config)
}
