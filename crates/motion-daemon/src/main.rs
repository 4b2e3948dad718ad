//! Motion controller daemon entry point.
//!
//! Wires the fieldbus, the cyclic exchange thread and the mode
//! sequencer into a complete controller: bring the bus to Operational,
//! run the stepper handshake to completion (or until signaled), then
//! walk the bus back down and release the network device.

mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use motion_common::MotionConfig;
use motion_fieldbus::{BusTransport, EthercatBus, SimulatedTransport};
use motion_runtime::{
    init_realtime, run_bus_loop, set_thread_priority, HostHooks, HostTransition, MotionModule,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::signals::SignalHandler;

/// Motion daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "motion-daemon",
    about = "EtherCAT stepper motion controller daemon",
    version,
    long_about = None
)]
struct Args {
    /// Bus cycle time in microseconds (overrides config file).
    #[arg(long, short = 'c', value_name = "MICROS")]
    cycle_time: Option<u64>,

    /// Network interface to open, e.g. "eth0" (overrides config file).
    #[arg(long, short = 'd', value_name = "IFACE")]
    interface: Option<String>,

    /// Absolute target position for the move (overrides config file).
    #[arg(long, short = 'm', value_name = "STEPS")]
    move_to: Option<u32>,

    /// Path to a configuration file (TOML).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run against the simulated transport (no hardware).
    #[arg(long, short = 's')]
    simulated: bool,

    /// Maximum sequencer steps to run (0 = until completion or signal).
    #[arg(long, default_value = "0")]
    max_steps: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting motion daemon");

    let mut config = load_config(&args)?;
    apply_overrides(&mut config, &args);

    info!(
        cycle_time = ?config.cycle_time,
        interface = ?config.bus.interface,
        move_target = config.motion.move_target,
        "Configuration loaded"
    );

    let signal_handler = SignalHandler::install().context("Failed to set up signal handlers")?;

    run_daemon(&config, &signal_handler, args.simulated, args.max_steps)
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "motion_daemon={},motion_runtime={},motion_fieldbus={},motion_common={}",
        level, level, level, level
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `MOTION_CONFIG_PATH` environment variable
/// 3. `/etc/motionctl/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<MotionConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return MotionConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path));
    }

    if let Ok(env_path) = std::env::var("MOTION_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from MOTION_CONFIG_PATH");
            return MotionConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from MOTION_CONFIG_PATH={:?}", env_path)
            });
        }
        warn!(
            path = %env_path,
            "MOTION_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    let system_path = PathBuf::from("/etc/motionctl/config.toml");
    if system_path.exists() {
        info!(?system_path, "Loading config from system path");
        return MotionConfig::from_file(&system_path)
            .with_context(|| format!("Failed to load config from {:?}", system_path));
    }

    let local_path = PathBuf::from("config/default.toml");
    if local_path.exists() {
        info!(?local_path, "Loading config from local path");
        return MotionConfig::from_file(&local_path)
            .with_context(|| format!("Failed to load config from {:?}", local_path));
    }

    info!("No config file found, using built-in defaults");
    Ok(MotionConfig::default())
}

/// Command-line arguments win over anything the config file says.
fn apply_overrides(config: &mut MotionConfig, args: &Args) {
    if let Some(micros) = args.cycle_time {
        config.cycle_time = Duration::from_micros(micros);
    }
    if let Some(interface) = &args.interface {
        config.bus.interface = Some(interface.clone());
    }
    if let Some(target) = args.move_to {
        config.motion.move_target = target;
    }
}

/// Select the fieldbus transport based on configuration and flags.
fn create_transport(config: &MotionConfig, simulated: bool) -> Result<Box<dyn BusTransport>> {
    if simulated || config.bus.interface.is_none() {
        if !simulated {
            warn!("No network interface configured, using simulated transport");
        }
        let slaves = if config.bus.expected_slaves > 0 {
            config.bus.expected_slaves
        } else {
            config.bus.devices.len()
        };
        info!(slaves, "Using simulated transport");
        return Ok(Box::new(SimulatedTransport::new(slaves, &config.bus.devices)));
    }

    #[cfg(all(feature = "soem", target_os = "linux"))]
    {
        info!("Using SOEM hardware transport");
        return Ok(Box::new(motion_fieldbus::SoemTransport::new()));
    }

    #[cfg(not(all(feature = "soem", target_os = "linux")))]
    {
        anyhow::bail!(
            "hardware transport requires the `soem` feature on Linux; rerun with --simulated"
        )
    }
}

/// Main daemon run: bring-up, handshake loop, tear-down.
fn run_daemon(
    config: &MotionConfig,
    signal_handler: &SignalHandler,
    simulated: bool,
    max_steps: u64,
) -> Result<()> {
    let rt_status = init_realtime(&config.realtime)?;
    info!(?rt_status, "Real-time setup done");

    let transport = create_transport(config, simulated)?;
    let bus = EthercatBus::new(config.bus.clone(), transport);
    let mut module = MotionModule::new(Arc::new(Mutex::new(bus)), config);

    module
        .initialize()
        .context("Failed to open and configure the bus")?;
    module
        .on_enter_state(HostTransition::PreOpToSafeOp)
        .context("Failed to reach SAFE_OP")?;
    module
        .on_enter_state(HostTransition::SafeOpToOp)
        .context("Failed to reach OP")?;

    // Fast exchange loop on its own thread, at bus priority.
    let quit = Arc::new(AtomicBool::new(false));
    let bus_thread = {
        let bus = module.bus();
        let quit = Arc::clone(&quit);
        let realtime = config.realtime.clone();
        let period = config.cycle_time;
        std::thread::Builder::new()
            .name("bus-exchange".into())
            .spawn(move || {
                if realtime.enabled {
                    if let Err(e) = set_thread_priority(realtime.bus_priority) {
                        warn!(error = %e, "Failed to raise bus thread priority");
                    }
                }
                run_bus_loop(&bus, &quit, period)
            })
            .context("Failed to spawn bus thread")?
    };

    let run_result = sequencer_loop(
        &mut module,
        signal_handler,
        &quit,
        config.sequencer_period,
        max_steps,
    );

    // Tear-down runs regardless of how the loop ended.
    quit.store(true, Ordering::Relaxed);
    let bus_result: Result<()> = match bus_thread.join() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!(error = %e, "Bus exchange loop failed");
            Err(anyhow::Error::new(e).context("Bus exchange loop failed"))
        }
        Err(_) => {
            error!("Bus thread panicked");
            Err(anyhow::anyhow!("bus thread panicked"))
        }
    };

    if let Err(e) = module.on_enter_state(HostTransition::OpToSafeOp) {
        warn!(error = %e, "Leaving OP failed");
    }
    if let Err(e) = module.on_enter_state(HostTransition::SafeOpToPreOp) {
        warn!(error = %e, "Leaving SAFE_OP failed");
    }
    match module.bus().lock() {
        Ok(mut bus) => {
            if let Err(e) = bus.shut_down() {
                warn!(error = %e, "Bus shutdown failed");
            }
            let stats = bus.stats();
            info!(
                cycles = stats.cycles,
                wkc_errors = stats.wkc_errors,
                "Bus released"
            );
        }
        Err(_) => error!("Bus lock poisoned during shutdown"),
    }

    run_result.and(bus_result)
}

/// Tick the sequencer until the move completes, a signal arrives, the
/// exchange thread stops, or the step budget is exhausted.
fn sequencer_loop(
    module: &mut MotionModule,
    signal_handler: &SignalHandler,
    quit: &AtomicBool,
    period: Duration,
    max_steps: u64,
) -> Result<()> {
    let mut steps: u64 = 0;

    loop {
        if signal_handler.shutdown_requested() {
            info!(
                steps,
                signals = signal_handler.signal_count(),
                "Shutdown requested, stopping sequencer"
            );
            return Ok(());
        }
        // The exchange thread raises this on transport failure; keep
        // ticking past it and the sequencer only ever sees frozen
        // inputs.
        if quit.load(Ordering::Relaxed) {
            warn!(steps, "Bus exchange stopped, stopping sequencer");
            return Ok(());
        }
        if module.is_complete() {
            info!(steps, "Move complete");
            return Ok(());
        }
        if max_steps > 0 && steps >= max_steps {
            info!(steps, "Step budget exhausted, stopping sequencer");
            return Ok(());
        }

        module
            .on_cyclic_tick()
            .context("Sequencer step failed")?;
        steps += 1;

        std::thread::sleep(period);
    }
}
