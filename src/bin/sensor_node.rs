use clap::{App, Arg};
use colored::*;
use sensor_node::sim::fault_injection::{FaultInjectionConfig, FaultInjector};
use sensor_node::sim::{self, store::TelemetryStore};
use sensor_node::{Clock, NodeConfig, NodeError, SensorNode, SystemClock};
use std::ops::ControlFlow;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_SEED: &str = "305419896";
// Loop ticks per environment drift step
const DRIFT_DIVIDER: u64 = 10;

#[derive(Debug, Clone, Copy)]
struct RunOptions {
    faults: bool,
    seed: u64,
    quiet_display: bool,
    max_ticks: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = App::new("sensor-node")
        .version("0.1.0")
        .about("📟 Sensor/actuator node firmware running against a simulated bench")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("device")
                .short("d")
                .long("device")
                .value_name("DEVICE_ID")
                .help("Override the device identifier")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("api-key")
                .long("api-key")
                .value_name("KEY")
                .help("API key sent to the storage service")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("faults")
                .short("f")
                .long("faults")
                .help("Inject random link, sensor and API faults plus operator commands"),
        )
        .arg(
            Arg::with_name("seed")
                .long("seed")
                .value_name("SEED")
                .help("Seed for the fault injector")
                .takes_value(true)
                .default_value(DEFAULT_SEED)
                .validator(|v| match v.parse::<u64>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Seed must be a valid number".into()),
                }),
        )
        .arg(
            Arg::with_name("ticks")
                .short("n")
                .long("ticks")
                .value_name("COUNT")
                .help("Stop after this many loop ticks")
                .takes_value(true)
                .validator(|v| match v.parse::<u64>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Tick count must be a valid number".into()),
                }),
        )
        .arg(
            Arg::with_name("quiet-display")
                .short("q")
                .long("quiet-display")
                .help("Do not print panel frames to the terminal"),
        )
        .get_matches();

    let mut config = match matches.value_of("config") {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    if let Some(device) = matches.value_of("device") {
        config.device_id = device.to_string();
    }
    if let Some(key) = matches.value_of("api-key") {
        config.api.api_key = key.to_string();
    }
    config.validate()?;

    let options = RunOptions {
        faults: matches.is_present("faults"),
        seed: matches.value_of("seed").unwrap_or(DEFAULT_SEED).parse()?,
        quiet_display: matches.is_present("quiet-display"),
        max_ticks: matches.value_of("ticks").map(str::parse::<u64>).transpose()?,
    };

    println!("{}", "📟 Sensor Node".bold().cyan());
    println!("{}", "==============".cyan());
    println!("   Device:    {}", config.device_id.bold());
    println!("   Broker:    {}:{}", config.broker.host, config.broker.port);
    println!("   Publish:   {}", config.publish_topic());
    println!("   API:       {}", config.api.url);
    println!(
        "   Faults:    {}",
        if options.faults {
            format!("enabled (seed {})", options.seed).yellow()
        } else {
            "disabled".green()
        }
    );

    let interrupt = Arc::new(AtomicBool::new(false));
    let signal_flag = Arc::clone(&interrupt);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 interrupt received, stopping");
            signal_flag.store(true, Ordering::Relaxed);
        }
    });

    // The node and its simulated devices are single-threaded; they live entirely on
    // one blocking worker.
    let worker_flag = Arc::clone(&interrupt);
    let result =
        tokio::task::spawn_blocking(move || run_node(config, options, &worker_flag)).await?;

    match result {
        Ok(()) => Ok(()),
        Err(NodeError::StartupInterrupted) => {
            println!("{}", "Stopped before connectivity came up".yellow());
            Ok(())
        }
        Err(e) => {
            error!("❌ node failed: {}", e);
            Err(e.into())
        }
    }
}

fn run_node(
    config: NodeConfig,
    options: RunOptions,
    interrupt: &AtomicBool,
) -> Result<(), NodeError> {
    let clock: Rc<dyn Clock> = Rc::new(SystemClock::new());
    let panel = if options.quiet_display {
        sim::PanelKind::Recording
    } else {
        sim::PanelKind::Console
    };

    let mut store = TelemetryStore::new();
    if !config.api.api_key.is_empty() {
        store = store.with_api_key(config.api.api_key.clone());
    }
    let rig = sim::build_with_store(Rc::clone(&clock), panel, store);
    let handles = rig.handles.clone();

    let mut injector = options.faults.then(|| {
        FaultInjector::with_config(
            FaultInjectionConfig::default(),
            config.device_id.clone(),
            config.broker.schema_versions.clone(),
            options.seed,
        )
    });

    let mut node = SensorNode::new(config, Rc::clone(&clock), rig.hardware, rig.network)?;
    let ticks = node.run(interrupt, |ticks| {
        if options.max_ticks.is_some_and(|max| ticks >= max) {
            info!(ticks, "tick limit reached");
            return ControlFlow::Break(());
        }
        handles.bench.borrow_mut().environment.drift(ticks / DRIFT_DIVIDER);
        if let Some(injector) = injector.as_mut() {
            injector.update(&handles.bench, &handles.net);
        }
        ControlFlow::Continue(())
    })?;

    info!(ticks, "loop finished");
    print_summary(&node, &handles, injector.as_ref());
    Ok(())
}

fn print_summary(node: &SensorNode, handles: &sim::SimHandles, injector: Option<&FaultInjector>) {
    let stats = node.stats();
    let commands = node.command_stats();
    let acquisition = node.acquisition_stats();

    println!();
    println!("{}", "📈 Run Summary".bold().cyan());
    println!("   Ticks:           {} ({} offline)", stats.ticks, stats.offline_ticks);
    println!(
        "   Sensor cycles:   {} ({} aborted)",
        stats.sensor_cycles, acquisition.aborted_cycles
    );
    println!(
        "   Commands:        {} applied, {} rejected, {} ignored",
        commands.applied, commands.rejected, commands.ignored
    );
    println!(
        "   Telemetry:       {} sent, {}",
        stats.dispatches_sent.to_string().green(),
        format!("{} failed", stats.dispatch_failures).red()
    );
    println!("   Broker messages: {}", handles.net.borrow().published.len());
    println!("   Stored records:  {}", handles.store.borrow().len());
    if stats.tick_errors > 0 {
        println!("   {}", format!("Loop errors: {}", stats.tick_errors).red());
    }
    if let Some(injector) = injector {
        let faults = injector.stats();
        println!(
            "   Faults:          {} injected, {} recovered, {} operator commands",
            faults.total_faults_injected, faults.recovered_faults, faults.operator_commands
        );
    }
}
