use anyhow::{Context, Result};
use bus_transport::{MessageBus, MockBus};
use clap::{ArgAction, Parser};
use control_plane::settings::KEY_DEVICES;
use control_plane::{
    JsonFileSettings, MonotonicClock, Node, NodeConfig, SettingsStore, StepOutcome,
};
use device_registry::{load_manifest_file, FamilyRegistry};
use peripherals::{register_builtin_families, Hardware};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "hub-node",
    version,
    about = "Microcontroller hub node on a simulated board and in-process bus"
)]
struct Args {
    /// Static node configuration (JSON); written with defaults if missing
    #[arg(long, default_value = "hub-node.json")]
    config: PathBuf,

    /// Persistent settings store (JSON)
    #[arg(long, default_value = "hub-settings.json")]
    settings: PathBuf,

    /// Device manifest to store before booting
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Stop after this many loop iterations
    #[arg(long)]
    iterations: Option<u64>,

    /// Acknowledge every heartbeat as a connected consumer would
    #[arg(long, action = ArgAction::SetTrue)]
    simulate_consumer: bool,

    /// Toggle this simulated input once per second
    #[arg(long)]
    toggle_gpio: Option<i32>,

    /// Print driver metrics on exit
    #[arg(long, action = ArgAction::SetTrue)]
    metrics: bool,
}

fn main() -> Result<()> {
    setup_tracing();
    let args = Args::parse();

    let mut config = NodeConfig::load(&args.config)?;
    let mut settings = JsonFileSettings::open(&args.settings)
        .with_context(|| format!("opening settings: {}", args.settings.display()))?;

    let (hw, pins, _thermometer) = Hardware::simulated();
    let mut families = FamilyRegistry::new();
    register_builtin_families(&mut families, &hw);

    if let Some(path) = &args.manifest {
        let descriptors = load_manifest_file(path, &families)?;
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading manifest: {}", path.display()))?;
        settings.store(KEY_DEVICES, &raw)?;
        info!(devices = descriptors.len(), path = %path.display(), "manifest stored");
    }

    let mut bus = MockBus::new();
    bus.connect();

    let mut iteration: u64 = 0;
    let mut level = false;
    loop {
        let mut node = Node::boot(config, bus, settings, families, Box::new(MonotonicClock::new()));
        let alive_topic = node.identity().topic("alive");
        let ack_topic = node.identity().topic("alive_ack");
        let period = Duration::from_millis(node.loop_period_ms());
        let ticks_per_second = (1000 / node.loop_period_ms().max(1)).max(1);

        let outcome = loop {
            if args.iterations.is_some_and(|n| iteration >= n) {
                break StepOutcome::Continue;
            }
            iteration += 1;

            if let Some(gpio) = args.toggle_gpio {
                if iteration % ticks_per_second == 0 {
                    level = !level;
                    match pins.lock() {
                        Ok(mut sim) => sim.set_input(gpio, level),
                        Err(_) => warn!("simulated pins poisoned"),
                    }
                }
            }

            let outcome = node.step();
            for msg in node.bus_mut().take_published() {
                debug!(topic = %msg.topic, payload = %msg.payload, "published");
                if args.simulate_consumer && msg.topic == alive_topic {
                    node.bus_mut().inject(ack_topic.clone(), "1");
                }
            }
            if let StepOutcome::Restart(_) = outcome {
                break outcome;
            }
            thread::sleep(period);
        };

        match outcome {
            StepOutcome::Restart(reason) => {
                info!(?reason, "rebooting node");
                (config, bus, settings, families) = node.into_parts();
                if !bus.is_connected() {
                    bus.connect();
                }
            }
            StepOutcome::Continue => {
                if args.metrics {
                    if let Some(metrics) = node.registry().metrics() {
                        println!("{}", metrics.encode_text());
                    }
                }
                node.bus_mut().disconnect();
                info!(iterations = iteration, "hub node stopped");
                return Ok(());
            }
        }
    }
}

fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
