use cabinet_bridge::{BridgeConfig, CabinetBridge, StationIndex};
use clap::{App, Arg};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "cabinet-bridge.toml";
const STATUS_PERIOD: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("cabinet-bridge")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Bridges the cabinet application to the device-controller process")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Path to the TOML configuration file")
                .takes_value(true)
                .default_value(DEFAULT_CONFIG),
        )
        .arg(
            Arg::with_name("receive-port")
                .long("receive-port")
                .value_name("PORT")
                .help("Port the device controller serves events on")
                .takes_value(true)
                .validator(validate_port),
        )
        .arg(
            Arg::with_name("send-port")
                .long("send-port")
                .value_name("PORT")
                .help("Port this bridge serves commands on")
                .takes_value(true)
                .validator(validate_port),
        )
        .arg(
            Arg::with_name("settings")
                .long("settings")
                .value_name("FILE")
                .help("Peripheral calibration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("log-level")
                .short("l")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level when RUST_LOG is unset")
                .takes_value(true)
                .possible_values(&["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::with_name("init-config")
                .long("init-config")
                .help("Write a default configuration file and exit"),
        )
        .get_matches();

    let config_path = PathBuf::from(matches.value_of("config").unwrap_or(DEFAULT_CONFIG));
    if matches.is_present("init-config") {
        BridgeConfig::write_default(&config_path)?;
        println!("Wrote default configuration to {}", config_path.display());
        return Ok(());
    }

    let mut config = BridgeConfig::load(&config_path);
    if let Some(port) = matches.value_of("receive-port").and_then(|p| p.parse().ok()) {
        config.network.receive_port = port;
    }
    if let Some(port) = matches.value_of("send-port").and_then(|p| p.parse().ok()) {
        config.network.send_port = port;
    }
    if let Some(path) = matches.value_of("settings") {
        config.storage.settings_path = PathBuf::from(path);
    }
    if let Some(level) = matches.value_of("log-level") {
        config.logging.level = level.to_string();
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let tick_period = config.tick_period();
    let mut bridge = CabinetBridge::new(config);
    let transport = bridge.spawn_transport();
    bridge.start();

    let mut interval = time::interval(tick_period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut bound: Vec<Option<u32>> = vec![None; StationIndex::all().count()];
    let mut last_status = Instant::now();

    loop {
        tokio::select! {
            _ = interval.tick() => {
                bridge.tick();
                log_station_changes(&bridge, &mut bound);
                if last_status.elapsed() >= STATUS_PERIOD {
                    let stats = bridge.stats();
                    let link = transport.stats();
                    info!(
                        ticks = stats.ticks,
                        frames = stats.frames_dispatched,
                        ignored = stats.frames_ignored,
                        received = link.batches_received,
                        sent = link.batches_sent,
                        socket_errors = link.socket_errors,
                        "Bridge status"
                    );
                    last_status = Instant::now();
                }
            }
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                break;
            }
        }
    }

    // The kill frame may sit behind a staged batch; keep flushing.
    let grace = bridge.begin_shutdown();
    let deadline = time::Instant::now() + grace;
    while time::Instant::now() < deadline {
        interval.tick().await;
        bridge.tick();
    }
    bridge.stop();
    transport.stop().await;

    Ok(())
}

fn validate_port(value: String) -> Result<(), String> {
    value
        .parse::<u16>()
        .map(|_| ())
        .map_err(|_| "Port must be a number between 0 and 65535".into())
}

fn log_station_changes(bridge: &CabinetBridge, bound: &mut [Option<u32>]) {
    for index in StationIndex::all() {
        let hash = bridge.station_hash(index).map(|hash| hash.get());
        if bound[index.get()] != hash {
            info!(slot = index.number(), hash = ?hash, "Station binding changed");
            bound[index.get()] = hash;
        }

        let Some(snapshot) = bridge.snapshot(index) else {
            continue;
        };
        let drax = snapshot.draxboard;
        if drax.pressed != 0 || drax.released != 0 {
            info!(
                slot = index.number(),
                pressed = %format!("{:#06x}", drax.pressed),
                released = %format!("{:#06x}", drax.released),
                held = %format!("{:#06x}", drax.held),
                "Buttons"
            );
        }
    }
}
