//! Development stand-in for the device-controller process.

use cabinet_bridge::codec::PacketCodec;
use cabinet_bridge::protocol::{Button, DeviceKind, EventId, RawFrame};
use cabinet_bridge::registry::StationHash;
use cabinet_bridge::BridgeConfig;
use clap::{App, Arg};
use colored::*;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::time;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const DRAIN_PERIOD: Duration = Duration::from_millis(16);
const FIRMWARE: (u8, u8) = (6, 14);

#[derive(Clone)]
struct Peer {
    hash: StationHash,
    firmware_slot: u8,
    /// Bytes waiting for the bridge's next receive connection.
    pending: Arc<Mutex<Vec<u8>>>,
}

impl Peer {
    async fn push(&self, event: EventId, body: &[u8]) {
        match PacketCodec::encode_inbound(event.as_byte(), body) {
            Ok(frame) => self.pending.lock().await.extend_from_slice(&frame),
            Err(e) => warn!(?event, error = %e, "Cannot encode simulated frame"),
        }
    }

    async fn push_station(&self, event: EventId, payload: &[u8]) {
        let mut body = self.hash.get().to_be_bytes().to_vec();
        body.extend_from_slice(payload);
        self.push(event, &body).await;
    }

    async fn announce_devices(&self) {
        let (major, minor) = FIRMWARE;
        self.push_station(
            EventId::DeviceConnected,
            &[DeviceKind::Draxboard as u8, major, minor, self.firmware_slot],
        )
        .await;
        self.push_station(EventId::DeviceConnected, &[DeviceKind::Joystick as u8, 1])
            .await;
        self.push_station(EventId::DeviceConnected, &[DeviceKind::Printer as u8, 1])
            .await;
        self.push_station(EventId::DeviceConnected, &[DeviceKind::BillAcceptor as u8, 1])
            .await;
        self.push(EventId::DeviceConnected, &[0, 0, 0, 0, DeviceKind::Dongle as u8])
            .await;
        println!("{} station {:#010x} announced", "⇢".cyan(), self.hash.get());
    }

    /// Reacts to one command from the bridge. Returns false on kill.
    async fn react(&self, frame: &RawFrame) -> bool {
        let Ok(event) = EventId::try_from(frame.event_id) else {
            return true;
        };

        match event {
            EventId::KillPeer => return false,
            EventId::RetrieveConnectedDevices => self.announce_devices().await,
            EventId::PrintVoucher
            | EventId::PrintAudit
            | EventId::PrintCodeExchange
            | EventId::PrintTest
            | EventId::PrintReprint => {
                self.push_station(EventId::PrintComplete, &[]).await;
            }
            EventId::PrinterState => {
                let mut payload = vec![1];
                payload.extend_from_slice(&0u32.to_be_bytes());
                payload.push(2);
                self.push_station(EventId::PrinterState, &payload).await;
            }
            EventId::BillAcceptorState => {
                self.push_station(EventId::BillAcceptorState, &[4]).await;
            }
            _ => {}
        }
        true
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("cabinet-peer-sim")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Simulates the device controller on the other end of the bridge")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Bridge configuration file to take ports from")
                .takes_value(true)
                .default_value("cabinet-bridge.toml"),
        )
        .arg(
            Arg::with_name("hash")
                .long("hash")
                .value_name("HEX")
                .help("Station hash to simulate")
                .takes_value(true)
                .default_value("AABBCCDD"),
        )
        .arg(
            Arg::with_name("slot")
                .long("slot")
                .value_name("N")
                .help("1-based firmware station slot, 0 for none")
                .takes_value(true)
                .default_value("1"),
        )
        .arg(
            Arg::with_name("press-every")
                .long("press-every")
                .value_name("SECONDS")
                .help("Press and release SHOOT periodically, 0 to disable")
                .takes_value(true)
                .default_value("2"),
        )
        .get_matches();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = BridgeConfig::load(&PathBuf::from(matches.value_of("config").unwrap_or_default()));
    let raw_hash = u32::from_str_radix(matches.value_of("hash").unwrap_or_default(), 16)?;
    let hash = StationHash::new(raw_hash).ok_or("station hash must be nonzero")?;
    let firmware_slot: u8 = matches.value_of("slot").unwrap_or("0").parse()?;
    let press_every: u64 = matches.value_of("press-every").unwrap_or("0").parse()?;

    println!("{}", "Cabinet peer simulator".bold());
    println!("  serving events on  {}", config.receive_addr().to_string().green());
    println!("  draining commands  {}", config.send_addr().to_string().green());

    let peer = Peer {
        hash,
        firmware_slot,
        pending: Arc::new(Mutex::new(Vec::new())),
    };
    peer.announce_devices().await;

    let (stop_tx, stop_rx) = watch::channel(false);
    let server = tokio::spawn(serve_events(config.receive_addr(), peer.clone(), stop_rx.clone()));
    if press_every > 0 {
        tokio::spawn(press_buttons(peer.clone(), Duration::from_secs(press_every), stop_rx));
    }

    drain_commands(config.send_addr(), &peer).await;
    let _ = stop_tx.send(true);
    server.abort();
    println!("{}", "Kill received, exiting".red().bold());
    Ok(())
}

async fn serve_events(addr: SocketAddr, peer: Peer, mut stop: watch::Receiver<bool>) {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("{} cannot bind {}: {}", "✗".red(), addr, e);
            return;
        }
    };

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = stop.changed() => return,
        };
        let mut stream = match accepted {
            Ok((stream, _)) => stream,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                continue;
            }
        };

        let batch = std::mem::take(&mut *peer.pending.lock().await);
        if let Err(e) = stream.write_all(&batch).await {
            warn!(error = %e, "Lost a batch to the bridge");
            continue;
        }
        let _ = stream.shutdown().await;
        if !batch.is_empty() {
            debug!(bytes = batch.len(), "Served batch");
        }
    }
}

async fn press_buttons(peer: Peer, every: Duration, mut stop: watch::Receiver<bool>) {
    let mut interval = time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = stop.changed() => return,
        }
        peer.push_station(EventId::DraxInput, &Button::Shoot.mask().to_be_bytes())
            .await;
        time::sleep(Duration::from_millis(100)).await;
        peer.push_station(EventId::DraxInput, &0u16.to_be_bytes()).await;
        peer.push_station(EventId::JoystickInput, &[200, 40]).await;
        println!("{} SHOOT pressed and released", "⇢".cyan());
    }
}

async fn drain_commands(addr: SocketAddr, peer: &Peer) {
    let mut interval = time::interval(DRAIN_PERIOD);
    loop {
        interval.tick().await;

        let mut batch = Vec::new();
        match TcpStream::connect(addr).await {
            Ok(mut stream) => {
                if let Err(e) = stream.read_to_end(&mut batch).await {
                    warn!(error = %e, "Read from bridge failed");
                    continue;
                }
            }
            Err(e) => {
                debug!(error = %e, "Bridge not listening yet");
                continue;
            }
        }

        for frame in PacketCodec::decode_outbound(&batch) {
            print_command(&frame);
            if !peer.react(&frame).await {
                return;
            }
        }
    }
}

fn print_command(frame: &RawFrame) {
    let name = match EventId::try_from(frame.event_id) {
        Ok(EventId::HostAlive) => return,
        Ok(event) => format!("{:?}", event),
        Err(_) => format!("unknown {:#04x}", frame.event_id),
    };
    let body: Vec<String> = frame.body.iter().map(|b| format!("{:02x}", b)).collect();
    let text = String::from_utf8_lossy(&frame.body);
    if text.is_ascii() && frame.body.len() > 4 {
        println!("{} {} {}", "⇠".yellow(), name.bold(), text.dimmed());
    } else {
        println!("{} {} [{}]", "⇠".yellow(), name.bold(), body.join(" "));
    }
}
