//! # Cabinet Bridge
//!
//! Protocol bridge between an arcade cabinet application and the device-controller
//! process that owns the cabinet peripherals. The two processes talk over a pair of
//! loopback TCP links using compact length-prefixed binary frames.
//!
//! ## Features
//!
//! - **Dual-socket transport**: self-healing receive and send loops with one-slot mailboxes
//! - **Frame codec**: length-prefixed inbound and outbound frame formats
//! - **Station registry**: binding between operator slots and peer-assigned station hashes
//! - **Per-station devices**: draxboard buttons and outputs, joystick, bill acceptor, printer
//! - **Single-flight printing**: at most one print job in flight per station
//! - **Persisted calibration**: versioned JSON settings for each station slot
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cabinet_bridge::{BridgeConfig, Button, CabinetBridge, StationIndex};
//!
//! # async fn run() {
//! let config = BridgeConfig::default();
//! let mut bridge = CabinetBridge::new(config);
//! let transport = bridge.spawn_transport();
//! bridge.start();
//!
//! // Called once per frame by the host application
//! bridge.tick();
//! if let Some(index) = StationIndex::new(0) {
//!     if bridge.button_down(index, Button::Shoot) {
//!         // fire
//!     }
//! }
//!
//! let grace = bridge.begin_shutdown();
//! tokio::time::sleep(grace).await;
//! transport.stop().await;
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`codec`] - Inbound and outbound frame encoding
//! - [`transport`] - Receive and send socket loops
//! - [`outbound`] - Per-tick command coalescing
//! - [`registry`] - Station index / hash binding
//! - [`devices`] - Per-station device state machines
//! - [`bridge`] - Tick-driven dispatcher and public API

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod bridge;
pub mod codec;
pub mod config;
pub mod devices;
pub mod error;
pub mod mailbox;
pub mod outbound;
pub mod protocol;
pub mod registry;
pub mod settings;
pub mod station;
pub mod transport;

// Re-export main public types for convenience
pub use bridge::{BridgeStats, CabinetBridge};
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use protocol::{Button, DraxOutput, EventId, HardMeter, RawFrame};
pub use registry::{StationHash, StationIndex, StationRegistry, MAX_STATIONS};
pub use station::StationState;
