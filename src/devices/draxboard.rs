use super::{Connection, Device};
use crate::protocol::DeviceKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraxboardState {
    pub connection: Connection,
    pub firmware: FirmwareVersion,
    pub held: u16,
    pub pressed: u16,
    pub released: u16,
    pub output_state: u32,
    pub meter_error: u8,
}

/// Input/output hub of a station.
///
/// `held` persists between frames. `pressed` and `released` are pulse masks:
/// they collect edges during one tick and are wiped by [`clear_pulses`] at the
/// start of the next.
///
/// [`clear_pulses`]: Draxboard::clear_pulses
#[derive(Debug, Default)]
pub struct Draxboard {
    connection: Connection,
    firmware: FirmwareVersion,
    held: u16,
    pressed: u16,
    released: u16,
    output_state: u32,
    meter_error: u8,
}

impl Draxboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_input(&mut self, input: u16) {
        let delta = self.held ^ input;
        self.pressed |= delta & input;
        self.released |= delta & !input;
        self.held = input;
    }

    pub fn clear_pulses(&mut self) {
        self.pressed = 0;
        self.released = 0;
    }

    pub fn is_held(&self, mask: u16) -> bool {
        self.held & mask != 0
    }

    pub fn is_pressed(&self, mask: u16) -> bool {
        self.pressed & mask != 0
    }

    pub fn is_released(&self, mask: u16) -> bool {
        self.released & mask != 0
    }

    pub fn held(&self) -> u16 {
        self.held
    }

    pub fn set_output_state(&mut self, state: u32) {
        self.output_state = state;
    }

    pub fn output_state(&self) -> u32 {
        self.output_state
    }

    pub fn firmware(&self) -> FirmwareVersion {
        self.firmware
    }

    pub fn set_meter_error(&mut self, code: u8) {
        self.meter_error = code;
    }

    pub fn meter_error(&self) -> u8 {
        self.meter_error
    }
}

impl Device for Draxboard {
    type State = DraxboardState;

    fn kind(&self) -> DeviceKind {
        DeviceKind::Draxboard
    }

    fn connection(&self) -> Connection {
        self.connection
    }

    // [major][minor][firmware slot]
    fn on_connected(&mut self, info: &[u8]) {
        self.connection = Connection::Connected;
        if let [major, minor, ..] = info {
            self.firmware = FirmwareVersion {
                major: *major,
                minor: *minor,
            };
        }
    }

    fn on_disconnected(&mut self) {
        self.connection = Connection::Disconnected;
    }

    fn get_state(&self) -> DraxboardState {
        DraxboardState {
            connection: self.connection,
            firmware: self.firmware,
            held: self.held,
            pressed: self.pressed,
            released: self.released,
            output_state: self.output_state,
            meter_error: self.meter_error,
        }
    }
}
