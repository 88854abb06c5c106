use super::{Connection, Device};
use crate::protocol::DeviceKind;
use serde::{Deserialize, Serialize};

/// Raw axis value of a centred stick.
pub const AXIS_CENTER: u8 = 128;
const AXIS_SCALE: f32 = 128.0;

pub const DEFAULT_DEADZONE: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum JoystickType {
    #[default]
    Unknown = 0,
    Ultimarc = 1,
    Baolian = 2,
}

impl JoystickType {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => JoystickType::Ultimarc,
            2 => JoystickType::Baolian,
            _ => JoystickType::Unknown,
        }
    }
}

/// Operator calibration for one station slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JoystickCalibration {
    pub deadzone: f32,
    pub swap_axes: bool,
    pub invert_x: bool,
    pub invert_y: bool,
}

impl Default for JoystickCalibration {
    fn default() -> Self {
        Self {
            deadzone: DEFAULT_DEADZONE,
            swap_axes: true,
            invert_x: false,
            invert_y: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoystickState {
    pub connection: Connection,
    pub joystick_type: JoystickType,
    pub x: u8,
    pub y: u8,
    pub calibration: JoystickCalibration,
}

#[derive(Debug)]
pub struct Joystick {
    connection: Connection,
    joystick_type: JoystickType,
    calibration: JoystickCalibration,
    x: u8,
    y: u8,
}

impl Joystick {
    pub fn new() -> Self {
        Self {
            connection: Connection::Disconnected,
            joystick_type: JoystickType::Unknown,
            calibration: JoystickCalibration::default(),
            x: AXIS_CENTER,
            y: AXIS_CENTER,
        }
    }

    /// Stores a raw reading after calibration: swap, then per-axis invert,
    /// then deadzone.
    pub fn set_from_raw(&mut self, raw_x: u8, raw_y: u8) {
        let cal = self.calibration;
        let (mut x, mut y) = if cal.swap_axes {
            (raw_y, raw_x)
        } else {
            (raw_x, raw_y)
        };

        if cal.invert_x {
            x = u8::MAX - x;
        }
        if cal.invert_y {
            y = u8::MAX - y;
        }

        self.x = apply_deadzone(x, cal.deadzone);
        self.y = apply_deadzone(y, cal.deadzone);
    }

    pub fn raw_axes(&self) -> (u8, u8) {
        (self.x, self.y)
    }

    pub fn horizontal(&self) -> f32 {
        normalize_axis(self.x)
    }

    pub fn vertical(&self) -> f32 {
        normalize_axis(self.y)
    }

    pub fn calibration(&self) -> JoystickCalibration {
        self.calibration
    }

    pub fn set_calibration(&mut self, calibration: JoystickCalibration) {
        self.calibration = calibration;
    }

    pub fn joystick_type(&self) -> JoystickType {
        self.joystick_type
    }
}

impl Default for Joystick {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Joystick {
    type State = JoystickState;

    fn kind(&self) -> DeviceKind {
        DeviceKind::Joystick
    }

    fn connection(&self) -> Connection {
        self.connection
    }

    fn on_connected(&mut self, info: &[u8]) {
        self.connection = Connection::Connected;
        if let Some(&kind) = info.first() {
            self.joystick_type = JoystickType::from_byte(kind);
        }
    }

    fn on_disconnected(&mut self) {
        self.connection = Connection::Disconnected;
        self.x = AXIS_CENTER;
        self.y = AXIS_CENTER;
    }

    fn get_state(&self) -> JoystickState {
        JoystickState {
            connection: self.connection,
            joystick_type: self.joystick_type,
            x: self.x,
            y: self.y,
            calibration: self.calibration,
        }
    }
}

/// Maps a byte axis to `[-1, 1)`: 0 -> -1.0, 128 -> 0.0, 255 -> 0.992.
pub fn normalize_axis(axis: u8) -> f32 {
    (f32::from(axis) - f32::from(AXIS_CENTER)) / AXIS_SCALE
}

// Inclusive at the edge, so a 0.25 deadzone covers raw 96..=160.
fn apply_deadzone(axis: u8, deadzone: f32) -> u8 {
    let offset = (i16::from(axis) - i16::from(AXIS_CENTER)).unsigned_abs();
    if f32::from(offset) / AXIS_SCALE <= deadzone {
        AXIS_CENTER
    } else {
        axis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadzone_edge_is_inclusive() {
        assert_eq!(apply_deadzone(96, 0.25), AXIS_CENTER);
        assert_eq!(apply_deadzone(160, 0.25), AXIS_CENTER);
        assert_eq!(apply_deadzone(95, 0.25), 95);
        assert_eq!(apply_deadzone(161, 0.25), 161);
    }

    #[test]
    fn normalize_endpoints() {
        assert_eq!(normalize_axis(128), 0.0);
        assert_eq!(normalize_axis(0), -1.0);
        assert!((normalize_axis(255) - 0.992_187_5).abs() < 1e-6);
    }
}
