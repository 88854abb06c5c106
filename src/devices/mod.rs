pub mod bill_acceptor;
pub mod draxboard;
pub mod joystick;
pub mod printer;

pub use bill_acceptor::{
    BillAcceptor, BillAcceptorInfo, BillAcceptorState, BillEvent, BillEventKind,
};
pub use draxboard::{Draxboard, DraxboardState, FirmwareVersion};
pub use joystick::{Joystick, JoystickCalibration, JoystickState, JoystickType};
pub use printer::{PaperStatus, PrintJob, Printer, PrinterState, PrinterType};

use crate::protocol::DeviceKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Connection {
    #[default]
    Disconnected,
    Connected,
}

/// One peripheral attached to a station.
pub trait Device {
    type State: Clone + Serialize;

    fn kind(&self) -> DeviceKind;
    fn connection(&self) -> Connection;

    /// Applies a connect notice. `info` is the device-specific tail of the
    /// frame, after the device id.
    fn on_connected(&mut self, info: &[u8]);
    fn on_disconnected(&mut self);
    fn get_state(&self) -> Self::State;

    fn is_connected(&self) -> bool {
        self.connection() == Connection::Connected
    }
}
