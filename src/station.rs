use crate::devices::{
    BillAcceptor, BillAcceptorInfo, Device, Draxboard, DraxboardState, Joystick, JoystickState,
    Printer, PrinterState,
};
use crate::protocol::DeviceKind;
use crate::registry::{StationHash, StationIndex};
use serde::{Deserialize, Serialize};

/// Snapshot of one station for display and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationSnapshot {
    pub hash: u32,
    pub index: Option<StationIndex>,
    pub draxboard: DraxboardState,
    pub joystick: JoystickState,
    pub bill_acceptor: BillAcceptorInfo,
    pub printer: PrinterState,
}

/// Everything the bridge knows about one physical player station.
#[derive(Debug)]
pub struct StationState {
    hash: StationHash,
    index: Option<StationIndex>,
    pub draxboard: Draxboard,
    pub joystick: Joystick,
    pub bill_acceptor: BillAcceptor,
    pub printer: Printer,
}

impl StationState {
    pub fn new(hash: StationHash) -> Self {
        Self {
            hash,
            index: None,
            draxboard: Draxboard::new(),
            joystick: Joystick::new(),
            bill_acceptor: BillAcceptor::new(),
            printer: Printer::new(),
        }
    }

    pub fn hash(&self) -> StationHash {
        self.hash
    }

    pub fn index(&self) -> Option<StationIndex> {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: Option<StationIndex>) {
        self.index = index;
    }

    /// Runs first in every tick.
    pub fn begin_tick(&mut self) {
        self.draxboard.clear_pulses();
    }

    pub fn device_mut(&mut self, kind: DeviceKind) -> Option<&mut dyn DeviceHandle> {
        match kind {
            DeviceKind::Draxboard => Some(&mut self.draxboard),
            DeviceKind::Joystick => Some(&mut self.joystick),
            DeviceKind::BillAcceptor => Some(&mut self.bill_acceptor),
            DeviceKind::Printer => Some(&mut self.printer),
            DeviceKind::Dongle => None,
        }
    }

    pub fn snapshot(&self) -> StationSnapshot {
        StationSnapshot {
            hash: self.hash.get(),
            index: self.index,
            draxboard: self.draxboard.get_state(),
            joystick: self.joystick.get_state(),
            bill_acceptor: self.bill_acceptor.get_state(),
            printer: self.printer.get_state(),
        }
    }
}

/// Object-safe slice of [`Device`] used for connect/disconnect routing.
pub trait DeviceHandle {
    fn connect(&mut self, info: &[u8]);
    fn disconnect(&mut self);
}

impl<D: Device> DeviceHandle for D {
    fn connect(&mut self, info: &[u8]) {
        self.on_connected(info);
    }

    fn disconnect(&mut self) {
        self.on_disconnected();
    }
}
