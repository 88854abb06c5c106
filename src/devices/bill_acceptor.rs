use super::{Connection, Device};
use crate::protocol::DeviceKind;
use heapless::Deque;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const MAX_PENDING_BILL_EVENTS: usize = 16;

/// State as reported by the peer. The byte order matches the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum BillAcceptorState {
    Error = 0,
    #[default]
    NotInit = 1,
    PowerUp = 2,
    NoteStay = 3,
    Idle = 4,
    Inhibit = 5,
    UnitFailure = 6,
    BoxRemoved = 7,
    StackerJammed = 8,
}

impl BillAcceptorState {
    pub fn from_byte(byte: u8) -> Option<Self> {
        let state = match byte {
            0 => BillAcceptorState::Error,
            1 => BillAcceptorState::NotInit,
            2 => BillAcceptorState::PowerUp,
            3 => BillAcceptorState::NoteStay,
            4 => BillAcceptorState::Idle,
            5 => BillAcceptorState::Inhibit,
            6 => BillAcceptorState::UnitFailure,
            7 => BillAcceptorState::BoxRemoved,
            8 => BillAcceptorState::StackerJammed,
            _ => return None,
        };
        Some(state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillEventKind {
    Inserted,
    Stacked,
    Rejected,
    Returned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillEvent {
    pub kind: BillEventKind,
    pub value: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillAcceptorInfo {
    pub connection: Connection,
    pub acceptor_type: u8,
    pub state: BillAcceptorState,
    pub pending_events: usize,
}

/// Records what the peer reports. Commands are forwarded as-is and
/// transitions are never validated here.
#[derive(Debug, Default)]
pub struct BillAcceptor {
    connection: Connection,
    acceptor_type: u8,
    state: BillAcceptorState,
    events: Deque<BillEvent, MAX_PENDING_BILL_EVENTS>,
}

impl BillAcceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_event(&mut self, kind: BillEventKind, value: Option<u8>) {
        self.state = match kind {
            BillEventKind::Inserted => BillAcceptorState::NoteStay,
            BillEventKind::Stacked | BillEventKind::Rejected | BillEventKind::Returned => {
                BillAcceptorState::Idle
            }
        };

        if self.events.is_full() {
            let _ = self.events.pop_front();
            warn!("Bill event queue full, dropped oldest event");
        }
        let _ = self.events.push_back(BillEvent { kind, value });
    }

    /// Applies a state byte from the peer. Unknown bytes are ignored.
    pub fn set_reported_state(&mut self, byte: u8) -> bool {
        match BillAcceptorState::from_byte(byte) {
            Some(state) => {
                self.state = state;
                true
            }
            None => false,
        }
    }

    pub fn state(&self) -> BillAcceptorState {
        self.state
    }

    pub fn acceptor_type(&self) -> u8 {
        self.acceptor_type
    }

    pub fn drain_events(&mut self) -> Vec<BillEvent> {
        let mut drained = Vec::with_capacity(self.events.len());
        while let Some(event) = self.events.pop_front() {
            drained.push(event);
        }
        drained
    }
}

impl Device for BillAcceptor {
    type State = BillAcceptorInfo;

    fn kind(&self) -> DeviceKind {
        DeviceKind::BillAcceptor
    }

    fn connection(&self) -> Connection {
        self.connection
    }

    fn on_connected(&mut self, info: &[u8]) {
        self.connection = Connection::Connected;
        self.state = BillAcceptorState::NotInit;
        if let Some(&kind) = info.first() {
            self.acceptor_type = kind;
        }
    }

    fn on_disconnected(&mut self) {
        self.connection = Connection::Disconnected;
    }

    fn get_state(&self) -> BillAcceptorInfo {
        BillAcceptorInfo {
            connection: self.connection,
            acceptor_type: self.acceptor_type,
            state: self.state,
            pending_events: self.events.len(),
        }
    }
}
