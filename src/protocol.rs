use crate::registry::StationHash;
use bytes::Buf;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use thiserror::Error;

/// Inbound frames carry a single length byte covering event id + payload.
pub const MAX_INBOUND_FRAME_LEN: usize = u8::MAX as usize;
pub const MAX_INBOUND_PAYLOAD: usize = MAX_INBOUND_FRAME_LEN - 1;

/// Outbound frames carry a big-endian u16 length covering event id + payload.
pub const MAX_OUTBOUND_FRAME_LEN: usize = u16::MAX as usize;
pub const MAX_OUTBOUND_PAYLOAD: usize = MAX_OUTBOUND_FRAME_LEN - 1;

pub const STATION_HASH_LEN: usize = 4;

const_assert!(MAX_INBOUND_PAYLOAD == 254);
const_assert!(STATION_HASH_LEN == core::mem::size_of::<u32>());

/// Every event id understood on either link. The high nibble selects the
/// device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventId {
    // General / lifecycle
    HostAlive = 0x00,
    DeviceConnected = 0x01,
    DeviceDisconnected = 0x02,
    DongleData = 0x03,
    RetrieveConnectedDevices = 0x04,
    KillPeer = 0x05,

    // Draxboard
    DraxInput = 0x11,
    DraxOutputState = 0x12,
    DraxOutputBitEnable = 0x13,
    DraxOutputBitDisable = 0x14,
    DraxHardMeter = 0x15,
    DraxMeterError = 0x16,

    // Joystick
    JoystickInput = 0x21,

    // Printer
    PrintVoucher = 0x41,
    PrintAudit = 0x42,
    PrintCodeExchange = 0x43,
    PrintTest = 0x44,
    PrintReprint = 0x45,
    PrintComplete = 0x46,
    PrintError = 0x47,
    PrinterState = 0x48,

    // Bill acceptor
    BillInserted = 0x81,
    BillAccepted = 0x82,
    BillRejected = 0x83,
    BillReturned = 0x84,
    BillAcceptorState = 0x85,
    BillAcceptEscrow = 0x86,
    BillRejectEscrow = 0x87,
    BillAcceptorIdle = 0x88,
    BillAcceptorInhibit = 0x89,
    BillAcceptorReset = 0x8A,
}

impl EventId {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Device class from the high nibble of the id.
    pub fn device_class(self) -> DeviceClass {
        match self.as_byte() & 0xF0 {
            0x10 => DeviceClass::Draxboard,
            0x20 => DeviceClass::Joystick,
            0x40 => DeviceClass::Printer,
            0x80 => DeviceClass::BillAcceptor,
            _ => DeviceClass::General,
        }
    }

    /// True for events the peer sends to the host. 0x85 travels both ways.
    pub fn is_from_peer(self) -> bool {
        matches!(
            self,
            EventId::DeviceConnected
                | EventId::DeviceDisconnected
                | EventId::DongleData
                | EventId::DraxInput
                | EventId::DraxOutputState
                | EventId::DraxMeterError
                | EventId::JoystickInput
                | EventId::PrintComplete
                | EventId::PrintError
                | EventId::PrinterState
                | EventId::BillInserted
                | EventId::BillAccepted
                | EventId::BillRejected
                | EventId::BillReturned
                | EventId::BillAcceptorState
        )
    }

    /// True when the hash in the frame must be a nonzero, bound station.
    pub fn is_station_scoped(self) -> bool {
        self.device_class() != DeviceClass::General
    }
}

impl TryFrom<u8> for EventId {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let event = match value {
            0x00 => EventId::HostAlive,
            0x01 => EventId::DeviceConnected,
            0x02 => EventId::DeviceDisconnected,
            0x03 => EventId::DongleData,
            0x04 => EventId::RetrieveConnectedDevices,
            0x05 => EventId::KillPeer,
            0x11 => EventId::DraxInput,
            0x12 => EventId::DraxOutputState,
            0x13 => EventId::DraxOutputBitEnable,
            0x14 => EventId::DraxOutputBitDisable,
            0x15 => EventId::DraxHardMeter,
            0x16 => EventId::DraxMeterError,
            0x21 => EventId::JoystickInput,
            0x41 => EventId::PrintVoucher,
            0x42 => EventId::PrintAudit,
            0x43 => EventId::PrintCodeExchange,
            0x44 => EventId::PrintTest,
            0x45 => EventId::PrintReprint,
            0x46 => EventId::PrintComplete,
            0x47 => EventId::PrintError,
            0x48 => EventId::PrinterState,
            0x81 => EventId::BillInserted,
            0x82 => EventId::BillAccepted,
            0x83 => EventId::BillRejected,
            0x84 => EventId::BillReturned,
            0x85 => EventId::BillAcceptorState,
            0x86 => EventId::BillAcceptEscrow,
            0x87 => EventId::BillRejectEscrow,
            0x88 => EventId::BillAcceptorIdle,
            0x89 => EventId::BillAcceptorInhibit,
            0x8A => EventId::BillAcceptorReset,
            other => return Err(ProtocolError::UnknownEvent(other)),
        };
        Ok(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceClass {
    General,
    Draxboard,
    Joystick,
    Printer,
    BillAcceptor,
}

/// Device id byte carried by connect/disconnect events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeviceKind {
    Dongle = 0x03,
    Draxboard = 0x10,
    Joystick = 0x20,
    Printer = 0x40,
    BillAcceptor = 0x80,
}

impl TryFrom<u8> for DeviceKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x03 => Ok(DeviceKind::Dongle),
            0x10 => Ok(DeviceKind::Draxboard),
            0x20 => Ok(DeviceKind::Joystick),
            0x40 => Ok(DeviceKind::Printer),
            0x80 => Ok(DeviceKind::BillAcceptor),
            other => Err(ProtocolError::UnknownDevice(other)),
        }
    }
}

/// Draxboard input bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum Button {
    Shoot = 0x0001,
    PowerUp = 0x0002,
    Redeem = 0x0004,
    Menu = 0x0008,
    AttendantKey = 0x0010,
    SupervisorKey = 0x0020,
    Credit = 0x0040,
    DisableMachine = 0x0080,
    LogicDoor = 0x0100,
    CashDoor = 0x0200,
    MainDoor = 0x0400,
}

impl Button {
    pub fn mask(self) -> u16 {
        self as u16
    }
}

/// Draxboard output bits (lamps, meters, device power).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum DraxOutput {
    ShootLamp = 0x0001,
    PowerUpLamp = 0x0002,
    RedeemLamp = 0x0004,
    MenuLamp = 0x0008,
    VibratorMotor = 0x0010,
    WinLamp = 0x0020,
    CandleTop = 0x0040,
    Unused0 = 0x0080,
    Bell = 0x0100,
    MachineMeterOut = 0x0200,
    MachineMeterIn = 0x0400,
    PrinterPower = 0x0800,
    BillAcceptorPower = 0x1000,
    StationMeterOut = 0x2000,
    Unused1 = 0x4000,
    StationMeterIn = 0x8000,
}

impl DraxOutput {
    pub fn mask(self) -> u16 {
        self as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum HardMeter {
    StationIn = 0x00,
    StationOut = 0x01,
    MachineIn = 0x02,
    MachineOut = 0x03,
}

/// One frame as split out of a received buffer: the event id byte followed by
/// the rest of the frame (station hash slot, if any, and payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub event_id: u8,
    pub body: Vec<u8>,
}

impl RawFrame {
    pub fn new(event_id: u8, body: Vec<u8>) -> Self {
        Self { event_id, body }
    }

    /// Reads the big-endian hash slot at the head of the body. Frames too
    /// short to carry it, or carrying 0, resolve to `None`.
    pub fn station_hash(&self) -> Option<StationHash> {
        if self.body.len() < STATION_HASH_LEN {
            return None;
        }
        let mut head = &self.body[..STATION_HASH_LEN];
        StationHash::new(head.get_u32())
    }

    /// Body bytes following the hash slot.
    pub fn station_payload(&self) -> &[u8] {
        self.body.get(STATION_HASH_LEN..).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unknown event id {0:#04x}")]
    UnknownEvent(u8),
    #[error("unknown device id {0:#04x}")]
    UnknownDevice(u8),
    #[error("payload of {size} bytes exceeds frame limit of {max}")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("frame of {needed} bytes truncated at {available}")]
    Truncated { needed: usize, available: usize },
    #[error("payload too short: need {needed} bytes, got {actual}")]
    ShortPayload { needed: usize, actual: usize },
}

/// Checks that `payload` holds at least `needed` bytes.
pub fn require_len(payload: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if payload.len() < needed {
        return Err(ProtocolError::ShortPayload {
            needed,
            actual: payload.len(),
        });
    }
    Ok(())
}
