use super::{Connection, Device};
use crate::protocol::{DeviceKind, EventId};
use arrayvec::ArrayString;
use chrono::{Datelike, NaiveDateTime, Timelike};
use core::fmt::Write;
use serde::{Deserialize, Serialize};

pub const MAX_TICKET_TEXT: usize = 240;

pub type TicketText = ArrayString<MAX_TICKET_TEXT>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PrinterType {
    #[default]
    Unknown = 0,
    CustomTg02 = 1,
    Reliance = 2,
    Pyramid = 3,
}

impl PrinterType {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => PrinterType::CustomTg02,
            2 => PrinterType::Reliance,
            3 => PrinterType::Pyramid,
            _ => PrinterType::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PaperStatus {
    #[default]
    OutOfPaper = 0,
    Low = 1,
    Available = 2,
}

impl PaperStatus {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(PaperStatus::OutOfPaper),
            1 => Some(PaperStatus::Low),
            2 => Some(PaperStatus::Available),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrintJob {
    Voucher,
    Audit,
    CodeExchange,
    Test,
    Reprint,
}

impl PrintJob {
    pub fn event_id(self) -> EventId {
        match self {
            PrintJob::Voucher => EventId::PrintVoucher,
            PrintJob::Audit => EventId::PrintAudit,
            PrintJob::CodeExchange => EventId::PrintCodeExchange,
            PrintJob::Test => EventId::PrintTest,
            PrintJob::Reprint => EventId::PrintReprint,
        }
    }

    pub fn from_event_byte(byte: u8) -> Option<Self> {
        match EventId::try_from(byte).ok()? {
            EventId::PrintVoucher => Some(PrintJob::Voucher),
            EventId::PrintAudit => Some(PrintJob::Audit),
            EventId::PrintCodeExchange => Some(PrintJob::CodeExchange),
            EventId::PrintTest => Some(PrintJob::Test),
            EventId::PrintReprint => Some(PrintJob::Reprint),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrinterState {
    pub connection: Connection,
    pub printer_type: PrinterType,
    pub status: u32,
    pub paper: PaperStatus,
    pub job_in_flight: Option<PrintJob>,
    pub completed_jobs: u32,
    pub failed_jobs: u32,
}

/// Ticket printer with a single-flight gate: one job at a time, released
/// only by a completion event or an operator clear.
#[derive(Debug, Default)]
pub struct Printer {
    connection: Connection,
    printer_type: PrinterType,
    status: u32,
    paper: PaperStatus,
    in_flight: Option<PrintJob>,
    completed_jobs: u32,
    failed_jobs: u32,
}

impl Printer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_job_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Takes the gate for `job`. Fails if another job is still in flight.
    pub fn try_begin_job(&mut self, job: PrintJob) -> bool {
        if self.in_flight.is_some() {
            return false;
        }
        self.in_flight = Some(job);
        true
    }

    /// Releases the gate on a completion or error event.
    pub fn finish_job(&mut self, success: bool) -> Option<PrintJob> {
        if success {
            self.completed_jobs = self.completed_jobs.saturating_add(1);
        } else {
            self.failed_jobs = self.failed_jobs.saturating_add(1);
        }
        self.in_flight.take()
    }

    /// Operator override for a completion event that never arrived.
    pub fn clear_job(&mut self) -> Option<PrintJob> {
        self.in_flight.take()
    }

    pub fn apply_status(&mut self, printer_type: u8, status: u32, paper: u8) {
        self.printer_type = PrinterType::from_byte(printer_type);
        self.status = status;
        if let Some(paper) = PaperStatus::from_byte(paper) {
            self.paper = paper;
        }
    }

    pub fn printer_type(&self) -> PrinterType {
        self.printer_type
    }

    pub fn status(&self) -> u32 {
        self.status
    }

    pub fn paper(&self) -> PaperStatus {
        self.paper
    }
}

impl Device for Printer {
    type State = PrinterState;

    fn kind(&self) -> DeviceKind {
        DeviceKind::Printer
    }

    fn connection(&self) -> Connection {
        self.connection
    }

    fn on_connected(&mut self, info: &[u8]) {
        self.connection = Connection::Connected;
        self.paper = PaperStatus::OutOfPaper;
        self.printer_type = info
            .first()
            .map_or(PrinterType::CustomTg02, |&kind| PrinterType::from_byte(kind));
    }

    fn on_disconnected(&mut self) {
        self.connection = Connection::Disconnected;
    }

    fn get_state(&self) -> PrinterState {
        PrinterState {
            connection: self.connection,
            printer_type: self.printer_type,
            status: self.status,
            paper: self.paper,
            job_in_flight: self.in_flight,
            completed_jobs: self.completed_jobs,
            failed_jobs: self.failed_jobs,
        }
    }
}

/// `credits|station|validation|Y|M|D|h|m|s`, with a 1-based station number.
pub fn voucher_text(
    credits: &str,
    station_number: usize,
    validation: &str,
    printed_at: &NaiveDateTime,
) -> Option<TicketText> {
    let mut text = TicketText::new();
    write!(text, "{credits}|{station_number}|{validation}").ok()?;
    write_timestamp(&mut text, printed_at)?;
    ascii_only(text)
}

/// `|Y|M|D|h|m|s`, used by the test ticket.
pub fn timestamp_text(at: &NaiveDateTime) -> Option<TicketText> {
    let mut text = TicketText::new();
    write_timestamp(&mut text, at)?;
    Some(text)
}

/// Caller-supplied text for audit and code-exchange tickets.
pub fn free_text(body: &str) -> Option<TicketText> {
    let text = TicketText::from(body).ok()?;
    ascii_only(text)
}

fn write_timestamp(text: &mut TicketText, at: &NaiveDateTime) -> Option<()> {
    write!(
        text,
        "|{}|{}|{}|{}|{}|{}",
        at.year(),
        at.month(),
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    )
    .ok()
}

fn ascii_only(text: TicketText) -> Option<TicketText> {
    text.is_ascii().then_some(text)
}
