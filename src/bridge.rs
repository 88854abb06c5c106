use crate::codec::PacketCodec;
use crate::config::BridgeConfig;
use crate::devices::printer::{free_text, timestamp_text, voucher_text, TicketText};
use crate::devices::{
    BillAcceptorState, BillEvent, BillEventKind, Device, FirmwareVersion, JoystickCalibration,
    JoystickType, PaperStatus, PrintJob, PrinterType,
};
use crate::mailbox::Mailbox;
use crate::outbound::OutboundQueue;
use crate::protocol::{
    require_len, Button, DeviceKind, DraxOutput, EventId, HardMeter, ProtocolError, RawFrame,
};
use crate::registry::{StationHash, StationIndex, StationRegistry};
use crate::settings;
use crate::station::{DeviceHandle, StationSnapshot, StationState};
use crate::transport::{self, TransportHandle, TransportSettings};
use bytes::Buf;
use chrono::{Local, NaiveDateTime};
use heapless::Deque;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

const MAX_DONGLE_PACKETS: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStats {
    pub ticks: u64,
    pub frames_dispatched: u64,
    pub frames_ignored: u64,
    pub batches_flushed: u64,
    pub keepalives_sent: u64,
}

#[derive(Debug, Default)]
struct DongleLink {
    connected: bool,
    received: Deque<Vec<u8>, MAX_DONGLE_PACKETS>,
}

/// Tick-driven facade over the peer link.
///
/// All station state is mutated inside [`tick`](Self::tick); the socket loops
/// only ever touch the two mailboxes.
pub struct CabinetBridge {
    config: BridgeConfig,
    registry: StationRegistry,
    outbound: OutboundQueue,
    inbound_mailbox: Mailbox,
    outbound_mailbox: Mailbox,
    dongle: DongleLink,
    running: bool,
    last_keepalive: Option<Instant>,
    stats: BridgeStats,
}

impl CabinetBridge {
    pub fn new(config: BridgeConfig) -> Self {
        let outbound = OutboundQueue::with_limit(config.bridge.outbound_queue_limit);
        Self {
            config,
            registry: StationRegistry::new(),
            outbound,
            inbound_mailbox: Mailbox::new(),
            outbound_mailbox: Mailbox::new(),
            dongle: DongleLink::default(),
            running: false,
            last_keepalive: None,
            stats: BridgeStats::default(),
        }
    }

    /// Starts the socket loops against this bridge's mailboxes. Must be called
    /// from within a tokio runtime.
    pub fn spawn_transport(&self) -> TransportHandle {
        transport::spawn(
            TransportSettings::from(&self.config),
            self.inbound_mailbox.clone(),
            self.outbound_mailbox.clone(),
        )
    }

    /// Loads persisted calibration and asks the peer to replay its connected
    /// devices.
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        settings::load_into(&self.config.storage.settings_path, &mut self.registry);
        self.running = true;
        self.request_connected_devices();
        info!(
            bound = self.registry.bound_count(),
            "Cabinet bridge started"
        );
    }

    pub fn stop(&mut self) {
        self.running = false;
        info!("Cabinet bridge stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Queues the kill-peer command and stages it for the send loop. The
    /// caller must keep the transport alive for the returned grace period.
    pub fn begin_shutdown(&mut self) -> Duration {
        self.outbound.enqueue(EventId::KillPeer, &[], None);
        self.flush_outbound();
        let grace = self.config.shutdown_grace();
        info!(grace_ms = grace.as_millis() as u64, "Kill sent to peer, waiting before exit");
        grace
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// One dispatcher pass: clear last tick's pulses, queue a keepalive when
    /// due, stage queued commands, then apply everything the peer sent.
    pub fn tick_at(&mut self, now: Instant) {
        if !self.running {
            return;
        }
        self.stats.ticks += 1;

        for station in self.registry.stations_mut() {
            station.begin_tick();
        }

        let interval = self.config.keepalive_interval();
        let keepalive_due = self
            .last_keepalive
            .is_none_or(|last| now.saturating_duration_since(last) >= interval);
        if keepalive_due {
            self.last_keepalive = Some(now);
            // One unsent keepalive is enough while the peer is away.
            if !self.outbound.has_pending(EventId::HostAlive)
                && self.outbound.enqueue(EventId::HostAlive, &[], None)
            {
                self.stats.keepalives_sent += 1;
            }
        }

        self.flush_outbound();

        if let Some(buffer) = self.inbound_mailbox.take() {
            for frame in PacketCodec::decode_inbound(&buffer) {
                self.dispatch(&frame);
            }
        }
    }

    fn flush_outbound(&mut self) {
        if !self.outbound_mailbox.is_empty() {
            return;
        }
        let Some(batch) = self.outbound.drain_concatenated() else {
            return;
        };
        let len = batch.len();
        match self.outbound_mailbox.offer(batch) {
            Ok(()) => {
                self.stats.batches_flushed += 1;
                trace!(bytes = len, "Staged outbound batch");
            }
            Err(_) => warn!(bytes = len, "Outbound mailbox filled concurrently, batch lost"),
        }
    }

    fn dispatch(&mut self, frame: &RawFrame) {
        let event = match EventId::try_from(frame.event_id) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Ignoring frame with unknown event id");
                self.stats.frames_ignored += 1;
                return;
            }
        };

        match event {
            EventId::DeviceConnected => self.on_device_connected(frame),
            EventId::DeviceDisconnected => self.on_device_disconnected(frame),
            EventId::DongleData => self.on_dongle_data(&frame.body),
            _ if event.is_from_peer() && event.is_station_scoped() => {
                self.on_station_event(event, frame);
            }
            _ => {
                warn!(?event, "Ignoring host-to-peer event received from peer");
                self.stats.frames_ignored += 1;
                return;
            }
        }
        self.stats.frames_dispatched += 1;
    }

    fn on_station_event(&mut self, event: EventId, frame: &RawFrame) {
        let Some(hash) = StationRegistry::resolve_station_hash(frame) else {
            warn!(?event, "Dropping station event without a valid station hash");
            return;
        };
        let Some(station) = self.registry.lookup_by_hash_mut(hash) else {
            warn!(?event, %hash, "Dropping event for unknown station");
            return;
        };

        if let Err(e) = apply_station_event(station, event, frame.station_payload()) {
            warn!(?event, %hash, error = %e, "Dropping malformed station event");
        }
    }

    // [hash:4][device id][device info..]
    fn split_device_frame(frame: &RawFrame) -> Option<(Option<StationHash>, DeviceKind, &[u8])> {
        let payload = frame.station_payload();
        let Some((&device, info)) = payload.split_first() else {
            warn!(event_id = frame.event_id, "Device notice without a device id");
            return None;
        };
        match DeviceKind::try_from(device) {
            Ok(kind) => Some((frame.station_hash(), kind, info)),
            Err(e) => {
                warn!(error = %e, "Ignoring device notice");
                None
            }
        }
    }

    fn on_device_connected(&mut self, frame: &RawFrame) {
        let Some((hash, kind, info)) = Self::split_device_frame(frame) else {
            return;
        };

        if kind == DeviceKind::Dongle {
            self.dongle.connected = true;
            info!("Secure dongle connected");
            return;
        }

        let Some(hash) = hash else {
            warn!(?kind, "Station device connected without a station hash");
            return;
        };

        if kind == DeviceKind::Draxboard {
            let firmware_slot = info.get(2).copied().unwrap_or(0);
            let index = self.registry.bind_on_connect(hash, firmware_slot);
            info!(%hash, slot = ?index.map(StationIndex::get), "Draxboard connected");
        }

        let Some(station) = self.registry.lookup_by_hash_mut(hash) else {
            warn!(?kind, %hash, "Device connected before its station's draxboard");
            return;
        };
        if let Some(device) = station.device_mut(kind) {
            device.connect(info);
            debug!(?kind, %hash, "Device connected");
        }
    }

    fn on_device_disconnected(&mut self, frame: &RawFrame) {
        let Some((hash, kind, _)) = Self::split_device_frame(frame) else {
            return;
        };

        if kind == DeviceKind::Dongle {
            self.dongle.connected = false;
            info!("Secure dongle disconnected");
            return;
        }

        let station = hash.and_then(|hash| self.registry.lookup_by_hash_mut(hash));
        match station.and_then(|station| station.device_mut(kind)) {
            Some(device) => {
                device.disconnect();
                info!(?kind, hash = ?hash.map(StationHash::get), "Device disconnected");
            }
            None => warn!(?kind, "Disconnect for a device on an unknown station"),
        }
    }

    fn on_dongle_data(&mut self, body: &[u8]) {
        if self.dongle.received.is_full() {
            let _ = self.dongle.received.pop_front();
            warn!("Dongle receive queue full, dropped oldest packet");
        }
        let _ = self.dongle.received.push_back(body.to_vec());
    }

    // ── Station lookup ──────────────────────────────────────────

    fn bound_hash(&self, index: StationIndex) -> Option<StationHash> {
        let hash = self.registry.hash_for_index(index);
        if hash.is_none() {
            warn!(slot = %index, "No station bound to slot, run calibration");
        }
        hash
    }

    fn send_to_station(&mut self, index: StationIndex, event: EventId, payload: &[u8]) -> bool {
        match self.bound_hash(index) {
            Some(hash) => self.outbound.enqueue(event, payload, Some(hash)),
            None => false,
        }
    }

    pub fn assign_station(&mut self, hash: u32, index: usize) -> bool {
        match self.registry.assign(hash, index) {
            Ok(_) => true,
            Err(e) => {
                warn!(hash, index, error = %e, "Station assignment rejected");
                false
            }
        }
    }

    pub fn station_hash(&self, index: StationIndex) -> Option<StationHash> {
        self.registry.hash_for_index(index)
    }

    pub fn station(&self, index: StationIndex) -> Option<&StationState> {
        self.registry.lookup_by_index(index)
    }

    pub fn snapshot(&self, index: StationIndex) -> Option<StationSnapshot> {
        self.station(index).map(StationState::snapshot)
    }

    pub fn registry(&self) -> &StationRegistry {
        &self.registry
    }

    // ── General ─────────────────────────────────────────────────

    pub fn request_connected_devices(&mut self) {
        self.outbound
            .enqueue(EventId::RetrieveConnectedDevices, &[], None);
    }

    pub fn send_dongle_packet(&mut self, packet: &[u8]) -> bool {
        self.outbound.enqueue(EventId::DongleData, packet, None)
    }

    pub fn take_dongle_packet(&mut self) -> Option<Vec<u8>> {
        self.dongle.received.pop_front()
    }

    pub fn dongle_connected(&self) -> bool {
        self.dongle.connected
    }

    // ── Draxboard ───────────────────────────────────────────────

    pub fn enable_output(&mut self, index: StationIndex, output: DraxOutput) -> bool {
        self.send_to_station(index, EventId::DraxOutputBitEnable, &output.mask().to_be_bytes())
    }

    pub fn disable_output(&mut self, index: StationIndex, output: DraxOutput) -> bool {
        self.send_to_station(index, EventId::DraxOutputBitDisable, &output.mask().to_be_bytes())
    }

    pub fn send_meter_ticks(&mut self, index: StationIndex, meter: HardMeter, ticks: u16) -> bool {
        let [hi, lo] = ticks.to_be_bytes();
        self.send_to_station(index, EventId::DraxHardMeter, &[meter as u8, hi, lo])
    }

    pub fn button_held(&self, index: StationIndex, button: Button) -> bool {
        self.station(index)
            .is_some_and(|station| station.draxboard.is_held(button.mask()))
    }

    pub fn button_down(&self, index: StationIndex, button: Button) -> bool {
        self.station(index)
            .is_some_and(|station| station.draxboard.is_pressed(button.mask()))
    }

    pub fn button_up(&self, index: StationIndex, button: Button) -> bool {
        self.station(index)
            .is_some_and(|station| station.draxboard.is_released(button.mask()))
    }

    /// First station, in first-seen order, that pressed `button` this tick.
    pub fn button_down_any(&self, button: Button) -> Option<StationHash> {
        self.registry
            .stations()
            .find(|station| station.draxboard.is_pressed(button.mask()))
            .map(StationState::hash)
    }

    pub fn button_up_any(&self, button: Button) -> Option<StationHash> {
        self.registry
            .stations()
            .find(|station| station.draxboard.is_released(button.mask()))
            .map(StationState::hash)
    }

    pub fn output_state(&self, index: StationIndex) -> Option<u32> {
        self.station(index).map(|station| station.draxboard.output_state())
    }

    pub fn firmware_version(&self, index: StationIndex) -> Option<FirmwareVersion> {
        self.station(index).map(|station| station.draxboard.firmware())
    }

    pub fn meter_error(&self, index: StationIndex) -> Option<u8> {
        self.station(index).map(|station| station.draxboard.meter_error())
    }

    pub fn draxboard_connected(&self, index: StationIndex) -> bool {
        self.station(index)
            .is_some_and(|station| station.draxboard.is_connected())
    }

    // ── Joystick ────────────────────────────────────────────────

    pub fn horizontal_axis(&self, index: StationIndex) -> f32 {
        self.station(index)
            .map_or(0.0, |station| station.joystick.horizontal())
    }

    pub fn vertical_axis(&self, index: StationIndex) -> f32 {
        self.station(index)
            .map_or(0.0, |station| station.joystick.vertical())
    }

    /// Sum of every slot's horizontal axis, clamped to `[-1, 1]`.
    pub fn all_horizontal(&self) -> f32 {
        StationIndex::all()
            .map(|index| self.horizontal_axis(index))
            .sum::<f32>()
            .clamp(-1.0, 1.0)
    }

    pub fn all_vertical(&self) -> f32 {
        StationIndex::all()
            .map(|index| self.vertical_axis(index))
            .sum::<f32>()
            .clamp(-1.0, 1.0)
    }

    pub fn joystick_type(&self, index: StationIndex) -> Option<JoystickType> {
        self.station(index).map(|station| station.joystick.joystick_type())
    }

    pub fn calibration(&self, index: StationIndex) -> JoystickCalibration {
        self.registry.calibration(index)
    }

    fn update_calibration(
        &mut self,
        index: StationIndex,
        change: impl FnOnce(&mut JoystickCalibration),
    ) {
        let mut calibration = self.registry.calibration(index);
        change(&mut calibration);
        self.registry.set_calibration(index, calibration);
    }

    pub fn set_deadzone(&mut self, index: StationIndex, deadzone: f32) {
        let deadzone = deadzone.clamp(0.0, 1.0);
        self.update_calibration(index, |cal| cal.deadzone = deadzone);
    }

    pub fn set_swap_axes(&mut self, index: StationIndex, swap: bool) {
        self.update_calibration(index, |cal| cal.swap_axes = swap);
    }

    pub fn set_invert_x(&mut self, index: StationIndex, invert: bool) {
        self.update_calibration(index, |cal| cal.invert_x = invert);
    }

    pub fn set_invert_y(&mut self, index: StationIndex, invert: bool) {
        self.update_calibration(index, |cal| cal.invert_y = invert);
    }

    pub fn save_settings(&self) -> bool {
        settings::save_from(&self.config.storage.settings_path, &self.registry)
    }

    // ── Bill acceptor ───────────────────────────────────────────

    pub fn accept_bill(&mut self, index: StationIndex) -> bool {
        self.send_to_station(index, EventId::BillAcceptEscrow, &[])
    }

    pub fn reject_bill(&mut self, index: StationIndex) -> bool {
        self.send_to_station(index, EventId::BillRejectEscrow, &[])
    }

    pub fn set_bill_acceptor_idle(&mut self, index: StationIndex) -> bool {
        self.send_to_station(index, EventId::BillAcceptorIdle, &[])
    }

    pub fn set_bill_acceptor_inhibit(&mut self, index: StationIndex) -> bool {
        self.send_to_station(index, EventId::BillAcceptorInhibit, &[])
    }

    pub fn reset_bill_acceptor(&mut self, index: StationIndex) -> bool {
        self.send_to_station(index, EventId::BillAcceptorReset, &[])
    }

    pub fn request_bill_acceptor_state(&mut self, index: StationIndex) -> bool {
        self.send_to_station(index, EventId::BillAcceptorState, &[])
    }

    pub fn bill_acceptor_state(&self, index: StationIndex) -> Option<BillAcceptorState> {
        self.station(index).map(|station| station.bill_acceptor.state())
    }

    pub fn bill_acceptor_type(&self, index: StationIndex) -> Option<u8> {
        self.station(index)
            .map(|station| station.bill_acceptor.acceptor_type())
    }

    pub fn drain_bill_events(&mut self, index: StationIndex) -> Vec<BillEvent> {
        self.registry
            .lookup_by_index_mut(index)
            .map(|station| station.bill_acceptor.drain_events())
            .unwrap_or_default()
    }

    // ── Printer ─────────────────────────────────────────────────

    /// Queues a ticket command and takes the station's print gate. Nothing is
    /// queued and the gate stays open when the command cannot be queued.
    fn submit_print(
        &mut self,
        index: StationIndex,
        job: PrintJob,
        text: Option<TicketText>,
    ) -> bool {
        let Some(hash) = self.bound_hash(index) else {
            return false;
        };
        let Some(station) = self.registry.lookup_by_hash_mut(hash) else {
            return false;
        };
        if station.printer.is_job_in_flight() {
            warn!(?job, slot = %index, "Previous print job has not completed");
            return false;
        }
        let Some(text) = text else {
            warn!(?job, slot = %index, "Ticket text too long or not ASCII");
            return false;
        };
        if !self.outbound.enqueue(job.event_id(), text.as_bytes(), Some(hash)) {
            return false;
        }
        station.printer.try_begin_job(job)
    }

    pub fn print_voucher(
        &mut self,
        index: StationIndex,
        credits: &str,
        validation: &str,
        printed_at: &NaiveDateTime,
    ) -> bool {
        let text = voucher_text(credits, index.number(), validation, printed_at);
        self.submit_print(index, PrintJob::Voucher, text)
    }

    /// Reprints a voucher with its original timestamp.
    pub fn print_reprint(
        &mut self,
        index: StationIndex,
        credits: &str,
        validation: &str,
        originally_printed_at: &NaiveDateTime,
    ) -> bool {
        let text = voucher_text(credits, index.number(), validation, originally_printed_at);
        self.submit_print(index, PrintJob::Reprint, text)
    }

    pub fn print_test(&mut self, index: StationIndex) -> bool {
        let text = timestamp_text(&Local::now().naive_local());
        self.submit_print(index, PrintJob::Test, text)
    }

    pub fn print_audit(&mut self, index: StationIndex, body: &str) -> bool {
        self.submit_print(index, PrintJob::Audit, free_text(body))
    }

    pub fn print_code_exchange(&mut self, index: StationIndex, body: &str) -> bool {
        self.submit_print(index, PrintJob::CodeExchange, free_text(body))
    }

    /// Operator release of a print gate whose completion never arrived.
    pub fn clear_print_job(&mut self, index: StationIndex) -> bool {
        let Some(station) = self.registry.lookup_by_index_mut(index) else {
            return false;
        };
        match station.printer.clear_job() {
            Some(job) => {
                info!(?job, slot = %index, "Print job cleared by operator");
                true
            }
            None => false,
        }
    }

    pub fn request_printer_state(&mut self, index: StationIndex) -> bool {
        self.send_to_station(index, EventId::PrinterState, &[])
    }

    pub fn print_job_in_flight(&self, index: StationIndex) -> bool {
        self.station(index)
            .is_some_and(|station| station.printer.is_job_in_flight())
    }

    pub fn printer_type(&self, index: StationIndex) -> Option<PrinterType> {
        self.station(index).map(|station| station.printer.printer_type())
    }

    pub fn printer_status(&self, index: StationIndex) -> Option<u32> {
        self.station(index).map(|station| station.printer.status())
    }

    pub fn paper_status(&self, index: StationIndex) -> Option<PaperStatus> {
        self.station(index).map(|station| station.printer.paper())
    }

    // ── Plumbing ────────────────────────────────────────────────

    pub fn inbound_mailbox(&self) -> &Mailbox {
        &self.inbound_mailbox
    }

    pub fn outbound_mailbox(&self) -> &Mailbox {
        &self.outbound_mailbox
    }

    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

/// Applies one station-scoped event. `payload` follows the station hash.
fn apply_station_event(
    station: &mut StationState,
    event: EventId,
    mut payload: &[u8],
) -> Result<(), ProtocolError> {
    match event {
        EventId::DraxInput => {
            require_len(payload, 2)?;
            station.draxboard.apply_input(payload.get_u16());
        }
        EventId::DraxOutputState => {
            require_len(payload, 4)?;
            station.draxboard.set_output_state(payload.get_u32_le());
        }
        EventId::DraxMeterError => {
            require_len(payload, 1)?;
            let code = payload.get_u8();
            if code != 0 {
                warn!(hash = %station.hash(), code, "Hard meter error");
            }
            station.draxboard.set_meter_error(code);
        }
        EventId::JoystickInput => {
            require_len(payload, 2)?;
            let x = payload.get_u8();
            let y = payload.get_u8();
            station.joystick.set_from_raw(x, y);
        }
        EventId::PrintComplete => {
            let job = station.printer.finish_job(true);
            debug!(hash = %station.hash(), ?job, "Print completed");
        }
        EventId::PrintError => {
            let reported = payload.first().copied().and_then(PrintJob::from_event_byte);
            let job = station.printer.finish_job(false);
            warn!(hash = %station.hash(), ?job, ?reported, "Print failed");
        }
        EventId::PrinterState => {
            require_len(payload, 6)?;
            let printer_type = payload.get_u8();
            let status = payload.get_u32();
            let paper = payload.get_u8();
            station.printer.apply_status(printer_type, status, paper);
        }
        EventId::BillInserted | EventId::BillAccepted | EventId::BillRejected
        | EventId::BillReturned => {
            let kind = match event {
                EventId::BillInserted => BillEventKind::Inserted,
                EventId::BillAccepted => BillEventKind::Stacked,
                EventId::BillRejected => BillEventKind::Rejected,
                _ => BillEventKind::Returned,
            };
            station.bill_acceptor.on_event(kind, payload.first().copied());
        }
        EventId::BillAcceptorState => {
            require_len(payload, 1)?;
            let byte = payload.get_u8();
            if !station.bill_acceptor.set_reported_state(byte) {
                warn!(hash = %station.hash(), state = byte, "Unknown bill acceptor state");
            }
        }
        _ => {}
    }
    Ok(())
}
