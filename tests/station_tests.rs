use cabinet_bridge::devices::bill_acceptor::MAX_PENDING_BILL_EVENTS;
use cabinet_bridge::devices::joystick::normalize_axis;
use cabinet_bridge::devices::printer::{free_text, voucher_text, MAX_TICKET_TEXT};
use cabinet_bridge::devices::*;
use cabinet_bridge::protocol::DeviceKind;
use cabinet_bridge::station::DeviceHandle;
use cabinet_bridge::*;
use chrono::NaiveDate;

fn station() -> StationState {
    StationState::new(StationHash::new(0xAABB_CCDD).unwrap())
}

#[cfg(test)]
mod draxboard_tests {
    use super::*;

    #[test]
    fn test_press_and_release_edges() {
        let mut board = Draxboard::new();

        board.apply_input(Button::Shoot.mask());
        assert!(board.is_pressed(Button::Shoot.mask()));
        assert!(board.is_held(Button::Shoot.mask()));
        assert!(!board.is_released(Button::Shoot.mask()));

        board.clear_pulses();
        assert!(!board.is_pressed(Button::Shoot.mask()));
        assert!(board.is_held(Button::Shoot.mask()));

        board.apply_input(0);
        assert!(board.is_released(Button::Shoot.mask()));
        assert!(!board.is_held(Button::Shoot.mask()));
    }

    #[test]
    fn test_pulses_accumulate_within_one_tick() {
        let mut board = Draxboard::new();
        board.apply_input(Button::Shoot.mask());
        board.apply_input(0);

        // Both edges seen before the next clear.
        assert!(board.is_pressed(Button::Shoot.mask()));
        assert!(board.is_released(Button::Shoot.mask()));
        assert_eq!(board.held(), 0);
    }

    #[test]
    fn test_repeated_input_produces_no_edges() {
        let mut board = Draxboard::new();
        board.apply_input(Button::Menu.mask());
        board.clear_pulses();
        board.apply_input(Button::Menu.mask());

        assert!(!board.is_pressed(Button::Menu.mask()));
        assert!(!board.is_released(Button::Menu.mask()));
    }

    #[test]
    fn test_firmware_from_connect_info() {
        let mut board = Draxboard::new();
        board.on_connected(&[6, 14, 1]);
        assert!(board.is_connected());
        assert_eq!(board.firmware(), FirmwareVersion { major: 6, minor: 14 });
        assert_eq!(board.firmware().to_string(), "6.14");
    }
}

#[cfg(test)]
mod joystick_tests {
    use super::*;

    fn plain() -> JoystickCalibration {
        JoystickCalibration {
            deadzone: 0.25,
            swap_axes: false,
            invert_x: false,
            invert_y: false,
        }
    }

    #[test]
    fn test_default_calibration_swaps_axes() {
        let mut stick = Joystick::new();
        stick.set_from_raw(200, 40);
        assert_eq!(stick.raw_axes(), (40, 200));
    }

    #[test]
    fn test_deadzone_recenters_small_deflection() {
        let mut stick = Joystick::new();
        stick.set_calibration(plain());

        stick.set_from_raw(150, 100);
        assert_eq!(stick.horizontal(), 0.0);
        assert_eq!(stick.vertical(), 0.0);

        stick.set_from_raw(255, 0);
        assert!((stick.horizontal() - 0.992_187_5).abs() < 1e-6);
        assert_eq!(stick.vertical(), -1.0);
    }

    #[test]
    fn test_invert_mirrors_axis() {
        let mut stick = Joystick::new();
        stick.set_calibration(JoystickCalibration {
            invert_x: true,
            ..plain()
        });

        stick.set_from_raw(0, 128);
        assert_eq!(stick.raw_axes(), (255, 128));
    }

    #[test]
    fn test_swap_applies_before_invert() {
        let mut stick = Joystick::new();
        stick.set_calibration(JoystickCalibration {
            swap_axes: true,
            invert_x: true,
            ..plain()
        });

        // Raw y lands on x, then x is inverted.
        stick.set_from_raw(128, 10);
        assert_eq!(stick.raw_axes(), (245, 128));
    }

    #[test]
    fn test_disconnect_recenters() {
        let mut stick = Joystick::new();
        stick.set_calibration(plain());
        stick.on_connected(&[2]);
        assert_eq!(stick.joystick_type(), JoystickType::Baolian);

        stick.set_from_raw(0, 0);
        stick.on_disconnected();
        assert!(!stick.is_connected());
        assert_eq!(stick.horizontal(), 0.0);
        assert_eq!(stick.vertical(), 0.0);
    }

    #[test]
    fn test_normalize_midpoints() {
        assert_eq!(normalize_axis(64), -0.5);
        assert_eq!(normalize_axis(192), 0.5);
    }
}

#[cfg(test)]
mod bill_acceptor_tests {
    use super::*;

    #[test]
    fn test_insert_then_stack() {
        let mut acceptor = BillAcceptor::new();
        acceptor.on_connected(&[3]);
        assert_eq!(acceptor.state(), BillAcceptorState::NotInit);
        assert_eq!(acceptor.acceptor_type(), 3);

        acceptor.on_event(BillEventKind::Inserted, Some(20));
        assert_eq!(acceptor.state(), BillAcceptorState::NoteStay);

        acceptor.on_event(BillEventKind::Stacked, Some(20));
        assert_eq!(acceptor.state(), BillAcceptorState::Idle);

        let events = acceptor.drain_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, BillEventKind::Inserted);
        assert_eq!(events[1].value, Some(20));
        assert!(acceptor.drain_events().is_empty());
    }

    #[test]
    fn test_reported_state_byte() {
        let mut acceptor = BillAcceptor::new();
        assert!(acceptor.set_reported_state(5));
        assert_eq!(acceptor.state(), BillAcceptorState::Inhibit);

        assert!(!acceptor.set_reported_state(0x42));
        assert_eq!(acceptor.state(), BillAcceptorState::Inhibit);
    }

    #[test]
    fn test_event_queue_drops_oldest() {
        let mut acceptor = BillAcceptor::new();
        for value in 0..20u8 {
            acceptor.on_event(BillEventKind::Rejected, Some(value));
        }

        let events = acceptor.drain_events();
        assert_eq!(events.len(), MAX_PENDING_BILL_EVENTS);
        assert_eq!(events[0].value, Some(4));
        assert_eq!(events.last().and_then(|e| e.value), Some(19));
    }
}

#[cfg(test)]
mod printer_tests {
    use super::*;

    #[test]
    fn test_single_flight_gate() {
        let mut printer = Printer::new();
        assert!(printer.try_begin_job(PrintJob::Voucher));
        assert!(printer.is_job_in_flight());
        assert!(!printer.try_begin_job(PrintJob::Test));

        assert_eq!(printer.finish_job(true), Some(PrintJob::Voucher));
        assert!(!printer.is_job_in_flight());
        assert!(printer.try_begin_job(PrintJob::Test));
    }

    #[test]
    fn test_error_and_clear_release_gate() {
        let mut printer = Printer::new();
        printer.try_begin_job(PrintJob::Audit);
        assert_eq!(printer.finish_job(false), Some(PrintJob::Audit));

        printer.try_begin_job(PrintJob::Reprint);
        assert_eq!(printer.clear_job(), Some(PrintJob::Reprint));
        assert_eq!(printer.clear_job(), None);

        let state = printer.get_state();
        assert_eq!(state.completed_jobs, 0);
        assert_eq!(state.failed_jobs, 1);
    }

    #[test]
    fn test_connect_resets_paper_and_reads_type() {
        let mut printer = Printer::new();
        printer.apply_status(1, 0, 2);
        assert_eq!(printer.paper(), PaperStatus::Available);

        printer.on_connected(&[2]);
        assert_eq!(printer.paper(), PaperStatus::OutOfPaper);
        assert_eq!(printer.printer_type(), PrinterType::Reliance);

        printer.on_connected(&[]);
        assert_eq!(printer.printer_type(), PrinterType::CustomTg02);
    }

    #[test]
    fn test_status_report() {
        let mut printer = Printer::new();
        printer.apply_status(3, 0x0000_0102, 1);
        assert_eq!(printer.printer_type(), PrinterType::Pyramid);
        assert_eq!(printer.status(), 0x0102);
        assert_eq!(printer.paper(), PaperStatus::Low);
    }

    #[test]
    fn test_print_job_event_ids() {
        assert_eq!(PrintJob::Voucher.event_id(), EventId::PrintVoucher);
        assert_eq!(PrintJob::from_event_byte(0x45), Some(PrintJob::Reprint));
        assert_eq!(PrintJob::from_event_byte(0x46), None);
    }

    #[test]
    fn test_ticket_text_limits() {
        let at = NaiveDate::from_ymd_opt(2024, 12, 31)
            .unwrap()
            .and_hms_opt(23, 59, 58)
            .unwrap();
        let text = voucher_text("10", 10, "X", &at).unwrap();
        assert_eq!(text.as_str(), "10|10|X|2024|12|31|23|59|58");

        assert!(free_text(&"A".repeat(MAX_TICKET_TEXT)).is_some());
        assert!(free_text(&"A".repeat(MAX_TICKET_TEXT + 1)).is_none());
    }
}

#[cfg(test)]
mod station_state_tests {
    use super::*;

    #[test]
    fn test_device_routing_by_kind() {
        let mut state = station();
        assert!(state.device_mut(DeviceKind::Dongle).is_none());

        state.device_mut(DeviceKind::Printer).unwrap().connect(&[1]);
        state.device_mut(DeviceKind::Joystick).unwrap().connect(&[1]);
        assert!(state.printer.is_connected());
        assert!(state.joystick.is_connected());
        assert!(!state.draxboard.is_connected());

        state.device_mut(DeviceKind::Printer).unwrap().disconnect();
        assert!(!state.printer.is_connected());
    }

    #[test]
    fn test_begin_tick_clears_pulses_only() {
        let mut state = station();
        state.draxboard.apply_input(Button::Redeem.mask());
        state.begin_tick();

        assert!(!state.draxboard.is_pressed(Button::Redeem.mask()));
        assert!(state.draxboard.is_held(Button::Redeem.mask()));
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut state = station();
        state.draxboard.apply_input(Button::Shoot.mask());

        let snapshot = state.snapshot();
        assert_eq!(snapshot.hash, 0xAABB_CCDD);
        assert_eq!(snapshot.draxboard.held, 0x0001);

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"held\":1"));
    }
}
