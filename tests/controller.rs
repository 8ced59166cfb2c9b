mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::*;
use vent_control::config::IndicatorTiming;
use vent_control::output::SimulatedDriver;
use vent_control::{Action, Device, Error, Reply, Status};

#[test]
fn open_runs_full_pulse_and_commits() {
    let h = Harness::new(fast_config(), Status::Closed, ScriptedSensor::steady(72.0));

    let reply = h.controller.submit_command(Device::Shutter, Action::Open).unwrap();
    assert_eq!(
        reply,
        Reply::Initiated {
            device: Device::Shutter,
            action: Action::Open
        }
    );
    assert_eq!(h.controller.query_status(Device::Shutter), Status::Live);

    assert!(wait_until(PATIENCE, || h.controller.query_status(Device::Shutter) == Status::Open));
    assert_eq!(
        h.motors.history(),
        vec![(SHUTTER_OPEN, true), (SHUTTER_OPEN, false)]
    );
    assert!(wait_until(PATIENCE, || h.controller.active_motor_count() == 0));
    assert!(h.events.contains("COMPLETE: OPEN operation completed for Shutter"));
}

#[test]
fn repeated_command_is_idempotent() {
    let h = Harness::new(fast_config(), Status::Open, ScriptedSensor::steady(72.0));

    let reply = h.controller.submit_command(Device::Sidewall, Action::Open).unwrap();
    assert_eq!(
        reply,
        Reply::Already {
            device: Device::Sidewall,
            action: Action::Open
        }
    );
    assert_eq!(reply.to_string(), "Sidewall is already open.");
    thread::sleep(Duration::from_millis(50));
    assert!(h.motors.history().is_empty());
}

#[test]
fn close_is_idempotent_against_closed_status() {
    let h = Harness::new(fast_config(), Status::Closed, ScriptedSensor::steady(72.0));
    let reply = h.controller.submit_command(Device::Shutter, Action::Close).unwrap();
    assert!(matches!(reply, Reply::Already { .. }));
    assert!(h.motors.history().is_empty());
}

#[test]
fn same_action_while_live_is_not_restarted() {
    let h = Harness::new(fast_config(), Status::Closed, ScriptedSensor::steady(72.0));
    h.controller.submit_command(Device::Shutter, Action::Open).unwrap();
    let reply = h.controller.submit_command(Device::Shutter, Action::Open).unwrap();
    assert!(matches!(reply, Reply::Already { .. }));

    assert!(wait_until(PATIENCE, || h.controller.query_status(Device::Shutter) == Status::Open));
    assert_eq!(h.pulses(), vec![SHUTTER_OPEN]);
}

#[test]
fn opposite_command_supersedes_in_flight_pulse() {
    let h = Harness::new(fast_config(), Status::Closed, ScriptedSensor::steady(72.0));

    h.controller.submit_command(Device::Shutter, Action::Open).unwrap();
    assert!(wait_until(PATIENCE, || h.motors.level(SHUTTER_OPEN)));

    let reply = h.controller.submit_command(Device::Shutter, Action::Close).unwrap();
    assert_eq!(
        reply,
        Reply::Switching {
            device: Device::Shutter,
            action: Action::Close
        }
    );

    assert!(wait_until(PATIENCE, || h.controller.query_status(Device::Shutter) == Status::Closed));
    assert!(!h.motors.level(SHUTTER_OPEN));
    assert!(!h.motors.level(SHUTTER_CLOSE));
    assert!(h.events.contains("Operation for Shutter was cancelled"));
    // The open pulse was cut short and never committed.
    assert!(!h.events.contains("COMPLETE: OPEN"));
    assert!(wait_until(PATIENCE, || h.controller.active_motor_count() == 0));
    assert!(wait_until(PATIENCE, || h
        .controller
        .intended_action(Device::Shutter)
        .is_none()));
}

#[test]
fn devices_run_in_parallel() {
    let h = Harness::new(fast_config(), Status::Closed, ScriptedSensor::steady(72.0));
    h.controller.submit_command(Device::Shutter, Action::Open).unwrap();
    h.controller.submit_command(Device::Sidewall, Action::Open).unwrap();

    assert!(wait_until(PATIENCE, || h.motors.level(SHUTTER_OPEN)
        && h.motors.level(SIDEWALL_OPEN)));
    assert_eq!(h.controller.active_motor_count(), 2);

    assert!(wait_until(PATIENCE, || {
        h.controller.query_status(Device::Shutter) == Status::Open
            && h.controller.query_status(Device::Sidewall) == Status::Open
    }));
    assert!(wait_until(PATIENCE, || h.controller.active_motor_count() == 0));
}

#[test]
fn counter_returns_to_zero_after_churn() {
    let h = Harness::new(fast_config(), Status::Closed, ScriptedSensor::steady(72.0));
    let actions = [Action::Open, Action::Close];
    for round in 0..6 {
        for device in Device::ALL {
            let _ = h
                .controller
                .submit_command(device, actions[(round + device.index()) % 2])
                .unwrap();
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(wait_until(PATIENCE, || h.controller.active_motor_count() == 0));
    assert!(wait_until(PATIENCE, || Device::ALL
        .iter()
        .all(|&d| h.controller.query_status(d) != Status::Live)));
    assert!(wait_until(PATIENCE, || Device::ALL
        .iter()
        .all(|&d| h.controller.intended_action(d).is_none())));
}

#[test]
fn cancel_leaves_status_live() {
    let h = Harness::new(fast_config(), Status::Closed, ScriptedSensor::steady(72.0));
    h.controller.submit_command(Device::Sidewall, Action::Open).unwrap();
    assert!(wait_until(PATIENCE, || h.motors.level(SIDEWALL_OPEN)));

    assert!(h.controller.cancel(Device::Sidewall));
    assert!(wait_until(PATIENCE, || !h.motors.level(SIDEWALL_OPEN)));
    assert!(wait_until(PATIENCE, || h.controller.active_motor_count() == 0));
    assert_eq!(h.controller.query_status(Device::Sidewall), Status::Live);
    assert!(h.events.contains("Cancellation signal sent for Sidewall."));
}

#[test]
fn cancel_without_operation_is_logged() {
    let h = Harness::new(fast_config(), Status::Closed, ScriptedSensor::steady(72.0));
    assert!(!h.controller.cancel(Device::Shutter));
    assert!(h.events.contains("No operation to cancel for Shutter."));
}

#[test]
fn invalid_commands_are_rejected_synchronously() {
    let h = Harness::new(fast_config(), Status::Closed, ScriptedSensor::steady(72.0));
    assert!(matches!(
        h.controller.command("Slug Shutter", "wiggle"),
        Err(Error::Config(_))
    ));
    assert!(matches!(
        h.controller.command("Barn Door", "open"),
        Err(Error::Config(_))
    ));
    thread::sleep(Duration::from_millis(50));
    assert!(h.motors.history().is_empty());
    assert_eq!(h.controller.query_status(Device::Shutter), Status::Closed);
}

#[test]
fn output_failure_leaves_live_and_releases_counter() {
    let config = fast_config();
    let h = Harness::with_motors(
        config,
        Status::Closed,
        ScriptedSensor::steady(72.0),
        Arc::new(FailingDriver),
        Arc::new(SimulatedDriver::new()),
    );
    h.controller.submit_command(Device::Shutter, Action::Open).unwrap();

    assert!(wait_until(PATIENCE, || h
        .events
        .contains("ERROR: Exception in shutter operation for Shutter during open")));
    assert!(wait_until(PATIENCE, || h.controller.active_motor_count() == 0));
    assert_eq!(h.controller.query_status(Device::Shutter), Status::Live);
    assert!(wait_until(PATIENCE, || h
        .controller
        .intended_action(Device::Shutter)
        .is_none()));
}

#[test]
fn manual_command_retires_automatic_loop() {
    let h = Harness::new(fast_config(), Status::Automatic, ScriptedSensor::steady(72.0));
    h.controller.enter_automatic(Device::Shutter).unwrap();
    assert!(h.controller.is_automatic_running(Device::Shutter));

    h.controller.submit_command(Device::Shutter, Action::Close).unwrap();
    assert!(!h.controller.is_automatic_running(Device::Shutter));
    assert!(h.events.contains("Automatic control stopping for Shutter"));

    assert!(wait_until(PATIENCE, || h.controller.query_status(Device::Shutter) == Status::Closed));
    assert!(wait_until(PATIENCE, || h
        .events
        .contains("Automatic control thread for Shutter is exiting")));
}

#[test]
fn automatic_command_cancels_manual_pulse() {
    let h = Harness::new(fast_config(), Status::Closed, ScriptedSensor::steady(72.0));
    h.controller.submit_command(Device::Sidewall, Action::Open).unwrap();
    assert!(wait_until(PATIENCE, || h.motors.level(SIDEWALL_OPEN)));

    let reply = h.controller.command("sidewall", "automatic").unwrap();
    assert_eq!(reply.to_string(), "Sidewall set to automatic mode.");
    assert!(wait_until(PATIENCE, || !h.motors.level(SIDEWALL_OPEN)));
    assert_eq!(h.controller.query_status(Device::Sidewall), Status::Automatic);
    assert!(h.controller.is_automatic_running(Device::Sidewall));
    assert!(!h.events.contains("COMPLETE: OPEN operation completed for Sidewall"));
}

#[test]
fn superseded_during_start_sequence_never_drives_motor() {
    let mut config = fast_config();
    config.indicator = IndicatorTiming {
        flash: Duration::from_millis(100),
        flashes: 2,
        blink: Duration::from_millis(2),
        blinks: 1,
        debounce: Duration::from_millis(20),
    };
    let h = Harness::new(config, Status::Live, ScriptedSensor::steady(72.0));

    h.controller.submit_command(Device::Shutter, Action::Open).unwrap();
    let reply = h.controller.submit_command(Device::Shutter, Action::Close).unwrap();
    assert!(matches!(reply, Reply::Switching { .. }));

    assert!(wait_until(PATIENCE, || h.controller.query_status(Device::Shutter) == Status::Closed));
    assert_eq!(h.pulses(), vec![SHUTTER_CLOSE]);
    assert!(wait_until(PATIENCE, || h
        .events
        .contains("Operation for Shutter was cancelled before the motor started.")));
    assert!(wait_until(PATIENCE, || h.controller.active_motor_count() == 0));
}
