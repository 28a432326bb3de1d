//! Integration tests for the acquisition state machine as driven through
//! `DeviceSession`: legality checks, the HV confirmation gate, device errors
//! and lost links.

use chrono::{DateTime, Duration, Local, TimeZone};
use detector_session::config::SessionConfig;
use detector_session::effects::{notifications, transmitted, ConfirmId, Effect};
use detector_session::session::{DeviceSession, UserIntent};
use detector_session::state::{AcquisitionMode, ControlUnitStatus, HvStatus};

fn at(ms: i64) -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap() + Duration::milliseconds(ms)
}

/// Connected session with a healthy control unit and HV in range.
fn ready_session() -> DeviceSession {
    let mut session = DeviceSession::new(&SessionConfig::default(), at(0));
    session.on_transport_opened(at(0));
    session.dispatch(r#"{"action":"connected","value":"{\"type\":0}"}"#, at(0));
    session.dispatch(r#"{"action":"fpga_hv","value":"1"}"#, at(0));
    session
}

fn confirm_id(effects: &[Effect]) -> ConfirmId {
    effects
        .iter()
        .find_map(|effect| match effect {
            Effect::Confirm(request) => Some(request.id),
            _ => None,
        })
        .expect("expected a confirmation request")
}

#[test]
fn test_at_most_one_mode_active() {
    let mut session = ready_session();
    session.apply(UserIntent::ToggleAcquisition, at(10));
    assert_eq!(session.state().mode, AcquisitionMode::Acquiring);

    let effects = session.apply(UserIntent::ToggleStreaming, at(20));
    assert!(transmitted(&effects).is_empty());
    assert_eq!(session.state().mode, AcquisitionMode::Acquiring);

    let effects = session.apply(UserIntent::RecordBackground, at(30));
    assert!(transmitted(&effects).is_empty());
    assert_eq!(session.state().mode, AcquisitionMode::Acquiring);
}

#[test]
fn test_toggle_acquisition_twice_returns_to_idle() {
    let mut session = ready_session();
    let start = session.apply(UserIntent::ToggleAcquisition, at(10));
    assert_eq!(transmitted(&start), vec!["measure_start"]);
    assert_eq!(notifications(&start), vec!["DAQ starting..."]);

    let stop = session.apply(UserIntent::ToggleAcquisition, at(20));
    assert_eq!(transmitted(&stop), vec!["measure_stop"]);
    assert_eq!(session.state().mode, AcquisitionMode::Idle);
}

#[test]
fn test_alarm_blocks_start() {
    let mut session = ready_session();
    session.dispatch(r#"{"action":"device_status","value":"{\"type\":3}"}"#, at(5));
    let effects = session.apply(UserIntent::ToggleAcquisition, at(10));
    assert!(transmitted(&effects).is_empty());
    assert_eq!(
        notifications(&effects),
        vec!["Internal error! CLEAR ALARMS and try again"]
    );
    assert_eq!(session.state().mode, AcquisitionMode::Idle);
}

#[test]
fn test_hv_off_start_accepted() {
    let mut session = ready_session();
    session.dispatch(r#"{"action":"fpga_hv","value":"0"}"#, at(5));
    assert_eq!(session.state().hv, Some(HvStatus::Off));

    let effects = session.apply(UserIntent::ToggleAcquisition, at(10));
    assert!(transmitted(&effects).is_empty());
    assert_eq!(session.state().mode, AcquisitionMode::Idle);

    let effects = session.resolve_confirmation(confirm_id(&effects), true, at(20));
    assert_eq!(transmitted(&effects), vec!["measure_start"]);
    assert_eq!(session.state().mode, AcquisitionMode::Acquiring);
}

#[test]
fn test_hv_off_start_declined() {
    let mut session = ready_session();
    session.dispatch(r#"{"action":"fpga_hv","value":"0"}"#, at(5));

    let effects = session.apply(UserIntent::ToggleAcquisition, at(10));
    let effects = session.resolve_confirmation(confirm_id(&effects), false, at(20));
    assert!(transmitted(&effects).is_empty());
    assert_eq!(notifications(&effects), vec!["Aborted"]);
    assert_eq!(session.state().mode, AcquisitionMode::Idle);
}

#[test]
fn test_device_error_during_run_saves_notes_then_stops() {
    let mut session = ready_session();
    session.apply(UserIntent::ToggleAcquisition, at(10));

    let effects = session.dispatch(
        r#"{"action":"update_error_list","type":7,"value":"HV trip"}"#,
        at(1000),
    );
    assert_eq!(transmitted(&effects), vec!["log_save_notes", "measure_stop"]);

    let notes = effects[..]
        .iter()
        .find_map(Effect::as_command)
        .and_then(|command| command.payload.clone())
        .unwrap();
    assert_eq!(notes["notes"], "RUN STOPPED BY INTERNAL ERROR: HV trip");
    assert!(notes["errors"].as_str().unwrap().contains("ERROR: HV trip"));

    let state = session.state();
    assert_eq!(state.mode, AcquisitionMode::Idle);
    assert_eq!(state.control_unit, ControlUnitStatus::Alarm(7));
}

#[test]
fn test_device_warning_does_not_stop_run() {
    let mut session = ready_session();
    session.apply(UserIntent::ToggleStreaming, at(10));
    let effects = session.dispatch(
        r#"{"action":"update_error_list","type":99,"value":"fan slow"}"#,
        at(100),
    );
    assert!(transmitted(&effects).is_empty());
    assert_eq!(session.state().mode, AcquisitionMode::Streaming);
    assert_eq!(session.state().control_unit, ControlUnitStatus::Ok);
}

#[test]
fn test_liveness_timeout_while_acquiring() {
    let mut session = ready_session();
    session.dispatch(r#"{"action":"watchdog"}"#, at(1000));
    session.apply(UserIntent::ToggleAcquisition, at(1500));

    // Nothing due before the 6 s timeout.
    assert!(session.on_timers(at(6999)).is_empty());

    let effects = session.on_timers(at(7000));
    assert!(effects.contains(&Effect::CloseTransport));
    assert!(notifications(&effects)
        .iter()
        .any(|message| message.starts_with("DAQ aborted by unexpected disconnection!")));

    let state = session.state();
    assert_eq!(state.mode, AcquisitionMode::Idle);
    assert_eq!(state.control_unit, ControlUnitStatus::Unknown);
    assert_eq!(state.hv, Some(HvStatus::Unknown));
    assert!(!session.is_connected());
}

#[test]
fn test_commands_after_disconnect_are_refused() {
    let mut session = ready_session();
    session.on_transport_closed("reset by peer");

    let effects = session.apply(UserIntent::ResetCounters, at(100));
    assert!(transmitted(&effects).is_empty());
    assert_eq!(
        notifications(&effects),
        vec!["Connection error! The device is not reachable"]
    );
}

#[test]
fn test_device_end_of_run_offers_save() {
    let mut session = ready_session();
    session.apply(UserIntent::ToggleAcquisition, at(10));
    session.dispatch(r#"{"action":"DAQ_end"}"#, at(5000));
    assert_eq!(session.state().mode, AcquisitionMode::Idle);

    let effects = session.apply(
        UserIntent::SaveRun {
            notes: "beam test".into(),
        },
        at(6000),
    );
    assert_eq!(transmitted(&effects), vec!["log_save_notes"]);
}

#[test]
fn test_background_run_stops_on_its_own() {
    let mut session = ready_session();
    let effects = session.apply(UserIntent::RecordBackground, at(10));
    assert_eq!(transmitted(&effects), vec!["bkg_measure_start"]);

    let effects = session.apply(UserIntent::Stop, at(20));
    assert!(transmitted(&effects).is_empty());
    assert_eq!(session.state().mode, AcquisitionMode::BackgroundAcquiring);

    session.dispatch(r#"{"action":"save_background","value":"bkg_2024"}"#, at(30_000));
    assert_eq!(session.state().mode, AcquisitionMode::Idle);

    let effects = session.apply(UserIntent::SaveBackground { name: "dark".into() }, at(31_000));
    assert_eq!(transmitted(&effects), vec!["log_rename_background"]);
}
