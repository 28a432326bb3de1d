//! Duplicate suppression of device errors and warnings.

use chrono::{DateTime, Duration, Local, TimeZone};
use detector_session::config::SessionConfig;
use detector_session::effects::notifications;
use detector_session::session::DeviceSession;

fn at(secs: i64) -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap() + Duration::seconds(secs)
}

fn connected_session() -> DeviceSession {
    let mut session = DeviceSession::new(&SessionConfig::default(), at(0));
    session.on_transport_opened(at(0));
    session.dispatch(r#"{"action":"connected","value":"{\"type\":0}"}"#, at(0));
    session
}

fn warning(session: &mut DeviceSession, message: &str, secs: i64) -> usize {
    let frame = format!(r#"{{"action":"trigger_warning","value":"{message}"}}"#);
    notifications(&session.dispatch(&frame, at(secs))).len()
}

#[test]
fn test_repeat_within_window_suppressed() {
    let mut session = connected_session();
    assert_eq!(warning(&mut session, "fan slow", 0), 1);
    assert_eq!(warning(&mut session, "fan slow", 5), 0);
    assert_eq!(session.errors().len(), 1);
}

#[test]
fn test_repeat_after_window_appended() {
    let mut session = connected_session();
    assert_eq!(warning(&mut session, "fan slow", 0), 1);
    assert_eq!(warning(&mut session, "fan slow", 9), 1);
    assert_eq!(session.errors().len(), 2);
}

#[test]
fn test_window_boundary_is_inclusive() {
    let mut session = connected_session();
    warning(&mut session, "fan slow", 0);
    assert_eq!(warning(&mut session, "fan slow", 8), 0);
}

#[test]
fn test_suppressed_repeat_does_not_extend_window() {
    let mut session = connected_session();
    warning(&mut session, "fan slow", 0);
    warning(&mut session, "fan slow", 6);
    // 9 s after the appended entry, even though only 3 s after the repeat.
    assert_eq!(warning(&mut session, "fan slow", 9), 1);
}

#[test]
fn test_suppressed_error_still_escalates() {
    let mut session = connected_session();
    session.dispatch(
        r#"{"action":"update_error_list","type":4,"value":"overtemp"}"#,
        at(0),
    );
    session.dispatch(r#"{"action":"device_status","value":"{\"type\":0}"}"#, at(1));
    assert!(!session.state().control_unit.is_alarm());
    let effects = session.dispatch(
        r#"{"action":"update_error_list","type":4,"value":"overtemp"}"#,
        at(2),
    );
    assert!(notifications(&effects).is_empty());
    assert!(session.state().control_unit.is_alarm());
    assert_eq!(session.errors().len(), 1);
}
