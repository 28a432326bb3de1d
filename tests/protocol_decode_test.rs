//! Inbound decoding and outbound encoding against the device wire format.

use detector_session::calibration::CalibrationKind;
use detector_session::catalog::{FileCatalogKind, ListPresentation, RunKind};
use detector_session::error::SessionError;
use detector_session::protocol::{
    decode, ActionKind, Command, InboundMessage, PlotSource, PlotTarget, PlotView,
};
use serde_json::Value;

#[test]
fn test_every_action_name_round_trips() {
    for kind in ActionKind::ALL {
        assert_eq!(ActionKind::from_action(kind.as_str()), Some(kind));
    }
}

#[test]
fn test_unknown_action_rejected() {
    let err = decode(r#"{"action":"firmware_update","value":"1"}"#).unwrap_err();
    assert!(matches!(err, SessionError::UnknownAction(ref name) if name == "firmware_update"));
}

#[test]
fn test_missing_action_rejected() {
    assert!(matches!(
        decode(r#"{"value":"1"}"#).unwrap_err(),
        SessionError::MissingAction
    ));
}

#[test]
fn test_not_json_is_decode_error() {
    assert!(decode("watchdog").unwrap_err().is_decode_error());
}

#[test]
fn test_unknown_hv_code_is_malformed() {
    let err = decode(r#"{"action":"fpga_hv","value":"7"}"#).unwrap_err();
    assert!(matches!(err, SessionError::MalformedPayload { .. }));
}

#[test]
fn test_stored_integral_plot() {
    let (kind, message) = decode(r#"{"action":"load_int_2_diff","value":"[1,2,3]"}"#).unwrap();
    assert_eq!(kind, ActionKind::LoadInt2Diff);
    match message {
        InboundMessage::Plot(update) => {
            assert_eq!(
                update.target,
                PlotTarget::Integral {
                    channel: 2,
                    view: PlotView::Differential
                }
            );
            assert_eq!(update.source, PlotSource::Stored);
            assert_eq!(update.data, serde_json::json!([1, 2, 3]));
        }
        other => panic!("unexpected message {other:?}"),
    }
}

#[test]
fn test_run_list_zips_notes() {
    let raw = r#"{"action":"int_run_list","value":"{\"run_list\":[\"r1\",\"r2\"],\"notes_list\":[\"first\",\"second\"]}"}"#;
    let (_, message) = decode(raw).unwrap();
    match message {
        InboundMessage::RunList { kind, entries } => {
            assert_eq!(kind, RunKind::Integral);
            assert_eq!(entries.len(), 2);
            assert_eq!(entries[1].name, "r2");
            assert_eq!(entries[1].notes, "second");
        }
        other => panic!("unexpected message {other:?}"),
    }
}

#[test]
fn test_calibration_list_presentation() {
    let raw = r#"{"action":"update_range_calib_list_init","value":"{\"list\":[\"z_a\"]}"}"#;
    let (_, message) = decode(raw).unwrap();
    assert_eq!(
        message,
        InboundMessage::FileList {
            catalog: FileCatalogKind::RangeCalibration,
            presentation: ListPresentation::Init,
            files: vec!["z_a".to_string()],
        }
    );
}

#[test]
fn test_logger_commands_carry_channel() {
    let frame = Command::scan_calibrations(CalibrationKind::Position, false)
        .encode()
        .unwrap();
    let value: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["action"], "log_scan_profile_calib_files");
    assert_eq!(value["channel"], "logger");
    assert!(value.get("value").is_none());
}

#[test]
fn test_structured_payload_sent_as_json_text() {
    let frame = Command::edit_notes("run_7", "old", "new").encode().unwrap();
    let value: Value = serde_json::from_str(&frame).unwrap();
    let inner: Value = serde_json::from_str(value["value"].as_str().unwrap()).unwrap();
    assert_eq!(inner["notes_filename"], "run_7");
    assert_eq!(inner["new_notes"], "new");
}
