//! Calibration file validation and application.

use chrono::{Local, TimeZone};
use detector_session::calibration::{validate_upload, CalibrationKind, CalibrationUpload};
use detector_session::config::{ChannelGeometry, SessionConfig};
use detector_session::effects::{notifications, transmitted, Effect};
use detector_session::session::{DeviceSession, UserIntent};

fn small_geometry() -> ChannelGeometry {
    ChannelGeometry {
        x: 3,
        y: 3,
        z: 4,
        int: 2,
    }
}

fn range_file(rows: usize) -> String {
    let mut content = String::from("channel\tfactor\n");
    for channel in 1..=rows {
        content.push_str(&format!("{channel}\t1.{channel}\n"));
    }
    content
}

#[test]
fn test_range_file_with_matching_geometry() {
    let upload = validate_upload(&range_file(4), CalibrationKind::Range, &small_geometry()).unwrap();
    match upload {
        CalibrationUpload::Range { z } => assert_eq!(z, vec![1.1, 1.2, 1.3, 1.4]),
        other => panic!("unexpected upload {other:?}"),
    }
}

#[test]
fn test_range_file_with_wrong_row_count() {
    assert!(validate_upload(&range_file(3), CalibrationKind::Range, &small_geometry()).is_err());
    assert!(validate_upload(&range_file(5), CalibrationKind::Range, &small_geometry()).is_err());
}

#[test]
fn test_position_file_reads_integral_from_first_rows() {
    let content = "ch\tx\ty\tint\n1\t1.5\t2.5\t0.9\n2\t1.6\t2.6\t0.8\n3\t1.7\t2.7\t0.7\n";
    let upload = validate_upload(content, CalibrationKind::Position, &small_geometry()).unwrap();
    match upload {
        CalibrationUpload::Position { x, y, int } => {
            assert_eq!(x, vec![1.5, 1.6, 1.7]);
            assert_eq!(y, vec![2.5, 2.6, 2.7]);
            assert_eq!(int, vec![0.9, 0.8]);
        }
        other => panic!("unexpected upload {other:?}"),
    }
}

#[test]
fn test_non_numeric_factor_rejected() {
    let content = "ch\tfactor\n1\t1.0\n2\tabc\n3\t1.0\n4\t1.0\n";
    assert!(validate_upload(content, CalibrationKind::Range, &small_geometry()).is_err());
}

#[test]
fn test_session_upload_and_save() {
    let mut config = SessionConfig::default();
    config.device.channels = small_geometry();
    let now = Local.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap();

    let mut session = DeviceSession::new(&config, now);
    session.on_transport_opened(now);

    let effects = session.apply(
        UserIntent::UploadCalibration {
            kind: CalibrationKind::Range,
            content: range_file(4),
        },
        now,
    );
    assert!(notifications(&effects).is_empty());
    assert_eq!(session.calibration().z, vec![1.1, 1.2, 1.3, 1.4]);

    let effects = session.apply(
        UserIntent::SaveCalibration {
            kind: CalibrationKind::Range,
            filename: "beam line 2".into(),
        },
        now,
    );
    assert_eq!(transmitted(&effects), vec!["log_save_range_calibration"]);
    let payload = effects[0].as_command().unwrap().payload.clone().unwrap();
    assert_eq!(payload["filename_Z"], "beam_line_2");
    assert_eq!(payload["Z_calib"][3], 1.4);
}

#[test]
fn test_save_over_listed_name_asks_first() {
    let now = Local.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap();
    let mut session = DeviceSession::new(&SessionConfig::default(), now);
    session.on_transport_opened(now);
    session.dispatch(
        r#"{"action":"update_profile_calib_list_hidden","value":"{\"list\":[\"cal_a\"]}"}"#,
        now,
    );

    let effects = session.apply(
        UserIntent::SaveCalibration {
            kind: CalibrationKind::Position,
            filename: "cal_a".into(),
        },
        now,
    );
    assert!(transmitted(&effects).is_empty());
    let id = match &effects[0] {
        Effect::Confirm(request) => request.id,
        other => panic!("expected confirmation, got {other:?}"),
    };

    let effects = session.resolve_confirmation(id, false, now);
    assert_eq!(notifications(&effects), vec!["Change file name"]);
}
