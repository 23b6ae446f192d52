//! Unit tests for the IPC wire format.

use app_lock::engine::broker::UnlockOutcome;
use app_lock::ipc::protocol::{Envelope, Event, Request, Response};
use app_lock::models::lock::{LockEvent, LockState};
use app_lock::models::UserId;
use app_lock::AppError;
use serde_json::json;

#[test]
fn envelope_parses_flat_command_line() {
    let line = r#"{"auth_token":"tok","command":"set_timeout","timeout_millis":30000}"#;
    let envelope: Envelope = serde_json::from_str(line).expect("parses");

    assert_eq!(envelope.auth_token, "tok");
    assert_eq!(
        envelope.request,
        Request::SetTimeout {
            timeout_millis: 30_000
        }
    );
    assert_eq!(envelope.request.command(), "set_timeout");
}

#[test]
fn unit_commands_need_no_fields() {
    let envelope: Envelope =
        serde_json::from_str(r#"{"auth_token":"tok","command":"get_timeout"}"#).expect("parses");
    assert_eq!(envelope.request, Request::GetTimeout);
}

#[test]
fn request_unlock_defaults_to_allowing_biometrics() {
    let envelope: Envelope = serde_json::from_str(
        r#"{"auth_token":"tok","command":"request_unlock","package_name":"com.example.app"}"#,
    )
    .expect("parses");
    assert_eq!(
        envelope.request,
        Request::RequestUnlock {
            package_name: "com.example.app".into(),
            allow_biometrics: true,
        }
    );
}

#[test]
fn authentication_result_request_id_is_optional() {
    let envelope: Envelope = serde_json::from_str(
        r#"{"auth_token":"tok","command":"authentication_result","package_name":"com.example.app","success":false}"#,
    )
    .expect("parses");
    assert!(matches!(
        envelope.request,
        Request::AuthenticationResult {
            request_id: None,
            success: false,
            ..
        }
    ));
}

#[test]
fn unknown_command_is_rejected() {
    let parsed = serde_json::from_str::<Envelope>(r#"{"auth_token":"tok","command":"format_disk"}"#);
    assert!(parsed.is_err());
}

#[test]
fn envelope_serializes_flat() {
    let envelope = Envelope {
        auth_token: "tok".into(),
        request: Request::CheckLocked {
            package_name: "com.example.app".into(),
        },
    };
    assert_eq!(
        serde_json::to_value(&envelope).expect("serializes"),
        json!({"auth_token": "tok", "command": "check_locked", "package_name": "com.example.app"})
    );
}

#[test]
fn failure_response_carries_kind_and_maps_back() {
    let response = Response::failure(&AppError::AlreadyPending("flow outstanding".into()));
    assert_eq!(
        serde_json::to_value(&response).expect("serializes"),
        json!({"ok": false, "error": {"kind": "already_pending", "message": "flow outstanding"}})
    );

    let err = response.into_result::<()>().expect_err("failure");
    assert!(matches!(err, AppError::AlreadyPending(ref msg) if msg == "flow outstanding"));
}

#[test]
fn success_response_decodes_payload() {
    let response = Response::from_serialize(&LockState::PendingAuthentication);
    assert_eq!(
        response.clone().into_result::<LockState>().expect("decodes"),
        LockState::PendingAuthentication
    );

    let unit = Response::from_serialize(&());
    let line = serde_json::to_string(&unit).expect("serializes");
    let parsed: Response = serde_json::from_str(&line).expect("parses");
    parsed.into_result::<()>().expect("unit payload");
}

#[test]
fn outcome_is_tagged() {
    let id = uuid::Uuid::new_v4();
    assert_eq!(
        serde_json::to_value(UnlockOutcome::Started { request_id: id }).expect("serializes"),
        json!({"outcome": "started", "request_id": id.to_string()})
    );
    assert_eq!(
        serde_json::to_value(UnlockOutcome::AlreadyUnlocked).expect("serializes"),
        json!({"outcome": "already_unlocked"})
    );
}

#[test]
fn lock_event_is_tagged() {
    let event = Event::LockChanged(LockEvent {
        user: UserId(0),
        package: "com.example.app".into(),
        state: Some(LockState::Unlocked),
    });
    assert_eq!(
        serde_json::to_value(&event).expect("serializes"),
        json!({"event": "lock_changed", "user": 0, "package": "com.example.app", "state": "unlocked"})
    );
}

#[test]
fn line_codec_frames_lines_and_rejects_overlong_ones() {
    use app_lock::ipc::codec::{LineCodec, MAX_LINE_BYTES};
    use bytes::BytesMut;
    use tokio_util::codec::Decoder;

    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from(&b"{\"command\":\"get_timeout\"}\npartial"[..]);
    let line = codec.decode(&mut buf).expect("decode");
    assert_eq!(line.as_deref(), Some("{\"command\":\"get_timeout\"}"));
    assert_eq!(codec.decode(&mut buf).expect("decode"), None);

    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from(vec![b'a'; MAX_LINE_BYTES + 1].as_slice());
    assert!(matches!(
        codec.decode(&mut buf),
        Err(AppError::InvalidArgument(_))
    ));
}
