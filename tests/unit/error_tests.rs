//! Unit tests for `AppError` display format and wire kinds.

use app_lock::AppError;

#[test]
fn display_prefixes_kind() {
    let err = AppError::NotProtected("0/com.example.app is not protected".into());
    assert_eq!(
        err.to_string(),
        "not protected: 0/com.example.app is not protected"
    );

    let err = AppError::PermissionDenied("shell requires MANAGE_APP_LOCK".into());
    assert!(err.to_string().starts_with("permission denied:"));
}

#[test]
fn message_has_no_prefix() {
    let err = AppError::InvalidArgument("timeout 10ms is below the minimum".into());
    assert_eq!(err.message(), "timeout 10ms is below the minimum");
}

#[test]
fn every_kind_maps_back_to_its_variant() {
    let errors = [
        AppError::Config("c".into()),
        AppError::Db("d".into()),
        AppError::Ipc("i".into()),
        AppError::Io("o".into()),
        AppError::Surface("s".into()),
        AppError::PermissionDenied("p".into()),
        AppError::NotProtected("n".into()),
        AppError::AlreadyProtected("a".into()),
        AppError::InvalidArgument("v".into()),
        AppError::AlreadyPending("q".into()),
        AppError::AuthenticationTimeout("t".into()),
        AppError::NotFound("f".into()),
    ];

    for err in errors {
        let rebuilt = AppError::from_kind(err.kind(), err.message().to_owned());
        assert_eq!(rebuilt.to_string(), err.to_string());
    }
}

#[test]
fn unknown_kind_becomes_ipc_error() {
    let err = AppError::from_kind("quota_exceeded", "too many".into());
    assert!(matches!(err, AppError::Ipc(ref msg) if msg == "too many"));
}

#[test]
fn json_error_converts_to_ipc() {
    let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let err = AppError::from(parse);
    assert!(matches!(err, AppError::Ipc(_)));
    assert!(err.to_string().starts_with("ipc: invalid json"));
}

#[test]
fn io_error_converts_to_io() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
    let err = AppError::from(io);
    assert!(matches!(err, AppError::Io(_)));
}
