use rigflow::AppError;

#[test]
fn display_prefixes_identify_the_variant() {
    let cases = [
        (AppError::Config("x".into()), "config: x"),
        (AppError::Rejected("x".into()), "rejected: x"),
        (AppError::Spawn("x".into()), "spawn: x"),
        (AppError::Process("x".into()), "process: x"),
        (AppError::Worker("x".into()), "worker: x"),
        (AppError::Command("x".into()), "command: x"),
        (AppError::Telemetry("x".into()), "telemetry: x"),
        (AppError::Io("x".into()), "io: x"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn io_errors_convert() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let err: AppError = io.into();
    assert!(matches!(err, AppError::Io(msg) if msg == "gone"));
}

#[test]
fn toml_errors_convert_to_config() {
    let parse = toml::from_str::<toml::Value>("= nope").expect_err("invalid toml");
    let err: AppError = parse.into();
    assert!(err.to_string().starts_with("config: invalid config:"));
}

#[test]
fn errors_are_std_errors() {
    let err: Box<dyn std::error::Error> = Box::new(AppError::Worker("decode failed".into()));
    assert_eq!(err.to_string(), "worker: decode failed");
}
