use super::*;

#[test]
fn defaults_resolve() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_SERVER_PORT);
    assert_eq!(settings.feed.capacity.get(), 30);
    assert_eq!(settings.feed.tick_min, Duration::from_secs(5));
    assert_eq!(settings.feed.tick_max, Duration::from_secs(15));
    assert_eq!(settings.client.reconnect_delay, Duration::from_secs(5));
    assert_eq!(settings.cache.preset, PolicyPreset::Standard);
    assert_eq!(settings.cache.static_version, CacheVersion::new(1));
    assert_eq!(settings.client.origin.as_str(), "http://127.0.0.1:3001/");
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let args = ServeArgs {
        server_port: Some(4321),
        logging: LoggingOverrides {
            log_level: Some("debug".to_string()),
            log_json: None,
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&args);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let args = ClientArgs {
        logging: LoggingOverrides {
            log_level: None,
            log_json: Some(true),
        },
        ..Default::default()
    };

    raw.apply_client_overrides(&args);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn reversed_tick_bounds_are_rejected() {
    let mut raw = RawSettings::default();
    raw.feed.tick_min_seconds = Some(20);
    raw.feed.tick_max_seconds = Some(10);

    let err = Settings::from_raw(raw).expect_err("invalid bounds");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "feed.tick_min_seconds",
            ..
        }
    ));
}

#[test]
fn zero_capacity_is_rejected() {
    let mut raw = RawSettings::default();
    raw.feed.capacity = Some(0);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn unknown_preset_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.preset = Some("enormous".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "cache.preset",
            ..
        })
    ));
}

#[test]
fn origin_must_be_http() {
    let mut raw = RawSettings::default();
    raw.client.origin = Some("ftp://example.com".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["wittr"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_client_arguments() {
    let args = CliArgs::parse_from([
        "wittr",
        "client",
        "--origin",
        "http://feed.example:3001",
        "--database-url",
        "sqlite::memory:",
        "--cache-preset",
        "compact",
    ]);

    match args.command.expect("client command") {
        Command::Client(client) => {
            assert_eq!(client.origin.as_deref(), Some("http://feed.example:3001"));
            assert_eq!(client.database_url.as_deref(), Some("sqlite::memory:"));

            let mut raw = RawSettings::default();
            raw.apply_client_overrides(&client);
            let settings = Settings::from_raw(raw).expect("valid settings");
            assert_eq!(settings.cache.preset, PolicyPreset::Compact);
            assert_eq!(settings.client.database_url, "sqlite::memory:");
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "wittr",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--feed-capacity",
        "12",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(serve.feed_capacity, Some(12));
        }
        _ => panic!("wrong command parsed"),
    }
}
