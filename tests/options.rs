use mailarch::config::Options;
use mailarch::errors::Error;

fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn base_vars() -> Vec<(String, String)> {
    vars(&[
        ("EMAIL", "ana@example.com"),
        ("PASSWORD", "hunter2"),
        ("IMAP_SERVER", "imap.example.com"),
        ("DB_PATH", "/var/lib/mailarch/archive.db"),
    ])
}

#[test]
fn default_port_is_appended_when_missing() {
    let options = Options::from_vars(base_vars()).expect("options");
    assert_eq!(options.imap_server, "imap.example.com:993");

    let mut with_port = base_vars();
    with_port[2].1 = "imap.example.com:143".into();
    let options = Options::from_vars(with_port).expect("options");
    assert_eq!(options.imap_server, "imap.example.com:143");
}

#[test]
fn defaults_are_applied() {
    let options = Options::from_vars(base_vars()).expect("options");
    assert_eq!(options.max_pool_size, 3);
    assert!(!options.strict_mail_parsing);
    assert!(!options.imap_client_debug);
    assert!(!options.debug);
    assert!(options.limit_to_mailboxes.is_empty());
    assert!(options.skip_mailboxes.is_empty());
}

#[test]
fn mailbox_lists_split_on_percent() {
    let mut env = base_vars();
    env.push(("LIMIT_TO_MAILBOXES".into(), "INBOX%Sent%Work Stuff".into()));
    env.push(("SKIP_MAILBOXES".into(), "Spam".into()));

    let options = Options::from_vars(env).expect("options");
    assert_eq!(options.limit_to_mailboxes, vec!["INBOX", "Sent", "Work Stuff"]);
    assert_eq!(options.skip_mailboxes, vec!["Spam"]);
}

#[test]
fn lowercase_keys_are_accepted() {
    let env = vars(&[
        ("email", "ana@example.com"),
        ("password", "hunter2"),
        ("imap_server", "imap.example.com:993"),
        ("db_path", "/data/archive.db"),
        ("strict_mail_parsing", "true"),
    ]);
    let options = Options::from_vars(env).expect("options");
    assert!(options.strict_mail_parsing);
    assert_eq!(options.email, "ana@example.com");
}

#[test]
fn bool_options_accept_one_and_true() {
    for value in ["1", "true", "TRUE", "True"] {
        let mut env = base_vars();
        env.push(("DEBUG".into(), value.into()));
        assert!(Options::from_vars(env).expect("options").debug, "{value}");
    }
    let mut env = base_vars();
    env.push(("DEBUG".into(), "0".into()));
    assert!(!Options::from_vars(env).expect("options").debug);
}

#[test]
fn relative_db_path_is_absolutized() {
    let mut env = base_vars();
    env[3].1 = "archive.db".into();
    let options = Options::from_vars(env).expect("options");
    assert!(options.db_path.is_absolute());
    assert!(options.db_path.ends_with("archive.db"));
}

#[test]
fn missing_required_options_are_config_errors() {
    for missing in ["EMAIL", "PASSWORD", "IMAP_SERVER", "DB_PATH"] {
        let env: Vec<(String, String)> = base_vars()
            .into_iter()
            .filter(|(key, _)| key != missing)
            .collect();
        let err = Options::from_vars(env).expect_err("should fail");
        match err {
            Error::Config(message) => assert!(message.contains(missing), "{message}"),
            other => panic!("expected config error, got {other:?}"),
        }
    }
}

#[test]
fn max_pool_size_must_be_positive() {
    let mut env = base_vars();
    env.push(("MAX_POOL_SIZE".into(), "0".into()));
    assert!(matches!(
        Options::from_vars(env),
        Err(Error::Config(_))
    ));

    let mut env = base_vars();
    env.push(("MAX_POOL_SIZE".into(), "five".into()));
    assert!(matches!(
        Options::from_vars(env),
        Err(Error::Config(_))
    ));

    let mut env = base_vars();
    env.push(("MAX_POOL_SIZE".into(), "8".into()));
    assert_eq!(Options::from_vars(env).expect("options").max_pool_size, 8);
}
