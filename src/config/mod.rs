use std::env;
use std::path::PathBuf;

use crate::errors::{Error, Result};

pub const DEFAULT_MAX_POOL_SIZE: usize = 3;

/// Runtime options, consumed from the process environment.
///
/// `LIMIT_TO_MAILBOXES` and `SKIP_MAILBOXES` use `%` as a separator
/// (e.g. "INBOX%Sent%Work Stuff") since `%` is not a valid character in
/// most IMAP mailbox names. The final mailbox set is
/// `LIMIT_TO_MAILBOXES - SKIP_MAILBOXES`, with an empty allow-list
/// meaning "all mailboxes".
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct Options {
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub imap_server: String,
    pub strict_mail_parsing: bool,
    // WARNING: per-session trace files grow quickly on large mailboxes.
    pub imap_client_debug: bool,
    pub debug: bool,
    pub limit_to_mailboxes: Vec<String>,
    pub skip_mailboxes: Vec<String>,
    pub db_path: PathBuf,
    pub max_pool_size: usize,
}

impl Options {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let mut options = Options::default();

        for (key, value) in vars {
            match key.to_uppercase().as_str() {
                "EMAIL" => options.email = value,
                "PASSWORD" => options.password = value,
                "IMAP_SERVER" => {
                    options.imap_server = if value.contains(':') {
                        value
                    } else {
                        format!("{value}:993")
                    };
                }
                "STRICT_MAIL_PARSING" => options.strict_mail_parsing = parse_bool(&value),
                "IMAP_CLIENT_DEBUG" => options.imap_client_debug = parse_bool(&value),
                "DEBUG" => options.debug = parse_bool(&value),
                "LIMIT_TO_MAILBOXES" => options.limit_to_mailboxes = split_mailbox_list(&value),
                "SKIP_MAILBOXES" => options.skip_mailboxes = split_mailbox_list(&value),
                "DB_PATH" => {
                    let path = PathBuf::from(&value);
                    options.db_path = if path.is_absolute() {
                        path
                    } else {
                        let cwd = env::current_dir().map_err(|e| {
                            Error::Config(format!("unable to get working directory: {e}"))
                        })?;
                        cwd.join(path)
                    };
                }
                "MAX_POOL_SIZE" => {
                    let size: usize = value.parse().map_err(|_| {
                        Error::Config(format!("unable to parse MAX_POOL_SIZE: {value:?}"))
                    })?;
                    if size < 1 {
                        return Err(Error::Config(
                            "MAX_POOL_SIZE must be greater than 0".into(),
                        ));
                    }
                    options.max_pool_size = size;
                }
                _ => {}
            }
        }

        if options.email.is_empty() {
            return Err(Error::Config("missing EMAIL".into()));
        }
        if options.password.is_empty() {
            return Err(Error::Config("missing PASSWORD".into()));
        }
        if options.imap_server.is_empty() {
            return Err(Error::Config("missing IMAP_SERVER".into()));
        }
        if options.db_path.as_os_str().is_empty() {
            return Err(Error::Config("missing DB_PATH".into()));
        }
        if options.max_pool_size == 0 {
            options.max_pool_size = DEFAULT_MAX_POOL_SIZE;
        }

        Ok(options)
    }
}

fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn split_mailbox_list(value: &str) -> Vec<String> {
    value
        .split('%')
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}
