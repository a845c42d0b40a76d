use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds the sync engine distinguishes.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("dialing imap server: {0}")]
    SessionDial(String),
    #[error("imap authentication failed: {0}")]
    SessionAuth(String),
    #[error("imap i/o error: {0}")]
    SessionIo(String),
    #[error("session pool is closed")]
    PoolClosed,
    #[error("catalogue error: {0}")]
    Catalogue(String),
    #[error("message parsing aborted: {0}")]
    ParseFatal(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// True when the underlying IMAP connection can no longer be trusted.
    /// The worker uses this to decide between returning a session to the
    /// pool and discarding it.
    pub fn is_session_error(&self) -> bool {
        matches!(
            self,
            Error::SessionDial(_) | Error::SessionAuth(_) | Error::SessionIo(_)
        )
    }
}
