//! One authenticated IMAP connection over TLS with async-imap and
//! tokio-rustls, plus the owned message form drained out of FETCH streams.

mod trace;

use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_imap::types::{Fetch, Flag};
use async_imap::{Client, Session};
use futures::{Stream, StreamExt};
use imap_proto::NameAttribute;
use rustls_native_certs::load_native_certs;
use tokio::net::TcpStream;
use tokio_rustls::rustls::{Certificate, ClientConfig, RootCertStore, ServerName};
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::config::Options;
use crate::errors::{Error, Result};
use crate::parse::envelope_from_imap;
use crate::types::Envelope;

pub use trace::TraceStream;

const TRACE_DIR: &str = "imap_trace";

type ImapTransport = TraceStream<tokio_rustls::client::TlsStream<TcpStream>>;

#[derive(Clone, Debug)]
pub struct MailboxInfo {
    pub name: String,
    pub attributes: Vec<String>,
}

/// Server-reported state of a selected mailbox. `uid_validity` is carried
/// so a future resync policy can compare it against a stored value.
#[derive(Clone, Copy, Debug)]
pub struct MailboxStatus {
    pub exists: u32,
    pub uid_next: Option<u32>,
    pub uid_validity: Option<u32>,
}

/// Owned extraction of one FETCH response item.
#[derive(Clone, Debug, Default)]
pub struct FetchedMessage {
    pub uid: u32,
    pub flags: Vec<String>,
    pub envelope: Option<Envelope>,
    pub body: Option<Vec<u8>>,
}

impl FetchedMessage {
    pub fn from_fetch(fetch: &Fetch) -> Self {
        Self {
            uid: fetch.uid.unwrap_or(0),
            flags: fetch.flags().map(|flag| flag_token(&flag)).collect(),
            envelope: fetch.envelope().map(envelope_from_imap),
            body: fetch.body().map(<[u8]>::to_vec),
        }
    }
}

/// One logged-in IMAP session. Exclusively owned by at most one worker at
/// a time; the pool enforces this. Every successful operation refreshes
/// `last_activity`, which the pool compares against its idle TTL.
pub struct ImapSession {
    inner: Session<ImapTransport>,
    id: u64,
    last_activity: Instant,
    current_mailbox: Option<String>,
}

impl ImapSession {
    pub async fn connect(options: &Options, id: u64) -> Result<Self> {
        let mut root_store = RootCertStore::empty();
        for cert in load_native_certs()
            .map_err(|e| Error::SessionDial(format!("failed to load native certs: {e}")))?
        {
            root_store
                .add(&Certificate(cert.0))
                .map_err(|e| Error::SessionDial(format!("failed to add cert to root store: {e}")))?;
        }

        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));

        let host = options
            .imap_server
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(options.imap_server.as_str());

        let tcp = TcpStream::connect(options.imap_server.as_str())
            .await
            .map_err(|e| {
                Error::SessionDial(format!("connecting to {}: {e}", options.imap_server))
            })?;

        let server_name = ServerName::try_from(host)
            .map_err(|e| Error::SessionDial(format!("invalid dns name {host:?}: {e}")))?;
        let tls_stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::SessionDial(format!("starting tls: {e}")))?;

        let stream = TraceStream::new(tls_stream, trace_sink(options, id)?);
        let mut client = Client::new(stream);

        client
            .read_response()
            .await
            .map_err(|e| Error::SessionDial(format!("reading imap greeting: {e}")))?
            .ok_or_else(|| {
                Error::SessionDial("unexpected end of stream, expected greeting".into())
            })?;

        debug!(session = id, server = %options.imap_server, "connected to imap server");

        let session = client
            .login(&options.email, &options.password)
            .await
            .map_err(|(err, _client)| Error::SessionAuth(err.to_string()))?;

        Ok(Self {
            inner: session,
            id,
            last_activity: Instant::now(),
            current_mailbox: None,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Name of the mailbox selected by the last `raw_select`, if any.
    /// Workers assert against this before fetching so a mis-selected
    /// session can never persist messages under the wrong mailbox.
    pub fn current_mailbox(&self) -> Option<&str> {
        self.current_mailbox.as_deref()
    }

    pub async fn list_mailbox_infos(&mut self) -> Result<Vec<MailboxInfo>> {
        let mut infos = Vec::new();
        {
            let mut names = self
                .inner
                .list(Some(""), Some("*"))
                .await
                .map_err(|e| Error::SessionIo(format!("listing mailboxes: {e}")))?;
            while let Some(item) = names.next().await {
                let name =
                    item.map_err(|e| Error::SessionIo(format!("reading mailbox list: {e}")))?;
                infos.push(MailboxInfo {
                    name: name.name().to_string(),
                    attributes: name.attributes().iter().map(attribute_token).collect(),
                });
            }
        }
        self.last_activity = Instant::now();
        Ok(infos)
    }

    /// SELECT (or EXAMINE when `read_only`) a mailbox. Read-only selection
    /// ensures fetched messages are not flagged `\Seen` as a side effect.
    pub async fn raw_select(&mut self, mailbox: &str, read_only: bool) -> Result<MailboxStatus> {
        let selected = if read_only {
            self.inner.examine(mailbox).await
        } else {
            self.inner.select(mailbox).await
        }
        .map_err(|e| Error::SessionIo(format!("could not select mailbox {mailbox}: {e}")))?;

        self.current_mailbox = Some(mailbox.to_string());
        self.last_activity = Instant::now();
        Ok(MailboxStatus {
            exists: selected.exists,
            uid_next: selected.uid_next,
            uid_validity: selected.uid_validity,
        })
    }

    /// UID SEARCH ALL in the currently selected mailbox. The caller must
    /// have selected a mailbox first; see `list_all_uids` for the
    /// convenience form.
    pub async fn search_all_uids(&mut self) -> Result<HashSet<u32>> {
        let uids = self
            .inner
            .uid_search("ALL")
            .await
            .map_err(|e| Error::SessionIo(format!("failed to search mailbox: {e}")))?;
        self.last_activity = Instant::now();
        Ok(uids)
    }

    /// Selects `mailbox` read-only and returns every UID it contains.
    pub async fn list_all_uids(&mut self, mailbox: &str) -> Result<HashSet<u32>> {
        self.raw_select(mailbox, true).await?;
        self.search_all_uids().await
    }

    /// Issues UID FETCH and returns the lazy response stream. Restartable
    /// only by re-issuing the call.
    pub async fn uid_fetch<'a>(
        &'a mut self,
        uid_set: &'a str,
        items: &'a str,
    ) -> Result<impl Stream<Item = async_imap::error::Result<Fetch>> + 'a> {
        let stream = self
            .inner
            .uid_fetch(uid_set, items)
            .await
            .map_err(|e| Error::SessionIo(format!("failed to fetch: {e}")))?;
        self.last_activity = Instant::now();
        Ok(stream)
    }

    pub async fn uid_copy(&mut self, uids: &[u32], target: &str) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let sequence = build_uid_sequence(uids);
        self.inner
            .uid_copy(&sequence, target)
            .await
            .map_err(|e| Error::SessionIo(format!("failed to copy messages to {target}: {e}")))?;
        self.last_activity = Instant::now();
        Ok(())
    }

    pub async fn uid_move(&mut self, uids: &[u32], target: &str) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let sequence = build_uid_sequence(uids);
        self.inner
            .uid_mv(&sequence, target)
            .await
            .map_err(|e| Error::SessionIo(format!("failed to move messages to {target}: {e}")))?;
        self.last_activity = Instant::now();
        Ok(())
    }

    /// Attempts a graceful LOGOUT. On failure the session is dropped,
    /// which tears down the TCP connection, and the error is surfaced.
    pub async fn logout(mut self) -> Result<()> {
        self.inner.logout().await.map_err(|err| {
            Error::SessionIo(format!("logout failed, terminating connection: {err}"))
        })
    }
}

/// Comma-separated UID sequence set for FETCH/COPY/MOVE commands.
pub fn build_uid_sequence(uids: &[u32]) -> String {
    uids.iter()
        .map(|uid| uid.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn flag_token(flag: &Flag<'_>) -> String {
    match flag {
        Flag::Seen => "\\Seen".to_string(),
        Flag::Answered => "\\Answered".to_string(),
        Flag::Flagged => "\\Flagged".to_string(),
        Flag::Deleted => "\\Deleted".to_string(),
        Flag::Draft => "\\Draft".to_string(),
        Flag::Recent => "\\Recent".to_string(),
        Flag::MayCreate => "\\*".to_string(),
        Flag::Custom(value) => value.to_string(),
    }
}

fn attribute_token(attribute: &NameAttribute<'_>) -> String {
    match attribute {
        NameAttribute::NoInferiors => "\\Noinferiors".to_string(),
        NameAttribute::NoSelect => "\\Noselect".to_string(),
        NameAttribute::Marked => "\\Marked".to_string(),
        NameAttribute::Unmarked => "\\Unmarked".to_string(),
        NameAttribute::Extension(value) => value.to_string(),
        _ => "\\Unknown".to_string(),
    }
}

fn trace_sink(options: &Options, id: u64) -> Result<Option<File>> {
    if !options.imap_client_debug {
        return Ok(None);
    }
    std::fs::create_dir_all(TRACE_DIR)
        .map_err(|e| Error::Unexpected(format!("failed to create trace dir: {e}")))?;
    let path = Path::new(TRACE_DIR).join(format!("session_{id}.log"));
    let file = File::create(&path)
        .map_err(|e| Error::Unexpected(format!("failed to create {}: {e}", path.display())))?;
    Ok(Some(file))
}
