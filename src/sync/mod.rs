//! The reconcile -> fetch -> parse -> persist pipeline: one worker per
//! mailbox, fanned out and joined by the orchestrating [`SyncEngine`].

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Options;
use crate::errors::{Error, Result};
use crate::imap::{build_uid_sequence, FetchedMessage, ImapSession};
use crate::parse::parse_message;
use crate::pool::SessionPool;
use crate::storage::Catalogue;
use crate::types::{Email, MailboxEvent, MailboxRecord};

const FETCH_ITEMS: &str = "(UID FLAGS ENVELOPE BODY.PEEK[])";

pub struct SyncEngine {
    catalogue: Arc<Catalogue>,
    pool: Arc<SessionPool>,
    options: Arc<Options>,
}

impl SyncEngine {
    pub fn new(catalogue: Arc<Catalogue>, pool: Arc<SessionPool>, options: Arc<Options>) -> Self {
        Self {
            catalogue,
            pool,
            options,
        }
    }

    /// Lists mailboxes on the server and upserts a catalogue row for each.
    pub async fn enumerate_mailboxes(&self) -> Result<Vec<MailboxRecord>> {
        let mut session = self.pool.acquire().await?;
        let infos = match session.list_mailbox_infos().await {
            Ok(infos) => {
                self.pool.release(session).await;
                infos
            }
            Err(err) => {
                self.pool.discard(session).await;
                return Err(err);
            }
        };

        let mut records = Vec::with_capacity(infos.len());
        for info in infos {
            let record = MailboxRecord {
                name: info.name,
                attributes: info.attributes,
                last_synced_at: 0,
                num_emails: 0,
            };
            self.catalogue.record_mailbox(&record).await?;
            records.push(record);
        }
        Ok(records)
    }

    pub async fn sync_all(&self) -> Result<()> {
        let mailboxes = self.enumerate_mailboxes().await?;
        self.sync_mailboxes(mailboxes).await
    }

    /// Filters the candidate set, fans out one worker per mailbox, joins
    /// them, and on all-success recomputes the denormalized projections
    /// and rebuilds the search index in one coarse pass.
    pub async fn sync_mailboxes(&self, mailboxes: Vec<MailboxRecord>) -> Result<()> {
        let final_set = plan_sync(
            mailboxes,
            &self.options.limit_to_mailboxes,
            &self.options.skip_mailboxes,
        );
        if final_set.is_empty() {
            info!("no mailboxes to sync");
            return Ok(());
        }

        let events = self.pool.events().await.ok_or(Error::PoolClosed)?;
        for mailbox in &final_set {
            send_event(&events, MailboxEvent::queued(&mailbox.name)).await;
        }

        let handles: Vec<_> = final_set
            .into_iter()
            .map(|mailbox| {
                let worker = MailboxWorker {
                    catalogue: Arc::clone(&self.catalogue),
                    pool: Arc::clone(&self.pool),
                    options: Arc::clone(&self.options),
                    events: events.clone(),
                    mailbox,
                };
                tokio::spawn(worker.run())
            })
            .collect();

        let results = join_all(handles).await;

        let mut first_error = None;
        let mut failures = 0usize;
        for result in results {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failures += 1;
                    first_error.get_or_insert(err);
                }
                Err(err) => {
                    failures += 1;
                    first_error
                        .get_or_insert(Error::Unexpected(format!("mailbox worker panicked: {err}")));
                }
            }
        }

        if let Some(err) = first_error {
            warn!(failures, "mailbox sync finished with errors");
            return Err(err);
        }

        self.catalogue.recompute_membership_projection().await?;
        self.catalogue.rebuild_fts().await?;
        info!("sync completed");
        Ok(())
    }
}

/// Final mailbox set: drop unselectable mailboxes, intersect with the
/// allow-list when non-empty, then subtract the deny-list.
pub fn plan_sync(
    mailboxes: Vec<MailboxRecord>,
    limit_to: &[String],
    skip: &[String],
) -> Vec<MailboxRecord> {
    let limit: HashSet<&str> = limit_to.iter().map(String::as_str).collect();
    let skip: HashSet<&str> = skip.iter().map(String::as_str).collect();

    mailboxes
        .into_iter()
        .filter(|mailbox| mailbox.is_selectable())
        .filter(|mailbox| limit.is_empty() || limit.contains(mailbox.name.as_str()))
        .filter(|mailbox| !skip.contains(mailbox.name.as_str()))
        .collect()
}

struct MailboxWorker {
    catalogue: Arc<Catalogue>,
    pool: Arc<SessionPool>,
    options: Arc<Options>,
    events: mpsc::Sender<MailboxEvent>,
    mailbox: MailboxRecord,
}

impl MailboxWorker {
    async fn run(self) -> Result<()> {
        let name = self.mailbox.name.clone();
        let mut session = match self.pool.acquire().await {
            Ok(session) => session,
            Err(err) => {
                self.emit(MailboxEvent::error(&name, err.to_string())).await;
                return Err(err);
            }
        };

        match self.sync_mailbox(&mut session).await {
            Ok(()) => {
                self.pool.release(session).await;
                Ok(())
            }
            Err(err) => {
                warn!(mailbox = %name, error = %err, "mailbox sync failed");
                self.emit(MailboxEvent::error(&name, err.to_string())).await;
                if err.is_session_error() {
                    self.pool.discard(session).await;
                } else {
                    self.pool.release(session).await;
                }
                Err(err)
            }
        }
    }

    async fn sync_mailbox(&self, session: &mut ImapSession) -> Result<()> {
        let name = &self.mailbox.name;

        session.raw_select(name, true).await?;
        let remote = session.search_all_uids().await?;
        debug!(mailbox = %name, remote = remote.len(), "reconciling remote uid set");
        self.catalogue.reconcile_mailbox(name, &remote).await?;

        self.emit(MailboxEvent::started(name)).await;

        let pending = self.catalogue.get_pending_uids(name).await?;
        if pending.is_empty() {
            self.emit(MailboxEvent::completed(name, 0, 0)).await;
            return self.catalogue.save_mailbox(&self.mailbox).await;
        }

        // A mis-selected session would persist messages under the wrong
        // mailbox; refuse to fetch unless the selection matches.
        if session.current_mailbox() != Some(name.as_str()) {
            return Err(Error::Unexpected(format!(
                "attempted to download {name} but {} is selected",
                session.current_mailbox().unwrap_or("no mailbox")
            )));
        }

        let total = pending.len();
        let sequence = build_uid_sequence(&pending);
        let mut fetched: Vec<FetchedMessage> = Vec::with_capacity(total);
        {
            let mut stream = session.uid_fetch(&sequence, FETCH_ITEMS).await?;
            while let Some(item) = stream.next().await {
                let message =
                    item.map_err(|e| Error::SessionIo(format!("reading fetch stream: {e}")))?;
                fetched.push(FetchedMessage::from_fetch(&message));
                self.emit(MailboxEvent::progress(name, fetched.len(), total))
                    .await;
            }
        }
        let downloaded = fetched.len();

        // MIME parsing is CPU-bound; run the batch off the async runtime.
        let strict = self.options.strict_mail_parsing;
        let mailbox_name = name.clone();
        let emails = tokio::task::spawn_blocking(move || -> Result<Vec<Email>> {
            fetched
                .into_iter()
                .map(|message| parse_message(message, &mailbox_name, strict))
                .collect()
        })
        .await
        .map_err(|e| Error::Unexpected(format!("parse task panicked: {e}")))??;

        for email in &emails {
            let mut warnings = Vec::new();
            if !email.parse_warning.is_empty() {
                warnings.push(format!("parse warning: {}", email.parse_warning));
            }
            if !email.parse_error.is_empty() {
                warnings.push(format!("parse error: {}", email.parse_error));
            }
            if !warnings.is_empty() {
                self.emit(MailboxEvent::warning(name, warnings.join(", ")))
                    .await;
            }
        }

        self.catalogue.add_emails(name, &emails).await?;
        self.catalogue.save_mailbox(&self.mailbox).await?;

        if downloaded < total {
            // Some providers end the stream short of the requested set.
            // The unfetched UIDs stay pending and are retried next sync.
            self.emit(MailboxEvent::partial_fetch(name, downloaded, total))
                .await;
        }

        self.emit(MailboxEvent::completed(name, downloaded, total))
            .await;
        info!(mailbox = %name, downloaded, total, "mailbox sync completed");
        Ok(())
    }

    async fn emit(&self, event: MailboxEvent) {
        send_event(&self.events, event).await;
    }
}

async fn send_event(events: &mpsc::Sender<MailboxEvent>, event: MailboxEvent) {
    // A vanished consumer must not take the sync down with it.
    if events.send(event).await.is_err() {
        debug!("event consumer is gone, dropping event");
    }
}
