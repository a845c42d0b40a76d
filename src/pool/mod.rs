//! Bounded multiplexer of authenticated IMAP sessions.
//!
//! Sessions are expensive (TLS handshake plus LOGIN), rate-limited by some
//! providers, and prone to server-side idle timeouts. The pool caps
//! concurrency at `max_pool_size`, lazily dials sessions on demand, reuses
//! idle ones, and logs out sessions that have been idle past the TTL.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{debug, warn};

use crate::config::Options;
use crate::errors::{Error, Result};
use crate::imap::ImapSession;
use crate::types::MailboxEvent;

pub const IDLE_TTL: Duration = Duration::from_secs(10 * 60);

const EVENT_CHANNEL_CAPACITY: usize = 64;

struct PoolState {
    idle: VecDeque<ImapSession>,
    // Ids of every live session, checked out or idle, to enforce the cap.
    live: HashSet<u64>,
    next_id: u64,
    closed: bool,
}

enum Checkout {
    Reuse(ImapSession),
    Dial { id: u64, stale: Option<ImapSession> },
}

pub struct SessionPool {
    options: Arc<Options>,
    state: Mutex<PoolState>,
    // One permit per idle session or free slot. Consumed on checkout,
    // restored on release/discard/failed dial.
    capacity: Arc<Semaphore>,
    events: Mutex<Option<mpsc::Sender<MailboxEvent>>>,
    idle_ttl: Duration,
}

impl SessionPool {
    pub fn new(options: Arc<Options>) -> (Arc<Self>, mpsc::Receiver<MailboxEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let max_size = options.max_pool_size;
        let pool = Arc::new(Self {
            options,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                live: HashSet::new(),
                next_id: 1,
                closed: false,
            }),
            capacity: Arc::new(Semaphore::new(max_size)),
            events: Mutex::new(Some(events_tx)),
            idle_ttl: IDLE_TTL,
        });
        (pool, events_rx)
    }

    /// Sender half of the progress event channel. `None` once the pool has
    /// been closed. The channel is bounded: a slow consumer blocks
    /// producers rather than letting events pile up.
    pub async fn events(&self) -> Option<mpsc::Sender<MailboxEvent>> {
        self.events.lock().await.clone()
    }

    /// Checks out a session: an idle one when available (replacing it if
    /// stale), a freshly dialed one while below the cap, otherwise blocks
    /// until a session is returned.
    pub async fn acquire(&self) -> Result<ImapSession> {
        let permit = self
            .capacity
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolClosed)?;
        // The permit is a claim on one idle session or one free slot;
        // counts are managed manually from here on.
        permit.forget();

        let checkout = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(Error::PoolClosed);
            }
            match state.idle.pop_front() {
                Some(session) if session.last_activity().elapsed() > self.idle_ttl => {
                    // Stale: discard it and dial a replacement in its
                    // slot. The live set size is unchanged.
                    state.live.remove(&session.id());
                    let id = state.next_id;
                    state.next_id += 1;
                    state.live.insert(id);
                    Checkout::Dial {
                        id,
                        stale: Some(session),
                    }
                }
                Some(session) => Checkout::Reuse(session),
                None => {
                    let id = state.next_id;
                    state.next_id += 1;
                    state.live.insert(id);
                    Checkout::Dial { id, stale: None }
                }
            }
        };

        match checkout {
            Checkout::Reuse(session) => {
                debug!(session = session.id(), "reusing idle imap session");
                Ok(session)
            }
            Checkout::Dial { id, stale } => {
                if let Some(session) = stale {
                    debug!(session = session.id(), "session is stale, logging out");
                    if let Err(err) = session.logout().await {
                        debug!(error = %err, "stale session logout failed");
                    }
                }
                // Dial without holding the state lock so other acquirers
                // may proceed in parallel.
                match ImapSession::connect(&self.options, id).await {
                    Ok(session) => {
                        debug!(session = id, "created new imap session");
                        Ok(session)
                    }
                    Err(err) => {
                        let mut state = self.state.lock().await;
                        state.live.remove(&id);
                        if !state.closed {
                            self.capacity.add_permits(1);
                        }
                        Err(err)
                    }
                }
            }
        }
    }

    /// Hands a session back. Sessions are moved in, so double-release is
    /// unrepresentable.
    pub async fn release(&self, session: ImapSession) {
        let rejected = {
            let mut state = self.state.lock().await;
            if state.closed || state.idle.len() >= self.options.max_pool_size {
                state.live.remove(&session.id());
                Some((session, state.closed))
            } else {
                state.idle.push_back(session);
                None
            }
        };

        match rejected {
            None => self.capacity.add_permits(1),
            Some((session, closed)) => {
                debug!(session = session.id(), "idle queue full, logging out");
                if let Err(err) = session.logout().await {
                    debug!(error = %err, "logout on release failed");
                }
                if !closed {
                    self.capacity.add_permits(1);
                }
            }
        }
    }

    /// Drops a session whose connection can no longer be trusted. The
    /// freed slot becomes available to other acquirers immediately.
    pub async fn discard(&self, session: ImapSession) {
        let closed = {
            let mut state = self.state.lock().await;
            state.live.remove(&session.id());
            state.closed
        };
        debug!(session = session.id(), "discarding session");
        if let Err(err) = session.logout().await {
            debug!(error = %err, "logout on discard failed");
        }
        if !closed {
            self.capacity.add_permits(1);
        }
    }

    /// Terminal, best-effort shutdown: closes the idle queue, logs out
    /// every enqueued session, then closes the events channel. In-flight
    /// checkouts are the caller's responsibility to drain first.
    pub async fn close(&self) {
        let drained = {
            let mut state = self.state.lock().await;
            if state.closed {
                Vec::new()
            } else {
                state.closed = true;
                let drained: Vec<ImapSession> = state.idle.drain(..).collect();
                for session in &drained {
                    state.live.remove(&session.id());
                }
                drained
            }
        };

        self.capacity.close();
        for session in drained {
            if let Err(err) = session.logout().await {
                warn!(error = %err, "logout on pool close failed");
            }
        }
        self.events.lock().await.take();
    }

    pub async fn live_count(&self) -> usize {
        self.state.lock().await.live.len()
    }

    pub async fn idle_count(&self) -> usize {
        self.state.lock().await.idle.len()
    }
}
