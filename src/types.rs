use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const NOSELECT_ATTRIBUTE: &str = "\\Noselect";

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Disposition {
    #[serde(rename = "attachment")]
    Attachment,
    #[serde(rename = "inline")]
    Inline,
    #[default]
    #[serde(rename = "")]
    Unknown,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentMetadata {
    pub file_name: String,
    pub media_type: String,
    pub media_subtype: String,
    pub size_bytes: usize,
    pub transfer_encoding: String,
    pub disposition: Disposition,
}

/// One address slot of an IMAP envelope. Field order matters: the JSON
/// form of address lists feeds the fingerprint and must stay stable.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvelopeAddress {
    pub name: Option<String>,
    pub mailbox: Option<String>,
    pub host: Option<String>,
}

/// Owned, decoded form of the server-side ENVELOPE response.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    pub date: Option<String>,
    pub subject: Option<String>,
    pub from: Option<Vec<EnvelopeAddress>>,
    pub sender: Option<Vec<EnvelopeAddress>>,
    pub reply_to: Option<Vec<EnvelopeAddress>>,
    pub to: Option<Vec<EnvelopeAddress>>,
    pub cc: Option<Vec<EnvelopeAddress>>,
    pub bcc: Option<Vec<EnvelopeAddress>>,
    pub in_reply_to: Option<String>,
    pub message_id: Option<String>,
}

impl Envelope {
    pub fn first_from(&self) -> EnvelopeAddress {
        first_address(&self.from)
    }

    pub fn first_sender(&self) -> EnvelopeAddress {
        first_address(&self.sender)
    }

    pub fn first_reply_to(&self) -> EnvelopeAddress {
        first_address(&self.reply_to)
    }

    pub fn first_to(&self) -> EnvelopeAddress {
        first_address(&self.to)
    }

    pub fn first_cc(&self) -> EnvelopeAddress {
        first_address(&self.cc)
    }

    pub fn first_bcc(&self) -> EnvelopeAddress {
        first_address(&self.bcc)
    }
}

fn first_address(list: &Option<Vec<EnvelopeAddress>>) -> EnvelopeAddress {
    list.as_ref()
        .and_then(|addrs| addrs.first())
        .cloned()
        .unwrap_or_default()
}

/// A fully parsed message as held in memory during a sync batch and as
/// persisted in the `email` table. Empty strings mean "absent", matching
/// the column representation.
#[derive(Clone, Debug, Default)]
pub struct Email {
    pub our_id: String,
    pub uid: u32,
    pub mailbox: String,
    pub envelope: Option<Envelope>,
    pub flags: Vec<String>,
    pub text_body: String,
    pub html_body: String,
    pub attachments: Vec<AttachmentMetadata>,
    pub parse_warning: String,
    pub parse_error: String,
    pub mailboxes: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MailboxRecord {
    pub name: String,
    pub attributes: Vec<String>,
    pub last_synced_at: i64,
    pub num_emails: i64,
}

impl MailboxRecord {
    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.attributes.iter().any(|a| a == attribute)
    }

    pub fn is_selectable(&self) -> bool {
        !self.has_attribute(NOSELECT_ATTRIBUTE)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum MailboxEventType {
    SyncQueued,
    DownloadStarted,
    DownloadProgress,
    DownloadCompleted,
    DownloadSkipped,
    DownloadError,
    SyncWarning,
}

/// Progress event emitted while syncing. Forwarded verbatim to the
/// external facade, so the serialized shape is part of the contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MailboxEvent {
    pub mailbox: String,
    pub event_type: MailboxEventType,
    pub total_to_download: usize,
    pub total_downloaded: usize,
    pub error: String,
    pub warning: String,
}

impl MailboxEvent {
    fn new(mailbox: &str, event_type: MailboxEventType) -> Self {
        Self {
            mailbox: mailbox.to_string(),
            event_type,
            total_to_download: 0,
            total_downloaded: 0,
            error: String::new(),
            warning: String::new(),
        }
    }

    pub fn queued(mailbox: &str) -> Self {
        Self::new(mailbox, MailboxEventType::SyncQueued)
    }

    pub fn started(mailbox: &str) -> Self {
        Self::new(mailbox, MailboxEventType::DownloadStarted)
    }

    pub fn progress(mailbox: &str, downloaded: usize, to_download: usize) -> Self {
        let mut event = Self::new(mailbox, MailboxEventType::DownloadProgress);
        event.total_downloaded = downloaded;
        event.total_to_download = to_download;
        event
    }

    pub fn completed(mailbox: &str, downloaded: usize, to_download: usize) -> Self {
        let mut event = Self::new(mailbox, MailboxEventType::DownloadCompleted);
        event.total_downloaded = downloaded;
        event.total_to_download = to_download;
        event
    }

    pub fn error(mailbox: &str, error: String) -> Self {
        let mut event = Self::new(mailbox, MailboxEventType::DownloadError);
        event.error = error;
        event
    }

    pub fn warning(mailbox: &str, warning: String) -> Self {
        let mut event = Self::new(mailbox, MailboxEventType::SyncWarning);
        event.warning = warning;
        event
    }

    pub fn partial_fetch(mailbox: &str, downloaded: usize, to_download: usize) -> Self {
        let mut event = Self::warning(
            mailbox,
            format!("tried to fetch {to_download} messages but only got {downloaded}"),
        );
        event.total_downloaded = downloaded;
        event.total_to_download = to_download;
        event
    }
}

pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}
