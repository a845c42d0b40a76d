use mailarch::imap::build_uid_sequence;
use mailarch::sync::plan_sync;
use mailarch::types::{MailboxEvent, MailboxRecord};

fn mailbox(name: &str, attributes: &[&str]) -> MailboxRecord {
    MailboxRecord {
        name: name.to_string(),
        attributes: attributes.iter().map(|a| a.to_string()).collect(),
        last_synced_at: 0,
        num_emails: 0,
    }
}

fn names(mailboxes: &[MailboxRecord]) -> Vec<&str> {
    mailboxes.iter().map(|m| m.name.as_str()).collect()
}

#[test]
fn unselectable_mailboxes_are_dropped() {
    let planned = plan_sync(
        vec![
            mailbox("INBOX", &[]),
            mailbox("[Gmail]", &["\\Noselect", "\\HasChildren"]),
            mailbox("Sent", &["\\HasNoChildren"]),
        ],
        &[],
        &[],
    );
    assert_eq!(names(&planned), vec!["INBOX", "Sent"]);
}

#[test]
fn allow_list_intersects_and_deny_list_subtracts() {
    let candidates = vec![
        mailbox("INBOX", &[]),
        mailbox("Sent", &[]),
        mailbox("Spam", &[]),
        mailbox("Archive", &[]),
    ];

    let planned = plan_sync(
        candidates.clone(),
        &["INBOX".into(), "Spam".into(), "Archive".into()],
        &["Spam".into()],
    );
    assert_eq!(names(&planned), vec!["INBOX", "Archive"]);

    // Empty allow-list means all mailboxes.
    let planned = plan_sync(candidates, &[], &["Spam".into()]);
    assert_eq!(names(&planned), vec!["INBOX", "Sent", "Archive"]);
}

#[test]
fn deny_list_applies_after_allow_list() {
    let planned = plan_sync(
        vec![mailbox("INBOX", &[])],
        &["INBOX".into()],
        &["INBOX".into()],
    );
    assert!(planned.is_empty());
}

#[test]
fn uid_sequences_are_comma_joined() {
    assert_eq!(build_uid_sequence(&[7]), "7");
    assert_eq!(build_uid_sequence(&[1, 2, 5]), "1,2,5");
}

#[test]
fn event_wire_format_is_stable() {
    let event = MailboxEvent::partial_fetch("INBOX", 87, 100);
    let value = serde_json::to_value(&event).expect("serialize");
    assert_eq!(value["mailbox"], "INBOX");
    assert_eq!(value["event_type"], "SyncWarning");
    assert_eq!(value["total_downloaded"], 87);
    assert_eq!(value["total_to_download"], 100);
    assert_eq!(
        value["warning"],
        "tried to fetch 100 messages but only got 87"
    );
    assert_eq!(value["error"], "");

    let completed = MailboxEvent::completed("Archive", 0, 0);
    let value = serde_json::to_value(&completed).expect("serialize");
    assert_eq!(value["event_type"], "DownloadCompleted");

    let queued = MailboxEvent::queued("Archive");
    let value = serde_json::to_value(&queued).expect("serialize");
    assert_eq!(value["event_type"], "SyncQueued");
}
