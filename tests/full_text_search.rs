use std::collections::HashSet;

use tempfile::TempDir;

use mailarch::parse::fingerprint;
use mailarch::storage::Catalogue;
use mailarch::types::{Email, Envelope, EnvelopeAddress};

fn indexed_email(uid: u32, subject: &str, text: &str, html: &str) -> Email {
    let envelope = Envelope {
        subject: Some(subject.to_string()),
        from: Some(vec![EnvelopeAddress {
            name: Some("Marge Orama".into()),
            mailbox: Some("marge".into()),
            host: Some("example.com".into()),
        }]),
        message_id: Some(format!("<{uid}@example.com>")),
        ..Default::default()
    };
    Email {
        our_id: fingerprint(Some(&envelope), uid).expect("fingerprint"),
        uid,
        mailbox: "INBOX".into(),
        envelope: Some(envelope),
        text_body: text.to_string(),
        html_body: html.to_string(),
        ..Default::default()
    }
}

async fn seeded_catalogue(dir: &TempDir, emails: &[Email]) -> Catalogue {
    let catalogue = Catalogue::open(&dir.path().join("archive.db"))
        .await
        .expect("open catalogue");
    let uids: HashSet<u32> = emails.iter().map(|email| email.uid).collect();
    catalogue
        .reconcile_mailbox("INBOX", &uids)
        .await
        .expect("reconcile");
    catalogue.add_emails("INBOX", emails).await.expect("add");
    catalogue.rebuild_fts().await.expect("rebuild fts");
    catalogue
}

#[tokio::test]
async fn search_returns_snippet_highlighted_matches() {
    let dir = TempDir::new().expect("tempdir");
    let catalogue = seeded_catalogue(
        &dir,
        &[
            indexed_email(1, "database migration", "the migration finished without errors", ""),
            indexed_email(2, "lunch plans", "pizza on friday", ""),
        ],
    )
    .await;

    let hits = catalogue
        .full_text_search("migration")
        .await
        .expect("search");
    assert_eq!(hits.len(), 1);
    assert!(hits[0].text_body.contains("<b>migration</b>"));
    let subject = hits[0]
        .envelope
        .as_ref()
        .and_then(|envelope| envelope.subject.clone())
        .unwrap_or_default();
    assert!(subject.contains("<b>migration</b>"));
}

#[tokio::test]
async fn search_matches_first_from_address() {
    let dir = TempDir::new().expect("tempdir");
    let catalogue = seeded_catalogue(
        &dir,
        &[indexed_email(1, "hello", "nothing notable here", "")],
    )
    .await;

    let hits = catalogue.full_text_search("marge").await.expect("search");
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn html_only_messages_are_indexed_as_text() {
    let dir = TempDir::new().expect("tempdir");
    let catalogue = seeded_catalogue(
        &dir,
        &[indexed_email(
            1,
            "newsletter",
            "",
            "<html><body><p>pineapple pizza special</p></body></html>",
        )],
    )
    .await;

    let hits = catalogue.full_text_search("pineapple").await.expect("search");
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn rebuild_replaces_stale_index_contents() {
    let dir = TempDir::new().expect("tempdir");
    let catalogue = seeded_catalogue(
        &dir,
        &[indexed_email(1, "first batch", "quince marmalade", "")],
    )
    .await;
    assert_eq!(
        catalogue.full_text_search("quince").await.expect("search").len(),
        1
    );

    // A second rebuild over the same rows is a no-op, not a duplication.
    catalogue.rebuild_fts().await.expect("rebuild again");
    assert_eq!(
        catalogue.full_text_search("quince").await.expect("search").len(),
        1
    );
}
