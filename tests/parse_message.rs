use std::borrow::Cow;

use mailarch::errors::Error;
use mailarch::imap::FetchedMessage;
use mailarch::parse::{envelope_from_imap, fingerprint, parse_message};
use mailarch::types::{Disposition, Envelope, EnvelopeAddress};

fn address(name: &str, mailbox: &str, host: &str) -> EnvelopeAddress {
    EnvelopeAddress {
        name: Some(name.to_string()),
        mailbox: Some(mailbox.to_string()),
        host: Some(host.to_string()),
    }
}

fn sample_envelope() -> Envelope {
    Envelope {
        date: Some("Mon, 2 Jan 2006 15:04:05 -0700".into()),
        subject: Some("Quarterly report".into()),
        from: Some(vec![address("Ana", "ana", "example.com")]),
        sender: None,
        reply_to: None,
        to: Some(vec![address("Bob", "bob", "example.com")]),
        cc: None,
        bcc: None,
        in_reply_to: None,
        message_id: Some("<abc@example.com>".into()),
    }
}

fn multipart_fixture() -> Vec<u8> {
    concat!(
        "Subject: test\r\n",
        "Content-Type: multipart/mixed; boundary=\"b\"\r\n",
        "\r\n",
        "--b\r\n",
        "Content-Type: text/plain; charset=utf-8\r\n",
        "\r\n",
        "Hello there\r\n",
        "--b\r\n",
        "Content-Type: text/html; charset=utf-8\r\n",
        "\r\n",
        "<p>Hello there</p>\r\n",
        "--b\r\n",
        "Content-Type: application/pdf; name=\"file.pdf\"\r\n",
        "Content-Disposition: attachment; filename=\"file.pdf\"\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
        "SGVsbG8=\r\n",
        "--b--\r\n",
    )
    .as_bytes()
    .to_vec()
}

fn message(body: Option<Vec<u8>>, envelope: Option<Envelope>, uid: u32) -> FetchedMessage {
    FetchedMessage {
        uid,
        flags: vec!["\\Seen".into()],
        envelope,
        body,
    }
}

#[test]
fn fingerprint_ignores_uid_when_envelope_is_present() {
    let envelope = sample_envelope();
    let a = fingerprint(Some(&envelope), 7).expect("fingerprint");
    let b = fingerprint(Some(&envelope), 42).expect("fingerprint");
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);
}

#[test]
fn fingerprint_distinguishes_absent_and_empty_address_lists() {
    let mut with_empty_list = sample_envelope();
    with_empty_list.cc = Some(Vec::new());
    let mut without_list = sample_envelope();
    without_list.cc = None;

    let a = fingerprint(Some(&with_empty_list), 1).expect("fingerprint");
    let b = fingerprint(Some(&without_list), 1).expect("fingerprint");
    assert_ne!(a, b);
}

#[test]
fn fingerprint_falls_back_to_uid_without_envelope() {
    assert_eq!(
        fingerprint(None, 7).expect("fingerprint"),
        "nil-envelope;uid=7"
    );
}

#[test]
fn parse_extracts_bodies_and_attachment_metadata() {
    let email = parse_message(
        message(Some(multipart_fixture()), Some(sample_envelope()), 3),
        "INBOX",
        false,
    )
    .expect("parse");

    assert_eq!(email.mailbox, "INBOX");
    assert_eq!(email.uid, 3);
    assert!(email.text_body.contains("Hello there"));
    assert!(email.html_body.contains("<p>Hello there</p>"));
    assert!(email.parse_error.is_empty());

    assert_eq!(email.attachments.len(), 1);
    let attachment = &email.attachments[0];
    assert_eq!(attachment.file_name, "file.pdf");
    assert_eq!(attachment.media_type, "application");
    assert_eq!(attachment.media_subtype, "pdf");
    assert_eq!(attachment.size_bytes, 5); // "Hello" after base64 decoding
    assert_eq!(attachment.transfer_encoding, "base64");
    assert_eq!(attachment.disposition, Disposition::Attachment);
}

#[test]
fn parse_preserves_envelope_fields() {
    let email = parse_message(
        message(Some(multipart_fixture()), Some(sample_envelope()), 3),
        "INBOX",
        false,
    )
    .expect("parse");

    let envelope = email.envelope.expect("envelope");
    assert_eq!(envelope.subject.as_deref(), Some("Quarterly report"));
    assert_eq!(envelope.message_id.as_deref(), Some("<abc@example.com>"));
    let from = envelope.first_from();
    assert_eq!(from.mailbox.as_deref(), Some("ana"));
    assert_eq!(from.host.as_deref(), Some("example.com"));
}

#[test]
fn inline_image_prefers_content_description_for_file_name() {
    let raw = concat!(
        "Subject: test\r\n",
        "Content-Type: multipart/mixed; boundary=\"b\"\r\n",
        "\r\n",
        "--b\r\n",
        "Content-Type: image/png; name=\"wrong.png\"\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "Content-ID: <chart@local>\r\n",
        "Content-Description: chart.png\r\n",
        "Content-Disposition: inline\r\n",
        "\r\n",
        "iVBORw0=\r\n",
        "--b--\r\n",
    )
    .as_bytes()
    .to_vec();

    let email = parse_message(message(Some(raw), Some(sample_envelope()), 1), "INBOX", false)
        .expect("parse");

    assert_eq!(email.attachments.len(), 1);
    let attachment = &email.attachments[0];
    assert_eq!(attachment.file_name, "chart.png");
    assert_eq!(attachment.disposition, Disposition::Inline);
    assert_eq!(attachment.media_type, "image");
}

#[test]
fn inline_image_falls_back_to_name_param_then_content_id() {
    let with_name = concat!(
        "Content-Type: image/png; name=\"named.png\"\r\n",
        "Content-Disposition: inline\r\n",
        "\r\n",
        "data\r\n",
    )
    .as_bytes()
    .to_vec();
    let email = parse_message(
        message(Some(with_name), Some(sample_envelope()), 1),
        "INBOX",
        false,
    )
    .expect("parse");
    assert_eq!(email.attachments[0].file_name, "named.png");

    let with_content_id = concat!(
        "Content-Type: image/png\r\n",
        "Content-Disposition: inline\r\n",
        "Content-ID: <img-1@local>\r\n",
        "\r\n",
        "data\r\n",
    )
    .as_bytes()
    .to_vec();
    let email = parse_message(
        message(Some(with_content_id), Some(sample_envelope()), 1),
        "INBOX",
        false,
    )
    .expect("parse");
    assert_eq!(email.attachments[0].file_name, "img-1@local");
}

#[test]
fn unknown_inline_content_sets_parse_warning() {
    let raw = concat!(
        "Subject: test\r\n",
        "Content-Type: multipart/mixed; boundary=\"b\"\r\n",
        "\r\n",
        "--b\r\n",
        "Content-Type: application/octet-stream\r\n",
        "\r\n",
        "blob\r\n",
        "--b--\r\n",
    )
    .as_bytes()
    .to_vec();

    let email = parse_message(message(Some(raw), Some(sample_envelope()), 1), "INBOX", false)
        .expect("parse");
    assert!(email
        .parse_warning
        .contains("unknown inline content type: application/octet-stream"));
}

#[test]
fn missing_body_is_recorded_in_lenient_mode() {
    let email = parse_message(message(None, Some(sample_envelope()), 9), "INBOX", false)
        .expect("parse");
    assert_eq!(email.parse_error, "server did not return a message body");
    assert!(email.text_body.is_empty());
    // The membership still gets a usable fingerprint.
    assert_eq!(email.our_id.len(), 64);
}

#[test]
fn missing_body_aborts_in_strict_mode() {
    let err = parse_message(message(None, Some(sample_envelope()), 9), "INBOX", true)
        .expect_err("strict parse should fail");
    assert!(matches!(err, Error::ParseFatal(_)));
}

#[test]
fn envelope_conversion_decodes_encoded_words() {
    let imap_envelope = imap_proto::types::Envelope {
        date: Some(Cow::Borrowed(&b"Mon, 2 Jan 2006 15:04:05 -0700"[..])),
        subject: Some(Cow::Borrowed(&b"=?utf-8?q?Caf=C3=A9_menu?="[..])),
        from: Some(vec![imap_proto::types::Address {
            name: Some(Cow::Borrowed(&b"=?utf-8?q?Ren=C3=A9?="[..])),
            adl: None,
            mailbox: Some(Cow::Borrowed(&b"rene"[..])),
            host: Some(Cow::Borrowed(&b"example.com"[..])),
        }]),
        sender: None,
        reply_to: None,
        to: None,
        cc: None,
        bcc: None,
        in_reply_to: None,
        message_id: Some(Cow::Borrowed(&b"<id@example.com>"[..])),
    };

    let envelope = envelope_from_imap(&imap_envelope);
    assert_eq!(envelope.subject.as_deref(), Some("Café menu"));
    let from = envelope.first_from();
    assert_eq!(from.name.as_deref(), Some("René"));
    assert_eq!(from.mailbox.as_deref(), Some("rene"));
}
