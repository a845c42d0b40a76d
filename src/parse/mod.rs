//! Pure message parsing: envelope decoding, content fingerprinting and the
//! MIME walk that extracts bodies and attachment metadata.

use imap_proto::types::{Address as ImapAddress, Envelope as ImapEnvelope};
use mailparse::{DispositionType, MailHeaderMap, ParsedContentDisposition, ParsedMail};
use sha2::{Digest, Sha256};

use crate::errors::{Error, Result};
use crate::imap::FetchedMessage;
use crate::types::{AttachmentMetadata, Disposition, Email, Envelope, EnvelopeAddress};

/// Parses one fetched message into an [`Email`].
///
/// In lenient mode (the default) parsing is optimistic: we consume as much
/// of the message as possible, recording the last error in `parse_error`
/// and continuing. A row with empty bodies is still a valid row; the
/// membership keeps its UID either way. In strict mode the first error
/// aborts the whole batch.
pub fn parse_message(message: FetchedMessage, mailbox: &str, strict: bool) -> Result<Email> {
    let FetchedMessage {
        uid,
        flags,
        envelope,
        body,
    } = message;

    let mut email = Email {
        our_id: fingerprint(envelope.as_ref(), uid)?,
        uid,
        mailbox: mailbox.to_string(),
        envelope,
        flags,
        ..Default::default()
    };

    let Some(raw) = body else {
        record_error(
            &mut email,
            strict,
            "server did not return a message body".to_string(),
        )?;
        return Ok(email);
    };

    match mailparse::parse_mail(&raw) {
        Ok(parsed) => walk_parts(&parsed, &mut email, strict)?,
        Err(err) => {
            record_error(&mut email, strict, format!("failed to parse message: {err}"))?;
        }
    }

    Ok(email)
}

/// Computes the content fingerprint used as the cross-mailbox message id.
///
/// Message-Id headers are unreliable (some servers omit them, some rewrite
/// them on move), so the id is a SHA-256 over a fixed concatenation of
/// envelope parts. Absent parts are omitted entirely rather than
/// contributing an empty string. The concatenation order is a stable
/// external contract; do not reorder.
pub fn fingerprint(envelope: Option<&Envelope>, uid: u32) -> Result<String> {
    let Some(envelope) = envelope else {
        return Ok(format!("nil-envelope;uid={uid}"));
    };

    let mut sources = String::new();
    if let Some(date) = &envelope.date {
        sources.push_str(date);
    }
    if let Some(subject) = &envelope.subject {
        sources.push_str(subject);
    }
    for list in [
        &envelope.from,
        &envelope.to,
        &envelope.cc,
        &envelope.bcc,
        &envelope.reply_to,
    ] {
        if let Some(addresses) = list {
            let encoded = serde_json::to_string(addresses)
                .map_err(|e| Error::Unexpected(format!("encoding envelope addresses: {e}")))?;
            sources.push_str(&encoded);
        }
    }
    if let Some(in_reply_to) = &envelope.in_reply_to {
        sources.push_str(in_reply_to);
    }
    if let Some(message_id) = &envelope.message_id {
        sources.push_str(message_id);
    }

    Ok(format!("{:x}", Sha256::digest(sources.as_bytes())))
}

/// Converts a wire envelope into an owned, header-decoded [`Envelope`].
pub fn envelope_from_imap(envelope: &ImapEnvelope<'_>) -> Envelope {
    Envelope {
        date: envelope.date.as_deref().map(decode_header_value),
        subject: envelope.subject.as_deref().map(decode_header_value),
        from: envelope.from.as_deref().map(convert_addresses),
        sender: envelope.sender.as_deref().map(convert_addresses),
        reply_to: envelope.reply_to.as_deref().map(convert_addresses),
        to: envelope.to.as_deref().map(convert_addresses),
        cc: envelope.cc.as_deref().map(convert_addresses),
        bcc: envelope.bcc.as_deref().map(convert_addresses),
        in_reply_to: envelope.in_reply_to.as_deref().map(decode_header_value),
        message_id: envelope.message_id.as_deref().map(decode_header_value),
    }
}

fn convert_addresses(addresses: &[ImapAddress<'_>]) -> Vec<EnvelopeAddress> {
    addresses
        .iter()
        .map(|address| EnvelopeAddress {
            name: address.name.as_deref().map(decode_header_value),
            mailbox: address
                .mailbox
                .as_deref()
                .map(|raw| String::from_utf8_lossy(raw).to_string()),
            host: address
                .host
                .as_deref()
                .map(|raw| String::from_utf8_lossy(raw).to_string()),
        })
        .collect()
}

/// Decodes RFC 2047 encoded words by round-tripping the value through a
/// synthetic header. Values without encoded words pass through untouched.
fn decode_header_value(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw).to_string();
    if !text.contains("=?") {
        return text;
    }
    let synthetic = format!("Subject: {text}\r\n\r\n");
    match mailparse::parse_mail(synthetic.as_bytes()) {
        Ok(parsed) => parsed
            .headers
            .get_first_value("Subject")
            .unwrap_or(text),
        Err(_) => text,
    }
}

fn walk_parts(part: &ParsedMail, email: &mut Email, strict: bool) -> Result<()> {
    if !part.subparts.is_empty() {
        for child in &part.subparts {
            walk_parts(child, email, strict)?;
        }
        return Ok(());
    }

    let mimetype = part.ctype.mimetype.to_ascii_lowercase();
    if mimetype.starts_with("multipart/") {
        return Ok(());
    }

    let disposition = part.get_content_disposition();
    if matches!(disposition.disposition, DispositionType::Attachment) {
        let metadata = attachment_part(part, &mimetype, &disposition, email, strict)?;
        email.attachments.push(metadata);
        return Ok(());
    }

    // Inline parts: plain text, HTML, inline images, or noise.
    if mimetype == "text/plain" {
        match part.get_body() {
            Ok(body) => email.text_body = body,
            Err(err) => record_error(email, strict, format!("failed to read body: {err}"))?,
        }
    } else if mimetype == "text/html" {
        match part.get_body() {
            Ok(body) => email.html_body = body,
            Err(err) => record_error(email, strict, format!("failed to read body: {err}"))?,
        }
    } else if mimetype.starts_with("image/") {
        let metadata = inline_image_part(part, &mimetype, &disposition, email, strict)?;
        email.attachments.push(metadata);
    } else {
        email.parse_warning = format!("unknown inline content type: {mimetype}");
    }

    Ok(())
}

fn attachment_part(
    part: &ParsedMail,
    mimetype: &str,
    disposition: &ParsedContentDisposition,
    email: &mut Email,
    strict: bool,
) -> Result<AttachmentMetadata> {
    let file_name = param_file_name(part, disposition)
        .or_else(|| header_value(part, "Content-Description"))
        .unwrap_or_default();

    build_attachment(part, mimetype, file_name, Disposition::Attachment, email, strict)
}

fn inline_image_part(
    part: &ParsedMail,
    mimetype: &str,
    disposition: &ParsedContentDisposition,
    email: &mut Email,
    strict: bool,
) -> Result<AttachmentMetadata> {
    let file_name = header_value(part, "Content-Description")
        .or_else(|| param_file_name(part, disposition))
        .or_else(|| content_id(part))
        .unwrap_or_default();

    build_attachment(part, mimetype, file_name, Disposition::Inline, email, strict)
}

fn build_attachment(
    part: &ParsedMail,
    mimetype: &str,
    file_name: String,
    disposition: Disposition,
    email: &mut Email,
    strict: bool,
) -> Result<AttachmentMetadata> {
    let size_bytes = match part.get_body_raw() {
        Ok(body) => body.len(),
        Err(err) => {
            record_error(email, strict, format!("failed to read body: {err}"))?;
            0
        }
    };

    let (media_type, media_subtype) = split_media_type(mimetype);

    Ok(AttachmentMetadata {
        file_name,
        media_type,
        media_subtype,
        size_bytes,
        transfer_encoding: header_value(part, "Content-Transfer-Encoding").unwrap_or_default(),
        disposition,
    })
}

/// `name`/`filename` from the disposition parameters, falling back to the
/// content-type parameters. mailparse lower-cases parameter names, so the
/// lookup is case-insensitive by construction.
fn param_file_name(part: &ParsedMail, disposition: &ParsedContentDisposition) -> Option<String> {
    disposition
        .params
        .get("filename")
        .or_else(|| disposition.params.get("name"))
        .or_else(|| part.ctype.params.get("name"))
        .or_else(|| part.ctype.params.get("filename"))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn content_id(part: &ParsedMail) -> Option<String> {
    part.headers
        .get_first_value("Content-ID")
        .map(|value| value.trim().trim_matches(&['<', '>'][..]).to_string())
        .filter(|value| !value.is_empty())
}

fn header_value(part: &ParsedMail, name: &str) -> Option<String> {
    part.headers
        .get_first_value(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn split_media_type(mimetype: &str) -> (String, String) {
    match mimetype.split_once('/') {
        Some((media, sub)) => (media.to_string(), sub.to_string()),
        None => (mimetype.to_string(), String::new()),
    }
}

fn record_error(email: &mut Email, strict: bool, message: String) -> Result<()> {
    if strict {
        return Err(Error::ParseFatal(message));
    }
    // Lenient mode keeps only the last error seen.
    email.parse_error = message;
    Ok(())
}
