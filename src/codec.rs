//! Turns raw RFC 5322 payloads into [`Message`]s.
//!
//! Decoding is pure: no I/O, no shared state, safe to run on any thread.

use std::error::Error as StdError;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use mailparse::{DispositionType, MailHeaderMap, MailParseError, ParsedMail};
use regex::Regex;

use crate::types::{Attachment, AttachmentContent, Message};

lazy_static! {
    static ref ADDRESS: Regex =
        Regex::new(r"[a-zA-Z0-9._-]+@[a-zA-Z0-9._-]+\.[a-zA-Z0-9_-]+").expect("valid regex");
    static ref HEADER_FIELD: regex::bytes::Regex =
        regex::bytes::Regex::new(r"^[!-9;-~]+:").expect("valid regex");
    static ref DATE_LIKE: Regex = Regex::new(
        r"(?i)\b\d{1,2}\s+(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+\d{2,4}\b"
    )
    .expect("valid regex");
}

const UNKNOWN_SENDER: &str = "Unknown";
const UNNAMED_ATTACHMENT: &str = "attachment";
const OCTET_STREAM: &str = "application/octet-stream";

/// Why a payload could not be decoded.
#[derive(Debug)]
pub enum CodecError {
    /// The payload was empty or only whitespace.
    Empty,
    /// The payload does not begin with a header field.
    NotAMessage,
    /// The MIME structure could not be decoded.
    Malformed(MailParseError),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Empty => f.write_str("empty message payload"),
            CodecError::NotAMessage => f.write_str("payload does not start with a header field"),
            CodecError::Malformed(e) => write!(f, "malformed MIME structure: {}", e),
        }
    }
}

impl StdError for CodecError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            CodecError::Malformed(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MailParseError> for CodecError {
    fn from(err: MailParseError) -> Self {
        CodecError::Malformed(err)
    }
}

/// Pull every address-looking token out of a header value. Display names are dropped.
pub fn extract_addresses(header: &str) -> Vec<String> {
    ADDRESS
        .find_iter(header)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Decode a full message.
///
/// Missing headers get defaults: an empty subject and message id, `Unknown` as sender, and
/// the time of decoding as date (also used when the date cannot be read). When the payload has
/// neither a plain nor an html body, an empty plain body is used. The line break that closes
/// a body part is dropped.
///
/// The returned message has id 0 and no flags; the caller fills those in.
pub fn parse(raw: &[u8]) -> Result<Message, CodecError> {
    let mail = parse_mail(raw)?;
    let headers = &mail.headers;

    let mut text_body = None;
    let mut html_body = None;
    let mut attachments = Vec::new();
    for leaf in leaves(&mail) {
        match role(leaf) {
            Role::Attachment => attachments.push(Attachment {
                filename: filename(leaf),
                content_type: content_type(leaf),
                size: leaf.get_body_raw()?.len(),
            }),
            Role::Plain if text_body.is_none() => text_body = Some(body_text(leaf)?),
            Role::Html if html_body.is_none() => html_body = Some(body_text(leaf)?),
            _ => {}
        }
    }
    if text_body.is_none() && html_body.is_none() {
        text_body = Some(String::new());
    }

    let header = |name: &str| {
        headers
            .get_first_value(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let addresses = |name: &str| {
        headers
            .get_all_values(name)
            .iter()
            .flat_map(|v| extract_addresses(v))
            .collect::<Vec<_>>()
    };

    Ok(Message {
        id: 0,
        uid: None,
        message_id: header("Message-ID").unwrap_or_default(),
        subject: header("Subject").unwrap_or_default(),
        from: header("From").unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
        to: addresses("To"),
        cc: addresses("Cc"),
        bcc: addresses("Bcc"),
        date: header("Date")
            .as_deref()
            .and_then(parse_date)
            .unwrap_or_else(Utc::now),
        text_body,
        html_body,
        attachments,
        flags: Vec::new(),
        size: None,
    })
}

/// Decode the bytes of the `index`th attachment, counting from zero in the order
/// [`parse`] lists them. `Ok(None)` if there is no such attachment.
pub fn attachment_content(
    raw: &[u8],
    index: usize,
) -> Result<Option<AttachmentContent>, CodecError> {
    let mail = parse_mail(raw)?;
    let leaf = match leaves(&mail)
        .into_iter()
        .filter(|leaf| role(leaf) == Role::Attachment)
        .nth(index)
    {
        Some(leaf) => leaf,
        None => return Ok(None),
    };
    Ok(Some(AttachmentContent {
        filename: filename(leaf),
        content_type: content_type(leaf),
        content: leaf.get_body_raw()?,
    }))
}

fn parse_mail(raw: &[u8]) -> Result<ParsedMail<'_>, CodecError> {
    let start = raw
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .ok_or(CodecError::Empty)?;
    let raw = &raw[start..];
    if !HEADER_FIELD.is_match(raw) {
        return Err(CodecError::NotAMessage);
    }
    Ok(mailparse::parse_mail(raw)?)
}

// Strict RFC 5322 first. The lenient parser reads anything, garbage included, so it only
// gets values that at least contain a day, a month name and a year.
fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.with_timezone(&Utc));
    }
    if !DATE_LIKE.is_match(value) {
        return None;
    }
    let secs = mailparse::dateparse(value).ok().filter(|secs| *secs > 0)?;
    Utc.timestamp_opt(secs, 0).single()
}

// MIME framing ends every leaf body with a line break that is not part of the content.
fn body_text(leaf: &ParsedMail<'_>) -> Result<String, CodecError> {
    let mut body = leaf.get_body()?;
    if body.ends_with("\r\n") {
        body.truncate(body.len() - 2);
    } else if body.ends_with('\n') {
        body.truncate(body.len() - 1);
    }
    Ok(body)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Plain,
    Html,
    Attachment,
    Other,
}

// Depth-first leaves of the MIME tree.
fn leaves<'a, 'b>(part: &'b ParsedMail<'a>) -> Vec<&'b ParsedMail<'a>> {
    if part.subparts.is_empty() {
        if part.ctype.mimetype.starts_with("multipart/") {
            return Vec::new();
        }
        return vec![part];
    }
    part.subparts.iter().flat_map(|sub| leaves(sub)).collect()
}

fn role(leaf: &ParsedMail<'_>) -> Role {
    let disposition = leaf.get_content_disposition();
    let named =
        disposition.params.contains_key("filename") || leaf.ctype.params.contains_key("name");
    if matches!(disposition.disposition, DispositionType::Attachment) || named {
        return Role::Attachment;
    }
    match leaf.ctype.mimetype.as_str() {
        "text/plain" => Role::Plain,
        "text/html" => Role::Html,
        t if t.starts_with("text/") => Role::Other,
        _ => Role::Attachment,
    }
}

fn filename(leaf: &ParsedMail<'_>) -> String {
    let disposition = leaf.get_content_disposition();
    disposition
        .params
        .get("filename")
        .or_else(|| leaf.ctype.params.get("name"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNNAMED_ATTACHMENT.to_string())
}

fn content_type(leaf: &ParsedMail<'_>) -> String {
    let mimetype = leaf.ctype.mimetype.trim();
    if mimetype.is_empty() {
        OCTET_STREAM.to_string()
    } else {
        mimetype.to_string()
    }
}
