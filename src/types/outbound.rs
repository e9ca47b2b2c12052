use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

/// A message the caller wants sent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    /// Primary recipients. On the boundary this is either one string (comma separated) or a
    /// list.
    #[serde(deserialize_with = "one_or_many")]
    pub to: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub cc: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub attachments: Vec<OutboundAttachment>,
}

/// A file to attach to an [`OutboundMessage`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundAttachment {
    pub filename: String,
    /// Guessed as `application/octet-stream` when absent.
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(flatten)]
    pub source: AttachmentSource,
}

/// Where the bytes of an outbound attachment come from.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttachmentSource {
    /// Inline bytes, base64 on the boundary.
    Content(#[serde(with = "super::base64_bytes")] Vec<u8>),
    /// A file read at send time.
    Path(PathBuf),
}

impl AttachmentSource {
    /// Load the attachment bytes.
    pub fn load(&self) -> std::io::Result<Vec<u8>> {
        match self {
            AttachmentSource::Content(bytes) => Ok(bytes.clone()),
            AttachmentSource::Path(path) => std::fs::read(path),
        }
    }
}

fn is_blank(s: &Option<String>) -> bool {
    s.as_deref().map_or(true, |s| s.trim().is_empty())
}

impl OutboundMessage {
    /// Start a message to the given recipients.
    pub fn to<I, S>(recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        OutboundMessage {
            to: recipients.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    pub fn attach(mut self, attachment: OutboundAttachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Structural checks that need no I/O.
    ///
    /// Address syntax and attachment readability are checked when the message is composed.
    pub fn validate(&self) -> Result<(), String> {
        if self.to.iter().all(|r| r.trim().is_empty()) {
            return Err("at least one recipient is required".to_string());
        }
        if is_blank(&self.subject) && is_blank(&self.text) && is_blank(&self.html) {
            return Err("a message needs a subject or a body".to_string());
        }
        if let Some(a) = self.attachments.iter().find(|a| a.filename.trim().is_empty()) {
            return Err(format!("attachment without a filename ({:?})", a.content_type));
        }
        Ok(())
    }
}

/// What the relay said after accepting a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    /// The `Message-ID` assigned to the sent message.
    pub message_id: String,
    /// The relay's acknowledgment, code and text.
    pub response: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let list = match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        OneOrMany::Many(v) => v,
    };
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipients_from_string_or_list() {
        let m: OutboundMessage =
            serde_json::from_str(r#"{"to": "a@x.com, b@y.org", "subject": "hi"}"#).unwrap();
        assert_eq!(m.to, vec!["a@x.com", "b@y.org"]);
        assert!(m.cc.is_empty());

        let m: OutboundMessage =
            serde_json::from_str(r#"{"to": ["a@x.com"], "cc": "c@z.net", "text": "t"}"#).unwrap();
        assert_eq!(m.to, vec!["a@x.com"]);
        assert_eq!(m.cc, vec!["c@z.net"]);
    }

    #[test]
    fn missing_to_is_rejected() {
        assert!(serde_json::from_str::<OutboundMessage>(r#"{"subject": "hi"}"#).is_err());
    }

    #[test]
    fn attachment_sources() {
        let m: OutboundMessage = serde_json::from_str(
            r#"{"to": "a@x.com", "text": "see attached", "attachments": [
                {"filename": "a.txt", "content": "aGVsbG8="},
                {"filename": "b.pdf", "contentType": "application/pdf", "path": "/tmp/b.pdf"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(
            m.attachments[0].source,
            AttachmentSource::Content(b"hello".to_vec())
        );
        assert_eq!(
            m.attachments[1].source,
            AttachmentSource::Path(PathBuf::from("/tmp/b.pdf"))
        );
        assert_eq!(m.attachments[0].source.load().unwrap(), b"hello");
    }

    #[test]
    fn validate() {
        assert!(OutboundMessage::default().subject("s").validate().is_err());
        assert!(OutboundMessage::to(["a@x.com"]).validate().is_err());
        assert!(OutboundMessage::to(["a@x.com"]).subject("s").validate().is_ok());
        assert!(OutboundMessage::to(["a@x.com"]).text("body").validate().is_ok());
        assert!(OutboundMessage::to([" "]).text("body").validate().is_err());
    }
}
