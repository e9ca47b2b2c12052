//! Sending mail over SMTP.
//!
//! Transmission is stateless beyond the relay handle: every [`TransmissionSession::send`]
//! composes one message and hands it to the [`Relay`], which opens its own SMTP exchange.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{SmtpTransport, Transport};
use log::{debug, info};
use uuid::Uuid;

use crate::error::{Error, ErrorKind, Result};
use crate::types::{Credentials, Endpoint, OutboundMessage, Secret, SendReceipt};

const OCTET_STREAM: &str = "application/octet-stream";

/// Why the relay did not take a message.
#[derive(Clone, Debug)]
pub enum RelayError {
    /// The server answered with a 5xx reply. Retrying will not help.
    Permanent(String),
    /// The server answered with a 4xx reply.
    Transient(String),
    /// No usable SMTP exchange happened: connection, TLS or protocol failure.
    Unreachable(String),
}

impl RelayError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, RelayError::Permanent(_))
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Permanent(e) => write!(f, "permanent failure: {}", e),
            RelayError::Transient(e) => write!(f, "transient failure: {}", e),
            RelayError::Unreachable(e) => write!(f, "relay unreachable: {}", e),
        }
    }
}

impl StdError for RelayError {}

impl From<lettre::transport::smtp::Error> for RelayError {
    fn from(err: lettre::transport::smtp::Error) -> RelayError {
        if err.is_permanent() {
            RelayError::Permanent(err.to_string())
        } else if err.is_transient() {
            RelayError::Transient(err.to_string())
        } else {
            RelayError::Unreachable(err.to_string())
        }
    }
}

/// The account a relay authenticates as, lent for a single exchange.
#[derive(Clone, Copy)]
pub struct RelayLogin<'a> {
    pub user: &'a str,
    pub secret: &'a Secret,
}

impl<'a> From<&'a Credentials> for RelayLogin<'a> {
    fn from(credentials: &'a Credentials) -> Self {
        RelayLogin {
            user: &credentials.user,
            secret: &credentials.secret,
        }
    }
}

impl fmt::Debug for RelayLogin<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayLogin")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// Something that can deliver a composed message.
///
/// A relay never keeps the login it is given; each call authenticates afresh.
pub trait Relay: Send {
    /// Open a connection, authenticate and close it again.
    fn verify(&self, login: RelayLogin<'_>) -> std::result::Result<(), RelayError>;

    /// Deliver `message`. Returns the server's acknowledgment.
    fn transmit(
        &self,
        login: RelayLogin<'_>,
        message: &lettre::Message,
    ) -> std::result::Result<String, RelayError>;
}

/// A [`Relay`] backed by lettre's blocking SMTP transport.
///
/// A secure endpoint uses implicit TLS. Otherwise STARTTLS is used when the server offers it.
/// The transport is built per exchange, so the password only lives as long as one exchange.
pub struct SmtpRelay {
    endpoint: Endpoint,
    tls: Tls,
    timeout: Option<Duration>,
}

impl SmtpRelay {
    pub fn new(
        endpoint: &Endpoint,
        timeout: Option<Duration>,
        danger_skip_tls_verify: bool,
    ) -> std::result::Result<Self, RelayError> {
        let tls = TlsParameters::builder(endpoint.host.clone())
            .dangerous_accept_invalid_certs(danger_skip_tls_verify)
            .dangerous_accept_invalid_hostnames(danger_skip_tls_verify)
            .build()?;
        let tls = if endpoint.secure {
            Tls::Wrapper(tls)
        } else {
            Tls::Opportunistic(tls)
        };
        Ok(SmtpRelay {
            endpoint: endpoint.clone(),
            tls,
            timeout,
        })
    }

    fn transport(&self, login: RelayLogin<'_>) -> SmtpTransport {
        SmtpTransport::builder_dangerous(self.endpoint.host.as_str())
            .port(self.endpoint.port)
            .tls(self.tls.clone())
            .credentials(SmtpCredentials::new(
                login.user.to_string(),
                login.secret.expose().to_string(),
            ))
            .timeout(self.timeout)
            .build()
    }
}

impl fmt::Debug for SmtpRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpRelay")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl Relay for SmtpRelay {
    fn verify(&self, login: RelayLogin<'_>) -> std::result::Result<(), RelayError> {
        if self.transport(login).test_connection()? {
            Ok(())
        } else {
            Err(RelayError::Unreachable(
                "connection closed during verification".to_string(),
            ))
        }
    }

    fn transmit(
        &self,
        login: RelayLogin<'_>,
        message: &lettre::Message,
    ) -> std::result::Result<String, RelayError> {
        let response = self.transport(login).send(message)?;
        let text = response
            .message()
            .map(|line| line.to_string())
            .collect::<Vec<String>>()
            .join(" ");
        Ok(format!("{} {}", response.code(), text))
    }
}

/// The verified transmission side of a session.
pub struct TransmissionSession {
    relay: Box<dyn Relay>,
    sender: Mailbox,
}

impl fmt::Debug for TransmissionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransmissionSession")
            .field("sender", &self.sender.to_string())
            .finish_non_exhaustive()
    }
}

fn sender_mailbox(user: &str, endpoint: &Endpoint) -> Result<Mailbox> {
    let address = if user.contains('@') {
        user.to_string()
    } else {
        format!("{}@{}", user, endpoint.host)
    };
    address.parse().map_err(|e| {
        Error::new(
            ErrorKind::AuthFailed,
            format!("{:?} cannot be used as a sender address: {}", address, e),
        )
    })
}

impl TransmissionSession {
    /// Verify the relay once and remember who sends.
    ///
    /// The login user is the sender address; a bare user name is qualified with the relay's
    /// host. The login itself is not kept.
    pub fn establish(
        relay: Box<dyn Relay>,
        login: RelayLogin<'_>,
        endpoint: &Endpoint,
    ) -> Result<Self> {
        let sender = sender_mailbox(login.user, endpoint)?;
        relay.verify(login).map_err(|e| {
            let kind = if e.is_permanent() {
                ErrorKind::AuthFailed
            } else {
                ErrorKind::UnreachableHost
            };
            Error::new(kind, format!("{}: {}", endpoint, e))
        })?;
        info!("relay {} verified for {}", endpoint, sender);
        Ok(TransmissionSession { relay, sender })
    }

    /// Compose and send one message.
    ///
    /// Everything that can be checked locally is checked before the relay is contacted.
    pub fn send(&self, login: RelayLogin<'_>, request: &OutboundMessage) -> Result<SendReceipt> {
        let message_id = self.new_message_id();
        let message = compose(&self.sender, request, &message_id)?;
        let response = self.relay.transmit(login, &message).map_err(|e| {
            Error::new(ErrorKind::TransmissionRejected, e.to_string())
        })?;
        debug!("sent {}: {}", message_id, response);
        Ok(SendReceipt {
            message_id,
            response,
        })
    }

    fn new_message_id(&self) -> String {
        format!("<{}@{}>", Uuid::new_v4(), self.sender.email.domain())
    }
}

fn invalid(detail: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidRequest, detail)
}

fn mailboxes(addresses: &[String]) -> Result<Vec<Mailbox>> {
    addresses
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .map(|a| {
            a.parse::<Mailbox>()
                .map_err(|e| invalid(format!("{:?} is not a valid address: {}", a, e)))
        })
        .collect()
}

/// Build the MIME message for `request`.
///
/// The body is plain, html, or both as `multipart/alternative`. Attachments wrap it in
/// `multipart/mixed`. With no body at all an empty plain part is sent.
pub fn compose(
    sender: &Mailbox,
    request: &OutboundMessage,
    message_id: &str,
) -> Result<lettre::Message> {
    request.validate().map_err(invalid)?;

    let mut builder = lettre::Message::builder()
        .from(sender.clone())
        .message_id(Some(message_id.to_string()))
        .date_now()
        .subject(request.subject.clone().unwrap_or_default());
    for to in mailboxes(&request.to)? {
        builder = builder.to(to);
    }
    for cc in mailboxes(&request.cc)? {
        builder = builder.cc(cc);
    }
    for bcc in mailboxes(&request.bcc)? {
        builder = builder.bcc(bcc);
    }

    let mut attachments = Vec::with_capacity(request.attachments.len());
    for attachment in &request.attachments {
        let bytes = attachment.source.load().map_err(|e| {
            invalid(format!("cannot read attachment {}: {}", attachment.filename, e))
        })?;
        let content_type = attachment.content_type.as_deref().unwrap_or(OCTET_STREAM);
        let content_type = ContentType::parse(content_type).map_err(|e| {
            invalid(format!(
                "attachment {} has a bad content type: {}",
                attachment.filename, e
            ))
        })?;
        attachments.push(Attachment::new(attachment.filename.clone()).body(bytes, content_type));
    }

    let body = match (&request.text, &request.html) {
        (Some(text), Some(html)) => Body::Multi(MultiPart::alternative_plain_html(
            text.clone(),
            html.clone(),
        )),
        (None, Some(html)) => Body::Single(SinglePart::html(html.clone())),
        (text, None) => Body::Single(SinglePart::plain(text.clone().unwrap_or_default())),
    };

    let built = if attachments.is_empty() {
        match body {
            Body::Single(part) => builder.singlepart(part),
            Body::Multi(part) => builder.multipart(part),
        }
    } else {
        let mut mixed = match body {
            Body::Single(part) => MultiPart::mixed().singlepart(part),
            Body::Multi(part) => MultiPart::mixed().multipart(part),
        };
        for attachment in attachments {
            mixed = mixed.singlepart(attachment);
        }
        builder.multipart(mixed)
    };
    built.map_err(|e| invalid(e.to_string()))
}

enum Body {
    Single(SinglePart),
    Multi(MultiPart),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SpyRelay;
    use crate::types::{AttachmentSource, OutboundAttachment};

    fn endpoint() -> Endpoint {
        Endpoint::new("smtp.example.com", 465, true)
    }

    fn login(secret: &Secret) -> RelayLogin<'_> {
        RelayLogin {
            user: "me@example.com",
            secret,
        }
    }

    fn formatted(message: &lettre::Message) -> String {
        String::from_utf8(message.formatted()).unwrap()
    }

    #[test]
    fn establish_maps_verification_failures() {
        let secret = Secret::new("pw");
        let relay = SpyRelay::default().failing_verify(RelayError::Permanent("535 no".into()));
        let err = TransmissionSession::establish(Box::new(relay), login(&secret), &endpoint())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthFailed);

        let relay = SpyRelay::default().failing_verify(RelayError::Unreachable("refused".into()));
        let err = TransmissionSession::establish(Box::new(relay), login(&secret), &endpoint())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnreachableHost);
    }

    #[test]
    fn bare_user_is_qualified() {
        let sender = sender_mailbox("me", &endpoint()).unwrap();
        assert_eq!(sender.email.to_string(), "me@smtp.example.com");
    }

    #[test]
    fn send_validates_before_the_relay() {
        let secret = Secret::new("pw");
        let relay = SpyRelay::default();
        let sent = relay.sent();
        let session =
            TransmissionSession::establish(Box::new(relay), login(&secret), &endpoint()).unwrap();

        let err = session
            .send(login(&secret), &OutboundMessage::to(["not an address"]).text("hi"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        let err = session
            .send(login(&secret), &OutboundMessage::to(["a@x.com"]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        let missing = OutboundMessage::to(["a@x.com"]).text("hi").attach(OutboundAttachment {
            filename: "gone.bin".into(),
            content_type: None,
            source: AttachmentSource::Path("/nonexistent/gone.bin".into()),
        });
        assert_eq!(
            session.send(login(&secret), &missing).unwrap_err().kind(),
            ErrorKind::InvalidRequest
        );

        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn send_returns_receipt() {
        let secret = Secret::new("pw");
        let relay = SpyRelay::default();
        let sent = relay.sent();
        let session =
            TransmissionSession::establish(Box::new(relay), login(&secret), &endpoint()).unwrap();
        let request = OutboundMessage::to(["a@x.com", "b@y.org"])
            .subject("Hello")
            .text("hi");
        let receipt = session.send(login(&secret), &request).unwrap();
        assert!(receipt.message_id.starts_with('<'));
        assert!(receipt.message_id.ends_with("@example.com>"));
        assert_eq!(receipt.response, "250 OK");

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("Subject: Hello"));
        assert!(sent[0].contains(&receipt.message_id));
    }

    #[test]
    fn relay_refusal_is_transmission_rejected() {
        let secret = Secret::new("pw");
        let relay = SpyRelay::default().failing_transmit(RelayError::Permanent("550 no".into()));
        let session =
            TransmissionSession::establish(Box::new(relay), login(&secret), &endpoint()).unwrap();
        let err = session
            .send(login(&secret), &OutboundMessage::to(["a@x.com"]).text("hi"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransmissionRejected);
    }

    #[test]
    fn compose_shapes() {
        let sender: Mailbox = "me@example.com".parse().unwrap();

        let plain = compose(&sender, &OutboundMessage::to(["a@x.com"]).text("hi"), "<1@x>").unwrap();
        let plain = formatted(&plain);
        assert!(plain.contains("Content-Type: text/plain"));
        assert!(!plain.contains("multipart"));

        let both = OutboundMessage::to(["a@x.com"]).text("hi").html("<b>hi</b>");
        assert!(formatted(&compose(&sender, &both, "<2@x>").unwrap())
            .contains("multipart/alternative"));

        let with_file = both.attach(OutboundAttachment {
            filename: "a.txt".into(),
            content_type: Some("text/plain".into()),
            source: AttachmentSource::Content(b"hello".to_vec()),
        });
        let mixed = formatted(&compose(&sender, &with_file, "<3@x>").unwrap());
        assert!(mixed.contains("multipart/mixed"));
        assert!(mixed.contains("multipart/alternative"));
        assert!(mixed.contains("filename=\"a.txt\""));
    }

    #[test]
    fn composed_message_decodes() {
        let sender: Mailbox = "Me <me@example.com>".parse().unwrap();
        let request = OutboundMessage::to(["a@x.com"])
            .subject("Round")
            .text("plain")
            .attach(OutboundAttachment {
                filename: "data.bin".into(),
                content_type: None,
                source: AttachmentSource::Content(vec![0, 1, 2, 3]),
            });
        let raw = compose(&sender, &request, "<4@x>").unwrap().formatted();
        let decoded = crate::codec::parse(&raw).unwrap();
        assert_eq!(decoded.subject, "Round");
        assert_eq!(decoded.to, vec!["a@x.com"]);
        assert_eq!(decoded.text_body.as_deref().map(str::trim), Some("plain"));
        assert_eq!(decoded.attachments.len(), 1);
        assert_eq!(decoded.attachments[0].filename, "data.bin");
        assert_eq!(decoded.attachments[0].content_type, OCTET_STREAM);
    }

    #[test]
    fn plain_message_decodes_to_the_same_fields() {
        let sender: Mailbox = "me@example.com".parse().unwrap();
        let request = OutboundMessage::to(["a@x.com", "b@y.org"])
            .subject("Greetings")
            .text("hello");
        let raw = compose(&sender, &request, "<5@x>").unwrap().formatted();
        let decoded = crate::codec::parse(&raw).unwrap();
        assert_eq!(decoded.message_id, "<5@x>");
        assert_eq!(decoded.subject, "Greetings");
        assert_eq!(decoded.to, vec!["a@x.com", "b@y.org"]);
        assert!(decoded.cc.is_empty());
        assert_eq!(decoded.text_body.as_deref(), Some("hello"));
        assert_eq!(decoded.html_body, None);
        assert!(decoded.attachments.is_empty());
    }
}
