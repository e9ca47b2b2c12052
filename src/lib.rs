//! A mail session controller for one account.
//!
//! A [`Controller`] owns a pair of links: a stateful IMAP connection used to read and change
//! mail, and an SMTP relay used to send it. Callers never touch either link directly. Every
//! operation goes through the controller, which checks the session lifecycle first and
//! serializes access to the IMAP connection.
//!
//! # Usage
//!
//! ```no_run
//! use mailsession::{Controller, ControllerConfig, Credentials, Endpoint, OutboundMessage};
//!
//! # fn main() -> Result<(), mailsession::Error> {
//! let controller = Controller::new(ControllerConfig::default());
//! controller.connect(Credentials::new(
//!     "me@example.com",
//!     "password",
//!     Endpoint::new("imap.example.com", 993, true),
//!     Endpoint::new("smtp.example.com", 465, true),
//! ))?;
//!
//! for mailbox in controller.list_mailboxes()? {
//!     println!("{}", mailbox.path);
//! }
//!
//! for message in controller.fetch_batch("INBOX", 20)? {
//!     println!("{:>5} {} {}", message.id, message.from, message.subject);
//! }
//! controller.mark_as_read("INBOX", 1, true)?;
//!
//! let receipt = controller.send(
//!     &OutboundMessage::to(["friend@example.org"])
//!         .subject("Hello")
//!         .text("Sent from Rust"),
//! )?;
//! println!("sent {}", receipt.message_id);
//!
//! controller.disconnect();
//! # Ok(())
//! # }
//! ```
//!
//! Messages are addressed by sequence number within the selected mailbox. A delete expunges
//! the mailbox, which renumbers every later message, so ids from an earlier batch must not be
//! reused after a delete.
//!
//! Hosts that talk JSON can use [`boundary::handle_json`] instead of calling the controller
//! directly.
//!
//! # Logging
//!
//! The crate logs through the [`log`] facade and installs no logger. Every IMAP line is
//! logged at `trace` level, with LOGIN arguments redacted.

pub mod boundary;
pub mod codec;
pub mod config;
mod controller;
pub mod error;
pub mod imap;
mod retrieval;
mod state;
pub mod transmission;
pub mod types;

#[cfg(any(test, feature = "test_helpers"))]
pub mod testing;

pub use crate::config::{AccountFile, ControllerConfig};
pub use crate::controller::{Controller, Dialer, NetworkDialer};
pub use crate::error::{Error, ErrorClass, ErrorKind, Result};
pub use crate::retrieval::{RetrievalSession, Selected};
pub use crate::state::{Lifecycle, SessionState};
pub use crate::transmission::{Relay, RelayError, RelayLogin, SmtpRelay, TransmissionSession};
pub use crate::types::{
    Attachment, AttachmentContent, AttachmentSource, Credentials, Endpoint, Mailbox,
    MailboxStatus, Message, OutboundAttachment, OutboundMessage, Secret, SendReceipt, SpecialUse,
};
