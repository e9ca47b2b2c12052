//! Types shared by the wire client, the two sessions and the caller boundary.

/// From section [2.3.1.1 of RFC 3501](https://tools.ietf.org/html/rfc3501#section-2.3.1.1).
///
/// A 32-bit value assigned to each message which, together with the mailbox's `UIDVALIDITY`,
/// refers to that message and no other. Unlike sequence numbers, unique identifiers survive an
/// expunge.
pub type Uid = u32;

/// From section [2.3.1.2 of RFC 3501](https://tools.ietf.org/html/rfc3501#section-2.3.1.2).
///
/// A relative position from 1 to the number of messages in the mailbox. Sequence numbers can be
/// reassigned during the session: when a message is expunged, every later message moves down by
/// one. Callers must treat them as valid only for the currently selected mailbox and only until
/// the next delete.
pub type Seq = u32;

mod flag;
pub use self::flag::Flag;

mod name;
pub use self::name::{Name, NameAttribute};

mod fetch;
pub use self::fetch::Fetch;

mod unsolicited_response;
pub use self::unsolicited_response::UnsolicitedResponse;

mod mailbox;
pub use self::mailbox::{build_tree, Mailbox, MailboxStatus, SpecialUse};

mod message;
pub(crate) use self::message::base64_bytes;
pub use self::message::{Attachment, AttachmentContent, Message};

mod account;
pub use self::account::{Credentials, Endpoint, Secret};

mod outbound;
pub use self::outbound::{AttachmentSource, OutboundAttachment, OutboundMessage, SendReceipt};
