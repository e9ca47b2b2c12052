//! The failures a caller of the [`Controller`](crate::Controller) can observe.

use std::error::Error as StdError;
use std::fmt;
use std::result;

use serde::Serialize;

use crate::codec::CodecError;
use crate::imap;

/// A convenience wrapper around `Result` for [`Error`].
pub type Result<T> = result::Result<T, Error>;

/// What went wrong, independent of how it is worded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[non_exhaustive]
pub enum ErrorKind {
    /// No session is established.
    NotConnected,
    /// The operation needs a selected mailbox and none is selected.
    NoMailboxSelected,
    /// The request was malformed or failed local validation.
    InvalidRequest,
    /// `connect` was called while a session is already connecting or connected.
    AlreadyConnected,
    /// The server has no mailbox at that path.
    MailboxNotFound,
    /// No message with that sequence number exists in the selected mailbox.
    MessageNotFound,
    /// The message has no attachment at that position.
    AttachmentNotFound,
    /// A server could not be reached or did not speak the expected protocol.
    UnreachableHost,
    /// A server refused the credentials.
    AuthFailed,
    /// The retrieval link dropped, timed out or became unusable. The session is faulted.
    ConnectionLost,
    /// The relay refused a message.
    TransmissionRejected,
    /// The server refused a command for a reason not covered above. The session stays usable.
    CommandRejected,
    /// A message payload could not be decoded.
    Codec,
}

/// Coarse grouping of [`ErrorKind`]s.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorClass {
    /// The caller asked for something the current state does not allow.
    Usage,
    /// The target of the operation does not exist.
    NotFound,
    /// The network or a server failed.
    Transport,
    /// Data from the server could not be decoded.
    Codec,
}

impl ErrorKind {
    /// The class this kind belongs to.
    pub fn class(self) -> ErrorClass {
        match self {
            ErrorKind::NotConnected
            | ErrorKind::NoMailboxSelected
            | ErrorKind::InvalidRequest
            | ErrorKind::AlreadyConnected => ErrorClass::Usage,
            ErrorKind::MailboxNotFound
            | ErrorKind::MessageNotFound
            | ErrorKind::AttachmentNotFound => ErrorClass::NotFound,
            ErrorKind::UnreachableHost
            | ErrorKind::AuthFailed
            | ErrorKind::ConnectionLost
            | ErrorKind::TransmissionRejected
            | ErrorKind::CommandRejected => ErrorClass::Transport,
            ErrorKind::Codec => ErrorClass::Codec,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            ErrorKind::NotConnected => "not connected",
            ErrorKind::NoMailboxSelected => "no mailbox selected",
            ErrorKind::InvalidRequest => "invalid request",
            ErrorKind::AlreadyConnected => "already connected",
            ErrorKind::MailboxNotFound => "mailbox not found",
            ErrorKind::MessageNotFound => "message not found",
            ErrorKind::AttachmentNotFound => "attachment not found",
            ErrorKind::UnreachableHost => "host unreachable",
            ErrorKind::AuthFailed => "authentication failed",
            ErrorKind::ConnectionLost => "connection lost",
            ErrorKind::TransmissionRejected => "transmission rejected",
            ErrorKind::CommandRejected => "command rejected",
            ErrorKind::Codec => "undecodable message",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// A caller-facing failure: a stable [`ErrorKind`] plus a human readable detail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    detail: String,
}

impl Error {
    /// Build an error of the given kind.
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Error {
            kind,
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn class(&self) -> ErrorClass {
        self.kind.class()
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.detail)
        }
    }
}

impl StdError for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error::new(kind, "")
    }
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Error {
        Error::new(ErrorKind::Codec, err.to_string())
    }
}

/// Wire failures outside of connect. Anything that leaves the stream unusable is
/// `ConnectionLost`; a refused command is `CommandRejected`.
impl From<imap::Error> for Error {
    fn from(err: imap::Error) -> Error {
        let kind = match err {
            imap::Error::Validate(_) => ErrorKind::InvalidRequest,
            imap::Error::No(_) | imap::Error::Bad(_) => ErrorKind::CommandRejected,
            _ => ErrorKind::ConnectionLost,
        };
        let detail = if err.is_timeout() {
            format!("timed out: {}", err)
        } else {
            err.to_string()
        };
        Error::new(kind, detail)
    }
}
