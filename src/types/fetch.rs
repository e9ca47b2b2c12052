use super::{Flag, Seq, Uid};

/// An IMAP [`FETCH` response](https://tools.ietf.org/html/rfc3501#section-7.4.2) that contains
/// data about a particular message. This response occurs as the result of a `FETCH` or `STORE`
/// command, as well as by unilateral server decision (e.g., flag updates).
#[derive(Debug, Eq, PartialEq)]
pub struct Fetch {
    /// The ordinal number of this message in its containing mailbox.
    pub message: Seq,

    /// A number expressing the unique identifier of the message.
    pub uid: Option<Uid>,

    /// The size of the message in octets, if `RFC822.SIZE` was requested.
    pub size: Option<u32>,

    pub(crate) flags: Vec<Flag>,
    pub(crate) body: Option<Vec<u8>>,
}

impl Fetch {
    /// A list of flags that are set for this message.
    pub fn flags(&self) -> &[Flag] {
        &self.flags[..]
    }

    /// The full RFC 5322 payload, if `BODY[]` or `BODY.PEEK[]` was included in the `FETCH`.
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Take ownership of the payload, leaving `None` behind.
    pub fn take_body(&mut self) -> Option<Vec<u8>> {
        self.body.take()
    }
}
