use super::{Flag, Seq};

use imap_proto::{AttributeValue, MailboxDatum, Response, Status};

/// A response the server sent on its own rather than as data for the running command.
///
/// Servers may send these at any time
/// ([RFC 3501 section 7](https://tools.ietf.org/html/rfc3501#section-7)). Counts and sequence numbers refer to the selected mailbox. Responses of any other kind are
/// dropped while parsing.
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum UnsolicitedResponse {
    /// The server is about to close the connection.
    Bye { information: Option<String> },

    /// The mailbox now holds this many messages.
    Exists(u32),

    /// This message is gone. Every later sequence number, and the message count, drops by one.
    Expunge(Seq),

    /// Flags of a message changed, usually through another client.
    Fetch { id: Seq, flags: Vec<Flag> },

    /// This many messages carry `\Recent`.
    Recent(u32),
}

/// Gives the response back when it is not one of the above.
impl<'a> TryFrom<Response<'a>> for UnsolicitedResponse {
    type Error = Response<'a>;

    fn try_from(response: Response<'a>) -> Result<Self, Self::Error> {
        match response {
            Response::Data {
                status: Status::Bye,
                information,
                ..
            } => Ok(UnsolicitedResponse::Bye {
                information: information.map(|s| s.to_string()),
            }),
            Response::Expunge(n) => Ok(UnsolicitedResponse::Expunge(n)),
            Response::Fetch(id, attributes) => {
                let flags = attributes
                    .iter()
                    .filter_map(|attr| match attr {
                        AttributeValue::Flags(f) => Some(f),
                        _ => None,
                    })
                    .flatten()
                    .map(|f| Flag::from_wire(f))
                    .collect();
                Ok(UnsolicitedResponse::Fetch { id, flags })
            }
            Response::MailboxData(MailboxDatum::Exists(n)) => Ok(UnsolicitedResponse::Exists(n)),
            Response::MailboxData(MailboxDatum::Recent(n)) => Ok(UnsolicitedResponse::Recent(n)),
            _ => Err(response),
        }
    }
}
