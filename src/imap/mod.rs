//! The IMAP wire client: tagged commands over any `Read + Write` stream.
//!
//! Only the commands a retrieval session needs are implemented. Every command is written, then
//! read to its tagged completion before the next one may start, so a [`Client`] never has more
//! than one command in flight.

mod builder;
mod client;
mod conn;
mod error;
mod parse;

#[cfg(test)]
pub(crate) mod script;

pub use self::builder::ClientBuilder;
pub use self::client::Client;
pub use self::conn::{Connection, ImapConnection, LinkControl, Severer};
pub use self::error::{Error, ParseError, Result, ValidateError};
