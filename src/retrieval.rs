//! The stateful IMAP side of a session.

use std::io::{Read, Write};
use std::ops::RangeInclusive;

use log::{debug, warn};
use rayon::prelude::*;

use crate::codec;
use crate::error::{Error, ErrorKind, Result};
use crate::imap::{self, Client};
use crate::types::{
    build_tree, AttachmentContent, Fetch, Flag, Mailbox, MailboxStatus, Message, Secret, Seq,
    UnsolicitedResponse,
};

const BATCH_QUERY: &str = "(UID FLAGS RFC822.SIZE BODY.PEEK[])";

/// The mailbox a retrieval session currently has selected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selected {
    pub path: String,
    /// Message count, kept current from EXISTS and EXPUNGE responses.
    pub exists: u32,
}

/// An authenticated IMAP connection and the mailbox it has selected.
///
/// Every method takes `&mut self`: the session is used by one caller at a time, and each
/// method runs its commands to completion before returning.
#[derive(Debug)]
pub struct RetrievalSession<T: Read + Write> {
    client: Client<T>,
    selected: Option<Selected>,
}

fn is_refusal(err: &imap::Error) -> bool {
    matches!(err, imap::Error::No(_) | imap::Error::Bad(_))
}

impl<T: Read + Write> RetrievalSession<T> {
    /// Authenticate on a greeted client.
    ///
    /// A refused login is [`ErrorKind::AuthFailed`]; a link that breaks on the way is
    /// [`ErrorKind::UnreachableHost`].
    pub fn login(mut client: Client<T>, user: &str, secret: &Secret) -> Result<Self> {
        match client.login(user, secret.expose()) {
            Ok(()) => {}
            Err(e) if is_refusal(&e) || matches!(e, imap::Error::Validate(_)) => {
                return Err(Error::new(ErrorKind::AuthFailed, e.to_string()))
            }
            Err(e) => return Err(Error::new(ErrorKind::UnreachableHost, e.to_string())),
        }
        debug!("logged in as {}", user);
        Ok(RetrievalSession {
            client,
            selected: None,
        })
    }

    /// End the session politely. The link is unusable afterwards either way.
    pub fn logout(mut self) -> Result<()> {
        self.client.logout()?;
        Ok(())
    }

    pub fn selected(&self) -> Option<&Selected> {
        self.selected.as_ref()
    }

    /// Every mailbox on the server, as a tree.
    pub fn list_mailboxes(&mut self) -> Result<Vec<Mailbox>> {
        let names = self.run(|c| c.list("", "*"))?;
        Ok(build_tree(&names))
    }

    /// Select `path`. On failure nothing is selected.
    pub fn select_mailbox(&mut self, path: &str) -> Result<MailboxStatus> {
        self.selected = None;
        match self.run(|c| c.select(path)) {
            Ok(status) => {
                self.selected = Some(Selected {
                    path: path.to_string(),
                    exists: status.exists,
                });
                Ok(status)
            }
            Err(e) if is_refusal(&e) => Err(Error::new(
                ErrorKind::MailboxNotFound,
                format!("{}: {}", path, e),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// The newest `limit` messages of `path`, newest first.
    ///
    /// Messages that are missing from the response or fail to decode are logged and left out.
    pub fn fetch_batch(&mut self, path: &str, limit: u32) -> Result<Vec<Message>> {
        self.ensure_selected(path)?;
        let exists = self.selected.as_ref().map_or(0, |s| s.exists);
        let count = limit.min(exists);
        if count == 0 {
            return Ok(Vec::new());
        }

        let range = (exists - count + 1)..=exists;
        let set = if count == 1 {
            exists.to_string()
        } else {
            format!("{}:{}", range.start(), range.end())
        };
        let fetches = self.run(|c| c.fetch(&set, BATCH_QUERY))?;
        let messages = decode_batch(fetches, range);
        debug!("fetched {} of {} messages from {}", messages.len(), count, path);
        Ok(messages)
    }

    /// Add or remove one flag on a message in the selected mailbox.
    ///
    /// `flag` may be given with or without the leading backslash, in any case; `read` means
    /// `\Seen`.
    ///
    /// `id` is checked against the message count as of the last command, without asking the
    /// server: mail delivered since then is [`ErrorKind::MessageNotFound`] until the count is
    /// refreshed. [`set_flag_in`](Self::set_flag_in) refreshes it first.
    pub fn set_flag(&mut self, id: Seq, flag: &str, set: bool) -> Result<()> {
        let parsed = Flag::from_name(flag)
            .filter(Flag::is_storable)
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidRequest,
                    format!("{:?} is not a flag that can be changed", flag),
                )
            })?;
        self.check_id(id)?;

        let query = format!("{}FLAGS.SILENT ({})", if set { '+' } else { '-' }, parsed);
        self.store(id, &query)?;
        debug!("{} {} on message {}", if set { "set" } else { "cleared" }, parsed, id);
        Ok(())
    }

    /// Select `path` if needed, then [`set_flag`](Self::set_flag).
    pub fn set_flag_in(&mut self, path: &str, id: Seq, flag: &str, set: bool) -> Result<()> {
        self.ensure_selected(path)?;
        self.set_flag(id, flag, set)
    }

    /// Select `path` if needed, then set or clear `\Seen`.
    pub fn mark_as_read(&mut self, path: &str, id: Seq, read: bool) -> Result<()> {
        self.set_flag_in(path, id, "\\Seen", read)
    }

    /// Flag a message `\Deleted`, then expunge.
    ///
    /// The expunge is mailbox-wide: every message already flagged `\Deleted` goes too, and the
    /// sequence numbers of later messages shift down.
    ///
    /// `id` is checked against the last known message count, as in
    /// [`set_flag`](Self::set_flag); [`delete_message_in`](Self::delete_message_in) refreshes
    /// the count first.
    pub fn delete_message(&mut self, id: Seq) -> Result<()> {
        self.check_id(id)?;
        self.store(id, "+FLAGS.SILENT (\\Deleted)")?;
        let expunged = self.run(|c| c.expunge())?;
        if let Some(selected) = self.selected.as_mut() {
            selected.exists = selected.exists.saturating_sub(expunged.len() as u32);
        }
        debug!("expunged {} message(s) after deleting {}", expunged.len(), id);
        Ok(())
    }

    /// Select `path` if needed, then [`delete_message`](Self::delete_message).
    pub fn delete_message_in(&mut self, path: &str, id: Seq) -> Result<()> {
        self.ensure_selected(path)?;
        self.delete_message(id)
    }

    /// The bytes of one attachment, by its position in [`Message::attachments`].
    pub fn fetch_attachment_content(&mut self, id: Seq, index: usize) -> Result<AttachmentContent> {
        self.check_id(id)?;
        let fetches = match self.run(|c| c.fetch(&id.to_string(), "BODY.PEEK[]")) {
            Ok(fetches) => fetches,
            Err(e) if is_refusal(&e) => {
                return Err(Error::new(ErrorKind::MessageNotFound, e.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let raw = fetches
            .into_iter()
            .find(|f| f.message == id && f.body().is_some())
            .and_then(|mut f| f.take_body())
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::MessageNotFound,
                    format!("server returned no payload for message {}", id),
                )
            })?;
        codec::attachment_content(&raw, index)?.ok_or_else(|| {
            Error::new(
                ErrorKind::AttachmentNotFound,
                format!("message {} has no attachment {}", id, index),
            )
        })
    }

    fn ensure_selected(&mut self, path: &str) -> Result<()> {
        let current = self.selected.as_ref().map_or(false, |s| s.path == path);
        if current {
            self.run(|c| c.noop())?;
            Ok(())
        } else {
            self.select_mailbox(path).map(|_| ())
        }
    }

    // Local only. The count is as fresh as the last command's unsolicited responses.
    fn check_id(&self, id: Seq) -> Result<()> {
        let selected = self
            .selected
            .as_ref()
            .ok_or_else(|| Error::from(ErrorKind::NoMailboxSelected))?;
        if id == 0 || id > selected.exists {
            return Err(Error::new(
                ErrorKind::MessageNotFound,
                format!("{} has no message {}", selected.path, id),
            ));
        }
        Ok(())
    }

    fn store(&mut self, id: Seq, query: &str) -> Result<()> {
        match self.run(|c| c.store(&id.to_string(), query)) {
            Ok(_) => Ok(()),
            Err(e) if is_refusal(&e) => Err(Error::new(
                ErrorKind::MessageNotFound,
                format!("message {}: {}", id, e),
            )),
            Err(e) => Err(e.into()),
        }
    }

    // Run one command, then fold whatever the server volunteered into the tracked state.
    fn run<R, F>(&mut self, command: F) -> imap::Result<R>
    where
        F: FnOnce(&mut Client<T>) -> imap::Result<R>,
    {
        let result = command(&mut self.client);
        for response in self.client.drain_unsolicited() {
            match (response, self.selected.as_mut()) {
                (UnsolicitedResponse::Exists(n), Some(selected)) => selected.exists = n,
                (UnsolicitedResponse::Expunge(_), Some(selected)) => {
                    selected.exists = selected.exists.saturating_sub(1)
                }
                (UnsolicitedResponse::Bye { information }, _) => {
                    warn!("server is closing the connection: {:?}", information)
                }
                _ => {}
            }
        }
        result
    }
}

// Decode on the rayon pool; newest first.
fn decode_batch(mut fetches: Vec<Fetch>, requested: RangeInclusive<Seq>) -> Vec<Message> {
    fetches.retain(|f| requested.contains(&f.message) && f.body().is_some());
    fetches.sort_by(|a, b| b.message.cmp(&a.message));
    fetches.dedup_by_key(|f| f.message);

    let missing = requested.clone().count() - fetches.len();
    if missing > 0 {
        warn!(
            "{} message(s) in {}:{} came back without a payload",
            missing,
            requested.start(),
            requested.end()
        );
    }

    fetches.into_par_iter().filter_map(decode).collect()
}

fn decode(mut fetch: Fetch) -> Option<Message> {
    let raw = fetch.take_body()?;
    match codec::parse(&raw) {
        Ok(mut message) => {
            message.id = fetch.message;
            message.uid = fetch.uid;
            message.size = fetch.size;
            message.flags = fetch.flags().iter().map(|f| f.to_string()).collect();
            Some(message)
        }
        Err(e) => {
            warn!("skipping message {}: {}", fetch.message, e);
            None
        }
    }
}
