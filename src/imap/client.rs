use bufstream::BufStream;
use imap_proto::{Response, Status};
use log::{debug, log_enabled, trace, Level};
use std::borrow::Cow;
use std::io::{Read, Write};
use std::str;
use std::sync::mpsc;

use super::conn::{LinkControl, Severer};
use super::error::{Error, ParseError, Result, ValidateError};
use super::parse::{parse_expunge, parse_fetches, parse_mailbox, parse_names, parse_noop};
use crate::types::{Fetch, MailboxStatus, Name, Seq, UnsolicitedResponse};

static TAG_PREFIX: &str = "a";
const INITIAL_TAG: u32 = 0;
const CR: u8 = 0x0d;
const LF: u8 = 0x0a;

macro_rules! quote {
    ($x:expr) => {
        format!("\"{}\"", $x.replace(r"\", r"\\").replace("\"", "\\\""))
    };
}

pub(crate) fn validate_str(value: &str) -> Result<String> {
    let quoted = quote!(value);
    if quoted.contains('\n') {
        return Err(Error::Validate(ValidateError('\n')));
    }
    if quoted.contains('\r') {
        return Err(Error::Validate(ValidateError('\r')));
    }
    Ok(quoted)
}

/// Stream to interface with the IMAP server. This interface is only for the command stream.
///
/// Commands are strictly sequential: each method writes one tagged command and reads until the
/// matching tagged completion before returning.
#[derive(Debug)]
pub struct Client<T: Read + Write> {
    stream: BufStream<T>,
    tag: u32,

    /// Server responses that are not related to the current command. See also the note on
    /// [unilateral server responses in RFC 3501](https://tools.ietf.org/html/rfc3501#section-7).
    unsolicited_responses_tx: mpsc::Sender<UnsolicitedResponse>,
    unsolicited_responses: mpsc::Receiver<UnsolicitedResponse>,
}

impl<T: Read + Write> Client<T> {
    /// Creates a new client over the given stream.
    ///
    /// The greeting is not consumed; call [`Client::read_greeting`] first when the stream is
    /// freshly connected.
    pub fn new(stream: T) -> Client<T> {
        let (tx, rx) = mpsc::channel();
        Client {
            stream: BufStream::new(stream),
            tag: INITIAL_TAG,
            unsolicited_responses_tx: tx,
            unsolicited_responses: rx,
        }
    }

    /// Read the server greeting. A `BYE` greeting is an error.
    pub fn read_greeting(&mut self) -> Result<()> {
        let mut v = Vec::new();
        self.readline(&mut v)?;
        match imap_proto::parser::parse_response(&v) {
            Ok((
                _,
                Response::Data {
                    status: Status::Bye,
                    information,
                    ..
                },
            )) => Err(Error::Bye(
                information.map(|s| s.to_string()).unwrap_or_default(),
            )),
            Ok((_, Response::Data { .. })) => Ok(()),
            Ok((_, other)) => Err(Error::Parse(ParseError::Unexpected(format!(
                "{:?}",
                other
            )))),
            Err(_) => Err(Error::Parse(ParseError::Invalid(v.clone()))),
        }
    }

    /// Log in to the IMAP server. Upon success the server is in the authenticated state.
    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let u = validate_str(username)?;
        let p = validate_str(password)?;
        self.run_command_and_check_ok(&format!("LOGIN {} {}", u, p))
    }

    /// End the session. The server sends `BYE` before the tagged completion.
    pub fn logout(&mut self) -> Result<()> {
        self.run_command_and_check_ok("LOGOUT")
    }

    /// `NOOP` lets the server report pending mailbox updates (new messages, expunges), which
    /// land in the unsolicited channel.
    pub fn noop(&mut self) -> Result<()> {
        let lines = self.run_command_and_read_response("NOOP")?;
        parse_noop(&lines, &mut self.unsolicited_responses_tx)
    }

    /// The [`LIST` command](https://tools.ietf.org/html/rfc3501#section-6.3.8) returns the
    /// names matching `mailbox_pattern` under `reference_name`.
    pub fn list(&mut self, reference_name: &str, mailbox_pattern: &str) -> Result<Vec<Name>> {
        let lines = self.run_command_and_read_response(&format!(
            "LIST {} {}",
            validate_str(reference_name)?,
            validate_str(mailbox_pattern)?
        ))?;
        parse_names(&lines, &mut self.unsolicited_responses_tx)
    }

    /// Selects a mailbox.
    ///
    /// A NO completion leaves the connection with no mailbox selected, per RFC 3501.
    pub fn select(&mut self, mailbox_name: &str) -> Result<MailboxStatus> {
        let lines =
            self.run_command_and_read_response(&format!("SELECT {}", validate_str(mailbox_name)?))?;
        let mut status = parse_mailbox(&lines, &mut self.unsolicited_responses_tx)?;
        status.path = mailbox_name.to_string();
        Ok(status)
    }

    /// Fetch data items for the messages in `sequence_set`.
    pub fn fetch(&mut self, sequence_set: &str, query: &str) -> Result<Vec<Fetch>> {
        let lines =
            self.run_command_and_read_response(&format!("FETCH {} {}", sequence_set, query))?;
        parse_fetches(&lines, &mut self.unsolicited_responses_tx)
    }

    /// Alter data associated with the messages in `sequence_set`, e.g. `+FLAGS (\Seen)`.
    pub fn store(&mut self, sequence_set: &str, query: &str) -> Result<Vec<Fetch>> {
        let lines =
            self.run_command_and_read_response(&format!("STORE {} {}", sequence_set, query))?;
        parse_fetches(&lines, &mut self.unsolicited_responses_tx)
    }

    /// Permanently remove every message flagged `\Deleted` from the selected mailbox.
    ///
    /// Returns the sequence numbers reported by the server, in the order they were reported.
    pub fn expunge(&mut self) -> Result<Vec<Seq>> {
        let lines = self.run_command_and_read_response("EXPUNGE")?;
        parse_expunge(&lines, &mut self.unsolicited_responses_tx)
    }

    #[cfg(test)]
    pub(crate) fn stream_ref(&self) -> &T {
        self.stream.get_ref()
    }

    /// Take every unsolicited response received so far.
    pub fn drain_unsolicited(&self) -> Vec<UnsolicitedResponse> {
        self.unsolicited_responses.try_iter().collect()
    }

    /// Runs a command and checks if it returns OK.
    pub fn run_command_and_check_ok(&mut self, command: &str) -> Result<()> {
        let lines = self.run_command_and_read_response(command)?;
        parse_noop(&lines, &mut self.unsolicited_responses_tx)
    }

    /// Runs any command passed to it.
    pub fn run_command(&mut self, untagged_command: &str) -> Result<()> {
        let command = self.create_command(untagged_command);
        self.write_line(command.as_bytes())
    }

    /// Run a command and return the untagged lines that preceded its completion.
    pub fn run_command_and_read_response(&mut self, untagged_command: &str) -> Result<Vec<u8>> {
        self.run_command(untagged_command)?;
        let result = self.read_response();
        match result {
            Ok(_) => debug!("{}{} completed", TAG_PREFIX, self.tag),
            Err(ref e) => debug!("{}{} failed: {}", TAG_PREFIX, self.tag, e),
        }
        result
    }

    fn read_response(&mut self) -> Result<Vec<u8>> {
        let mut v = Vec::new();
        self.read_response_onto(&mut v)?;
        Ok(v)
    }

    fn read_response_onto(&mut self, data: &mut Vec<u8>) -> Result<()> {
        let mut continue_from = None;
        let mut try_first = !data.is_empty();
        let match_tag = format!("{}{}", TAG_PREFIX, self.tag);
        loop {
            let line_start = if try_first {
                try_first = false;
                0
            } else {
                let start_new = data.len();
                self.readline(data)?;
                continue_from.take().unwrap_or(start_new)
            };

            let break_with = {
                let line = &data[line_start..];

                match imap_proto::parser::parse_response(line) {
                    Ok((
                        _,
                        Response::Done {
                            tag,
                            status,
                            information,
                            ..
                        },
                    )) => {
                        if tag.as_bytes() != match_tag.as_bytes() {
                            Some(Err(Error::Parse(ParseError::TagMismatch {
                                expected: match_tag.clone(),
                                got: String::from_utf8_lossy(tag.as_bytes()).into_owned(),
                            })))
                        } else {
                            let expl = || {
                                information
                                    .as_deref()
                                    .map(explanation)
                                    .filter(|s| !s.is_empty())
                                    .unwrap_or_else(|| "no explanation given".to_string())
                            };
                            Some(match status {
                                Status::Ok => Ok(()),
                                Status::Bad => Err(Error::Bad(expl())),
                                Status::No => Err(Error::No(expl())),
                                _ => Err(Error::Parse(ParseError::Invalid(line.to_vec()))),
                            })
                        }
                    }
                    Ok(..) => None,
                    Err(nom::Err::Incomplete(..)) => {
                        continue_from = Some(line_start);
                        None
                    }
                    Err(_) => Some(Err(Error::Parse(ParseError::Invalid(line.to_vec())))),
                }
            };

            match break_with {
                Some(Ok(())) => {
                    data.truncate(line_start);
                    break Ok(());
                }
                Some(Err(e)) => break Err(e),
                None => {}
            }
        }
    }

    fn readline(&mut self, into: &mut Vec<u8>) -> Result<usize> {
        use std::io::BufRead;
        let read = self.stream.read_until(LF, into)?;
        if read == 0 {
            return Err(Error::ConnectionLost);
        }

        if log_enabled!(Level::Trace) {
            let line = &into[(into.len() - read)..];
            trace!("S: {}", String::from_utf8_lossy(line).trim_end());
        }

        Ok(read)
    }

    fn create_command(&mut self, command: &str) -> String {
        self.tag += 1;
        format!("{}{} {}", TAG_PREFIX, self.tag, command)
    }

    fn write_line(&mut self, buf: &[u8]) -> Result<()> {
        self.stream.write_all(buf)?;
        self.stream.write_all(&[CR, LF])?;
        self.stream.flush()?;
        if log_enabled!(Level::Trace) {
            trace!("C: {}", redacted(buf));
        }
        Ok(())
    }
}

impl<T: Read + Write + LinkControl> Client<T> {
    /// A handle that closes the underlying socket from another thread.
    pub fn severer(&self) -> Option<Severer> {
        self.stream.get_ref().severer()
    }
}

// The human-readable part of a completion. Response codes imap-proto does not know, such as
// `[AUTHENTICATIONFAILED]`, are left at the front of the text.
fn explanation(information: &str) -> String {
    let text = information.trim();
    match text.strip_prefix('[').and_then(|rest| rest.split_once(']')) {
        Some((_, rest)) => rest.trim_start().to_string(),
        None => text.to_string(),
    }
}

// Hide LOGIN arguments from the wire log.
fn redacted(line: &[u8]) -> Cow<'_, str> {
    let text = String::from_utf8_lossy(line);
    let mut parts = text.splitn(3, ' ');
    match (parts.next(), parts.next()) {
        (Some(tag), Some(cmd)) if cmd.eq_ignore_ascii_case("LOGIN") => {
            Cow::Owned(format!("{} {} <redacted>", tag, cmd))
        }
        _ => text,
    }
}
