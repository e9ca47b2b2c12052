use imap_proto::{AttributeValue, MailboxDatum, Response, ResponseCode, Status};
use std::sync::mpsc;

use super::error::{Error, ParseError, Result};
use crate::types::{Fetch, Flag, MailboxStatus, Name, NameAttribute, Seq, UnsolicitedResponse};

pub(crate) enum MapOrNot<'a, T> {
    Map(T),
    Not(Response<'a>),
}

fn unexpected(resp: &Response<'_>) -> Error {
    Error::Parse(ParseError::Unexpected(format!("{:?}", resp)))
}

/// Parse every response in `input`, keeping what `map` accepts and routing the rest through
/// [`handle_unilateral`].
pub(crate) fn parse_many_into<'input, T, F>(
    input: &'input [u8],
    into: &mut Vec<T>,
    unsolicited: &mut mpsc::Sender<UnsolicitedResponse>,
    mut map: F,
) -> Result<()>
where
    F: FnMut(Response<'input>) -> Result<MapOrNot<'input, T>>,
{
    let mut lines = input;
    loop {
        if lines.is_empty() {
            break Ok(());
        }

        match imap_proto::parser::parse_response(lines) {
            Ok((rest, resp)) => {
                lines = rest;

                match map(resp)? {
                    MapOrNot::Map(t) => into.push(t),
                    MapOrNot::Not(resp) => {
                        if let Some(resp) = handle_unilateral(resp, unsolicited) {
                            break Err(unexpected(&resp));
                        }
                    }
                }
            }
            _ => {
                break Err(Error::Parse(ParseError::Invalid(lines.to_vec())));
            }
        }
    }
}

pub fn parse_names(
    lines: &[u8],
    unsolicited: &mut mpsc::Sender<UnsolicitedResponse>,
) -> Result<Vec<Name>> {
    let mut names = Vec::new();
    parse_many_into(lines, &mut names, unsolicited, |response| match response {
        Response::MailboxData(MailboxDatum::List {
            name_attributes,
            delimiter,
            name,
        }) => Ok(MapOrNot::Map(Name {
            attributes: name_attributes.iter().map(NameAttribute::from).collect(),
            delimiter: delimiter.map(|d| d.into_owned()),
            name: name.into_owned(),
        })),
        resp => Ok(MapOrNot::Not(resp)),
    })?;
    Ok(names)
}

pub fn parse_fetches(
    lines: &[u8],
    unsolicited: &mut mpsc::Sender<UnsolicitedResponse>,
) -> Result<Vec<Fetch>> {
    let mut fetches = Vec::new();
    parse_many_into(lines, &mut fetches, unsolicited, |response| match response {
        Response::Fetch(num, attrs) => {
            let mut fetch = Fetch {
                message: num,
                uid: None,
                size: None,
                flags: vec![],
                body: None,
            };

            for attr in attrs {
                match attr {
                    AttributeValue::Flags(flags) => {
                        fetch
                            .flags
                            .extend(flags.iter().map(|f| Flag::from_wire(f)));
                    }
                    AttributeValue::Uid(uid) => fetch.uid = Some(uid),
                    AttributeValue::Rfc822Size(sz) => fetch.size = Some(sz),
                    AttributeValue::BodySection { data, .. } => {
                        fetch.body = data.map(|d| d.into_owned());
                    }
                    AttributeValue::Rfc822(data) if fetch.body.is_none() => {
                        fetch.body = data.map(|d| d.into_owned());
                    }
                    _ => {}
                }
            }

            Ok(MapOrNot::Map(fetch))
        }
        resp => Ok(MapOrNot::Not(resp)),
    })?;
    Ok(fetches)
}

pub fn parse_expunge(
    lines: &[u8],
    unsolicited: &mut mpsc::Sender<UnsolicitedResponse>,
) -> Result<Vec<Seq>> {
    let mut ids = Vec::new();
    parse_many_into(lines, &mut ids, unsolicited, |response| match response {
        Response::Expunge(id) => Ok(MapOrNot::Map(id)),
        resp => Ok(MapOrNot::Not(resp)),
    })?;
    Ok(ids)
}

pub fn parse_noop(
    lines: &[u8],
    unsolicited: &mut mpsc::Sender<UnsolicitedResponse>,
) -> Result<()> {
    let mut nothing: Vec<()> = Vec::new();
    parse_many_into(lines, &mut nothing, unsolicited, |resp| {
        Ok(MapOrNot::Not(resp))
    })
}

pub fn parse_mailbox(
    mut lines: &[u8],
    unsolicited: &mut mpsc::Sender<UnsolicitedResponse>,
) -> Result<MailboxStatus> {
    let mut mailbox = MailboxStatus::default();

    loop {
        if lines.is_empty() {
            break Ok(mailbox);
        }

        match imap_proto::parser::parse_response(lines) {
            Ok((
                rest,
                Response::Data {
                    status: Status::Ok,
                    code,
                    ..
                },
            )) => {
                lines = rest;

                match code {
                    Some(ResponseCode::UidValidity(uid)) => {
                        mailbox.uid_validity = Some(uid);
                    }
                    Some(ResponseCode::UidNext(unext)) => {
                        mailbox.uid_next = Some(unext);
                    }
                    Some(ResponseCode::Unseen(n)) => {
                        mailbox.unseen = Some(n);
                    }
                    Some(ResponseCode::PermanentFlags(flags)) => {
                        mailbox
                            .permanent_flags
                            .extend(flags.into_iter().map(|f| f.into_owned()));
                    }
                    _ => {}
                }
            }
            Ok((rest, Response::MailboxData(MailboxDatum::Exists(e)))) => {
                lines = rest;
                mailbox.exists = e;
            }
            Ok((rest, Response::MailboxData(MailboxDatum::Recent(r)))) => {
                lines = rest;
                mailbox.recent = r;
            }
            Ok((rest, Response::MailboxData(MailboxDatum::Flags(flags)))) => {
                lines = rest;
                mailbox
                    .flags
                    .extend(flags.into_iter().map(|f| f.into_owned()));
            }
            Ok((rest, resp)) => {
                lines = rest;
                if let Some(resp) = handle_unilateral(resp, unsolicited) {
                    break Err(unexpected(&resp));
                }
            }
            _ => {
                break Err(Error::Parse(ParseError::Invalid(lines.to_vec())));
            }
        }
    }
}

// check if this is simply a unilateral server response
// (see Section 7 of RFC 3501):
fn handle_unilateral<'a>(
    res: Response<'a>,
    unsolicited: &mut mpsc::Sender<UnsolicitedResponse>,
) -> Option<Response<'a>> {
    match res {
        // untagged status chatter carries nothing a session tracks
        Response::Data {
            status: Status::Ok | Status::No | Status::Bad,
            ..
        }
        | Response::Capabilities(_) => None,
        res => match UnsolicitedResponse::try_from(res) {
            Ok(response) => {
                // the receiver lives in the same client, so this cannot fail
                let _ = unsolicited.send(response);
                None
            }
            Err(res) => Some(res),
        },
    }
}
