//! JSON requests and replies for hosts that drive a [`Controller`] over a message channel.
//!
//! A request names its operation in `op`:
//!
//! ```json
//! {"op": "fetchBatch", "mailbox": "INBOX", "limit": 20}
//! ```
//!
//! and every reply has the same envelope:
//!
//! ```json
//! {"success": false, "error": {"code": "NotConnected", "class": "usage", "message": "..."}}
//! ```

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::controller::Controller;
use crate::error::{Error, ErrorClass, ErrorKind};
use crate::types::{Credentials, OutboundMessage, Seq};

fn inbox() -> String {
    "INBOX".to_string()
}

/// One operation, as sent by the host.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Request {
    Connect(Credentials),
    Disconnect,
    IsConnected,
    ListMailboxes,
    #[serde(rename_all = "camelCase")]
    SelectMailbox {
        #[serde(alias = "folder")]
        mailbox: String,
    },
    #[serde(rename_all = "camelCase")]
    FetchBatch {
        #[serde(default = "inbox", alias = "folder")]
        mailbox: String,
        /// Falls back to the controller's default batch size.
        #[serde(default)]
        limit: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    SetFlag {
        /// Without a mailbox the flag changes in the selected one.
        #[serde(default, alias = "folder")]
        mailbox: Option<String>,
        #[serde(alias = "messageId")]
        id: Seq,
        flag: String,
        set: bool,
    },
    #[serde(rename_all = "camelCase")]
    MarkAsRead {
        #[serde(alias = "folder")]
        mailbox: String,
        #[serde(alias = "messageId")]
        id: Seq,
        read: bool,
    },
    #[serde(rename_all = "camelCase")]
    DeleteMessage {
        #[serde(default, alias = "folder")]
        mailbox: Option<String>,
        #[serde(alias = "messageId")]
        id: Seq,
    },
    #[serde(rename_all = "camelCase")]
    FetchAttachment {
        #[serde(alias = "messageId")]
        id: Seq,
        index: usize,
    },
    Send(OutboundMessage),
}

/// The error part of a failed [`Reply`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReplyError {
    pub code: ErrorKind,
    pub class: ErrorClass,
    pub message: String,
}

/// The outcome of one [`Request`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

impl Reply {
    pub fn ok(data: Option<Value>) -> Self {
        Reply {
            success: true,
            data,
            error: None,
        }
    }

    pub fn failure(err: &Error) -> Self {
        Reply {
            success: false,
            data: None,
            error: Some(ReplyError {
                code: err.kind(),
                class: err.class(),
                message: err.to_string(),
            }),
        }
    }
}

impl From<Result<Option<Value>, Error>> for Reply {
    fn from(result: Result<Option<Value>, Error>) -> Self {
        match result {
            Ok(data) => Reply::ok(data),
            Err(e) => Reply::failure(&e),
        }
    }
}

fn data<T: Serialize>(value: T) -> Result<Option<Value>, Error> {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| Error::new(ErrorKind::Codec, format!("cannot encode reply: {}", e)))
}

/// Run one request.
pub fn dispatch(controller: &Controller, request: Request) -> Reply {
    let result = match request {
        Request::Connect(credentials) => controller.connect(credentials).and_then(|()| data(true)),
        Request::Disconnect => {
            controller.disconnect();
            Ok(None)
        }
        Request::IsConnected => data(controller.is_connected()),
        Request::ListMailboxes => controller.list_mailboxes().and_then(data),
        Request::SelectMailbox { mailbox } => controller.select_mailbox(&mailbox).and_then(data),
        Request::FetchBatch { mailbox, limit } => {
            let limit = limit.unwrap_or(controller.config().default_fetch_limit);
            controller.fetch_batch(&mailbox, limit).and_then(data)
        }
        Request::SetFlag {
            mailbox,
            id,
            flag,
            set,
        } => match mailbox {
            Some(mailbox) => controller.set_flag_in(&mailbox, id, &flag, set),
            None => controller.set_flag(id, &flag, set),
        }
        .map(|()| None),
        Request::MarkAsRead { mailbox, id, read } => {
            controller.mark_as_read(&mailbox, id, read).map(|()| None)
        }
        Request::DeleteMessage { mailbox, id } => match mailbox {
            Some(mailbox) => controller.delete_message_in(&mailbox, id),
            None => controller.delete_message(id),
        }
        .map(|()| None),
        Request::FetchAttachment { id, index } => {
            controller.fetch_attachment_content(id, index).and_then(data)
        }
        Request::Send(message) => controller.send(&message).and_then(data),
    };
    if let Err(e) = &result {
        debug!("request failed: {}", e);
    }
    result.into()
}

/// Parse `request`, run it and encode the reply. A request that does not parse gets an
/// `InvalidRequest` reply.
pub fn handle_json(controller: &Controller, request: &str) -> String {
    let reply = match serde_json::from_str::<Request>(request) {
        Ok(request) => dispatch(controller, request),
        Err(e) => Reply::failure(&Error::new(ErrorKind::InvalidRequest, e.to_string())),
    };
    serde_json::to_string(&reply).unwrap_or_else(|e| encoding_failure(&e))
}

// The reply itself could not be encoded. Built from a `Value`, which always serializes.
fn encoding_failure(err: &serde_json::Error) -> String {
    json!({
        "success": false,
        "error": {
            "code": "Codec",
            "class": "codec",
            "message": err.to_string(),
        }
    })
    .to_string()
}
