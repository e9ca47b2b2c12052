//! Test doubles for code that drives a [`Controller`](crate::Controller).
//!
//! Enable the `test_helpers` feature to use them outside this crate:
//!
//! ```toml
//! [dev-dependencies]
//! mailsession = { version = "0.1", features = ["test_helpers"] }
//! ```
//!
//! [`Mailstore`] is an in-memory IMAP server. Each connection a [`FakeDialer`] opens talks the
//! wire protocol against it, so the whole client stack is exercised. [`SpyRelay`] records
//! what would have been sent instead of sending it.
//!
//! ```
//! use mailsession::testing::{plain_message, FakeDialer, Mailstore};
//! use mailsession::{Controller, ControllerConfig};
//!
//! let store = Mailstore::new("me@example.com", "secret");
//! store.deliver("INBOX", plain_message("a@example.com", "Hello", "Hi there"));
//!
//! let controller = Controller::with_dialer(ControllerConfig::default(), FakeDialer::new(&store));
//! controller.connect(store.credentials()).unwrap();
//! let batch = controller.fetch_batch("INBOX", 10).unwrap();
//! assert_eq!(batch[0].subject, "Hello");
//! ```

use std::cmp::min;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::ControllerConfig;
use crate::controller::Dialer;
use crate::imap::{self, Client, Connection, LinkControl, Severer};
use crate::transmission::{Relay, RelayError, RelayLogin};
use crate::types::{Credentials, Endpoint};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A plain text message with the given sender, subject and body.
pub fn plain_message(from: &str, subject: &str, body: &str) -> Vec<u8> {
    format!(
        "From: {}\r\nTo: me@example.com\r\nSubject: {}\r\n\
         Date: Mon, 7 Feb 1994 21:52:25 -0800\r\n\r\n{}\r\n",
        from, subject, body
    )
    .into_bytes()
}

#[derive(Debug)]
struct StoredMessage {
    uid: u32,
    flags: Vec<String>,
    raw: Vec<u8>,
}

#[derive(Debug)]
struct StoredMailbox {
    name: String,
    attributes: Vec<String>,
    uid_next: u32,
    messages: Vec<StoredMessage>,
}

impl StoredMailbox {
    fn new(name: &str, attributes: &[&str]) -> Self {
        StoredMailbox {
            name: name.to_string(),
            attributes: attributes.iter().map(|a| a.to_string()).collect(),
            uid_next: 1,
            messages: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    user: String,
    password: String,
    mailboxes: Vec<StoredMailbox>,
    commands: Vec<String>,
    in_flight: bool,
    overlaps: usize,
    hang_next: bool,
    drop_next: bool,
    reject_stores: bool,
    latency: Duration,
}

impl Inner {
    fn mailbox(&self, name: &str) -> Option<&StoredMailbox> {
        self.mailboxes.iter().find(|m| same_mailbox(&m.name, name))
    }

    fn mailbox_mut(&mut self, name: &str) -> Option<&mut StoredMailbox> {
        self.mailboxes.iter_mut().find(|m| same_mailbox(&m.name, name))
    }
}

fn same_mailbox(a: &str, b: &str) -> bool {
    a == b || (a.eq_ignore_ascii_case("INBOX") && b.eq_ignore_ascii_case("INBOX"))
}

/// An in-memory IMAP account, shared by every connection dialed against it.
///
/// Cloning gives another handle to the same store. Mailboxes use `/` as delimiter.
#[derive(Clone, Debug)]
pub struct Mailstore(Arc<Mutex<Inner>>);

impl Mailstore {
    /// An account with an empty `INBOX`.
    pub fn new(user: &str, password: &str) -> Self {
        Mailstore(Arc::new(Mutex::new(Inner {
            user: user.to_string(),
            password: password.to_string(),
            mailboxes: vec![StoredMailbox::new("INBOX", &[])],
            ..Default::default()
        })))
    }

    /// Credentials that log in to this store.
    pub fn credentials(&self) -> Credentials {
        let inner = lock(&self.0);
        Credentials::new(
            inner.user.clone(),
            inner.password.clone(),
            Endpoint::new("imap.test", 993, true),
            Endpoint::new("smtp.test", 465, true),
        )
    }

    /// Create a mailbox. `attributes` are LIST attributes such as `\Sent` or `\Noselect`.
    pub fn add_mailbox(&self, name: &str, attributes: &[&str]) {
        let mut inner = lock(&self.0);
        if inner.mailbox(name).is_none() {
            inner.mailboxes.push(StoredMailbox::new(name, attributes));
        }
    }

    /// Append a message, creating the mailbox if needed. Returns its UID.
    pub fn deliver(&self, mailbox: &str, raw: impl Into<Vec<u8>>) -> u32 {
        self.deliver_with_flags(mailbox, raw, &[])
    }

    pub fn deliver_with_flags(
        &self,
        mailbox: &str,
        raw: impl Into<Vec<u8>>,
        flags: &[&str],
    ) -> u32 {
        self.add_mailbox(mailbox, &[]);
        let mut inner = lock(&self.0);
        let mut uid = 0;
        if let Some(m) = inner.mailbox_mut(mailbox) {
            uid = m.uid_next;
            m.uid_next += 1;
            m.messages.push(StoredMessage {
                uid,
                flags: flags.iter().map(|f| f.to_string()).collect(),
                raw: raw.into(),
            });
        }
        uid
    }

    /// Number of messages in `mailbox`, 0 if it does not exist.
    pub fn count(&self, mailbox: &str) -> usize {
        lock(&self.0).mailbox(mailbox).map_or(0, |m| m.messages.len())
    }

    /// Flags of the message at sequence number `seq`.
    pub fn flags(&self, mailbox: &str, seq: u32) -> Option<Vec<String>> {
        let inner = lock(&self.0);
        let m = inner.mailbox(mailbox)?;
        let index = (seq as usize).checked_sub(1)?;
        m.messages.get(index).map(|msg| msg.flags.clone())
    }

    /// Every command received so far, in order, without tags. LOGIN arguments are left out.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.0).commands.clone()
    }

    /// Number of times a command arrived while another was still unanswered.
    pub fn overlaps(&self) -> usize {
        lock(&self.0).overlaps
    }

    /// Never answer the next command. The connection stays silent until it is severed or its
    /// read timeout expires.
    pub fn hang_next_command(&self) {
        lock(&self.0).hang_next = true;
    }

    /// Close the connection instead of answering the next command.
    pub fn drop_next_command(&self) {
        lock(&self.0).drop_next = true;
    }

    /// Answer every STORE with NO.
    pub fn reject_stores(&self, reject: bool) {
        lock(&self.0).reject_stores = reject;
    }

    /// Delay the start of every response.
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.0).latency = latency;
    }
}

/// One connection to a [`Mailstore`], speaking IMAP over in-memory buffers.
#[derive(Debug)]
pub struct FakeImapStream {
    store: Mailstore,
    input: Vec<u8>,
    output: Vec<u8>,
    read_pos: usize,
    selected: Option<String>,
    known_exists: usize,
    logged_in: bool,
    hanging: bool,
    delayed: bool,
    severed: Arc<AtomicBool>,
    timeout: Option<Duration>,
}

impl FakeImapStream {
    /// A fresh connection; the greeting is waiting to be read.
    pub fn new(store: &Mailstore) -> Self {
        lock(&store.0).in_flight = false;
        FakeImapStream {
            store: store.clone(),
            input: Vec::new(),
            output: b"* OK [CAPABILITY IMAP4rev1] fake server ready\r\n".to_vec(),
            read_pos: 0,
            selected: None,
            known_exists: 0,
            logged_in: false,
            hanging: false,
            delayed: false,
            severed: Arc::new(AtomicBool::new(false)),
            timeout: None,
        }
    }

    fn respond(&mut self, line: &str) {
        self.output.extend_from_slice(line.as_bytes());
        self.output.extend_from_slice(b"\r\n");
    }

    fn handle(&mut self, line: &[u8]) {
        let line = String::from_utf8_lossy(line).into_owned();
        let mut parts = line.splitn(3, ' ');
        let tag = parts.next().unwrap_or_default().to_string();
        let command = parts.next().unwrap_or_default().to_ascii_uppercase();
        let rest = parts.next().unwrap_or_default().to_string();

        let latency = {
            let mut inner = lock(&self.store.0);
            if command == "LOGIN" {
                inner.commands.push(command.clone());
            } else {
                inner.commands.push(format!("{} {}", command, rest).trim().to_string());
            }
            if inner.in_flight {
                inner.overlaps += 1;
            }
            inner.in_flight = true;
            if inner.hang_next {
                inner.hang_next = false;
                self.hanging = true;
                return;
            }
            if inner.drop_next {
                inner.drop_next = false;
                inner.in_flight = false;
                self.output.clear();
                self.read_pos = 0;
                return;
            }
            inner.latency
        };
        self.delayed = !latency.is_zero();

        if !self.logged_in && !matches!(command.as_str(), "LOGIN" | "LOGOUT" | "NOOP") {
            return self.respond(&format!("{} BAD Not authenticated", tag));
        }
        let args = arguments(&rest);
        match command.as_str() {
            "LOGIN" => self.login(&tag, &args),
            "LOGOUT" => {
                self.respond("* BYE Logging out");
                self.respond(&format!("{} OK LOGOUT completed", tag));
            }
            "NOOP" => self.noop(&tag),
            "LIST" => self.list(&tag),
            "SELECT" => self.select(&tag, args.first().map(String::as_str).unwrap_or_default()),
            "FETCH" => self.fetch(&tag, &rest),
            "STORE" => self.store(&tag, &rest),
            "EXPUNGE" => self.expunge(&tag),
            _ => self.respond(&format!("{} BAD Unknown command", tag)),
        }
    }

    fn login(&mut self, tag: &str, args: &[String]) {
        let accepted = {
            let inner = lock(&self.store.0);
            args.len() == 2 && args[0] == inner.user && args[1] == inner.password
        };
        if accepted {
            self.logged_in = true;
            self.respond(&format!("{} OK LOGIN completed", tag));
        } else {
            self.respond(&format!(
                "{} NO [AUTHENTICATIONFAILED] Invalid credentials",
                tag
            ));
        }
    }

    fn noop(&mut self, tag: &str) {
        let count = self
            .selected
            .as_deref()
            .and_then(|name| lock(&self.store.0).mailbox(name).map(|m| m.messages.len()));
        if let Some(count) = count {
            if count != self.known_exists {
                self.known_exists = count;
                self.respond(&format!("* {} EXISTS", count));
            }
        }
        self.respond(&format!("{} OK NOOP completed", tag));
    }

    fn list(&mut self, tag: &str) {
        let lines: Vec<String> = lock(&self.store.0)
            .mailboxes
            .iter()
            .map(|m| {
                format!(
                    "* LIST ({}) \"/\" \"{}\"",
                    m.attributes.join(" "),
                    m.name.replace('\\', "\\\\").replace('"', "\\\"")
                )
            })
            .collect();
        for line in lines {
            self.respond(&line);
        }
        self.respond(&format!("{} OK LIST completed", tag));
    }

    fn select(&mut self, tag: &str, name: &str) {
        self.selected = None;
        let found = lock(&self.store.0)
            .mailbox(name)
            .map(|m| (m.messages.len(), m.uid_next));
        match found {
            Some((exists, uid_next)) => {
                self.selected = Some(name.to_string());
                self.known_exists = exists;
                self.respond("* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)");
                self.respond(&format!("* {} EXISTS", exists));
                self.respond("* 0 RECENT");
                self.respond("* OK [UIDVALIDITY 1] UIDs valid");
                self.respond(&format!("* OK [UIDNEXT {}] Predicted next UID", uid_next));
                self.respond(
                    "* OK [PERMANENTFLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft \\*)] Limited",
                );
                self.respond(&format!("{} OK [READ-WRITE] SELECT completed", tag));
            }
            None => self.respond(&format!("{} NO [NONEXISTENT] Mailbox doesn't exist", tag)),
        }
    }

    // The selected mailbox and the sequence numbers `set` names, if they all exist.
    fn resolve(&self, set: &str) -> Option<(String, Vec<usize>)> {
        let name = self.selected.clone()?;
        let count = lock(&self.store.0).mailbox(&name)?.messages.len();
        let (lo, hi) = match set.split_once(':') {
            Some((lo, hi)) => (lo.parse::<usize>().ok()?, hi.parse::<usize>().ok()?),
            None => {
                let n = set.parse::<usize>().ok()?;
                (n, n)
            }
        };
        let (lo, hi) = (min(lo, hi), lo.max(hi));
        if lo == 0 || hi > count {
            return None;
        }
        Some((name, (lo..=hi).collect()))
    }

    fn fetch(&mut self, tag: &str, rest: &str) {
        let (set, query) = rest.split_once(' ').unwrap_or((rest, ""));
        let (name, seqs) = match self.resolve(set) {
            Some(resolved) => resolved,
            None => return self.respond(&format!("{} BAD Invalid sequence set", tag)),
        };
        let mut out = Vec::new();
        if let Some(mailbox) = lock(&self.store.0).mailbox(&name) {
            for seq in seqs {
                let msg = &mailbox.messages[seq - 1];
                let mut items = Vec::new();
                if query.contains("UID") {
                    items.push(format!("UID {}", msg.uid));
                }
                if query.contains("FLAGS") {
                    items.push(format!("FLAGS ({})", msg.flags.join(" ")));
                }
                if query.contains("RFC822.SIZE") {
                    items.push(format!("RFC822.SIZE {}", msg.raw.len()));
                }
                out.extend_from_slice(format!("* {} FETCH ({}", seq, items.join(" ")).as_bytes());
                if query.contains("BODY.PEEK[]") {
                    if !items.is_empty() {
                        out.push(b' ');
                    }
                    out.extend_from_slice(format!("BODY[] {{{}}}\r\n", msg.raw.len()).as_bytes());
                    out.extend_from_slice(&msg.raw);
                }
                out.extend_from_slice(b")\r\n");
            }
        }
        self.output.extend_from_slice(&out);
        self.respond(&format!("{} OK FETCH completed", tag));
    }

    fn store(&mut self, tag: &str, rest: &str) {
        let (set, query) = rest.split_once(' ').unwrap_or((rest, ""));
        let (name, seqs) = match self.resolve(set) {
            Some(resolved) => resolved,
            None => return self.respond(&format!("{} BAD Invalid sequence set", tag)),
        };
        let flags: Vec<String> = query
            .split_once('(')
            .and_then(|(_, f)| f.split_once(')'))
            .map(|(f, _)| f.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        let add = query.starts_with('+');
        let silent = query.contains(".SILENT");

        let mut untagged = Vec::new();
        {
            let mut inner = lock(&self.store.0);
            if inner.reject_stores {
                drop(inner);
                return self.respond(&format!("{} NO STORE failed", tag));
            }
            if let Some(mailbox) = inner.mailbox_mut(&name) {
                for seq in seqs {
                    let msg = &mut mailbox.messages[seq - 1];
                    for flag in &flags {
                        let present = msg.flags.iter().any(|f| f.eq_ignore_ascii_case(flag));
                        if add && !present {
                            msg.flags.push(flag.clone());
                        } else if !add {
                            msg.flags.retain(|f| !f.eq_ignore_ascii_case(flag));
                        }
                    }
                    if !silent {
                        untagged.push(format!("* {} FETCH (FLAGS ({}))", seq, msg.flags.join(" ")));
                    }
                }
            }
        }
        for line in untagged {
            self.respond(&line);
        }
        self.respond(&format!("{} OK STORE completed", tag));
    }

    fn expunge(&mut self, tag: &str) {
        let name = match self.selected.clone() {
            Some(name) => name,
            None => return self.respond(&format!("{} BAD No mailbox selected", tag)),
        };
        let mut expunged = Vec::new();
        let mut remaining = 0;
        if let Some(mailbox) = lock(&self.store.0).mailbox_mut(&name) {
            for index in (0..mailbox.messages.len()).rev() {
                if mailbox.messages[index].flags.iter().any(|f| f == "\\Deleted") {
                    mailbox.messages.remove(index);
                    expunged.push(index + 1);
                }
            }
            remaining = mailbox.messages.len();
        }
        self.known_exists = remaining;
        for seq in expunged {
            self.respond(&format!("* {} EXPUNGE", seq));
        }
        self.respond(&format!("{} OK EXPUNGE completed", tag));
    }
}

// Space separated arguments; double quotes group and backslash escapes inside them.
fn arguments(rest: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut chars = rest.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c == ' ' {
            chars.next();
            continue;
        }
        let mut arg = String::new();
        if c == '"' {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => arg.extend(chars.next()),
                    '"' => break,
                    c => arg.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ' ' {
                    break;
                }
                arg.push(c);
                chars.next();
            }
        }
        args.push(arg);
    }
    args
}

impl Read for FakeImapStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let started = Instant::now();
        loop {
            if self.severed.load(Ordering::SeqCst) {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "link severed",
                ));
            }
            if !self.hanging {
                break;
            }
            if let Some(timeout) = self.timeout {
                if started.elapsed() >= timeout {
                    lock(&self.store.0).in_flight = false;
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
                }
            }
            thread::sleep(Duration::from_millis(2));
        }
        if self.delayed {
            self.delayed = false;
            let latency = lock(&self.store.0).latency;
            thread::sleep(latency);
        }

        let remaining = &self.output[self.read_pos..];
        if remaining.is_empty() {
            return Ok(0);
        }
        let n = min(buf.len(), remaining.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.read_pos += n;
        if self.read_pos == self.output.len() {
            self.output.clear();
            self.read_pos = 0;
            lock(&self.store.0).in_flight = false;
        }
        Ok(n)
    }
}

impl Write for FakeImapStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.severed.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link severed"));
        }
        self.input.extend_from_slice(buf);
        while let Some(end) = self.input.windows(2).position(|w| w == b"\r\n") {
            let line: Vec<u8> = self.input.drain(..end + 2).take(end).collect();
            self.handle(&line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LinkControl for FakeImapStream {
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn severer(&self) -> Option<Severer> {
        let severed = Arc::clone(&self.severed);
        Some(Severer::new(move || severed.store(true, Ordering::SeqCst)))
    }
}

/// A [`Relay`] that keeps what it is given.
#[derive(Clone, Debug, Default)]
pub struct SpyRelay {
    sent: Arc<Mutex<Vec<String>>>,
    verify_error: Option<RelayError>,
    transmit_error: Option<RelayError>,
}

impl SpyRelay {
    /// Fail every verification with `err`.
    pub fn failing_verify(mut self, err: RelayError) -> Self {
        self.verify_error = Some(err);
        self
    }

    /// Refuse every message with `err`.
    pub fn failing_transmit(mut self, err: RelayError) -> Self {
        self.transmit_error = Some(err);
        self
    }

    /// The formatted messages accepted so far, shared with every clone.
    pub fn sent(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.sent)
    }
}

impl Relay for SpyRelay {
    fn verify(&self, _login: RelayLogin<'_>) -> Result<(), RelayError> {
        match &self.verify_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn transmit(
        &self,
        _login: RelayLogin<'_>,
        message: &lettre::Message,
    ) -> Result<String, RelayError> {
        if let Some(err) = &self.transmit_error {
            return Err(err.clone());
        }
        let formatted = String::from_utf8_lossy(&message.formatted()).into_owned();
        lock(&self.sent).push(formatted);
        Ok("250 OK".to_string())
    }
}

/// A [`Dialer`] that connects to a [`Mailstore`] and hands out [`SpyRelay`]s.
#[derive(Clone, Debug)]
pub struct FakeDialer {
    store: Mailstore,
    relay: SpyRelay,
    unreachable: bool,
}

impl FakeDialer {
    pub fn new(store: &Mailstore) -> Self {
        FakeDialer {
            store: store.clone(),
            relay: SpyRelay::default(),
            unreachable: false,
        }
    }

    /// Use `relay` (or a clone of it) for every connect.
    pub fn with_relay(mut self, relay: SpyRelay) -> Self {
        self.relay = relay;
        self
    }

    /// Refuse every retrieval connection.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }
}

impl Dialer for FakeDialer {
    fn retrieval(
        &self,
        endpoint: &Endpoint,
        config: &ControllerConfig,
    ) -> imap::Result<Client<Connection>> {
        if self.unreachable {
            return Err(imap::Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{} refused the connection", endpoint),
            )));
        }
        let mut stream = FakeImapStream::new(&self.store);
        stream.set_timeout(config.io_timeout)?;
        let mut client = Client::new(Box::new(stream) as Connection);
        client.read_greeting()?;
        Ok(client)
    }

    fn relay(
        &self,
        _endpoint: &Endpoint,
        _config: &ControllerConfig,
    ) -> Result<Box<dyn Relay>, RelayError> {
        Ok(Box::new(self.relay.clone()))
    }
}
