//! The facade: one account, one session, every operation gated on the lifecycle.

use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use log::{debug, info};

use crate::config::ControllerConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::imap::{self, Client, ClientBuilder, Connection, Severer};
use crate::retrieval::RetrievalSession;
use crate::state::{Lifecycle, SessionState};
use crate::transmission::{Relay, RelayError, RelayLogin, SmtpRelay, TransmissionSession};
use crate::types::{
    AttachmentContent, Credentials, Endpoint, Mailbox, MailboxStatus, Message, OutboundMessage,
    SendReceipt, Seq,
};

/// Opens the two links of a session.
pub trait Dialer: Send + Sync {
    /// Connect to the retrieval server and read its greeting.
    fn retrieval(
        &self,
        endpoint: &Endpoint,
        config: &ControllerConfig,
    ) -> imap::Result<Client<Connection>>;

    /// Build the relay for the transmission server. Nothing is sent yet, and the relay is
    /// never given anything to keep but the endpoint.
    fn relay(
        &self,
        endpoint: &Endpoint,
        config: &ControllerConfig,
    ) -> std::result::Result<Box<dyn Relay>, RelayError>;
}

/// Dials real servers over TCP, with TLS where the endpoint asks for it.
#[derive(Clone, Copy, Debug, Default)]
pub struct NetworkDialer;

impl Dialer for NetworkDialer {
    fn retrieval(
        &self,
        endpoint: &Endpoint,
        config: &ControllerConfig,
    ) -> imap::Result<Client<Connection>> {
        ClientBuilder::new(endpoint)
            .connect_timeout(config.connect_timeout)
            .io_timeout(config.io_timeout)
            .danger_skip_tls_verify(config.danger_skip_tls_verify)
            .connect()
    }

    fn relay(
        &self,
        endpoint: &Endpoint,
        config: &ControllerConfig,
    ) -> std::result::Result<Box<dyn Relay>, RelayError> {
        let relay = SmtpRelay::new(endpoint, config.smtp_timeout, config.danger_skip_tls_verify)?;
        Ok(Box::new(relay))
    }
}

// A panic inside one operation must not wedge every later caller.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the session of one account.
///
/// All methods block. A `Controller` is `Send + Sync`; share it between threads by reference
/// or in an `Arc`. Retrieval operations run one at a time, in arrival order of the lock.
/// Sends run one at a time too, but independently of retrieval.
///
/// Locks are always taken in the order retrieval, transmission, lifecycle. The lifecycle lock
/// is never held across network I/O.
pub struct Controller {
    config: ControllerConfig,
    dialer: Box<dyn Dialer>,
    retrieval: Mutex<Option<RetrievalSession<Connection>>>,
    transmission: Mutex<Option<TransmissionSession>>,
    severer: Mutex<Option<Severer>>,
    credentials: Mutex<Option<Credentials>>,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field("lifecycle", &self.lifecycle())
            .finish_non_exhaustive()
    }
}

impl Default for Controller {
    fn default() -> Self {
        Controller::new(ControllerConfig::default())
    }
}

impl Controller {
    /// A controller that dials real servers.
    pub fn new(config: ControllerConfig) -> Self {
        Controller::with_dialer(config, NetworkDialer)
    }

    pub fn with_dialer(config: ControllerConfig, dialer: impl Dialer + 'static) -> Self {
        Controller {
            config,
            dialer: Box::new(dialer),
            retrieval: Mutex::new(None),
            transmission: Mutex::new(None),
            severer: Mutex::new(None),
            credentials: Mutex::new(None),
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> Lifecycle {
        lock(&self.state).lifecycle().clone()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).is_connected()
    }

    /// Log in to the retrieval server and verify the relay.
    ///
    /// Both must succeed. If either fails the session is faulted, and a retrieval link that
    /// was already authenticated is logged out.
    pub fn connect(&self, credentials: Credentials) -> Result<()> {
        let mut retrieval = lock(&self.retrieval);
        let mut transmission = lock(&self.transmission);
        lock(&self.state).begin_connect()?;
        retrieval.take();
        transmission.take();

        info!(
            "connecting {} to {} and {}",
            credentials.user, credentials.retrieval, credentials.transmission
        );
        match self.open(&credentials) {
            Ok((r, t)) => {
                *retrieval = Some(r);
                *transmission = Some(t);
                *lock(&self.credentials) = Some(credentials);
                lock(&self.state).established()
            }
            Err(e) => {
                lock(&self.severer).take();
                lock(&self.state).fault(e.to_string());
                Err(e)
            }
        }
    }

    fn open(
        &self,
        credentials: &Credentials,
    ) -> Result<(RetrievalSession<Connection>, TransmissionSession)> {
        let client = self
            .dialer
            .retrieval(&credentials.retrieval, &self.config)
            .map_err(|e| {
                Error::new(
                    ErrorKind::UnreachableHost,
                    format!("{}: {}", credentials.retrieval, e),
                )
            })?;
        *lock(&self.severer) = client.severer();
        let retrieval = RetrievalSession::login(client, &credentials.user, &credentials.secret)?;

        let established = self
            .dialer
            .relay(&credentials.transmission, &self.config)
            .map_err(|e| {
                Error::new(
                    ErrorKind::UnreachableHost,
                    format!("{}: {}", credentials.transmission, e),
                )
            })
            .and_then(|relay| {
                TransmissionSession::establish(
                    relay,
                    RelayLogin::from(credentials),
                    &credentials.transmission,
                )
            });
        match established {
            Ok(transmission) => Ok((retrieval, transmission)),
            Err(e) => {
                if let Err(logout) = retrieval.logout() {
                    debug!("logout after failed connect: {}", logout);
                }
                Err(e)
            }
        }
    }

    /// Tear the session down. Never fails.
    ///
    /// If a retrieval operation is in flight its socket is shut down first, so that operation
    /// fails with [`ErrorKind::ConnectionLost`] instead of holding up the teardown.
    pub fn disconnect(&self) {
        let mut retrieval = match self.retrieval.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                if let Some(severer) = lock(&self.severer).as_ref() {
                    info!("severing the retrieval link of a busy session");
                    severer.sever();
                }
                lock(&self.retrieval)
            }
        };
        lock(&self.severer).take();
        if let Some(session) = retrieval.take() {
            if let Err(e) = session.logout() {
                debug!("logout during disconnect: {}", e);
            }
        }
        lock(&self.transmission).take();
        lock(&self.credentials).take();
        lock(&self.state).reset();
    }

    // Run `op` on the retrieval link. A lost link faults the session, which drops both links
    // and the credentials.
    fn with_retrieval<R, F>(&self, op: F) -> Result<R>
    where
        F: FnOnce(&mut RetrievalSession<Connection>) -> Result<R>,
    {
        let mut guard = lock(&self.retrieval);
        lock(&self.state).gate()?;
        let session = guard
            .as_mut()
            .ok_or_else(|| Error::from(ErrorKind::NotConnected))?;
        let result = op(session);
        if let Err(e) = &result {
            if e.kind() == ErrorKind::ConnectionLost {
                guard.take();
                lock(&self.transmission).take();
                lock(&self.severer).take();
                lock(&self.credentials).take();
                lock(&self.state).fault(e.detail());
            }
        }
        result
    }

    /// Every mailbox on the server, as a tree.
    pub fn list_mailboxes(&self) -> Result<Vec<Mailbox>> {
        self.with_retrieval(|s| s.list_mailboxes())
    }

    pub fn select_mailbox(&self, path: &str) -> Result<MailboxStatus> {
        self.with_retrieval(|s| s.select_mailbox(path))
    }

    /// The newest `limit` messages of `path`, newest first.
    pub fn fetch_batch(&self, path: &str, limit: u32) -> Result<Vec<Message>> {
        self.with_retrieval(|s| s.fetch_batch(path, limit))
    }

    /// Change one flag on a message of the selected mailbox.
    ///
    /// The id is checked against the message count the session last saw. Use
    /// [`set_flag_in`](Self::set_flag_in) to pick up mail that arrived since.
    pub fn set_flag(&self, id: Seq, flag: &str, set: bool) -> Result<()> {
        self.with_retrieval(|s| s.set_flag(id, flag, set))
    }

    pub fn set_flag_in(&self, path: &str, id: Seq, flag: &str, set: bool) -> Result<()> {
        self.with_retrieval(|s| s.set_flag_in(path, id, flag, set))
    }

    pub fn mark_as_read(&self, path: &str, id: Seq, read: bool) -> Result<()> {
        self.with_retrieval(|s| s.mark_as_read(path, id, read))
    }

    /// Delete a message of the selected mailbox. See
    /// [`RetrievalSession::delete_message`] for the expunge semantics.
    pub fn delete_message(&self, id: Seq) -> Result<()> {
        self.with_retrieval(|s| s.delete_message(id))
    }

    pub fn delete_message_in(&self, path: &str, id: Seq) -> Result<()> {
        self.with_retrieval(|s| s.delete_message_in(path, id))
    }

    pub fn fetch_attachment_content(&self, id: Seq, index: usize) -> Result<AttachmentContent> {
        self.with_retrieval(|s| s.fetch_attachment_content(id, index))
    }

    /// Send a message. A refused message leaves the session as it was.
    pub fn send(&self, message: &OutboundMessage) -> Result<SendReceipt> {
        let guard = lock(&self.transmission);
        lock(&self.state).gate()?;
        let session = guard
            .as_ref()
            .ok_or_else(|| Error::from(ErrorKind::NotConnected))?;
        // A copy for this exchange only; the credentials lock is not held over the network.
        let credentials = lock(&self.credentials)
            .clone()
            .ok_or_else(|| Error::from(ErrorKind::NotConnected))?;
        session.send(RelayLogin::from(&credentials), message)
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if lock(&self.state).lifecycle() != &Lifecycle::Disconnected {
            self.disconnect();
        }
    }
}
