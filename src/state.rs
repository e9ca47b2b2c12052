//! Session lifecycle.
//!
//! ```text
//!  Disconnected --begin_connect--> Connecting --established--> Connected
//!       ^                              |                           |
//!       |                            fault                       fault
//!       |                              v                           v
//!       +------------reset--------- Faulted <-----------------------+
//! ```
//!
//! `reset` is allowed from every state. `begin_connect` is also allowed from `Faulted`.
//! There is no automatic reconnection.

use std::fmt;

use log::{info, warn};

use crate::error::{Error, ErrorKind, Result};

/// Where the session stands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// No links are open.
    Disconnected,
    /// `connect` is running.
    Connecting,
    /// Both links are open and authenticated.
    Connected,
    /// A link failed. Every operation except `connect` and `disconnect` fails with
    /// [`ErrorKind::ConnectionLost`].
    Faulted {
        /// What broke the session.
        reason: String,
    },
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Disconnected => f.write_str("disconnected"),
            Lifecycle::Connecting => f.write_str("connecting"),
            Lifecycle::Connected => f.write_str("connected"),
            Lifecycle::Faulted { reason } => write!(f, "faulted ({})", reason),
        }
    }
}

/// The lifecycle state machine. Transitions are the only way to change state.
#[derive(Debug)]
pub struct SessionState {
    lifecycle: Lifecycle,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState {
            lifecycle: Lifecycle::Disconnected,
        }
    }
}

impl SessionState {
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn is_connected(&self) -> bool {
        self.lifecycle == Lifecycle::Connected
    }

    /// Disconnected or Faulted -> Connecting.
    pub fn begin_connect(&mut self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Connecting | Lifecycle::Connected => Err(Error::new(
                ErrorKind::AlreadyConnected,
                format!("session is {}", self.lifecycle),
            )),
            _ => {
                self.transition(Lifecycle::Connecting);
                Ok(())
            }
        }
    }

    /// Connecting -> Connected.
    pub fn established(&mut self) -> Result<()> {
        if self.lifecycle != Lifecycle::Connecting {
            return Err(Error::new(
                ErrorKind::InvalidRequest,
                format!("cannot complete a connect while {}", self.lifecycle),
            ));
        }
        self.transition(Lifecycle::Connected);
        Ok(())
    }

    /// Connecting or Connected -> Faulted. Has no effect in other states, so a fault that
    /// races a disconnect cannot resurrect the session.
    pub fn fault(&mut self, reason: impl Into<String>) {
        if matches!(
            self.lifecycle,
            Lifecycle::Connecting | Lifecycle::Connected
        ) {
            let reason = reason.into();
            warn!("session faulted: {}", reason);
            self.lifecycle = Lifecycle::Faulted { reason };
        }
    }

    /// Any state -> Disconnected.
    pub fn reset(&mut self) {
        if self.lifecycle != Lifecycle::Disconnected {
            self.transition(Lifecycle::Disconnected);
        }
    }

    /// Admit an operation only when connected.
    pub fn gate(&self) -> Result<()> {
        match &self.lifecycle {
            Lifecycle::Connected => Ok(()),
            Lifecycle::Faulted { reason } => {
                Err(Error::new(ErrorKind::ConnectionLost, reason.clone()))
            }
            other => Err(Error::new(
                ErrorKind::NotConnected,
                format!("session is {}", other),
            )),
        }
    }

    fn transition(&mut self, to: Lifecycle) {
        info!("session {} -> {}", self.lifecycle, to);
        self.lifecycle = to;
    }
}
