use std::fmt::{Debug, Formatter};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use native_tls::TlsStream;

/// Control over the socket underneath an IMAP stream.
///
/// Must be implemented for a transport in order for a [`Client`](super::Client) using that
/// transport to bound its reads with a deadline, and for the session to be torn down while an
/// operation is blocked on it.
pub trait LinkControl {
    /// Set the timeout for subsequent reads and writes to the given one.
    ///
    /// If `timeout` is `None`, reads and writes block indefinitely.
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// A handle that closes the underlying socket from another thread.
    ///
    /// Returns `None` for transports that cannot be interrupted.
    fn severer(&self) -> Option<Severer>;
}

/// Closes a link out from under whoever is blocked on it.
pub struct Severer(Box<dyn Fn() + Send + Sync>);

impl Severer {
    /// Wrap the closure that shuts the link down.
    pub fn new<F>(sever: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Severer(Box::new(sever))
    }

    /// Shut the link down. Blocked reads and writes return promptly with an error or EOF.
    pub fn sever(&self) {
        (self.0)()
    }
}

impl Debug for Severer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Severer")
    }
}

impl LinkControl for TcpStream {
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }

    fn severer(&self) -> Option<Severer> {
        let socket = self.try_clone().ok()?;
        Some(Severer::new(move || {
            let _ = socket.shutdown(Shutdown::Both);
        }))
    }
}

impl LinkControl for TlsStream<TcpStream> {
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.get_mut().set_timeout(timeout)
    }

    fn severer(&self) -> Option<Severer> {
        self.get_ref().severer()
    }
}

impl<T: LinkControl + ?Sized> LinkControl for Box<T> {
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        (**self).set_timeout(timeout)
    }

    fn severer(&self) -> Option<Severer> {
        (**self).severer()
    }
}

/// Imap connection trait of a read/write stream
pub trait ImapConnection: Read + Write + Send + LinkControl + private::Sealed {}

impl<T> ImapConnection for T where T: Read + Write + Send + LinkControl {}

impl Debug for dyn ImapConnection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Imap connection")
    }
}

/// A boxed connection type
pub type Connection = Box<dyn ImapConnection>;

mod private {
    use super::{LinkControl, Read, Write};

    pub trait Sealed {}

    impl<T> Sealed for T where T: Read + Write + LinkControl {}
}
