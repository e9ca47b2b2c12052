use log::debug;
use native_tls::TlsConnector;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::conn::{Connection, LinkControl};
use super::error::{Error, Result};
use super::Client;
use crate::types::Endpoint;

/// Dials an IMAP server and reads its greeting.
///
/// Implicit TLS is used when the endpoint is `secure`; otherwise the connection is plain TCP.
/// ```no_run
/// # use mailsession::imap::ClientBuilder;
/// # use mailsession::Endpoint;
/// # use std::time::Duration;
/// # fn main() -> Result<(), mailsession::imap::Error> {
/// let endpoint = Endpoint::new("imap.example.com", 993, true);
/// let client = ClientBuilder::new(&endpoint)
///     .connect_timeout(Duration::from_secs(10))
///     .connect()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ClientBuilder<'a> {
    endpoint: &'a Endpoint,
    connect_timeout: Duration,
    io_timeout: Option<Duration>,
    danger_skip_tls_verify: bool,
}

impl<'a> ClientBuilder<'a> {
    /// Make a new `ClientBuilder` for the given endpoint.
    pub fn new(endpoint: &'a Endpoint) -> Self {
        ClientBuilder {
            endpoint,
            connect_timeout: Duration::from_secs(30),
            io_timeout: Some(Duration::from_secs(120)),
            danger_skip_tls_verify: false,
        }
    }

    /// How long to wait for each TCP connection attempt.
    pub fn connect_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.connect_timeout = timeout;
        self
    }

    /// The deadline for every read and write once connected. `None` blocks forever.
    pub fn io_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.io_timeout = timeout;
        self
    }

    /// Accept any certificate and host name. Only meant for test servers with self-signed
    /// certificates.
    pub fn danger_skip_tls_verify(&mut self, skip: bool) -> &mut Self {
        self.danger_skip_tls_verify = skip;
        self
    }

    /// Open the connection and consume the greeting.
    pub fn connect(&self) -> Result<Client<Connection>> {
        let tcp = self.dial()?;
        let stream: Connection = if self.endpoint.secure {
            let mut builder = TlsConnector::builder();
            if self.danger_skip_tls_verify {
                builder
                    .danger_accept_invalid_certs(true)
                    .danger_accept_invalid_hostnames(true);
            }
            let connector = builder.build()?;
            Box::new(connector.connect(&self.endpoint.host, tcp)?)
        } else {
            Box::new(tcp)
        };

        let mut client = Client::new(stream);
        client.read_greeting()?;
        debug!("greeted by {}", self.endpoint);
        Ok(client)
    }

    fn dial(&self) -> Result<TcpStream> {
        let host = self.endpoint.host.as_str();
        let mut last_err = None;
        for addr in (host, self.endpoint.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(mut tcp) => {
                    tcp.set_timeout(self.io_timeout)?;
                    return Ok(tcp);
                }
                Err(e) => {
                    debug!("connecting to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }
        Err(Error::Io(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} did not resolve to any address", host),
            )
        })))
    }
}
