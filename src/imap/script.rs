//! A scripted in-memory link for exercising the protocol layer without a server.

use std::io::{self, Cursor, Read, Write};
use std::time::Duration;

use super::conn::{LinkControl, Severer};

/// What a read returns once the scripted bytes are used up.
#[derive(Clone, Copy, Debug, Default)]
pub enum Ending {
    /// An `UnexpectedEof` error, so a test that reads too far fails loudly.
    #[default]
    Exhausted,
    /// A clean zero-length read, as when the server hangs up.
    Hangup,
    /// A generic I/O failure.
    Broken,
}

#[derive(Debug, Default)]
pub struct ScriptedStream {
    script: Cursor<Vec<u8>>,
    ending: Ending,
    /// Serve the first read one byte at a time.
    trickle: bool,
    pub written: Vec<u8>,
}

impl ScriptedStream {
    pub fn new(script: impl Into<Vec<u8>>) -> Self {
        ScriptedStream {
            script: Cursor::new(script.into()),
            ..Default::default()
        }
    }

    /// A link the server already closed.
    pub fn hung_up() -> Self {
        ScriptedStream::default().then(Ending::Hangup)
    }

    /// A link whose every read fails.
    pub fn broken() -> Self {
        ScriptedStream::default().then(Ending::Broken)
    }

    pub fn then(mut self, ending: Ending) -> Self {
        self.ending = ending;
        self
    }

    pub fn trickle(mut self) -> Self {
        self.trickle = true;
        self
    }

    pub fn written_str(&self) -> String {
        String::from_utf8_lossy(&self.written).into_owned()
    }
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = if std::mem::take(&mut self.trickle) {
            buf.len().min(1)
        } else {
            buf.len()
        };
        match self.script.read(&mut buf[..want])? {
            0 if want > 0 => match self.ending {
                Ending::Exhausted => Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "script exhausted",
                )),
                Ending::Hangup => Ok(0),
                Ending::Broken => Err(io::Error::new(io::ErrorKind::Other, "scripted failure")),
            },
            n => Ok(n),
        }
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LinkControl for ScriptedStream {
    fn set_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    fn severer(&self) -> Option<Severer> {
        None
    }
}
