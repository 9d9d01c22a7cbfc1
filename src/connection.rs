//! Per-connection state machine: Waiting -> Uploading | Downloading -> closed

use crate::header::HeaderBuffer;
use crate::poll::Interest;
use crate::protocol::{parse_header, Command, HeaderError};
use crate::transfer::{download_step, upload_step};
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Why a connection was torn down. `Complete` and `PeerClosed` are the
/// normal ends of a download and an upload respectively.
#[derive(Debug, Error)]
pub enum DisconnectReason {
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("transfer complete")]
    Complete,
    #[error("peer hung up")]
    HungUp,
    #[error("socket error")]
    SocketError,
    #[error("protocol violation: {0}")]
    Protocol(HeaderError),
    #[error("out of memory: {0}")]
    OutOfMemory(HeaderError),
    #[error("cannot open {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("server stopping")]
    Shutdown,
}

impl From<HeaderError> for DisconnectReason {
    fn from(err: HeaderError) -> Self {
        match err {
            HeaderError::Alloc => DisconnectReason::OutOfMemory(err),
            other => DisconnectReason::Protocol(other),
        }
    }
}

#[derive(Debug)]
pub enum State {
    Waiting(HeaderBuffer),
    Uploading(File),
    Downloading(File),
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::Waiting(_) => "waiting",
            State::Uploading(_) => "uploading",
            State::Downloading(_) => "downloading",
        }
    }
}

/// One live peer session. Dropping it closes the socket and any open file.
#[derive(Debug)]
pub struct Connection<S> {
    token: u64,
    stream: S,
    peer: SocketAddr,
    state: State,
    file_name: Option<PathBuf>,
    bytes: u64,
}

impl<S: Read + Write> Connection<S> {
    pub fn new(token: u64, stream: S, peer: SocketAddr) -> Self {
        Connection {
            token,
            stream,
            peer,
            state: State::Waiting(HeaderBuffer::new()),
            file_name: None,
            bytes: 0,
        }
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// File named by the header, once one has been accepted.
    pub fn file_name(&self) -> Option<&Path> {
        self.file_name.as_deref()
    }

    /// Payload bytes moved so far (preamble included).
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Command accepted from the header, if any.
    pub fn command(&self) -> Option<Command> {
        match self.state {
            State::Waiting(_) => None,
            State::Uploading(_) => Some(Command::Upload),
            State::Downloading(_) => Some(Command::Download),
        }
    }

    /// What the multiplexer should watch for in the current state.
    pub fn interest(&self) -> Interest {
        match self.state {
            State::Waiting(_) | State::Uploading(_) => Interest::Readable,
            State::Downloading(_) => Interest::Writable,
        }
    }

    /// Read more of the header. Once the newline arrives the named file is
    /// opened under `root` and the connection moves to its transfer state,
    /// dropping the header buffer.
    pub fn on_header(&mut self, root: &Path) -> Result<(), DisconnectReason> {
        let State::Waiting(buf) = &mut self.state else {
            return Ok(());
        };
        buf.reserve_slack()?;

        let n = match self.stream.read(buf.spare_mut()) {
            Ok(0) => return Err(DisconnectReason::PeerClosed),
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                return Ok(())
            }
            Err(e) => return Err(DisconnectReason::Io(e)),
        };
        debug!(token = self.token, bytes = n, "header chunk");
        buf.advance(n);

        let Some(header) = parse_header(buf.filled())? else {
            return Ok(());
        };
        info!(
            token = self.token,
            peer = %self.peer,
            command = %header.command,
            file = %header.name.display(),
            "header complete"
        );

        let path = root.join(&header.name);
        let next = match header.command {
            Command::Upload => {
                let mut file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)
                    .map_err(|source| DisconnectReason::Open { path: path.clone(), source })?;
                if !header.preamble.is_empty() {
                    file.write_all(header.preamble)?;
                    self.bytes += header.preamble.len() as u64;
                }
                State::Uploading(file)
            }
            Command::Download => {
                let file = File::open(&path)
                    .map_err(|source| DisconnectReason::Open { path: path.clone(), source })?;
                State::Downloading(file)
            }
        };
        self.file_name = Some(header.name);
        self.state = next;
        Ok(())
    }

    /// One socket -> file chunk.
    pub fn on_upload(&mut self, scratch: &mut [u8]) -> Result<(), DisconnectReason> {
        let State::Uploading(file) = &mut self.state else {
            return Ok(());
        };
        let n = upload_step(&mut self.stream, file, scratch)?;
        debug!(token = self.token, bytes = n, "recv file chunk");
        self.bytes += n as u64;
        Ok(())
    }

    /// One file -> socket chunk.
    pub fn on_download(&mut self, scratch: &mut [u8]) -> Result<(), DisconnectReason> {
        let State::Downloading(file) = &mut self.state else {
            return Ok(());
        };
        let n = download_step(file, &mut self.stream, scratch)?;
        debug!(token = self.token, bytes = n, "sent file chunk");
        self.bytes += n as u64;
        Ok(())
    }
}

impl<S: AsRawFd> AsRawFd for Connection<S> {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}
