//! Shared protocol constants and header codec for the line-oriented transfer protocol
//!
//! One header per connection: `<COMMAND> <FILENAME>\n`, followed by raw file
//! bytes (client to server for UPLOAD, server to client for DOWNLOAD). There is
//! no length prefix and no end marker; the sending side closes the connection.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

// Default server port when none is given
pub const DEFAULT_PORT: u16 = 8080;

// Default pending-connection queue depth for listen(2)
pub const DEFAULT_QUEUE: i32 = 10;

// Size of one transfer step (socket -> file or file -> socket)
pub const CHUNK_SIZE: usize = 1024;

pub const NEWLINE: u8 = b'\n';
pub const SEPARATOR: u8 = b' ';

// Header buffer sizing. A slow or hostile peer can hold at most
// HEADER_MAX bytes of server memory before it gets dropped.
pub mod header_limits {
    pub const INITIAL: usize = 64;
    pub const SLACK: usize = 32;
    pub const GROWTH: usize = 64;
    pub const MAX: usize = 1024;
}

/// Header command tokens (case-sensitive)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Upload,
    Download,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Upload => "UPLOAD",
            Command::Download => "DOWNLOAD",
        }
    }

    fn from_bytes(token: &[u8]) -> Result<Self, HeaderError> {
        match token {
            b"UPLOAD" => Ok(Command::Upload),
            b"DOWNLOAD" => Ok(Command::Download),
            other => Err(HeaderError::UnknownCommand(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("header exceeds {limit} bytes without a newline")]
    TooLarge { limit: usize },
    #[error("header buffer allocation failed")]
    Alloc,
    #[error("header has no separator between command and file name")]
    MissingSeparator,
    #[error("unrecognized command {0:?}")]
    UnknownCommand(String),
    #[error("header names no file")]
    EmptyName,
}

/// A fully received header. `preamble` holds any payload bytes that arrived
/// in the same read as the newline.
#[derive(Debug, PartialEq, Eq)]
pub struct Header<'a> {
    pub command: Command,
    pub name: PathBuf,
    pub preamble: &'a [u8],
}

/// Parse the bytes received so far. `Ok(None)` means no newline yet.
pub fn parse_header(buf: &[u8]) -> Result<Option<Header<'_>>, HeaderError> {
    let Some(nl) = buf.iter().position(|&b| b == NEWLINE) else {
        return Ok(None);
    };
    let line = &buf[..nl];
    let sp = line
        .iter()
        .position(|&b| b == SEPARATOR)
        .ok_or(HeaderError::MissingSeparator)?;

    let command = Command::from_bytes(&line[..sp])?;
    let name = bare_name(OsStr::from_bytes(&line[sp + 1..])).ok_or(HeaderError::EmptyName)?;

    Ok(Some(Header {
        command,
        name,
        preamble: &buf[nl + 1..],
    }))
}

/// Build the header line a client sends. Only the final path component of
/// `remote` goes on the wire.
pub fn encode_header(command: Command, remote: &Path) -> Result<Vec<u8>, HeaderError> {
    let name = bare_name(remote.as_os_str()).ok_or(HeaderError::EmptyName)?;
    let name = name.as_os_str().as_bytes();
    let mut out = Vec::with_capacity(command.as_str().len() + 1 + name.len() + 1);
    out.extend_from_slice(command.as_str().as_bytes());
    out.push(SEPARATOR);
    out.extend_from_slice(name);
    out.push(NEWLINE);
    Ok(out)
}

/// Strip every directory component. `a/b/c.txt` and `c.txt` both resolve to
/// `c.txt`; names that end in `..` or are empty resolve to nothing.
pub fn bare_name(raw: &OsStr) -> Option<PathBuf> {
    Path::new(raw).file_name().map(PathBuf::from)
}
