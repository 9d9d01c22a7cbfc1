//! Blocking client: one connection, one header, one file, then disconnect

use crate::protocol::{encode_header, Command, CHUNK_SIZE};
use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct Client {
    stream: Option<TcpStream>,
}

impl Client {
    pub fn new() -> Self {
        Client { stream: None }
    }

    /// Resolve `host` and connect to the first address that accepts.
    /// An existing connection is dropped first.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        self.disconnect();
        let addrs = (host, port)
            .to_socket_addrs()
            .with_context(|| format!("resolve {}:{}", host, port))?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    info!(%addr, "connected");
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => {
                    debug!(%addr, error = %e, "connect attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(match last_err {
            Some(e) => anyhow::Error::new(e).context(format!("connect {}:{}", host, port)),
            None => anyhow!("no address for {}:{}", host, port),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            debug!("disconnected");
        }
    }

    /// Request `remote` (directory part dropped) and write everything the
    /// server sends to `local` until it closes. Returns the bytes received;
    /// 0 when `local` cannot be created or nothing arrived.
    pub fn download(&mut self, remote: &Path, local: &Path) -> u64 {
        let count = match self.try_download(remote, local) {
            Ok(n) => n,
            Err(e) => {
                let msg = format!("{:#}", e);
                warn!(error = %msg, "download failed");
                0
            }
        };
        self.disconnect();
        count
    }

    fn try_download(&mut self, remote: &Path, local: &Path) -> Result<u64> {
        let stream = self.stream.as_mut().ok_or_else(|| anyhow!("not connected"))?;
        let mut file = File::create(local)
            .with_context(|| format!("open local file {}", local.display()))?;
        let header = encode_header(Command::Download, remote)?;
        stream.write_all(&header).context("send header")?;

        let mut buf = [0u8; CHUNK_SIZE];
        let mut count = 0u64;
        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, received = count, "receive failed");
                    break;
                }
            };
            file.write_all(&buf[..n])
                .with_context(|| format!("write {}", local.display()))?;
            count += n as u64;
        }
        info!(file = %local.display(), bytes = count, "download finished");
        Ok(count)
    }

    /// Send `local` to the server under the bare name of `remote`. Returns
    /// the bytes sent; compare against the local file size for success.
    pub fn upload(&mut self, remote: &Path, local: &Path) -> u64 {
        let count = match self.try_upload(remote, local) {
            Ok(n) => n,
            Err(e) => {
                let msg = format!("{:#}", e);
                warn!(error = %msg, "upload failed");
                0
            }
        };
        self.disconnect();
        count
    }

    fn try_upload(&mut self, remote: &Path, local: &Path) -> Result<u64> {
        let stream = self.stream.as_mut().ok_or_else(|| anyhow!("not connected"))?;
        let mut file = File::open(local)
            .with_context(|| format!("open local file {}", local.display()))?;
        let header = encode_header(Command::Upload, remote)?;
        stream.write_all(&header).context("send header")?;

        let mut buf = [0u8; CHUNK_SIZE];
        let mut count = 0u64;
        loop {
            let n = match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, sent = count, "local read failed");
                    break;
                }
            };
            if let Err(e) = stream.write_all(&buf[..n]) {
                warn!(error = %e, sent = count, "send failed");
                break;
            }
            count += n as u64;
        }
        info!(file = %local.display(), bytes = count, "upload finished");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn transfers_need_a_connection() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("x");
        std::fs::write(&local, b"abc").unwrap();
        let mut client = Client::new();
        assert!(!client.is_connected());
        assert_eq!(client.upload(Path::new("x"), &local), 0);
        assert_eq!(client.download(Path::new("x"), &dir.path().join("y")), 0);
    }

    #[test]
    fn connect_refused_is_an_error() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let mut client = Client::new();
        assert!(client.connect("127.0.0.1", port).is_err());
        assert!(!client.is_connected());
    }

    #[test]
    fn upload_sends_header_then_file() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("notes.txt");
        std::fs::write(&local, b"hello").unwrap();

        let reader = std::thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            let mut all = Vec::new();
            s.read_to_end(&mut all).unwrap();
            all
        });

        let mut client = Client::new();
        client.connect("127.0.0.1", port).unwrap();
        assert_eq!(client.upload(Path::new("some/dir/notes.txt"), &local), 5);
        assert!(!client.is_connected());
        assert_eq!(reader.join().unwrap(), b"UPLOAD notes.txt\nhello");
    }

    #[test]
    fn download_to_unwritable_destination_returns_zero() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let dir = tempfile::tempdir().unwrap();

        let mut client = Client::new();
        client.connect("127.0.0.1", port).unwrap();
        let dest = dir.path().join("missing-dir/out.bin");
        assert_eq!(client.download(Path::new("a.bin"), &dest), 0);
        assert!(!client.is_connected());
    }
}
