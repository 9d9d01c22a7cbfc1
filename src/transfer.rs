//! Chunked socket <-> file streaming steps
//!
//! Each step moves at most one chunk and is only called once the multiplexer
//! has reported the socket ready. `Ok(n)` is the number of payload bytes that
//! made it across; `Err` ends the connection.

use crate::connection::DisconnectReason;
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};

fn is_transient(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
}

/// Socket -> file. A zero-length read means the peer is done sending, which
/// is the only way an upload ends.
pub fn upload_step<S, F>(sock: &mut S, file: &mut F, scratch: &mut [u8]) -> Result<usize, DisconnectReason>
where
    S: Read,
    F: Write,
{
    let n = match sock.read(scratch) {
        Ok(0) => return Err(DisconnectReason::PeerClosed),
        Ok(n) => n,
        Err(e) if is_transient(&e) => return Ok(0),
        Err(e) => return Err(DisconnectReason::Io(e)),
    };
    file.write_all(&scratch[..n])?;
    Ok(n)
}

/// File -> socket. Whatever the socket did not accept is pushed back by
/// seeking the file, so the next step resends it.
pub fn download_step<F, S>(file: &mut F, sock: &mut S, scratch: &mut [u8]) -> Result<usize, DisconnectReason>
where
    F: Read + Seek,
    S: Write,
{
    let read = loop {
        match file.read(scratch) {
            Ok(0) => return Err(DisconnectReason::Complete),
            Ok(n) => break n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(DisconnectReason::Io(e)),
        }
    };

    let sent = match sock.write(&scratch[..read]) {
        Ok(0) => return Err(DisconnectReason::Io(ErrorKind::WriteZero.into())),
        Ok(n) => n,
        Err(e) if is_transient(&e) => 0,
        Err(e) => return Err(DisconnectReason::Io(e)),
    };

    if sent < read {
        let shortfall = (read - sent) as i64;
        file.seek(SeekFrom::Current(-shortfall))?;
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CHUNK_SIZE;
    use proptest::prelude::*;
    use std::io::Cursor;

    /// Accepts at most `limit` bytes per write, cycling through `limits`.
    struct Stingy {
        out: Vec<u8>,
        limits: Vec<usize>,
        calls: usize,
    }

    impl Write for Stingy {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let limit = self.limits[self.calls % self.limits.len()];
            self.calls += 1;
            if limit == 0 {
                return Err(ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(limit);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Hands out the input in the given fragment sizes.
    struct Fragmented {
        data: Vec<u8>,
        pos: usize,
        sizes: Vec<usize>,
        calls: usize,
    }

    impl Read for Fragmented {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let want = self.sizes[self.calls % self.sizes.len()].max(1);
            self.calls += 1;
            let n = want.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn drain_download(file: &mut Cursor<Vec<u8>>, sock: &mut Stingy) -> DisconnectReason {
        let mut scratch = vec![0u8; CHUNK_SIZE];
        loop {
            if let Err(reason) = download_step(file, sock, &mut scratch) {
                return reason;
            }
        }
    }

    #[test]
    fn upload_appends_chunks_until_peer_closes() {
        let data = payload(3000);
        let mut sock = Cursor::new(data.clone());
        let mut file = Vec::new();
        let mut scratch = vec![0u8; CHUNK_SIZE];
        assert_eq!(upload_step(&mut sock, &mut file, &mut scratch).unwrap(), CHUNK_SIZE);
        assert_eq!(upload_step(&mut sock, &mut file, &mut scratch).unwrap(), CHUNK_SIZE);
        assert_eq!(upload_step(&mut sock, &mut file, &mut scratch).unwrap(), 952);
        assert!(matches!(
            upload_step(&mut sock, &mut file, &mut scratch),
            Err(DisconnectReason::PeerClosed)
        ));
        assert_eq!(file, data);
    }

    #[test]
    fn download_rewinds_on_short_write() {
        let data = payload(2500);
        let mut file = Cursor::new(data.clone());
        let mut sock = Stingy { out: Vec::new(), limits: vec![100], calls: 0 };
        let mut scratch = vec![0u8; CHUNK_SIZE];

        assert_eq!(download_step(&mut file, &mut sock, &mut scratch).unwrap(), 100);
        assert_eq!(file.position(), 100);
        assert_eq!(download_step(&mut file, &mut sock, &mut scratch).unwrap(), 100);
        assert_eq!(sock.out, &data[..200]);
    }

    #[test]
    fn download_would_block_loses_nothing() {
        let data = payload(1500);
        let mut file = Cursor::new(data.clone());
        let mut sock = Stingy { out: Vec::new(), limits: vec![0, 700], calls: 0 };
        let reason = drain_download(&mut file, &mut sock);
        assert!(matches!(reason, DisconnectReason::Complete));
        assert_eq!(sock.out, data);
    }

    #[test]
    fn download_of_empty_file_completes_immediately() {
        let mut file = Cursor::new(Vec::new());
        let mut sock = Stingy { out: Vec::new(), limits: vec![CHUNK_SIZE], calls: 0 };
        let mut scratch = vec![0u8; CHUNK_SIZE];
        assert!(matches!(
            download_step(&mut file, &mut sock, &mut scratch),
            Err(DisconnectReason::Complete)
        ));
        assert_eq!(sock.calls, 0);
    }

    #[test]
    fn zero_length_socket_write_disconnects() {
        struct Closed;
        impl Write for Closed {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Ok(0)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let mut file = Cursor::new(payload(10));
        let mut scratch = vec![0u8; CHUNK_SIZE];
        assert!(matches!(
            download_step(&mut file, &mut Closed, &mut scratch),
            Err(DisconnectReason::Io(e)) if e.kind() == ErrorKind::WriteZero
        ));
    }

    proptest! {
        #[test]
        fn partial_writes_deliver_every_byte_once(
            len in 0usize..6000,
            limits in proptest::collection::vec(1usize..1500, 1..8),
        ) {
            let data = payload(len);
            let mut file = Cursor::new(data.clone());
            let mut sock = Stingy { out: Vec::new(), limits, calls: 0 };
            let reason = drain_download(&mut file, &mut sock);
            prop_assert!(matches!(reason, DisconnectReason::Complete));
            prop_assert_eq!(sock.out, data);
        }

        #[test]
        fn fragmented_upload_is_byte_exact(
            len in 0usize..6000,
            sizes in proptest::collection::vec(1usize..2000, 1..8),
        ) {
            let data = payload(len);
            let mut sock = Fragmented { data: data.clone(), pos: 0, sizes, calls: 0 };
            let mut file = Vec::new();
            let mut scratch = vec![0u8; CHUNK_SIZE];
            loop {
                match upload_step(&mut sock, &mut file, &mut scratch) {
                    Ok(_) => continue,
                    Err(DisconnectReason::PeerClosed) => break,
                    Err(other) => panic!("unexpected disconnect: {other}"),
                }
            }
            prop_assert_eq!(file, data);
        }
    }
}
