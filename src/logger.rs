use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Mutex;

use crate::protocol::Command;

/// Transfer journal hooks. Every hook is a no-op by default.
pub trait Logger: Send + Sync {
    fn started(&self, _addr: SocketAddr) {}
    fn accepted(&self, _token: u64, _peer: SocketAddr) {}
    fn header(&self, _token: u64, _command: Command, _file: &Path) {}
    fn disconnected(&self, _token: u64, _peer: SocketAddr, _bytes: u64, _reason: &str) {}
    fn stopped(&self, _connections: usize) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

/// Appends one timestamped line per event to a file.
pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn started(&self, addr: SocketAddr) {
        self.line(&format!("START addr={}", addr));
    }
    fn accepted(&self, token: u64, peer: SocketAddr) {
        self.line(&format!("ACCEPT token={} peer={}", token, peer));
    }
    fn header(&self, token: u64, command: Command, file: &Path) {
        self.line(&format!("{} token={} file={}", command, token, file.display()));
    }
    fn disconnected(&self, token: u64, peer: SocketAddr, bytes: u64, reason: &str) {
        self.line(&format!(
            "CLOSE token={} peer={} bytes={} reason={}",
            token, peer, bytes, reason
        ));
    }
    fn stopped(&self, connections: usize) {
        self.line(&format!("STOP connections={connections}"));
    }
}
