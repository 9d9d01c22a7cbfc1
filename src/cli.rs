//! Shared CLI definitions for the filexferd daemon and the filexfer client

use crate::protocol::{DEFAULT_PORT, DEFAULT_QUEUE};
use crate::server::ServerConfig;
use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Daemon options
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Poll-driven file upload/download server")]
pub struct ServerOpts {
    /// Bind address (all interfaces by default)
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Pending-connection queue depth
    #[arg(long, default_value_t = DEFAULT_QUEUE)]
    pub queue: i32,

    /// Poll timeout in milliseconds (negative = wait indefinitely)
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub timeout: i64,

    /// Directory uploads land in and downloads are served from
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Append a transfer journal to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Log every chunk
    #[arg(short, long)]
    pub verbose: bool,
}

impl ServerOpts {
    pub fn config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            queue: self.queue,
            timeout: u64::try_from(self.timeout).ok().map(Duration::from_millis),
            root: self.root.clone(),
        }
    }
}

/// Client options
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Upload or download one file")]
#[command(group(ArgGroup::new("mode").required(true).args(["download", "upload"])))]
pub struct ClientOpts {
    /// Download FILE from the server
    #[arg(short, long)]
    pub download: bool,

    /// Upload LOCALFILE to the server as FILE
    #[arg(short, long)]
    pub upload: bool,

    /// Server host
    #[arg(short = 'H', long, default_value = "localhost")]
    pub host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// File name on the server (any directory part is ignored)
    pub file: PathBuf,

    /// Local path (defaults to FILE)
    pub local: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl ClientOpts {
    pub fn local_path(&self) -> PathBuf {
        self.local.clone().unwrap_or_else(|| self.file.clone())
    }
}

/// Install the fmt subscriber. `RUST_LOG` wins over the verbosity flag.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let opts = ServerOpts::parse_from(["filexferd"]);
        let cfg = opts.config();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.queue, 10);
        assert_eq!(cfg.timeout, None);
        assert_eq!(cfg.root, PathBuf::from("."));
    }

    #[test]
    fn server_timeout_in_millis() {
        let opts = ServerOpts::parse_from(["filexferd", "--timeout", "250", "-p", "9000"]);
        let cfg = opts.config();
        assert_eq!(cfg.timeout, Some(Duration::from_millis(250)));
        assert_eq!(cfg.port, 9000);
    }

    #[test]
    fn client_requires_exactly_one_mode() {
        assert!(ClientOpts::try_parse_from(["filexfer", "a.txt"]).is_err());
        assert!(ClientOpts::try_parse_from(["filexfer", "-d", "-u", "a.txt"]).is_err());
        let opts = ClientOpts::try_parse_from(["filexfer", "-d", "x/a.txt"]).unwrap();
        assert!(opts.download);
        assert_eq!(opts.host, "localhost");
        assert_eq!(opts.port, 8080);
        assert_eq!(opts.local_path(), PathBuf::from("x/a.txt"));
    }

    #[test]
    fn client_local_override() {
        let opts =
            ClientOpts::try_parse_from(["filexfer", "-u", "-H", "srv", "notes.txt", "/tmp/n.txt"]).unwrap();
        assert!(opts.upload);
        assert_eq!(opts.host, "srv");
        assert_eq!(opts.local_path(), PathBuf::from("/tmp/n.txt"));
    }
}
