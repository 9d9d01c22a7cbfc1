//! filexfer - upload or download one file against a filexferd server

use anyhow::{Context, Result};
use clap::Parser;

use filexfer::cli::{init_tracing, ClientOpts};
use filexfer::Client;

fn main() -> Result<()> {
    let opts = ClientOpts::parse();
    init_tracing(opts.verbose);

    let local = opts.local_path();
    let mut client = Client::new();
    client
        .connect(&opts.host, opts.port)
        .with_context(|| format!("Failed to connect to {}:{}", opts.host, opts.port))?;

    if opts.download {
        println!("Downloading {} -> {}", opts.file.display(), local.display());
        let received = client.download(&opts.file, &local);
        if received == 0 {
            anyhow::bail!("download of {} failed", opts.file.display());
        }
        println!("ok ({} bytes)", received);
    } else {
        let expected = std::fs::metadata(&local)
            .with_context(|| format!("Failed to stat {}", local.display()))?
            .len();
        println!("Uploading {} -> {}", local.display(), opts.file.display());
        let sent = client.upload(&opts.file, &local);
        if sent != expected {
            anyhow::bail!("upload incomplete: sent {} of {} bytes", sent, expected);
        }
        println!("ok ({} bytes)", sent);
    }
    Ok(())
}
