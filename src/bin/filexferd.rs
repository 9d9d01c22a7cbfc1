use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use filexfer::cli::{init_tracing, ServerOpts};
use filexfer::logger::TextLogger;
use filexfer::Server;

fn main() -> Result<()> {
    let opts = ServerOpts::parse();
    init_tracing(opts.verbose);

    // Every outcome, startup failure included, exits 0.
    if let Err(e) = serve(&opts) {
        let msg = format!("{:#}", e);
        error!(error = %msg, "server failed to start");
        eprintln!("FAIL: {}", msg);
    }
    info!("server exited");
    Ok(())
}

fn serve(opts: &ServerOpts) -> Result<()> {
    // Validate root directory exists and is a directory
    if !opts.root.is_dir() {
        anyhow::bail!("Root path is not a directory: {}", opts.root.display());
    }

    println!("Starting filexfer daemon:");
    println!("  Root: {}", opts.root.display());
    println!("  Bind: {}:{}", opts.host, opts.port);

    if opts.host == "0.0.0.0" {
        eprintln!("WARNING: Binding to 0.0.0.0 exposes the daemon to all network interfaces");
        eprintln!("   The protocol is UNENCRYPTED and UNAUTHENTICATED; use on trusted networks only");
    }

    let mut server = Server::start(opts.config()).context("Failed to start server")?;
    if let Some(ref path) = opts.log_file {
        let journal = TextLogger::new(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        server = server.with_logger(Box::new(journal));
    }

    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        eprintln!("\nTermination requested, finishing current pass...");
        shutdown.request();
    })
    .context("Error setting termination handler")?;

    if let Ok(addr) = server.local_addr() {
        println!("Listening on {}", addr);
    }

    if let Err(e) = server.run() {
        let msg = format!("{:#}", e);
        warn!(error = %msg, "event loop failed");
    }
    Ok(())
}
