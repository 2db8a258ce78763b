use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use gls_common::client::{Client, ClientError};
use gls_common::tls::client_config;
use gls_common::types::FileList;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, error, info};

#[derive(Parser)]
#[clap(name = "gls", about = "List remote directories served by glsd")]
struct Opts {
    /// Path to the CA bundle used to verify the server
    #[clap(long = "tlscacert")]
    ca_cert: PathBuf,

    /// Path to the client certificate (PEM)
    #[clap(long = "tlscert")]
    cert: PathBuf,

    /// Path to the client private key (PEM)
    #[clap(long = "tlskey")]
    key: PathBuf,

    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Name to verify the server certificate against
    #[clap(long, default_value = "localhost")]
    server_name: String,

    /// Print listings as JSON, one document per path
    #[clap(long)]
    json: bool,

    /// Log at debug level
    #[clap(short, long)]
    verbose: bool,

    /// Paths to list on the server
    #[clap(default_value = ".")]
    paths: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let opts = Opts::parse();

    tracing_subscriber::fmt()
        .with_max_level(if opts.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .with_writer(std::io::stderr)
        .init();

    let tls = client_config(&opts.ca_cert, &opts.cert, &opts.key)?;
    let server_name = ServerName::try_from(opts.server_name.clone())
        .with_context(|| format!("invalid server name {:?}", opts.server_name))?;

    info!("Connecting to {}", opts.server);
    let tcp = TcpStream::connect(&opts.server)
        .await
        .with_context(|| format!("failed to connect to {}", opts.server))?;
    let stream = TlsConnector::from(Arc::new(tls))
        .connect(server_name, tcp)
        .await
        .context("TLS handshake failed")?;
    let mut client = Client::new(stream);

    let mut failed = false;
    let stdout = std::io::stdout();
    for path in &opts.paths {
        debug!("Listing {}", path);
        match client.ls(path).await {
            Ok(list) => {
                debug!("{} entries for {}", list.len(), path);
                let mut out = stdout.lock();
                if opts.json {
                    serde_json::to_writer(&mut out, &list)?;
                    writeln!(out)?;
                } else {
                    print_listing(&mut out, path, &list, opts.paths.len() > 1)?;
                }
            }
            Err(ClientError::Remote(msg)) => {
                error!("Server could not list {}: {}", path, msg);
                eprintln!("gls: {}: {}", path, msg);
                failed = true;
            }
            Err(e) => return Err(e).with_context(|| format!("failed to list {}", path)),
        }
    }

    if let Err(e) = client.close().await {
        debug!("Error closing connection: {}", e);
    }
    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

fn print_listing(out: &mut impl Write, path: &str, list: &FileList, header: bool) -> std::io::Result<()> {
    if header {
        writeln!(out, "{}:", path)?;
    }
    if list.is_empty() {
        return Ok(());
    }
    let width = list
        .entries
        .iter()
        .map(|e| e.size.to_string().len())
        .max()
        .unwrap_or(1);
    for entry in &list.entries {
        writeln!(
            out,
            "{} {:>width$} {} {}",
            entry.mode,
            entry.size,
            entry.mod_time,
            entry.name,
            width = width
        )?;
    }
    if header {
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gls_common::types::FileEntry;

    fn entry(name: &str, size: u64, mode: &str) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            size,
            mode: mode.to_string(),
            mod_time: "Jan  2 15:04".to_string(),
        }
    }

    #[test]
    fn listing_aligns_sizes() {
        let list = FileList {
            entries: vec![entry("x", 4096, "drwx------"), entry("a.txt", 100, "-rw-r--r--")],
        };
        let mut out = Vec::new();
        print_listing(&mut out, "/tmp/x", &list, false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "drwx------ 4096 Jan  2 15:04 x\n-rw-r--r--  100 Jan  2 15:04 a.txt\n"
        );
    }

    #[test]
    fn multiple_paths_get_headers() {
        let list = FileList {
            entries: vec![entry("f", 1, "-rw-r--r--")],
        };
        let mut out = Vec::new();
        print_listing(&mut out, "f", &list, true).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "f:\n-rw-r--r-- 1 Jan  2 15:04 f\n\n");
    }

    #[test]
    fn parses_paths_and_defaults() {
        let opts = Opts::try_parse_from([
            "gls",
            "--tlscacert=ca.pem",
            "--tlscert=client.pem",
            "--tlskey=client.key",
            "/etc",
            "/tmp",
        ])
        .unwrap();
        assert_eq!(opts.server, "127.0.0.1:8080");
        assert_eq!(opts.server_name, "localhost");
        assert_eq!(opts.paths, ["/etc", "/tmp"]);
    }
}
