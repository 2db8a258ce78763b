use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::server::ConnectionPolicy;

/// Startup configuration for `glsd`. Parsed once in `main` and passed by
/// reference from there on.
#[derive(Debug, Clone, Parser)]
#[command(name = "glsd", about = "Serve shallow directory listings over mutual TLS")]
pub struct Config {
    /// Path to the PEM bundle of CAs trusted to sign client certificates
    #[arg(long = "tlscacert")]
    pub ca_cert: PathBuf,

    /// Path to the server certificate chain (PEM)
    #[arg(long = "tlscert")]
    pub cert: PathBuf,

    /// Path to the server private key (PEM)
    #[arg(long = "tlskey")]
    pub key: PathBuf,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Serve connections concurrently instead of one at a time
    #[arg(long)]
    pub concurrent: bool,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    pub fn policy(&self) -> ConnectionPolicy {
        if self.concurrent {
            ConnectionPolicy::TaskPerConnection
        } else {
            ConnectionPolicy::Sequential
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_port_8080_and_sequential() {
        let config = Config::try_parse_from([
            "glsd",
            "--tlscacert",
            "ca.pem",
            "--tlscert",
            "cert.pem",
            "--tlskey",
            "key.pem",
        ])
        .unwrap();
        assert_eq!(config.listen, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.ca_cert, PathBuf::from("ca.pem"));
        assert_eq!(config.policy(), ConnectionPolicy::Sequential);
    }

    #[test]
    fn tls_paths_are_required() {
        let err = Config::try_parse_from(["glsd", "--tlscert", "cert.pem"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn concurrent_flag_selects_task_per_connection() {
        let config = Config::try_parse_from([
            "glsd",
            "--tlscacert=ca.pem",
            "--tlscert=cert.pem",
            "--tlskey=key.pem",
            "--listen=127.0.0.1:9000",
            "--concurrent",
        ])
        .unwrap();
        assert_eq!(config.policy(), ConnectionPolicy::TaskPerConnection);
        assert_eq!(config.listen.port(), 9000);
    }
}
