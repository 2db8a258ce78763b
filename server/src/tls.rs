use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use gls_common::tls::{load_certs, load_private_key, load_root_store, provider};
use rustls::server::WebPkiClientVerifier;
use rustls::ServerConfig;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::config::Config;

#[derive(Debug, Error)]
pub enum AcceptError {
    #[error("tcp accept failed: {0}")]
    Tcp(#[source] io::Error),
    #[error("tls handshake with {peer} failed: {source}")]
    Handshake { peer: SocketAddr, source: io::Error },
}

/// TCP listener that only yields streams whose client presented a
/// certificate chaining to the configured CA bundle.
pub struct MutualTlsListener {
    tcp: TcpListener,
    acceptor: TlsAcceptor,
}

impl MutualTlsListener {
    /// Loads the TLS material and binds the listen address. Any failure here
    /// is a configuration error.
    pub async fn bind(config: &Config) -> Result<Self> {
        let tls = server_tls_config(config)?;
        let tcp = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("failed to bind {}", config.listen))?;
        info!(addr = %tcp.local_addr()?, "TLS listener bound, client certificates required");
        Ok(MutualTlsListener {
            tcp,
            acceptor: TlsAcceptor::from(Arc::new(tls)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    /// Accepts the next TCP connection. The TLS handshake is left to the
    /// caller so it can run wherever the connection will be served.
    pub async fn accept(&self) -> Result<Incoming, AcceptError> {
        let (tcp, peer) = self.tcp.accept().await.map_err(AcceptError::Tcp)?;
        if let Err(e) = tcp.set_nodelay(true) {
            warn!(%peer, error = %e, "failed to set TCP_NODELAY");
        }
        debug!(%peer, "tcp connection accepted");
        Ok(Incoming {
            tcp,
            peer,
            acceptor: self.acceptor.clone(),
        })
    }
}

/// A TCP connection that has not completed the TLS handshake yet.
pub struct Incoming {
    tcp: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
}

impl Incoming {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Runs the handshake, failing unless the client presents a certificate
    /// that chains to the CA bundle.
    pub async fn handshake(self) -> Result<(TlsStream<TcpStream>, SocketAddr), AcceptError> {
        let peer = self.peer;
        let stream = self
            .acceptor
            .accept(self.tcp)
            .await
            .map_err(|source| AcceptError::Handshake { peer, source })?;
        log_peer(&stream, peer);
        Ok((stream, peer))
    }
}

/// rustls server configuration requiring and verifying client certificates.
pub fn server_tls_config(config: &Config) -> Result<ServerConfig> {
    let roots = load_root_store(&config.ca_cert).context("failed to load CA bundle")?;
    let certs = load_certs(&config.cert).context("failed to load server certificate")?;
    let key = load_private_key(&config.key).context("failed to load server key")?;

    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider())
        .build()
        .context("failed to build client certificate verifier")?;
    let tls = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .context("server certificate and key do not form a valid pair")?;
    Ok(tls)
}

fn log_peer(stream: &TlsStream<TcpStream>, peer: SocketAddr) {
    let (_, conn) = stream.get_ref();
    match conn.peer_certificates().and_then(|certs| certs.first()) {
        Some(cert) => info!(%peer, cert_len = cert.len(), "TLS client authenticated"),
        None => warn!(%peer, "TLS client authenticated without certificate info"),
    }
}
