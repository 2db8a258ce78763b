use std::sync::Arc;

use gls_common::codec::{self, Call, CodecError, ReplyHeader};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::rpc::{Outcome, Registry};
use crate::tls::{Incoming, MutualTlsListener};

/// How accepted connections are scheduled relative to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPolicy {
    /// Serve each connection to completion before accepting the next.
    #[default]
    Sequential,
    /// One task per connection. Calls within a connection stay sequential.
    TaskPerConnection,
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("unknown procedure {0:?}")]
    UnknownProcedure(String),
    #[error("bad argument for {method}: {source}")]
    BadArgument { method: String, source: CodecError },
    #[error("procedure {method} panicked or was cancelled: {source}")]
    Procedure {
        method: String,
        source: tokio::task::JoinError,
    },
}

pub struct Server {
    listener: MutualTlsListener,
    registry: Arc<Registry>,
    policy: ConnectionPolicy,
}

impl Server {
    pub fn new(listener: MutualTlsListener, registry: Registry, policy: ConnectionPolicy) -> Self {
        Server {
            listener,
            registry: Arc::new(registry),
            policy,
        }
    }

    /// Accept loop. Only returns if the runtime is torn down.
    pub async fn run(self) {
        info!(policy = ?self.policy, "accepting connections");
        loop {
            let incoming = match self.listener.accept().await {
                Ok(incoming) => incoming,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };

            match self.policy {
                ConnectionPolicy::Sequential => {
                    handle_connection(incoming, &self.registry).await;
                }
                ConnectionPolicy::TaskPerConnection => {
                    let registry = self.registry.clone();
                    tokio::spawn(async move {
                        handle_connection(incoming, &registry).await;
                    });
                }
            }
        }
    }
}

async fn handle_connection(incoming: Incoming, registry: &Registry) {
    debug!(peer = %incoming.peer(), "starting handshake");
    let (stream, peer) = match incoming.handshake().await {
        Ok(established) => established,
        Err(e) => {
            warn!(error = %e, "handshake failed");
            return;
        }
    };
    match serve_connection(stream, registry).await {
        Ok(calls) => info!(%peer, calls, "connection closed"),
        Err(e) => warn!(%peer, error = %e, "connection terminated"),
    }
}

/// Serves calls on `stream` until the peer closes it or a protocol error
/// occurs, then shuts the stream down. Returns the number of calls answered.
pub async fn serve_connection<S>(mut stream: S, registry: &Registry) -> Result<u64, ServeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let result = serve_calls(&mut stream, registry).await;
    if let Err(e) = stream.shutdown().await {
        debug!(error = %e, "shutdown after serve");
    }
    result
}

async fn serve_calls<S>(stream: &mut S, registry: &Registry) -> Result<u64, ServeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut served = 0;
    loop {
        let call = match codec::read_call(stream).await {
            Ok(Some(call)) => call,
            Ok(None) => return Ok(served),
            Err(CodecError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // Peer went away without a TLS close_notify or mid-frame.
                debug!(error = %e, "stream ended");
                return Ok(served);
            }
            Err(e) => return Err(e.into()),
        };
        let Call { header, body } = call;
        debug!(method = %header.method, seq = header.seq, "call");

        let Some(handler) = registry.lookup(&header.method) else {
            let message = format!("unknown procedure {:?}", header.method);
            send_error(stream, &header.method, header.seq, message).await;
            return Err(ServeError::UnknownProcedure(header.method));
        };

        let outcome = tokio::task::spawn_blocking(move || handler(&body[..]))
            .await
            .map_err(|source| ServeError::Procedure {
                method: header.method.clone(),
                source,
            })?;

        let (error, body) = match outcome {
            Ok(Outcome::Value(body)) => (None, body),
            Ok(Outcome::Failed(message)) => {
                debug!(method = %header.method, seq = header.seq, error = %message, "procedure failed");
                (Some(message), codec::encode_body(&())?)
            }
            Err(source) => {
                let message = format!("bad argument for {}: {}", header.method, source);
                send_error(stream, &header.method, header.seq, message).await;
                return Err(ServeError::BadArgument {
                    method: header.method,
                    source,
                });
            }
        };

        let reply = ReplyHeader {
            method: header.method,
            seq: header.seq,
            error,
        };
        match codec::write_reply(stream, &reply, &body).await {
            Ok(()) => {}
            // Nothing was written yet, so the stream is still in sync.
            Err(CodecError::TooLarge(len)) if reply.error.is_none() => {
                warn!(method = %reply.method, seq = reply.seq, len, "result exceeds frame limit");
                let failed = ReplyHeader {
                    error: Some(format!("result of {len} bytes exceeds frame limit")),
                    ..reply
                };
                codec::write_reply(stream, &failed, &codec::encode_body(&())?).await?;
            }
            Err(e) => return Err(e.into()),
        }
        served += 1;
    }
}

/// Best-effort error result written just before the connection is dropped.
async fn send_error<S>(stream: &mut S, method: &str, seq: u64, message: String)
where
    S: AsyncWrite + Unpin,
{
    let reply = ReplyHeader {
        method: method.to_string(),
        seq,
        error: Some(message),
    };
    let result = match codec::encode_body(&()) {
        Ok(body) => codec::write_reply(stream, &reply, &body).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        debug!(error = %e, "could not deliver error result");
    }
}
