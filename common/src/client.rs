use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::codec::{self, CallHeader, CodecError};
use crate::types::FileList;
use crate::LS_METHOD;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("server closed the connection")]
    Closed,
    #[error("reply for {got_method} #{got_seq} does not match call {method} #{seq}")]
    Mismatch {
        method: String,
        seq: u64,
        got_method: String,
        got_seq: u64,
    },
    /// The procedure ran and failed; the connection is still usable.
    #[error("{0}")]
    Remote(String),
}

/// Client half of the envelope protocol. Calls are issued one at a time.
pub struct Client<S> {
    stream: S,
    seq: u64,
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Client { stream, seq: 0 }
    }

    pub async fn call<A, R>(&mut self, method: &str, arg: &A) -> Result<R, ClientError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let header = CallHeader {
            method: method.to_string(),
            seq: self.seq,
        };
        self.seq += 1;

        debug!(method, seq = header.seq, "sending call");
        codec::write_call(&mut self.stream, &header, arg).await?;
        let reply = codec::read_reply(&mut self.stream)
            .await?
            .ok_or(ClientError::Closed)?;

        if reply.header.seq != header.seq || reply.header.method != header.method {
            return Err(ClientError::Mismatch {
                method: header.method,
                seq: header.seq,
                got_method: reply.header.method,
                got_seq: reply.header.seq,
            });
        }
        if let Some(error) = reply.header.error {
            return Err(ClientError::Remote(error));
        }
        Ok(codec::decode_body(&reply.body)?)
    }

    /// Lists `path` and its immediate children.
    pub async fn ls(&mut self, path: &str) -> Result<FileList, ClientError> {
        self.call(LS_METHOD, path).await
    }

    /// Shuts down the write side, signalling the server that no more calls follow.
    pub async fn close(mut self) -> std::io::Result<()> {
        self.stream.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_body, read_call, write_reply, ReplyHeader};
    use tokio::io::duplex;

    #[tokio::test]
    async fn remote_error_is_surfaced_and_sequence_advances() {
        let (client_io, mut server_io) = duplex(4096);
        let mut client = Client::new(client_io);

        let server = tokio::spawn(async move {
            for expected_seq in 0..2u64 {
                let call = read_call(&mut server_io).await.unwrap().expect("call");
                assert_eq!(call.header.seq, expected_seq);
                let header = ReplyHeader {
                    method: call.header.method,
                    seq: call.header.seq,
                    error: Some("boom".to_string()),
                };
                write_reply(&mut server_io, &header, &encode_body(&()).unwrap())
                    .await
                    .unwrap();
            }
        });

        for _ in 0..2 {
            match client.ls("/nope").await {
                Err(ClientError::Remote(msg)) => assert_eq!(msg, "boom"),
                other => panic!("unexpected result: {other:?}"),
            }
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn mismatched_sequence_is_rejected() {
        let (client_io, mut server_io) = duplex(4096);
        let mut client = Client::new(client_io);

        let server = tokio::spawn(async move {
            let call = read_call(&mut server_io).await.unwrap().expect("call");
            let header = ReplyHeader {
                method: call.header.method,
                seq: call.header.seq + 41,
                error: None,
            };
            write_reply(&mut server_io, &header, &encode_body(&FileList::default()).unwrap())
                .await
                .unwrap();
        });

        let err = client.ls("/").await.unwrap_err();
        assert!(matches!(err, ClientError::Mismatch { got_seq: 41, .. }), "{err}");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn closed_connection_is_reported() {
        let (client_io, server_io) = duplex(4096);
        let mut client = Client::new(client_io);
        drop(server_io);

        let err = client.ls("/").await.unwrap_err();
        assert!(matches!(err, ClientError::Closed | ClientError::Codec(_)), "{err}");
    }
}
