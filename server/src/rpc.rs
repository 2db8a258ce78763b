use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use gls_common::codec::{self, CodecError};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// What a procedure produced for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Encoded return value.
    Value(Vec<u8>),
    /// The procedure failed; the message goes back to the caller.
    Failed(String),
}

/// A registered procedure. Takes the encoded argument; an `Err` means the
/// argument could not be decoded and the connection cannot continue.
pub type Handler = Arc<dyn Fn(&[u8]) -> Result<Outcome, CodecError> + Send + Sync>;

/// Dispatch table from fully qualified procedure name to handler.
#[derive(Clone, Default)]
pub struct Registry {
    procedures: HashMap<String, Handler>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<A, R, F>(&mut self, name: impl Into<String>, procedure: F)
    where
        A: DeserializeOwned + 'static,
        R: Serialize + 'static,
        F: Fn(A) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(move |body: &[u8]| {
            let arg: A = codec::decode_body(body)?;
            match procedure(arg) {
                Ok(value) => Ok(Outcome::Value(codec::encode_body(&value)?)),
                Err(err) => Ok(Outcome::Failed(format!("{err:#}"))),
            }
        });
        self.procedures.insert(name.into(), handler);
    }

    pub fn lookup(&self, name: &str) -> Option<Handler> {
        self.procedures.get(name).cloned()
    }

    /// Registered procedure names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.procedures.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("procedures", &self.names())
            .finish()
    }
}
