//! `glsd`: lists a path and its immediate children for clients holding a
//! certificate signed by the configured CA.

pub mod config;
pub mod fs;
pub mod rpc;
pub mod server;
pub mod tls;

pub use config::Config;
pub use rpc::Registry;
pub use server::{serve_connection, ConnectionPolicy, Server};
pub use tls::{Incoming, MutualTlsListener};
