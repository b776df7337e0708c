//! Siege: a JSON-RPC proxy that gates block imports on an external verifier.
//!
//! Every request is relayed unchanged to the upstream node. For
//! `test_importRawBlock` the proxy also decodes the RLP block from the first
//! param and runs the verifier binary on it; a rejected block turns the
//! upstream reply into a local `500`.

pub mod api;
pub mod block;
pub mod config;
pub mod envelope;
pub mod error;
pub mod server;
pub mod telemetry;
pub mod upstream;
pub mod verifier;

pub use config::Config;
pub use error::{
    ProxyError,
    Result,
};
pub use server::{
    ProxyState,
    SiegeProxy,
};
