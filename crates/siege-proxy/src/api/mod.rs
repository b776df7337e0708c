//! # `api`
//!
//! HTTP surface of the proxy. Every method and path is accepted and relayed
//! to the upstream node as a JSON-RPC request.
//!
//! ## `test_importRawBlock`
//!
//! ```json
//! {
//!     "jsonrpc": "2.0",
//!     "method": "test_importRawBlock",
//!     "params": ["0xf90218f90213a0..."],
//!     "id": 1
//! }
//! ```
//!
//! The request is relayed like any other. If `params[0]` decodes to a block
//! the verifier is run on it before the upstream reply is returned:
//!
//! - verifier exits 0: the upstream reply is relayed unchanged.
//! - verifier exits non-zero, cannot be started, cannot be waited on or
//!   times out: `500` with a plain-text diagnostic such as
//!   `verifier exited with code 7`.
//!
//! Payloads that do not decode to a block skip verification.
//!
//! ## Local errors
//!
//! - `400 failed to read request`
//! - `400 failed to parse request`: body is not a JSON-RPC object. Nothing is
//!   sent upstream.
//! - `500 failed to complete upstream request`

pub mod process_request;

use std::{
    net::SocketAddr,
    sync::Arc,
};

use anyhow::Result;
use hyper::{
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use tokio::net::{
    TcpListener,
    TcpStream,
};
use tokio_util::sync::CancellationToken;

use crate::server::ProxyState;

/// Accepts connections until `cancel_token` is cancelled. Each connection
/// is served on its own task.
pub async fn serve(
    listener: TcpListener,
    state: Arc<ProxyState>,
    cancel_token: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
                () = cancel_token.cancelled() => {
                    tracing::info!("Api received cancellation signal, shutting down...");
                    break;
                }
                res = listener.accept() => {
                    match res {
                        Ok((stream, socketaddr)) => {
                            serve_connection(socketaddr, state.clone(), cancel_token.clone(), stream);
                        }
                        Err(err) => {
                            tracing::error!(?err, "Error accepting connection");
                        }
                    }
                }
        }
    }

    Ok(())
}

fn serve_connection(
    socketaddr: SocketAddr,
    state: Arc<ProxyState>,
    shutdown_token: CancellationToken,
    stream: TcpStream,
) {
    tracing::debug!("Connection from: {}", socketaddr);

    // Use an adapter to access something implementing `tokio::io` traits as if they implement
    // `hyper::rt` IO traits.
    let io = TokioIo::new(stream);

    tokio::task::spawn(async move {
        let service = service_fn(move |req| {
            let state = state.clone();
            async move { process_request::handle_request(req, &state, socketaddr).await }
        });
        let conn = http1::Builder::new().serve_connection(io, service);
        tokio::pin!(conn);

        tokio::select! {
            res = conn.as_mut() => {
                // Errors here happen after the response head may already be
                // on the wire, so the status can no longer be changed.
                if let Err(err) = res {
                    tracing::error!(?err, "Error serving connection");
                }
            }
            () = shutdown_token.cancelled() => {
                conn.as_mut().graceful_shutdown();
                if let Err(err) = conn.await {
                    tracing::error!(?err, "Error serving connection during shutdown");
                }
            }
        }
    });
}
