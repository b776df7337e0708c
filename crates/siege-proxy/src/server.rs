use std::{
    net::SocketAddr,
    sync::Arc,
};

use anyhow::Result;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{
    upstream::UpstreamClient,
    verifier::Verifier,
};

/// Immutable per-process state shared by every request handler.
#[derive(Debug)]
pub struct ProxyState {
    pub upstream: UpstreamClient,
    pub verifier: Verifier,
    /// Largest request body accepted, in bytes.
    pub max_request_bytes: usize,
}

pub struct SiegeProxy {
    pub listener: TcpListener,
    pub state: Arc<ProxyState>,
}

impl SiegeProxy {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves requests until the cancellation token is cancelled.
    pub async fn run(self, cancel_token: CancellationToken) -> Result<()> {
        let addr = self.local_addr()?;
        tracing::info!(
            %addr,
            upstream = %self.state.upstream.url(),
            verifier = %self.state.verifier.path().display(),
            "siege proxy listening"
        );

        crate::api::serve(self.listener, self.state, cancel_token).await?;
        tracing::info!("siege proxy shutdown complete");
        Ok(())
    }
}
