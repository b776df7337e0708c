use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use clap::{
    ArgAction,
    Parser,
};
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::{
    error::{
        ProxyError,
        Result,
    },
    server::{
        ProxyState,
        SiegeProxy,
    },
    telemetry::{
        LogFormat,
        stdout_is_terminal,
    },
    upstream::UpstreamClient,
    verifier::Verifier,
};

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "JSON-RPC proxy that runs a block verifier on imported blocks",
    long_about = None
)]
pub struct Config {
    /// HTTP address of the surrounded node
    #[arg(long, env = "SIEGE_NODE_ADDR", default_value = "http://127.0.0.1:8545")]
    pub node_addr: Url,
    /// Address the proxy listens on
    #[arg(long, env = "SIEGE_LISTEN_ADDR", default_value = "127.0.0.1:9000")]
    pub listen_addr: SocketAddr,
    /// Path of the verifier binary
    #[arg(
        long,
        visible_alias = "cannon",
        env = "SIEGE_VERIFIER_PATH",
        default_value = "../cannon"
    )]
    pub verifier_path: PathBuf,
    /// Kill the verifier and fail the request if it runs longer than this
    #[arg(long, env = "SIEGE_VERIFIER_TIMEOUT_SECS")]
    pub verifier_timeout_secs: Option<u64>,
    /// Timeout for a single upstream round trip
    #[arg(long, env = "SIEGE_UPSTREAM_TIMEOUT_SECS", default_value = "60")]
    pub upstream_timeout_secs: u64,
    /// Largest request body accepted, in bytes
    #[arg(long, env = "SIEGE_MAX_REQUEST_BYTES", default_value = "134217728")]
    pub max_request_bytes: usize,
    /// Log level
    #[arg(long, env = "SIEGE_LOG_LEVEL", default_value = "info")]
    pub log_level: LevelFilter,
    /// Log format
    #[arg(long, env = "SIEGE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
    /// Colored log output, defaults to whether stdout is a terminal
    #[arg(long, env = "SIEGE_LOG_COLOR", action = ArgAction::Set)]
    pub log_color: Option<bool>,
}

impl Config {
    /// Checks values clap cannot express as types.
    pub fn validate(self) -> Result<Self> {
        if self.upstream_timeout_secs == 0 {
            return Err(ProxyError::InvalidConfig(
                "upstream timeout must be greater than zero".to_string(),
            ));
        }
        if self.verifier_timeout_secs == Some(0) {
            return Err(ProxyError::InvalidConfig(
                "verifier timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_request_bytes == 0 {
            return Err(ProxyError::InvalidConfig(
                "max request bytes must be greater than zero".to_string(),
            ));
        }
        Ok(self)
    }

    pub fn log_color(&self) -> bool {
        self.log_color.unwrap_or_else(stdout_is_terminal)
    }

    pub fn verifier_timeout(&self) -> Option<Duration> {
        self.verifier_timeout_secs.map(Duration::from_secs)
    }

    /// Build the siege proxy
    pub async fn build(self) -> Result<SiegeProxy> {
        let config = self.validate()?;

        let upstream = UpstreamClient::new(
            config.node_addr.clone(),
            Duration::from_secs(config.upstream_timeout_secs),
        )?;
        let verifier = Verifier::new(config.verifier_path.clone(), config.verifier_timeout());

        // Bind to an address
        let listener = TcpListener::bind(&config.listen_addr).await?;

        Ok(SiegeProxy {
            listener,
            state: Arc::new(ProxyState {
                upstream,
                verifier,
                max_request_bytes: config.max_request_bytes,
            }),
        })
    }
}
