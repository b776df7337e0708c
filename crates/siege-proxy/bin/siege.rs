use anyhow::Result;
use clap::Parser;
use siege_proxy::{
    Config,
    SiegeProxy,
    telemetry::init_tracing,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(config.log_level, config.log_format, config.log_color())?;

    let server = config.build().await?;
    let cancellation_token = CancellationToken::new();

    run_server(server, cancellation_token).await;

    Ok(())
}

async fn run_server(server: SiegeProxy, cancellation_token: CancellationToken) {
    let mut boxed_server_future = Box::pin(server.run(cancellation_token.clone()));

    tokio::select! {
        result = &mut boxed_server_future => {
           handle_server_result(result);
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C signal, initiating graceful shutdown");
            cancellation_token.cancel();
            handle_server_result(boxed_server_future.await);
        }
    }
}

/// Handle the result of the server
fn handle_server_result(result: Result<()>) {
    match result {
        Ok(()) => tracing::info!("Server shutdown gracefully"),
        Err(e) => {
            tracing::error!("Server encountered an error: {}", e);
        }
    }
}
