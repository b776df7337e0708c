use std::{
    convert::Infallible,
    net::SocketAddr,
};

use http_body_util::{
    BodyExt,
    Full,
    Limited,
};
use hyper::{
    HeaderMap,
    Request,
    Response,
    StatusCode,
    body::{
        Body,
        Bytes,
    },
    header::{
        self,
        HeaderValue,
    },
};
use metrics::counter;
use tracing::{
    debug,
    error,
    info,
};

use crate::{
    block::decode_block_param,
    envelope::RpcEnvelope,
    error::{
        ProxyError,
        Result,
    },
    server::ProxyState,
    upstream::UpstreamResponse,
    verifier::{
        SkipReason,
        VerificationOutcome,
        Verifier,
    },
};

/// The method whose payload is handed to the verifier.
pub const IMPORT_RAW_BLOCK_METHOD: &str = "test_importRawBlock";

/// Handles one inbound request end to end. Never fails: local errors are
/// turned into plain-text 400/500 responses.
#[tracing::instrument(
    level = "info",
    skip_all,
    target = "api::handle_request",
    fields(client_addr = %client_addr, method = tracing::field::Empty)
)]
pub async fn handle_request<B>(
    req: Request<B>,
    state: &ProxyState,
    client_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match process_request(req, state).await {
        Ok(upstream) => Ok(relay_response(upstream)),
        Err(err) => {
            error!(%err, "request failed");
            counter!("siege_local_errors_total", "kind" => err.kind()).increment(1);
            Ok(local_error_response(&err))
        }
    }
}

/// Reads, parses and forwards the request, then gates the upstream reply on
/// the verifier. The upstream call always happens first so the node's real
/// answer is obtained even when verification later vetoes it.
async fn process_request<B>(req: Request<B>, state: &ProxyState) -> Result<UpstreamResponse>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let body = read_body(req, state.max_request_bytes).await?;
    let envelope = RpcEnvelope::decode(&body)?;

    tracing::Span::current().record("method", envelope.method.as_str());
    counter!("siege_requests_total", "method" => envelope.method.clone()).increment(1);
    debug!(id = ?envelope.id, params = envelope.params.len(), "forwarding request");

    let upstream = state.upstream.forward(body).await?;

    let outcome = verify_envelope(&envelope, &state.verifier).await;
    counter!("siege_verifications_total", "outcome" => outcome.label()).increment(1);
    outcome.into_result()?;

    Ok(upstream)
}

async fn read_body<B>(req: Request<B>, limit: usize) -> Result<Bytes>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let collected = Limited::new(req.into_body(), limit)
        .collect()
        .await
        .map_err(|err| ProxyError::ReadBody(err.to_string()))?;
    Ok(collected.to_bytes())
}

/// Runs the verifier if `envelope` imports a decodable raw block.
pub async fn verify_envelope(envelope: &RpcEnvelope, verifier: &Verifier) -> VerificationOutcome {
    if envelope.method != IMPORT_RAW_BLOCK_METHOD {
        return VerificationOutcome::Skipped(SkipReason::NotSentinel);
    }

    let Some(payload) = envelope.first_param() else {
        debug!("block import without params, skipping verification");
        return VerificationOutcome::Skipped(SkipReason::MissingPayload);
    };

    let block = match decode_block_param(payload) {
        Ok(block) => block,
        Err(err) => {
            debug!(
                %err,
                "failed to decode block payload, maybe an intentionally invalid test block? skipping"
            );
            return VerificationOutcome::Skipped(SkipReason::Undecodable);
        }
    };

    info!(
        number = block.number,
        hash = %block.hash,
        "verifying imported block"
    );
    verifier.verify(&block).await
}

fn relay_response(upstream: UpstreamResponse) -> Response<Full<Bytes>> {
    let UpstreamResponse {
        status,
        headers,
        body,
    } = upstream;

    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn local_error_response(err: &ProxyError) -> Response<Full<Bytes>> {
    text_response(err.status(), err.diagnostic())
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
