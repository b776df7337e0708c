use std::time::Duration;

use hyper::{
    HeaderMap,
    StatusCode,
    body::Bytes,
    header::{
        self,
        HeaderName,
    },
};
use reqwest::Client;
use url::Url;

use crate::error::{
    ProxyError,
    Result,
};

/// Default bound on a single upstream round trip.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection-scoped headers that describe how the upstream framed its
/// response. The proxy re-frames the body so these are never relayed.
const HOP_BY_HOP_HEADERS: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
];

/// Upstream reply, captured in full before the proxy decides what to send
/// back to its caller.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Relays request bodies to the upstream JSON-RPC node.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: Client,
    url: Url,
}

impl UpstreamClient {
    pub fn new(url: Url, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ProxyError::Client)?;
        Ok(Self { http, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// POSTs `body` unchanged to the upstream node and reads the full reply.
    pub async fn forward(&self, body: Bytes) -> Result<UpstreamResponse> {
        let response = self
            .http
            .post(self.url.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(ProxyError::UpstreamRequest)?;

        let status = response.status();
        let headers = relayable_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(ProxyError::UpstreamRequest)?;

        metrics::counter!("siege_upstream_responses_total", "status" => status.as_str().to_owned())
            .increment(1);

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

fn relayable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut relayed = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            relayed.append(name.clone(), value.clone());
        }
    }
    relayed
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;
    use wiremock::{
        Mock,
        MockServer,
        ResponseTemplate,
        matchers::{
            body_bytes,
            header as header_matcher,
            method,
        },
    };

    #[tokio::test]
    async fn test_forward_captures_response() {
        let mock_server = MockServer::start().await;
        let request = br#"{"jsonrpc":"2.0","method":"eth_chainId","params":[],"id":1}"#;

        Mock::given(method("POST"))
            .and(header_matcher("content-type", "application/json"))
            .and(body_bytes(request.to_vec()))
            .respond_with(
                ResponseTemplate::new(202)
                    .insert_header("x-node", "geth")
                    .set_body_raw(r#"{"jsonrpc":"2.0","id":1,"result":"0x1"}"#, "application/json"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = UpstreamClient::new(
            Url::parse(&mock_server.uri()).unwrap(),
            DEFAULT_UPSTREAM_TIMEOUT,
        )
        .unwrap();
        let response = client.forward(Bytes::from_static(request)).await.unwrap();

        assert_eq!(response.status, StatusCode::ACCEPTED);
        assert_eq!(response.headers.get("x-node").unwrap(), "geth");
        assert_eq!(
            response.body,
            Bytes::from_static(br#"{"jsonrpc":"2.0","id":1,"result":"0x1"}"#)
        );
    }

    #[tokio::test]
    async fn test_forward_unreachable_upstream() {
        // Bind and drop to get a port with nothing listening.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = UpstreamClient::new(
            Url::parse(&format!("http://{addr}")).unwrap(),
            Duration::from_secs(5),
        )
        .unwrap();
        let err = client.forward(Bytes::from_static(b"{}")).await.unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamRequest(_)));
    }

    #[test]
    fn test_hop_by_hop_headers_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.append("x-multi", HeaderValue::from_static("a"));
        headers.append("x-multi", HeaderValue::from_static("b"));

        let relayed = relayable_headers(&headers);
        assert!(relayed.get(header::TRANSFER_ENCODING).is_none());
        assert!(relayed.get(header::CONNECTION).is_none());
        assert_eq!(relayed.get(header::CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(relayed.get_all("x-multi").iter().count(), 2);
    }
}
