use crate::core::adapters::RequestData;
use crate::core::models::bidder::{AdapterConfig, HttpProto};
use anyhow::anyhow;
use bytes::Bytes;
use futures_util::future::join_all;
use reqwest::{Client, StatusCode, redirect, retry};
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Raw outcome of a demand call. Parsing the body into bids is left
/// to the caller
pub struct DemandResponse {
    pub status_code: u32,
    pub status_message: String,
    pub body: Option<Bytes>,
}

pub struct DemandClient {
    client: Client,
}

impl DemandClient {
    fn init_client(proto: &HttpProto, timeout: Duration) -> Result<Client, anyhow::Error> {
        let mut client_builder = reqwest::ClientBuilder::new()
            .danger_accept_invalid_certs(true)
            .user_agent("ad-client")
            .connect_timeout(Duration::from_secs(1))
            .pool_max_idle_per_host(128)
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .tcp_keepalive(Some(Duration::from_secs(20)))
            .retry(retry::never())
            .referer(false)
            .redirect(redirect::Policy::none())
            .timeout(timeout)
            .tcp_nodelay(true)
            .deflate(true)
            .gzip(true)
            .hickory_dns(true);

        client_builder = match proto {
            HttpProto::Http1 => client_builder
                .http1_only()
                .http1_ignore_invalid_headers_in_responses(true),
            HttpProto::H2c => client_builder
                .http2_prior_knowledge()
                .http2_adaptive_window(true),
            HttpProto::Http2 => client_builder.http2_adaptive_window(true),
        };

        client_builder.build().map_err(anyhow::Error::from)
    }

    /// Create a new demand client which eagerly creates the underlying
    /// http client to afford graceful failure on startup
    pub fn new(config: &AdapterConfig) -> Result<Self, anyhow::Error> {
        let timeout_ms = if config.timeout_ms == 0 {
            DEFAULT_TIMEOUT_MS
        } else {
            config.timeout_ms
        };

        Ok(DemandClient {
            client: Self::init_client(&config.protocol, Duration::from_millis(timeout_ms))?,
        })
    }

    /// Execute a single outbound request. If a non 200 status code is
    /// returned, the client will immediately return and skip
    /// reading the body (if any present)
    ///
    /// # Behavior
    /// Returns an error if the request cannot be built or sent,
    /// but does not return an error on completed http requests
    /// regardless of status code. E.g. a server response of
    /// http 400 will return Ok because the request succeeded
    pub async fn send_request(&self, data: &RequestData) -> Result<DemandResponse, anyhow::Error> {
        let req = self
            .client
            .request(data.method.clone(), &data.uri)
            .headers(data.headers.clone())
            .body(data.body.clone())
            .build()
            .map_err(|e| anyhow!("Failed to build http request for {}: {}", data.uri, e))?;

        let res = self
            .client
            .execute(req)
            .await
            .map_err(|e| anyhow!("Failed to execute http request for {}: {}", data.uri, e))?;

        let status = res.status();
        let status_code = status.as_u16() as u32;
        let status_message = status
            .canonical_reason()
            .unwrap_or("no status message")
            .to_string();

        if status != StatusCode::OK {
            debug!("Non 200 status {} from {}, early exit", status_code, data.uri);
            return Ok(DemandResponse {
                status_code,
                status_message,
                body: None,
            });
        }

        debug!("Http 200 - awaiting body");

        let body = res
            .bytes()
            .await
            .map_err(|e| anyhow!("Failed to read http response for {}: {}", data.uri, e))?;

        Ok(DemandResponse {
            status_code,
            status_message,
            body: Some(body),
        })
    }

    /// Executes every request concurrently, results are in request order
    pub async fn send_all(
        &self,
        requests: &[RequestData],
    ) -> Vec<Result<DemandResponse, anyhow::Error>> {
        join_all(requests.iter().map(|data| self.send_request(data))).await
    }
}
