use crate::app::config::AdagioConfig;
use crate::core::adapters::adagio::AdagioAdapter;
use crate::core::adapters::{BidderAdapter, bidder_request};
use crate::core::config_manager::ConfigManager;
use crate::core::demand::client::{DemandClient, DemandResponse};
use crate::core::models::bidder::{BidderName, EntryPoint, ExtraRequestInfo};
use crate::core::observability;
use crate::core::observability::metrics::{Labels, OtelMetricsEngine};
use crate::core::parsing::cache::CachingFetcher;
use crate::core::parsing::deps::ParsedRequest;
use crate::core::parsing::fetchers::{
    AccountFetcher, HttpFetcher, MemoryAccountFetcher, MemoryFetcher, StoredRequestFetcher,
    StoredResponseFetcher,
};
use crate::core::parsing::hooks::HookStageExecutor;
use crate::core::parsing::parser::{AdagioParser, ParserArgs};
use crate::core::parsing::validator::ParamsValidator;
use crate::sample_or_attach_root_span;
use actix_web::HttpRequest;
use anyhow::Error;
use bytes::Bytes;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, info};

const STORED_DATA_TIMEOUT: Duration = Duration::from_secs(1);

type StoredFetchers = (Arc<dyn StoredRequestFetcher>, Arc<dyn StoredResponseFetcher>);

fn build_stored_fetchers(cfg: &AdagioConfig) -> Result<StoredFetchers, Error> {
    let Some(endpoint) = &cfg.stored_data.http_endpoint else {
        let memory = Arc::new(MemoryFetcher {
            requests: cfg.stored_requests.clone(),
            imps: cfg.stored_imps.clone(),
            responses: cfg.stored_responses.clone(),
        });

        let requests: Arc<dyn StoredRequestFetcher> = memory.clone();
        let responses: Arc<dyn StoredResponseFetcher> = memory;

        return Ok((requests, responses));
    };

    let client = reqwest::Client::builder()
        .timeout(STORED_DATA_TIMEOUT)
        .build()?;

    let cache = &cfg.stored_data.cache;
    let requests: Arc<dyn StoredRequestFetcher> = Arc::new(CachingFetcher::try_new(
        HttpFetcher::new(client.clone(), endpoint)?,
        cache.max_entries,
        Duration::from_secs(cache.ttl_secs),
    )?);
    let responses: Arc<dyn StoredResponseFetcher> = Arc::new(HttpFetcher::new(client, endpoint)?);

    info!("Stored data served from {}", endpoint);

    Ok((requests, responses))
}

/// Assembles the request parser from the loaded config
pub fn build_parser(cfg: &AdagioConfig) -> Result<AdagioParser, Error> {
    let (stored_requests, stored_responses) = build_stored_fetchers(cfg)?;
    let accounts: Arc<dyn AccountFetcher> =
        Arc::new(MemoryAccountFetcher::new(cfg.accounts.iter().cloned()));

    AdagioParser::new(ParserArgs {
        uuid_generator: None,
        validator: Some(Arc::new(ParamsValidator::builtin())),
        requests_by_id: Some(stored_requests),
        accounts: Some(accounts),
        parser_config: Some(cfg.parser.parser_config()?),
        metrics_engine: Some(Arc::new(OtelMetricsEngine::new())),
        disabled_bidders: cfg.parser.disabled_bidders.clone(),
        default_request_json: cfg.parser.default_request_json()?,
        bidder_map: HashMap::from([(BidderName::ADAGIO.to_string(), BidderName::adagio())]),
        stored_response_fetcher: Some(stored_responses),
    })
}

pub fn build_adapter(cfg: &AdagioConfig) -> Result<AdagioAdapter, Error> {
    AdagioAdapter::builder(BidderName::adagio(), &cfg.adapter)
}

/// What one inbound auction produced
pub struct AuctionOutcome {
    pub parsed: ParsedRequest,
    pub labels: Labels,
    /// Non fatal problems building the outbound calls
    pub adapter_errors: Vec<Error>,
    pub responses: Vec<Result<DemandResponse, Error>>,
}

/// The running service: config, parser, adapter and the transport
/// the adapter's requests go out on
pub struct Exchange {
    config: ConfigManager,
    parser: AdagioParser,
    adapter: AdagioAdapter,
    client: DemandClient,
    observability: Option<SdkTracerProvider>,
    span_sample_rate: f32,
}

impl Exchange {
    pub fn start(cfg_path: PathBuf) -> Result<Exchange, Error> {
        let config = ConfigManager::new(cfg_path);
        config.start()?;

        let (parser, adapter, client, observability, span_sample_rate) = {
            let cfg = config.get()?;

            // a provider is returned if otel export is configured
            let observability = observability::init(&cfg.logging)?;

            (
                build_parser(&cfg)?,
                build_adapter(&cfg)?,
                DemandClient::new(&cfg.adapter)?,
                observability,
                cfg.logging.span_sample_rate,
            )
        };

        info!("Adagio exchange started");

        Ok(Exchange {
            config,
            parser,
            adapter,
            client,
            observability,
            span_sample_rate,
        })
    }

    pub fn config(&self) -> &ConfigManager {
        &self.config
    }

    pub fn parser(&self) -> &AdagioParser {
        &self.parser
    }

    /// Parses an inbound request and, when it is valid, sends
    /// the adagio calls built from it. Runs under a sampled root span
    pub async fn auction(
        &self,
        http_req: &HttpRequest,
        body: Bytes,
        hook_executor: &dyn HookStageExecutor,
    ) -> AuctionOutcome {
        let span = sample_or_attach_root_span!(
            self.span_sample_rate,
            "auction",
            body_size = body.len()
        );

        self.run_auction(http_req, body, hook_executor)
            .instrument(span)
            .await
    }

    async fn run_auction(
        &self,
        http_req: &HttpRequest,
        body: Bytes,
        hook_executor: &dyn HookStageExecutor,
    ) -> AuctionOutcome {
        let mut labels = Labels::default();
        let parsed = self
            .parser
            .parse_request(http_req, body, &mut labels, hook_executor)
            .await;

        let mut outcome = AuctionOutcome {
            parsed,
            labels,
            adapter_errors: Vec::new(),
            responses: Vec::new(),
        };

        let Some(request) = outcome
            .parsed
            .request
            .as_ref()
            .and_then(|req| bidder_request(req, self.adapter.bidder()))
        else {
            return outcome;
        };

        let info = ExtraRequestInfo {
            entry_point: EntryPoint::Auction,
            global_privacy_control: http_req.headers().contains_key("sec-gpc"),
        };

        let result = self.adapter.make_requests(&request, Some(&info));
        outcome.adapter_errors = result.errors;
        outcome.responses = self.client.send_all(&result.requests).await;

        outcome
    }

    pub fn shutdown(&self) -> Result<(), Error> {
        if let Some(provider) = &self.observability {
            observability::shutdown(provider)?;
            info!("Shut down observability");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::account::Account;
    use crate::core::parsing::hooks::NoopHookExecutor;
    use actix_web::test::TestRequest;
    use serde_json::json;

    const CONFIG: &str = r#"
adapter:
  endpoint: "https://mp.4dex.io/pbserver"
parser:
  max_request_size: 8192
  request_validation:
    ipv4_private_networks: ["10.0.0.0/8"]
stored_requests:
  base:
    tmax: 700
"#;

    fn config() -> AdagioConfig {
        let mut cfg = AdagioConfig::from_yaml_str(CONFIG).unwrap();
        cfg.accounts.push(Account {
            id: "pub-1".into(),
            disabled: false,
            ext: None,
        });
        cfg
    }

    #[test]
    fn test_build_adapter_validates_endpoint() {
        assert!(build_adapter(&config()).is_ok());

        let mut bad = config();
        bad.adapter.endpoint = "not a url".into();
        assert!(build_adapter(&bad).is_err());
    }

    #[test]
    fn test_build_parser_rejects_bad_cidr() {
        let mut cfg = config();
        cfg.parser.request_validation.ipv4_private_networks = vec!["nope".into()];

        assert!(build_parser(&cfg).is_err());
    }

    #[tokio::test]
    async fn test_parser_from_config_merges_inline_stored_request() {
        let parser = build_parser(&config()).unwrap();
        assert!(!parser.deps().has_default_request);

        let body = json!({
            "id": "req",
            "ext": {"prebid": {"storedrequest": {"id": "base"}}},
            "site": {"publisher": {"id": "pub-1"}},
            "imp": [{"id": "1", "ext": {"prebid": {"bidder": {"adagio": {
                "organizationId": "1000", "site": "site-name", "placement": "ban_atf"
            }}}}}]
        });

        let http_req = TestRequest::post().to_http_request();
        let mut labels = Labels::default();
        let parsed = parser
            .parse_request(
                &http_req,
                Bytes::from(serde_json::to_vec(&body).unwrap()),
                &mut labels,
                &NoopHookExecutor,
            )
            .await;

        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        let request = parsed.request.unwrap();
        assert_eq!(request.tmax, 700);

        let adapter = build_adapter(&config()).unwrap();
        let narrowed = bidder_request(&request, adapter.bidder()).unwrap();
        let result = adapter.make_requests(&narrowed, None);

        assert!(result.errors.is_empty());
        assert_eq!(result.requests.len(), 1);
        assert_eq!(result.requests[0].imp_ids, vec!["1".to_string()]);
    }
}
