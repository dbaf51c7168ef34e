use crate::core::models::bidder::BidderName;
use crate::core::observability::metrics::{Labels, MetricsEngine};
use crate::core::parsing::config::{HostConfig, ParserConfig};
use crate::core::parsing::deps::{EndpointDeps, ParsedRequest};
use crate::core::parsing::fetchers::{
    AccountFetcher, EmptyFetcher, StoredRequestFetcher, StoredResponseFetcher,
};
use crate::core::parsing::hooks::HookStageExecutor;
use crate::core::parsing::iputil::PublicNetworkIpValidator;
use crate::core::parsing::validator::BidderParamValidator;
use crate::core::uuidutil::{UuidGenerator, UuidV4Generator};
use actix_web::HttpRequest;
use anyhow::anyhow;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Everything needed to assemble an [`AdagioParser`]. The `Option`
/// fields without a fallback are required
#[derive(Default)]
pub struct ParserArgs {
    /// Falls back to random v4 uuids
    pub uuid_generator: Option<Arc<dyn UuidGenerator>>,
    pub validator: Option<Arc<dyn BidderParamValidator>>,
    pub requests_by_id: Option<Arc<dyn StoredRequestFetcher>>,
    pub accounts: Option<Arc<dyn AccountFetcher>>,
    pub parser_config: Option<ParserConfig>,
    pub metrics_engine: Option<Arc<dyn MetricsEngine>>,
    /// Bidder name to the warning returned when a request names it
    pub disabled_bidders: HashMap<String, String>,
    /// Base json every request is merged over, empty for none
    pub default_request_json: Bytes,
    /// Accepted bidder names and aliases to their canonical name
    pub bidder_map: HashMap<String, BidderName>,
    /// Falls back to a fetcher which never finds a response
    pub stored_response_fetcher: Option<Arc<dyn StoredResponseFetcher>>,
}

fn required<T>(arg: Option<T>, name: &str) -> Result<T, anyhow::Error> {
    arg.ok_or_else(|| anyhow!("required argument missing: {}", name))
}

/// Openrtb request parser for the adagio endpoint, wiring a reduced
/// host config into the full set of parser dependencies
pub struct AdagioParser {
    deps: EndpointDeps,
}

impl AdagioParser {
    pub fn new(args: ParserArgs) -> Result<Self, anyhow::Error> {
        let validator = required(args.validator, "validator")?;
        let requests_by_id = required(args.requests_by_id, "requests_by_id")?;
        let accounts = required(args.accounts, "accounts")?;
        let parser_config = required(args.parser_config, "parser_config")?;
        let metrics_engine = required(args.metrics_engine, "metrics_engine")?;

        let cfg = HostConfig::from_parser_config(&parser_config);

        let has_default_request = !args.default_request_json.is_empty();

        let ip_validator = PublicNetworkIpValidator::new(
            &cfg.request_validation.ipv4_private_networks,
            &cfg.request_validation.ipv6_private_networks,
        );

        info!(
            "Parser assembled: max request size {}, {} private ranges, default request {}",
            cfg.max_request_size,
            ip_validator.ranges(),
            has_default_request
        );

        Ok(AdagioParser {
            deps: EndpointDeps {
                uuid_generator: args
                    .uuid_generator
                    .unwrap_or_else(|| Arc::new(UuidV4Generator)),
                params_validator: validator,
                stored_req_fetcher: requests_by_id,
                video_fetcher: Arc::new(EmptyFetcher),
                accounts,
                cfg,
                metrics_engine,
                disabled_bidders: args
                    .disabled_bidders
                    .into_iter()
                    .map(|(name, message)| (name.to_lowercase(), message))
                    .collect(),
                has_default_request,
                default_request_json: args.default_request_json,
                bidder_map: args
                    .bidder_map
                    .into_iter()
                    .map(|(name, bidder)| (name.to_lowercase(), bidder))
                    .collect(),
                ip_validator,
                stored_resp_fetcher: args
                    .stored_response_fetcher
                    .unwrap_or_else(|| Arc::new(EmptyFetcher)),
            },
        })
    }

    pub fn deps(&self) -> &EndpointDeps {
        &self.deps
    }

    pub async fn parse_request(
        &self,
        http_req: &HttpRequest,
        body: Bytes,
        labels: &mut Labels,
        hook_executor: &dyn HookStageExecutor,
    ) -> ParsedRequest {
        self.deps
            .parse_request(http_req, body, labels, hook_executor)
            .await
    }
}
