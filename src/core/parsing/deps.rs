use crate::child_span_info;
use crate::core::demand::encoding::gunzip;
use crate::core::models::account::Account;
use crate::core::models::bidder::BidderName;
use crate::core::observability::metrics::{
    Labels, MetricsEngine, RequestSource, RequestStatus, RequestType, StoredDataType,
};
use crate::core::openrtb::{BidRequest, Device, ExtImpPrebid, stored_request_id};
use crate::core::parsing::config::HostConfig;
use crate::core::parsing::fetchers::{AccountFetcher, StoredRequestFetcher, StoredResponseFetcher};
use crate::core::parsing::hooks::{HookRejection, HookStageExecutor};
use crate::core::parsing::iputil::PublicNetworkIpValidator;
use crate::core::parsing::merge::merge_patch;
use crate::core::parsing::validator::BidderParamValidator;
use crate::core::uuidutil::UuidGenerator;
use actix_web::HttpRequest;
use actix_web::http::header::CONTENT_ENCODING;
use anyhow::anyhow;
use bytes::Bytes;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{Instrument, debug, warn};

const UUID_MACRO: &str = "{{UUID}}";
const UNKNOWN_PUBLISHER: &str = "unknown";

/// Per imp details the auction needs later but which are
/// stripped or rewritten while parsing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImpExtInfo {
    pub echo_video_attrs: bool,
    pub stored_imp_id: Option<String>,
    pub passthrough: Option<Value>,
}

/// Everything parsing produced. `request` is only set when
/// `errors` is empty
#[derive(Debug, Default)]
pub struct ParsedRequest {
    pub request: Option<BidRequest>,
    pub imp_ext_info: HashMap<String, ImpExtInfo>,
    pub stored_auction_responses: HashMap<String, Value>,
    pub stored_bid_responses: HashMap<String, HashMap<BidderName, Value>>,
    pub bidder_imp_replace_imp_id: HashMap<BidderName, HashMap<String, bool>>,
    pub account: Option<Account>,
    pub errors: Vec<anyhow::Error>,
    pub warnings: Vec<String>,
}

/// Why parsing stopped, the status lands on the request labels
struct Rejection {
    status: RequestStatus,
    error: anyhow::Error,
}

impl Rejection {
    fn new(status: RequestStatus, error: anyhow::Error) -> Self {
        Self { status, error }
    }

    fn bad_input(error: anyhow::Error) -> Self {
        Self::new(RequestStatus::BadInput, error)
    }

    fn hook(rejection: HookRejection) -> Self {
        Self::new(RequestStatus::Rejected, anyhow::Error::from(rejection))
    }
}

/// Dependencies of the openrtb request parser. Built once at
/// startup and shared read only by every request
pub struct EndpointDeps {
    pub uuid_generator: Arc<dyn UuidGenerator>,
    pub params_validator: Arc<dyn BidderParamValidator>,
    pub stored_req_fetcher: Arc<dyn StoredRequestFetcher>,
    pub video_fetcher: Arc<dyn StoredRequestFetcher>,
    pub accounts: Arc<dyn AccountFetcher>,
    pub cfg: HostConfig,
    pub metrics_engine: Arc<dyn MetricsEngine>,
    /// Lowercased bidder name to the message returned when it is used
    pub disabled_bidders: HashMap<String, String>,
    pub has_default_request: bool,
    pub default_request_json: Bytes,
    /// Lowercased alias or bidder name to its canonical name
    pub bidder_map: HashMap<String, BidderName>,
    pub ip_validator: PublicNetworkIpValidator,
    pub stored_resp_fetcher: Arc<dyn StoredResponseFetcher>,
}

impl EndpointDeps {
    pub fn normalize_bidder_name(&self, name: &str) -> Option<BidderName> {
        self.bidder_map.get(&name.to_lowercase()).cloned()
    }

    /// Parses and validates an inbound openrtb request, resolving
    /// stored data and the publisher account along the way. Never
    /// fails outright: problems are returned in the result and the
    /// request status recorded on `labels`
    pub async fn parse_request(
        &self,
        http_req: &HttpRequest,
        body: Bytes,
        labels: &mut Labels,
        hook_executor: &dyn HookStageExecutor,
    ) -> ParsedRequest {
        let span = child_span_info!("parse_request", request_status = tracing::field::Empty);

        let mut parsed = ParsedRequest::default();

        let outcome = self
            .parse(http_req, body, labels, hook_executor, &mut parsed)
            .instrument(span.clone())
            .await;

        match outcome {
            Ok(request) => {
                labels.request_status = RequestStatus::Ok;
                parsed.request = Some(request);
            }
            Err(rejection) => {
                debug!("Request rejected ({}): {}", rejection.status, rejection.error);
                labels.request_status = rejection.status;
                parsed.errors.push(rejection.error);
            }
        }

        span.record("request_status", labels.request_status.to_string());
        self.metrics_engine.record_request(labels);

        parsed
    }

    async fn parse(
        &self,
        http_req: &HttpRequest,
        body: Bytes,
        labels: &mut Labels,
        hook_executor: &dyn HookStageExecutor,
        parsed: &mut ParsedRequest,
    ) -> Result<BidRequest, Rejection> {
        let body = self.read_body(http_req, body)?;
        let body = hook_executor
            .execute_entrypoint_stage(http_req, body)
            .map_err(Rejection::hook)?;

        let mut request_json: Value = serde_json::from_slice(&body)
            .map_err(|e| Rejection::bad_input(anyhow!("malformed request json: {}", e)))?;

        if !request_json.is_object() {
            return Err(Rejection::bad_input(anyhow!(
                "request body must be a json object"
            )));
        }

        let stored_imp_ids = self.apply_stored_requests(&mut request_json).await?;
        let has_stored_request = stored_request_id(&request_json).is_some();

        if self.has_default_request {
            let mut merged: Value = serde_json::from_slice(&self.default_request_json)
                .map_err(|e| {
                    Rejection::new(
                        RequestStatus::Error,
                        anyhow!("default request is not valid json: {}", e),
                    )
                })?;

            merge_patch(&mut merged, &request_json);
            request_json = merged;
        }

        let raw = serde_json::to_vec(&request_json)
            .map_err(|e| Rejection::new(RequestStatus::Error, anyhow::Error::from(e)))?;
        let raw = hook_executor
            .execute_raw_auction_stage(Bytes::from(raw))
            .map_err(Rejection::hook)?;

        let mut req: BidRequest = serde_json::from_slice(&raw)
            .map_err(|e| Rejection::bad_input(anyhow!("invalid request: {}", e)))?;

        if req.app.is_some() {
            labels.source = RequestSource::App;
            labels.request_type = RequestType::OpenRtb2App;
        } else {
            labels.source = RequestSource::Web;
            labels.request_type = RequestType::OpenRtb2Web;
        }

        labels.pub_id = req
            .publisher_id()
            .unwrap_or(UNKNOWN_PUBLISHER)
            .to_string();

        self.set_generated_ids(&mut req, has_stored_request)?;
        self.validate_request(&req)?;
        self.resolve_bidders(&mut req, parsed)?;

        for imp in &req.imp {
            let prebid = imp_prebid_ext(imp.ext.as_ref())?;
            parsed.imp_ext_info.insert(
                imp.id.clone(),
                ImpExtInfo {
                    echo_video_attrs: prebid.options.is_some_and(|o| o.echovideoattrs),
                    stored_imp_id: stored_imp_ids.get(&imp.id).cloned(),
                    passthrough: prebid.passthrough,
                },
            );
        }

        self.fetch_stored_responses(&req, parsed).await?;
        self.set_device_ip(http_req, &mut req);

        parsed.account = Some(self.resolve_account(&req).await?);

        Ok(req)
    }

    fn read_body(&self, http_req: &HttpRequest, body: Bytes) -> Result<Bytes, Rejection> {
        let limit = self.cfg.max_request_size;

        let encoding = http_req
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_ascii_lowercase())
            .unwrap_or_default();

        let body = match encoding.as_str() {
            "" | "identity" => body,
            "gzip" if self.cfg.compression.request.gzip => {
                Bytes::from(gunzip(&body, limit).map_err(Rejection::bad_input)?)
            }
            other => {
                return Err(Rejection::bad_input(anyhow!(
                    "Content-Encoding of type {} is not supported",
                    other
                )));
            }
        };

        if limit > 0 && body.len() as u64 > limit {
            return Err(Rejection::bad_input(anyhow!(
                "request size exceeded max size of {} bytes",
                limit
            )));
        }

        Ok(body)
    }

    /// Overlays the request and its imps onto any stored json they
    /// reference, returning imp id to stored imp id
    async fn apply_stored_requests(
        &self,
        request_json: &mut Value,
    ) -> Result<HashMap<String, String>, Rejection> {
        let request_id = stored_request_id(request_json);

        let imp_refs: Vec<(usize, String)> = request_json
            .get("imp")
            .and_then(Value::as_array)
            .map(|imps| {
                imps.iter()
                    .enumerate()
                    .filter_map(|(idx, imp)| stored_request_id(imp).map(|id| (idx, id)))
                    .collect()
            })
            .unwrap_or_default();

        if request_id.is_none() && imp_refs.is_empty() {
            return Ok(HashMap::new());
        }

        let request_ids: Vec<String> = request_id.iter().cloned().collect();
        let imp_ids: Vec<String> = imp_refs
            .iter()
            .map(|(_, id)| id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let stored = self
            .stored_req_fetcher
            .fetch_requests(&request_ids, &imp_ids)
            .await
            .map_err(|e| Rejection::new(RequestStatus::Error, e))?;

        self.metrics_engine.record_stored_data_fetch(
            StoredDataType::Request,
            stored.requests.len(),
            request_ids.len().saturating_sub(stored.requests.len()),
        );
        self.metrics_engine.record_stored_data_fetch(
            StoredDataType::Imp,
            stored.imps.len(),
            imp_ids.len().saturating_sub(stored.imps.len()),
        );

        if let Some(id) = &request_id {
            let mut base = stored.requests.get(id).cloned().ok_or_else(|| {
                Rejection::bad_input(anyhow!("stored request {} not found", id))
            })?;

            merge_patch(&mut base, request_json);
            *request_json = base;
        }

        let mut stored_imp_ids = HashMap::new();

        if let Some(imps) = request_json.get_mut("imp").and_then(Value::as_array_mut) {
            for (idx, stored_id) in imp_refs {
                let Some(imp) = imps.get_mut(idx) else {
                    continue;
                };

                let mut base = stored.imps.get(&stored_id).cloned().ok_or_else(|| {
                    Rejection::bad_input(anyhow!("stored imp {} not found", stored_id))
                })?;

                merge_patch(&mut base, imp);
                *imp = base;

                if let Some(imp_id) = imp.get("id").and_then(Value::as_str) {
                    stored_imp_ids.insert(imp_id.to_string(), stored_id);
                }
            }
        }

        Ok(stored_imp_ids)
    }

    fn generate_id(&self) -> Result<String, Rejection> {
        self.uuid_generator
            .generate()
            .map_err(|e| Rejection::new(RequestStatus::Error, e))
    }

    fn set_generated_ids(
        &self,
        req: &mut BidRequest,
        has_stored_request: bool,
    ) -> Result<(), Rejection> {
        let regenerate_app_id =
            self.cfg.generate_request_id && has_stored_request && req.app.is_some();

        if req.id == UUID_MACRO || regenerate_app_id {
            req.id = self.generate_id()?;
        }

        let tid_missing = req.source.as_ref().is_none_or(|s| s.tid.is_empty());
        let tid_macro = req.source.as_ref().is_some_and(|s| s.tid == UUID_MACRO);

        if (self.cfg.auto_gen_source_tid && tid_missing) || tid_macro {
            let tid = self.generate_id()?;
            req.source.get_or_insert_with(Default::default).tid = tid;
        }

        Ok(())
    }

    fn validate_request(&self, req: &BidRequest) -> Result<(), Rejection> {
        if req.id.is_empty() {
            return Err(Rejection::bad_input(anyhow!("request missing required field: id")));
        }

        if req.imp.is_empty() {
            return Err(Rejection::bad_input(anyhow!(
                "request.imp must contain at least one element"
            )));
        }

        let mut seen = HashSet::with_capacity(req.imp.len());
        for (idx, imp) in req.imp.iter().enumerate() {
            if imp.id.is_empty() {
                return Err(Rejection::bad_input(anyhow!(
                    "request.imp[{}] missing required field: id",
                    idx
                )));
            }

            if !seen.insert(imp.id.as_str()) {
                return Err(Rejection::bad_input(anyhow!(
                    "request.imp[{}].id {} is not unique",
                    idx,
                    imp.id
                )));
            }
        }

        if let Some(app) = &req.app {
            if !app.id.is_empty() && self.cfg.is_blacklisted_app(&app.id) {
                return Err(Rejection::new(
                    RequestStatus::Blacklisted,
                    anyhow!("requests from app id {} are not processed", app.id),
                ));
            }
        }

        Ok(())
    }

    /// Moves every bidder's params into `imp.ext.prebid.bidder` under its
    /// canonical name, dropping disabled bidders and validating the rest
    fn resolve_bidders(
        &self,
        req: &mut BidRequest,
        parsed: &mut ParsedRequest,
    ) -> Result<(), Rejection> {
        for (idx, imp) in req.imp.iter_mut().enumerate() {
            let mut ext = match imp.ext.take() {
                Some(Value::Object(ext)) => ext,
                Some(_) => {
                    return Err(Rejection::bad_input(anyhow!(
                        "request.imp[{}].ext must be an object",
                        idx
                    )));
                }
                None => Map::new(),
            };

            let mut prebid = match ext.remove("prebid") {
                Some(Value::Object(prebid)) => prebid,
                Some(_) => {
                    return Err(Rejection::bad_input(anyhow!(
                        "request.imp[{}].ext.prebid must be an object",
                        idx
                    )));
                }
                None => Map::new(),
            };

            let mut requested: Vec<(String, Value)> = match prebid.remove("bidder") {
                Some(Value::Object(bidders)) => bidders.into_iter().collect(),
                Some(_) => {
                    return Err(Rejection::bad_input(anyhow!(
                        "request.imp[{}].ext.prebid.bidder must be an object",
                        idx
                    )));
                }
                None => Vec::new(),
            };

            // legacy placement of bidder params directly under imp.ext
            let legacy: Vec<String> = ext
                .keys()
                .filter(|key| {
                    self.normalize_bidder_name(key).is_some()
                        || self.disabled_bidders.contains_key(&key.to_lowercase())
                })
                .cloned()
                .collect();

            for key in legacy {
                if let Some(params) = ext.remove(&key) {
                    requested.push((key, params));
                }
            }

            let mut bidders = Map::new();

            for (name, params) in requested {
                if let Some(message) = self.disabled_bidders.get(&name.to_lowercase()) {
                    warn!("Dropping disabled bidder {} from imp {}", name, imp.id);
                    parsed.warnings.push(message.clone());
                    continue;
                }

                let bidder = self.normalize_bidder_name(&name).ok_or_else(|| {
                    Rejection::bad_input(anyhow!(
                        "request.imp[{}].ext.prebid.bidder contains unknown bidder: {}",
                        idx,
                        name
                    ))
                })?;

                self.params_validator
                    .validate(&bidder, &params)
                    .map_err(|e| {
                        Rejection::bad_input(anyhow!(
                            "request.imp[{}].ext.prebid.bidder.{} failed validation: {}",
                            idx,
                            bidder,
                            e
                        ))
                    })?;

                bidders.insert(bidder.to_string(), params);
            }

            let has_stored_auction_response = prebid.contains_key("storedauctionresponse");

            if bidders.is_empty() && !has_stored_auction_response {
                return Err(Rejection::bad_input(anyhow!(
                    "request.imp[{}].ext.prebid.bidder must contain at least one bidder",
                    idx
                )));
            }

            prebid.insert("bidder".to_string(), Value::Object(bidders));
            ext.insert("prebid".to_string(), Value::Object(prebid));
            imp.ext = Some(Value::Object(ext));
        }

        Ok(())
    }

    async fn fetch_stored_responses(
        &self,
        req: &BidRequest,
        parsed: &mut ParsedRequest,
    ) -> Result<(), Rejection> {
        let mut auction_refs = Vec::new();
        let mut bid_refs = Vec::new();

        for imp in &req.imp {
            let prebid = imp_prebid_ext(imp.ext.as_ref())?;

            if let Some(stored) = prebid.storedauctionresponse.filter(|s| !s.id.is_empty()) {
                auction_refs.push((imp.id.clone(), stored.id));
            }

            for stored in prebid.storedbidresponse {
                let bidder = self.normalize_bidder_name(&stored.bidder).ok_or_else(|| {
                    Rejection::bad_input(anyhow!(
                        "request.imp[{}].ext.prebid.storedbidresponse contains unknown bidder: {}",
                        imp.id,
                        stored.bidder
                    ))
                })?;

                bid_refs.push((
                    imp.id.clone(),
                    bidder,
                    stored.id,
                    stored.replaceimpid.unwrap_or(true),
                ));
            }
        }

        if auction_refs.is_empty() && bid_refs.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = auction_refs
            .iter()
            .map(|(_, id)| id.clone())
            .chain(bid_refs.iter().map(|(_, _, id, _)| id.clone()))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let responses = self
            .stored_resp_fetcher
            .fetch_responses(&ids)
            .await
            .map_err(|e| Rejection::new(RequestStatus::Error, e))?;

        self.metrics_engine.record_stored_data_fetch(
            StoredDataType::Response,
            responses.len(),
            ids.len().saturating_sub(responses.len()),
        );

        let lookup = |id: &String| {
            responses.get(id).cloned().ok_or_else(|| {
                Rejection::bad_input(anyhow!("stored response {} not found", id))
            })
        };

        for (imp_id, id) in auction_refs {
            let response = lookup(&id)?;
            parsed.stored_auction_responses.insert(imp_id, response);
        }

        for (imp_id, bidder, id, replace_imp_id) in bid_refs {
            let response = lookup(&id)?;

            parsed
                .stored_bid_responses
                .entry(imp_id.clone())
                .or_default()
                .insert(bidder.clone(), response);

            parsed
                .bidder_imp_replace_imp_id
                .entry(bidder)
                .or_default()
                .insert(imp_id, replace_imp_id);
        }

        Ok(())
    }

    fn set_device_ip(&self, http_req: &HttpRequest, req: &mut BidRequest) {
        let has_ip = req
            .device
            .as_ref()
            .is_some_and(|d| !d.ip.is_empty() || !d.ipv6.is_empty());

        if has_ip {
            return;
        }

        let Some(ip) = self.ip_validator.find_client_ip(http_req) else {
            return;
        };

        let device = req.device.get_or_insert_with(Device::default);
        match ip {
            IpAddr::V4(v4) => device.ip = v4.to_string(),
            IpAddr::V6(v6) => device.ipv6 = v6.to_string(),
        }

        debug!("Device ip set implicitly to {}", ip);
    }

    async fn resolve_account(&self, req: &BidRequest) -> Result<Account, Rejection> {
        let Some(pub_id) = req.publisher_id() else {
            return Ok(Account {
                id: UNKNOWN_PUBLISHER.to_string(),
                ..self.cfg.account_defaults.clone()
            });
        };

        let account = self
            .accounts
            .fetch_account(pub_id)
            .await
            .map_err(|e| Rejection::new(RequestStatus::Error, e))?
            .unwrap_or_else(|| Account {
                id: pub_id.to_string(),
                ..self.cfg.account_defaults.clone()
            });

        if account.disabled {
            return Err(Rejection::new(
                RequestStatus::AccountDisabled,
                anyhow!("account {} is disabled", account.id),
            ));
        }

        Ok(account)
    }
}

fn imp_prebid_ext(ext: Option<&Value>) -> Result<ExtImpPrebid, Rejection> {
    match ext.and_then(|e| e.get("prebid")) {
        Some(prebid) => serde_json::from_value(prebid.clone())
            .map_err(|e| Rejection::bad_input(anyhow!("invalid imp.ext.prebid: {}", e))),
        None => Ok(ExtImpPrebid::default()),
    }
}
