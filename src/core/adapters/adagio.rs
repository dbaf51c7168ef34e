use crate::child_span_debug;
use crate::core::adapters::{AdapterResult, BidderAdapter, RequestData};
use crate::core::demand::encoding::RequestEncoder;
use crate::core::models::bidder::{AdapterConfig, BidderName, ExtraRequestInfo};
use crate::core::openrtb::{BidRequest, ExtImpBidder, Imp};
use anyhow::{anyhow, bail};
use reqwest::Method;
use reqwest::header::{ACCEPT, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Adagio bidder params, `imp.ext.bidder`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtImpAdagio {
    pub organization_id: String,
    pub site: String,
    pub placement: String,
}

/// Params check used by the request parser, which sees the params
/// before they are moved under `imp.ext.bidder`
pub fn validate_params(params: &Value) -> Result<(), anyhow::Error> {
    let ext: ExtImpAdagio = serde_json::from_value(params.clone())
        .map_err(|e| anyhow!("invalid adagio params: {}", e))?;

    if ext.organization_id.is_empty() {
        bail!("adagio params: organizationId must not be empty");
    }

    if ext.site.is_empty() {
        bail!("adagio params: site must not be empty");
    }

    if ext.placement.is_empty() {
        bail!("adagio params: placement must not be empty");
    }

    Ok(())
}

pub struct AdagioAdapter {
    bidder: BidderName,
    endpoint: String,
}

impl AdagioAdapter {
    /// Builds the adapter, failing if the configured endpoint is
    /// not an absolute url
    pub fn builder(bidder: BidderName, config: &AdapterConfig) -> Result<Self, anyhow::Error> {
        Url::parse(&config.endpoint)
            .map_err(|e| anyhow!("invalid endpoint '{}' for {}: {}", config.endpoint, bidder, e))?;

        Ok(Self {
            bidder,
            endpoint: config.endpoint.clone(),
        })
    }

    pub fn bidder(&self) -> &BidderName {
        &self.bidder
    }

    fn decode_imp_ext(imp: &Imp) -> Result<ExtImpAdagio, anyhow::Error> {
        let ext = imp
            .ext
            .as_ref()
            .ok_or_else(|| anyhow!("imp {}: missing bidder ext", imp.id))?;

        let ext: ExtImpBidder<ExtImpAdagio> = serde_json::from_value(ext.clone())
            .map_err(|e| anyhow!("imp {}: failed to decode bidder ext: {}", imp.id, e))?;

        Ok(ext.bidder)
    }
}

impl BidderAdapter for AdagioAdapter {
    fn make_requests(
        &self,
        request: &BidRequest,
        _info: Option<&ExtraRequestInfo>,
    ) -> AdapterResult {
        if request.imp.is_empty() {
            return AdapterResult::default();
        }

        let span = child_span_debug!(
            "adagio_make_requests",
            imps = request.imp.len(),
            invalid_imps = tracing::field::Empty
        )
        .entered();

        let mut errors = Vec::new();
        let mut imps = Vec::with_capacity(request.imp.len());

        for imp in &request.imp {
            match Self::decode_imp_ext(imp) {
                Ok(ext) => {
                    trace!(
                        "imp {} org {} site {} placement {}",
                        imp.id, ext.organization_id, ext.site, ext.placement
                    );
                    imps.push(imp.clone());
                }
                Err(e) => {
                    debug!("Skipping imp for {}: {}", self.bidder, e);
                    errors.push(e);
                }
            }
        }

        span.record("invalid_imps", errors.len());

        if imps.is_empty() {
            return AdapterResult {
                requests: Vec::new(),
                errors,
            };
        }

        let imp_ids = imps.iter().map(|imp| imp.id.clone()).collect();

        let outbound = BidRequest {
            imp: imps,
            ..request.clone()
        };

        let encoded = match RequestEncoder::encode(&outbound, !request.is_test()) {
            Ok(encoded) => encoded,
            Err(e) => {
                errors.push(e);
                return AdapterResult {
                    requests: Vec::new(),
                    errors,
                };
            }
        };

        let mut headers = encoded.headers;
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(device) = &request.device {
            for ip in [&device.ipv6, &device.ip] {
                if ip.is_empty() {
                    continue;
                }

                match HeaderValue::from_str(ip) {
                    Ok(value) => {
                        headers.append(X_FORWARDED_FOR, value);
                    }
                    Err(_) => debug!("Dropping unrepresentable device ip {}", ip),
                }
            }
        }

        AdapterResult {
            requests: vec![RequestData {
                method: Method::POST,
                uri: self.endpoint.clone(),
                body: encoded.data,
                headers,
                imp_ids,
            }],
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::demand::encoding::gunzip;
    use crate::core::models::bidder::AdapterConfigBuilder;
    use crate::core::openrtb::{BannerBuilder, BidRequestBuilder, DeviceBuilder, ImpBuilder};
    use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
    use serde_json::json;

    const ENDPOINT: &str = "http://localhost/prebid_server";

    fn adapter() -> AdagioAdapter {
        let config = AdapterConfigBuilder::default()
            .endpoint(ENDPOINT)
            .build()
            .unwrap();

        AdagioAdapter::builder(BidderName::adagio(), &config).unwrap()
    }

    fn adagio_imp(id: &str) -> Imp {
        ImpBuilder::default()
            .id(id)
            .banner(BannerBuilder::default().build().unwrap())
            .ext(json!({"bidder": {"organizationId": "1000", "site": "site-name", "placement": "ban_atf"}}))
            .build()
            .unwrap()
    }

    fn fake_bid_request() -> BidRequest {
        BidRequestBuilder::default()
            .id("some-request-id")
            .imp(vec![adagio_imp("some-impression-id")])
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_rejects_relative_endpoint() {
        let config = AdapterConfig {
            endpoint: "/prebid_server".to_string(),
            ..Default::default()
        };

        assert!(AdagioAdapter::builder(BidderName::adagio(), &config).is_err());
    }

    #[test]
    fn test_make_requests_no_gzip_in_test_mode() {
        let mut req = fake_bid_request();
        req.test = 1;

        let result = adapter().make_requests(&req, None);

        assert!(result.errors.is_empty());
        assert_eq!(result.requests.len(), 1);

        let data = &result.requests[0];
        assert_eq!(data.method, Method::POST);
        assert_eq!(data.uri, ENDPOINT);
        assert!(data.headers.get(CONTENT_ENCODING).is_none());

        let body: BidRequest = serde_json::from_slice(&data.body).unwrap();
        assert_eq!(body.imp.len(), 1);
        assert_eq!(body.imp[0].id, "some-impression-id");
    }

    #[test]
    fn test_make_requests_gzip_outside_test_mode() {
        let result = adapter().make_requests(&fake_bid_request(), None);

        assert_eq!(result.requests.len(), 1);

        let values: Vec<_> = result.requests[0]
            .headers
            .get_all(CONTENT_ENCODING)
            .iter()
            .collect();
        assert_eq!(values, vec!["gzip"]);
    }

    #[test]
    fn test_gzip_body_matches_plain_body() {
        let plain_req = BidRequest {
            test: 1,
            ..fake_bid_request()
        };
        let gzip_req = fake_bid_request();

        let plain = adapter().make_requests(&plain_req, None);
        let gzipped = adapter().make_requests(&gzip_req, None);

        let mut plain_body: BidRequest =
            serde_json::from_slice(&plain.requests[0].body).unwrap();
        let inflated = gunzip(&gzipped.requests[0].body, 0).unwrap();
        let gzip_body: BidRequest = serde_json::from_slice(&inflated).unwrap();

        plain_body.test = 0;
        assert_eq!(plain_body, gzip_body);
    }

    #[test]
    fn test_scenario_single_imp_test_request() {
        let req: BidRequest = serde_json::from_value(json!({
            "id": "req-1",
            "imp": [{
                "id": "imp-1",
                "ext": {"bidder": {"organizationId": "1000", "site": "site-name", "placement": "ban_atf"}}
            }],
            "test": 1
        }))
        .unwrap();

        let result = adapter().make_requests(&req, None);

        assert!(result.errors.is_empty());
        assert_eq!(result.requests.len(), 1);
        assert!(result.requests[0].headers.get(CONTENT_ENCODING).is_none());
        assert_eq!(result.requests[0].imp_ids, vec!["imp-1".to_string()]);

        let body: serde_json::Value = serde_json::from_slice(&result.requests[0].body).unwrap();
        assert_eq!(body["imp"].as_array().unwrap().len(), 1);
        assert_eq!(body["imp"][0]["id"], "imp-1");
    }

    #[test]
    fn test_untyped_openrtb_fields_reach_the_body() {
        let req: BidRequest = serde_json::from_value(json!({
            "id": "req-1",
            "test": 1,
            "at": 1,
            "bcat": ["IAB25"],
            "badv": ["bad.example"],
            "site": {"page": "https://example.com", "ref": "https://ref.example", "content": {"language": "fr"}},
            "device": {"ip": "1.2.3.4", "geo": {"country": "FRA"}, "make": "Apple"},
            "imp": [{
                "id": "imp-1",
                "instl": 1,
                "pmp": {"deals": [{"id": "deal-1"}]},
                "banner": {"w": 300, "h": 250, "mimes": ["image/png"]},
                "ext": {"bidder": {"organizationId": "1000", "site": "site-name", "placement": "ban_atf"}}
            }]
        }))
        .unwrap();

        let result = adapter().make_requests(&req, None);
        assert_eq!(result.requests.len(), 1);

        let body: serde_json::Value = serde_json::from_slice(&result.requests[0].body).unwrap();

        assert_eq!(body["at"], 1);
        assert_eq!(body["bcat"], json!(["IAB25"]));
        assert_eq!(body["badv"], json!(["bad.example"]));
        assert_eq!(body["site"]["ref"], "https://ref.example");
        assert_eq!(body["site"]["content"]["language"], "fr");
        assert_eq!(body["device"]["geo"]["country"], "FRA");
        assert_eq!(body["device"]["make"], "Apple");
        assert_eq!(body["imp"][0]["instl"], 1);
        assert_eq!(body["imp"][0]["pmp"]["deals"][0]["id"], "deal-1");
        assert_eq!(body["imp"][0]["banner"]["mimes"], json!(["image/png"]));
    }

    #[test]
    fn test_no_imps_no_requests_no_errors() {
        let req = BidRequestBuilder::default().id("empty").build().unwrap();
        let result = adapter().make_requests(&req, None);

        assert!(result.requests.is_empty());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_bad_imp_is_skipped_and_reported() {
        let bad = ImpBuilder::default()
            .id("bad-imp")
            .ext(json!({"bidder": {"organizationId": 1000}}))
            .build()
            .unwrap();

        let req = BidRequestBuilder::default()
            .id("mixed")
            .test(1u8)
            .imp(vec![adagio_imp("good-1"), bad, adagio_imp("good-2")])
            .build()
            .unwrap();

        let result = adapter().make_requests(&req, None);

        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].to_string().contains("bad-imp"));
        assert_eq!(result.requests.len(), 1);
        assert_eq!(result.requests[0].imp_ids, vec!["good-1", "good-2"]);

        let body: BidRequest = serde_json::from_slice(&result.requests[0].body).unwrap();
        let ids: Vec<_> = body.imp.iter().map(|imp| imp.id.as_str()).collect();
        assert_eq!(ids, vec!["good-1", "good-2"]);
    }

    #[test]
    fn test_all_imps_invalid_yields_no_requests() {
        let missing_ext = ImpBuilder::default().id("no-ext").build().unwrap();
        let wrong_shape = ImpBuilder::default()
            .id("wrong")
            .ext(json!({"bidder": "nope"}))
            .build()
            .unwrap();

        let req = BidRequestBuilder::default()
            .id("all-bad")
            .imp(vec![missing_ext, wrong_shape])
            .build()
            .unwrap();

        let result = adapter().make_requests(&req, None);

        assert!(result.requests.is_empty());
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn test_headers_include_content_type_accept_and_forwarded_ips() {
        let req = BidRequestBuilder::default()
            .id("headers")
            .imp(vec![adagio_imp("imp")])
            .device(
                DeviceBuilder::default()
                    .ip("203.0.113.7")
                    .ipv6("2001:db8::1")
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();

        let result = adapter().make_requests(&req, None);
        let headers = &result.requests[0].headers;

        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json;charset=utf-8");
        assert_eq!(headers.get(ACCEPT).unwrap(), "application/json");

        let forwarded: Vec<_> = headers.get_all(X_FORWARDED_FOR).iter().collect();
        assert_eq!(forwarded, vec!["2001:db8::1", "203.0.113.7"]);
    }

    #[test]
    fn test_output_is_deterministic() {
        let req = fake_bid_request();
        let first = adapter().make_requests(&req, None);
        let second = adapter().make_requests(&req, None);

        assert_eq!(first.requests[0].body, second.requests[0].body);
    }

    #[test]
    fn test_validate_params() {
        assert!(
            validate_params(&json!({"organizationId": "1", "site": "s", "placement": "p"})).is_ok()
        );
        assert!(validate_params(&json!({"organizationId": "", "site": "s", "placement": "p"})).is_err());
        assert!(validate_params(&json!({"site": "s"})).is_err());
    }
}
