pub mod adagio;

use crate::core::models::bidder::{BidderName, ExtraRequestInfo};
use crate::core::openrtb::BidRequest;
use reqwest::Method;
use reqwest::header::HeaderMap;
use serde_json::Value;

/// A fully formed outbound http call to a demand partner, ready
/// for the transport layer to execute
#[derive(Debug, Clone)]
pub struct RequestData {
    pub method: Method,
    pub uri: String,
    pub body: Vec<u8>,
    pub headers: HeaderMap,
    /// Imp ids carried by this call, used when the
    /// response is mapped back onto the auction
    pub imp_ids: Vec<String>,
}

/// Outcome of building a bidder's requests. Errors are non fatal:
/// a bad imp is reported here while the rest are still sent
#[derive(Debug, Default)]
pub struct AdapterResult {
    pub requests: Vec<RequestData>,
    pub errors: Vec<anyhow::Error>,
}

/// Translates an auction into the outbound calls of a single
/// demand partner. Implementations hold no mutable state and
/// are shared across all auction workers
pub trait BidderAdapter: Send + Sync {
    fn make_requests(&self, request: &BidRequest, info: Option<&ExtraRequestInfo>)
    -> AdapterResult;
}

/// Narrows a parsed auction to the imps a bidder was asked for,
/// rewriting each imp ext to the `{"bidder": params}` shape adapters
/// decode. Other top level imp ext keys are kept, `prebid` is not
pub fn bidder_request(request: &BidRequest, bidder: &BidderName) -> Option<BidRequest> {
    let imp = request
        .imp
        .iter()
        .filter_map(|imp| {
            let mut ext = imp.ext.as_ref()?.as_object()?.clone();
            let params = ext
                .remove("prebid")?
                .get("bidder")?
                .get(bidder.as_str())?
                .clone();

            ext.insert("bidder".to_string(), params);

            let mut imp = imp.clone();
            imp.ext = Some(Value::Object(ext));
            Some(imp)
        })
        .collect::<Vec<_>>();

    if imp.is_empty() {
        return None;
    }

    Some(BidRequest {
        imp,
        ..request.clone()
    })
}
