use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The `imp.ext` shape seen by a single bidder adapter, where
/// the exchange has already moved that bidder's params under `bidder`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtImpBidder<T> {
    pub bidder: T,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtStoredRequest {
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtStoredAuctionResponse {
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtStoredBidResponse {
    pub bidder: String,
    pub id: String,
    /// Whether the imp id of stored bids is replaced with the
    /// real imp id, defaults to true when absent
    pub replaceimpid: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtOptions {
    pub echovideoattrs: bool,
}

/// `imp.ext.prebid`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtImpPrebid {
    pub bidder: Option<Map<String, Value>>,
    pub storedrequest: Option<ExtStoredRequest>,
    pub storedauctionresponse: Option<ExtStoredAuctionResponse>,
    pub storedbidresponse: Vec<ExtStoredBidResponse>,
    pub options: Option<ExtOptions>,
    pub passthrough: Option<Value>,
}

/// Reads the stored request id at `ext.prebid.storedrequest.id` of
/// either a request or imp json object
pub fn stored_request_id(obj: &Value) -> Option<String> {
    obj.pointer("/ext/prebid/storedrequest/id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stored_request_id_present() {
        let imp = json!({"id": "1", "ext": {"prebid": {"storedrequest": {"id": "abc"}}}});
        assert_eq!(stored_request_id(&imp), Some("abc".to_string()));
    }

    #[test]
    fn test_stored_request_id_empty_or_missing() {
        assert_eq!(stored_request_id(&json!({"id": "1"})), None);
        assert_eq!(
            stored_request_id(&json!({"ext": {"prebid": {"storedrequest": {"id": ""}}}})),
            None
        );
    }

    #[test]
    fn test_stored_bid_response_replace_defaults_none() {
        let parsed: ExtImpPrebid = serde_json::from_value(json!({
            "storedbidresponse": [{"bidder": "adagio", "id": "r1"}]
        }))
        .unwrap();

        assert_eq!(parsed.storedbidresponse.len(), 1);
        assert_eq!(parsed.storedbidresponse[0].replaceimpid, None);
    }
}
