use serde::{Deserialize, Serialize};

/// Publisher account settings resolved while parsing a request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Account {
    pub id: String,
    /// Requests for disabled accounts are rejected outright
    pub disabled: bool,
    /// Optional per account request price granularity or similar
    /// settings the exchange passes through untouched
    pub ext: Option<serde_json::Value>,
}
