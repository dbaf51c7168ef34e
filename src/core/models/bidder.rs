use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumString};

/// Canonical bidder code as used in `imp.ext.prebid.bidder` keys
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BidderName(String);

impl BidderName {
    pub const ADAGIO: &'static str = "adagio";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn adagio() -> Self {
        Self::new(Self::ADAGIO)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BidderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BidderName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HttpProto {
    /// Force http1.1 only
    Http1,
    /// Force h2c prior knowledge
    H2c,
    /// Allow, but not force, http2 upgrades via alpn
    #[default]
    Http2,
}

/// Host configuration of a single demand adapter
#[derive(Debug, Clone, Serialize, Deserialize, Default, Builder)]
#[builder(default, setter(into))]
#[serde(default)]
pub struct AdapterConfig {
    /// Absolute url all bid requests are posted to
    pub endpoint: String,
    pub protocol: HttpProto,
    /// Total request timeout for the transport, zero uses the client default
    pub timeout_ms: u64,
}

/// Where in the exchange a request entered, passed to adapters as
/// part of [`ExtraRequestInfo`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum EntryPoint {
    #[default]
    Auction,
    Amp,
    Video,
}

/// Additional per call information an adapter may use
/// when building its requests
#[derive(Debug, Clone, Default)]
pub struct ExtraRequestInfo {
    pub entry_point: EntryPoint,
    pub global_privacy_control: bool,
}
