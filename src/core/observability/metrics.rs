use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum RequestStatus {
    #[default]
    Ok,
    BadInput,
    Blacklisted,
    AccountDisabled,
    Rejected,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
pub enum RequestType {
    #[default]
    #[strum(serialize = "openrtb2-web")]
    OpenRtb2Web,
    #[strum(serialize = "openrtb2-app")]
    OpenRtb2App,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum RequestSource {
    #[default]
    Unknown,
    Web,
    App,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum StoredDataType {
    Request,
    Imp,
    Response,
}

/// Per request dimensions, filled in while the request is parsed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Labels {
    pub source: RequestSource,
    pub request_type: RequestType,
    pub pub_id: String,
    pub request_status: RequestStatus,
}

pub trait MetricsEngine: Send + Sync {
    fn record_request(&self, labels: &Labels);

    fn record_stored_data_fetch(&self, data_type: StoredDataType, found: usize, missing: usize);
}

/// Emits counters through the globally installed otel meter provider,
/// a no-op until one is installed
pub struct OtelMetricsEngine {
    requests: Counter<u64>,
    stored_data: Counter<u64>,
}

impl OtelMetricsEngine {
    pub fn new() -> Self {
        let meter = global::meter(env!("CARGO_PKG_NAME"));

        Self {
            requests: meter
                .u64_counter("requests")
                .with_description("Parsed auction requests by outcome")
                .build(),
            stored_data: meter
                .u64_counter("stored_data_fetches")
                .with_description("Stored data lookups by type and result")
                .build(),
        }
    }
}

impl Default for OtelMetricsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsEngine for OtelMetricsEngine {
    fn record_request(&self, labels: &Labels) {
        self.requests.add(
            1,
            &[
                KeyValue::new("source", labels.source.to_string()),
                KeyValue::new("request_type", labels.request_type.to_string()),
                KeyValue::new("status", labels.request_status.to_string()),
            ],
        );
    }

    fn record_stored_data_fetch(&self, data_type: StoredDataType, found: usize, missing: usize) {
        let data_type = data_type.to_string();

        if found > 0 {
            self.stored_data.add(
                found as u64,
                &[
                    KeyValue::new("type", data_type.clone()),
                    KeyValue::new("result", "found"),
                ],
            );
        }

        if missing > 0 {
            self.stored_data.add(
                missing as u64,
                &[
                    KeyValue::new("type", data_type),
                    KeyValue::new("result", "missing"),
                ],
            );
        }
    }
}
