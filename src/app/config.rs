use crate::core::models::account::Account;
use crate::core::models::bidder::AdapterConfig;
use crate::core::parsing::config::{CompressionInfo, ParserConfig, ParserConfigBuilder};
use anyhow::{Context, anyhow, bail};
use bytes::Bytes;
use config::Config;
use ip_network::IpNetwork;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestValidationSettings {
    /// CIDR strings, e.g. 10.0.0.0/8
    pub ipv4_private_networks: Vec<String>,
    pub ipv6_private_networks: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    pub request: CompressionInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultRequestSettings {
    /// Json file every inbound request is merged over
    pub file: Option<PathBuf>,
}

/// Request parser settings as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserSettings {
    pub max_request_size: u64,
    pub auto_gen_source_tid: bool,
    pub generate_request_id: bool,
    pub blacklisted_apps: Vec<String>,
    pub request_validation: RequestValidationSettings,
    pub compression: CompressionSettings,
    /// Bidder name to the warning returned when a request still names it
    pub disabled_bidders: HashMap<String, String>,
    pub default_request: DefaultRequestSettings,
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self {
            max_request_size: 512 * 1024,
            auto_gen_source_tid: true,
            generate_request_id: false,
            blacklisted_apps: Vec::new(),
            request_validation: RequestValidationSettings::default(),
            compression: CompressionSettings::default(),
            disabled_bidders: HashMap::new(),
            default_request: DefaultRequestSettings::default(),
        }
    }
}

fn parse_networks(cidrs: &[String], ipv4: bool) -> Result<Vec<IpNetwork>, anyhow::Error> {
    cidrs
        .iter()
        .map(|cidr| {
            let network: IpNetwork = cidr
                .trim()
                .parse()
                .map_err(|e| anyhow!("invalid private network {}: {:?}", cidr, e))?;

            if matches!(network, IpNetwork::V4(_)) != ipv4 {
                bail!(
                    "private network {} is not an {} range",
                    cidr,
                    if ipv4 { "ipv4" } else { "ipv6" }
                );
            }

            Ok(network)
        })
        .collect()
}

impl ParserSettings {
    /// Parses and validates the private ranges into the reduced
    /// parser config
    pub fn parser_config(&self) -> Result<ParserConfig, anyhow::Error> {
        let ipv4 = parse_networks(&self.request_validation.ipv4_private_networks, true)?;
        let ipv6 = parse_networks(&self.request_validation.ipv6_private_networks, false)?;

        Ok(ParserConfigBuilder::default()
            .max_request_size(self.max_request_size)
            .auto_gen_source_tid(self.auto_gen_source_tid)
            .generate_request_id(self.generate_request_id)
            .blacklisted_apps(
                self.blacklisted_apps
                    .iter()
                    .cloned()
                    .collect::<HashSet<String>>(),
            )
            .ipv4_private_networks(ipv4)
            .ipv6_private_networks(ipv6)
            .compression_request(self.compression.request.clone())
            .build()?)
    }

    /// Contents of the default request file, empty when none is configured
    pub fn default_request_json(&self) -> Result<Bytes, anyhow::Error> {
        let Some(path) = &self.default_request.file else {
            return Ok(Bytes::new());
        };

        let raw = std::fs::read(path)
            .with_context(|| format!("failed to read default request {}", path.display()))?;

        serde_json::from_slice::<Value>(&raw)
            .with_context(|| format!("default request {} is not valid json", path.display()))?;

        Ok(Bytes::from(raw))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredCacheSettings {
    pub max_entries: u64,
    pub ttl_secs: u64,
}

impl Default for StoredCacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl_secs: 300,
        }
    }
}

/// Remote stored data service, used instead of the inline
/// `stored_*` maps when an endpoint is set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredDataSettings {
    pub http_endpoint: Option<String>,
    pub cache: StoredCacheSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdagioConfig {
    pub adapter: AdapterConfig,
    pub parser: ParserSettings,
    pub stored_data: StoredDataSettings,
    pub stored_requests: HashMap<String, Value>,
    pub stored_imps: HashMap<String, Value>,
    pub stored_responses: HashMap<String, Value>,
    pub accounts: Vec<Account>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtelProto {
    Http,
    #[default]
    Grpc,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRotation {
    #[default]
    Daily,
    Hourly,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSink {
    #[serde(flatten)]
    pub dest: LogType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LogType {
    Stdout {
        #[serde(default = "default_true")]
        color: bool,
        #[serde(default)]
        json: bool,
        #[serde(default = "default_true")]
        spans: bool,
    },
    File {
        path: PathBuf,
        #[serde(default)]
        json: bool,
        #[serde(default)]
        rotation: FileRotation,
        #[serde(default)]
        max_files: usize,
        #[serde(default = "default_true")]
        spans: bool,
    },
    Otel {
        #[serde(default)]
        endpoint: String,
        #[serde(default)]
        proto: OtelProto,
    },
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub span_sample_rate: f32,
    pub sinks: Vec<LogSink>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            span_sample_rate: 0.01,
            sinks: vec![LogSink {
                dest: LogType::Stdout {
                    color: true,
                    json: false,
                    spans: false,
                },
            }],
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.sinks.is_empty() {
            bail!("At least one logging sink must be configured");
        }

        self.level.parse::<tracing::Level>().map_err(|_| {
            anyhow!(
                "Invalid log level: '{}'. Valid levels: trace, debug, info, warn, error",
                self.level
            )
        })?;

        if !(0.0..=1.0).contains(&self.span_sample_rate) {
            bail!(
                "span_sample_rate must be between 0.0 and 1.0, got {}",
                self.span_sample_rate
            );
        }

        let otel_sinks = self
            .sinks
            .iter()
            .filter(|s| matches!(s.dest, LogType::Otel { .. }))
            .count();

        if otel_sinks > 1 {
            bail!("Multiple OTLP sinks configured. Only one is currently supported.");
        }

        Ok(())
    }
}

impl AdagioConfig {
    pub fn load(path: &Path) -> Result<AdagioConfig, anyhow::Error> {
        let cfg = Config::builder()
            .add_source(config::File::from(path.to_path_buf()))
            .build()?;

        Ok(cfg.try_deserialize()?)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<AdagioConfig, anyhow::Error> {
        let cfg = Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?;

        Ok(cfg.try_deserialize()?)
    }
}
