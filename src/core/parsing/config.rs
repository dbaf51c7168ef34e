use crate::core::models::account::Account;
use derive_builder::Builder;
use ip_network::IpNetwork;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionInfo {
    /// Accept (request) or produce (response) gzip bodies
    pub gzip: bool,
}

/// The reduced parser settings a host hands to `AdagioParser`,
/// with private networks already parsed and validated
#[derive(Debug, Clone, Default, PartialEq, Builder)]
#[builder(default, setter(into))]
pub struct ParserConfig {
    /// Max accepted body size in bytes, zero disables the check
    pub max_request_size: u64,
    /// Assign a generated uuid to `source.tid` when empty
    pub auto_gen_source_tid: bool,
    /// Replace the id of app requests built from a stored request
    pub generate_request_id: bool,
    pub blacklisted_apps: HashSet<String>,
    pub ipv4_private_networks: Vec<IpNetwork>,
    pub ipv6_private_networks: Vec<IpNetwork>,
    pub compression_request: CompressionInfo,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestValidation {
    pub ipv4_private_networks: Vec<IpNetwork>,
    pub ipv6_private_networks: Vec<IpNetwork>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Compression {
    pub request: CompressionInfo,
    pub response: CompressionInfo,
}

/// Full host configuration as read by the request parser
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostConfig {
    pub max_request_size: u64,
    pub auto_gen_source_tid: bool,
    pub generate_request_id: bool,
    pub blacklisted_apps: HashSet<String>,
    pub request_validation: RequestValidation,
    pub compression: Compression,
    /// Used for publishers without a stored account
    pub account_defaults: Account,
}

impl HostConfig {
    /// Every field is listed so a new field on either side
    /// fails to compile here rather than silently defaulting
    pub fn from_parser_config(parser_cfg: &ParserConfig) -> HostConfig {
        let ParserConfig {
            max_request_size,
            auto_gen_source_tid,
            generate_request_id,
            blacklisted_apps,
            ipv4_private_networks,
            ipv6_private_networks,
            compression_request,
        } = parser_cfg;

        HostConfig {
            max_request_size: *max_request_size,
            auto_gen_source_tid: *auto_gen_source_tid,
            generate_request_id: *generate_request_id,
            blacklisted_apps: blacklisted_apps.clone(),
            request_validation: RequestValidation {
                ipv4_private_networks: ipv4_private_networks.clone(),
                ipv6_private_networks: ipv6_private_networks.clone(),
            },
            compression: Compression {
                request: compression_request.clone(),
                response: CompressionInfo { gzip: false },
            },
            account_defaults: Account {
                id: String::new(),
                disabled: false,
                ext: None,
            },
        }
    }

    pub fn is_blacklisted_app(&self, app_id: &str) -> bool {
        self.blacklisted_apps.contains(app_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_parser_config_maps_every_field() {
        let v4: IpNetwork = "10.0.0.0/8".parse().unwrap();
        let v6: IpNetwork = "fc00::/7".parse().unwrap();

        let parser_cfg = ParserConfigBuilder::default()
            .max_request_size(512_000u64)
            .auto_gen_source_tid(true)
            .generate_request_id(true)
            .blacklisted_apps(HashSet::from(["bad-app".to_string()]))
            .ipv4_private_networks(vec![v4.clone()])
            .ipv6_private_networks(vec![v6.clone()])
            .compression_request(CompressionInfo { gzip: true })
            .build()
            .unwrap();

        let cfg = HostConfig::from_parser_config(&parser_cfg);

        assert_eq!(cfg.max_request_size, 512_000);
        assert!(cfg.auto_gen_source_tid);
        assert!(cfg.generate_request_id);
        assert!(cfg.is_blacklisted_app("bad-app"));
        assert!(!cfg.is_blacklisted_app("good-app"));
        assert_eq!(cfg.request_validation.ipv4_private_networks, vec![v4]);
        assert_eq!(cfg.request_validation.ipv6_private_networks, vec![v6]);
        assert!(cfg.compression.request.gzip);
        assert!(!cfg.compression.response.gzip);
        assert_eq!(cfg.account_defaults, Account::default());
    }

    #[test]
    fn test_expansion_is_deterministic() {
        let parser_cfg = ParserConfig {
            max_request_size: 10,
            ..Default::default()
        };

        assert_eq!(
            HostConfig::from_parser_config(&parser_cfg),
            HostConfig::from_parser_config(&parser_cfg)
        );
    }
}
