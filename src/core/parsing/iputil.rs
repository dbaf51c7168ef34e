use actix_web::HttpRequest;
use ip_network::IpNetwork;
use ip_network_table::IpNetworkTable;
use std::net::IpAddr;
use tracing::debug;

/// Headers inspected, in order, for the originating client address
const CLIENT_IP_HEADERS: [&str; 3] = ["true-client-ip", "x-forwarded-for", "x-real-ip"];

/// Classifies addresses as public unless they fall within one of
/// the configured private ranges
pub struct PublicNetworkIpValidator {
    private: IpNetworkTable<()>,
    ranges: usize,
}

impl PublicNetworkIpValidator {
    pub fn new(ipv4_private: &[IpNetwork], ipv6_private: &[IpNetwork]) -> Self {
        let mut private = IpNetworkTable::new();

        for network in ipv4_private.iter().chain(ipv6_private) {
            private.insert(network.clone(), ());
        }

        Self {
            private,
            ranges: ipv4_private.len() + ipv6_private.len(),
        }
    }

    /// Ipv4 mapped v6 addresses are judged by their v4 ranges
    pub fn is_valid(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        if ip.is_unspecified() {
            return false;
        }

        self.private.longest_match(ip).is_none()
    }

    pub fn ranges(&self) -> usize {
        self.ranges
    }

    /// First public address found in the forwarding headers, falling
    /// back to the connection peer
    pub fn find_client_ip(&self, req: &HttpRequest) -> Option<IpAddr> {
        for header in CLIENT_IP_HEADERS {
            let Some(value) = req.headers().get(header).and_then(|v| v.to_str().ok()) else {
                continue;
            };

            for candidate in value.split(',') {
                match candidate.trim().parse::<IpAddr>().map(|ip| ip.to_canonical()) {
                    Ok(ip) if self.is_valid(ip) => return Some(ip),
                    Ok(ip) => debug!("Skipping non public ip {} from {}", ip, header),
                    Err(_) => continue,
                }
            }
        }

        req.peer_addr()
            .map(|addr| addr.ip().to_canonical())
            .filter(|ip| self.is_valid(*ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;
    use std::net::SocketAddr;

    fn validator() -> PublicNetworkIpValidator {
        PublicNetworkIpValidator::new(
            &["10.0.0.0/8".parse().unwrap(), "192.168.0.0/16".parse().unwrap()],
            &["fc00::/7".parse().unwrap()],
        )
    }

    #[test]
    fn test_private_ranges_are_not_public() {
        let v = validator();

        assert_eq!(v.ranges(), 3);
        assert!(!v.is_valid("10.1.2.3".parse().unwrap()));
        assert!(!v.is_valid("192.168.1.1".parse().unwrap()));
        assert!(!v.is_valid("fd00::1".parse().unwrap()));
        assert!(v.is_valid("8.8.8.8".parse().unwrap()));
        assert!(v.is_valid("2001:4860::8888".parse().unwrap()));
    }

    #[test]
    fn test_unspecified_is_never_public() {
        let v = PublicNetworkIpValidator::new(&[], &[]);

        assert!(!v.is_valid("0.0.0.0".parse().unwrap()));
        assert!(!v.is_valid("::".parse().unwrap()));
        assert!(v.is_valid("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_find_client_ip_skips_private_forwarded_entries() {
        let req = TestRequest::default()
            .insert_header(("X-Forwarded-For", "10.0.0.4, 203.0.113.9"))
            .to_http_request();

        assert_eq!(
            validator().find_client_ip(&req),
            Some("203.0.113.9".parse().unwrap())
        );
    }

    #[test]
    fn test_ipv4_mapped_v6_uses_v4_ranges() {
        let v = validator();

        assert!(!v.is_valid("::ffff:10.0.0.1".parse().unwrap()));
        assert!(!v.is_valid("::ffff:0.0.0.0".parse().unwrap()));
        assert!(v.is_valid("::ffff:8.8.8.8".parse().unwrap()));

        let req = TestRequest::default()
            .insert_header(("X-Forwarded-For", "::ffff:192.168.1.1, ::ffff:203.0.113.9"))
            .to_http_request();

        assert_eq!(
            v.find_client_ip(&req),
            Some("203.0.113.9".parse().unwrap())
        );
    }

    #[test]
    fn test_find_client_ip_falls_back_to_peer() {
        let peer: SocketAddr = "198.51.100.20:4000".parse().unwrap();
        let req = TestRequest::default()
            .insert_header(("X-Real-IP", "192.168.3.3"))
            .peer_addr(peer)
            .to_http_request();

        assert_eq!(validator().find_client_ip(&req), Some(peer.ip()));
    }

    #[test]
    fn test_find_client_ip_none_when_all_private() {
        let req = TestRequest::default()
            .peer_addr("10.9.9.9:80".parse().unwrap())
            .to_http_request();

        assert_eq!(validator().find_client_ip(&req), None);
    }
}
