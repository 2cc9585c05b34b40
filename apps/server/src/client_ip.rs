//! Client identity for per-client download tracking

use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

const FORWARDED_FOR: &str = "x-forwarded-for";

/// The address a request is attributed to
///
/// Uses the TCP peer unless `trust_forwarded_for` is set. Then the rightmost
/// `X-Forwarded-For` entry is used: it is the one appended by the proxy in
/// front of us, while entries to its left are whatever the client sent.
pub fn client_id(headers: &HeaderMap, peer: SocketAddr, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get(FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return ip.to_canonical().to_string();
        }
    }
    peer.ip().to_canonical().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> SocketAddr {
        SocketAddr::from(([192, 168, 1, 10], 51000))
    }

    fn forwarded(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn uses_peer_by_default() {
        assert_eq!(client_id(&forwarded("1.2.3.4"), peer(), false), "192.168.1.10");
    }

    #[test]
    fn uses_proxy_appended_entry_when_trusted() {
        assert_eq!(client_id(&forwarded("1.2.3.4"), peer(), true), "1.2.3.4");
        assert_eq!(
            client_id(&forwarded("6.6.6.1, 198.51.100.20"), peer(), true),
            "198.51.100.20"
        );
    }

    #[test]
    fn client_supplied_entries_do_not_change_identity() {
        let first = client_id(&forwarded("6.6.6.1, 198.51.100.20"), peer(), true);
        let second = client_id(&forwarded("7.7.7.2, 198.51.100.20"), peer(), true);
        assert_eq!(first, second);
    }

    #[test]
    fn ignores_garbage_forwarded_values() {
        assert_eq!(client_id(&forwarded("not-an-ip"), peer(), true), "192.168.1.10");
        assert_eq!(client_id(&forwarded("1.2.3.4, junk"), peer(), true), "192.168.1.10");
        assert_eq!(client_id(&HeaderMap::new(), peer(), true), "192.168.1.10");
    }

    #[test]
    fn unmaps_ipv4_mapped_peers() {
        let mapped: SocketAddr = "[::ffff:5.6.7.8]:443".parse().unwrap();
        assert_eq!(client_id(&HeaderMap::new(), mapped, false), "5.6.7.8");
    }
}
