//! Callback (webhook) URL validation.
//!
//! Callback targets are attacker-supplied, so only public HTTPS endpoints are
//! accepted. IP literals are checked here; DNS resolution happens at delivery time.

use std::net::{Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

use super::error::OperationError;

/// Longest accepted callback URL, in bytes.
pub const MAX_CALLBACK_URL_LEN: usize = 2048;

const BLOCKED_HOSTS: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "ip6-localhost",
    "ip6-loopback",
    "metadata",
    "metadata.google.internal",
    "metadata.azure.com",
    "169.254.169.254",
];

fn reject(reason: impl Into<String>) -> OperationError {
    OperationError::InvalidCallbackUrl {
        reason: reason.into(),
    }
}

fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        // 0.0.0.0/8
        || a == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (b & 0xc0) == 64)
        // 198.18.0.0/15 benchmarking
        || (a == 198 && (b & 0xfe) == 18)
}

fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_ipv4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
        // 2001:db8::/32 documentation
        || (first == 0x2001 && ip.segments()[1] == 0x0db8)
}

/// Parses and vets a callback URL.
///
/// # Errors
///
/// Returns [`OperationError::InvalidCallbackUrl`] when the URL is too long,
/// unparseable, not `https`, or targets a blocked host or non-public address.
pub fn validate_callback_url(raw: &str) -> Result<Url, OperationError> {
    if raw.len() > MAX_CALLBACK_URL_LEN {
        return Err(reject(format!(
            "length {} exceeds {MAX_CALLBACK_URL_LEN}",
            raw.len()
        )));
    }
    let url = Url::parse(raw).map_err(|e| reject(e.to_string()))?;
    if url.scheme() != "https" {
        return Err(reject(format!("scheme `{}` is not https", url.scheme())));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(reject("credentials are not allowed"));
    }

    match url.host() {
        None => return Err(reject("missing host")),
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            if BLOCKED_HOSTS.contains(&domain.as_str()) || domain.ends_with(".localhost") {
                return Err(reject(format!("host `{domain}` is blocked")));
            }
        }
        Some(Host::Ipv4(ip)) => {
            if is_blocked_ipv4(ip) {
                return Err(reject(format!("address {ip} is not public")));
            }
        }
        Some(Host::Ipv6(ip)) => {
            if is_blocked_ipv6(ip) {
                return Err(reject(format!("address {ip} is not public")));
            }
        }
    }
    Ok(url)
}
