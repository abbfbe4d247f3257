//! Resource Normalizer
//!
//! Turns the noisy strings produced by cloud discovery (bare hosts, URLs,
//! wildcard records, IP literals) into canonical seed names.

use std::net::{IpAddr, Ipv6Addr};

use thiserror::Error;
use tracing::{debug, warn, Span};

use super::types::NormalizedResource;

/// Reasons a raw resource cannot become a seed
#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("resource is empty")]
    Empty,

    #[error("invalid url scheme {0:?}")]
    InvalidScheme(String),

    #[error("url has no host")]
    MissingHost,

    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("malformed host {0:?}")]
    InvalidHost(String),

    #[error("domain is empty")]
    EmptyDomain,

    #[error("invalid domain {domain}: {reason}")]
    InvalidDomain { domain: String, reason: &'static str },
}

/// Normalize a single raw resource string
pub fn normalize_resource(raw: &str) -> Result<NormalizedResource, NormalizeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(NormalizeError::Empty);
    }

    // Wildcard records collapse to their base domain
    let stripped = trimmed.strip_prefix("*.").unwrap_or(trimmed);

    let mut candidate = match stripped.parse::<Ipv6Addr>() {
        Ok(addr) if addr.to_ipv4_mapped().is_none() => format!("[{stripped}]"),
        _ => stripped.to_string(),
    };

    if !candidate.contains("://") {
        candidate.insert_str(0, "http://");
    }

    let host = authority_host(&candidate)?;

    // Strict textual forms only: "010.0.0.1" or "12345" are not addresses
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(from_ip(ip));
    }

    normalize_domain(host)
}

/// Host text of a URL's authority, without userinfo, port or brackets
fn authority_host(url: &str) -> Result<&str, NormalizeError> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| NormalizeError::InvalidScheme(String::new()))?;

    let scheme_ok = scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !scheme_ok {
        return Err(NormalizeError::InvalidScheme(scheme.to_string()));
    }

    let end = rest
        .find(|c| matches!(c, '/' | '?' | '#'))
        .unwrap_or(rest.len());
    let authority = &rest[..end];
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);

    let (host, port) = match host_port.strip_prefix('[') {
        Some(inner) => {
            let malformed = || NormalizeError::InvalidHost(host_port.to_string());
            let (host, after) = inner.split_once(']').ok_or_else(malformed)?;
            let port = match after {
                "" => None,
                after => Some(after.strip_prefix(':').ok_or_else(malformed)?),
            };
            (host, port)
        }
        None => match host_port.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (host_port, None),
        },
    };

    if let Some(port) = port {
        if !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(NormalizeError::InvalidPort(port.to_string()));
        }
    }

    if host.is_empty() {
        return Err(NormalizeError::MissingHost);
    }

    Ok(host)
}

/// Outcome of normalizing a batch of raw resources
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub resources: Vec<NormalizedResource>,
    pub failed: usize,
}

/// Normalize every raw resource, logging and dropping those that fail
pub fn normalize_all(raw: Vec<String>, span: &Span) -> NormalizedBatch {
    span.in_scope(|| {
        let mut batch = NormalizedBatch {
            resources: Vec::with_capacity(raw.len()),
            failed: 0,
        };

        for resource in raw {
            match normalize_resource(&resource) {
                Ok(normalized) => {
                    if normalized.value != resource {
                        debug!(
                            resource = %resource,
                            normalized = %normalized.value,
                            kind = %normalized.kind,
                            "Normalized resource"
                        );
                    }
                    batch.resources.push(normalized);
                }
                Err(e) => {
                    warn!(resource = %resource, error = %e, "Unable to normalize resource");
                    batch.failed += 1;
                }
            }
        }

        batch
    })
}

fn from_ip(ip: IpAddr) -> NormalizedResource {
    match ip {
        IpAddr::V4(v4) => NormalizedResource::ipv4(v4.to_string()),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => NormalizedResource::ipv4(v4.to_string()),
            None => NormalizedResource::ipv6(v6.to_string()),
        },
    }
}

fn normalize_domain(host: &str) -> Result<NormalizedResource, NormalizeError> {
    let lowered = host.to_lowercase();
    let domain = lowered.strip_suffix('.').unwrap_or(&lowered);
    if domain.is_empty() {
        return Err(NormalizeError::EmptyDomain);
    }

    validate_domain(domain)?;

    Ok(NormalizedResource::domain(domain))
}

/// IDNA lookup validation. The ASCII form is only checked, never emitted.
fn validate_domain(domain: &str) -> Result<(), NormalizeError> {
    let invalid = |reason| NormalizeError::InvalidDomain {
        domain: domain.to_string(),
        reason,
    };

    let ascii = idna::domain_to_ascii_strict(domain)
        .map_err(|_| invalid("not a valid internationalized domain name"))?;

    for label in ascii.split('.') {
        if label.is_empty() {
            return Err(invalid("empty label"));
        }
        if !label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
            return Err(invalid("disallowed character"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid("label starts or ends with a hyphen"));
        }
        if label.len() >= 4 && &label[2..4] == "--" && !label.starts_with("xn--") {
            return Err(invalid("hyphens in third and fourth position"));
        }
    }

    Ok(())
}
