//! Inbound webhook request authenticity checks.
//!
//! Two independent checks, each enabled only by the presence of its
//! configuration: a shared-secret query parameter and a source-address
//! allow-list. A request is authentic when every enabled check passes.
//! Requests from a terminal context are always trusted.

use std::net::IpAddr;
use std::str::FromStr;

use crate::config::Config;

/// Where an invocation came from. Terminal invocations are trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Terminal,
    Network,
}

/// The parts of an inbound request the validator looks at.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub origin: Origin,

    /// The `s` query parameter.
    pub token: Option<String>,

    /// `client-ip` header, if present and a valid address.
    pub client_ip: Option<IpAddr>,

    /// First address of the `x-forwarded-for` header, if valid.
    pub forwarded_for: Option<IpAddr>,

    /// Raw peer address of the connection.
    pub remote_addr: Option<IpAddr>,
}

impl InboundRequest {
    /// The address the IP check applies to: client-IP header first, then
    /// forwarded-for, then the raw peer address.
    fn source_addr(&self) -> Option<IpAddr> {
        self.client_ip.or(self.forwarded_for).or(self.remote_addr)
    }
}

/// An allow-list entry: a single address, an inclusive span, or a CIDR block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpMatcher {
    Single(IpAddr),
    Span(IpAddr, IpAddr),
    Cidr { addr: IpAddr, prefix: u8 },
}

impl IpMatcher {
    pub fn contains(&self, ip: IpAddr) -> bool {
        match *self {
            Self::Single(addr) => same_family(addr, ip) && addr == ip,
            Self::Span(start, end) => {
                same_family(start, ip)
                    && ip_bits(start) <= ip_bits(ip)
                    && ip_bits(ip) <= ip_bits(end)
            }
            Self::Cidr { addr, prefix } => {
                if !same_family(addr, ip) {
                    return false;
                }
                let width: u32 = if addr.is_ipv4() { 32 } else { 128 };
                let shift = width - u32::from(prefix);
                if shift >= 128 {
                    return true;
                }
                (ip_bits(addr) >> shift) == (ip_bits(ip) >> shift)
            }
        }
    }
}

impl FromStr for IpMatcher {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((addr, prefix)) = s.split_once('/') {
            let addr: IpAddr = addr.trim().parse().map_err(|e| format!("{e}: {s}"))?;
            let max = if addr.is_ipv4() { 32 } else { 128 };
            let prefix: u8 = prefix.trim().parse().map_err(|e| format!("{e}: {s}"))?;
            if prefix > max {
                return Err(format!("prefix /{prefix} out of range: {s}"));
            }
            return Ok(Self::Cidr { addr, prefix });
        }
        if let Some((start, end)) = s.split_once('-') {
            let start: IpAddr = start.trim().parse().map_err(|e| format!("{e}: {s}"))?;
            let end: IpAddr = end.trim().parse().map_err(|e| format!("{e}: {s}"))?;
            if !same_family(start, end) || ip_bits(start) > ip_bits(end) {
                return Err(format!("invalid address span: {s}"));
            }
            return Ok(Self::Span(start, end));
        }
        Ok(Self::Single(s.parse().map_err(|e| format!("{e}: {s}"))?))
    }
}

fn same_family(a: IpAddr, b: IpAddr) -> bool {
    a.is_ipv4() == b.is_ipv4()
}

fn ip_bits(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Decides whether an inbound webhook request is authentic.
#[derive(Debug, Clone)]
pub struct RequestValidator {
    secret: Option<String>,
    ranges: Vec<IpMatcher>,
}

impl RequestValidator {
    pub fn new(secret: Option<String>, ranges: Vec<IpMatcher>) -> Self {
        Self { secret, ranges }
    }

    /// Build from configuration. Unparseable allow-list entries are skipped
    /// with a warning; an empty result disables the IP check.
    pub fn from_config(config: &Config) -> Self {
        let ranges = if config.validate_request {
            config
                .valid_ips
                .iter()
                .filter_map(|raw| match raw.parse::<IpMatcher>() {
                    Ok(m) => Some(m),
                    Err(err) => {
                        tracing::warn!(%err, "skipping invalid address range");
                        None
                    }
                })
                .collect()
        } else {
            Vec::new()
        };
        Self::new(config.secret.clone(), ranges)
    }

    /// True when every enabled check passes. Permissive by default: absent
    /// configuration disables the corresponding check.
    pub fn is_authentic(&self, request: &InboundRequest) -> bool {
        if request.origin == Origin::Terminal {
            return true;
        }

        if let Some(secret) = self.secret.as_deref() {
            if request.token.as_deref() != Some(secret) {
                return false;
            }
        }

        if !self.ranges.is_empty() {
            let Some(ip) = request.source_addr() else {
                return false;
            };
            return self.ranges.iter().any(|r| r.contains(ip));
        }

        true
    }
}
