//! Address rules.
//!
//! Rules decide which hosts a computer may contact and with what limits.  A
//! rule's host pattern is one of:
//!
//! - `*` -- every host;
//! - `$private` -- loopback, private, link-local, shared and unspecified
//!   addresses (and `localhost`);
//! - `a.b.c.d/n` or `x::/n` -- an address range;
//! - a glob such as `*.example.com`;
//! - an exact host name or address.
//!
//! The first matching rule decides whether the host is allowed.  Limits are
//! taken from the first matching rule that sets them, falling back to
//! [`AddressOptions::default`].  A host no rule matches is denied.
//!
//! Rules are applied twice: to the host name when a call is validated, and to
//! the resolved address right before connecting.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use regex::Regex;
use tinker_kernel::{AddressRuleConfig, RuleAction};

use crate::error::{HttpError, Result};

/// Largest response body accepted by default (16 MiB).
pub const DEFAULT_MAX_DOWNLOAD: u64 = 16 * 1024 * 1024;
/// Largest request body accepted by default (4 MiB).
pub const DEFAULT_MAX_UPLOAD: u64 = 4 * 1024 * 1024;
/// Default time allowed for connecting and completing a request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Largest websocket message accepted by default (128 KiB).
pub const DEFAULT_WEBSOCKET_MESSAGE: u64 = 128 * 1024;

/// Limits applied to one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressOptions {
    pub max_download: u64,
    pub max_upload: u64,
    pub timeout: Duration,
    pub websocket_message: u64,
}

impl Default for AddressOptions {
    fn default() -> Self {
        Self {
            max_download: DEFAULT_MAX_DOWNLOAD,
            max_upload: DEFAULT_MAX_UPLOAD,
            timeout: DEFAULT_TIMEOUT,
            websocket_message: DEFAULT_WEBSOCKET_MESSAGE,
        }
    }
}

#[derive(Debug, Clone)]
enum HostPattern {
    Any,
    Private,
    Range { network: IpAddr, prefix: u8 },
    Glob(Regex),
    Exact(String),
}

impl HostPattern {
    fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim();
        if pattern == "*" {
            return Self::Any;
        }
        if pattern.eq_ignore_ascii_case("$private") {
            return Self::Private;
        }
        if let Some((network, prefix)) = pattern.split_once('/') {
            if let (Ok(network), Ok(prefix)) = (network.parse::<IpAddr>(), prefix.parse::<u8>()) {
                let max = if network.is_ipv4() { 32 } else { 128 };
                if prefix <= max {
                    return Self::Range { network, prefix };
                }
            }
        }
        if pattern.contains('*') {
            let body = pattern
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*");
            match Regex::new(&format!("(?i)^{body}$")) {
                Ok(regex) => return Self::Glob(regex),
                Err(err) => {
                    tracing::warn!(pattern, error = %err, "invalid host glob, matching literally");
                }
            }
        }
        Self::Exact(pattern.to_ascii_lowercase())
    }

    fn matches(&self, host: &str, addr: Option<IpAddr>) -> bool {
        match self {
            Self::Any => true,
            Self::Private => host.eq_ignore_ascii_case("localhost") || addr.is_some_and(is_private),
            Self::Range { network, prefix } => {
                addr.is_some_and(|addr| in_range(addr, *network, *prefix))
            }
            Self::Glob(regex) => regex.is_match(host),
            Self::Exact(name) => {
                host.eq_ignore_ascii_case(name)
                    || name
                        .parse::<IpAddr>()
                        .is_ok_and(|exact| addr == Some(exact))
            }
        }
    }
}

#[derive(Debug, Clone)]
struct AddressRule {
    pattern: HostPattern,
    action: RuleAction,
    max_download: Option<u64>,
    max_upload: Option<u64>,
    timeout: Option<Duration>,
    websocket_message: Option<u64>,
}

impl From<&AddressRuleConfig> for AddressRule {
    fn from(config: &AddressRuleConfig) -> Self {
        Self {
            pattern: HostPattern::parse(&config.host),
            action: config.action,
            max_download: config.max_download,
            max_upload: config.max_upload,
            timeout: config.timeout_ms.map(Duration::from_millis),
            websocket_message: config.websocket_message,
        }
    }
}

/// An ordered list of address rules.
#[derive(Debug, Clone)]
pub struct AddressRules {
    rules: Vec<AddressRule>,
}

impl Default for AddressRules {
    fn default() -> Self {
        Self::from_config(&AddressRuleConfig::defaults())
    }
}

impl AddressRules {
    pub fn from_config(rules: &[AddressRuleConfig]) -> Self {
        Self {
            rules: rules.iter().map(AddressRule::from).collect(),
        }
    }

    /// Decide whether `host` (optionally resolved to `addr`) may be
    /// contacted, and with what limits.
    ///
    /// When `addr` is `None` and `host` is an address literal, the literal is
    /// checked as the address.
    pub fn check(&self, host: &str, addr: Option<IpAddr>) -> Result<AddressOptions> {
        let addr = addr.or_else(|| host.parse().ok()).map(canonical);
        let mut matching = self.rules.iter().filter(|r| r.pattern.matches(host, addr));

        let Some(first) = matching.next() else {
            tracing::debug!(host, "no address rule matched, denying");
            return Err(HttpError::DomainNotPermitted);
        };
        if first.action == RuleAction::Deny {
            tracing::debug!(host, ?addr, "host denied by address rule");
            return Err(HttpError::DomainNotPermitted);
        }

        let mut max_download = first.max_download;
        let mut max_upload = first.max_upload;
        let mut timeout = first.timeout;
        let mut websocket_message = first.websocket_message;
        for rule in matching {
            max_download = max_download.or(rule.max_download);
            max_upload = max_upload.or(rule.max_upload);
            timeout = timeout.or(rule.timeout);
            websocket_message = websocket_message.or(rule.websocket_message);
        }

        let defaults = AddressOptions::default();
        Ok(AddressOptions {
            max_download: max_download.unwrap_or(defaults.max_download),
            max_upload: max_upload.unwrap_or(defaults.max_upload),
            timeout: timeout.unwrap_or(defaults.timeout),
            websocket_message: websocket_message.unwrap_or(defaults.websocket_message),
        })
    }

    /// Resolve `host` and check every address it resolves to.
    pub async fn resolve(&self, host: &str, port: u16) -> Result<(SocketAddr, AddressOptions)> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|err| {
                tracing::debug!(host, error = %err, "host lookup failed");
                HttpError::Transport("Unknown host".into())
            })?
            .collect();
        let options = self.check_all(host, addrs.iter().map(SocketAddr::ip))?;
        let addr = addrs
            .first()
            .copied()
            .ok_or_else(|| HttpError::Transport("Unknown host".into()))?;
        Ok((addr, options))
    }

    /// Check every address `host` resolved to.  The host is denied if any
    /// one of them is, since the connection may land on any of them.
    /// Options come from the first address.
    pub fn check_all(
        &self,
        host: &str,
        addrs: impl IntoIterator<Item = IpAddr>,
    ) -> Result<AddressOptions> {
        let mut options = None;
        for addr in addrs {
            let checked = self.check(host, Some(addr))?;
            options.get_or_insert(checked);
        }
        options.ok_or_else(|| HttpError::Transport("Unknown host".into()))
    }
}

/// Treat IPv4-mapped IPv6 addresses as the IPv4 address they carry.
fn canonical(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map_or(IpAddr::V6(v6), IpAddr::V4),
        v4 => v4,
    }
}

/// Addresses a computer should never reach unless explicitly allowed.
pub fn is_private(addr: IpAddr) -> bool {
    match canonical(addr) {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_private_v6(v6),
    }
}

fn is_private_v4(addr: Ipv4Addr) -> bool {
    let [a, b, ..] = addr.octets();
    addr.is_loopback()
        || addr.is_private()
        || addr.is_link_local()
        || addr.is_unspecified()
        || addr.is_broadcast()
        // 100.64.0.0/10, carrier-grade NAT
        || (a == 100 && (b & 0xc0) == 64)
}

fn is_private_v6(addr: Ipv6Addr) -> bool {
    let first = addr.segments()[0];
    addr.is_loopback()
        || addr.is_unspecified()
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
}

fn in_range(addr: IpAddr, network: IpAddr, prefix: u8) -> bool {
    match (canonical(addr), network) {
        (IpAddr::V4(addr), IpAddr::V4(network)) => {
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
            u32::from(addr) & mask == u32::from(network) & mask
        }
        (IpAddr::V6(addr), IpAddr::V6(network)) => {
            let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
            u128::from(addr) & mask == u128::from(network) & mask
        }
        _ => false,
    }
}
