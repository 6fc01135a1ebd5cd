//! Forwarding policy: mode, per-query timeout, the default upstream list and
//! per-zone upstream lists. The master reloads the policy under a
//! writer-preferred lock while each pipeline CPU keeps reading its own
//! snapshot.

use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::info;

use crate::constants::{DNS_PORT, FWD_MAX_ADDRS, MAX_DOMAIN_LEN};
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FwdMode {
    /// Forwarding off; refused queries are dropped and counted lost.
    Disable,
    /// Forward without cache interaction.
    Direct,
    /// Forward with caching and the expiring-probe behaviour.
    Cache,
}

impl FromStr for FwdMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disable" => Ok(FwdMode::Disable),
            "direct" => Ok(FwdMode::Direct),
            "cache" => Ok(FwdMode::Cache),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}

impl std::fmt::Display for FwdMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FwdMode::Disable => write!(f, "disable"),
            FwdMode::Direct => write!(f, "direct"),
            FwdMode::Cache => write!(f, "cache"),
        }
    }
}

/// One upstream group: a zone suffix and the resolvers serving it. The
/// default group carries the pseudo-zone `"."`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamGroup {
    pub zone: String,
    pub addrs: SmallVec<[SocketAddr; FWD_MAX_ADDRS]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FwdControl {
    pub mode: FwdMode,
    pub timeout_secs: u64,
    pub default_addrs: UpstreamGroup,
    pub zone_addrs: Vec<UpstreamGroup>,
}

impl FwdControl {
    /// Parse operator syntax: `def_addrs` is a comma-separated
    /// `host[:port]` list; `zone_addrs` is a `%`-separated sequence of
    /// `zone@host[:port][,host[:port]]...` groups and may be empty.
    pub fn parse(
        mode: FwdMode,
        timeout_secs: u64,
        def_addrs: &str,
        zone_addrs: &str,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            mode,
            timeout_secs,
            default_addrs: UpstreamGroup {
                zone: ".".to_string(),
                addrs: parse_addr_list(def_addrs)?,
            },
            zone_addrs: parse_zone_groups(zone_addrs)?,
        })
    }

    /// Pick the upstream group for a qname: longest matching zone suffix
    /// wins, the default group otherwise.
    pub fn addrs_for(&self, qname: &str) -> &UpstreamGroup {
        let mut best: Option<&UpstreamGroup> = None;
        for group in &self.zone_addrs {
            if qname.len() >= group.zone.len()
                && qname.ends_with(group.zone.as_str())
                && best.is_none_or(|b| group.zone.len() > b.zone.len())
            {
                best = Some(group);
            }
        }
        best.unwrap_or(&self.default_addrs)
    }
}

fn parse_addr_list(
    addrs: &str,
) -> Result<SmallVec<[SocketAddr; FWD_MAX_ADDRS]>, ConfigError> {
    let mut out = SmallVec::new();
    for token in addrs.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if out.len() == FWD_MAX_ADDRS {
            info!(
                addrs,
                max = FWD_MAX_ADDRS,
                "upstream list truncated"
            );
            break;
        }
        out.push(resolve_upstream(token)?);
    }
    if out.is_empty() {
        return Err(ConfigError::EmptyUpstreams);
    }
    Ok(out)
}

/// `host[:port]`, default port 53, IPv4 only. Host names are resolved once
/// at parse time.
fn resolve_upstream(token: &str) -> Result<SocketAddr, ConfigError> {
    let (host, port) = match token.rsplit_once(':') {
        Some((host, port)) => (
            host,
            port.parse::<u16>()
                .map_err(|_| ConfigError::InvalidUpstream(token.to_string()))?,
        ),
        None => (token, DNS_PORT),
    };
    (host, port)
        .to_socket_addrs()
        .map_err(|_| ConfigError::InvalidUpstream(token.to_string()))?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| ConfigError::InvalidUpstream(token.to_string()))
}

fn parse_zone_groups(zone_addrs: &str) -> Result<Vec<UpstreamGroup>, ConfigError> {
    let mut groups = Vec::new();
    for group in zone_addrs.split('%').map(str::trim).filter(|g| !g.is_empty()) {
        let Some((zone, addrs)) = group.split_once('@') else {
            return Err(ConfigError::InvalidZoneGroup(group.to_string()));
        };
        let zone = normalize_zone(zone)?;
        groups.push(UpstreamGroup {
            zone,
            addrs: parse_addr_list(addrs)?,
        });
    }
    Ok(groups)
}

/// Zones are matched against qnames in canonical form: lowercase with a
/// trailing dot.
fn normalize_zone(zone: &str) -> Result<String, ConfigError> {
    let zone = zone.trim();
    if zone.is_empty() {
        return Err(ConfigError::InvalidZoneGroup(zone.to_string()));
    }
    if zone.len() > MAX_DOMAIN_LEN {
        return Err(ConfigError::ZoneTooLong(zone.to_string(), MAX_DOMAIN_LEN));
    }
    let mut z = zone.to_ascii_lowercase();
    if !z.ends_with('.') {
        z.push('.');
    }
    Ok(z)
}

/// The reloadable policy: one global copy plus one snapshot per packet CPU.
/// Workers refresh their `Arc` once per loop iteration and then run
/// lock-free on the snapshot.
pub struct ControlSet {
    global: RwLock<Arc<FwdControl>>,
    per_cpu: Vec<RwLock<Arc<FwdControl>>>,
}

impl ControlSet {
    pub fn new(ctrl: FwdControl, cpus: usize) -> Self {
        let ctrl = Arc::new(ctrl);
        Self {
            global: RwLock::new(ctrl.clone()),
            per_cpu: (0..cpus.max(1))
                .map(|_| RwLock::new(ctrl.clone()))
                .collect(),
        }
    }

    pub fn snapshot(&self, cpu: usize) -> Arc<FwdControl> {
        self.per_cpu[cpu % self.per_cpu.len()].read().clone()
    }

    pub fn global(&self) -> Arc<FwdControl> {
        self.global.read().clone()
    }

    /// Install a new policy everywhere. Writer-preferred locking keeps a
    /// stream of readers from starving the reload.
    pub fn reload(&self, ctrl: FwdControl) {
        let ctrl = Arc::new(ctrl);
        *self.global.write() = ctrl.clone();
        for slot in &self.per_cpu {
            *slot.write() = ctrl.clone();
        }
        info!(mode = %self.global.read().mode, "forwarding controls reloaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctrl(def: &str, zones: &str) -> FwdControl {
        FwdControl::parse(FwdMode::Cache, 2, def, zones).unwrap()
    }

    #[test]
    fn parses_default_list() {
        let c = ctrl("1.1.1.1,8.8.8.8:5353", "");
        assert_eq!(c.default_addrs.addrs.len(), 2);
        assert_eq!(c.default_addrs.addrs[0], "1.1.1.1:53".parse().unwrap());
        assert_eq!(c.default_addrs.addrs[1], "8.8.8.8:5353".parse().unwrap());
        assert!(c.zone_addrs.is_empty());
    }

    #[test]
    fn rejects_empty_default_list() {
        assert!(matches!(
            FwdControl::parse(FwdMode::Cache, 2, "", ""),
            Err(ConfigError::EmptyUpstreams)
        ));
    }

    #[test]
    fn truncates_to_max_addrs() {
        let list = (1..=12)
            .map(|i| format!("10.0.0.{i}"))
            .collect::<Vec<_>>()
            .join(",");
        let c = ctrl(&list, "");
        assert_eq!(c.default_addrs.addrs.len(), FWD_MAX_ADDRS);
    }

    #[test]
    fn parses_zone_groups() {
        let c = ctrl(
            "1.1.1.1",
            "corp.example@10.1.0.1,10.1.0.2%Internal.Example@10.2.0.1:1053",
        );
        assert_eq!(c.zone_addrs.len(), 2);
        assert_eq!(c.zone_addrs[0].zone, "corp.example.");
        assert_eq!(c.zone_addrs[0].addrs.len(), 2);
        assert_eq!(c.zone_addrs[1].zone, "internal.example.");
        assert_eq!(c.zone_addrs[1].addrs[0], "10.2.0.1:1053".parse().unwrap());
    }

    #[test]
    fn rejects_group_without_at() {
        assert!(matches!(
            FwdControl::parse(FwdMode::Cache, 2, "1.1.1.1", "corp.example"),
            Err(ConfigError::InvalidZoneGroup(_))
        ));
    }

    #[test]
    fn zone_match_prefers_longest_suffix() {
        let c = ctrl(
            "1.1.1.1",
            "example.@10.0.0.1%corp.example.@10.0.0.2",
        );
        assert_eq!(c.addrs_for("a.corp.example.").zone, "corp.example.");
        assert_eq!(c.addrs_for("a.example.").zone, "example.");
        assert_eq!(c.addrs_for("other.org.").zone, ".");
    }

    #[test]
    fn mode_parse_round_trip() {
        assert_eq!("Cache".parse::<FwdMode>().unwrap(), FwdMode::Cache);
        assert_eq!("direct".parse::<FwdMode>().unwrap(), FwdMode::Direct);
        assert_eq!("disable".parse::<FwdMode>().unwrap(), FwdMode::Disable);
        assert!("off".parse::<FwdMode>().is_err());
    }

    #[test]
    fn reload_updates_every_cpu() {
        let set = ControlSet::new(ctrl("1.1.1.1", ""), 4);
        assert_eq!(set.snapshot(2).mode, FwdMode::Cache);

        let mut next = ctrl("9.9.9.9", "");
        next.mode = FwdMode::Direct;
        set.reload(next);
        for cpu in 0..4 {
            let snap = set.snapshot(cpu);
            assert_eq!(snap.mode, FwdMode::Direct);
            assert_eq!(snap.default_addrs.addrs[0], "9.9.9.9:53".parse().unwrap());
        }
        assert_eq!(set.global().mode, FwdMode::Direct);
    }
}
