//! Desired configuration and engine options

use crate::error::{FlowError, Result};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Default size of an engine created NAT gateway
pub const DEFAULT_NAT_GATEWAY_SPEC: &str = "Small";

/// Default bandwidth in Mbps of an engine allocated elastic IP
pub const DEFAULT_EIP_BANDWIDTH: &str = "100";

/// Desired network layout of a cluster
///
/// ```yaml
/// networks:
///   vpc:
///     cidr: 10.0.0.0/16
///   zones:
///     - name: cn-hangzhou-a
///       workers: 10.0.0.0/19
///     - name: cn-hangzhou-b
///       workers: 10.0.32.0/19
///       natGateway:
///         eipAllocationId: eip-external
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureConfig {
    pub networks: Networks,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Networks {
    pub vpc: VpcConfig,
    #[serde(default)]
    pub zones: Vec<Zone>,
}

/// Either an existing VPC (`id`) or the CIDR of a managed one
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
    /// Create and own the NAT gateway even inside an existing VPC
    #[serde(default)]
    pub managed_nat_gateway: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nat_gateway_spec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eip_bandwidth: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    pub name: String,
    /// CIDR of the worker subnet
    pub workers: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nat_gateway: Option<ZoneNatGateway>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneNatGateway {
    /// Externally owned elastic IP used for the zone's egress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eip_allocation_id: Option<String>,
}

impl Zone {
    pub fn external_eip(&self) -> Option<&str> {
        self.nat_gateway
            .as_ref()
            .and_then(|n| n.eip_allocation_id.as_deref())
            .filter(|id| !id.is_empty())
    }
}

impl InfrastructureConfig {
    /// Parse YAML; JSON documents are accepted as well
    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::parse(&content)?;
        tracing::debug!(path = %path.display(), zones = config.networks.zones.len(), "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let vpc = &self.networks.vpc;
        let id = vpc.id.as_deref().filter(|s| !s.is_empty());
        let cidr = vpc.cidr.as_deref().filter(|s| !s.is_empty());
        match (id, cidr) {
            (Some(_), Some(_)) => {
                return Err(FlowError::Config(
                    "networks.vpc.id and networks.vpc.cidr are mutually exclusive".into(),
                ));
            }
            (None, None) => {
                return Err(FlowError::Config(
                    "one of networks.vpc.id or networks.vpc.cidr is required".into(),
                ));
            }
            _ => {}
        }
        let vpc_network = cidr
            .map(|cidr| check_cidr("networks.vpc.cidr", cidr))
            .transpose()?;

        if self.networks.zones.is_empty() {
            return Err(FlowError::Config("at least one zone is required".into()));
        }

        let mut names = HashSet::new();
        let mut networks: Vec<(&str, Ipv4Network)> = Vec::new();
        for (i, zone) in self.networks.zones.iter().enumerate() {
            if zone.name.is_empty() {
                return Err(FlowError::Config(format!(
                    "networks.zones[{}].name is empty",
                    i
                )));
            }
            if zone.name.contains(crate::whiteboard::SEPARATOR) {
                return Err(FlowError::Config(format!(
                    "zone name {:?} must not contain {:?}",
                    zone.name,
                    crate::whiteboard::SEPARATOR
                )));
            }
            if !names.insert(zone.name.as_str()) {
                return Err(FlowError::Config(format!(
                    "zone {} is configured twice",
                    zone.name
                )));
            }
            if zone.workers.is_empty() {
                return Err(FlowError::Config(format!(
                    "networks.zones[{}].workers is empty",
                    i
                )));
            }
            let workers = check_cidr(&format!("networks.zones[{}].workers", i), &zone.workers)?;
            if let Some(vpc_network) = vpc_network {
                if !contains(vpc_network, workers) {
                    return Err(FlowError::Config(format!(
                        "workers {} of zone {} are outside the VPC CIDR {}",
                        zone.workers, zone.name, vpc_network
                    )));
                }
            }
            if let Some((other, _)) = networks
                .iter()
                .find(|(_, network)| overlaps(*network, workers))
            {
                return Err(FlowError::Config(format!(
                    "workers {} of zone {} overlap those of zone {}",
                    zone.workers, zone.name, other
                )));
            }
            networks.push((zone.name.as_str(), workers));
        }

        Ok(())
    }

    /// ID of the caller supplied VPC, if any
    pub fn external_vpc_id(&self) -> Option<&str> {
        self.networks.vpc.id.as_deref().filter(|s| !s.is_empty())
    }

    /// Whether the engine owns the NAT gateway
    pub fn manages_nat_gateway(&self) -> bool {
        self.external_vpc_id().is_none() || self.networks.vpc.managed_nat_gateway
    }

    pub fn nat_gateway_spec(&self) -> &str {
        self.networks
            .vpc
            .nat_gateway_spec
            .as_deref()
            .unwrap_or(DEFAULT_NAT_GATEWAY_SPEC)
    }

    pub fn eip_bandwidth(&self) -> &str {
        self.networks
            .vpc
            .eip_bandwidth
            .as_deref()
            .unwrap_or(DEFAULT_EIP_BANDWIDTH)
    }

    pub fn zone(&self, name: &str) -> Option<&Zone> {
        self.networks.zones.iter().find(|z| z.name == name)
    }
}

/// Parse an IPv4 network such as `10.0.0.0/16`
///
/// The prefix length is mandatory and the host bits must be zero.
pub fn parse_cidr(cidr: &str) -> Option<Ipv4Network> {
    if !cidr.contains('/') {
        return None;
    }
    let network: Ipv4Network = cidr.parse().ok()?;
    (network.ip() == network.network()).then_some(network)
}

fn check_cidr(field: &str, cidr: &str) -> Result<Ipv4Network> {
    parse_cidr(cidr)
        .ok_or_else(|| FlowError::Config(format!("{} is not a valid CIDR: {:?}", field, cidr)))
}

fn contains(outer: Ipv4Network, inner: Ipv4Network) -> bool {
    outer.contains(inner.network()) && outer.contains(inner.broadcast())
}

fn overlaps(a: Ipv4Network, b: Ipv4Network) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}

/// Identity of the cluster the network belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterInfo {
    /// Technical name, unique per provider account
    pub name: String,
    pub region: String,
    /// Pod network, allowed into the nodes when known
    pub pod_cidr: Option<String>,
}

impl ClusterInfo {
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            pod_cidr: None,
        }
    }

    pub fn with_pod_cidr(mut self, pod_cidr: impl Into<String>) -> Self {
        self.pod_cidr = Some(pod_cidr.into());
        self
    }

    /// Key of the tag marking resources owned by this cluster
    pub fn ownership_tag_key(&self) -> String {
        format!("kubernetes.io/cluster/{}", self.name)
    }
}

/// Engine behaviour for one pass
#[derive(Debug, Clone)]
pub struct FlowOptions {
    /// Deadline of ordinary tasks
    pub default_timeout: Duration,

    /// Deadline of NAT gateway and subnet tasks
    pub long_timeout: Duration,

    /// Allow a reconcile pass to delete subnets and what depends on them
    pub authorize_destructive: bool,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(2 * 60),
            long_timeout: Duration::from_secs(5 * 60),
            authorize_destructive: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
networks:
  vpc:
    cidr: 10.0.0.0/16
  zones:
    - name: zone-a
      workers: 10.0.0.0/19
    - name: zone-b
      workers: 10.0.32.0/19
      natGateway:
        eipAllocationId: eip-ext
"#;

    #[test]
    fn test_parse_yaml() {
        let config = InfrastructureConfig::parse(CONFIG).unwrap();
        config.validate().unwrap();
        assert_eq!(config.networks.zones.len(), 2);
        assert_eq!(config.networks.zones[1].external_eip(), Some("eip-ext"));
        assert!(config.manages_nat_gateway());
        assert_eq!(config.nat_gateway_spec(), "Small");
        assert_eq!(config.eip_bandwidth(), "100");
    }

    #[test]
    fn test_parse_json() {
        let config = InfrastructureConfig::parse(
            r#"{"networks":{"vpc":{"id":"vpc-ext","managedNatGateway":true},
                "zones":[{"name":"zone-a","workers":"10.0.0.0/24"}]}}"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.external_vpc_id(), Some("vpc-ext"));
        assert!(config.manages_nat_gateway());
    }

    #[test]
    fn test_validation_errors() {
        let base = InfrastructureConfig::parse(CONFIG).unwrap();

        let mut both = base.clone();
        both.networks.vpc.id = Some("vpc-1".into());
        assert!(both.validate().is_err());

        let mut neither = base.clone();
        neither.networks.vpc.cidr = None;
        assert!(neither.validate().is_err());

        let mut no_zones = base.clone();
        no_zones.networks.zones.clear();
        assert!(no_zones.validate().is_err());

        let mut duplicate = base.clone();
        duplicate.networks.zones[1].name = "zone-a".into();
        assert!(duplicate.validate().is_err());

        let mut bad_cidr = base.clone();
        bad_cidr.networks.zones[0].workers = "10.0.0.0/33".into();
        assert!(bad_cidr.validate().is_err());

        let mut slash = base;
        slash.networks.zones[0].name = "zone/a".into();
        assert!(slash.validate().is_err());
    }

    #[test]
    fn test_parse_cidr() {
        let network = parse_cidr("10.0.0.0/16").unwrap();
        assert_eq!(network.network(), "10.0.0.0".parse::<std::net::Ipv4Addr>().unwrap());
        assert_eq!(network.prefix(), 16);
        assert_eq!(parse_cidr("10.0.0.0"), None);
        assert_eq!(parse_cidr("300.0.0.0/8"), None);
        assert_eq!(parse_cidr("10.0.0.5/16"), None);
    }

    #[test]
    fn test_worker_networks_are_checked() {
        let base = InfrastructureConfig::parse(CONFIG).unwrap();

        let mut host_bits = base.clone();
        host_bits.networks.vpc.cidr = Some("10.0.0.5/16".into());
        assert!(host_bits.validate().is_err());

        let mut outside = base.clone();
        outside.networks.zones[1].workers = "10.1.0.0/19".into();
        let err = outside.validate().unwrap_err();
        assert!(err.to_string().contains("outside the VPC CIDR"));

        let mut overlapping = base.clone();
        overlapping.networks.zones[1].workers = "10.0.16.0/20".into();
        let err = overlapping.validate().unwrap_err();
        assert!(err.to_string().contains("overlap those of zone zone-a"));

        let mut external = base;
        external.networks.vpc.cidr = None;
        external.networks.vpc.id = Some("vpc-ext".into());
        external.networks.zones[1].workers = "192.168.0.0/24".into();
        external.validate().unwrap();
    }

    #[test]
    fn test_cluster_ownership_tag() {
        let cluster = ClusterInfo::new("shoot--dev--k8s", "cn-hangzhou");
        assert_eq!(
            cluster.ownership_tag_key(),
            "kubernetes.io/cluster/shoot--dev--k8s"
        );
    }
}
