//! Typed records of the network resources the engine works with
//!
//! Records are snapshots fetched from the provider. They are never cached as
//! the source of truth; only their identifiers are stored by the engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tag set attached to a resource
pub type Tags = BTreeMap<String, String>;

/// Tag key carrying the human readable resource name
pub const TAG_NAME: &str = "Name";

/// Lifecycle status strings reported by the provider
pub mod status {
    pub const AVAILABLE: &str = "Available";
    pub const IN_USE: &str = "InUse";
    pub const PENDING: &str = "Pending";
    pub const ASSOCIATING: &str = "Associating";
    pub const UNASSOCIATING: &str = "Unassociating";
    pub const DELETING: &str = "Deleting";
}

/// Kind of a taggable resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Vpc,
    VSwitch,
    NatGateway,
    Eip,
    SecurityGroup,
}

impl ResourceKind {
    /// Resource type name used by the provider tag API
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Vpc => "VPC",
            ResourceKind::VSwitch => "VSWITCH",
            ResourceKind::NatGateway => "NATGATEWAY",
            ResourceKind::Eip => "EIP",
            ResourceKind::SecurityGroup => "SECURITYGROUP",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common accessors used by the generic lookup and wait helpers
pub trait CloudResource {
    fn id(&self) -> &str;
    fn status(&self) -> &str;
}

macro_rules! impl_cloud_resource {
    ($($ty:ty),* $(,)?) => {
        $(
            impl CloudResource for $ty {
                fn id(&self) -> &str {
                    &self.id
                }

                fn status(&self) -> &str {
                    &self.status
                }
            }
        )*
    };
}

impl_cloud_resource!(Vpc, VSwitch, NatGateway, Eip, SnatEntry);

impl CloudResource for SecurityGroup {
    fn id(&self) -> &str {
        &self.id
    }

    // Security groups have no asynchronous lifecycle.
    fn status(&self) -> &str {
        status::AVAILABLE
    }
}

/// Virtual private cloud
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vpc {
    pub id: String,
    pub name: String,
    pub cidr_block: String,
    pub status: String,
    #[serde(default)]
    pub tags: Tags,
}

/// Subnet of a VPC bound to a single zone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VSwitch {
    pub id: String,
    pub name: String,
    pub vpc_id: String,
    pub zone_id: String,
    pub cidr_block: String,
    pub status: String,
    #[serde(default)]
    pub tags: Tags,
}

/// NAT gateway shared by all zones of a VPC
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatGateway {
    pub id: String,
    pub name: String,
    pub vpc_id: String,
    /// Subnet the gateway is anchored to
    pub vswitch_id: String,
    /// Source-NAT tables owned by the gateway
    #[serde(default)]
    pub snat_table_ids: Vec<String>,
    pub status: String,
    #[serde(default)]
    pub tags: Tags,
}

/// Elastic IP address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eip {
    /// Allocation ID
    pub id: String,
    pub name: String,
    pub ip_address: String,
    pub bandwidth: String,
    pub status: String,
    /// Instance the address is associated with, if any
    pub instance_id: Option<String>,
    #[serde(default)]
    pub tags: Tags,
}

/// Security group with its rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
    pub vpc_id: String,
    #[serde(default)]
    pub rules: Vec<SecurityGroupRule>,
    #[serde(default)]
    pub tags: Tags,
}

/// Single permission of a security group
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecurityGroupRule {
    /// `ingress` or `egress`
    pub direction: String,
    /// `tcp`, `udp`, `icmp` or `all`
    pub ip_protocol: String,
    /// `from/to`, `-1/-1` for all ports
    pub port_range: String,
    pub source_cidr_ip: String,
    /// `Accept` or `Drop`
    pub policy: String,
    pub priority: String,
}

impl SecurityGroupRule {
    /// Accepting ingress rule with the default priority
    pub fn ingress(
        ip_protocol: impl Into<String>,
        port_range: impl Into<String>,
        source_cidr_ip: impl Into<String>,
    ) -> Self {
        Self {
            direction: "ingress".to_string(),
            ip_protocol: ip_protocol.into(),
            port_range: port_range.into(),
            source_cidr_ip: source_cidr_ip.into(),
            policy: "Accept".to_string(),
            priority: "1".to_string(),
        }
    }

    /// Natural key used to match desired and current rules
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.direction,
            self.policy.to_ascii_lowercase(),
            self.ip_protocol.to_ascii_lowercase(),
            self.port_range,
            self.source_cidr_ip
        )
    }
}

/// Source-NAT entry of a NAT gateway table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnatEntry {
    pub id: String,
    pub snat_table_id: String,
    pub source_vswitch_id: String,
    pub snat_ip: String,
    pub status: String,
}

impl SnatEntry {
    /// Natural key used to match desired and current entries
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.snat_table_id, self.source_vswitch_id, self.snat_ip
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_key_normalizes_case() {
        let a = SecurityGroupRule::ingress("TCP", "1/22", "10.0.0.0/16");
        let mut b = SecurityGroupRule::ingress("tcp", "1/22", "10.0.0.0/16");
        b.policy = "accept".to_string();
        b.priority = "100".to_string();
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_resource_kind_names() {
        assert_eq!(ResourceKind::VSwitch.to_string(), "VSWITCH");
        assert_eq!(ResourceKind::NatGateway.as_str(), "NATGATEWAY");
    }
}
