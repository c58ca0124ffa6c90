//! Whiteboard keys

/// ID of the VPC, managed or external
pub const VPC: &str = "VPC";
/// ID of the shared NAT gateway
pub const NAT_GATEWAY: &str = "NatGateway";
/// ID of the security group of the worker nodes
pub const NODES_SECURITY_GROUP: &str = "NodesSecurityGroup";
/// Child node holding one child per zone
pub const ZONES: &str = "Zones";

// Keys of a zone node.

/// ID of the zone's worker subnet
pub const VSWITCH: &str = "VSwitch";
/// Allocation ID of the managed elastic IP of the zone
pub const NAT_GATEWAY_ELASTIC_IP: &str = "NATGatewayElasticIP";
/// Stable short identifier of the zone, `z0`, `z1`, ...
pub const SUFFIX: &str = "Suffix";
