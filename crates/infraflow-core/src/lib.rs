//! Infraflow Core
//!
//! Reconciliation engine for the network of a Kubernetes cluster: one VPC,
//! a node security group, a subnet per availability zone and egress through
//! a shared NAT gateway with one elastic IP per zone.
//!
//! A pass is driven through [`FlowContext`]:
//!
//! ```text
//! ensure-vpc ──┬─► ensure-security-group
//!              └─► ensure-vswitches ─► ensure-nat-gateway ─┬─► ensure-eip-{zone}
//!                                                           │     ─► ensure-eip-association-{zone}
//!                                                           │     ─► ensure-snat-entry-{zone}
//!                                                           └─► ... one chain per zone
//! ```
//!
//! Resource IDs live on a [`Whiteboard`] which the caller persists between
//! passes through a [`StatePersister`]. Clusters set up by the terraform
//! based tool are adopted with [`migrate::migrate_terraform_state`].

pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod keys;
pub mod migrate;
pub mod persist;
pub mod whiteboard;

// Re-exports
pub use config::{ClusterInfo, FlowOptions, InfrastructureConfig, Zone};
pub use context::{FlowContext, LegacyCleaner, OWNERSHIP_TAG_VALUE, baseline_rules};
pub use error::{FlowError, Result, TaskFailure};
pub use graph::{Flow, Graph, TaskId, TaskOptions};
pub use migrate::{
    TerraformState, decode_terraform_state, migrate_terraform_state, prepare_whiteboard,
};
pub use persist::{FilePersister, FnPersister, MemoryPersister, StatePersister};
pub use whiteboard::{PersistedState, Slot, Whiteboard};
