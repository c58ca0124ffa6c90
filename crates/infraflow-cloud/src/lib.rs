//! Infraflow Cloud
//!
//! Provider boundary of the infraflow reconciliation engine: typed records
//! for the network resources a Kubernetes cluster needs, and the typed
//! operations the engine performs on them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 infraflow-core                   │
//! │        (reconcile / delete task graphs)          │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                infraflow-cloud                   │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │            trait Actor { ... }            │   │
//! │  │   ClientActor: retry · paging · polling   │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │  diff_by_id  │  │  TagUpdater  │            │
//! │  └──────────────┘  └──────────────┘            │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │     trait CloudClient (provider wire SDK)        │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod actor;
pub mod client;
pub mod diff;
pub mod error;
pub mod model;
pub mod paging;
pub mod poll;
pub mod retry;
pub mod tags;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-exports
pub use actor::{Actor, ClientActor, EIP_INTERNET_CHARGE_TYPE, find_existing};
pub use client::{CloudClient, EipFilter, Filter};
pub use diff::{Diff, diff_by_id};
pub use error::{CloudError, Result};
pub use model::{
    CloudResource, Eip, NatGateway, ResourceKind, SecurityGroup, SecurityGroupRule, SnatEntry,
    TAG_NAME, Tags, VSwitch, Vpc, status,
};
pub use paging::{Page, PageRequest};
pub use poll::PollConfig;
pub use retry::RetryConfig;
pub use tags::{TagDelta, TagUpdater, compute_tag_delta};
