//! Wire-level provider client boundary
//!
//! [`CloudClient`] mirrors the provider API one call per operation. It is
//! implemented on top of the provider SDK (signing, endpoints, transport)
//! outside of this crate; [`crate::actor::ClientActor`] layers retries,
//! pagination and waiting on top of it.
//!
//! Conventions expected from implementations:
//! - create calls apply the request tags atomically with the creation
//! - describe calls with an empty ID filter and no other filter list everything
//! - addressing a missing resource fails with a `*.NotFound` error code
//! - throttling and transient conflicts use the codes in
//!   [`crate::error::CloudError::is_retryable`]

use crate::error::Result;
use crate::model::{
    Eip, NatGateway, ResourceKind, SecurityGroup, SecurityGroupRule, SnatEntry, Tags, VSwitch,
    Vpc,
};
use crate::paging::{Page, PageRequest};
use async_trait::async_trait;

/// Filter for describe calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    /// Restrict to these IDs
    pub ids: Vec<String>,

    /// Restrict to resources of this VPC
    pub vpc_id: Option<String>,
}

impl Filter {
    pub fn by_ids(ids: &[String]) -> Self {
        Self {
            ids: ids.to_vec(),
            vpc_id: None,
        }
    }

    pub fn by_vpc(vpc_id: impl Into<String>) -> Self {
        Self {
            ids: Vec::new(),
            vpc_id: Some(vpc_id.into()),
        }
    }
}

/// Filter for elastic IP describe calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EipFilter {
    pub ids: Vec<String>,

    /// Restrict to addresses associated with this instance
    pub associated_instance_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateVpcRequest {
    pub name: String,
    pub cidr_block: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateVSwitchRequest {
    pub name: String,
    pub vpc_id: String,
    pub zone_id: String,
    pub cidr_block: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateNatGatewayRequest {
    pub name: String,
    pub vpc_id: String,
    pub vswitch_id: String,
    /// Gateway size, e.g. `Small`
    pub spec: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocateEipRequest {
    pub name: String,
    /// Bandwidth in Mbps
    pub bandwidth: String,
    pub internet_charge_type: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSecurityGroupRequest {
    pub name: String,
    pub vpc_id: String,
    pub description: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSnatEntryRequest {
    pub snat_table_id: String,
    pub source_vswitch_id: String,
    pub snat_ip: String,
}

/// Provider API, one method per call
///
/// Listing calls take a [`PageRequest`]; describe calls use the numbered
/// convention, tag queries the token convention.
#[async_trait]
pub trait CloudClient: Send + Sync {
    async fn describe_vpcs(&self, filter: &Filter, page: PageRequest) -> Result<Page<Vpc>>;
    async fn create_vpc(&self, request: &CreateVpcRequest) -> Result<String>;
    async fn delete_vpc(&self, vpc_id: &str) -> Result<()>;

    async fn describe_vswitches(&self, filter: &Filter, page: PageRequest)
    -> Result<Page<VSwitch>>;
    async fn create_vswitch(&self, request: &CreateVSwitchRequest) -> Result<String>;
    async fn delete_vswitch(&self, vswitch_id: &str) -> Result<()>;

    async fn describe_nat_gateways(
        &self,
        filter: &Filter,
        page: PageRequest,
    ) -> Result<Page<NatGateway>>;
    async fn create_nat_gateway(&self, request: &CreateNatGatewayRequest) -> Result<String>;
    async fn delete_nat_gateway(&self, nat_gateway_id: &str) -> Result<()>;

    async fn describe_eip_addresses(&self, filter: &EipFilter, page: PageRequest)
    -> Result<Page<Eip>>;
    async fn allocate_eip_address(&self, request: &AllocateEipRequest) -> Result<String>;
    async fn associate_eip_address(&self, allocation_id: &str, instance_id: &str) -> Result<()>;
    async fn unassociate_eip_address(&self, allocation_id: &str, instance_id: &str)
    -> Result<()>;
    async fn release_eip_address(&self, allocation_id: &str) -> Result<()>;

    /// Security groups without their rules
    async fn describe_security_groups(
        &self,
        filter: &Filter,
        page: PageRequest,
    ) -> Result<Page<SecurityGroup>>;
    async fn describe_security_group_rules(
        &self,
        security_group_id: &str,
    ) -> Result<Vec<SecurityGroupRule>>;
    async fn create_security_group(&self, request: &CreateSecurityGroupRequest) -> Result<String>;
    async fn delete_security_group(&self, security_group_id: &str) -> Result<()>;
    async fn authorize_security_group(
        &self,
        security_group_id: &str,
        rule: &SecurityGroupRule,
    ) -> Result<()>;
    async fn revoke_security_group(
        &self,
        security_group_id: &str,
        rule: &SecurityGroupRule,
    ) -> Result<()>;

    async fn describe_snat_entries(
        &self,
        snat_table_id: &str,
        page: PageRequest,
    ) -> Result<Page<SnatEntry>>;
    async fn create_snat_entry(&self, request: &CreateSnatEntryRequest) -> Result<String>;
    async fn delete_snat_entry(&self, snat_table_id: &str, snat_entry_id: &str) -> Result<()>;

    /// IDs of resources of `kind` carrying all of `tags`
    async fn list_tag_resources(
        &self,
        kind: ResourceKind,
        tags: &Tags,
        page: PageRequest,
    ) -> Result<Page<String>>;
    async fn tag_resources(&self, kind: ResourceKind, id: &str, tags: &Tags) -> Result<()>;
    async fn untag_resources(&self, kind: ResourceKind, id: &str, keys: &[String]) -> Result<()>;
}
