//! Resource actors
//!
//! [`Actor`] is the typed, per-resource-kind interface the reconciliation
//! engine talks to. [`ClientActor`] implements it over a raw
//! [`CloudClient`]: every provider call is retried on throttling, listings
//! are paged to exhaustion and asynchronous operations are awaited until the
//! provider reports the expected status.

use crate::client::{
    AllocateEipRequest, CloudClient, CreateNatGatewayRequest, CreateSecurityGroupRequest,
    CreateSnatEntryRequest, CreateVSwitchRequest, CreateVpcRequest, EipFilter, Filter,
};
use crate::error::{CloudError, Result};
use crate::model::{
    CloudResource, Eip, NatGateway, ResourceKind, SecurityGroup, SecurityGroupRule, SnatEntry,
    Tags, VSwitch, Vpc, status,
};
use crate::paging::{Page, PageRequest, collect_all};
use crate::poll::{PollConfig, poll_until};
use crate::retry::{RetryConfig, call_with_retry};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Charge type used for engine allocated elastic IPs
pub const EIP_INTERNET_CHARGE_TYPE: &str = "PayByTraffic";

/// Typed operations on every resource kind the engine manages
///
/// `get_*` returns `Ok(None)` for absent resources; "not found" is never an
/// error at this level. Mutating calls return once the provider reports the
/// operation as complete.
#[async_trait]
pub trait Actor: Send + Sync {
    async fn create_vpc(&self, desired: &Vpc) -> Result<Vpc>;
    async fn get_vpc(&self, id: &str) -> Result<Option<Vpc>>;
    async fn list_vpcs(&self, ids: &[String]) -> Result<Vec<Vpc>>;
    async fn find_vpcs_by_tags(&self, tags: &Tags) -> Result<Vec<Vpc>>;
    async fn delete_vpc(&self, id: &str) -> Result<()>;

    async fn create_vswitch(&self, desired: &VSwitch) -> Result<VSwitch>;
    async fn get_vswitch(&self, id: &str) -> Result<Option<VSwitch>>;
    async fn list_vswitches(&self, ids: &[String]) -> Result<Vec<VSwitch>>;
    async fn find_vswitches_by_tags(&self, tags: &Tags) -> Result<Vec<VSwitch>>;
    async fn find_vswitches_by_vpc(&self, vpc_id: &str) -> Result<Vec<VSwitch>>;
    async fn delete_vswitch(&self, id: &str) -> Result<()>;

    async fn create_nat_gateway(&self, desired: &NatGateway, spec: &str) -> Result<NatGateway>;
    async fn get_nat_gateway(&self, id: &str) -> Result<Option<NatGateway>>;
    async fn list_nat_gateways(&self, ids: &[String]) -> Result<Vec<NatGateway>>;
    async fn find_nat_gateways_by_tags(&self, tags: &Tags) -> Result<Vec<NatGateway>>;
    async fn find_nat_gateways_by_vpc(&self, vpc_id: &str) -> Result<Vec<NatGateway>>;
    async fn delete_nat_gateway(&self, id: &str) -> Result<()>;

    async fn create_eip(&self, desired: &Eip) -> Result<Eip>;
    async fn get_eip(&self, id: &str) -> Result<Option<Eip>>;
    async fn list_eips(&self, ids: &[String]) -> Result<Vec<Eip>>;
    async fn find_eips_by_tags(&self, tags: &Tags) -> Result<Vec<Eip>>;
    async fn find_eips_by_instance(&self, instance_id: &str) -> Result<Vec<Eip>>;
    async fn associate_eip(&self, id: &str, instance_id: &str) -> Result<Eip>;
    async fn unassociate_eip(&self, id: &str, instance_id: &str) -> Result<Eip>;
    async fn delete_eip(&self, id: &str) -> Result<()>;

    async fn create_security_group(&self, desired: &SecurityGroup) -> Result<SecurityGroup>;
    /// Security group including its rules
    async fn get_security_group(&self, id: &str) -> Result<Option<SecurityGroup>>;
    async fn list_security_groups(&self, ids: &[String]) -> Result<Vec<SecurityGroup>>;
    async fn find_security_groups_by_tags(&self, tags: &Tags) -> Result<Vec<SecurityGroup>>;
    async fn delete_security_group(&self, id: &str) -> Result<()>;
    async fn authorize_security_group_rule(&self, id: &str, rule: &SecurityGroupRule)
    -> Result<()>;
    async fn revoke_security_group_rule(&self, id: &str, rule: &SecurityGroupRule) -> Result<()>;

    async fn create_snat_entry(&self, desired: &SnatEntry) -> Result<SnatEntry>;
    async fn list_snat_entries(&self, snat_table_id: &str) -> Result<Vec<SnatEntry>>;
    async fn delete_snat_entry(&self, snat_table_id: &str, id: &str) -> Result<()>;

    async fn create_tags(&self, kind: ResourceKind, id: &str, tags: &Tags) -> Result<()>;
    async fn delete_tags(&self, kind: ResourceKind, id: &str, keys: &[String]) -> Result<()>;
}

/// Look up a resource by its stored ID, falling back to a tag query
///
/// The ID is tried first; when it is absent or no longer resolves, the
/// resource is searched by `tags`. Several matches by tag are ambiguous.
pub async fn find_existing<T, G, GFut, F, FFut>(
    kind: &str,
    id: Option<&str>,
    tags: &Tags,
    get: G,
    find: F,
) -> Result<Option<T>>
where
    T: CloudResource,
    G: FnOnce(String) -> GFut,
    GFut: Future<Output = Result<Option<T>>>,
    F: FnOnce(Tags) -> FFut,
    FFut: Future<Output = Result<Vec<T>>>,
{
    if let Some(id) = id.filter(|id| !id.is_empty()) {
        if let Some(found) = get(id.to_string()).await? {
            debug!("Found {} {} by ID", kind, id);
            return Ok(Some(found));
        }
        debug!("{} {} not found, searching by tags", kind, id);
    }

    let mut found = find(tags.clone()).await?;
    match found.len() {
        0 => Ok(None),
        1 => {
            let item = found.pop();
            if let Some(item) = &item {
                debug!("Found {} {} by tags", kind, item.id());
            }
            Ok(item)
        }
        n => {
            let ids: Vec<&str> = found.iter().map(|r| r.id()).collect();
            Err(CloudError::Ambiguous(format!(
                "{} {} resources carry tags {:?}: {}",
                n,
                kind,
                tags,
                ids.join(", ")
            )))
        }
    }
}

/// [`Actor`] backed by a raw provider client
pub struct ClientActor {
    client: Arc<dyn CloudClient>,
    retry: RetryConfig,
    poll: PollConfig,
    cancel: CancellationToken,
}

impl ClientActor {
    pub fn new(client: Arc<dyn CloudClient>) -> Self {
        Self {
            client,
            retry: RetryConfig::default(),
            poll: PollConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Abort pending waits when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    async fn call<T, F, Fut>(&self, operation: &str, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        call_with_retry(&self.retry, operation, f).await
    }

    /// Like [`Self::call`] for deletions; an already missing resource is fine.
    async fn call_delete<F, Fut>(&self, operation: &str, f: F) -> Result<bool>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        match self.call(operation, f).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn describe_all<T, F, Fut>(
        &self,
        operation: &str,
        first: PageRequest,
        fetch: F,
    ) -> Result<Vec<T>>
    where
        F: Fn(PageRequest) -> Fut,
        Fut: Future<Output = Result<Page<T>>>,
    {
        let fetch = &fetch;
        let retry = &self.retry;
        let result = collect_all(first, move |page| async move {
            call_with_retry(retry, operation, || fetch(page.clone())).await
        })
        .await;

        match result {
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            other => other,
        }
    }

    async fn find_ids_by_tags(&self, kind: ResourceKind, tags: &Tags) -> Result<Vec<String>> {
        if tags.is_empty() {
            return Err(CloudError::InvalidConfig(format!(
                "refusing to search {} resources without tags",
                kind
            )));
        }

        let mut ids = self
            .describe_all("ListTagResources", PageRequest::first_token(), |page| {
                self.client.list_tag_resources(kind, tags, page)
            })
            .await?;

        let mut seen = std::collections::HashSet::new();
        ids.retain(|id| seen.insert(id.clone()));
        Ok(ids)
    }

    async fn wait_until<T, G, Fut>(&self, what: &str, get: G, ready: fn(&T) -> bool) -> Result<T>
    where
        G: Fn() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let get = &get;
        poll_until(&self.cancel, &self.poll, what, move || async move {
            Ok(get().await?.filter(|r| ready(r)))
        })
        .await
    }

    async fn wait_gone<T, G, Fut>(&self, what: &str, get: G) -> Result<()>
    where
        G: Fn() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let get = &get;
        poll_until(&self.cancel, &self.poll, what, move || async move {
            Ok(match get().await? {
                Some(_) => None,
                None => Some(()),
            })
        })
        .await
    }

    async fn get_snat_entry(&self, snat_table_id: &str, id: &str) -> Result<Option<SnatEntry>> {
        let entries = self.list_snat_entries(snat_table_id).await?;
        Ok(entries.into_iter().find(|e| e.id == id))
    }
}

fn is_available<T: CloudResource>(resource: &T) -> bool {
    resource.status() == status::AVAILABLE
}

/// At most one record may answer a lookup by ID
fn single<T>(mut items: Vec<T>, kind: &str, id: &str) -> Result<Option<T>> {
    match items.len() {
        0 | 1 => Ok(items.pop()),
        n => Err(CloudError::Ambiguous(format!(
            "{} {} records returned for ID {}",
            n, kind, id
        ))),
    }
}

#[async_trait]
impl Actor for ClientActor {
    async fn create_vpc(&self, desired: &Vpc) -> Result<Vpc> {
        let request = CreateVpcRequest {
            name: desired.name.clone(),
            cidr_block: desired.cidr_block.clone(),
            tags: desired.tags.clone(),
        };
        let id = self
            .call("CreateVpc", || self.client.create_vpc(&request))
            .await?;
        info!(vpc_id = %id, name = %desired.name, cidr = %desired.cidr_block, "Created VPC");

        self.wait_until(
            &format!("VPC {} to become available", id),
            || self.get_vpc(&id),
            is_available,
        )
        .await
    }

    async fn get_vpc(&self, id: &str) -> Result<Option<Vpc>> {
        single(self.list_vpcs(&[id.to_string()]).await?, "VPC", id)
    }

    async fn list_vpcs(&self, ids: &[String]) -> Result<Vec<Vpc>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let filter = Filter::by_ids(ids);
        self.describe_all("DescribeVpcs", PageRequest::first_numbered(), |page| {
            self.client.describe_vpcs(&filter, page)
        })
        .await
    }

    async fn find_vpcs_by_tags(&self, tags: &Tags) -> Result<Vec<Vpc>> {
        let ids = self.find_ids_by_tags(ResourceKind::Vpc, tags).await?;
        self.list_vpcs(&ids).await
    }

    async fn delete_vpc(&self, id: &str) -> Result<()> {
        if self
            .call_delete("DeleteVpc", || self.client.delete_vpc(id))
            .await?
        {
            info!(vpc_id = %id, "Deleting VPC");
        }
        self.wait_gone(&format!("VPC {} to be deleted", id), || self.get_vpc(id))
            .await
    }

    async fn create_vswitch(&self, desired: &VSwitch) -> Result<VSwitch> {
        let request = CreateVSwitchRequest {
            name: desired.name.clone(),
            vpc_id: desired.vpc_id.clone(),
            zone_id: desired.zone_id.clone(),
            cidr_block: desired.cidr_block.clone(),
            tags: desired.tags.clone(),
        };
        let id = self
            .call("CreateVSwitch", || self.client.create_vswitch(&request))
            .await?;
        info!(
            vswitch_id = %id,
            zone = %desired.zone_id,
            cidr = %desired.cidr_block,
            "Created VSwitch"
        );

        self.wait_until(
            &format!("VSwitch {} to become available", id),
            || self.get_vswitch(&id),
            is_available,
        )
        .await
    }

    async fn get_vswitch(&self, id: &str) -> Result<Option<VSwitch>> {
        single(self.list_vswitches(&[id.to_string()]).await?, "VSwitch", id)
    }

    async fn list_vswitches(&self, ids: &[String]) -> Result<Vec<VSwitch>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let filter = Filter::by_ids(ids);
        self.describe_all("DescribeVSwitches", PageRequest::first_numbered(), |page| {
            self.client.describe_vswitches(&filter, page)
        })
        .await
    }

    async fn find_vswitches_by_tags(&self, tags: &Tags) -> Result<Vec<VSwitch>> {
        let ids = self.find_ids_by_tags(ResourceKind::VSwitch, tags).await?;
        self.list_vswitches(&ids).await
    }

    async fn find_vswitches_by_vpc(&self, vpc_id: &str) -> Result<Vec<VSwitch>> {
        let filter = Filter::by_vpc(vpc_id);
        self.describe_all("DescribeVSwitches", PageRequest::first_numbered(), |page| {
            self.client.describe_vswitches(&filter, page)
        })
        .await
    }

    async fn delete_vswitch(&self, id: &str) -> Result<()> {
        if self
            .call_delete("DeleteVSwitch", || self.client.delete_vswitch(id))
            .await?
        {
            info!(vswitch_id = %id, "Deleting VSwitch");
        }
        self.wait_gone(&format!("VSwitch {} to be deleted", id), || {
            self.get_vswitch(id)
        })
        .await
    }

    async fn create_nat_gateway(&self, desired: &NatGateway, spec: &str) -> Result<NatGateway> {
        let request = CreateNatGatewayRequest {
            name: desired.name.clone(),
            vpc_id: desired.vpc_id.clone(),
            vswitch_id: desired.vswitch_id.clone(),
            spec: spec.to_string(),
            tags: desired.tags.clone(),
        };
        let id = self
            .call("CreateNatGateway", || self.client.create_nat_gateway(&request))
            .await?;
        info!(nat_gateway_id = %id, vswitch_id = %desired.vswitch_id, "Created NAT gateway");

        self.wait_until(
            &format!("NAT gateway {} to become available", id),
            || self.get_nat_gateway(&id),
            is_available,
        )
        .await
    }

    async fn get_nat_gateway(&self, id: &str) -> Result<Option<NatGateway>> {
        single(
            self.list_nat_gateways(&[id.to_string()]).await?,
            "NAT gateway",
            id,
        )
    }

    async fn list_nat_gateways(&self, ids: &[String]) -> Result<Vec<NatGateway>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let filter = Filter::by_ids(ids);
        self.describe_all("DescribeNatGateways", PageRequest::first_numbered(), |page| {
            self.client.describe_nat_gateways(&filter, page)
        })
        .await
    }

    async fn find_nat_gateways_by_tags(&self, tags: &Tags) -> Result<Vec<NatGateway>> {
        let ids = self.find_ids_by_tags(ResourceKind::NatGateway, tags).await?;
        self.list_nat_gateways(&ids).await
    }

    async fn find_nat_gateways_by_vpc(&self, vpc_id: &str) -> Result<Vec<NatGateway>> {
        let filter = Filter::by_vpc(vpc_id);
        self.describe_all("DescribeNatGateways", PageRequest::first_numbered(), |page| {
            self.client.describe_nat_gateways(&filter, page)
        })
        .await
    }

    async fn delete_nat_gateway(&self, id: &str) -> Result<()> {
        if self
            .call_delete("DeleteNatGateway", || self.client.delete_nat_gateway(id))
            .await?
        {
            info!(nat_gateway_id = %id, "Deleting NAT gateway");
        }
        self.wait_gone(&format!("NAT gateway {} to be deleted", id), || {
            self.get_nat_gateway(id)
        })
        .await
    }

    async fn create_eip(&self, desired: &Eip) -> Result<Eip> {
        let request = AllocateEipRequest {
            name: desired.name.clone(),
            bandwidth: desired.bandwidth.clone(),
            internet_charge_type: EIP_INTERNET_CHARGE_TYPE.to_string(),
            tags: desired.tags.clone(),
        };
        let id = self
            .call("AllocateEipAddress", || {
                self.client.allocate_eip_address(&request)
            })
            .await?;
        info!(allocation_id = %id, name = %desired.name, "Allocated elastic IP");

        self.wait_until(
            &format!("elastic IP {} to become available", id),
            || self.get_eip(&id),
            is_available,
        )
        .await
    }

    async fn get_eip(&self, id: &str) -> Result<Option<Eip>> {
        single(self.list_eips(&[id.to_string()]).await?, "elastic IP", id)
    }

    async fn list_eips(&self, ids: &[String]) -> Result<Vec<Eip>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let filter = EipFilter {
            ids: ids.to_vec(),
            associated_instance_id: None,
        };
        self.describe_all("DescribeEipAddresses", PageRequest::first_numbered(), |page| {
            self.client.describe_eip_addresses(&filter, page)
        })
        .await
    }

    async fn find_eips_by_tags(&self, tags: &Tags) -> Result<Vec<Eip>> {
        let ids = self.find_ids_by_tags(ResourceKind::Eip, tags).await?;
        self.list_eips(&ids).await
    }

    async fn find_eips_by_instance(&self, instance_id: &str) -> Result<Vec<Eip>> {
        let filter = EipFilter {
            ids: Vec::new(),
            associated_instance_id: Some(instance_id.to_string()),
        };
        self.describe_all("DescribeEipAddresses", PageRequest::first_numbered(), |page| {
            self.client.describe_eip_addresses(&filter, page)
        })
        .await
    }

    async fn associate_eip(&self, id: &str, instance_id: &str) -> Result<Eip> {
        self.call("AssociateEipAddress", || {
            self.client.associate_eip_address(id, instance_id)
        })
        .await?;
        info!(allocation_id = %id, instance_id = %instance_id, "Associating elastic IP");

        let eip = self
            .wait_until(
                &format!("elastic IP {} to be associated", id),
                || self.get_eip(id),
                |eip: &Eip| eip.status == status::IN_USE,
            )
            .await?;

        if eip.instance_id.as_deref() != Some(instance_id) {
            return Err(CloudError::UnexpectedStatus(format!(
                "elastic IP {} is associated with {:?} instead of {}",
                id, eip.instance_id, instance_id
            )));
        }
        Ok(eip)
    }

    async fn unassociate_eip(&self, id: &str, instance_id: &str) -> Result<Eip> {
        self.call("UnassociateEipAddress", || {
            self.client.unassociate_eip_address(id, instance_id)
        })
        .await?;
        info!(allocation_id = %id, instance_id = %instance_id, "Unassociating elastic IP");

        self.wait_until(
            &format!("elastic IP {} to be unassociated", id),
            || self.get_eip(id),
            is_available,
        )
        .await
    }

    async fn delete_eip(&self, id: &str) -> Result<()> {
        if self
            .call_delete("ReleaseEipAddress", || self.client.release_eip_address(id))
            .await?
        {
            info!(allocation_id = %id, "Releasing elastic IP");
        }
        self.wait_gone(&format!("elastic IP {} to be released", id), || {
            self.get_eip(id)
        })
        .await
    }

    async fn create_security_group(&self, desired: &SecurityGroup) -> Result<SecurityGroup> {
        let request = CreateSecurityGroupRequest {
            name: desired.name.clone(),
            vpc_id: desired.vpc_id.clone(),
            description: format!("Security group {}", desired.name),
            tags: desired.tags.clone(),
        };
        let id = self
            .call("CreateSecurityGroup", || {
                self.client.create_security_group(&request)
            })
            .await?;
        info!(security_group_id = %id, name = %desired.name, "Created security group");

        self.wait_until(
            &format!("security group {} to become visible", id),
            || self.get_security_group(&id),
            |_: &SecurityGroup| true,
        )
        .await
    }

    async fn get_security_group(&self, id: &str) -> Result<Option<SecurityGroup>> {
        let Some(mut group) = single(
            self.list_security_groups(&[id.to_string()]).await?,
            "security group",
            id,
        )?
        else {
            return Ok(None);
        };

        let rules = self
            .call("DescribeSecurityGroupAttribute", || {
                self.client.describe_security_group_rules(id)
            })
            .await;
        match rules {
            Ok(rules) => group.rules = rules,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        }
        Ok(Some(group))
    }

    async fn list_security_groups(&self, ids: &[String]) -> Result<Vec<SecurityGroup>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let filter = Filter::by_ids(ids);
        self.describe_all(
            "DescribeSecurityGroups",
            PageRequest::first_numbered(),
            |page| self.client.describe_security_groups(&filter, page),
        )
        .await
    }

    async fn find_security_groups_by_tags(&self, tags: &Tags) -> Result<Vec<SecurityGroup>> {
        let ids = self
            .find_ids_by_tags(ResourceKind::SecurityGroup, tags)
            .await?;
        let mut groups = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(group) = self.get_security_group(id).await? {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    async fn delete_security_group(&self, id: &str) -> Result<()> {
        if self
            .call_delete("DeleteSecurityGroup", || {
                self.client.delete_security_group(id)
            })
            .await?
        {
            info!(security_group_id = %id, "Deleted security group");
        }
        Ok(())
    }

    async fn authorize_security_group_rule(
        &self,
        id: &str,
        rule: &SecurityGroupRule,
    ) -> Result<()> {
        self.call("AuthorizeSecurityGroup", || {
            self.client.authorize_security_group(id, rule)
        })
        .await?;
        info!(security_group_id = %id, rule = %rule.key(), "Authorized security group rule");
        Ok(())
    }

    async fn revoke_security_group_rule(&self, id: &str, rule: &SecurityGroupRule) -> Result<()> {
        self.call("RevokeSecurityGroup", || {
            self.client.revoke_security_group(id, rule)
        })
        .await?;
        info!(security_group_id = %id, rule = %rule.key(), "Revoked security group rule");
        Ok(())
    }

    async fn create_snat_entry(&self, desired: &SnatEntry) -> Result<SnatEntry> {
        let request = CreateSnatEntryRequest {
            snat_table_id: desired.snat_table_id.clone(),
            source_vswitch_id: desired.source_vswitch_id.clone(),
            snat_ip: desired.snat_ip.clone(),
        };
        let id = self
            .call("CreateSnatEntry", || self.client.create_snat_entry(&request))
            .await?;
        info!(
            snat_entry_id = %id,
            snat_table_id = %desired.snat_table_id,
            vswitch_id = %desired.source_vswitch_id,
            snat_ip = %desired.snat_ip,
            "Created SNAT entry"
        );

        self.wait_until(
            &format!("SNAT entry {} to become available", id),
            || self.get_snat_entry(&desired.snat_table_id, &id),
            is_available,
        )
        .await
    }

    async fn list_snat_entries(&self, snat_table_id: &str) -> Result<Vec<SnatEntry>> {
        self.describe_all(
            "DescribeSnatTableEntries",
            PageRequest::first_numbered(),
            |page| self.client.describe_snat_entries(snat_table_id, page),
        )
        .await
    }

    async fn delete_snat_entry(&self, snat_table_id: &str, id: &str) -> Result<()> {
        if self
            .call_delete("DeleteSnatEntry", || {
                self.client.delete_snat_entry(snat_table_id, id)
            })
            .await?
        {
            info!(snat_entry_id = %id, snat_table_id = %snat_table_id, "Deleting SNAT entry");
        }
        self.wait_gone(&format!("SNAT entry {} to be deleted", id), || {
            self.get_snat_entry(snat_table_id, id)
        })
        .await
    }

    async fn create_tags(&self, kind: ResourceKind, id: &str, tags: &Tags) -> Result<()> {
        if tags.is_empty() {
            return Ok(());
        }
        self.call("TagResources", || self.client.tag_resources(kind, id, tags))
            .await
    }

    async fn delete_tags(&self, kind: ResourceKind, id: &str, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.call("UntagResources", || {
            self.client.untag_resources(kind, id, keys)
        })
        .await
    }
}
