//! In-memory provider for tests
//!
//! [`FakeCloud`] implements [`CloudClient`] over plain vectors. It behaves
//! like the real provider where the engine depends on it:
//!
//! - listings are paged with a small page size
//! - creations, associations and deletions are asynchronous: the first
//!   describe after the call reports a transitional status
//! - deleting a resource something still depends on is refused
//! - errors can be injected per operation
//!
//! Every successful mutating call is logged, which lets tests assert
//! idempotence and ordering.

use crate::client::{
    AllocateEipRequest, CloudClient, CreateNatGatewayRequest, CreateSecurityGroupRequest,
    CreateSnatEntryRequest, CreateVSwitchRequest, CreateVpcRequest, EipFilter, Filter,
};
use crate::error::{CloudError, Result};
use crate::model::{
    Eip, NatGateway, ResourceKind, SecurityGroup, SecurityGroupRule, SnatEntry, Tags, VSwitch,
    Vpc, status,
};
use crate::paging::{Page, PageRequest};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

const DEFAULT_FAKE_PAGE_SIZE: u32 = 3;

/// A successful mutating call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    /// Provider operation name, e.g. `CreateVSwitch`
    pub op: String,
    /// ID of the addressed resource, or the created one
    pub target: String,
}

trait Stored: Clone {
    fn id(&self) -> &str;
    fn set_status(&mut self, status: &str);
}

trait Tagged: Stored {
    fn tags(&self) -> &Tags;
    fn tags_mut(&mut self) -> &mut Tags;
}

macro_rules! impl_stored {
    ($($ty:ty),*) => {
        $(
            impl Stored for $ty {
                fn id(&self) -> &str {
                    &self.id
                }

                fn set_status(&mut self, status: &str) {
                    self.status = status.to_string();
                }
            }

            impl Tagged for $ty {
                fn tags(&self) -> &Tags {
                    &self.tags
                }

                fn tags_mut(&mut self) -> &mut Tags {
                    &mut self.tags
                }
            }
        )*
    };
}

impl_stored!(Vpc, VSwitch, NatGateway, Eip);

impl Stored for SnatEntry {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_status(&mut self, status: &str) {
        self.status = status.to_string();
    }
}

impl Stored for SecurityGroup {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_status(&mut self, _status: &str) {}
}

impl Tagged for SecurityGroup {
    fn tags(&self) -> &Tags {
        &self.tags
    }

    fn tags_mut(&mut self) -> &mut Tags {
        &mut self.tags
    }
}

#[derive(Debug, Clone)]
enum Transition {
    /// Switch to this status on the next read
    Settle(&'static str),
    /// Disappear after the next read
    Vanish,
}

#[derive(Debug, Clone)]
struct Entry<T> {
    record: T,
    transition: Option<Transition>,
}

impl<T> Entry<T> {
    fn vanishing(&self) -> bool {
        matches!(self.transition, Some(Transition::Vanish))
    }
}

#[derive(Debug)]
struct Table<T> {
    entries: Vec<Entry<T>>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: Stored> Table<T> {
    fn insert(&mut self, record: T, transition: Option<Transition>) {
        self.entries.retain(|e| e.record.id() != record.id());
        self.entries.push(Entry { record, transition });
    }

    fn live(&self) -> impl Iterator<Item = &T> {
        self.entries
            .iter()
            .filter(|e| !e.vanishing())
            .map(|e| &e.record)
    }

    fn get_live(&self, id: &str) -> Option<&T> {
        self.live().find(|r| r.id() == id)
    }

    fn get_live_mut(&mut self, id: &str) -> Option<&mut Entry<T>> {
        self.entries
            .iter_mut()
            .find(|e| !e.vanishing() && e.record.id() == id)
    }

    /// Snapshot matching records, then advance their pending transitions
    fn read<F: Fn(&T) -> bool>(&mut self, matches: F) -> Vec<T> {
        let mut out = Vec::new();
        let mut gone = Vec::new();
        for entry in self.entries.iter_mut().filter(|e| matches(&e.record)) {
            out.push(entry.record.clone());
            match entry.transition.take() {
                Some(Transition::Settle(status)) => entry.record.set_status(status),
                Some(Transition::Vanish) => gone.push(entry.record.id().to_string()),
                None => {}
            }
        }
        self.entries.retain(|e| !gone.iter().any(|id| id == e.record.id()));
        out
    }

    fn vanish(&mut self, id: &str, status: &str) -> bool {
        match self.get_live_mut(id) {
            Some(entry) => {
                entry.record.set_status(status);
                entry.transition = Some(Transition::Vanish);
                true
            }
            None => false,
        }
    }

    fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.record.id() != id);
        self.entries.len() != before
    }
}

impl<T: Tagged> Table<T> {
    fn ids_with_tags(&self, tags: &Tags) -> Vec<String> {
        self.live()
            .filter(|r| tags.iter().all(|(k, v)| r.tags().get(k) == Some(v)))
            .map(|r| r.id().to_string())
            .collect()
    }

    fn tags_mut(&mut self, id: &str) -> Option<&mut Tags> {
        self.get_live_mut(id).map(|e| e.record.tags_mut())
    }
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    vpcs: Table<Vpc>,
    vswitches: Table<VSwitch>,
    nat_gateways: Table<NatGateway>,
    eips: Table<Eip>,
    security_groups: Table<SecurityGroup>,
    /// SNAT table ID -> entries
    snat_tables: HashMap<String, Table<SnatEntry>>,
    failures: HashMap<String, (String, u32)>,
    calls: Vec<Mutation>,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn inject(&mut self, op: &str) -> Result<()> {
        if let Some((code, remaining)) = self.failures.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CloudError::api(code.clone(), format!("injected failure of {}", op)));
            }
        }
        Ok(())
    }

    fn record(&mut self, op: &str, target: &str) {
        self.calls.push(Mutation {
            op: op.to_string(),
            target: target.to_string(),
        });
    }

    fn snat_entries(&self) -> impl Iterator<Item = &SnatEntry> {
        self.snat_tables.values().flat_map(|t| t.live())
    }

    fn tag_table(&mut self, kind: ResourceKind, id: &str) -> Option<&mut Tags> {
        match kind {
            ResourceKind::Vpc => self.vpcs.tags_mut(id),
            ResourceKind::VSwitch => self.vswitches.tags_mut(id),
            ResourceKind::NatGateway => self.nat_gateways.tags_mut(id),
            ResourceKind::Eip => self.eips.tags_mut(id),
            ResourceKind::SecurityGroup => self.security_groups.tags_mut(id),
        }
    }
}

fn not_found(code: &str, id: &str) -> CloudError {
    CloudError::api(format!("{}.NotFound", code), format!("{} does not exist", id))
}

fn dependency(what: &str, id: &str) -> CloudError {
    CloudError::api(
        format!("DependencyViolation.{}", what),
        format!("{} still has dependent {}", id, what),
    )
}

fn numbered<T>(items: Vec<T>, page: &PageRequest, max_size: u32) -> Page<T> {
    let (number, size) = match page {
        PageRequest::Number { number, size } => ((*number).max(1), (*size).clamp(1, max_size)),
        PageRequest::Token(_) => (1, max_size),
    };
    let total = items.len() as u32;
    let start = ((number - 1) * size) as usize;
    let chunk: Vec<T> = items.into_iter().skip(start).take(size as usize).collect();
    Page::numbered(chunk, number, size, total)
}

fn tokened<T>(items: Vec<T>, page: &PageRequest, size: u32) -> Page<T> {
    let start = match page {
        PageRequest::Token(Some(token)) => token.parse::<usize>().unwrap_or(0),
        _ => 0,
    };
    let end = start + size as usize;
    let next = (end < items.len()).then(|| end.to_string());
    let chunk: Vec<T> = items.into_iter().skip(start).take(size as usize).collect();
    Page::tokened(chunk, next)
}

fn in_filter(filter: &Filter, id: &str, vpc_id: &str) -> bool {
    (filter.ids.is_empty() || filter.ids.iter().any(|i| i == id))
        && filter.vpc_id.as_deref().is_none_or(|v| v == vpc_id)
}

/// In-memory [`CloudClient`]
#[derive(Debug)]
pub struct FakeCloud {
    state: Mutex<State>,
    page_size: u32,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCloud {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: DEFAULT_FAKE_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the next `times` calls of `op` with a throttling error
    pub fn throttle(&self, op: &str, times: u32) {
        self.fail(op, "Throttling.User", times);
    }

    /// Fail the next `times` calls of `op` with the given error code
    pub fn fail(&self, op: &str, code: &str, times: u32) {
        self.state()
            .failures
            .insert(op.to_string(), (code.to_string(), times));
    }

    pub fn mutation_log(&self) -> Vec<Mutation> {
        self.state().calls.clone()
    }

    /// Operation names of all successful mutating calls, in call order
    pub fn mutation_calls(&self) -> Vec<String> {
        self.state().calls.iter().map(|c| c.op.clone()).collect()
    }

    pub fn mutation_count(&self, op: &str) -> usize {
        self.state().calls.iter().filter(|c| c.op == op).count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn insert_vpc(&self, vpc: Vpc) {
        self.state().vpcs.insert(vpc, None);
    }

    pub fn insert_vswitch(&self, vswitch: VSwitch) {
        self.state().vswitches.insert(vswitch, None);
    }

    /// Insert a gateway; its SNAT tables are created empty
    pub fn insert_nat_gateway(&self, gateway: NatGateway) {
        let mut state = self.state();
        for table in &gateway.snat_table_ids {
            state.snat_tables.entry(table.clone()).or_default();
        }
        state.nat_gateways.insert(gateway, None);
    }

    pub fn insert_eip(&self, eip: Eip) {
        self.state().eips.insert(eip, None);
    }

    pub fn insert_security_group(&self, group: SecurityGroup) {
        self.state().security_groups.insert(group, None);
    }

    pub fn insert_snat_entry(&self, entry: SnatEntry) {
        self.state()
            .snat_tables
            .entry(entry.snat_table_id.clone())
            .or_default()
            .insert(entry, None);
    }

    pub fn vpcs(&self) -> Vec<Vpc> {
        self.state().vpcs.live().cloned().collect()
    }

    pub fn vswitches(&self) -> Vec<VSwitch> {
        self.state().vswitches.live().cloned().collect()
    }

    pub fn nat_gateways(&self) -> Vec<NatGateway> {
        self.state().nat_gateways.live().cloned().collect()
    }

    pub fn eips(&self) -> Vec<Eip> {
        self.state().eips.live().cloned().collect()
    }

    pub fn security_groups(&self) -> Vec<SecurityGroup> {
        self.state().security_groups.live().cloned().collect()
    }

    pub fn snat_entries(&self) -> Vec<SnatEntry> {
        self.state().snat_entries().cloned().collect()
    }
}

#[async_trait]
impl CloudClient for FakeCloud {
    async fn describe_vpcs(&self, filter: &Filter, page: PageRequest) -> Result<Page<Vpc>> {
        let mut state = self.state();
        state.inject("DescribeVpcs")?;
        let items = state.vpcs.read(|v| in_filter(filter, &v.id, &v.id));
        Ok(numbered(items, &page, self.page_size))
    }

    async fn create_vpc(&self, request: &CreateVpcRequest) -> Result<String> {
        let mut state = self.state();
        state.inject("CreateVpc")?;
        let id = state.next_id("vpc");
        let vpc = Vpc {
            id: id.clone(),
            name: request.name.clone(),
            cidr_block: request.cidr_block.clone(),
            status: status::PENDING.to_string(),
            tags: request.tags.clone(),
        };
        state
            .vpcs
            .insert(vpc, Some(Transition::Settle(status::AVAILABLE)));
        state.record("CreateVpc", &id);
        Ok(id)
    }

    async fn delete_vpc(&self, vpc_id: &str) -> Result<()> {
        let mut state = self.state();
        state.inject("DeleteVpc")?;
        if state.vpcs.get_live(vpc_id).is_none() {
            return Err(not_found("InvalidVpcId", vpc_id));
        }
        if state.vswitches.live().any(|v| v.vpc_id == vpc_id) {
            return Err(dependency("VSwitch", vpc_id));
        }
        if state.nat_gateways.live().any(|n| n.vpc_id == vpc_id) {
            return Err(dependency("NatGateway", vpc_id));
        }
        if state.security_groups.live().any(|g| g.vpc_id == vpc_id) {
            return Err(dependency("SecurityGroup", vpc_id));
        }
        state.vpcs.vanish(vpc_id, status::DELETING);
        state.record("DeleteVpc", vpc_id);
        Ok(())
    }

    async fn describe_vswitches(
        &self,
        filter: &Filter,
        page: PageRequest,
    ) -> Result<Page<VSwitch>> {
        let mut state = self.state();
        state.inject("DescribeVSwitches")?;
        let items = state
            .vswitches
            .read(|v| in_filter(filter, &v.id, &v.vpc_id));
        Ok(numbered(items, &page, self.page_size))
    }

    async fn create_vswitch(&self, request: &CreateVSwitchRequest) -> Result<String> {
        let mut state = self.state();
        state.inject("CreateVSwitch")?;
        if state.vpcs.get_live(&request.vpc_id).is_none() {
            return Err(not_found("InvalidVpcId", &request.vpc_id));
        }
        if state
            .vswitches
            .live()
            .any(|v| v.vpc_id == request.vpc_id && v.cidr_block == request.cidr_block)
        {
            return Err(CloudError::api(
                "InvalidCidrBlock.Overlapped",
                format!("{} overlaps an existing VSwitch", request.cidr_block),
            ));
        }
        let id = state.next_id("vsw");
        let vswitch = VSwitch {
            id: id.clone(),
            name: request.name.clone(),
            vpc_id: request.vpc_id.clone(),
            zone_id: request.zone_id.clone(),
            cidr_block: request.cidr_block.clone(),
            status: status::PENDING.to_string(),
            tags: request.tags.clone(),
        };
        state
            .vswitches
            .insert(vswitch, Some(Transition::Settle(status::AVAILABLE)));
        state.record("CreateVSwitch", &id);
        Ok(id)
    }

    async fn delete_vswitch(&self, vswitch_id: &str) -> Result<()> {
        let mut state = self.state();
        state.inject("DeleteVSwitch")?;
        if state.vswitches.get_live(vswitch_id).is_none() {
            return Err(not_found("InvalidVSwitchId", vswitch_id));
        }
        if state
            .nat_gateways
            .live()
            .any(|n| n.vswitch_id == vswitch_id)
        {
            return Err(dependency("NatGateway", vswitch_id));
        }
        if state
            .snat_entries()
            .any(|e| e.source_vswitch_id == vswitch_id)
        {
            return Err(dependency("SnatEntry", vswitch_id));
        }
        state.vswitches.vanish(vswitch_id, status::DELETING);
        state.record("DeleteVSwitch", vswitch_id);
        Ok(())
    }

    async fn describe_nat_gateways(
        &self,
        filter: &Filter,
        page: PageRequest,
    ) -> Result<Page<NatGateway>> {
        let mut state = self.state();
        state.inject("DescribeNatGateways")?;
        let items = state
            .nat_gateways
            .read(|n| in_filter(filter, &n.id, &n.vpc_id));
        Ok(numbered(items, &page, self.page_size))
    }

    async fn create_nat_gateway(&self, request: &CreateNatGatewayRequest) -> Result<String> {
        let mut state = self.state();
        state.inject("CreateNatGateway")?;
        match state.vswitches.get_live(&request.vswitch_id) {
            Some(v) if v.vpc_id == request.vpc_id => {}
            _ => return Err(not_found("InvalidVSwitchId", &request.vswitch_id)),
        }
        let id = state.next_id("ngw");
        let table = state.next_id("stb");
        state.snat_tables.insert(table.clone(), Table::default());
        let gateway = NatGateway {
            id: id.clone(),
            name: request.name.clone(),
            vpc_id: request.vpc_id.clone(),
            vswitch_id: request.vswitch_id.clone(),
            snat_table_ids: vec![table],
            status: status::PENDING.to_string(),
            tags: request.tags.clone(),
        };
        state
            .nat_gateways
            .insert(gateway, Some(Transition::Settle(status::AVAILABLE)));
        state.record("CreateNatGateway", &id);
        Ok(id)
    }

    async fn delete_nat_gateway(&self, nat_gateway_id: &str) -> Result<()> {
        let mut state = self.state();
        state.inject("DeleteNatGateway")?;
        let Some(gateway) = state.nat_gateways.get_live(nat_gateway_id).cloned() else {
            return Err(not_found("InvalidNatGatewayId", nat_gateway_id));
        };
        let has_entries = gateway.snat_table_ids.iter().any(|t| {
            state
                .snat_tables
                .get(t)
                .is_some_and(|table| table.live().next().is_some())
        });
        if has_entries {
            return Err(dependency("SnatEntry", nat_gateway_id));
        }
        if state
            .eips
            .live()
            .any(|e| e.instance_id.as_deref() == Some(nat_gateway_id))
        {
            return Err(dependency("Eip", nat_gateway_id));
        }
        for table in &gateway.snat_table_ids {
            state.snat_tables.remove(table);
        }
        state.nat_gateways.vanish(nat_gateway_id, status::DELETING);
        state.record("DeleteNatGateway", nat_gateway_id);
        Ok(())
    }

    async fn describe_eip_addresses(
        &self,
        filter: &EipFilter,
        page: PageRequest,
    ) -> Result<Page<Eip>> {
        let mut state = self.state();
        state.inject("DescribeEipAddresses")?;
        let items = state.eips.read(|e| {
            (filter.ids.is_empty() || filter.ids.contains(&e.id))
                && filter
                    .associated_instance_id
                    .as_deref()
                    .is_none_or(|i| e.instance_id.as_deref() == Some(i))
        });
        Ok(numbered(items, &page, self.page_size))
    }

    async fn allocate_eip_address(&self, request: &AllocateEipRequest) -> Result<String> {
        let mut state = self.state();
        state.inject("AllocateEipAddress")?;
        let id = state.next_id("eip");
        let eip = Eip {
            id: id.clone(),
            name: request.name.clone(),
            ip_address: format!("47.0.0.{}", state.next_id),
            bandwidth: request.bandwidth.clone(),
            status: status::PENDING.to_string(),
            instance_id: None,
            tags: request.tags.clone(),
        };
        state
            .eips
            .insert(eip, Some(Transition::Settle(status::AVAILABLE)));
        state.record("AllocateEipAddress", &id);
        Ok(id)
    }

    async fn associate_eip_address(&self, allocation_id: &str, instance_id: &str) -> Result<()> {
        let mut state = self.state();
        state.inject("AssociateEipAddress")?;
        if state.nat_gateways.get_live(instance_id).is_none() {
            return Err(not_found("InvalidInstanceId", instance_id));
        }
        let Some(entry) = state.eips.get_live_mut(allocation_id) else {
            return Err(not_found("InvalidAllocationId", allocation_id));
        };
        if entry.record.status != status::AVAILABLE {
            return Err(CloudError::api(
                "InvalidEipStatus.NotAvailable",
                format!("{} is {}", allocation_id, entry.record.status),
            ));
        }
        entry.record.status = status::ASSOCIATING.to_string();
        entry.record.instance_id = Some(instance_id.to_string());
        entry.transition = Some(Transition::Settle(status::IN_USE));
        state.record("AssociateEipAddress", allocation_id);
        Ok(())
    }

    async fn unassociate_eip_address(
        &self,
        allocation_id: &str,
        instance_id: &str,
    ) -> Result<()> {
        let mut state = self.state();
        state.inject("UnassociateEipAddress")?;
        let Some(eip) = state.eips.get_live(allocation_id).cloned() else {
            return Err(not_found("InvalidAllocationId", allocation_id));
        };
        if eip.instance_id.as_deref() != Some(instance_id) {
            return Err(CloudError::api(
                "InvalidAssociation.NotFound",
                format!("{} is not associated with {}", allocation_id, instance_id),
            ));
        }
        if state.snat_entries().any(|e| e.snat_ip == eip.ip_address) {
            return Err(dependency("SnatEntry", allocation_id));
        }
        if let Some(entry) = state.eips.get_live_mut(allocation_id) {
            entry.record.status = status::UNASSOCIATING.to_string();
            entry.record.instance_id = None;
            entry.transition = Some(Transition::Settle(status::AVAILABLE));
        }
        state.record("UnassociateEipAddress", allocation_id);
        Ok(())
    }

    async fn release_eip_address(&self, allocation_id: &str) -> Result<()> {
        let mut state = self.state();
        state.inject("ReleaseEipAddress")?;
        let Some(eip) = state.eips.get_live(allocation_id) else {
            return Err(not_found("InvalidAllocationId", allocation_id));
        };
        if eip.instance_id.is_some() {
            return Err(CloudError::api(
                "InvalidEipStatus.InUse",
                format!("{} is still associated", allocation_id),
            ));
        }
        state.eips.vanish(allocation_id, status::DELETING);
        state.record("ReleaseEipAddress", allocation_id);
        Ok(())
    }

    async fn describe_security_groups(
        &self,
        filter: &Filter,
        page: PageRequest,
    ) -> Result<Page<SecurityGroup>> {
        let mut state = self.state();
        state.inject("DescribeSecurityGroups")?;
        let items = state
            .security_groups
            .read(|g| in_filter(filter, &g.id, &g.vpc_id))
            .into_iter()
            .map(|mut g| {
                g.rules.clear();
                g
            })
            .collect();
        Ok(numbered(items, &page, self.page_size))
    }

    async fn describe_security_group_rules(
        &self,
        security_group_id: &str,
    ) -> Result<Vec<SecurityGroupRule>> {
        let mut state = self.state();
        state.inject("DescribeSecurityGroupAttribute")?;
        state
            .security_groups
            .get_live(security_group_id)
            .map(|g| g.rules.clone())
            .ok_or_else(|| not_found("InvalidSecurityGroupId", security_group_id))
    }

    async fn create_security_group(&self, request: &CreateSecurityGroupRequest) -> Result<String> {
        let mut state = self.state();
        state.inject("CreateSecurityGroup")?;
        if state.vpcs.get_live(&request.vpc_id).is_none() {
            return Err(not_found("InvalidVpcId", &request.vpc_id));
        }
        let id = state.next_id("sg");
        let group = SecurityGroup {
            id: id.clone(),
            name: request.name.clone(),
            vpc_id: request.vpc_id.clone(),
            rules: Vec::new(),
            tags: request.tags.clone(),
        };
        state.security_groups.insert(group, None);
        state.record("CreateSecurityGroup", &id);
        Ok(id)
    }

    async fn delete_security_group(&self, security_group_id: &str) -> Result<()> {
        let mut state = self.state();
        state.inject("DeleteSecurityGroup")?;
        if !state.security_groups.remove(security_group_id) {
            return Err(not_found("InvalidSecurityGroupId", security_group_id));
        }
        state.record("DeleteSecurityGroup", security_group_id);
        Ok(())
    }

    async fn authorize_security_group(
        &self,
        security_group_id: &str,
        rule: &SecurityGroupRule,
    ) -> Result<()> {
        let mut state = self.state();
        state.inject("AuthorizeSecurityGroup")?;
        let Some(entry) = state.security_groups.get_live_mut(security_group_id) else {
            return Err(not_found("InvalidSecurityGroupId", security_group_id));
        };
        let rules = &mut entry.record.rules;
        if !rules.iter().any(|r| r.key() == rule.key()) {
            rules.push(rule.clone());
        }
        state.record("AuthorizeSecurityGroup", security_group_id);
        Ok(())
    }

    async fn revoke_security_group(
        &self,
        security_group_id: &str,
        rule: &SecurityGroupRule,
    ) -> Result<()> {
        let mut state = self.state();
        state.inject("RevokeSecurityGroup")?;
        let Some(entry) = state.security_groups.get_live_mut(security_group_id) else {
            return Err(not_found("InvalidSecurityGroupId", security_group_id));
        };
        entry.record.rules.retain(|r| r.key() != rule.key());
        state.record("RevokeSecurityGroup", security_group_id);
        Ok(())
    }

    async fn describe_snat_entries(
        &self,
        snat_table_id: &str,
        page: PageRequest,
    ) -> Result<Page<SnatEntry>> {
        let mut state = self.state();
        state.inject("DescribeSnatTableEntries")?;
        let Some(table) = state.snat_tables.get_mut(snat_table_id) else {
            return Err(not_found("InvalidSnatTableId", snat_table_id));
        };
        let items = table.read(|_| true);
        Ok(numbered(items, &page, self.page_size))
    }

    async fn create_snat_entry(&self, request: &CreateSnatEntryRequest) -> Result<String> {
        let mut state = self.state();
        state.inject("CreateSnatEntry")?;
        let Some(gateway) = state
            .nat_gateways
            .live()
            .find(|n| n.snat_table_ids.contains(&request.snat_table_id))
            .cloned()
        else {
            return Err(not_found("InvalidSnatTableId", &request.snat_table_id));
        };
        if state.vswitches.get_live(&request.source_vswitch_id).is_none() {
            return Err(not_found("InvalidVSwitchId", &request.source_vswitch_id));
        }
        let bound = state.eips.live().any(|e| {
            e.ip_address == request.snat_ip && e.instance_id.as_deref() == Some(gateway.id.as_str())
        });
        if !bound {
            return Err(CloudError::api(
                "InvalidSnatIp.NotBound",
                format!("{} is not bound to {}", request.snat_ip, gateway.id),
            ));
        }
        let duplicate = state.snat_tables.get(&request.snat_table_id).is_some_and(|t| {
            t.live()
                .any(|e| e.source_vswitch_id == request.source_vswitch_id)
        });
        if duplicate {
            return Err(CloudError::api(
                "Forbidden.SourceVSwitchDuplicated",
                format!(
                    "{} already has a SNAT entry for {}",
                    request.snat_table_id, request.source_vswitch_id
                ),
            ));
        }

        let id = state.next_id("snat");
        let entry = SnatEntry {
            id: id.clone(),
            snat_table_id: request.snat_table_id.clone(),
            source_vswitch_id: request.source_vswitch_id.clone(),
            snat_ip: request.snat_ip.clone(),
            status: status::PENDING.to_string(),
        };
        state
            .snat_tables
            .entry(request.snat_table_id.clone())
            .or_default()
            .insert(entry, Some(Transition::Settle(status::AVAILABLE)));
        state.record("CreateSnatEntry", &id);
        Ok(id)
    }

    async fn delete_snat_entry(&self, snat_table_id: &str, snat_entry_id: &str) -> Result<()> {
        let mut state = self.state();
        state.inject("DeleteSnatEntry")?;
        let deleted = state
            .snat_tables
            .get_mut(snat_table_id)
            .is_some_and(|t| t.vanish(snat_entry_id, status::DELETING));
        if !deleted {
            return Err(not_found("InvalidSnatEntryId", snat_entry_id));
        }
        state.record("DeleteSnatEntry", snat_entry_id);
        Ok(())
    }

    async fn list_tag_resources(
        &self,
        kind: ResourceKind,
        tags: &Tags,
        page: PageRequest,
    ) -> Result<Page<String>> {
        let mut state = self.state();
        state.inject("ListTagResources")?;
        let ids = match kind {
            ResourceKind::Vpc => state.vpcs.ids_with_tags(tags),
            ResourceKind::VSwitch => state.vswitches.ids_with_tags(tags),
            ResourceKind::NatGateway => state.nat_gateways.ids_with_tags(tags),
            ResourceKind::Eip => state.eips.ids_with_tags(tags),
            ResourceKind::SecurityGroup => state.security_groups.ids_with_tags(tags),
        };
        Ok(tokened(ids, &page, self.page_size))
    }

    async fn tag_resources(&self, kind: ResourceKind, id: &str, tags: &Tags) -> Result<()> {
        let mut state = self.state();
        state.inject("TagResources")?;
        let Some(current) = state.tag_table(kind, id) else {
            return Err(not_found("InvalidResourceId", id));
        };
        current.extend(tags.clone());
        state.record("TagResources", id);
        Ok(())
    }

    async fn untag_resources(&self, kind: ResourceKind, id: &str, keys: &[String]) -> Result<()> {
        let mut state = self.state();
        state.inject("UntagResources")?;
        let Some(current) = state.tag_table(kind, id) else {
            return Err(not_found("InvalidResourceId", id));
        };
        for key in keys {
            current.remove(key);
        }
        state.record("UntagResources", id);
        Ok(())
    }
}
