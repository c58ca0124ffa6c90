//! Flow context: reconcile and delete task graphs
//!
//! A [`FlowContext`] ties together the desired configuration, the cluster
//! identity, the resource [`Actor`] and the [`Whiteboard`] of one cluster.
//! [`FlowContext::reconcile`] and [`FlowContext::delete`] build a task graph
//! over them and run it. The whiteboard is pushed to the [`StatePersister`]
//! after every task, right after each resource creation and at the end of
//! the pass, so a crash at any point leaves a state the next pass can resume
//! from.

mod delete;
mod reconcile;
mod zones;

use crate::config::{ClusterInfo, FlowOptions, InfrastructureConfig};
use crate::error::{FlowError, Result};
use crate::graph::{Graph, TaskId, TaskOptions};
use crate::keys;
use crate::persist::StatePersister;
use crate::whiteboard::Whiteboard;
use async_trait::async_trait;
use infraflow_cloud::{
    Actor, Eip, NatGateway, SecurityGroup, TAG_NAME, Tags, TagUpdater, Vpc, find_existing,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use reconcile::baseline_rules;

/// Value of the cluster ownership tag
pub const OWNERSHIP_TAG_VALUE: &str = "1";

/// Removes the bookkeeping of the legacy provisioning tool
///
/// Runs once, after the first successful reconcile of a migrated state.
#[async_trait]
pub trait LegacyCleaner: Send + Sync {
    async fn cleanup(&self, state: &Whiteboard) -> Result<()>;
}

/// Everything a reconcile or delete pass works with
#[derive(Clone)]
pub struct FlowContext {
    config: Arc<InfrastructureConfig>,
    cluster: Arc<ClusterInfo>,
    options: FlowOptions,
    actor: Arc<dyn Actor>,
    updater: Arc<TagUpdater>,
    state: Whiteboard,
    persister: Arc<dyn StatePersister>,
    persist_lock: Arc<tokio::sync::Mutex<()>>,
    legacy_cleaner: Option<Arc<dyn LegacyCleaner>>,
}

impl FlowContext {
    pub fn new(
        config: InfrastructureConfig,
        cluster: ClusterInfo,
        actor: Arc<dyn Actor>,
        persister: Arc<dyn StatePersister>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            cluster: Arc::new(cluster),
            options: FlowOptions::default(),
            actor,
            updater: Arc::new(TagUpdater::new()),
            state: Whiteboard::new(),
            persister,
            persist_lock: Arc::new(tokio::sync::Mutex::new(())),
            legacy_cleaner: None,
        }
    }

    /// Continue from a previously persisted or migrated state
    pub fn with_state(mut self, state: Whiteboard) -> Self {
        self.state = state.root();
        self
    }

    pub fn with_options(mut self, options: FlowOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_tag_updater(mut self, updater: TagUpdater) -> Self {
        self.updater = Arc::new(updater);
        self
    }

    pub fn with_legacy_cleaner(mut self, cleaner: Arc<dyn LegacyCleaner>) -> Self {
        self.legacy_cleaner = Some(cleaner);
        self
    }

    pub fn whiteboard(&self) -> &Whiteboard {
        &self.state
    }

    pub fn config(&self) -> &InfrastructureConfig {
        &self.config
    }

    /// Push a snapshot of the whole whiteboard to the persister
    pub async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.state.to_persisted();
        self.persister.persist(&snapshot).await
    }

    /// Add a task that persists the whiteboard when it ends, even on failure
    fn add_task<F, Fut>(
        &self,
        graph: &mut Graph,
        name: impl Into<String>,
        options: TaskOptions,
        f: F,
    ) -> TaskId
    where
        F: FnOnce(FlowContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let ctx = self.clone();
        graph.add_task(
            name,
            move |_cancel| async move {
                let result = f(ctx.clone()).await;
                let persisted = ctx.persist().await;
                result.and(persisted)
            },
            options,
        )
    }

    fn short_timeout(&self) -> Duration {
        self.options.default_timeout
    }

    fn long_timeout(&self) -> Duration {
        self.options.long_timeout
    }

    /// Whether this pass may delete subnets and what depends on them
    fn destructive_authorized(&self) -> bool {
        self.options.authorize_destructive
            || (self.state.migrated_from_terraform() && !self.state.terraform_cleaned_up())
    }

    fn zones_node(&self) -> Whiteboard {
        self.state.child(keys::ZONES)
    }

    fn zone_node(&self, zone: &str) -> Whiteboard {
        self.zones_node().child(zone)
    }

    fn zone_suffix(&self, zone: &str) -> Result<String> {
        self.zone_node(zone)
            .get(keys::SUFFIX)
            .ok_or_else(|| FlowError::State(format!("zone {} has no suffix", zone)))
    }

    /// Give every configured zone a suffix, keeping the ones already set
    ///
    /// A new zone takes the lowest `zN` not held by any zone of the
    /// whiteboard, including zones about to be removed.
    fn allocate_zone_suffixes(&self) {
        let zones = self.zones_node();
        let mut used: Vec<String> = zones
            .children_keys()
            .iter()
            .filter_map(|name| zones.child(name).get(keys::SUFFIX))
            .collect();

        for zone in &self.config.networks.zones {
            let node = zones.child(&zone.name);
            if node.get(keys::SUFFIX).is_some() {
                continue;
            }
            let suffix = (0..)
                .map(|i| format!("z{}", i))
                .find(|s| !used.contains(s))
                .unwrap_or_default();
            tracing::debug!(zone = %zone.name, suffix = %suffix, "Allocated zone suffix");
            node.set(keys::SUFFIX, suffix.clone());
            used.push(suffix);
        }
    }

    fn vpc_name(&self) -> String {
        format!("{}-vpc", self.cluster.name)
    }

    fn security_group_name(&self) -> String {
        format!("{}-sg", self.cluster.name)
    }

    fn nat_gateway_name(&self) -> String {
        format!("{}-natgw", self.cluster.name)
    }

    fn vswitch_name(&self, suffix: &str) -> String {
        format!("{}-{}-nodes", self.cluster.name, suffix)
    }

    fn eip_name(&self, suffix: &str) -> String {
        format!("{}-eip-natgw-{}", self.cluster.name, suffix)
    }

    /// Ownership tag only
    fn ownership_tags(&self) -> Tags {
        Tags::from([(
            self.cluster.ownership_tag_key(),
            OWNERSHIP_TAG_VALUE.to_string(),
        )])
    }

    /// Tags of a managed resource called `name`
    fn common_tags(&self, name: &str) -> Tags {
        let mut tags = self.ownership_tags();
        tags.insert(TAG_NAME.to_string(), name.to_string());
        tags
    }

    fn is_owned(&self, tags: &Tags) -> bool {
        tags.get(&self.cluster.ownership_tag_key()).map(String::as_str)
            == Some(OWNERSHIP_TAG_VALUE)
    }

    async fn find_vpc(&self) -> Result<Option<Vpc>> {
        let actor = &*self.actor;
        let id = self.state.get(keys::VPC);
        Ok(find_existing(
            "VPC",
            id.as_deref(),
            &self.common_tags(&self.vpc_name()),
            |id| async move { actor.get_vpc(&id).await },
            |tags| async move { actor.find_vpcs_by_tags(&tags).await },
        )
        .await?)
    }

    async fn find_security_group(&self) -> Result<Option<SecurityGroup>> {
        let actor = &*self.actor;
        let id = self.state.get(keys::NODES_SECURITY_GROUP);
        Ok(find_existing(
            "security group",
            id.as_deref(),
            &self.common_tags(&self.security_group_name()),
            |id| async move { actor.get_security_group(&id).await },
            |tags| async move { actor.find_security_groups_by_tags(&tags).await },
        )
        .await?)
    }

    /// Managed NAT gateway, by stored ID or tags
    async fn find_nat_gateway(&self) -> Result<Option<NatGateway>> {
        let actor = &*self.actor;
        let id = self.state.get(keys::NAT_GATEWAY);
        Ok(find_existing(
            "NAT gateway",
            id.as_deref(),
            &self.common_tags(&self.nat_gateway_name()),
            |id| async move { actor.get_nat_gateway(&id).await },
            |tags| async move { actor.find_nat_gateways_by_tags(&tags).await },
        )
        .await?)
    }

    /// NAT gateway recorded on the whiteboard, managed or not
    async fn stored_nat_gateway(&self) -> Result<Option<NatGateway>> {
        match self.state.get(keys::NAT_GATEWAY) {
            Some(id) => Ok(self.actor.get_nat_gateway(&id).await?),
            None => Ok(None),
        }
    }

    /// NAT gateways whose SNAT tables may hold entries of this cluster
    ///
    /// The recorded gateway when there is one, else the managed one found by
    /// tags, else every gateway of the VPC.
    async fn nat_gateways_in_scope(&self) -> Result<Vec<NatGateway>> {
        if let Some(nat) = self.stored_nat_gateway().await? {
            return Ok(vec![nat]);
        }
        if self.config.manages_nat_gateway() {
            if let Some(nat) = self.find_nat_gateway().await? {
                return Ok(vec![nat]);
            }
        }
        match self.state.get(keys::VPC) {
            Some(vpc_id) => Ok(self.actor.find_nat_gateways_by_vpc(&vpc_id).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Unassociate an elastic IP if bound, then release it
    async fn release_eip(&self, eip: &Eip) -> Result<()> {
        if let Some(instance) = &eip.instance_id {
            self.actor.unassociate_eip(&eip.id, instance).await?;
        }
        tracing::info!(allocation_id = %eip.id, "Releasing elastic IP");
        self.actor.delete_eip(&eip.id).await?;
        Ok(())
    }

    /// Managed elastic IP of a zone, by stored ID or tags
    async fn find_zone_eip(&self, zone: &str, suffix: &str) -> Result<Option<Eip>> {
        let actor = &*self.actor;
        let id = self.zone_node(zone).get(keys::NAT_GATEWAY_ELASTIC_IP);
        Ok(find_existing(
            "elastic IP",
            id.as_deref(),
            &self.common_tags(&self.eip_name(suffix)),
            |id| async move { actor.get_eip(&id).await },
            |tags| async move { actor.find_eips_by_tags(&tags).await },
        )
        .await?)
    }
}
