use super::FlowContext;
use crate::error::{FlowError, Result};
use crate::graph::{Graph, TaskOptions};
use crate::keys;
use infraflow_cloud::{
    NatGateway, ResourceKind, SecurityGroup, SecurityGroupRule, VSwitch, Vpc, diff_by_id,
};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Ingress rules every node security group carries
///
/// Node ports are open to the world; everything else except port 23 and 514
/// is open inside the VPC, and the pod network may reach every port.
pub fn baseline_rules(vpc_cidr: &str, pod_cidr: Option<&str>) -> Vec<SecurityGroupRule> {
    let mut rules = vec![SecurityGroupRule::ingress("tcp", "30000/32767", "0.0.0.0/0")];
    for protocol in ["tcp", "udp"] {
        for ports in ["1/22", "24/513", "515/65535"] {
            rules.push(SecurityGroupRule::ingress(protocol, ports, vpc_cidr));
        }
    }
    if let Some(pod_cidr) = pod_cidr.filter(|c| !c.is_empty()) {
        rules.push(SecurityGroupRule::ingress("all", "-1/-1", pod_cidr));
    }
    rules
}

impl FlowContext {
    /// Converge the cloud network towards the desired configuration
    #[instrument(skip_all, fields(cluster = %self.cluster.name))]
    pub async fn reconcile(&self, cancel: &CancellationToken) -> Result<()> {
        self.config.validate()?;

        let cleared = self.state.clear_tombstones();
        if cleared > 0 {
            debug!(cleared, "Cleared tombstones of a previous pass");
        }
        self.allocate_zone_suffixes();
        self.persist().await?;

        let result = self.build_reconcile_graph().compile()?.run(cancel).await;
        let persisted = self.persist().await;
        result?;
        persisted?;

        if self.state.migrated_from_terraform() && !self.state.terraform_cleaned_up() {
            if let Some(cleaner) = &self.legacy_cleaner {
                cleaner.cleanup(&self.state).await?;
            }
            self.state.set_terraform_cleaned_up();
            self.persist().await?;
            info!("Cleaned up legacy terraform state");
        }

        info!("Reconciled infrastructure");
        Ok(())
    }

    fn build_reconcile_graph(&self) -> Graph {
        let mut graph = Graph::new("reconcile");

        let vpc = self.add_task(
            &mut graph,
            "ensure-vpc",
            TaskOptions::new().timeout(self.short_timeout()),
            |ctx| async move { ctx.ensure_vpc().await },
        );
        self.add_task(
            &mut graph,
            "ensure-security-group",
            TaskOptions::new()
                .timeout(self.short_timeout())
                .depends_on(vpc),
            |ctx| async move { ctx.ensure_security_group().await },
        );
        let vswitches = self.add_task(
            &mut graph,
            "ensure-vswitches",
            TaskOptions::new()
                .timeout(self.long_timeout())
                .depends_on(vpc),
            |ctx| async move { ctx.ensure_vswitches().await },
        );
        let nat = self.add_task(
            &mut graph,
            "ensure-nat-gateway",
            TaskOptions::new()
                .timeout(self.long_timeout())
                .depends_on(vswitches),
            |ctx| async move { ctx.ensure_nat_gateway().await },
        );

        for zone in &self.config.networks.zones {
            let name = zone.name.clone();
            let eip = self.add_task(
                &mut graph,
                format!("ensure-eip-{}", name),
                TaskOptions::new()
                    .timeout(self.short_timeout())
                    .depends_on(nat),
                move |ctx| async move { ctx.ensure_eip(&name).await },
            );

            let name = zone.name.clone();
            let association = self.add_task(
                &mut graph,
                format!("ensure-eip-association-{}", name),
                TaskOptions::new()
                    .timeout(self.short_timeout())
                    .depends_on(eip),
                move |ctx| async move { ctx.ensure_eip_association(&name).await },
            );

            let name = zone.name.clone();
            self.add_task(
                &mut graph,
                format!("ensure-snat-entry-{}", name),
                TaskOptions::new()
                    .timeout(self.long_timeout())
                    .depends_on(association),
                move |ctx| async move { ctx.ensure_snat_entry(&name).await },
            );
        }

        graph
    }

    async fn ensure_vpc(&self) -> Result<()> {
        if let Some(id) = self.config.external_vpc_id() {
            if self.actor.get_vpc(id).await?.is_none() {
                return Err(FlowError::Config(format!("VPC {} does not exist", id)));
            }
            debug!(vpc_id = %id, "Using existing VPC");
            self.state.set(keys::VPC, id);
            return Ok(());
        }

        let cidr = self.config.networks.vpc.cidr.clone().unwrap_or_default();
        let desired = Vpc {
            name: self.vpc_name(),
            cidr_block: cidr.clone(),
            tags: self.common_tags(&self.vpc_name()),
            ..Default::default()
        };

        match self.find_vpc().await? {
            Some(current) => {
                if current.cidr_block != cidr {
                    return Err(FlowError::Config(format!(
                        "VPC {} has CIDR {} but {} is configured; the CIDR of a VPC cannot change",
                        current.id, current.cidr_block, cidr
                    )));
                }
                self.state.set(keys::VPC, current.id.as_str());
                self.updater
                    .update(
                        &*self.actor,
                        ResourceKind::Vpc,
                        &current.id,
                        &current.tags,
                        &desired.tags,
                    )
                    .await?;
            }
            None => {
                let created = self.actor.create_vpc(&desired).await?;
                self.state.set(keys::VPC, created.id.as_str());
                self.persist().await?;
            }
        }
        Ok(())
    }

    async fn ensure_security_group(&self) -> Result<()> {
        let vpc_id = self.required(keys::VPC)?;
        let name = self.security_group_name();
        let desired = SecurityGroup {
            name: name.clone(),
            vpc_id: vpc_id.clone(),
            tags: self.common_tags(&name),
            ..Default::default()
        };

        let group = match self.find_security_group().await? {
            Some(current) => {
                if current.vpc_id != vpc_id {
                    return Err(FlowError::Config(format!(
                        "security group {} belongs to VPC {} instead of {}",
                        current.id, current.vpc_id, vpc_id
                    )));
                }
                self.state
                    .set(keys::NODES_SECURITY_GROUP, current.id.as_str());
                self.updater
                    .update(
                        &*self.actor,
                        ResourceKind::SecurityGroup,
                        &current.id,
                        &current.tags,
                        &desired.tags,
                    )
                    .await?;
                current
            }
            None => {
                let created = self.actor.create_security_group(&desired).await?;
                self.state
                    .set(keys::NODES_SECURITY_GROUP, created.id.as_str());
                self.persist().await?;
                created
            }
        };

        let vpc_cidr = match self.actor.get_vpc(&vpc_id).await? {
            Some(vpc) => vpc.cidr_block,
            None => return Err(FlowError::State(format!("VPC {} disappeared", vpc_id))),
        };
        let rules = baseline_rules(&vpc_cidr, self.cluster.pod_cidr.as_deref());
        let diff = diff_by_id(&rules, &group.rules, SecurityGroupRule::key);

        for rule in &diff.to_delete {
            self.actor
                .revoke_security_group_rule(&group.id, rule)
                .await?;
        }
        for rule in &diff.to_create {
            self.actor
                .authorize_security_group_rule(&group.id, rule)
                .await?;
        }
        Ok(())
    }

    async fn ensure_vswitches(&self) -> Result<()> {
        let vpc_id = self.required(keys::VPC)?;

        let mut desired = Vec::with_capacity(self.config.networks.zones.len());
        for zone in &self.config.networks.zones {
            let name = self.vswitch_name(&self.zone_suffix(&zone.name)?);
            desired.push(VSwitch {
                name: name.clone(),
                vpc_id: vpc_id.clone(),
                zone_id: zone.name.clone(),
                cidr_block: zone.workers.clone(),
                tags: self.common_tags(&name),
                ..Default::default()
            });
        }

        let current = self.current_vswitches(&vpc_id).await?;
        let diff = diff_by_id(&desired, &current, |v: &VSwitch| {
            (v.zone_id.clone(), v.cidr_block.clone())
        });

        if !diff.to_delete.is_empty() {
            let ids: Vec<&str> = diff.to_delete.iter().map(|v| v.id.as_str()).collect();
            if !self.destructive_authorized() {
                return Err(FlowError::ProtectedDeletion(format!(
                    "VSwitches {} are no longer configured; deleting them needs explicit authorization",
                    ids.join(", ")
                )));
            }
            for nat in self.nat_gateways_in_scope().await? {
                if ids.contains(&nat.vswitch_id.as_str()) {
                    return Err(FlowError::Config(format!(
                        "VSwitch {} anchors NAT gateway {} and cannot be removed",
                        nat.vswitch_id, nat.id
                    )));
                }
            }

            for vswitch in &diff.to_delete {
                self.teardown_vswitch(vswitch).await?;
            }
        }

        for (current, wanted) in &diff.to_check {
            self.zone_node(&wanted.zone_id)
                .set(keys::VSWITCH, current.id.as_str());
            self.updater
                .update(
                    &*self.actor,
                    ResourceKind::VSwitch,
                    &current.id,
                    &current.tags,
                    &wanted.tags,
                )
                .await?;
        }

        for wanted in &diff.to_create {
            let created = self.actor.create_vswitch(wanted).await?;
            self.zone_node(&wanted.zone_id)
                .set(keys::VSWITCH, created.id.as_str());
            self.persist().await?;
        }
        Ok(())
    }

    /// Subnets known by stored ID plus owned subnets listed in the VPC
    pub(super) async fn current_vswitches(&self, vpc_id: &str) -> Result<Vec<VSwitch>> {
        let zones = self.zones_node();
        let stored: Vec<String> = zones
            .children_keys()
            .iter()
            .filter_map(|zone| zones.child(zone).get(keys::VSWITCH))
            .collect();

        let mut current = self.actor.list_vswitches(&stored).await?;
        let mut seen: HashSet<String> = current.iter().map(|v| v.id.clone()).collect();
        for vswitch in self.actor.find_vswitches_by_vpc(vpc_id).await? {
            if self.is_owned(&vswitch.tags) && seen.insert(vswitch.id.clone()) {
                current.push(vswitch);
            }
        }
        Ok(current)
    }

    /// Remove a subnet together with the zone resources depending on it
    ///
    /// SNAT entries go first, then the managed elastic IP is unassociated
    /// and released, then the subnet is deleted. The zone node is pruned
    /// when the zone is no longer configured. A subnet found only through
    /// its tags has its elastic IP looked up by name and SNAT IP instead.
    async fn teardown_vswitch(&self, vswitch: &VSwitch) -> Result<()> {
        let zones = self.zones_node();
        let zone = zones
            .children_keys()
            .into_iter()
            .find(|z| zones.child(z).get(keys::VSWITCH).as_deref() == Some(vswitch.id.as_str()));

        info!(vswitch_id = %vswitch.id, zone = ?zone, "Tearing down VSwitch");
        let snat_ips = self.delete_snat_entries_of(&vswitch.id).await?;

        match &zone {
            Some(zone) => self.release_zone_eip(zone).await?,
            None => self.release_unrecorded_eips(vswitch, &snat_ips).await?,
        }

        self.actor.delete_vswitch(&vswitch.id).await?;

        if let Some(zone) = &zone {
            if self.config.zone(zone).is_some() {
                let node = self.zone_node(zone);
                node.unset(keys::VSWITCH);
                node.unset(keys::NAT_GATEWAY_ELASTIC_IP);
            } else {
                zones.clean_child(zone);
            }
        }
        self.persist().await
    }

    async fn ensure_nat_gateway(&self) -> Result<()> {
        let vpc_id = self.required(keys::VPC)?;

        if !self.config.manages_nat_gateway() {
            let mut found = self.actor.find_nat_gateways_by_vpc(&vpc_id).await?;
            let gateway = match found.len() {
                0 => {
                    return Err(FlowError::Config(format!(
                        "VPC {} has no NAT gateway",
                        vpc_id
                    )));
                }
                1 => found.remove(0),
                n => {
                    return Err(infraflow_cloud::CloudError::Ambiguous(format!(
                        "VPC {} has {} NAT gateways, expected one",
                        vpc_id, n
                    ))
                    .into());
                }
            };
            debug!(nat_gateway_id = %gateway.id, "Using existing NAT gateway");
            self.state.set(keys::NAT_GATEWAY, gateway.id.as_str());
            return Ok(());
        }

        let name = self.nat_gateway_name();
        let tags = self.common_tags(&name);

        match self.find_nat_gateway().await? {
            Some(current) => {
                if current.vpc_id != vpc_id {
                    return Err(FlowError::Config(format!(
                        "NAT gateway {} belongs to VPC {} instead of {}",
                        current.id, current.vpc_id, vpc_id
                    )));
                }
                self.state.set(keys::NAT_GATEWAY, current.id.as_str());
                self.updater
                    .update(
                        &*self.actor,
                        ResourceKind::NatGateway,
                        &current.id,
                        &current.tags,
                        &tags,
                    )
                    .await?;
            }
            None => {
                let anchor = self
                    .config
                    .networks
                    .zones
                    .iter()
                    .find_map(|z| self.zone_node(&z.name).get(keys::VSWITCH))
                    .ok_or_else(|| {
                        FlowError::State("no VSwitch to anchor the NAT gateway to".into())
                    })?;
                let desired = NatGateway {
                    name,
                    vpc_id,
                    vswitch_id: anchor,
                    tags,
                    ..Default::default()
                };
                let created = self
                    .actor
                    .create_nat_gateway(&desired, self.config.nat_gateway_spec())
                    .await?;
                self.state.set(keys::NAT_GATEWAY, created.id.as_str());
                self.persist().await?;
            }
        }
        Ok(())
    }

    pub(super) fn required(&self, key: &str) -> Result<String> {
        self.state
            .get(key)
            .ok_or_else(|| FlowError::State(format!("{} is not known yet", key)))
    }
}
