//! Per-zone egress: elastic IP, its association and the SNAT entry

use super::FlowContext;
use crate::error::{FlowError, Result};
use crate::keys;
use infraflow_cloud::{
    CloudError, Eip, ResourceKind, SnatEntry, TAG_NAME, VSwitch, diff_by_id, status,
};
use tracing::{debug, info, warn};

impl FlowContext {
    pub(super) async fn ensure_eip(&self, zone: &str) -> Result<()> {
        let config = self
            .config
            .zone(zone)
            .ok_or_else(|| FlowError::Config(format!("zone {} is not configured", zone)))?;

        if let Some(external) = config.external_eip() {
            if self.actor.get_eip(external).await?.is_none() {
                return Err(FlowError::Config(format!(
                    "elastic IP {} of zone {} does not exist",
                    external, zone
                )));
            }
            debug!(zone, allocation_id = %external, "Using existing elastic IP");
            return Ok(());
        }

        let suffix = self.zone_suffix(zone)?;
        let name = self.eip_name(&suffix);
        let tags = self.common_tags(&name);
        let node = self.zone_node(zone);

        match self.find_zone_eip(zone, &suffix).await? {
            Some(current) => {
                node.set(keys::NAT_GATEWAY_ELASTIC_IP, current.id.as_str());
                self.updater
                    .update(&*self.actor, ResourceKind::Eip, &current.id, &current.tags, &tags)
                    .await?;
            }
            None => {
                let desired = Eip {
                    name,
                    bandwidth: self.config.eip_bandwidth().to_string(),
                    tags,
                    ..Default::default()
                };
                let created = self.actor.create_eip(&desired).await?;
                node.set(keys::NAT_GATEWAY_ELASTIC_IP, created.id.as_str());
                self.persist().await?;
            }
        }
        Ok(())
    }

    pub(super) async fn ensure_eip_association(&self, zone: &str) -> Result<()> {
        let nat_id = self.required(keys::NAT_GATEWAY)?;
        let eip = self.zone_eip(zone).await?;

        match eip.status.as_str() {
            status::AVAILABLE => {
                self.actor.associate_eip(&eip.id, &nat_id).await?;
            }
            status::IN_USE => {
                if eip.instance_id.as_deref() != Some(nat_id.as_str()) {
                    return Err(FlowError::Config(format!(
                        "elastic IP {} of zone {} is bound to {:?} instead of NAT gateway {}",
                        eip.id, zone, eip.instance_id, nat_id
                    )));
                }
            }
            other => {
                return Err(CloudError::UnexpectedStatus(format!(
                    "elastic IP {} is {}",
                    eip.id, other
                ))
                .into());
            }
        }
        Ok(())
    }

    /// One SNAT entry per NAT table, mapping the zone subnet to its IP
    ///
    /// An entry pointing at another IP is replaced. The IP it used is
    /// unassociated once no entry refers to it any more, and released if
    /// the cluster owns it.
    pub(super) async fn ensure_snat_entry(&self, zone: &str) -> Result<()> {
        let nat = self
            .stored_nat_gateway()
            .await?
            .ok_or_else(|| FlowError::State("NAT gateway is not known yet".into()))?;
        let vswitch_id = self
            .zone_node(zone)
            .get(keys::VSWITCH)
            .ok_or_else(|| FlowError::State(format!("zone {} has no VSwitch", zone)))?;
        let eip = self.zone_eip(zone).await?;

        for table in &nat.snat_table_ids {
            let current: Vec<SnatEntry> = self
                .actor
                .list_snat_entries(table)
                .await?
                .into_iter()
                .filter(|e| e.source_vswitch_id == vswitch_id)
                .collect();
            let desired = SnatEntry {
                snat_table_id: table.clone(),
                source_vswitch_id: vswitch_id.clone(),
                snat_ip: eip.ip_address.clone(),
                ..Default::default()
            };

            let diff = diff_by_id(std::slice::from_ref(&desired), &current, SnatEntry::key);
            if diff.is_unchanged() {
                continue;
            }

            let mut stale_ips = Vec::new();
            for stale in &diff.to_delete {
                self.actor.delete_snat_entry(table, &stale.id).await?;
                if stale.snat_ip != eip.ip_address && !stale_ips.contains(&stale.snat_ip) {
                    stale_ips.push(stale.snat_ip.clone());
                }
            }

            let mut released = Vec::new();
            for ip in &stale_ips {
                let old = self
                    .unassociate_unused_ip(&nat.snat_table_ids, &nat.id, ip)
                    .await?;
                released.extend(old);
            }

            for wanted in &diff.to_create {
                self.actor.create_snat_entry(wanted).await?;
            }

            for old in released {
                if !self.is_owned(&old.tags) {
                    continue;
                }
                info!(zone, allocation_id = %old.id, "Releasing replaced elastic IP");
                self.actor.delete_eip(&old.id).await?;
                let node = self.zone_node(zone);
                if node.get(keys::NAT_GATEWAY_ELASTIC_IP).as_deref() == Some(old.id.as_str())
                    && old.id != eip.id
                {
                    node.set_as_deleted(keys::NAT_GATEWAY_ELASTIC_IP);
                }
                self.persist().await?;
            }
        }
        Ok(())
    }

    /// Unassociate the EIP holding `ip` from the gateway unless an entry still uses it
    async fn unassociate_unused_ip(
        &self,
        tables: &[String],
        nat_id: &str,
        ip: &str,
    ) -> Result<Option<Eip>> {
        for table in tables {
            let in_use = self
                .actor
                .list_snat_entries(table)
                .await?
                .iter()
                .any(|e| e.snat_ip == ip);
            if in_use {
                debug!(ip, "IP still used by another SNAT entry");
                return Ok(None);
            }
        }

        let bound = self
            .actor
            .find_eips_by_instance(nat_id)
            .await?
            .into_iter()
            .find(|e| e.ip_address == ip);
        match bound {
            Some(old) => Ok(Some(self.actor.unassociate_eip(&old.id, nat_id).await?)),
            None => Ok(None),
        }
    }

    /// The EIP a zone egresses through, external or managed
    async fn zone_eip(&self, zone: &str) -> Result<Eip> {
        let id = match self.config.zone(zone).and_then(|z| z.external_eip()) {
            Some(external) => external.to_string(),
            None => self
                .zone_node(zone)
                .get(keys::NAT_GATEWAY_ELASTIC_IP)
                .ok_or_else(|| FlowError::State(format!("zone {} has no elastic IP", zone)))?,
        };
        self.actor
            .get_eip(&id)
            .await?
            .ok_or_else(|| FlowError::State(format!("elastic IP {} disappeared", id)))
    }

    /// Delete every SNAT entry sourcing from a subnet; returns the IPs they used
    pub(super) async fn delete_snat_entries_of(&self, vswitch_id: &str) -> Result<Vec<String>> {
        let mut ips = Vec::new();
        for nat in self.nat_gateways_in_scope().await? {
            for table in &nat.snat_table_ids {
                for entry in self.actor.list_snat_entries(table).await? {
                    if entry.source_vswitch_id == vswitch_id {
                        self.actor.delete_snat_entry(table, &entry.id).await?;
                        if !ips.contains(&entry.snat_ip) {
                            ips.push(entry.snat_ip);
                        }
                    }
                }
            }
        }
        Ok(ips)
    }

    /// Unassociate and release the managed EIP of a zone, then tombstone it
    pub(super) async fn release_zone_eip(&self, zone: &str) -> Result<()> {
        let node = self.zone_node(zone);
        if node.is_already_deleted(keys::NAT_GATEWAY_ELASTIC_IP) {
            return Ok(());
        }

        let found = match node.get(keys::SUFFIX) {
            Some(suffix) => self.find_zone_eip(zone, &suffix).await?,
            None => match node.get(keys::NAT_GATEWAY_ELASTIC_IP) {
                Some(id) => self.actor.get_eip(&id).await?,
                None => None,
            },
        };
        match found {
            Some(eip) => self.release_eip(&eip).await?,
            None => debug!(zone, "No managed elastic IP left"),
        }
        node.set_as_deleted(keys::NAT_GATEWAY_ELASTIC_IP);
        Ok(())
    }

    /// Release the owned EIPs of a subnet no zone node records
    ///
    /// They are found by the name derived from the subnet's own name tag and
    /// by the IPs its SNAT entries used.
    pub(super) async fn release_unrecorded_eips(
        &self,
        vswitch: &VSwitch,
        snat_ips: &[String],
    ) -> Result<()> {
        let mut candidates: Vec<Eip> = Vec::new();
        if let Some(suffix) = self.suffix_of(vswitch) {
            let tags = self.common_tags(&self.eip_name(&suffix));
            candidates.extend(self.actor.find_eips_by_tags(&tags).await?);
        }
        if !snat_ips.is_empty() {
            for nat in self.nat_gateways_in_scope().await? {
                for eip in self.actor.find_eips_by_instance(&nat.id).await? {
                    if snat_ips.contains(&eip.ip_address)
                        && !candidates.iter().any(|c| c.id == eip.id)
                    {
                        candidates.push(eip);
                    }
                }
            }
        }

        for eip in candidates {
            if self.is_owned(&eip.tags) {
                self.release_eip(&eip).await?;
            } else {
                warn!(allocation_id = %eip.id, vswitch_id = %vswitch.id, "Keeping elastic IP not owned by the cluster");
            }
        }
        Ok(())
    }

    /// Zone suffix encoded in a managed subnet's name tag
    fn suffix_of(&self, vswitch: &VSwitch) -> Option<String> {
        let name = vswitch.tags.get(TAG_NAME)?;
        let suffix = name
            .strip_prefix(self.cluster.name.as_str())?
            .strip_prefix('-')?
            .strip_suffix("-nodes")?;
        (!suffix.is_empty()).then(|| suffix.to_string())
    }
}
