use super::FlowContext;
use crate::error::Result;
use crate::graph::{Graph, TaskOptions};
use crate::keys;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

impl FlowContext {
    /// Delete everything the whiteboard records, in reverse dependency order
    ///
    /// Deleted resources are tombstoned, so running the pass again after a
    /// partial failure only retries what is left.
    #[instrument(skip_all, fields(cluster = %self.cluster.name))]
    pub async fn delete(&self, cancel: &CancellationToken) -> Result<()> {
        if self.state.is_empty() {
            info!("Nothing recorded, nothing to delete");
            return Ok(());
        }

        let result = self.build_delete_graph().compile()?.run(cancel).await;
        let persisted = self.persist().await;
        result?;
        persisted?;

        info!("Deleted infrastructure");
        Ok(())
    }

    fn build_delete_graph(&self) -> Graph {
        let mut graph = Graph::new("delete");

        let mut zones: Vec<String> = self
            .config
            .networks
            .zones
            .iter()
            .map(|z| z.name.clone())
            .collect();
        for zone in self.zones_node().children_keys() {
            if !zones.contains(&zone) {
                zones.push(zone);
            }
        }

        let mut zone_tasks = Vec::with_capacity(zones.len());
        for zone in zones {
            let id = self.add_task(
                &mut graph,
                format!("delete-zone-{}", zone),
                TaskOptions::new().timeout(self.long_timeout()),
                move |ctx| async move { ctx.delete_zone_egress(&zone).await },
            );
            zone_tasks.push(id);
        }

        let managed_nat = self.config.manages_nat_gateway();
        let nat = self.add_task(
            &mut graph,
            "delete-nat-gateway",
            TaskOptions::new()
                .timeout(self.long_timeout())
                .depends_on_all(zone_tasks)
                .run_if(move || managed_nat),
            |ctx| async move { ctx.delete_nat_gateway().await },
        );
        let vswitches = self.add_task(
            &mut graph,
            "delete-vswitches",
            TaskOptions::new()
                .timeout(self.long_timeout())
                .depends_on(nat),
            |ctx| async move { ctx.delete_vswitches().await },
        );
        let security_group = self.add_task(
            &mut graph,
            "delete-security-group",
            TaskOptions::new().timeout(self.short_timeout()),
            |ctx| async move { ctx.delete_security_group().await },
        );

        let managed_vpc = self.config.external_vpc_id().is_none();
        self.add_task(
            &mut graph,
            "delete-vpc",
            TaskOptions::new()
                .timeout(self.short_timeout())
                .depends_on(vswitches)
                .depends_on(security_group)
                .run_if(move || managed_vpc),
            |ctx| async move { ctx.delete_vpc().await },
        );

        graph
    }

    async fn delete_zone_egress(&self, zone: &str) -> Result<()> {
        if let Some(vswitch_id) = self.zone_node(zone).get(keys::VSWITCH) {
            self.delete_snat_entries_of(&vswitch_id).await?;
        }
        self.release_zone_eip(zone).await
    }

    async fn delete_nat_gateway(&self) -> Result<()> {
        if self.state.is_already_deleted(keys::NAT_GATEWAY) {
            return Ok(());
        }
        let Some(nat) = self.find_nat_gateway().await? else {
            debug!("NAT gateway already gone");
            self.state.set_as_deleted(keys::NAT_GATEWAY);
            return Ok(());
        };

        for table in &nat.snat_table_ids {
            for entry in self.actor.list_snat_entries(table).await? {
                self.actor.delete_snat_entry(table, &entry.id).await?;
            }
        }
        for eip in self.actor.find_eips_by_instance(&nat.id).await? {
            self.actor.unassociate_eip(&eip.id, &nat.id).await?;
        }

        self.actor.delete_nat_gateway(&nat.id).await?;
        self.state.set_as_deleted(keys::NAT_GATEWAY);
        Ok(())
    }

    async fn delete_vswitches(&self) -> Result<()> {
        let zones = self.zones_node();
        let recorded: Vec<String> = zones
            .children_keys()
            .iter()
            .filter_map(|zone| zones.child(zone).get(keys::VSWITCH))
            .collect();
        let vswitches = match self.state.get(keys::VPC) {
            Some(vpc_id) => self.current_vswitches(&vpc_id).await?,
            None => self.actor.list_vswitches(&recorded).await?,
        };

        for vswitch in &vswitches {
            let snat_ips = self.delete_snat_entries_of(&vswitch.id).await?;
            if !recorded.contains(&vswitch.id) {
                self.release_unrecorded_eips(vswitch, &snat_ips).await?;
            }
            self.actor.delete_vswitch(&vswitch.id).await?;
        }

        for zone in zones.children_keys() {
            zones.clean_child(&zone);
        }
        Ok(())
    }

    async fn delete_security_group(&self) -> Result<()> {
        if self.state.is_already_deleted(keys::NODES_SECURITY_GROUP) {
            return Ok(());
        }
        if let Some(group) = self.find_security_group().await? {
            self.actor.delete_security_group(&group.id).await?;
        }
        self.state.set_as_deleted(keys::NODES_SECURITY_GROUP);
        Ok(())
    }

    async fn delete_vpc(&self) -> Result<()> {
        if self.state.is_already_deleted(keys::VPC) {
            return Ok(());
        }
        if let Some(vpc) = self.find_vpc().await? {
            self.actor.delete_vpc(&vpc.id).await?;
        }
        self.state.set_as_deleted(keys::VPC);
        Ok(())
    }
}
