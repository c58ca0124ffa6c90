use infraflow_cloud::testing::FakeCloud;
use infraflow_cloud::{ClientActor, NatGateway, PollConfig, RetryConfig, VSwitch, Vpc, status};
use infraflow_core::{
    ClusterInfo, FlowContext, FlowOptions, InfrastructureConfig, MemoryPersister, Whiteboard,
};
use std::sync::Arc;
use std::time::Duration;

pub const CLUSTER: &str = "shoot--dev--prod";

pub const TWO_ZONES: &str = r#"
networks:
  vpc:
    cidr: 10.0.0.0/16
  zones:
    - name: eu-central-1a
      workers: 10.0.0.0/19
    - name: eu-central-1b
      workers: 10.0.32.0/19
"#;

pub const ONE_ZONE: &str = r#"
networks:
  vpc:
    cidr: 10.0.0.0/16
  zones:
    - name: eu-central-1a
      workers: 10.0.0.0/19
"#;

#[allow(dead_code)]
pub const EXTERNAL_VPC: &str = r#"
networks:
  vpc:
    id: vpc-external
  zones:
    - name: eu-central-1a
      workers: 10.0.0.0/19
"#;

/// Fake provider plus the persisted state carried between passes
pub struct Harness {
    pub cloud: Arc<FakeCloud>,
    pub persister: Arc<MemoryPersister>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            cloud: Arc::new(FakeCloud::new()),
            persister: Arc::new(MemoryPersister::new()),
        }
    }

    fn actor(&self) -> Arc<ClientActor> {
        Arc::new(
            ClientActor::new(self.cloud.clone())
                .with_retry(RetryConfig::new(3, Duration::from_millis(1)))
                .with_poll(PollConfig::new(
                    Duration::from_millis(1),
                    Duration::from_secs(5),
                )),
        )
    }

    /// Context starting from the last persisted state, if any
    pub fn context(&self, config: &str) -> FlowContext {
        let state = match self.persister.last() {
            Some(persisted) => Whiteboard::from_persisted(&persisted).unwrap(),
            None => Whiteboard::new(),
        };
        self.context_with_state(config, state)
    }

    pub fn context_with_state(&self, config: &str, state: Whiteboard) -> FlowContext {
        let config = InfrastructureConfig::parse(config).unwrap();
        let cluster = ClusterInfo::new(CLUSTER, "eu-central-1").with_pod_cidr("100.96.0.0/11");
        FlowContext::new(config, cluster, self.actor(), self.persister.clone()).with_state(state)
    }

    #[allow(dead_code)]
    pub fn authorized(&self, config: &str) -> FlowContext {
        self.context(config).with_options(FlowOptions {
            authorize_destructive: true,
            ..FlowOptions::default()
        })
    }

    #[allow(dead_code)]
    /// Flat key of the last persisted state
    pub fn persisted(&self, key: &str) -> Option<String> {
        self.persister
            .last()
            .and_then(|state| state.data.get(key).cloned())
    }
}

/// Ownership and name tags the engine puts on a resource
#[allow(dead_code)]
pub fn owned_tags(name: &str) -> infraflow_cloud::Tags {
    [
        (format!("kubernetes.io/cluster/{}", CLUSTER), "1".to_string()),
        ("Name".to_string(), name.to_string()),
    ]
    .into_iter()
    .collect()
}

/// A VPC with one subnet and one NAT gateway the cluster does not own
#[allow(dead_code)]
pub fn external_vpc(h: &Harness) {
    h.cloud.insert_vpc(Vpc {
        id: "vpc-external".into(),
        name: "shared".into(),
        cidr_block: "10.0.0.0/16".into(),
        status: status::AVAILABLE.into(),
        ..Default::default()
    });
    h.cloud.insert_vswitch(VSwitch {
        id: "vsw-shared".into(),
        vpc_id: "vpc-external".into(),
        zone_id: "eu-central-1a".into(),
        cidr_block: "10.0.200.0/24".into(),
        status: status::AVAILABLE.into(),
        ..Default::default()
    });
    h.cloud.insert_nat_gateway(NatGateway {
        id: "ngw-shared".into(),
        vpc_id: "vpc-external".into(),
        vswitch_id: "vsw-shared".into(),
        snat_table_ids: vec!["stb-shared".into()],
        status: status::AVAILABLE.into(),
        ..Default::default()
    });
}
