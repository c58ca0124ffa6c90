//! Migration from terraform managed clusters
//!
//! A cluster provisioned by the legacy terraform based tool carries that
//! tool's state blob. [`migrate_terraform_state`] reads the identifiers out
//! of it and writes them to a fresh [`Whiteboard`], so the first reconcile
//! adopts the existing resources instead of creating new ones.

use crate::config::InfrastructureConfig;
use crate::error::{FlowError, Result};
use crate::keys;
use crate::whiteboard::{PersistedState, Whiteboard};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;
use tracing::{debug, info, warn};

const MAX_DECODE_DEPTH: usize = 4;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

const RESOURCE_VSWITCH: &str = "alicloud_vswitch";
const RESOURCE_SECURITY_GROUP: &str = "alicloud_security_group";
const RESOURCE_NAT_GATEWAY: &str = "alicloud_nat_gateway";
const VSWITCH_PREFIX: &str = "vsw_";
const EIP_PREFIX: &str = "eip_natgw_";

/// The parts of a terraform state file the migration reads
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TerraformState {
    #[serde(default)]
    pub outputs: BTreeMap<String, TerraformOutput>,
    #[serde(default)]
    pub resources: Vec<TerraformResource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerraformOutput {
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerraformResource {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub instances: Vec<TerraformInstance>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TerraformInstance {
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl TerraformState {
    /// String value of an output, if present and non-empty
    pub fn output(&self, name: &str) -> Option<&str> {
        self.outputs
            .get(name)
            .and_then(|o| o.value.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Managed resources of a type
    pub fn managed(&self, kind: &str) -> impl Iterator<Item = &TerraformResource> {
        self.resources
            .iter()
            .filter(move |r| r.kind == kind && r.mode.as_deref().is_none_or(|m| m == "managed"))
    }
}

impl TerraformResource {
    fn first_attribute(&self, name: &str) -> Option<&str> {
        self.instances
            .iter()
            .find_map(|i| i.attributes.get(name).and_then(|v| v.as_str()))
            .filter(|s| !s.is_empty())
    }

    fn id(&self) -> Option<&str> {
        self.first_attribute("id")
    }
}

#[derive(Deserialize)]
struct Envelope {
    data: String,
    #[serde(default)]
    encoding: Option<String>,
}

/// Decode a legacy state blob
///
/// Accepts plain terraform JSON, base64 encoded JSON, base64 encoded gzip
/// JSON, and a `{"data": ..., "encoding": "base64"}` envelope around any of
/// these.
pub fn decode_terraform_state(blob: &[u8]) -> Result<TerraformState> {
    decode_at_depth(blob, 0)
}

fn decode_at_depth(blob: &[u8], depth: usize) -> Result<TerraformState> {
    if depth > MAX_DECODE_DEPTH {
        return Err(FlowError::Migration("terraform state is nested too deeply".into()));
    }

    if blob.starts_with(&GZIP_MAGIC) {
        let mut inflated = Vec::new();
        GzDecoder::new(blob)
            .read_to_end(&mut inflated)
            .map_err(|e| FlowError::Migration(format!("invalid gzip data: {}", e)))?;
        return decode_at_depth(&inflated, depth + 1);
    }

    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(blob) {
        if value.get("data").is_some_and(|d| d.is_string()) {
            let envelope: Envelope = serde_json::from_value(value)?;
            if let Some(encoding) = envelope.encoding.as_deref() {
                if encoding != "base64" {
                    return Err(FlowError::Migration(format!(
                        "unsupported encoding {:?}",
                        encoding
                    )));
                }
            }
            debug!("Unwrapping terraform state envelope");
            return decode_at_depth(envelope.data.as_bytes(), depth + 1);
        }
        if value.is_object() {
            return Ok(serde_json::from_value(value)?);
        }
    }

    let text: Vec<u8> = blob
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let decoded = STANDARD.decode(&text).map_err(|e| {
        FlowError::Migration(format!("terraform state is neither JSON nor base64: {}", e))
    })?;
    decode_at_depth(&decoded, depth + 1)
}

/// Translate a terraform state into a whiteboard
///
/// Zone subnets are matched by their zone attribute, falling back to the
/// configured zone at the index named by their `zN` suffix.
pub fn migrate_terraform_state(
    state: &TerraformState,
    config: &InfrastructureConfig,
) -> Result<Whiteboard> {
    let board = Whiteboard::new();

    let vpc_id = state
        .output("vpc_id")
        .ok_or_else(|| FlowError::Migration("terraform state has no vpc_id output".into()))?;
    board.set(keys::VPC, vpc_id);

    let security_group = state
        .output("sg_id")
        .or_else(|| state.managed(RESOURCE_SECURITY_GROUP).find_map(|r| r.id()));
    if let Some(id) = security_group {
        board.set(keys::NODES_SECURITY_GROUP, id);
    }

    let nat_gateway = state
        .output("nat_gateway_id")
        .or_else(|| state.managed(RESOURCE_NAT_GATEWAY).find_map(|r| r.id()));
    if let Some(id) = nat_gateway {
        board.set(keys::NAT_GATEWAY, id);
    }

    let zones = board.child(keys::ZONES);

    for resource in state.managed(RESOURCE_VSWITCH) {
        let Some(suffix) = resource.name.strip_prefix(VSWITCH_PREFIX) else {
            continue;
        };
        let Some(id) = resource.id() else {
            warn!(resource = %resource.name, "VSwitch without ID, skipping");
            continue;
        };
        let zone = resource
            .first_attribute("zone_id")
            .or_else(|| resource.first_attribute("availability_zone"))
            .filter(|z| config.zone(z).is_some())
            .or_else(|| zone_by_suffix(config, suffix))
            .ok_or_else(|| {
                FlowError::Migration(format!(
                    "cannot map VSwitch {} ({}) to a configured zone",
                    resource.name, id
                ))
            })?;

        let node = zones.child(zone);
        node.set(keys::VSWITCH, id);
        node.set(keys::SUFFIX, suffix);
        debug!(zone, vswitch_id = %id, suffix, "Migrated VSwitch");
    }

    for (name, output) in &state.outputs {
        let Some(suffix) = name.strip_prefix(EIP_PREFIX) else {
            continue;
        };
        let Some(id) = output.value.as_str().filter(|s| !s.is_empty()) else {
            continue;
        };
        let zone = zones
            .children_keys()
            .into_iter()
            .find(|z| zones.child(z).get(keys::SUFFIX).as_deref() == Some(suffix))
            .or_else(|| zone_by_suffix(config, suffix).map(str::to_string));
        let Some(zone) = zone else {
            warn!(output = %name, "Elastic IP does not map to a configured zone, skipping");
            continue;
        };

        let node = zones.child(&zone);
        node.set(keys::NAT_GATEWAY_ELASTIC_IP, id);
        if node.get(keys::SUFFIX).is_none() {
            node.set(keys::SUFFIX, suffix);
        }
        debug!(zone = %zone, allocation_id = %id, "Migrated elastic IP");
    }

    board.set_migrated_from_terraform();
    info!(vpc_id = %vpc_id, zones = zones.children_keys().len(), "Migrated terraform state");
    Ok(board)
}

/// Configured zone at the index of a `zN` suffix
fn zone_by_suffix<'a>(config: &'a InfrastructureConfig, suffix: &str) -> Option<&'a str> {
    let index: usize = suffix.strip_prefix('z')?.parse().ok()?;
    config.networks.zones.get(index).map(|z| z.name.as_str())
}

/// Whiteboard to start a pass from
///
/// A persisted state wins; otherwise a legacy terraform blob is migrated;
/// otherwise the pass starts from scratch.
pub fn prepare_whiteboard(
    persisted: Option<&PersistedState>,
    legacy: Option<&[u8]>,
    config: &InfrastructureConfig,
) -> Result<Whiteboard> {
    if let Some(state) = persisted.filter(|s| !s.data.is_empty()) {
        return Whiteboard::from_persisted(state);
    }
    match legacy {
        Some(blob) => migrate_terraform_state(&decode_terraform_state(blob)?, config),
        None => Ok(Whiteboard::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    const STATE: &str = r#"{
        "version": 4,
        "outputs": {
            "vpc_id": {"value": "v-1", "type": "string"},
            "sg_id": {"value": "sg-1", "type": "string"}
        },
        "resources": [
            {
                "mode": "managed",
                "type": "alicloud_vswitch",
                "name": "vsw_z0",
                "instances": [{"attributes": {"id": "sw-1"}}]
            }
        ]
    }"#;

    fn config() -> InfrastructureConfig {
        InfrastructureConfig::parse(
            r#"
networks:
  vpc:
    cidr: 10.0.0.0/16
  zones:
    - name: eu-central-1a
      workers: 10.0.0.0/19
    - name: eu-central-1b
      workers: 10.0.32.0/19
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_migrate_basic_state() {
        let state = decode_terraform_state(STATE.as_bytes()).unwrap();
        let board = migrate_terraform_state(&state, &config()).unwrap();

        assert_eq!(board.get(keys::VPC).as_deref(), Some("v-1"));
        assert_eq!(board.get(keys::NODES_SECURITY_GROUP).as_deref(), Some("sg-1"));
        let zone = board.child(keys::ZONES).child("eu-central-1a");
        assert_eq!(zone.get(keys::VSWITCH).as_deref(), Some("sw-1"));
        assert_eq!(zone.get(keys::SUFFIX).as_deref(), Some("z0"));
        assert!(board.migrated_from_terraform());
        assert!(!board.terraform_cleaned_up());
    }

    #[test]
    fn test_migrate_zone_attribute_and_fallbacks() {
        let state: TerraformState = serde_json::from_str(
            r#"{
            "outputs": {
                "vpc_id": {"value": "v-1"},
                "eip_natgw_z0": {"value": "eip-a"},
                "eip_natgw_z1": {"value": "eip-b"}
            },
            "resources": [
                {"type": "alicloud_security_group", "name": "nodes",
                 "instances": [{"attributes": {"id": "sg-9"}}]},
                {"type": "alicloud_nat_gateway", "name": "nat_gateway",
                 "instances": [{"attributes": {"id": "ngw-9"}}]},
                {"type": "alicloud_vswitch", "name": "vsw_z0",
                 "instances": [{"attributes": {"id": "sw-b", "zone_id": "eu-central-1b"}}]},
                {"type": "alicloud_vswitch", "name": "vsw_z1",
                 "instances": [{"attributes": {"id": "sw-a", "availability_zone": "eu-central-1a"}}]},
                {"mode": "data", "type": "alicloud_vswitch", "name": "vsw_z9",
                 "instances": [{"attributes": {"id": "sw-data"}}]}
            ]
        }"#,
        )
        .unwrap();
        let board = migrate_terraform_state(&state, &config()).unwrap();

        assert_eq!(board.get(keys::NODES_SECURITY_GROUP).as_deref(), Some("sg-9"));
        assert_eq!(board.get(keys::NAT_GATEWAY).as_deref(), Some("ngw-9"));

        let zones = board.child(keys::ZONES);
        let b = zones.child("eu-central-1b");
        assert_eq!(b.get(keys::VSWITCH).as_deref(), Some("sw-b"));
        assert_eq!(b.get(keys::SUFFIX).as_deref(), Some("z0"));
        assert_eq!(b.get(keys::NAT_GATEWAY_ELASTIC_IP).as_deref(), Some("eip-a"));

        let a = zones.child("eu-central-1a");
        assert_eq!(a.get(keys::SUFFIX).as_deref(), Some("z1"));
        assert_eq!(a.get(keys::NAT_GATEWAY_ELASTIC_IP).as_deref(), Some("eip-b"));
        assert_eq!(zones.children_keys().len(), 2);
    }

    #[test]
    fn test_migrate_requires_vpc() {
        let state: TerraformState = serde_json::from_str(r#"{"outputs": {}}"#).unwrap();
        let err = migrate_terraform_state(&state, &config()).unwrap_err();
        assert!(matches!(err, FlowError::Migration(_)));
    }

    #[test]
    fn test_unmappable_vswitch_is_an_error() {
        let state: TerraformState = serde_json::from_str(
            r#"{
            "outputs": {"vpc_id": {"value": "v-1"}},
            "resources": [{"type": "alicloud_vswitch", "name": "vsw_z7",
                           "instances": [{"attributes": {"id": "sw-7"}}]}]
        }"#,
        )
        .unwrap();
        assert!(migrate_terraform_state(&state, &config()).is_err());
    }

    #[test]
    fn test_decode_encodings() {
        let plain = decode_terraform_state(STATE.as_bytes()).unwrap();
        assert_eq!(plain.output("vpc_id"), Some("v-1"));

        let encoded = STANDARD.encode(STATE);
        let state = decode_terraform_state(encoded.as_bytes()).unwrap();
        assert_eq!(state.output("vpc_id"), Some("v-1"));

        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(STATE.as_bytes()).unwrap();
        let zipped = STANDARD.encode(gz.finish().unwrap());
        let state = decode_terraform_state(zipped.as_bytes()).unwrap();
        assert_eq!(state.output("sg_id"), Some("sg-1"));

        let envelope = serde_json::json!({"data": zipped, "encoding": "base64"}).to_string();
        let state = decode_terraform_state(envelope.as_bytes()).unwrap();
        assert_eq!(state.resources.len(), 1);

        assert!(decode_terraform_state(b"not a state !!").is_err());
    }

    #[test]
    fn test_prepare_prefers_persisted_state() {
        let persisted = PersistedState::new(BTreeMap::from([(
            "VPC".to_string(),
            "vpc-7".to_string(),
        )]));
        let board =
            prepare_whiteboard(Some(&persisted), Some(STATE.as_bytes()), &config()).unwrap();
        assert_eq!(board.get(keys::VPC).as_deref(), Some("vpc-7"));
        assert!(!board.migrated_from_terraform());

        let board = prepare_whiteboard(None, Some(STATE.as_bytes()), &config()).unwrap();
        assert_eq!(board.get(keys::VPC).as_deref(), Some("v-1"));

        let board = prepare_whiteboard(None, None, &config()).unwrap();
        assert!(board.is_empty());
    }
}
