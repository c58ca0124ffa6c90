//! Tag reconciliation for existing resources

use crate::actor::Actor;
use crate::error::Result;
use crate::model::{ResourceKind, Tags};
use tracing::debug;

/// Changes needed to turn one tag set into another
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDelta {
    /// Keys to remove, including keys whose value changes
    pub delete: Vec<String>,

    /// Tags to set, including the new value of changed keys
    pub create: Tags,
}

impl TagDelta {
    pub fn is_empty(&self) -> bool {
        self.delete.is_empty() && self.create.is_empty()
    }

    /// Result of applying the delta to `current`, deletes first
    pub fn apply(&self, current: &Tags) -> Tags {
        let mut result = current.clone();
        for key in &self.delete {
            result.remove(key);
        }
        result.extend(self.create.clone());
        result
    }
}

/// Compute the delta from `current` to `desired`
///
/// Keys only present in `current` are kept when `ignore` matches them.
pub fn compute_tag_delta<F>(current: &Tags, desired: &Tags, ignore: F) -> TagDelta
where
    F: Fn(&str) -> bool,
{
    let mut delta = TagDelta::default();

    for (key, value) in current {
        match desired.get(key) {
            Some(wanted) if wanted == value => {}
            Some(_) => delta.delete.push(key.clone()),
            None if ignore(key) => {}
            None => delta.delete.push(key.clone()),
        }
    }

    for (key, value) in desired {
        if current.get(key) != Some(value) {
            delta.create.insert(key.clone(), value.clone());
        }
    }

    delta
}

type IgnoreFn = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Brings the tags of an existing resource in line with a desired set
pub struct TagUpdater {
    ignore: IgnoreFn,
}

impl Default for TagUpdater {
    fn default() -> Self {
        Self {
            ignore: Box::new(|_| false),
        }
    }
}

impl TagUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep foreign tags whose key matches `ignore`
    pub fn with_ignore<F>(ignore: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            ignore: Box::new(ignore),
        }
    }

    pub fn delta(&self, current: &Tags, desired: &Tags) -> TagDelta {
        compute_tag_delta(current, desired, |key| (self.ignore)(key))
    }

    /// Apply the delta on the provider; returns whether anything changed
    pub async fn update(
        &self,
        actor: &dyn Actor,
        kind: ResourceKind,
        id: &str,
        current: &Tags,
        desired: &Tags,
    ) -> Result<bool> {
        let delta = self.delta(current, desired);
        if delta.is_empty() {
            return Ok(false);
        }

        debug!(
            kind = %kind,
            id = %id,
            delete = ?delta.delete,
            create = ?delta.create.keys().collect::<Vec<_>>(),
            "Updating tags"
        );

        actor.delete_tags(kind, id, &delta.delete).await?;
        actor.create_tags(kind, id, &delta.create).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ClientActor;
    use crate::model::{Vpc, status};
    use crate::poll::PollConfig;
    use crate::testing::FakeCloud;
    use std::sync::Arc;
    use std::time::Duration;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_delta_no_op_when_equal() {
        let current = tags(&[("Name", "dev-vpc"), ("owner", "team")]);
        let delta = compute_tag_delta(&current, &current, |_| false);
        assert!(delta.is_empty());
    }

    #[test]
    fn test_delta_changed_value_deletes_then_creates() {
        let current = tags(&[("Name", "old"), ("stale", "x")]);
        let desired = tags(&[("Name", "new"), ("fresh", "y")]);

        let delta = compute_tag_delta(&current, &desired, |_| false);
        assert_eq!(delta.delete, vec!["Name".to_string(), "stale".to_string()]);
        assert_eq!(delta.create, tags(&[("Name", "new"), ("fresh", "y")]));
        assert_eq!(delta.apply(&current), desired);
    }

    #[test]
    fn test_delta_respects_ignore() {
        let current = tags(&[("Name", "dev"), ("acs:managed", "1")]);
        let desired = tags(&[("Name", "dev")]);

        let delta = compute_tag_delta(&current, &desired, |k| k.starts_with("acs:"));
        assert!(delta.is_empty());
    }

    /// Applying the delta always yields the desired tags.
    #[test]
    fn test_apply_converges_for_all_subsets() {
        let keys = ["a", "b", "c", "d"];
        let values = ["1", "2"];
        let mut maps = Vec::new();
        for mask in 0..(1u32 << keys.len()) {
            for flip in 0..2usize {
                let map: Tags = keys
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .map(|(i, k)| (k.to_string(), values[(i + flip) % 2].to_string()))
                    .collect();
                maps.push(map);
            }
        }

        for current in &maps {
            for desired in &maps {
                let delta = compute_tag_delta(current, desired, |_| false);
                assert_eq!(&delta.apply(current), desired);
                assert_eq!(delta.is_empty(), current == desired);
            }
        }
    }

    #[tokio::test]
    async fn test_update_on_provider() {
        let cloud = Arc::new(FakeCloud::new());
        cloud.insert_vpc(Vpc {
            id: "vpc-1".into(),
            status: status::AVAILABLE.into(),
            tags: tags(&[("Name", "old"), ("stale", "x")]),
            ..Default::default()
        });
        let actor = ClientActor::new(cloud.clone())
            .with_poll(PollConfig::new(Duration::from_millis(1), Duration::from_secs(1)));
        let desired = tags(&[("Name", "dev-vpc")]);

        let updater = TagUpdater::new();
        let current = actor.get_vpc("vpc-1").await.unwrap().unwrap().tags;
        assert!(
            updater
                .update(&actor, ResourceKind::Vpc, "vpc-1", &current, &desired)
                .await
                .unwrap()
        );
        assert_eq!(actor.get_vpc("vpc-1").await.unwrap().unwrap().tags, desired);

        let calls = cloud.mutation_calls();
        let untag = calls.iter().position(|c| c == "UntagResources").unwrap();
        let tag = calls.iter().position(|c| c == "TagResources").unwrap();
        assert!(untag < tag);

        cloud.clear_calls();
        assert!(
            !updater
                .update(&actor, ResourceKind::Vpc, "vpc-1", &desired, &desired)
                .await
                .unwrap()
        );
        assert!(cloud.mutation_calls().is_empty());
    }
}
