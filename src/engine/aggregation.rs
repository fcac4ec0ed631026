//! Aggregation pipeline: validate, confidence-filter, deduplicate and
//! relationship-infer one discovery fan-out's concatenated output.
//!
//! Stage order is fixed. A record that fails a stage is dropped with a log
//! line; nothing here aborts a batch.

use crate::config::{AggregationSettings, DeduplicationStrategy};
use crate::domain::{clamp_confidence, merge_dependencies, merge_endpoints, DiscoveredService};
use std::collections::{BTreeMap, HashMap};
use url::Url;

pub struct Aggregator {
    settings: AggregationSettings,
    /// Source priority map; lower numbers merge first so later (less
    /// preferred) sources overwrite earlier metadata keys deterministically.
    priorities: HashMap<String, i32>,
}

impl Aggregator {
    pub fn new(settings: AggregationSettings, priorities: HashMap<String, i32>) -> Self {
        Self {
            settings,
            priorities,
        }
    }

    pub fn aggregate(&self, records: Vec<DiscoveredService>) -> Vec<DiscoveredService> {
        let validated = self.validate(records);
        let filtered = self.filter_by_confidence(validated);
        let mut deduplicated = self.deduplicate(filtered);
        if self.settings.relationship_inference {
            infer_relationships(&mut deduplicated);
        }
        deduplicated
    }

    fn validate(&self, records: Vec<DiscoveredService>) -> Vec<DiscoveredService> {
        records
            .into_iter()
            .filter(|record| match validate_record(record) {
                Ok(()) => true,
                Err(reason) => {
                    tracing::warn!(
                        source = %record.source,
                        id = %record.id,
                        reason,
                        "dropping record failing schema validation"
                    );
                    false
                }
            })
            .collect()
    }

    fn filter_by_confidence(&self, records: Vec<DiscoveredService>) -> Vec<DiscoveredService> {
        let threshold = self.settings.confidence_threshold;
        records
            .into_iter()
            .filter(|record| {
                let keep = record.confidence >= threshold;
                if !keep {
                    tracing::debug!(
                        source = %record.source,
                        id = %record.id,
                        confidence = record.confidence,
                        threshold,
                        "dropping record below confidence threshold"
                    );
                }
                keep
            })
            .collect()
    }

    fn deduplicate(&self, records: Vec<DiscoveredService>) -> Vec<DiscoveredService> {
        let mut groups: BTreeMap<String, Vec<DiscoveredService>> = BTreeMap::new();
        for record in records {
            groups.entry(dedup_key(&record)).or_default().push(record);
        }

        groups
            .into_values()
            .map(|mut group| {
                if group.len() == 1 {
                    return group.pop().expect("non-empty group");
                }
                self.sort_by_priority(&mut group);
                match self.settings.deduplication_strategy {
                    DeduplicationStrategy::Latest => group
                        .into_iter()
                        .max_by_key(|record| record.last_seen)
                        .expect("non-empty group"),
                    DeduplicationStrategy::HighestConfidence => group
                        .into_iter()
                        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
                        .expect("non-empty group"),
                    DeduplicationStrategy::Merge => merge_group(group),
                }
            })
            .collect()
    }

    fn sort_by_priority(&self, group: &mut [DiscoveredService]) {
        group.sort_by(|a, b| {
            let pa = self.priorities.get(&a.source).copied().unwrap_or(i32::MAX);
            let pb = self.priorities.get(&b.source).copied().unwrap_or(i32::MAX);
            pa.cmp(&pb).then_with(|| a.source.cmp(&b.source))
        });
    }
}

fn validate_record(record: &DiscoveredService) -> Result<(), &'static str> {
    if record.id.trim().is_empty() {
        return Err("missing id");
    }
    if record.name.trim().is_empty() {
        return Err("missing name");
    }
    if record.source.trim().is_empty() {
        return Err("missing source");
    }
    if record.confidence.is_nan() || !(0.0..=1.0).contains(&record.confidence) {
        return Err("confidence outside [0, 1]");
    }
    Ok(())
}

/// Lowercased name plus primary endpoint URL. Two services with the same
/// name on different endpoints never merge; same name with no endpoint
/// always does. Heuristic, kept deliberately.
pub fn dedup_key(record: &DiscoveredService) -> String {
    format!(
        "{}::{}",
        record.name.to_lowercase(),
        record.primary_endpoint_url()
    )
}

/// Merge a priority-sorted group: the highest-confidence record supplies
/// the identity fields, while metadata, endpoints and dependencies fold
/// over the whole group in its sorted order, so a later record in that
/// order overwrites earlier metadata keys regardless of which record won
/// the identity. Confidence is the group maximum, never a sum.
fn merge_group(group: Vec<DiscoveredService>) -> DiscoveredService {
    let base_index = group
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.confidence.total_cmp(&b.confidence))
        .map(|(index, _)| index)
        .expect("non-empty group");

    let mut merged = group[base_index].clone();
    merged.metadata.clear();
    merged.endpoints.clear();
    merged.dependencies.clear();
    for record in &group {
        for (key, value) in &record.metadata {
            merged.metadata.insert(key.clone(), value.clone());
        }
        merge_endpoints(&mut merged.endpoints, &record.endpoints);
        merge_dependencies(&mut merged.dependencies, &record.dependencies);
        if record.last_seen > merged.last_seen {
            merged.last_seen = record.last_seen;
        }
        if record.discovered_at < merged.discovered_at {
            merged.discovered_at = record.discovered_at;
        }
        merged.confidence = clamp_confidence(merged.confidence.max(record.confidence));
        if merged.owner.is_none() {
            merged.owner = record.owner.clone();
        }
        if merged.repository.is_none() {
            merged.repository = record.repository.clone();
        }
        if merged.deployment.is_none() {
            merged.deployment = record.deployment.clone();
        }
        if merged.metrics.is_none() {
            merged.metrics = record.metrics.clone();
        }
    }
    merged
}

/// O(n^2) over the batch: for each ordered pair (a, b), add b as an
/// inferred dependency of a when a already names b, or when b's name or an
/// endpoint host of b shows up in a's serialized metadata. Batches are
/// small relative to the catalog, which keeps this affordable.
fn infer_relationships(services: &mut [DiscoveredService]) {
    struct Candidate {
        id: String,
        name: String,
        hosts: Vec<String>,
    }

    let candidates: Vec<Candidate> = services
        .iter()
        .map(|service| Candidate {
            id: service.id.clone(),
            name: service.name.clone(),
            hosts: service
                .endpoints
                .iter()
                .filter_map(|endpoint| {
                    Url::parse(&endpoint.url)
                        .ok()
                        .and_then(|url| url.host_str().map(str::to_string))
                })
                .collect(),
        })
        .collect();

    for (a_index, service) in services.iter_mut().enumerate() {
        let metadata_blob = serde_json::to_string(&service.metadata).unwrap_or_default();
        for (b_index, candidate) in candidates.iter().enumerate() {
            if a_index == b_index || service.id == candidate.id {
                continue;
            }
            if service.dependencies.iter().any(|dep| dep == &candidate.id) {
                continue;
            }

            let already_named = service
                .dependencies
                .iter()
                .any(|dep| dep == &candidate.name);
            let metadata_mentions = metadata_blob.contains(&candidate.name)
                || candidate.hosts.iter().any(|host| metadata_blob.contains(host));

            if already_named || metadata_mentions {
                service.dependencies.push(candidate.id.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DiscoveredService, Endpoint, ServiceType};
    use serde_json::json;

    fn aggregator(strategy: DeduplicationStrategy) -> Aggregator {
        Aggregator::new(
            AggregationSettings {
                deduplication_strategy: strategy,
                relationship_inference: false,
                confidence_threshold: 0.5,
            },
            HashMap::new(),
        )
    }

    fn observation(source: &str, name: &str, confidence: f64) -> DiscoveredService {
        DiscoveredService::new(source, name, name, ServiceType::Api, confidence)
    }

    #[test]
    fn invalid_records_are_dropped_without_failing_the_batch() {
        let mut bad = observation("k8s", "orders", 0.9);
        bad.name = String::new();
        let good = observation("k8s", "billing", 0.9);

        let result = aggregator(DeduplicationStrategy::Merge).aggregate(vec![bad, good]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name, "billing");
    }

    #[test]
    fn confidence_threshold_filters_low_scores() {
        let result = aggregator(DeduplicationStrategy::Merge).aggregate(vec![
            observation("k8s", "orders", 0.4),
            observation("k8s", "billing", 0.5),
        ]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name, "billing");
    }

    #[test]
    fn identical_keys_converge_to_one_record_per_strategy() {
        for strategy in [
            DeduplicationStrategy::Latest,
            DeduplicationStrategy::HighestConfidence,
            DeduplicationStrategy::Merge,
        ] {
            let records = vec![
                observation("k8s", "orders", 0.6),
                observation("aws", "orders", 0.8),
                observation("git", "orders", 0.7),
            ];
            let result = aggregator(strategy).aggregate(records);
            assert_eq!(result.len(), 1, "strategy {strategy:?} must converge");
        }
    }

    #[test]
    fn merge_unions_metadata_and_keeps_highest_confidence_identity() {
        let first = observation("k8s", "orders", 0.6)
            .with_endpoint(Endpoint::new("https://orders.svc"))
            .with_metadata("lang", json!("go"));
        let second = observation("catalog", "orders", 0.9)
            .with_endpoint(Endpoint::new("https://orders.svc"))
            .with_metadata("owner", json!("team-x"));

        let result = aggregator(DeduplicationStrategy::Merge).aggregate(vec![first, second]);
        assert_eq!(result.len(), 1);
        let merged = &result[0];
        assert_eq!(merged.source, "catalog");
        assert_eq!(merged.confidence, 0.9);
        assert_eq!(merged.metadata["lang"], json!("go"));
        assert_eq!(merged.metadata["owner"], json!("team-x"));
        assert_eq!(merged.endpoints.len(), 1);
    }

    #[test]
    fn conflicting_metadata_keys_follow_priority_order_not_base_identity() {
        let priorities = HashMap::from([("early".to_string(), 10), ("late".to_string(), 20)]);
        let aggregator = Aggregator::new(
            AggregationSettings {
                deduplication_strategy: DeduplicationStrategy::Merge,
                relationship_inference: false,
                confidence_threshold: 0.5,
            },
            priorities,
        );

        let early = observation("early", "orders", 0.6)
            .with_endpoint(Endpoint::new("https://orders.svc"))
            .with_metadata("lang", json!("go-from-early"));
        let late = observation("late", "orders", 0.9)
            .with_endpoint(Endpoint::new("https://orders.svc"))
            .with_metadata("lang", json!("rust-from-late"));

        // input order must not matter
        let result = aggregator.aggregate(vec![late, early]);
        assert_eq!(result.len(), 1);
        let merged = &result[0];
        assert_eq!(merged.source, "late", "identity follows the higher confidence");
        assert_eq!(
            merged.metadata["lang"],
            json!("rust-from-late"),
            "the later entry in priority order wins a conflicting key"
        );
    }

    #[test]
    fn merged_endpoints_have_unique_urls() {
        let first = observation("k8s", "orders", 0.7)
            .with_endpoint(Endpoint::new("https://orders.svc"))
            .with_endpoint(Endpoint::new("grpc://orders.svc:8443"));
        let second = observation("aws", "orders", 0.6)
            .with_endpoint(Endpoint::new("https://orders.svc"));

        let mut result = aggregator(DeduplicationStrategy::Merge).aggregate(vec![first, second]);
        let merged = result.pop().expect("one record");
        let mut urls: Vec<_> = merged.endpoints.iter().map(|e| e.url.clone()).collect();
        urls.sort();
        urls.dedup();
        assert_eq!(urls.len(), merged.endpoints.len());
    }

    #[test]
    fn different_endpoints_are_never_merged() {
        let first = observation("k8s", "orders", 0.7)
            .with_endpoint(Endpoint::new("https://orders.eu.svc"));
        let second = observation("aws", "orders", 0.7)
            .with_endpoint(Endpoint::new("https://orders.us.svc"));

        let result = aggregator(DeduplicationStrategy::Merge).aggregate(vec![first, second]);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn latest_strategy_keeps_most_recent_observation() {
        let mut older = observation("k8s", "orders", 0.9);
        older.last_seen = older.last_seen - chrono::Duration::minutes(10);
        let newer = observation("aws", "orders", 0.6);
        let newer_seen = newer.last_seen;

        let result = aggregator(DeduplicationStrategy::Latest).aggregate(vec![older, newer]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].last_seen, newer_seen);
        assert_eq!(result[0].source, "aws");
    }

    #[test]
    fn metadata_mention_infers_a_dependency() {
        let settings = AggregationSettings {
            deduplication_strategy: DeduplicationStrategy::Merge,
            relationship_inference: true,
            confidence_threshold: 0.5,
        };
        let aggregator = Aggregator::new(settings, HashMap::new());

        let caller = observation("k8s", "frontend", 0.9)
            .with_metadata("upstream", json!("https://orders.svc/api"));
        let callee = observation("k8s", "orders", 0.9)
            .with_endpoint(Endpoint::new("https://orders.svc"));
        let callee_id = callee.id.clone();

        let result = aggregator.aggregate(vec![caller, callee]);
        let frontend = result
            .iter()
            .find(|service| service.name == "frontend")
            .expect("frontend survives");
        assert!(frontend.dependencies.contains(&callee_id));

        // idempotent on a second pass
        let again = aggregator.aggregate(result);
        let frontend = again
            .iter()
            .find(|service| service.name == "frontend")
            .expect("frontend survives");
        let count = frontend
            .dependencies
            .iter()
            .filter(|dep| *dep == &callee_id)
            .count();
        assert_eq!(count, 1);
    }
}
