use crate::messages::{MicrocontrollerInfo, Registration, TopicRecord};
use crate::NodeIdentity;
use device_registry::Topic;

/// Limits applied when building the registration batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryLimits {
    /// Largest serialized registration, in bytes.
    pub ceiling_bytes: usize,
    /// Hard cap on topics in the batch regardless of size.
    pub max_batch_topics: usize,
}

/// Result of splitting a topic set into one registration plus overflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryPlan {
    pub registration: Registration,
    pub registration_json: String,
    /// The registration exceeds the ceiling even without topics; it must not
    /// be sent and every topic is in `overflow`.
    pub registration_oversized: bool,
    /// Topics that did not fit, each already serialized for `register_known_topic`.
    pub overflow: Vec<(TopicRecord, String)>,
}

impl DiscoveryPlan {
    pub fn topic_count(&self) -> usize {
        self.registration.known_topics.len() + self.overflow.len()
    }
}

/// Topics the node itself offers, in the order they are announced.
pub fn node_topics(identity: &NodeIdentity) -> Vec<Topic> {
    let t = |suffix: &str| identity.topic(suffix);
    vec![
        Topic::outbound(t("register_microcontroller"), "Registers all the known topics of the microcontroller."),
        Topic::outbound(t("started"), "STARTED"),
        Topic::outbound(t("alive"), "Alive message of the microcontroller"),
        Topic::inbound(t("alive_config"), r#"{"aliveIntervalMs": 15000, "aliveAckLedMode": 2}"#),
        Topic::inbound(t("alive_ack"), "Acknowledge of the alive message"),
        Topic::outbound(t("terminated"), "SHUTDOWN"),
        Topic::inbound(t("settings/load"), "Loads data by the key given in the payload"),
        Topic::outbound(t("settings/key"), r#"{"key": "<key>", "data": "<data>"}"#),
        Topic::inbound(t("settings/save"), r#"{"key": "<key>", "data": "<data>"}"#),
        Topic::outbound(t("error"), "Error message"),
        Topic::inbound(t("status"), "device_config | alive"),
        Topic::inbound(t("system"), "reboot"),
        Topic::inbound(t("save_device_config"), "Device manifest (JSON array)"),
        Topic::outbound(t("device_config"), "Persisted device manifest"),
    ]
}

/// Split `topics` into one registration no larger than the ceiling and a list
/// of single-topic follow-ups. Order is preserved; the same inputs always give
/// the same output.
pub fn plan_discovery(
    identity: &NodeIdentity,
    topics: &[Topic],
    limits: DiscoveryLimits,
) -> Result<DiscoveryPlan, serde_json::Error> {
    let mut registration = Registration {
        microcontroller: MicrocontrollerInfo::from(identity),
        known_topics: Vec::new(),
    };
    let mut size = serde_json::to_string(&registration)?.len();
    let registration_oversized = size > limits.ceiling_bytes;
    let mut records = topics.iter().map(TopicRecord::from).peekable();

    while !registration_oversized && registration.known_topics.len() < limits.max_batch_topics {
        let Some(next) = records.peek() else {
            break;
        };
        let separator = usize::from(!registration.known_topics.is_empty());
        let added = serde_json::to_string(next)?.len() + separator;
        if size + added > limits.ceiling_bytes {
            break;
        }
        size += added;
        if let Some(record) = records.next() {
            registration.known_topics.push(record);
        }
    }

    let registration_json = serde_json::to_string(&registration)?;
    let overflow = records
        .map(|r| serde_json::to_string(&r).map(|json| (r, json)))
        .collect::<Result<Vec<_>, _>>()?;

    if registration_oversized {
        tracing::warn!(
            bytes = registration_json.len(),
            ceiling = limits.ceiling_bytes,
            "registration exceeds the ceiling without any topics"
        );
    } else if !overflow.is_empty() {
        tracing::info!(
            batched = registration.known_topics.len(),
            overflow = overflow.len(),
            bytes = registration_json.len(),
            "registration batch full, remaining topics sent individually"
        );
    }
    Ok(DiscoveryPlan {
        registration,
        registration_json,
        registration_oversized,
        overflow,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn identity() -> NodeIdentity {
        NodeIdentity {
            namespace_name: "iotzoo".into(),
            project_name: "test".into(),
            board_type: "esp32".into(),
            mac_address: "AA:BB:CC".into(),
            ip_address: "10.0.0.2".into(),
            broker_ip: "10.0.0.1".into(),
            firmware_version: "0.1.0".into(),
        }
    }

    fn many_topics(n: usize) -> Vec<Topic> {
        let id = identity();
        (0..n)
            .map(|i| Topic::outbound(id.topic(&format!("switch/{i}")), "1"))
            .collect()
    }

    #[test]
    fn everything_fits_in_one_batch() {
        let topics = many_topics(5);
        let plan = plan_discovery(
            &identity(),
            &topics,
            DiscoveryLimits {
                ceiling_bytes: 16 * 1024,
                max_batch_topics: 64,
            },
        )
        .unwrap();
        assert_eq!(plan.registration.known_topics.len(), 5);
        assert!(plan.overflow.is_empty());
    }

    #[test]
    fn oversized_set_splits_on_serialized_size() {
        let topics = many_topics(40);
        let limits = DiscoveryLimits {
            ceiling_bytes: 1_500,
            max_batch_topics: 64,
        };
        let plan = plan_discovery(&identity(), &topics, limits).unwrap();
        assert!(plan.registration_json.len() <= limits.ceiling_bytes);
        assert!(!plan.overflow.is_empty());
        assert_eq!(plan.topic_count(), 40);

        let mut seen = BTreeSet::new();
        for r in plan.registration.known_topics.iter().chain(plan.overflow.iter().map(|(r, _)| r)) {
            assert!(seen.insert(r.topic.clone()), "duplicate {}", r.topic);
        }
        let expected: BTreeSet<String> = topics.iter().map(|t| t.name.clone()).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn topic_count_cap_applies_even_when_bytes_allow() {
        let topics = many_topics(10);
        let plan = plan_discovery(
            &identity(),
            &topics,
            DiscoveryLimits {
                ceiling_bytes: usize::MAX / 2,
                max_batch_topics: 4,
            },
        )
        .unwrap();
        assert_eq!(plan.registration.known_topics.len(), 4);
        assert_eq!(plan.overflow.len(), 6);
        assert_eq!(plan.overflow[0].0.topic, topics[4].name);
    }

    #[test]
    fn identity_larger_than_ceiling_moves_every_topic_to_overflow() {
        let topics = many_topics(3);
        let plan = plan_discovery(
            &identity(),
            &topics,
            DiscoveryLimits {
                ceiling_bytes: 32,
                max_batch_topics: 64,
            },
        )
        .unwrap();
        assert!(plan.registration_oversized);
        assert!(plan.registration.known_topics.is_empty());
        let overflow: Vec<&str> = plan.overflow.iter().map(|(r, _)| r.topic.as_str()).collect();
        let expected: Vec<&str> = topics.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(overflow, expected);
    }

    #[test]
    fn planning_is_deterministic() {
        let topics = many_topics(30);
        let limits = DiscoveryLimits {
            ceiling_bytes: 1_000,
            max_batch_topics: 64,
        };
        let a = plan_discovery(&identity(), &topics, limits).unwrap();
        let b = plan_discovery(&identity(), &topics, limits).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn node_topics_live_under_base() {
        let id = identity();
        let base = id.base_topic();
        let topics = node_topics(&id);
        assert!(topics.iter().all(|t| t.name.starts_with(&base)));
        assert!(topics.iter().any(|t| t.name.ends_with("/alive_ack")));
        assert!(topics.iter().any(|t| t.name.ends_with("/terminated")));
    }
}
