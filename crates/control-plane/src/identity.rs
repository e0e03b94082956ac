use serde::{Deserialize, Serialize};

/// Who this node is on the bus. All node topics hang off [`NodeIdentity::base_topic`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub namespace_name: String,
    pub project_name: String,
    pub board_type: String,
    pub mac_address: String,
    pub ip_address: String,
    pub broker_ip: String,
    pub firmware_version: String,
}

impl NodeIdentity {
    /// `<namespace>/<project>/` with empty segments left out.
    pub fn namespace_prefix(&self) -> String {
        let mut prefix = String::new();
        for segment in [&self.namespace_name, &self.project_name] {
            let segment = segment.trim();
            if !segment.is_empty() {
                prefix.push_str(segment);
                prefix.push('/');
            }
        }
        prefix
    }

    pub fn base_topic(&self) -> String {
        format!(
            "{}{}/{}",
            self.namespace_prefix(),
            self.board_type,
            self.mac_address
        )
    }

    pub fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.base_topic(), suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(ns: &str, project: &str) -> NodeIdentity {
        NodeIdentity {
            namespace_name: ns.to_string(),
            project_name: project.to_string(),
            board_type: "esp32".to_string(),
            mac_address: "AA:BB".to_string(),
            ip_address: String::new(),
            broker_ip: String::new(),
            firmware_version: "1.0.0".to_string(),
        }
    }

    #[test]
    fn base_topic_omits_empty_segments() {
        assert_eq!(identity("iotzoo", "garden").base_topic(), "iotzoo/garden/esp32/AA:BB");
        assert_eq!(identity("iotzoo", "").base_topic(), "iotzoo/esp32/AA:BB");
        assert_eq!(identity("", " ").base_topic(), "esp32/AA:BB");
        assert_eq!(identity("", "garden").namespace_prefix(), "garden/");
    }

    #[test]
    fn topic_suffix() {
        assert_eq!(identity("iotzoo", "").topic("alive"), "iotzoo/esp32/AA:BB/alive");
    }
}
