//! Port forward descriptions shared by both ends.

use serde::{Deserialize, Serialize};

/// Which side listens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardDirection {
    /// Container listens on `container_port` and forwards inbound
    /// connections to the host's `host_port`.
    Local,
    /// Host listens on `host_port` (on the configured bind addresses) and
    /// forwards inbound connections to the container's `container_port`.
    Remote,
}

impl ForwardDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForwardDirection::Local => "local",
            ForwardDirection::Remote => "remote",
        }
    }
}

/// One installed port forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortForward {
    pub name: String,
    pub host_port: u16,
    pub container_port: u16,
    pub direction: ForwardDirection,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_uses_wire_names() {
        assert_eq!(
            serde_json::to_string(&ForwardDirection::Local).unwrap(),
            "\"local\""
        );
        assert_eq!(
            serde_json::from_str::<ForwardDirection>("\"remote\"").unwrap(),
            ForwardDirection::Remote
        );
    }

    #[test]
    fn forward_round_trips() {
        let fwd = PortForward {
            name: "dynamic-8080".to_string(),
            host_port: 8080,
            container_port: 80,
            direction: ForwardDirection::Remote,
        };
        let json = serde_json::to_string(&fwd).unwrap();
        let back: PortForward = serde_json::from_str(&json).unwrap();
        assert_eq!(back.host_port, 8080);
        assert_eq!(back.container_port, 80);
        assert_eq!(back.direction, ForwardDirection::Remote);
    }
}
