//! Bind address resolution for host-side listeners.

use agentbox_core::TAILSCALE_TOKEN;
use std::net::IpAddr;
use std::sync::RwLock;
use tracing::warn;

/// The set of addresses remote-direction listeners bind to.
///
/// Computed from the configured list plus the virtual `"tailscale"` token,
/// which resolves to the currently observed Tailscale address. While no
/// overlay address is available the token contributes nothing, so those
/// listeners are suppressed rather than bound to a wildcard.
#[derive(Debug)]
pub struct BindAddresses {
    configured: Vec<String>,
    overlay_ip: RwLock<Option<IpAddr>>,
}

impl BindAddresses {
    pub fn new(configured: Vec<String>) -> Self {
        Self {
            configured,
            overlay_ip: RwLock::new(None),
        }
    }

    /// Record the overlay address observed by the monitor. Returns true when
    /// it differs from the previous observation.
    pub fn set_overlay_ip(&self, ip: Option<IpAddr>) -> bool {
        let mut current = self.overlay_ip.write().expect("bind lock poisoned");
        let changed = *current != ip;
        *current = ip;
        changed
    }

    pub fn overlay_ip(&self) -> Option<IpAddr> {
        *self.overlay_ip.read().expect("bind lock poisoned")
    }

    /// Whether the configuration references the overlay token at all.
    pub fn uses_overlay(&self) -> bool {
        self.configured
            .iter()
            .any(|a| a.eq_ignore_ascii_case(TAILSCALE_TOKEN))
    }

    /// Resolve the concrete address list. Falls back to loopback when the
    /// whole set resolves to nothing.
    pub fn resolve(&self) -> Vec<IpAddr> {
        let overlay = self.overlay_ip();
        let mut resolved = Vec::new();

        for addr in &self.configured {
            if addr.eq_ignore_ascii_case(TAILSCALE_TOKEN) {
                if let Some(ip) = overlay {
                    resolved.push(ip);
                }
            } else {
                match addr.parse::<IpAddr>() {
                    Ok(ip) => resolved.push(ip),
                    Err(_) => warn!(address = %addr, "ignoring unparsable bind address"),
                }
            }
        }

        if resolved.is_empty() {
            resolved.push(IpAddr::from([127, 0, 0, 1]));
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_skipped_without_an_overlay_address() {
        let bind = BindAddresses::new(vec!["127.0.0.1".into(), "tailscale".into()]);
        assert_eq!(bind.resolve(), vec![IpAddr::from([127, 0, 0, 1])]);
    }

    #[test]
    fn token_resolves_once_the_address_appears() {
        let bind = BindAddresses::new(vec!["127.0.0.1".into(), "tailscale".into()]);
        assert!(bind.set_overlay_ip(Some(IpAddr::from([100, 64, 0, 7]))));

        assert_eq!(
            bind.resolve(),
            vec![
                IpAddr::from([127, 0, 0, 1]),
                IpAddr::from([100, 64, 0, 7])
            ]
        );
    }

    #[test]
    fn unchanged_observation_reports_no_change() {
        let bind = BindAddresses::new(vec!["tailscale".into()]);
        let ip = Some(IpAddr::from([100, 64, 0, 7]));
        assert!(bind.set_overlay_ip(ip));
        assert!(!bind.set_overlay_ip(ip));
        assert!(bind.set_overlay_ip(None));
    }

    #[test]
    fn empty_resolution_falls_back_to_loopback() {
        let bind = BindAddresses::new(vec!["tailscale".into()]);
        assert_eq!(bind.resolve(), vec![IpAddr::from([127, 0, 0, 1])]);
    }

    #[test]
    fn bad_addresses_are_ignored() {
        let bind = BindAddresses::new(vec!["not-an-ip".into(), "127.0.0.1".into()]);
        assert_eq!(bind.resolve(), vec![IpAddr::from([127, 0, 0, 1])]);
    }

    #[test]
    fn uses_overlay_detects_the_token() {
        assert!(BindAddresses::new(vec!["Tailscale".into()]).uses_overlay());
        assert!(!BindAddresses::new(vec!["127.0.0.1".into()]).uses_overlay());
    }
}
