//! Allow-set for local-direction forwards.

use std::collections::HashMap;
use std::sync::Mutex;

/// Host ports containers are permitted to reach through direct-tcpip
/// channels.
///
/// Membership is reference-counted: several connections may claim the same
/// port for their own forwarding, and one connection's remove releases only
/// its own claim. The port stays allowed until the last claim is gone.
#[derive(Debug, Default)]
pub struct AllowedPorts {
    counts: Mutex<HashMap<u16, usize>>,
}

impl AllowedPorts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one claim for a port.
    pub fn claim(&self, port: u16) {
        *self
            .counts
            .lock()
            .expect("allow lock poisoned")
            .entry(port)
            .or_insert(0) += 1;
    }

    /// Release one claim; the port disappears when the last claim goes.
    pub fn release(&self, port: u16) {
        let mut counts = self.counts.lock().expect("allow lock poisoned");
        if let Some(count) = counts.get_mut(&port) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&port);
            }
        }
    }

    pub fn is_allowed(&self, port: u16) -> bool {
        self.counts
            .lock()
            .expect("allow lock poisoned")
            .contains_key(&port)
    }

    /// Number of distinct allowed ports.
    pub fn len(&self) -> usize {
        self.counts.lock().expect("allow lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_then_release_restores_the_set() {
        let allow = AllowedPorts::new();
        assert!(!allow.is_allowed(5000));

        allow.claim(5000);
        assert!(allow.is_allowed(5000));

        allow.release(5000);
        assert!(!allow.is_allowed(5000));
        assert!(allow.is_empty());
    }

    #[test]
    fn one_release_does_not_strip_another_claim() {
        let allow = AllowedPorts::new();
        allow.claim(5000); // connection A
        allow.claim(5000); // connection B

        allow.release(5000); // A disconnects
        assert!(allow.is_allowed(5000), "B's claim must survive");

        allow.release(5000);
        assert!(!allow.is_allowed(5000));
    }

    #[test]
    fn releasing_an_unclaimed_port_is_a_no_op() {
        let allow = AllowedPorts::new();
        allow.release(9999);
        assert!(allow.is_empty());
    }
}
