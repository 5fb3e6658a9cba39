//! Registry of local proxy ports for devices reachable through a lab-side
//! proxy. Keyed by device serial; an instance is injected wherever port
//! lookups are needed.

use dashmap::DashMap;

#[derive(Default)]
pub struct ProxyPortRegistry {
    ports: DashMap<String, u16>,
}

impl ProxyPortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the local proxy port of a device. A re-registration with a
    /// different port wins, with a warning.
    pub fn register(&self, serial: impl Into<String>, port: u16) {
        let serial = serial.into();
        if let Some(previous) = self.ports.insert(serial.clone(), port) {
            if previous != port {
                tracing::warn!(
                    serial,
                    previous,
                    port,
                    "Device proxy port re-registered with a different port"
                );
            }
        }
    }

    pub fn lookup(&self, serial: &str) -> Option<u16> {
        self.ports.get(serial).map(|entry| *entry.value())
    }

    /// Releases the port mapping of a device, if any.
    pub fn release(&self, serial: &str) -> Option<u16> {
        self.ports.remove(serial).map(|(_, port)| port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_lookup_release() {
        let registry = ProxyPortRegistry::new();
        assert_eq!(registry.lookup("serial1"), None);
        registry.register("serial1", 10001);
        assert_eq!(registry.lookup("serial1"), Some(10001));
        assert_eq!(registry.release("serial1"), Some(10001));
        assert_eq!(registry.lookup("serial1"), None);
    }

    #[test]
    fn conflicting_registration_wins() {
        let registry = ProxyPortRegistry::new();
        registry.register("serial1", 10001);
        registry.register("serial1", 10002);
        assert_eq!(registry.lookup("serial1"), Some(10002));
    }
}
