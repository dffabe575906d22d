//! Namespace manager
//!
//! Top-level catalog of tenants. Transports resolve an inbound domain with
//! [`NamespaceManager::lookup_domain`] before reaching routers and streams.
//! The manager is constructed explicitly and shared by `Arc`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

use super::config::NamespaceConfig;
use super::tenant::Namespace;

/// Catalog of namespaces, populated lazily
pub struct NamespaceManager {
    config: NamespaceConfig,
    namespaces: RwLock<HashMap<String, Arc<Namespace>>>,
    token: CancellationToken,
}

impl NamespaceManager {
    /// Create a manager owning its own cancellation root
    pub fn new(config: NamespaceConfig) -> Self {
        Self::with_parent(config, &CancellationToken::new())
    }

    /// Create a manager whose lifetime is bounded by `parent`
    pub fn with_parent(config: NamespaceConfig, parent: &CancellationToken) -> Self {
        Self {
            config,
            namespaces: RwLock::new(HashMap::new()),
            token: parent.child_token(),
        }
    }

    pub fn config(&self) -> &NamespaceConfig {
        &self.config
    }

    /// Get a namespace, creating it from its configured entry or the default template
    pub fn get_or_new_namespace(&self, name: &str) -> Result<Arc<Namespace>> {
        if let Some(ns) = self.namespaces.read().get(name) {
            if !ns.is_closed() {
                return Ok(ns.clone());
            }
        }

        let mut namespaces = self.namespaces.write();
        if self.token.is_cancelled() {
            return Err(Error::Closed);
        }

        match namespaces.get(name) {
            Some(ns) if !ns.is_closed() => Ok(ns.clone()),
            _ => {
                let params = self.config.params_for(name);
                let ns = Arc::new(Namespace::new(name, params, &self.token));
                namespaces.insert(name.to_string(), ns.clone());
                Ok(ns)
            }
        }
    }

    pub fn namespace(&self, name: &str) -> Option<Arc<Namespace>> {
        self.namespaces.read().get(name).cloned()
    }

    /// Resolve an inbound domain to its namespace
    ///
    /// Registered namespaces are scanned first; a configured namespace whose
    /// domains match is created on demand. Unknown domains return `None`.
    pub fn lookup_domain(&self, domain: &str) -> Option<Arc<Namespace>> {
        let registered = self
            .namespaces
            .read()
            .values()
            .find(|ns| !ns.is_closed() && ns.has_domain(domain))
            .cloned();
        if registered.is_some() {
            return registered;
        }

        let name = self.config.namespaces.keys().find(|name| {
            self.config
                .params_for(name)
                .domains
                .iter()
                .any(|d| d.eq_ignore_ascii_case(domain))
        })?;

        match self.get_or_new_namespace(name) {
            Ok(ns) => Some(ns),
            Err(e) => {
                tracing::debug!(%domain, namespace = %name, error = %e, "Domain lookup failed");
                None
            }
        }
    }

    /// Remove and close a namespace
    pub fn remove_namespace(&self, name: &str) -> Option<Arc<Namespace>> {
        let ns = self.namespaces.write().remove(name);
        if let Some(ns) = &ns {
            ns.close();
        }
        ns
    }

    pub fn names(&self) -> Vec<String> {
        self.namespaces.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.namespaces.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.read().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Close every namespace, router, stream and format
    pub fn close(&self) {
        self.token.cancel();
        tracing::info!(namespaces = self.len(), "Namespace manager closed");
    }

    /// Wait until every namespace finished its teardown
    pub async fn closed(&self) {
        self.token.cancelled().await;
        let namespaces: Vec<_> = self.namespaces.read().values().cloned().collect();
        for ns in namespaces {
            ns.closed().await;
        }
    }
}

impl Drop for NamespaceManager {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl fmt::Debug for NamespaceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceManager")
            .field("namespaces", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::namespace::NamespaceParams;

    fn config() -> NamespaceConfig {
        NamespaceConfig::default()
            .namespace("tenantA", NamespaceParams::default().domain("a.example.com"))
            .default_params(NamespaceParams::default().max_streams_per_router(2))
    }

    #[test]
    fn test_get_or_new_namespace() {
        let manager = NamespaceManager::new(config());

        let a = assert_ok!(manager.get_or_new_namespace("tenantA"));
        assert_eq!(a.domains(), ["a.example.com".to_string()]);
        assert!(Arc::ptr_eq(&a, &assert_ok!(manager.get_or_new_namespace("tenantA"))));

        let b = assert_ok!(manager.get_or_new_namespace("tenantB"));
        assert_eq!(b.domains(), ["tenantB".to_string()]);
        assert_eq!(b.params().max_streams_per_router, 2);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_lookup_domain() {
        let manager = NamespaceManager::new(config());
        assert!(manager.is_empty());

        // Configured but not yet created
        let a = manager.lookup_domain("A.EXAMPLE.COM");
        assert_eq!(a.as_ref().map(|ns| ns.name()), Some("tenantA"));
        assert_eq!(manager.len(), 1);

        assert!(manager.lookup_domain("unknown.example.com").is_none());
        assert_eq!(manager.len(), 1);

        // Template-created namespaces route their own name
        assert_ok!(manager.get_or_new_namespace("tenantB"));
        let b = manager.lookup_domain("tenantB");
        assert_eq!(b.as_ref().map(|ns| ns.name()), Some("tenantB"));
    }

    #[test]
    fn test_remove_namespace() {
        let manager = NamespaceManager::new(config());
        let a = assert_ok!(manager.get_or_new_namespace("tenantA"));

        let removed = manager.remove_namespace("tenantA");
        assert!(removed.is_some());
        assert!(a.is_closed());
        assert!(manager.namespace("tenantA").is_none());

        // Recreated fresh on next reference
        let again = assert_ok!(manager.get_or_new_namespace("tenantA"));
        assert!(!Arc::ptr_eq(&a, &again));
    }

    #[tokio::test]
    async fn test_close_cascades() {
        let manager = NamespaceManager::new(config());
        let ns = assert_ok!(manager.get_or_new_namespace("tenantA"));
        let router = assert_ok!(ns.default_router());
        let stream = assert_ok!(router.get_or_new_stream("room1"));

        manager.close();
        manager.closed().await;

        assert!(ns.is_closed());
        assert!(stream.is_closed());
        assert_eq!(assert_err!(manager.get_or_new_namespace("tenantC")), Error::Closed);
        assert!(manager.lookup_domain("a.example.com").is_none());
    }
}
