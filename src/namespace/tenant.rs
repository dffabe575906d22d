//! Namespaces
//!
//! A namespace is a tenant boundary: a name, the domains routed to it and the
//! routers (and through them the streams) that belong to it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

use super::config::NamespaceParams;
use super::router::Router;

/// Tenant boundary
pub struct Namespace {
    name: String,
    params: NamespaceParams,
    routers: RwLock<HashMap<String, Arc<Router>>>,
    token: CancellationToken,
}

impl Namespace {
    /// Create a namespace from resolved parameters
    pub fn new(name: impl Into<String>, params: NamespaceParams, parent: &CancellationToken) -> Self {
        let name = name.into();
        let params = params.resolve(&name);
        tracing::info!(namespace = %name, domains = ?params.domains, "Namespace created");

        Self {
            name,
            params,
            routers: RwLock::new(HashMap::new()),
            token: parent.child_token(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &NamespaceParams {
        &self.params
    }

    pub fn domains(&self) -> &[String] {
        &self.params.domains
    }

    /// Whether `domain` routes to this namespace (ASCII case-insensitive)
    pub fn has_domain(&self, domain: &str) -> bool {
        self.params
            .domains
            .iter()
            .any(|d| d.eq_ignore_ascii_case(domain))
    }

    /// Get a router, creating it on first reference
    pub fn get_or_new_router(&self, name: &str) -> Result<Arc<Router>> {
        if let Some(router) = self.routers.read().get(name) {
            if !router.is_closed() {
                return Ok(router.clone());
            }
        }

        let mut routers = self.routers.write();
        if self.token.is_cancelled() {
            return Err(Error::Closed);
        }

        match routers.get(name) {
            Some(router) if !router.is_closed() => Ok(router.clone()),
            _ => {
                let router = Arc::new(Router::new(
                    name,
                    self.params.max_streams_per_router,
                    &self.token,
                ));
                routers.insert(name.to_string(), router.clone());
                Ok(router)
            }
        }
    }

    /// The router named by the namespace parameters
    pub fn default_router(&self) -> Result<Arc<Router>> {
        self.get_or_new_router(&self.params.default_router)
    }

    pub fn router(&self, name: &str) -> Option<Arc<Router>> {
        self.routers.read().get(name).cloned()
    }

    /// Remove and close a router
    pub fn remove_router(&self, name: &str) -> Option<Arc<Router>> {
        let router = self.routers.write().remove(name);
        if let Some(router) = &router {
            router.close();
        }
        router
    }

    pub fn router_names(&self) -> Vec<String> {
        self.routers.read().keys().cloned().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Close the namespace and everything below it
    pub fn close(&self) {
        self.token.cancel();
        tracing::info!(namespace = %self.name, "Namespace closed");
    }

    /// Wait until every router of the namespace finished its teardown
    pub async fn closed(&self) {
        self.token.cancelled().await;
        let routers: Vec<_> = self.routers.read().values().cloned().collect();
        for router in routers {
            router.closed().await;
        }
    }
}

impl Drop for Namespace {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field("domains", &self.params.domains)
            .field("routers", &self.router_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[test]
    fn test_domains_default_to_name() {
        let root = CancellationToken::new();
        let ns = Namespace::new("tenantB", NamespaceParams::default(), &root);

        assert_eq!(ns.domains(), ["tenantB".to_string()]);
        assert!(ns.has_domain("TENANTB"));
    }

    #[test]
    fn test_has_domain() {
        let root = CancellationToken::new();
        let params = NamespaceParams::default().domains(["a.example.com", "a.example.org"]);
        let ns = Namespace::new("tenantA", params, &root);

        assert!(ns.has_domain("a.example.com"));
        assert!(ns.has_domain("A.Example.ORG"));
        assert!(!ns.has_domain("b.example.com"));
        assert!(!ns.has_domain("tenantA"));
    }

    #[test]
    fn test_routers() {
        let root = CancellationToken::new();
        let params = NamespaceParams::default()
            .default_router("lobby")
            .max_streams_per_router(3);
        let ns = Namespace::new("tenantA", params, &root);

        let lobby = assert_ok!(ns.default_router());
        assert_eq!(lobby.name(), "lobby");
        assert!(Arc::ptr_eq(&lobby, &assert_ok!(ns.get_or_new_router("lobby"))));
        assert!(ns.router("other").is_none());

        let removed = ns.remove_router("lobby");
        assert!(removed.is_some_and(|r| r.is_closed()));
        assert!(ns.router("lobby").is_none());
    }

    #[tokio::test]
    async fn test_close_cascades() {
        let root = CancellationToken::new();
        let ns = Namespace::new("tenantA", NamespaceParams::default(), &root);
        let router = assert_ok!(ns.default_router());
        let stream = assert_ok!(router.get_or_new_stream("room1"));

        ns.close();
        ns.closed().await;
        stream.closed().await;

        assert!(router.is_closed());
        assert!(stream.is_closed());
        assert_eq!(assert_err!(ns.get_or_new_router("other")), Error::Closed);
    }
}
