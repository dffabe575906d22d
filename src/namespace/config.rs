//! Namespace configuration

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::ConfigError;

/// Parameters a namespace is created from
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NamespaceParams {
    /// Domains routed to the namespace (empty = the namespace name)
    pub domains: Vec<String>,

    /// Maximum streams per router (0 = unlimited)
    pub max_streams_per_router: usize,

    /// Router used when the caller does not name one
    pub default_router: String,
}

impl Default for NamespaceParams {
    fn default() -> Self {
        Self {
            domains: Vec::new(),
            max_streams_per_router: 0, // Unlimited
            default_router: "default".to_string(),
        }
    }
}

impl NamespaceParams {
    /// Set the routed domains
    pub fn domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domains = domains.into_iter().map(Into::into).collect();
        self
    }

    /// Add one routed domain
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domains.push(domain.into());
        self
    }

    /// Set maximum streams per router
    pub fn max_streams_per_router(mut self, max: usize) -> Self {
        self.max_streams_per_router = max;
        self
    }

    /// Set the default router name
    pub fn default_router(mut self, name: impl Into<String>) -> Self {
        self.default_router = name.into();
        self
    }

    /// Concrete parameters for the namespace `name`
    pub fn resolve(&self, name: &str) -> Self {
        let mut params = self.clone();
        if params.domains.is_empty() {
            params.domains.push(name.to_string());
        }
        params
    }
}

/// Static configuration of a [`NamespaceManager`](super::NamespaceManager)
///
/// ```toml
/// [default]
/// max_streams_per_router = 100
///
/// [namespaces.tenantA]
/// domains = ["a.example.com"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    /// Per-name entries
    pub namespaces: HashMap<String, NamespaceParams>,

    /// Template for names without an entry
    pub default: NamespaceParams,
}

impl NamespaceConfig {
    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Add a per-name entry
    pub fn namespace(mut self, name: impl Into<String>, params: NamespaceParams) -> Self {
        self.namespaces.insert(name.into(), params);
        self
    }

    /// Set the default template
    pub fn default_params(mut self, params: NamespaceParams) -> Self {
        self.default = params;
        self
    }

    /// Resolved parameters for `name`: its entry if configured, else the default template
    pub fn params_for(&self, name: &str) -> NamespaceParams {
        self.namespaces
            .get(name)
            .unwrap_or(&self.default)
            .resolve(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = NamespaceParams::default();

        assert!(params.domains.is_empty());
        assert_eq!(params.max_streams_per_router, 0);
        assert_eq!(params.default_router, "default");
    }

    #[test]
    fn test_builder_chaining() {
        let params = NamespaceParams::default()
            .domains(["a.example.com"])
            .domain("b.example.com")
            .max_streams_per_router(10)
            .default_router("main");

        assert_eq!(params.domains, vec!["a.example.com", "b.example.com"]);
        assert_eq!(params.max_streams_per_router, 10);
        assert_eq!(params.default_router, "main");
    }

    #[test]
    fn test_empty_domains_resolve_to_name() {
        let config = NamespaceConfig::default();

        assert_eq!(config.params_for("tenantB").domains, vec!["tenantB"]);
    }

    #[test]
    fn test_entry_wins_over_template() {
        let config = NamespaceConfig::default()
            .namespace("tenantA", NamespaceParams::default().domain("a.example.com"))
            .default_params(NamespaceParams::default().max_streams_per_router(5));

        let a = config.params_for("tenantA");
        assert_eq!(a.domains, vec!["a.example.com"]);
        assert_eq!(a.max_streams_per_router, 0);

        let other = config.params_for("other");
        assert_eq!(other.domains, vec!["other"]);
        assert_eq!(other.max_streams_per_router, 5);
    }

    #[test]
    fn test_from_toml() {
        let config = NamespaceConfig::from_toml_str(
            r#"
            [default]
            max_streams_per_router = 100

            [namespaces.tenantA]
            domains = ["a.example.com", "A.example.org"]
            default_router = "lobby"
            "#,
        )
        .unwrap();

        assert_eq!(config.default.max_streams_per_router, 100);
        assert_eq!(config.default.default_router, "default");

        let a = config.params_for("tenantA");
        assert_eq!(a.domains, vec!["a.example.com", "A.example.org"]);
        assert_eq!(a.default_router, "lobby");
    }

    #[test]
    fn test_from_toml_empty() {
        let config = NamespaceConfig::from_toml_str("").unwrap();
        assert_eq!(config, NamespaceConfig::default());
    }

    #[test]
    fn test_from_toml_invalid() {
        let err = NamespaceConfig::from_toml_str("default = 3").unwrap_err();
        assert!(err.to_string().starts_with("invalid config"));
    }
}
