use log::debug;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::future::Future;

use crate::config::TenancyConfig;
use crate::error::Result;
use crate::logic::context::Tenants;
use crate::model::{TenantId, TenantRequest};

/// Strategy that extracts a tenant identifier from a request.
///
/// Implementations only look at data already present on the request and
/// never perform I/O. `None` means "no opinion" and lets the chain move on.
pub trait Resolver: Send + Sync {
    fn kind(&self) -> ResolverKind;
    fn resolve(&self, request: &dyn TenantRequest) -> Option<String>;
}

/// Names used to order resolvers from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverKind {
    Header,
    Subdomain,
    Path,
}

impl fmt::Display for ResolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolverKind::Header => f.write_str("header"),
            ResolverKind::Subdomain => f.write_str("subdomain"),
            ResolverKind::Path => f.write_str("path"),
        }
    }
}

/// Reads the tenant verbatim from a configured header (`X-Tenant-ID` by default)
#[derive(Debug, Clone)]
pub struct HeaderResolver {
    header_name: String,
}

impl HeaderResolver {
    pub fn new(header_name: impl Into<String>) -> Self {
        Self {
            header_name: header_name.into(),
        }
    }
}

impl Resolver for HeaderResolver {
    fn kind(&self) -> ResolverKind {
        ResolverKind::Header
    }

    fn resolve(&self, request: &dyn TenantRequest) -> Option<String> {
        request
            .header(&self.header_name)
            .filter(|value| !value.is_empty())
            .map(Cow::into_owned)
    }
}

/// `acme.example.com` resolves to `acme`; bare `example.com` resolves to nothing.
#[derive(Debug, Clone)]
pub struct SubdomainResolver {
    enabled: bool,
}

impl SubdomainResolver {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl Resolver for SubdomainResolver {
    fn kind(&self) -> ResolverKind {
        ResolverKind::Subdomain
    }

    fn resolve(&self, request: &dyn TenantRequest) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let host = request.host()?;
        let labels: Vec<&str> = host.split('.').collect();
        if labels.len() < 3 {
            return None;
        }
        Some(labels[0])
            .filter(|label| !label.is_empty())
            .map(str::to_string)
    }
}

/// Takes the segment following a path prefix: `/t/acme/orders` resolves to `acme`.
#[derive(Debug, Clone)]
pub struct PathResolver {
    prefix: String,
}

impl PathResolver {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: format!("{}/", prefix.trim_end_matches('/')),
        }
    }
}

impl Resolver for PathResolver {
    fn kind(&self) -> ResolverKind {
        ResolverKind::Path
    }

    fn resolve(&self, request: &dyn TenantRequest) -> Option<String> {
        let rest = request.path().strip_prefix(&self.prefix)?;
        let segment = rest.split('/').next().unwrap_or_default();
        if segment.is_empty() {
            None
        } else {
            Some(segment.to_string())
        }
    }
}

/// Ordered, first-match-wins list of resolvers with a default schema fallback.
pub struct ResolverChain {
    resolvers: Vec<Box<dyn Resolver>>,
    default_schema: TenantId,
}

impl ResolverChain {
    pub fn new(resolvers: Vec<Box<dyn Resolver>>, default_schema: TenantId) -> Self {
        Self {
            resolvers,
            default_schema,
        }
    }

    /// Build the chain in the order given by `resolver_order`.
    pub fn from_config(config: &TenancyConfig) -> Result<Self> {
        let resolvers = config
            .resolver_order
            .iter()
            .map(|kind| -> Box<dyn Resolver> {
                match kind {
                    ResolverKind::Header => Box::new(HeaderResolver::new(&config.tenant_header)),
                    ResolverKind::Subdomain => {
                        Box::new(SubdomainResolver::new(config.enable_subdomain_resolver))
                    }
                    ResolverKind::Path => Box::new(PathResolver::new(&config.path_prefix)),
                }
            })
            .collect();

        Ok(Self::new(resolvers, config.default_schema()?))
    }

    pub fn kinds(&self) -> Vec<ResolverKind> {
        self.resolvers.iter().map(|r| r.kind()).collect()
    }

    pub fn default_schema(&self) -> &TenantId {
        &self.default_schema
    }

    /// Raw value of the first resolver that returns something.
    pub fn first_match(&self, request: &dyn TenantRequest) -> Option<(ResolverKind, String)> {
        self.resolvers
            .iter()
            .find_map(|resolver| resolver.resolve(request).map(|value| (resolver.kind(), value)))
    }

    /// Resolve and validate the tenant, falling back to the default schema.
    ///
    /// A resolved value that is not a valid tenant identifier is an error
    /// rather than a fallback, so a malformed header never silently lands
    /// in the default schema.
    pub fn resolve(&self, request: &dyn TenantRequest) -> Result<TenantId> {
        match self.first_match(request) {
            Some((kind, value)) => {
                debug!("tenant {value:?} resolved by {kind} resolver");
                TenantId::parse(value)
            }
            None => {
                debug!("no resolver matched, using default schema {}", self.default_schema);
                Ok(self.default_schema.clone())
            }
        }
    }

    /// Resolve the tenant and run `fut` with it installed in [`Tenants`].
    pub fn within<F>(
        &self,
        request: &dyn TenantRequest,
        fut: F,
    ) -> Result<impl Future<Output = F::Output>>
    where
        F: Future,
    {
        let tenant = self.resolve(request)?;
        Ok(Tenants::scope(tenant, fut))
    }
}

impl fmt::Debug for ResolverChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverChain")
            .field("resolvers", &self.kinds())
            .field("default_schema", &self.default_schema)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RequestInfo;

    fn chain(order: Vec<ResolverKind>, subdomains: bool) -> ResolverChain {
        let config = TenancyConfig {
            enable_subdomain_resolver: subdomains,
            resolver_order: order,
            ..TenancyConfig::default()
        };
        ResolverChain::from_config(&config).unwrap()
    }

    fn default_chain() -> ResolverChain {
        chain(
            vec![ResolverKind::Header, ResolverKind::Subdomain, ResolverKind::Path],
            true,
        )
    }

    #[test]
    fn test_header_resolver_returns_header_value() {
        let req = RequestInfo::new("/").with_header("X-Tenant-ID", "tenant_header");
        let resolver = HeaderResolver::new("X-Tenant-ID");
        assert_eq!(resolver.resolve(&req), Some("tenant_header".to_string()));

        let empty = RequestInfo::new("/").with_header("X-Tenant-ID", "");
        assert_eq!(resolver.resolve(&empty), None);
    }

    #[test]
    fn test_subdomain_resolver() {
        let resolver = SubdomainResolver::new(true);
        let req = RequestInfo::new("/").with_host("acme.example.com");
        assert_eq!(resolver.resolve(&req), Some("acme".to_string()));

        let bare = RequestInfo::new("/").with_host("example.com");
        assert_eq!(resolver.resolve(&bare), None);

        let no_host = RequestInfo::new("/");
        assert_eq!(resolver.resolve(&no_host), None);

        let disabled = SubdomainResolver::new(false);
        assert_eq!(disabled.resolve(&req), None);
    }

    #[test]
    fn test_path_resolver() {
        let resolver = PathResolver::new("/t");
        let req = RequestInfo::new("/t/acme123/orders");
        assert_eq!(resolver.resolve(&req), Some("acme123".to_string()));

        assert_eq!(resolver.resolve(&RequestInfo::new("/other")), None);
        assert_eq!(resolver.resolve(&RequestInfo::new("/t/")), None);
        assert_eq!(resolver.resolve(&RequestInfo::new("/t")), None);
        assert_eq!(resolver.resolve(&RequestInfo::new("/tenant/acme")), None);

        let trailing = PathResolver::new("/t/");
        assert_eq!(trailing.resolve(&req), Some("acme123".to_string()));
    }

    #[test]
    fn test_header_wins_when_ordered_first() {
        let req = RequestInfo::new("/t/pathtenant/orders")
            .with_header("X-Tenant-ID", "headertenant")
            .with_host("subtenant.example.com");

        assert_eq!(default_chain().resolve(&req).unwrap().as_str(), "headertenant");
    }

    #[test]
    fn test_order_is_configurable() {
        let req = RequestInfo::new("/t/pathtenant/orders")
            .with_header("X-Tenant-ID", "headertenant")
            .with_host("subtenant.example.com");

        let path_first = chain(
            vec![ResolverKind::Path, ResolverKind::Header, ResolverKind::Subdomain],
            true,
        );
        assert_eq!(path_first.resolve(&req).unwrap().as_str(), "pathtenant");

        let subdomain_first = chain(vec![ResolverKind::Subdomain, ResolverKind::Header], true);
        assert_eq!(subdomain_first.resolve(&req).unwrap().as_str(), "subtenant");
    }

    #[test]
    fn test_falls_through_to_later_resolvers() {
        let req = RequestInfo::new("/t/acme123/orders").with_host("example.com");
        let (kind, value) = default_chain().first_match(&req).unwrap();
        assert_eq!(kind, ResolverKind::Path);
        assert_eq!(value, "acme123");
    }

    #[test]
    fn test_default_schema_when_nothing_matches() {
        let req = RequestInfo::new("/other").with_host("example.com");
        assert_eq!(default_chain().resolve(&req).unwrap().as_str(), "public");
    }

    #[test]
    fn test_invalid_identifier_is_rejected() {
        let req = RequestInfo::new("/").with_header("X-Tenant-ID", "acme\"; DROP SCHEMA x");
        assert!(default_chain().resolve(&req).is_err());

        let reserved = RequestInfo::new("/").with_header("X-Tenant-ID", "information_schema");
        assert!(default_chain().resolve(&reserved).is_err());
    }

    #[test]
    fn test_undecodable_header_is_rejected_not_defaulted() {
        let (mut parts, _) = axum::http::Request::builder()
            .uri("/other")
            .body(())
            .unwrap()
            .into_parts();
        parts.headers.insert(
            "x-tenant-id",
            axum::http::HeaderValue::from_bytes(b"caf\xe9").unwrap(),
        );

        let err = default_chain().resolve(&parts).unwrap_err();
        assert!(matches!(err, crate::error::TenancyError::InvalidTenantId { .. }));
    }

    #[tokio::test]
    async fn test_within_installs_tenant_context() {
        let req = RequestInfo::new("/").with_header("X-Tenant-ID", "tenant1");
        let chain = default_chain();
        let seen = chain.within(&req, async { Tenants::current() }).unwrap().await;

        assert_eq!(seen, Some(TenantId::parse("tenant1").unwrap()));
        assert_eq!(Tenants::current(), None);
    }
}
