//! Authorization query assembly.
//!
//! [`QueryBuilder`] is the single place where request facts become PDP
//! attributes. Any new contextual attribute is added here so the query schema
//! stays in one versionable spot.
//!
//! Attribute maps are `BTreeMap`s: the same `(identity, entry, action)`
//! always yields a byte-identical query.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use super::action::Action;
use crate::catalog::CatalogEntry;
use crate::mtls::SpiffeId;

/// Principal attribute carrying the caller's trust domain.
pub const ATTR_TRUST_DOMAIN: &str = "trustDomain";

/// Resource attribute carrying the sensitivity classification.
pub const ATTR_CATEGORY: &str = "category";

/// Attribute map sent to the PDP.
pub type Attributes = BTreeMap<String, Value>;

/// Who is asking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Principal {
    /// Canonical SPIFFE ID
    pub id: String,
    /// Static roles assigned to every workload identity
    pub roles: Vec<String>,
    /// Policy attributes; always contains `trustDomain`
    #[serde(rename = "attr")]
    pub attributes: Attributes,
}

/// What is being accessed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    /// Resource kind the PDP policies are written against
    pub kind: String,
    /// Catalog identifier
    pub id: String,
    /// Policy attributes; always contains `category`
    #[serde(rename = "attr")]
    pub attributes: Attributes,
}

/// A complete `(principal, resource, action)` question for the PDP.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorizationQuery {
    /// Caller
    pub principal: Principal,
    /// Target
    pub resource: Resource,
    /// Requested action
    pub action: Action,
}

/// Builds [`AuthorizationQuery`] values with a fixed schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryBuilder {
    principal_roles: Vec<String>,
    resource_kind: String,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self {
            principal_roles: vec!["api".to_string()],
            resource_kind: "document".to_string(),
        }
    }
}

impl QueryBuilder {
    /// Builder with explicit roles and resource kind.
    pub fn new(principal_roles: Vec<String>, resource_kind: impl Into<String>) -> Self {
        Self {
            principal_roles,
            resource_kind: resource_kind.into(),
        }
    }

    /// Assemble the query. Pure; no failure path.
    #[must_use]
    pub fn build(
        &self,
        identity: &SpiffeId,
        entry: &CatalogEntry,
        action: Action,
    ) -> AuthorizationQuery {
        let mut principal_attrs = Attributes::new();
        principal_attrs.insert(
            ATTR_TRUST_DOMAIN.to_string(),
            Value::String(identity.trust_domain().name().to_string()),
        );

        let mut resource_attrs = Attributes::new();
        resource_attrs.insert(
            ATTR_CATEGORY.to_string(),
            Value::String(entry.category.as_str().to_string()),
        );

        AuthorizationQuery {
            principal: Principal {
                id: identity.to_string(),
                roles: self.principal_roles.clone(),
                attributes: principal_attrs,
            },
            resource: Resource {
                kind: self.resource_kind.clone(),
                id: entry.id.clone(),
                attributes: resource_attrs,
            },
            action,
        }
    }
}

/// Build a query with the default schema (`api` role, `document` kind).
#[must_use]
pub fn build_query(
    identity: &SpiffeId,
    entry: &CatalogEntry,
    action: Action,
) -> AuthorizationQuery {
    QueryBuilder::default().build(identity, entry, action)
}
