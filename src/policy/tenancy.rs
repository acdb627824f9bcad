//! Optional tenant scoping for credential queries.
//!
//! The scope is chosen once from configuration and injected where queries
//! are built, so callers never branch on whether tenancy is enabled.

use crate::config::TenancyConfig;
use crate::store::credentials::{CredentialQuery, ScopeFilter};
use std::sync::Arc;

/// Strategy for restricting credential queries to a tenant.
pub trait TenancyScope: Send + Sync {
    /// Whether tenant scoping is in effect.
    fn is_active(&self) -> bool;

    /// Column holding the tenant id, when active.
    fn column(&self) -> Option<&str>;

    /// Restrict a query to `tenant_id`. No-op without a tenant or when inactive.
    fn apply_scope(&self, query: &mut CredentialQuery, tenant_id: Option<&str>);

    /// Tenant id to store on a new credential.
    fn tenant_for_new(&self, tenant_id: Option<&str>) -> Option<String> {
        if self.is_active() {
            tenant_id.map(str::to_string)
        } else {
            None
        }
    }
}

/// Scoping by a configured column.
#[derive(Debug, Clone)]
pub struct ActiveTenancy {
    column: String,
}

impl ActiveTenancy {
    /// Scope on `column`.
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }
}

impl TenancyScope for ActiveTenancy {
    fn is_active(&self) -> bool {
        true
    }

    fn column(&self) -> Option<&str> {
        Some(&self.column)
    }

    fn apply_scope(&self, query: &mut CredentialQuery, tenant_id: Option<&str>) {
        if let Some(tenant_id) = tenant_id {
            query.scopes.push(ScopeFilter {
                column: self.column.clone(),
                value: tenant_id.to_string(),
            });
        }
    }
}

/// Single-tenant deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTenancy;

impl TenancyScope for NoTenancy {
    fn is_active(&self) -> bool {
        false
    }

    fn column(&self) -> Option<&str> {
        None
    }

    fn apply_scope(&self, _query: &mut CredentialQuery, _tenant_id: Option<&str>) {}
}

/// Pick the scope implementation for a configuration.
pub fn tenancy_scope(config: &TenancyConfig) -> Arc<dyn TenancyScope> {
    if config.enabled {
        Arc::new(ActiveTenancy::new(config.column.clone()))
    } else {
        Arc::new(NoTenancy)
    }
}
