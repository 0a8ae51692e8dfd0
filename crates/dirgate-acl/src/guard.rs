//! Per-request authorization decisions.
//!
//! [`AclGuard::check`] never fails: every error, timeout, or unknown key
//! becomes a deny. On a cache hit a check touches only memory and the cache.

use dirgate_core::{Decision, PermissionKey, PrincipalRef, ResourceAttributes};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::AclCache;
use crate::catalog::PermissionCatalog;
use crate::error::{AclError, Result};
use crate::membership::MembershipProvider;

/// Decides whether a principal may exercise a permission.
#[derive(Clone)]
pub struct AclGuard {
    cache: Arc<AclCache>,
    membership: Arc<dyn MembershipProvider>,
    catalog: Arc<PermissionCatalog>,
    check_timeout: Duration,
}

impl std::fmt::Debug for AclGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AclGuard")
            .field("known_permissions", &self.catalog.len())
            .field("check_timeout", &self.check_timeout)
            .finish_non_exhaustive()
    }
}

impl AclGuard {
    /// Creates a guard.
    pub fn new(
        cache: Arc<AclCache>,
        membership: Arc<dyn MembershipProvider>,
        catalog: Arc<PermissionCatalog>,
        check_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            membership,
            catalog,
            check_timeout,
        }
    }

    /// Decides the request, denying on any failure.
    ///
    /// A scoped grant needs `resource` attributes matching one of its groups;
    /// with `None` it denies.
    pub async fn check(
        &self,
        principal: &PrincipalRef,
        permission: &str,
        resource: Option<&ResourceAttributes>,
    ) -> Decision {
        match self.decide(principal, permission, resource).await {
            Ok(decision) => {
                log::trace!("{principal} {permission}: {}", decision.effect);
                decision
            }
            Err(AclError::UnknownPermission { key }) => {
                log::warn!("Check against undeclared permission '{key}' by {principal}; denying");
                Decision::deny()
            }
            Err(e) => {
                log::error!("Check {principal} {permission} failed closed: {e}");
                Decision::deny()
            }
        }
    }

    /// Like [`check`](Self::check), but a deny is an error.
    ///
    /// Failures surface as their own error; a clean deny surfaces as
    /// [`AclError::PermissionDenied`].
    pub async fn enforce(
        &self,
        principal: &PrincipalRef,
        permission: &str,
        resource: Option<&ResourceAttributes>,
    ) -> Result<Decision> {
        let decision = self.decide(principal, permission, resource).await?;
        if decision.is_allowed() {
            Ok(decision)
        } else {
            Err(AclError::PermissionDenied {
                principal: principal.to_string(),
                permission: permission.to_string(),
            })
        }
    }

    async fn decide(
        &self,
        principal: &PrincipalRef,
        permission: &str,
        resource: Option<&ResourceAttributes>,
    ) -> Result<Decision> {
        if !self.catalog.contains(permission) {
            return Err(AclError::UnknownPermission {
                key: permission.to_string(),
            });
        }
        let acl = tokio::time::timeout(
            self.check_timeout,
            self.cache.resolve(principal, self.membership.as_ref()),
        )
        .await
        .map_err(|_| AclError::timeout(self.check_timeout))??;
        Ok(acl.evaluate(&PermissionKey::new(permission), resource))
    }
}
