//! Caller identity and role checks for the trigger surfaces
//!
//! Callers are identified by an [`AuthContext`] passed into each guarded
//! operation. Whether that context may run an operation is decided by a
//! [`RoleChecker`].

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::config::ApiToken;

/// Who is asking
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthContext {
    /// `None` for anonymous callers
    pub user_id: Option<String>,
    pub roles: Vec<String>,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(user_id: impl Into<String>, roles: &[&str]) -> Self {
        Self {
            user_id: Some(user_id.into()),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    /// Context for in-process jobs (timer loop, one-shot CLI)
    pub fn system() -> Self {
        Self::user("system", &["system"])
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }
}

impl fmt::Display for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user_id {
            Some(id) => write!(f, "{}", id),
            None => write!(f, "anonymous"),
        }
    }
}

/// Authorization collaborator
pub trait RoleChecker: Send + Sync {
    fn has_role(&self, user: &AuthContext, allowed: &[String]) -> bool;
}

/// Checks the roles carried on the context itself
pub struct ContextRoleChecker;

impl RoleChecker for ContextRoleChecker {
    fn has_role(&self, user: &AuthContext, allowed: &[String]) -> bool {
        if user.is_anonymous() {
            return false;
        }
        user.roles
            .iter()
            .any(|role| allowed.iter().any(|a| a.eq_ignore_ascii_case(role)))
    }
}

/// Bearer token lookup built from the configured API tokens
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    tokens: HashMap<String, AuthContext>,
}

impl TokenRegistry {
    pub fn new(tokens: &[ApiToken]) -> Self {
        let tokens = tokens
            .iter()
            .filter(|t| !t.token.is_empty())
            .map(|t| {
                (
                    t.token.clone(),
                    AuthContext {
                        user_id: Some(t.user_id.clone()),
                        roles: t.roles.clone(),
                    },
                )
            })
            .collect();
        Self { tokens }
    }

    /// Resolve an `Authorization` header value; unknown or missing tokens are anonymous
    pub fn resolve(&self, authorization: Option<&str>) -> AuthContext {
        authorization
            .and_then(bearer_token)
            .and_then(|token| self.tokens.get(token).cloned())
            .unwrap_or_else(AuthContext::anonymous)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Extract the token from `Bearer <token>`
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_role_check() {
        let checker = ContextRoleChecker;
        let admin = AuthContext::user("u-1", &["Admin"]);
        let guide = AuthContext::user("u-2", &["guide"]);

        assert!(checker.has_role(&admin, &roles(&["admin", "system"])));
        assert!(!checker.has_role(&guide, &roles(&["admin", "system"])));
        assert!(!checker.has_role(&AuthContext::anonymous(), &roles(&["admin"])));
        assert!(checker.has_role(&AuthContext::system(), &roles(&["admin", "system"])));
    }

    #[test]
    fn test_token_resolution() {
        let registry = TokenRegistry::new(&[ApiToken {
            token: "s3cret".into(),
            user_id: "ops".into(),
            roles: roles(&["admin"]),
        }]);

        let ctx = registry.resolve(Some("Bearer s3cret"));
        assert_eq!(ctx.user_id.as_deref(), Some("ops"));
        assert_eq!(ctx.roles, roles(&["admin"]));

        assert!(registry.resolve(Some("Bearer wrong")).is_anonymous());
        assert!(registry.resolve(Some("Basic s3cret")).is_anonymous());
        assert!(registry.resolve(None).is_anonymous());
    }

    #[test]
    fn test_bearer_parsing() {
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Bearer   "), None);
        assert_eq!(bearer_token("abc"), None);
    }
}
