//! Partition scope for multi-branch deployments
//!
//! Read operations that feed the auditor accept a scope so one branch can be
//! audited without seeing another branch's trips or wallets.

/// Branch scope passed to partition-aware reads
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PartitionScope {
    /// `None` covers every branch
    pub branch_id: Option<String>,
}

impl PartitionScope {
    /// Scope limited to one branch
    pub fn branch(branch_id: impl Into<String>) -> Self {
        Self {
            branch_id: Some(branch_id.into()),
        }
    }

    /// Scope covering all branches
    pub fn all() -> Self {
        Self { branch_id: None }
    }

    pub fn branch_id(&self) -> Option<&str> {
        self.branch_id.as_deref()
    }

    /// Whether a record tagged with `branch_id` falls inside this scope
    pub fn contains(&self, branch_id: Option<&str>) -> bool {
        match &self.branch_id {
            None => true,
            Some(scope) => branch_id == Some(scope.as_str()),
        }
    }
}

impl std::fmt::Display for PartitionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.branch_id {
            Some(id) => write!(f, "branch:{}", id),
            None => write!(f, "all-branches"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_scope_contains_everything() {
        let scope = PartitionScope::all();
        assert!(scope.contains(Some("jkt")));
        assert!(scope.contains(None));
    }

    #[test]
    fn test_branch_scope_filters() {
        let scope = PartitionScope::branch("jkt");
        assert!(scope.contains(Some("jkt")));
        assert!(!scope.contains(Some("dps")));
        assert!(!scope.contains(None));
        assert_eq!(scope.to_string(), "branch:jkt");
    }
}
