//! Engine configuration

use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Decision engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Built-ins rejected at policy compile time (network egress and
    /// friends). Mappers compile with the unrestricted set.
    pub unsafe_builtins: Vec<String>,

    /// Roles that bypass all policy evaluation so an operator can always
    /// regain control. Empty disables the check.
    pub anti_lockout_roles: HashSet<String>,

    /// Bounded capacity of the access-log buffer; overflow drops records
    pub log_buffer_capacity: usize,

    /// Environment variables captured into record metadata at engine start,
    /// keyed by variable name, valued by the record key to publish under
    pub audit_env: HashMap<String, String>,

    /// Deadline applied when a request does not carry its own
    pub default_deadline: Duration,

    /// Testing mode: backends may inject simulated failures
    pub mock: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unsafe_builtins: vec!["http.send".to_string()],
            anti_lockout_roles: HashSet::new(),
            log_buffer_capacity: 1024,
            audit_env: HashMap::new(),
            default_deadline: Duration::from_secs(5),
            mock: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.unsafe_builtins.contains(&"http.send".to_string()));
        assert!(config.anti_lockout_roles.is_empty());
        assert_eq!(config.log_buffer_capacity, 1024);
        assert!(!config.mock);
    }
}
