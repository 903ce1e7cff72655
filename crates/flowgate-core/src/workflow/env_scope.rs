//! Scoped process environment overrides.
//!
//! `EnvScope::enter` snapshots the full environment table and applies a
//! workflow's overrides; leaving the scope (explicitly or on drop) puts the
//! table back exactly as it was, including removing variables that were added
//! while the scope was active.

use std::collections::HashMap;
use std::ffi::OsString;

use super::definition::is_settable_env;

/// Copy of the process environment at one point in time.
#[derive(Debug, Clone)]
pub struct EnvSnapshot {
    vars: HashMap<OsString, OsString>,
}

impl EnvSnapshot {
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars_os().collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&OsString> {
        self.vars.get(std::ffi::OsStr::new(key))
    }

    /// Make the process environment match this snapshot.
    pub fn restore(&self) {
        let current: HashMap<OsString, OsString> = std::env::vars_os().collect();

        for key in current.keys() {
            if !self.vars.contains_key(key) {
                // SAFETY: the environment is only mutated from within an
                // `EnvScope`, and the engine holds at most one scope per run.
                unsafe { std::env::remove_var(key) };
            }
        }

        for (key, value) in &self.vars {
            if current.get(key) != Some(value) {
                // SAFETY: see above.
                unsafe { std::env::set_var(key, value) };
            }
        }
    }
}

/// Guard that applies environment overrides until it is exited or dropped.
#[derive(Debug)]
pub struct EnvScope {
    snapshot: Option<EnvSnapshot>,
}

impl EnvScope {
    /// Snapshot the environment, then apply `overrides`.
    ///
    /// Keys that cannot be set (empty, containing `=` or NUL) are skipped with
    /// a warning. An empty override map leaves the environment untouched.
    pub fn enter(overrides: &HashMap<String, String>) -> Self {
        if overrides.is_empty() {
            return Self { snapshot: None };
        }

        let snapshot = EnvSnapshot::capture();
        for (key, value) in overrides {
            if !is_settable_env(key, value) {
                tracing::warn!(%key, "skipping invalid environment override");
                continue;
            }
            // SAFETY: the snapshot above is restored when this scope ends.
            unsafe { std::env::set_var(key, value) };
        }
        tracing::debug!(count = overrides.len(), "entered environment scope");

        Self {
            snapshot: Some(snapshot),
        }
    }

    pub fn is_active(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Restore the snapshot. Calling this more than once is a no-op.
    pub fn exit(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            snapshot.restore();
            tracing::debug!("restored environment");
        }
    }
}

impl Drop for EnvScope {
    fn drop(&mut self) {
        self.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::test_support::ENV_LOCK;

    #[tokio::test]
    async fn applies_and_restores_overrides() {
        let _env = ENV_LOCK.lock().await;
        // SAFETY: ENV_LOCK serializes environment access across tests.
        unsafe { std::env::set_var("FLOWGATE_SCOPE_EXISTING", "before") };
        unsafe { std::env::remove_var("FLOWGATE_SCOPE_NEW") };

        let overrides = HashMap::from([
            ("FLOWGATE_SCOPE_EXISTING".to_string(), "during".to_string()),
            ("FLOWGATE_SCOPE_NEW".to_string(), "added".to_string()),
        ]);

        let mut scope = EnvScope::enter(&overrides);
        assert!(scope.is_active());
        assert_eq!(std::env::var("FLOWGATE_SCOPE_EXISTING").unwrap(), "during");
        assert_eq!(std::env::var("FLOWGATE_SCOPE_NEW").unwrap(), "added");

        scope.exit();
        assert_eq!(std::env::var("FLOWGATE_SCOPE_EXISTING").unwrap(), "before");
        assert!(std::env::var_os("FLOWGATE_SCOPE_NEW").is_none());

        // Second exit is a no-op.
        scope.exit();
        assert_eq!(std::env::var("FLOWGATE_SCOPE_EXISTING").unwrap(), "before");

        unsafe { std::env::remove_var("FLOWGATE_SCOPE_EXISTING") };
    }

    #[tokio::test]
    async fn drop_restores_variables_added_inside_scope() {
        let _env = ENV_LOCK.lock().await;
        {
            let _scope = EnvScope::enter(&HashMap::from([(
                "FLOWGATE_SCOPE_A".to_string(),
                "1".to_string(),
            )]));
            // Something inside the run adds its own variable.
            // SAFETY: ENV_LOCK serializes environment access across tests.
            unsafe { std::env::set_var("FLOWGATE_SCOPE_SIDE_EFFECT", "leak") };
        }
        assert!(std::env::var_os("FLOWGATE_SCOPE_A").is_none());
        assert!(std::env::var_os("FLOWGATE_SCOPE_SIDE_EFFECT").is_none());
    }

    #[tokio::test]
    async fn restores_after_panic() {
        let _env = ENV_LOCK.lock().await;
        let result = std::panic::catch_unwind(|| {
            let _scope = EnvScope::enter(&HashMap::from([(
                "FLOWGATE_SCOPE_PANIC".to_string(),
                "x".to_string(),
            )]));
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(std::env::var_os("FLOWGATE_SCOPE_PANIC").is_none());
    }

    #[tokio::test]
    async fn invalid_keys_are_skipped() {
        let _env = ENV_LOCK.lock().await;
        let before = EnvSnapshot::capture();
        let scope = EnvScope::enter(&HashMap::from([
            ("BAD=KEY".to_string(), "x".to_string()),
            ("FLOWGATE_SCOPE_OK".to_string(), "y".to_string()),
        ]));
        assert_eq!(std::env::var("FLOWGATE_SCOPE_OK").unwrap(), "y");
        drop(scope);
        assert!(before.get("FLOWGATE_SCOPE_OK").is_none());
        assert!(std::env::var_os("FLOWGATE_SCOPE_OK").is_none());
    }

    #[test]
    fn empty_overrides_are_inactive() {
        let scope = EnvScope::enter(&HashMap::new());
        assert!(!scope.is_active());
    }
}
