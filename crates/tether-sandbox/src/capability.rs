//! Capability set: which identifiers and modules sandboxed code can reach.

use crate::error::ImportDenied;
use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

/// Live handle to the allowed-module set.
///
/// Cloning the handle shares the set. The engine hands one clone to its
/// interpreter so every import consults the current set, never a snapshot.
#[derive(Debug, Clone)]
pub struct ModulePolicy {
    allowed: Arc<RwLock<BTreeSet<String>>>,
    policy_url: Arc<str>,
}

impl ModulePolicy {
    /// Create a policy allowing exactly `allowed`.
    pub fn new<I, S>(allowed: I, policy_url: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: Arc::new(RwLock::new(allowed.into_iter().map(Into::into).collect())),
            policy_url: Arc::from(policy_url.into()),
        }
    }

    /// Check whether `module` may be imported right now.
    pub fn check(&self, module: &str) -> Result<(), ImportDenied> {
        if self.is_allowed(module) {
            Ok(())
        } else {
            Err(ImportDenied::NotAllowed {
                module: module.to_string(),
                policy_url: self.policy_url.to_string(),
            })
        }
    }

    /// True if `module` is currently in the allowed set.
    pub fn is_allowed(&self, module: &str) -> bool {
        self.allowed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(module)
    }

    /// Add modules to the allowed set.
    pub fn allow<I, S>(&self, modules: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut allowed = self.allowed.write().unwrap_or_else(PoisonError::into_inner);
        allowed.extend(modules.into_iter().map(Into::into));
    }

    /// Remove modules from the allowed set. Names not in the set are ignored.
    pub fn revoke<I, S>(&self, modules: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut allowed = self.allowed.write().unwrap_or_else(PoisonError::into_inner);
        for module in modules {
            allowed.remove(module.as_ref());
        }
    }

    /// Sorted copy of the allowed set.
    pub fn allowed(&self) -> Vec<String> {
        self.allowed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

/// The identifiers and modules reachable from one engine's namespace.
///
/// Builtin values live in the interpreter; the set tracks which names are
/// still exposed so that removals only ever touch builtins, never user
/// bindings.
#[derive(Debug, Clone)]
pub struct CapabilitySet {
    builtins: BTreeSet<String>,
    modules: ModulePolicy,
}

impl CapabilitySet {
    /// Create a capability set from the interpreter's startup globals.
    pub fn new<I, S>(builtins: I, modules: ModulePolicy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            builtins: builtins.into_iter().map(Into::into).collect(),
            modules,
        }
    }

    /// True if `name` is an exposed builtin.
    pub fn has_builtin(&self, name: &str) -> bool {
        self.builtins.contains(name)
    }

    /// Remove a builtin. Returns false if it was not exposed.
    pub fn remove_builtin(&mut self, name: &str) -> bool {
        self.builtins.remove(name)
    }

    /// Exposed builtin names.
    pub fn builtins(&self) -> impl Iterator<Item = &str> {
        self.builtins.iter().map(String::as_str)
    }

    /// The allowed-module policy.
    pub fn modules(&self) -> &ModulePolicy {
        &self.modules
    }
}
