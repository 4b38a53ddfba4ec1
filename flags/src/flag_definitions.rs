use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::api::FlagError;
use crate::flag_matching::FlagMatcher;

/// How a flag decides for a given visitor.
///
/// `Chance` is the common shape: a percentage rollout over the visitor
/// bucket. `Custom` lets a flag bring its own deterministic decision
/// function instead.
#[derive(Clone)]
pub enum DecisionStrategy {
    Chance { chance: u8 },
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl fmt::Debug for DecisionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionStrategy::Chance { chance } => {
                f.debug_struct("Chance").field("chance", chance).finish()
            }
            DecisionStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlagDefinition {
    pub key: String,
    pub description: String,
    strategy: DecisionStrategy,
}

impl FlagDefinition {
    pub fn with_chance(
        key: impl Into<String>,
        description: impl Into<String>,
        chance: u8,
    ) -> Result<Self, FlagError> {
        if chance > 100 {
            return Err(FlagError::InvalidChance(chance));
        }
        Ok(FlagDefinition {
            key: key.into(),
            description: description.into(),
            strategy: DecisionStrategy::Chance { chance },
        })
    }

    pub fn with_custom(
        key: impl Into<String>,
        description: impl Into<String>,
        decide: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        FlagDefinition {
            key: key.into(),
            description: description.into(),
            strategy: DecisionStrategy::Custom(Arc::new(decide)),
        }
    }

    /// Pure and deterministic for a fixed visitor id and definition.
    pub fn decide(&self, visitor_id: &str) -> bool {
        match &self.strategy {
            DecisionStrategy::Chance { chance } => {
                FlagMatcher::new(visitor_id).matches_chance(*chance)
            }
            DecisionStrategy::Custom(decide) => decide(visitor_id),
        }
    }
}

/// Process-wide catalog of flag definitions plus a best-effort cache of the
/// persisted overrides.
///
/// Definitions are fixed once the registry is built; the override cache is
/// the only mutable state and is touched exclusively through
/// `set_override` / `clear_override` / `hydrate`. The store stays the
/// source of truth across processes, this cache is what a resolver falls
/// back to when a store read fails.
pub struct FlagRegistry {
    flags: Vec<FlagDefinition>,
    index: HashMap<String, usize>,
    // Tri-state per key: absent = unset, present = forced true/false.
    // A forced `false` is a real override, never "no override".
    overrides: RwLock<HashMap<String, bool>>,
}

impl FlagRegistry {
    pub fn new() -> Self {
        FlagRegistry {
            flags: Vec::new(),
            index: HashMap::new(),
            overrides: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&mut self, definition: FlagDefinition) -> Result<(), FlagError> {
        if self.index.contains_key(&definition.key) {
            return Err(FlagError::DuplicateFlag(definition.key));
        }
        self.index.insert(definition.key.clone(), self.flags.len());
        self.flags.push(definition);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&FlagDefinition> {
        self.index.get(key).map(|i| &self.flags[*i])
    }

    /// All definitions in registration order, stable across calls.
    pub fn all(&self) -> &[FlagDefinition] {
        &self.flags
    }

    pub fn set_override(&self, key: &str, value: bool) -> Result<(), FlagError> {
        if !self.index.contains_key(key) {
            return Err(FlagError::FlagNotFound);
        }
        self.overrides
            .write()
            .expect("override lock poisoned")
            .insert(key.to_string(), value);
        Ok(())
    }

    pub fn clear_override(&self, key: &str) -> Result<(), FlagError> {
        if !self.index.contains_key(key) {
            return Err(FlagError::FlagNotFound);
        }
        self.overrides
            .write()
            .expect("override lock poisoned")
            .remove(key);
        Ok(())
    }

    pub fn override_for(&self, key: &str) -> Option<bool> {
        self.overrides
            .read()
            .expect("override lock poisoned")
            .get(key)
            .copied()
    }

    /// Snapshot of the cached overrides.
    pub fn overrides(&self) -> HashMap<String, bool> {
        self.overrides
            .read()
            .expect("override lock poisoned")
            .clone()
    }

    /// Replaces the cache with the persisted override set. Keys the
    /// registry does not know are dropped: the registry decides which
    /// flags exist, the store only carries override values.
    pub fn hydrate(&self, persisted: &HashMap<String, bool>) {
        let filtered: HashMap<String, bool> = persisted
            .iter()
            .filter(|(key, _)| self.index.contains_key(key.as_str()))
            .map(|(key, value)| (key.clone(), *value))
            .collect();
        *self.overrides.write().expect("override lock poisoned") = filtered;
    }
}

impl Default for FlagRegistry {
    fn default() -> Self {
        Self::new()
    }
}
