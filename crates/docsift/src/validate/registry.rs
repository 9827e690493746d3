//! Validator registry.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use super::{FieldValidator, IbanValidator};

static REGISTRY: Lazy<RwLock<HashMap<&'static str, Arc<dyn FieldValidator>>>> = Lazy::new(|| {
    let mut map: HashMap<&'static str, Arc<dyn FieldValidator>> = HashMap::new();
    let iban: Arc<dyn FieldValidator> = Arc::new(IbanValidator);
    map.insert(iban.name(), iban);
    RwLock::new(map)
});

/// Register a validator, replacing any previous one with the same name.
pub fn register_validator(validator: Arc<dyn FieldValidator>) {
    let name = validator.name();
    REGISTRY.write().insert(name, validator);
    tracing::debug!(validator = name, "validator registered");
}

/// Look up a validator by name.
pub fn validator(name: &str) -> Option<Arc<dyn FieldValidator>> {
    REGISTRY.read().get(name).map(Arc::clone)
}

/// Names of all registered validators, sorted.
pub fn list_validators() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = REGISTRY.read().keys().copied().collect();
    names.sort_unstable();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_iban_validator_registered() {
        let validator = validator("iban").expect("iban validator should be built in");
        assert_eq!(validator.field(), "iban");
        assert!(list_validators().contains(&"iban"));
    }

    #[test]
    fn test_unknown_validator_is_none() {
        assert!(validator("nonexistent").is_none());
    }
}
