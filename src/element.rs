//! Per-session element handles with generation-based staleness.
//!
//! Every handle records the registry generation it was issued in. Backends
//! call [`ElementRegistry::advance_generation`] whenever the page context
//! changes (navigation, frame switch); from then on every earlier handle is
//! stale and is rejected without ever touching its native reference.

use std::any::Any;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ElementError {
    #[error("no such element: {0}")]
    NotFound(String),
    #[error("stale element reference: {0}")]
    Stale(String),
    #[error("element {0} does not hold the requested native type")]
    WrongType(String),
}

/// An opaque element reference owned by a session.
pub struct ElementHandle {
    element_id: String,
    native: Option<Box<dyn Any + Send + Sync>>,
    generation: u64,
}

impl ElementHandle {
    pub fn element_id(&self) -> &str {
        &self.element_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Debug for ElementHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementHandle")
            .field("element_id", &self.element_id)
            .field("generation", &self.generation)
            .field("live", &self.native.is_some())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct ElementRegistry {
    handles: HashMap<String, ElementHandle>,
    generation: u64,
}

impl ElementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Register a native element reference and return its new id.
    pub fn insert<T: Any + Send + Sync>(&mut self, native: T) -> String {
        let element_id = uuid::Uuid::new_v4().to_string();
        self.handles.insert(
            element_id.clone(),
            ElementHandle {
                element_id: element_id.clone(),
                native: Some(Box::new(native)),
                generation: self.generation,
            },
        );
        element_id
    }

    /// Check that `element_id` names a live handle from the current generation.
    pub fn validate(&self, element_id: &str) -> Result<&ElementHandle, ElementError> {
        let handle = self
            .handles
            .get(element_id)
            .ok_or_else(|| ElementError::NotFound(element_id.to_string()))?;
        if handle.generation != self.generation || handle.native.is_none() {
            return Err(ElementError::Stale(element_id.to_string()));
        }
        Ok(handle)
    }

    /// Borrow the native reference behind `element_id`.
    pub fn resolve<T: Any>(&self, element_id: &str) -> Result<&T, ElementError> {
        self.validate(element_id)?
            .native
            .as_ref()
            .and_then(|native| native.downcast_ref::<T>())
            .ok_or_else(|| ElementError::WrongType(element_id.to_string()))
    }

    /// Start a new page context. Native references of every earlier handle
    /// are released; their ids remain known so lookups report them as stale.
    pub fn advance_generation(&mut self) -> u64 {
        self.generation += 1;
        for handle in self.handles.values_mut() {
            handle.native = None;
        }
        self.generation
    }

    /// Forget every handle, live or stale.
    pub fn clear(&mut self) {
        self.handles.clear();
    }

    /// Number of handles issued in the current generation.
    pub fn live(&self) -> usize {
        self.handles
            .values()
            .filter(|h| h.generation == self.generation && h.native.is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_element_resolves() {
        let mut reg = ElementRegistry::new();
        let id = reg.insert(String::from("node-1"));
        assert_eq!(reg.resolve::<String>(&id).unwrap(), "node-1");
        assert_eq!(reg.validate(&id).unwrap().generation(), 0);
    }

    #[test]
    fn ids_are_unique() {
        let mut reg = ElementRegistry::new();
        let a = reg.insert(1u32);
        let b = reg.insert(1u32);
        assert_ne!(a, b);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let reg = ElementRegistry::new();
        assert_eq!(
            reg.validate("nope").unwrap_err(),
            ElementError::NotFound("nope".into())
        );
    }

    #[test]
    fn advancing_generation_makes_old_handles_stale() {
        let mut reg = ElementRegistry::new();
        let old = reg.insert(7u64);
        assert_eq!(reg.advance_generation(), 1);
        assert_eq!(reg.validate(&old).unwrap_err(), ElementError::Stale(old.clone()));
        assert_eq!(
            reg.resolve::<u64>(&old).unwrap_err(),
            ElementError::Stale(old.clone())
        );

        let fresh = reg.insert(8u64);
        assert_eq!(*reg.resolve::<u64>(&fresh).unwrap(), 8);
        assert_eq!(reg.live(), 1);
    }

    #[test]
    fn wrong_native_type_is_reported() {
        let mut reg = ElementRegistry::new();
        let id = reg.insert(5i32);
        assert_eq!(
            reg.resolve::<String>(&id).unwrap_err(),
            ElementError::WrongType(id)
        );
    }

    #[test]
    fn clear_forgets_everything() {
        let mut reg = ElementRegistry::new();
        let id = reg.insert(());
        reg.clear();
        assert!(reg.is_empty());
        assert!(matches!(reg.validate(&id), Err(ElementError::NotFound(_))));
    }
}
