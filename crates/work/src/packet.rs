//! Per-run context bag threaded through a step chain.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

type Value = Box<dyn Any + Send>;

/// Mutable, typed key-value bag owned by one fiber.
///
/// A packet holds two maps: named *components* (typed side-channel values
/// such as the most recent call response, ordered by name) and general
/// *entries* keyed by string. Keys are unique and the last write wins.
/// Reading an absent key, or reading with the wrong type, yields `None`.
#[derive(Default)]
pub struct Packet {
    components: BTreeMap<String, Value>,
    entries: HashMap<String, Value>,
}

impl Packet {
    /// Create an empty packet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of a general entry.
    #[must_use]
    pub fn with<T: Any + Send>(mut self, key: impl Into<String>, value: T) -> Self {
        self.put(key, value);
        self
    }

    /// Read a general entry.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.entries.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Mutable access to a general entry.
    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.entries.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }

    /// Store a general entry, replacing any previous value.
    pub fn put<T: Any + Send>(&mut self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), Box::new(value));
    }

    /// Remove a general entry. Returns whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove and return a general entry of the given type.
    ///
    /// An entry of a different type is left in place.
    pub fn take<T: Any>(&mut self, key: &str) -> Option<T> {
        if !self.entries.get(key).is_some_and(|v| v.is::<T>()) {
            return None;
        }
        self.entries
            .remove(key)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    /// Whether a general entry exists under `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Read a named component.
    pub fn component<T: Any>(&self, name: &str) -> Option<&T> {
        self.components.get(name).and_then(|v| v.downcast_ref::<T>())
    }

    /// Mutable access to a named component.
    pub fn component_mut<T: Any>(&mut self, name: &str) -> Option<&mut T> {
        self.components
            .get_mut(name)
            .and_then(|v| v.downcast_mut::<T>())
    }

    /// Store a named component, replacing any previous value.
    pub fn put_component<T: Any + Send>(&mut self, name: impl Into<String>, value: T) {
        self.components.insert(name.into(), Box::new(value));
    }

    /// Remove a named component. Returns whether it was present.
    pub fn remove_component(&mut self, name: &str) -> bool {
        self.components.remove(name).is_some()
    }

    /// Remove and return a named component of the given type.
    pub fn take_component<T: Any>(&mut self, name: &str) -> Option<T> {
        if !self.components.get(name).is_some_and(|v| v.is::<T>()) {
            return None;
        }
        self.components
            .remove(name)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    /// Whether a component exists under `name`.
    #[must_use]
    pub fn contains_component(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    /// Component names in order.
    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.components.keys().map(String::as_str)
    }

    /// Number of general entries plus components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len().saturating_add(self.components.len())
    }

    /// Whether the packet holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.components.is_empty()
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("Packet")
            .field("components", &self.components.keys().collect::<Vec<_>>())
            .field("entries", &keys)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::arithmetic_side_effects)]

    use super::*;

    #[test]
    fn test_absent_reads() {
        let packet = Packet::new();
        assert!(packet.get::<i32>("x").is_none());
        assert!(packet.component::<String>("response").is_none());
        assert!(packet.is_empty());
    }

    #[test]
    fn test_last_write_wins() {
        let mut packet = Packet::new();
        packet.put("x", 1_i32);
        packet.put("x", 2_i32);
        assert_eq!(packet.get::<i32>("x"), Some(&2));
        assert_eq!(packet.len(), 1);
    }

    #[test]
    fn test_wrong_type_is_absent() {
        let packet = Packet::new().with("x", 1_i32);
        assert!(packet.get::<String>("x").is_none());
        assert!(packet.get::<i32>("x").is_some());
    }

    #[test]
    fn test_components_are_separate_from_entries() {
        let mut packet = Packet::new();
        packet.put("shared", 1_u8);
        packet.put_component("shared", "component".to_string());

        assert_eq!(packet.get::<u8>("shared"), Some(&1));
        assert_eq!(
            packet.component::<String>("shared").map(String::as_str),
            Some("component")
        );
        assert_eq!(packet.len(), 2);
    }

    #[test]
    fn test_take_leaves_mismatched_type() {
        let mut packet = Packet::new();
        packet.put_component("retry", 3_u32);

        assert!(packet.take_component::<String>("retry").is_none());
        assert!(packet.contains_component("retry"));
        assert_eq!(packet.take_component::<u32>("retry"), Some(3));
        assert!(!packet.contains_component("retry"));
    }

    #[test]
    fn test_mutation_through_get_mut() {
        let mut packet = Packet::new().with("count", 0_usize);
        if let Some(count) = packet.get_mut::<usize>("count") {
            *count += 5;
        }
        assert_eq!(packet.take::<usize>("count"), Some(5));
        assert!(!packet.contains_key("count"));
    }

    #[test]
    fn test_component_names_ordered() {
        let mut packet = Packet::new();
        packet.put_component("b", ());
        packet.put_component("a", ());
        let names: Vec<&str> = packet.component_names().collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
