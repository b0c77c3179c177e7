//! Typed metadata bag for middleware-to-middleware signaling
//!
//! Entries are keyed by their Rust type, so a middleware defines a small struct
//! (for example `struct PeerName(String)`) and every reader gets that exact type
//! back. Insertion order is preserved for diagnostics.

use std::any::{Any, TypeId};
use std::fmt;

trait ExtensionValue: Any + Send + Sync {
    fn clone_box(&self) -> Box<dyn ExtensionValue>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Clone + Send + Sync> ExtensionValue for T {
    fn clone_box(&self) -> Box<dyn ExtensionValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Ordered map from a type to one value of that type
#[derive(Default)]
pub struct Extensions {
    entries: Vec<(TypeId, Box<dyn ExtensionValue>)>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    fn position<T: 'static>(&self) -> Option<usize> {
        let id = TypeId::of::<T>();
        self.entries.iter().position(|(key, _)| *key == id)
    }

    /// Insert a value, returning the previous value of the same type
    pub fn insert<T: Any + Clone + Send + Sync>(&mut self, value: T) -> Option<T> {
        let previous = self.remove::<T>();
        self.entries.push((TypeId::of::<T>(), Box::new(value)));
        previous
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.position::<T>()
            .and_then(|index| (*self.entries[index].1).as_any().downcast_ref::<T>())
    }

    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        let index = self.position::<T>()?;
        (*self.entries[index].1).as_any_mut().downcast_mut::<T>()
    }

    /// Get the value of type `T`, inserting one produced by `init` if absent
    pub fn get_or_insert_with<T, F>(&mut self, init: F) -> &mut T
    where
        T: Any + Clone + Send + Sync,
        F: FnOnce() -> T,
    {
        let index = match self.position::<T>() {
            Some(index) => index,
            None => {
                self.entries.push((TypeId::of::<T>(), Box::new(init())));
                self.entries.len() - 1
            }
        };
        (*self.entries[index].1)
            .as_any_mut()
            .downcast_mut::<T>()
            .expect("extension entry keyed by its own TypeId")
    }

    pub fn remove<T: Any>(&mut self) -> Option<T> {
        let index = self.position::<T>()?;
        let (_, value) = self.entries.remove(index);
        value.into_any().downcast::<T>().ok().map(|boxed| *boxed)
    }

    pub fn contains<T: Any>(&self) -> bool {
        self.position::<T>().is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Type names of the stored values, in insertion order
    pub fn type_names(&self) -> Vec<&'static str> {
        self.entries
            .iter()
            .map(|(_, value)| (**value).type_name())
            .collect()
    }
}

impl Clone for Extensions {
    fn clone(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|(key, value)| (*key, (**value).clone_box()))
                .collect(),
        }
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.type_names()).finish()
    }
}
