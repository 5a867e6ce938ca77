//! Typed extension storage for users and channels.
//!
//! Modules attach state to core objects through a registry of extension
//! items.  Each item registers a name and a dispose hook once; objects then
//! store at most one opaque value per item.  The dispose hook runs both on
//! explicit removal and when the owning object is destroyed, so modules can
//! release whatever their handles refer to.

use std::any::Any;
use std::collections::HashMap;

/// Handle to a registered extension item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExtensionId(usize);

type Dispose = fn(Box<dyn Any>);

/// The process-wide table of registered extension items.
#[derive(Default)]
pub struct ExtensionRegistry {
    items: Vec<(String, Dispose)>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an extension item under `name` and returns its id.
    ///
    /// Returns `None` when the name is already taken.
    pub fn register(&mut self, name: &str, dispose: Dispose) -> Option<ExtensionId> {
        if self.items.iter().any(|(n, _)| n == name) {
            return None;
        }
        self.items.push((name.to_owned(), dispose));
        Some(ExtensionId(self.items.len() - 1))
    }

    pub fn name_of(&self, id: ExtensionId) -> Option<&str> {
        self.items.get(id.0).map(|(n, _)| n.as_str())
    }

    fn dispose_of(&self, id: ExtensionId) -> Option<Dispose> {
        self.items.get(id.0).map(|(_, d)| *d)
    }
}

/// Per-object extension values, keyed by registered item.
#[derive(Default)]
pub struct Extensions {
    values: HashMap<ExtensionId, Box<dyn Any>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a value for `id`.  Rejects duplicates: returns `false` and
    /// leaves the existing value in place when one is already attached.
    pub fn extend(&mut self, id: ExtensionId, value: Box<dyn Any>) -> bool {
        use std::collections::hash_map::Entry;

        match self.values.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(e) => {
                e.insert(value);
                true
            }
        }
    }

    pub fn get(&self, id: ExtensionId) -> Option<&dyn Any> {
        self.values.get(&id).map(Box::as_ref)
    }

    pub fn get_mut(&mut self, id: ExtensionId) -> Option<&mut Box<dyn Any>> {
        self.values.get_mut(&id)
    }

    /// Detaches and returns the value for `id`; the caller assumes its
    /// disposal.  Used by the owning module itself, which knows what the
    /// handle holds.
    pub fn take(&mut self, id: ExtensionId) -> Option<Box<dyn Any>> {
        self.values.remove(&id)
    }

    /// Detaches the value for `id`, running its dispose hook.  Idempotent.
    pub fn shrink(&mut self, registry: &ExtensionRegistry, id: ExtensionId) -> bool {
        match self.values.remove(&id) {
            Some(value) => {
                if let Some(dispose) = registry.dispose_of(id) {
                    dispose(value);
                }
                true
            }
            None => false,
        }
    }

    /// Runs every dispose hook.  Called when the owning object is destroyed.
    pub fn dispose_all(&mut self, registry: &ExtensionRegistry) {
        for (id, value) in self.values.drain() {
            if let Some(dispose) = registry.dispose_of(id) {
                dispose(value);
            }
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = ExtensionId> + '_ {
        self.values.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    thread_local! {
        static DISPOSED: Cell<usize> = Cell::new(0);
    }

    fn count_dispose(_: Box<dyn Any>) {
        DISPOSED.with(|c| c.set(c.get() + 1));
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let mut registry = ExtensionRegistry::new();
        let id = registry.register("metadata", count_dispose).unwrap();
        assert!(registry.register("metadata", count_dispose).is_none());

        let mut ext = Extensions::new();
        assert!(ext.extend(id, Box::new(1_u32)));
        assert!(!ext.extend(id, Box::new(2_u32)));
        assert_eq!(ext.get(id).unwrap().downcast_ref::<u32>(), Some(&1));
    }

    #[test]
    fn test_shrink_idempotent_and_disposes() {
        DISPOSED.with(|c| c.set(0));
        let mut registry = ExtensionRegistry::new();
        let id = registry.register("marker", count_dispose).unwrap();

        let mut ext = Extensions::new();
        ext.extend(id, Box::new(Rc::new(())));
        assert!(ext.shrink(&registry, id));
        assert!(!ext.shrink(&registry, id));
        assert_eq!(DISPOSED.with(Cell::get), 1);
    }

    #[test]
    fn test_dispose_all() {
        DISPOSED.with(|c| c.set(0));
        let mut registry = ExtensionRegistry::new();
        let a = registry.register("a", count_dispose).unwrap();
        let b = registry.register("b", count_dispose).unwrap();

        let mut ext = Extensions::new();
        ext.extend(a, Box::new(()));
        ext.extend(b, Box::new(()));
        ext.dispose_all(&registry);
        assert_eq!(DISPOSED.with(Cell::get), 2);
        assert_eq!(ext.ids().count(), 0);
    }
}
