//! Per-session typed key/value store.
//!
//! Filters share one instance across every session of a service, so any
//! per-connection state they need (partial frames, negotiated options)
//! lives here instead of on the filter.
//!
//! A key is a name plus a declared value type. Keys compare equal by name;
//! binding a name to a value of a different type fails with
//! [`AttributeError::TypeMismatch`] and leaves the stored value alone.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;

use parking_lot::RwLock;

use crate::errors::AttributeError;

/// Typed attribute key.
///
/// ```ignore
/// const PENDING: AttributeKey<Vec<u8>> = AttributeKey::new("codec.pending");
/// ```
pub struct AttributeKey<T> {
    name: &'static str,
    _type: PhantomData<fn() -> T>,
}

impl<T> AttributeKey<T> {
    /// Declare a key.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _type: PhantomData,
        }
    }

    /// Key name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Name of the declared value type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

impl<T> Clone for AttributeKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AttributeKey<T> {}

impl<T> PartialEq for AttributeKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<T> Eq for AttributeKey<T> {}

impl<T> fmt::Debug for AttributeKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeKey")
            .field("name", &self.name)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

/// A type-erased value paired with its type name, for [`AttributeStore::set_dyn`].
pub struct AttributeValue {
    value: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl AttributeValue {
    /// Erase `value`.
    pub fn new<V: Any + Send + Sync>(value: V) -> Self {
        Self {
            value: Box::new(value),
            type_name: std::any::type_name::<V>(),
        }
    }

    /// Name of the erased type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeValue")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}

struct Entry {
    type_id: TypeId,
    type_name: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

/// Thread-safe attribute map.
#[derive(Default)]
pub struct AttributeStore {
    entries: RwLock<HashMap<&'static str, Entry>>,
}

impl AttributeStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value under `key`, cloned out, or `None` if unset.
    pub fn get<T>(&self, key: &AttributeKey<T>) -> Option<T>
    where
        T: Any + Send + Sync + Clone,
    {
        self.with(key, T::clone)
    }

    /// Value under `key`, or `default` if unset.
    pub fn get_or<T>(&self, key: &AttributeKey<T>, default: T) -> T
    where
        T: Any + Send + Sync + Clone,
    {
        self.get(key).unwrap_or(default)
    }

    /// Run `f` against the stored value without cloning it.
    ///
    /// `f` runs while the store is read-locked. It must not write to this
    /// store; use [`get`](Self::get) for a clone that outlives the lock.
    pub fn with<T, R>(&self, key: &AttributeKey<T>, f: impl FnOnce(&T) -> R) -> Option<R>
    where
        T: Any + Send + Sync,
    {
        let entries = self.entries.read();
        entries
            .get(key.name())
            .and_then(|entry| entry.value.downcast_ref::<T>())
            .map(f)
    }

    /// Bind `value` to `key`, returning the previous value.
    pub fn set<T>(&self, key: &AttributeKey<T>, value: T) -> Result<Option<T>, AttributeError>
    where
        T: Any + Send + Sync,
    {
        self.insert(key, Box::new(value), std::any::type_name::<T>())
    }

    /// Bind a type-erased value, checking it against the key's declared type.
    pub fn set_dyn<T>(
        &self,
        key: &AttributeKey<T>,
        value: AttributeValue,
    ) -> Result<Option<T>, AttributeError>
    where
        T: Any + Send + Sync,
    {
        if !value.value.is::<T>() {
            return Err(AttributeError::TypeMismatch {
                key: key.name().to_string(),
                expected: key.type_name(),
                actual: value.type_name,
            });
        }
        self.insert(key, value.value, value.type_name)
    }

    /// Mutate the value under `key` in place, inserting `init()` first if unset.
    ///
    /// `init` and `f` run while the store is write-locked and must not touch
    /// this store. To derive another attribute, return what it needs from
    /// `f` and [`set`](Self::set) it after `update` returns.
    pub fn update<T, R>(
        &self,
        key: &AttributeKey<T>,
        init: impl FnOnce() -> T,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, AttributeError>
    where
        T: Any + Send + Sync,
    {
        let mut entries = self.entries.write();
        let entry = entries.entry(key.name()).or_insert_with(|| Entry {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            value: Box::new(init()),
        });
        let expected = entry.type_name;
        entry
            .value
            .downcast_mut::<T>()
            .map(f)
            .ok_or_else(|| AttributeError::TypeMismatch {
                key: key.name().to_string(),
                expected,
                actual: std::any::type_name::<T>(),
            })
    }

    /// Remove the value under `key`, returning it.
    pub fn remove<T>(&self, key: &AttributeKey<T>) -> Result<Option<T>, AttributeError>
    where
        T: Any + Send + Sync,
    {
        let mut entries = self.entries.write();
        match entries.get(key.name()) {
            None => Ok(None),
            Some(entry) if entry.type_id != TypeId::of::<T>() => {
                Err(AttributeError::TypeMismatch {
                    key: key.name().to_string(),
                    expected: entry.type_name,
                    actual: std::any::type_name::<T>(),
                })
            }
            Some(_) => Ok(entries
                .remove(key.name())
                .and_then(|entry| entry.value.downcast::<T>().ok())
                .map(|value| *value)),
        }
    }

    /// Whether any value is bound to `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Snapshot of the currently bound key names.
    pub fn keys(&self) -> HashSet<&'static str> {
        self.entries.read().keys().copied().collect()
    }

    /// Number of bound keys.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    fn insert<T>(
        &self,
        key: &AttributeKey<T>,
        value: Box<dyn Any + Send + Sync>,
        actual: &'static str,
    ) -> Result<Option<T>, AttributeError>
    where
        T: Any + Send + Sync,
    {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(key.name()) {
            if existing.type_id != TypeId::of::<T>() {
                return Err(AttributeError::TypeMismatch {
                    key: key.name().to_string(),
                    expected: existing.type_name,
                    actual,
                });
            }
        }
        let previous = entries.insert(
            key.name(),
            Entry {
                type_id: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
                value,
            },
        );
        Ok(previous
            .and_then(|entry| entry.value.downcast::<T>().ok())
            .map(|value| *value))
    }
}

impl fmt::Debug for AttributeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeStore")
            .field("keys", &self.keys())
            .finish()
    }
}
