// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! Typed, heterogeneous attributes handed to every processor of one `process` call.
//!
//! Keys are `TypeKey<T>` constants; the value type is fixed by the key so a lookup never needs a
//! manual downcast at the call site.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

pub struct TypeKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypeKey<T> {
    pub const fn new(name: &'static str) -> Self {
        TypeKey {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for TypeKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TypeKey<T> {}

impl<T> fmt::Debug for TypeKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.name)
    }
}

type AttributeValue = Arc<dyn Any + Send + Sync>;

/// Two keys sharing a name but not a value type are distinct entries.
type AttributeSlot = (&'static str, TypeId);

/// Immutable once handed to a pipeline. `with` and `merged` build new maps and leave the
/// original untouched, cloning is cheap.
#[derive(Clone, Default)]
pub struct AttributeMap {
    entries: Arc<HashMap<AttributeSlot, AttributeValue>>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Any + Send + Sync>(mut self, key: TypeKey<T>, value: T) -> Self {
        Arc::make_mut(&mut self.entries).insert((key.name, TypeId::of::<T>()), Arc::new(value));
        self
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &TypeKey<T>) -> Option<&T> {
        self.entries
            .get(&(key.name, TypeId::of::<T>()))
            .and_then(|value| value.as_ref().downcast_ref::<T>())
    }

    pub fn contains<T: Any + Send + Sync>(&self, key: &TypeKey<T>) -> bool {
        self.get(key).is_some()
    }

    /// Entries of `other` win on key conflicts.
    pub fn merged(&self, other: &AttributeMap) -> AttributeMap {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        let mut entries = (*self.entries).clone();
        for (slot, value) in other.entries.iter() {
            entries.insert(*slot, value.clone());
        }
        AttributeMap {
            entries: Arc::new(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for AttributeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&'static str> = self.entries.keys().map(|(name, _)| *name).collect();
        keys.sort();
        f.debug_struct("AttributeMap").field("keys", &keys).finish()
    }
}
