//! Component storage, component-type sets and per-entity masks

use std::any::{Any, TypeId};
use std::collections::BTreeMap;

/// Trait for components
pub trait Component: Send + Sync + 'static {}

/// Type-erased component storage
pub trait ComponentStorage: Send + Sync {
    fn remove(&mut self, index: u32);
    fn has(&self, index: u32) -> bool;
    fn clear(&mut self);
    fn len(&self) -> usize;
    fn indices(&self) -> Vec<u32>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Concrete storage for a specific component type, keyed by entity slot.
/// Ordered so iteration follows entity creation order.
pub struct TypedComponentStorage<T: Component> {
    pub(crate) data: BTreeMap<u32, T>,
}

impl<T: Component> TypedComponentStorage<T> {
    pub fn new() -> Self {
        Self {
            data: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, index: u32, component: T) -> Option<T> {
        self.data.insert(index, component)
    }

    pub fn get(&self, index: u32) -> Option<&T> {
        self.data.get(&index)
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut T> {
        self.data.get_mut(&index)
    }

    pub fn take(&mut self, index: u32) -> Option<T> {
        self.data.remove(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.data.iter().map(|(index, comp)| (*index, comp))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut T)> {
        self.data.iter_mut().map(|(index, comp)| (*index, comp))
    }
}

impl<T: Component> Default for TypedComponentStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Component> ComponentStorage for TypedComponentStorage<T> {
    fn remove(&mut self, index: u32) {
        self.data.remove(&index);
    }

    fn has(&self, index: u32) -> bool {
        self.data.contains_key(&index)
    }

    fn clear(&mut self) {
        self.data.clear();
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn indices(&self) -> Vec<u32> {
        self.data.keys().copied().collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Runtime identity of a component type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentType {
    pub id: TypeId,
    pub name: &'static str,
}

impl ComponentType {
    pub fn of<T: Component>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: short_type_name::<T>(),
        }
    }
}

/// The component shape a system works on. An entity matches when it holds
/// every listed type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentSet {
    types: Vec<ComponentType>,
}

impl ComponentSet {
    pub fn new() -> Self {
        Self { types: Vec::new() }
    }

    pub fn with<T: Component>(mut self) -> Self {
        let ty = ComponentType::of::<T>();
        if !self.types.contains(&ty) {
            self.types.push(ty);
        }
        self
    }

    pub fn types(&self) -> &[ComponentType] {
        &self.types
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Bitset of registered component types held by one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentMask {
    words: Vec<u64>,
}

impl ComponentMask {
    pub fn set(&mut self, bit: usize) {
        let word = bit / 64;
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (bit % 64);
    }

    pub fn unset(&mut self, bit: usize) {
        if let Some(word) = self.words.get_mut(bit / 64) {
            *word &= !(1u64 << (bit % 64));
        }
    }

    pub fn contains(&self, bit: usize) -> bool {
        self.words
            .get(bit / 64)
            .map(|word| word & (1u64 << (bit % 64)) != 0)
            .unwrap_or(false)
    }

    pub fn contains_all(&self, other: &ComponentMask) -> bool {
        other.words.iter().enumerate().all(|(i, required)| {
            let held = self.words.get(i).copied().unwrap_or(0);
            held & required == *required
        })
    }

    pub fn clear(&mut self) {
        self.words.clear();
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}
