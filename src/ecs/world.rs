//! World - central ECS container

use std::any::TypeId;
use std::collections::HashMap;

use super::component::{ComponentMask, ComponentStorage};
use super::entity::EntityAllocator;
use super::{Component, ComponentSet, ComponentType, EcsError, Entity, TypedComponentStorage};

/// World holds all entities and components
pub struct World {
    entities: EntityAllocator,
    storages: HashMap<TypeId, Box<dyn ComponentStorage>>,
    type_bits: HashMap<TypeId, usize>,
    masks: Vec<ComponentMask>,
}

impl World {
    pub fn new() -> Self {
        Self {
            entities: EntityAllocator::new(),
            storages: HashMap::new(),
            type_bits: HashMap::new(),
            masks: Vec::new(),
        }
    }

    /// Create a new entity with a debug name
    pub fn create_entity(&mut self, name: impl Into<String>) -> Entity {
        let entity = self.entities.allocate(name);
        let slot = entity.index as usize;
        if self.masks.len() <= slot {
            self.masks.resize_with(slot + 1, ComponentMask::default);
        }
        self.masks[slot].clear();
        entity
    }

    /// Destroy an entity and remove all its components
    pub fn destroy_entity(&mut self, entity: Entity) -> Result<(), EcsError> {
        self.ensure_alive(entity)?;
        for storage in self.storages.values_mut() {
            storage.remove(entity.index);
        }
        self.masks[entity.index as usize].clear();
        self.entities.deallocate(entity);
        Ok(())
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    pub fn name(&self, entity: Entity) -> Option<&str> {
        self.entities.name(entity)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.count()
    }

    /// Add (or replace) a component on an entity
    pub fn add_component<T: Component>(
        &mut self,
        entity: Entity,
        component: T,
    ) -> Result<(), EcsError> {
        self.ensure_alive(entity)?;
        let bit = self.register::<T>();
        self.masks[entity.index as usize].set(bit);
        self.storage_mut_or_insert::<T>().insert(entity.index, component);
        Ok(())
    }

    pub fn get_component<T: Component>(&self, entity: Entity) -> Result<&T, EcsError> {
        self.ensure_alive(entity)?;
        self.storage::<T>()
            .and_then(|storage| storage.get(entity.index))
            .ok_or_else(|| not_found::<T>(entity))
    }

    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Result<&mut T, EcsError> {
        self.ensure_alive(entity)?;
        self.storage_mut::<T>()
            .and_then(|storage| storage.get_mut(entity.index))
            .ok_or_else(|| not_found::<T>(entity))
    }

    /// Optional lookup for components an entity may legitimately lack.
    pub fn try_get<T: Component>(&self, entity: Entity) -> Option<&T> {
        if !self.is_alive(entity) {
            return None;
        }
        self.storage::<T>()?.get(entity.index)
    }

    pub fn try_get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        if !self.is_alive(entity) {
            return None;
        }
        self.storage_mut::<T>()?.get_mut(entity.index)
    }

    /// Remove a component, returning it when it was present
    pub fn remove_component<T: Component>(
        &mut self,
        entity: Entity,
    ) -> Result<Option<T>, EcsError> {
        self.ensure_alive(entity)?;
        if let Some(bit) = self.type_bits.get(&TypeId::of::<T>()) {
            self.masks[entity.index as usize].unset(*bit);
        }
        Ok(self.storage_mut::<T>().and_then(|storage| storage.take(entity.index)))
    }

    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.is_alive(entity)
            && self
                .storage::<T>()
                .map(|storage| storage.has(entity.index))
                .unwrap_or(false)
    }

    /// True when the entity holds every type in `set`.
    pub fn matches(&self, entity: Entity, set: &ComponentSet) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        match self.required_mask(set) {
            Some(mask) => self.masks[entity.index as usize].contains_all(&mask),
            None => false,
        }
    }

    /// All live entities holding every component type in `set`, in slot order.
    pub fn query(&self, set: &ComponentSet) -> Vec<Entity> {
        if set.is_empty() {
            return (0..self.entities.capacity() as u32)
                .filter_map(|index| self.entities.entity_at(index))
                .collect();
        }
        let Some(required) = self.required_mask(set) else {
            return Vec::new();
        };
        // drive the scan from the smallest storage
        let driver = set
            .types()
            .iter()
            .filter_map(|ty| self.storages.get(&ty.id))
            .min_by_key(|storage| storage.len());
        let Some(driver) = driver else {
            return Vec::new();
        };
        driver
            .indices()
            .into_iter()
            .filter(|index| self.masks[*index as usize].contains_all(&required))
            .filter_map(|index| self.entities.entity_at(index))
            .collect()
    }

    /// Entities holding `T`, in slot order
    pub fn entities_with<T: Component>(&self) -> Vec<Entity> {
        self.query(&ComponentSet::new().with::<T>())
    }

    pub fn iter<T: Component>(&self) -> impl Iterator<Item = (Entity, &T)> + '_ {
        let entities = &self.entities;
        self.storage::<T>().into_iter().flat_map(move |storage| {
            storage.iter().filter_map(move |(index, component)| {
                entities.entity_at(index).map(|e| (e, component))
            })
        })
    }

    /// The unique entity holding `T`.
    pub fn singleton<T: Component>(&self) -> Result<Entity, EcsError> {
        let found = self.entities_with::<T>();
        match found.as_slice() {
            [entity] => Ok(*entity),
            _ => Err(EcsError::Singleton {
                component: ComponentType::of::<T>().name,
                found: found.len(),
            }),
        }
    }

    pub fn singleton_component<T: Component>(&self) -> Result<&T, EcsError> {
        let entity = self.singleton::<T>()?;
        self.get_component::<T>(entity)
    }

    pub fn singleton_component_mut<T: Component>(&mut self) -> Result<&mut T, EcsError> {
        let entity = self.singleton::<T>()?;
        self.get_component_mut::<T>(entity)
    }

    /// Strip a component type from every entity.
    pub fn clear_component_type(&mut self, ty: TypeId) {
        if let Some(storage) = self.storages.get_mut(&ty) {
            storage.clear();
        }
        if let Some(bit) = self.type_bits.get(&ty) {
            for mask in &mut self.masks {
                mask.unset(*bit);
            }
        }
    }

    pub fn remove_all<T: Component>(&mut self) {
        self.clear_component_type(TypeId::of::<T>());
    }

    pub fn count_of<T: Component>(&self) -> usize {
        self.storage::<T>().map(|storage| storage.data.len()).unwrap_or(0)
    }

    fn storage<T: Component>(&self) -> Option<&TypedComponentStorage<T>> {
        self.storages
            .get(&TypeId::of::<T>())?
            .as_any()
            .downcast_ref::<TypedComponentStorage<T>>()
    }

    fn storage_mut<T: Component>(&mut self) -> Option<&mut TypedComponentStorage<T>> {
        self.storages
            .get_mut(&TypeId::of::<T>())?
            .as_any_mut()
            .downcast_mut::<TypedComponentStorage<T>>()
    }

    fn storage_mut_or_insert<T: Component>(&mut self) -> &mut TypedComponentStorage<T> {
        self.storages
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(TypedComponentStorage::<T>::new()))
            .as_any_mut()
            .downcast_mut::<TypedComponentStorage<T>>()
            .expect("storage registered under its own TypeId")
    }

    fn register<T: Component>(&mut self) -> usize {
        let next = self.type_bits.len();
        *self.type_bits.entry(TypeId::of::<T>()).or_insert(next)
    }

    fn required_mask(&self, set: &ComponentSet) -> Option<ComponentMask> {
        let mut mask = ComponentMask::default();
        for ty in set.types() {
            mask.set(*self.type_bits.get(&ty.id)?);
        }
        Some(mask)
    }

    fn ensure_alive(&self, entity: Entity) -> Result<(), EcsError> {
        if self.entities.is_alive(entity) {
            Ok(())
        } else {
            Err(EcsError::StaleEntity(entity))
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found<T: Component>(entity: Entity) -> EcsError {
    EcsError::ComponentNotFound {
        entity,
        component: ComponentType::of::<T>().name,
    }
}
