//! Entity management

use std::fmt;

use serde::Serialize;

/// Handle to an entity: a slot index plus the generation the slot had when
/// the handle was issued. A handle whose generation no longer matches its slot
/// is stale and every lookup through it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Entity {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl Entity {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

struct Slot {
    generation: u32,
    alive: bool,
    name: String,
}

/// Generational slab allocator
pub struct EntityAllocator {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    alive: usize,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            alive: 0,
        }
    }

    pub fn allocate(&mut self, name: impl Into<String>) -> Entity {
        let name = name.into();
        self.alive += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.alive = true;
            slot.name = name;
            return Entity {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            alive: true,
            name,
        });
        Entity {
            index,
            generation: 0,
        }
    }

    /// Frees the slot and bumps its generation. Returns false for stale handles.
    pub fn deallocate(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let slot = &mut self.slots[entity.index as usize];
        slot.alive = false;
        slot.generation = slot.generation.wrapping_add(1);
        slot.name.clear();
        self.free_list.push(entity.index);
        self.alive -= 1;
        true
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.slots
            .get(entity.index as usize)
            .map(|slot| slot.alive && slot.generation == entity.generation)
            .unwrap_or(false)
    }

    /// Live handle currently occupying `index`.
    pub fn entity_at(&self, index: u32) -> Option<Entity> {
        let slot = self.slots.get(index as usize)?;
        slot.alive.then_some(Entity {
            index,
            generation: slot.generation,
        })
    }

    pub fn name(&self, entity: Entity) -> Option<&str> {
        if self.is_alive(entity) {
            Some(self.slots[entity.index as usize].name.as_str())
        } else {
            None
        }
    }

    pub fn count(&self) -> usize {
        self.alive
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}
