//! Entity Component System (ECS) implementation
//!
//! Entities are generational slab handles; components live in one ordered
//! storage per type. Each entity carries a bitmask of the component types it
//! holds, which is what `World::query` matches against.

pub mod component;
pub mod entity;
pub mod world;

use thiserror::Error;

pub use component::{Component, ComponentSet, ComponentType, TypedComponentStorage};
pub use entity::Entity;
pub use world::World;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EcsError {
    #[error("entity {0} is not alive")]
    StaleEntity(Entity),
    #[error("entity {entity} has no {component}")]
    ComponentNotFound {
        entity: Entity,
        component: &'static str,
    },
    #[error("expected exactly one entity with {component}, found {found}")]
    Singleton {
        component: &'static str,
        found: usize,
    },
}
