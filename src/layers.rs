//! Layer entities and draw order

use anyhow::{Context, Result};
use serde::Serialize;

use crate::ecs::{Component, Entity, World};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LayerKind {
    Basemap,
    Overlay,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerComponent {
    pub name: String,
    pub kind: LayerKind,
}

impl Component for LayerComponent {}

/// Members of a layer in insertion (= draw) order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerEntitiesComponent(pub Vec<Entity>);

impl Component for LayerEntitiesComponent {}

/// Singleton: layers from back to front.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayersOrderComponent(pub Vec<Entity>);

impl Component for LayersOrderComponent {}

/// Marks the tile layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasemapLayerComponent;

impl Component for BasemapLayerComponent {}

/// Back-reference from a member to its layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InLayerComponent(pub Entity);

impl Component for InLayerComponent {}

fn layers_order(world: &mut World) -> Result<Entity> {
    match world.count_of::<LayersOrderComponent>() {
        0 => {
            let entity = world.create_entity("layers_order");
            world.add_component(entity, LayersOrderComponent::default())?;
            Ok(entity)
        }
        _ => Ok(world.singleton::<LayersOrderComponent>()?),
    }
}

/// Create a layer. The basemap always sits at the back; overlays stack in
/// creation order.
pub fn create_layer(world: &mut World, name: &str, kind: LayerKind) -> Result<Entity> {
    let order = layers_order(world)?;
    let layer = world.create_entity(format!("layer_{name}"));
    world.add_component(
        layer,
        LayerComponent {
            name: name.to_string(),
            kind,
        },
    )?;
    world.add_component(layer, LayerEntitiesComponent::default())?;
    let layers = &mut world.get_component_mut::<LayersOrderComponent>(order)?.0;
    match kind {
        LayerKind::Basemap => layers.insert(0, layer),
        LayerKind::Overlay => layers.push(layer),
    }
    if kind == LayerKind::Basemap {
        world.add_component(layer, BasemapLayerComponent)?;
    }
    Ok(layer)
}

pub fn add_to_layer(world: &mut World, layer: Entity, entity: Entity) -> Result<()> {
    world
        .get_component_mut::<LayerEntitiesComponent>(layer)
        .with_context(|| format!("entity {layer} is not a layer"))?
        .0
        .push(entity);
    world.add_component(entity, InLayerComponent(layer))?;
    Ok(())
}

/// Destroy a layer member and unlink it from its layer.
pub fn remove_from_layer(world: &mut World, entity: Entity) -> Result<()> {
    if let Some(InLayerComponent(layer)) = world.try_get::<InLayerComponent>(entity).copied() {
        if let Some(members) = world.try_get_mut::<LayerEntitiesComponent>(layer) {
            members.0.retain(|member| *member != entity);
        }
    }
    world.destroy_entity(entity)?;
    Ok(())
}

/// Destroy a layer together with everything in it.
pub fn remove_layer(world: &mut World, layer: Entity) -> Result<()> {
    let members = world.get_component::<LayerEntitiesComponent>(layer)?.0.clone();
    for member in members {
        if world.is_alive(member) {
            world.destroy_entity(member)?;
        }
    }
    if let Ok(order) = world.singleton_component_mut::<LayersOrderComponent>() {
        order.0.retain(|l| *l != layer);
    }
    world.destroy_entity(layer)?;
    Ok(())
}

/// `(layer index, entity)` pairs back to front: layer order, then insertion
/// order inside each layer.
pub fn render_order(world: &World) -> Vec<(usize, Entity)> {
    let Ok(order) = world.singleton_component::<LayersOrderComponent>() else {
        return Vec::new();
    };
    order
        .0
        .iter()
        .enumerate()
        .filter_map(|(index, layer)| {
            world
                .try_get::<LayerEntitiesComponent>(*layer)
                .map(|members| (index, members))
        })
        .flat_map(|(index, members)| members.0.iter().map(move |entity| (index, *entity)))
        .filter(|(_, entity)| world.is_alive(*entity))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basemap_stays_behind_overlays() {
        let mut world = World::new();
        let a = create_layer(&mut world, "a", LayerKind::Overlay).unwrap();
        let basemap = create_layer(&mut world, "tiles", LayerKind::Basemap).unwrap();
        let b = create_layer(&mut world, "b", LayerKind::Overlay).unwrap();
        let order = world.singleton_component::<LayersOrderComponent>().unwrap();
        assert_eq!(order.0, vec![basemap, a, b]);
        assert_eq!(world.singleton::<BasemapLayerComponent>().unwrap(), basemap);
    }

    #[test]
    fn render_order_is_layer_then_insertion() {
        let mut world = World::new();
        let low = create_layer(&mut world, "low", LayerKind::Overlay).unwrap();
        let high = create_layer(&mut world, "high", LayerKind::Overlay).unwrap();
        let h1 = world.create_entity("h1");
        let l1 = world.create_entity("l1");
        let l2 = world.create_entity("l2");
        add_to_layer(&mut world, high, h1).unwrap();
        add_to_layer(&mut world, low, l1).unwrap();
        add_to_layer(&mut world, low, l2).unwrap();
        assert_eq!(render_order(&world), vec![(0, l1), (0, l2), (1, h1)]);

        remove_from_layer(&mut world, l1).unwrap();
        assert!(!world.is_alive(l1));
        assert_eq!(render_order(&world), vec![(0, l2), (1, h1)]);

        remove_layer(&mut world, low).unwrap();
        assert!(!world.is_alive(l2));
        assert_eq!(render_order(&world), vec![(0, h1)]);
    }

    #[test]
    fn adding_to_a_non_layer_fails() {
        let mut world = World::new();
        let not_layer = world.create_entity("plain");
        let member = world.create_entity("member");
        assert!(add_to_layer(&mut world, not_layer, member).is_err());
    }
}
