//! Ordered system scheduler
//!
//! Systems run one at a time, in the order they were added, against a single
//! `World`. Each system declares the component shape it works on and receives
//! the matching entities for the current tick.

use std::any::Any;
use std::time::Instant;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ecs::{Component, ComponentSet, ComponentType, Entity, World};

pub struct SystemContext<'a> {
    pub tick: u64,
    pub dt_ms: f64,
    /// Entities holding every type from `System::required_components`.
    pub entities: &'a [Entity],
}

pub trait System: Any {
    fn name(&self) -> &str;

    fn required_components(&self) -> ComponentSet {
        ComponentSet::new()
    }

    fn update(&mut self, ctx: &SystemContext<'_>, world: &mut World) -> Result<()>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemRunReport {
    pub name: String,
    pub duration_ms: f64,
    pub entities: usize,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TickSummary {
    pub tick: u64,
    pub dt_ms: f64,
    pub system_reports: Vec<SystemRunReport>,
}

impl TickSummary {
    pub fn total_ms(&self) -> f64 {
        self.system_reports.iter().map(|r| r.duration_ms).sum()
    }

    pub fn slowest(&self) -> Option<&SystemRunReport> {
        self.system_reports
            .iter()
            .max_by(|a, b| a.duration_ms.total_cmp(&b.duration_ms))
    }

    pub fn failed(&self) -> impl Iterator<Item = &SystemRunReport> {
        self.system_reports.iter().filter(|r| r.error.is_some())
    }
}

#[derive(Default)]
pub struct EngineBuilder {
    systems: Vec<Box<dyn System>>,
    transient: Vec<ComponentType>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system(mut self, system: impl System + 'static) -> Self {
        self.systems.push(Box::new(system));
        self
    }

    pub fn push_system(&mut self, system: impl System + 'static) {
        self.systems.push(Box::new(system));
    }

    /// Component types stripped from every entity at the end of each tick.
    pub fn with_transient<T: Component>(mut self) -> Self {
        self.transient.push(ComponentType::of::<T>());
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            systems: self.systems,
            transient: self.transient,
            tick: 0,
        }
    }
}

pub struct Engine {
    systems: Vec<Box<dyn System>>,
    transient: Vec<ComponentType>,
    tick: u64,
}

impl Engine {
    /// Run every system once. A failing system is reported and skipped; the
    /// rest of the tick still runs.
    pub fn tick(&mut self, world: &mut World, dt_ms: f64) -> TickSummary {
        self.tick += 1;
        let mut reports = Vec::with_capacity(self.systems.len());
        for system in &mut self.systems {
            let start = Instant::now();
            let entities = world.query(&system.required_components());
            let ctx = SystemContext {
                tick: self.tick,
                dt_ms,
                entities: &entities,
            };
            let error = match system.update(&ctx, world) {
                Ok(()) => None,
                Err(err) => {
                    warn!(system = system.name(), tick = self.tick, "system failed: {err:#}");
                    Some(format!("{err:#}"))
                }
            };
            reports.push(SystemRunReport {
                name: system.name().to_string(),
                duration_ms: start.elapsed().as_secs_f64() * 1_000.0,
                entities: entities.len(),
                error,
            });
        }
        for ty in &self.transient {
            world.clear_component_type(ty.id);
        }
        TickSummary {
            tick: self.tick,
            dt_ms,
            system_reports: reports,
        }
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn system_names(&self) -> Vec<&str> {
        self.systems.iter().map(|s| s.name()).collect()
    }

    pub fn get_system<T: 'static>(&self) -> Option<&T> {
        self.systems
            .iter()
            .find_map(|system| system.as_any().downcast_ref::<T>())
    }

    pub fn get_system_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.systems
            .iter_mut()
            .find_map(|system| system.as_any_mut().downcast_mut::<T>())
    }
}
