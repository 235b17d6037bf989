pub mod camera;
pub mod chart;
pub mod config;
pub mod diagnostics;
pub mod ecs;
pub mod engine;
pub mod geometry;
pub mod layers;
pub mod livemap;
pub mod locator;
pub mod placement;
pub mod projection;
pub mod render;
pub mod scenario;
pub mod tiles;

pub use config::LiveMapConfig;
pub use engine::{Engine, EngineBuilder, TickSummary};
pub use livemap::{LiveMap, LiveMapBuilder};
pub use locator::HoverObject;
pub use scenario::{Scenario, ScenarioLoader};
