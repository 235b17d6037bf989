use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

use livemap::camera::{CameraUpdateComponent, ZoomChangedComponent, ZoomState};
use livemap::chart::{PathSpec, PieSpec, PointSpec};
use livemap::geometry::{ClientVec, GeoVec};
use livemap::placement::{ScaleComponent, ScreenDimensionComponent, VisibleComponent};
use livemap::render::{DisplayList, DrawCommand};
use livemap::tiles::{CellComponent, CellKey, TileComponent, TileError, TileState, TileTransport};
use livemap::{LiveMap, LiveMapConfig};

fn png() -> Bytes {
    let image = image::RgbaImage::from_pixel(4, 4, image::Rgba([10, 20, 30, 255]));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, image::ImageFormat::Png).unwrap();
    Bytes::from(out.into_inner())
}

/// Serves every URL, counting calls.
#[derive(Default)]
struct MemoryTransport {
    calls: AtomicUsize,
}

#[async_trait]
impl TileTransport for MemoryTransport {
    async fn fetch(&self, _url: &str) -> Result<Bytes, TileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(png())
    }
}

/// Serves zoom 0 only; deeper requests never finish.
struct RootOnlyTransport;

#[async_trait]
impl TileTransport for RootOnlyTransport {
    async fn fetch(&self, url: &str) -> Result<Bytes, TileError> {
        if url.starts_with("mem://0/") {
            Ok(png())
        } else {
            std::future::pending().await
        }
    }
}

/// Holds every request until the gate opens.
#[derive(Default)]
struct GatedTransport {
    gate: Notify,
}

#[async_trait]
impl TileTransport for GatedTransport {
    async fn fetch(&self, _url: &str) -> Result<Bytes, TileError> {
        self.gate.notified().await;
        Ok(png())
    }
}

struct FailingTransport;

#[async_trait]
impl TileTransport for FailingTransport {
    async fn fetch(&self, _url: &str) -> Result<Bytes, TileError> {
        Err(TileError::FetchFailed {
            status: Some(503),
            reason: "Service Unavailable".into(),
        })
    }
}

fn config(zoom: f64) -> LiveMapConfig {
    let mut config = LiveMapConfig::default();
    config.viewport.width = 256.0;
    config.viewport.height = 256.0;
    config.camera.zoom = zoom;
    config.tiles.url_template = "mem://{z}/{x}/{y}.png".to_string();
    config.tiles.cache_limit = 16;
    config
}

fn map_with(zoom: f64, transport: Arc<dyn TileTransport>) -> LiveMap {
    LiveMap::builder(config(zoom))
        .with_transport(transport)
        .build()
        .unwrap()
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}

fn point(lon: f64, lat: f64) -> PointSpec {
    PointSpec {
        lon,
        lat,
        radius: 6.0,
        fill: None,
        stroke: None,
        stroke_width: 0.0,
    }
}

fn images(frame: &DisplayList) -> Vec<(String, [f64; 4])> {
    frame
        .images()
        .filter_map(|command| match command {
            DrawCommand::DrawImage { cell, src, .. } => Some((cell.clone(), *src)),
            _ => None,
        })
        .collect()
}

fn tile_states(map: &LiveMap) -> Vec<(CellKey, TileState)> {
    let world = map.world();
    let mut states: Vec<_> = world
        .iter::<CellComponent>()
        .map(|(entity, cell)| {
            let state = world.get_component::<TileComponent>(entity).unwrap().state;
            (cell.0.clone(), state)
        })
        .collect();
    states.sort_by(|a, b| a.0.cmp(&b.0));
    states
}

#[tokio::test]
async fn tiles_load_asynchronously_and_render() {
    let transport = Arc::new(MemoryTransport::default());
    let mut map = map_with(0.0, transport.clone());

    let summary = map.tick(16.0);
    assert_eq!(summary.failed().count(), 0);
    assert_eq!(tile_states(&map), vec![(CellKey::root(), TileState::Loading)]);

    // nothing was cached yet, so nothing is drawn
    let mut frame = DisplayList::new();
    map.render(&mut frame);
    assert!(images(&frame).is_empty());

    settle().await;
    map.tick(16.0);
    assert_eq!(tile_states(&map), vec![(CellKey::root(), TileState::Loaded)]);
    let metrics = map.metrics().unwrap();
    assert_eq!(metrics.tiles_cached, 1);
    assert_eq!(metrics.tiles_downloading, 0);

    let mut frame = DisplayList::new();
    map.render(&mut frame);
    assert_eq!(images(&frame), vec![(String::new(), [0.0, 0.0, 4.0, 4.0])]);

    // steady state: no refetch
    for _ in 0..5 {
        map.tick(16.0);
    }
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn zoom_level_change_is_tagged_for_one_tick() {
    let mut map = map_with(0.0, Arc::new(MemoryTransport::default()));
    map.tick(16.0);

    map.set_zoom(1.5).unwrap();
    map.tick(16.0);
    let world = map.world();
    let update = world.singleton_component::<CameraUpdateComponent>().unwrap();
    assert_eq!(update.state, ZoomState::ZoomLevelChanging);
    assert_eq!(world.count_of::<ZoomChangedComponent>(), 0);

    let tiles = tile_states(&map);
    assert_eq!(tiles.len(), 4);
    assert!(tiles.iter().all(|(key, _)| key.zoom() == 1));
    for (entity, scale) in map.world().iter::<ScaleComponent>() {
        assert_eq!((scale.zoom, scale.scale), (1, 1.0), "entity {entity}");
    }

    map.set_zoom(1.8).unwrap();
    map.tick(16.0);
    let update = map.world().singleton_component::<CameraUpdateComponent>().unwrap();
    assert_eq!(update.state, ZoomState::ZoomFractionChanging);

    map.tick(16.0);
    let update = map.world().singleton_component::<CameraUpdateComponent>().unwrap();
    assert_eq!(update.state, ZoomState::Idle);
}

#[tokio::test]
async fn zoom_is_clamped_to_configured_range() {
    let mut map = map_with(0.0, Arc::new(MemoryTransport::default()));
    map.set_zoom(40.0).unwrap();
    assert_eq!(map.camera().unwrap().zoom, 18.0);
    map.zoom_by(-100.0).unwrap();
    assert_eq!(map.camera().unwrap().zoom, 0.0);
    assert!(map.pan_to(GeoVec::new(0.0, 89.0)).is_err());
}

#[tokio::test]
async fn unfinished_tiles_borrow_from_a_cached_ancestor() {
    let mut map = map_with(0.0, Arc::new(RootOnlyTransport));
    map.tick(16.0);
    settle().await;
    map.tick(16.0);

    map.set_zoom(1.0).unwrap();
    map.tick(16.0);
    assert!(tile_states(&map)
        .iter()
        .all(|(key, state)| key.zoom() == 1 && *state == TileState::Loading));

    let mut frame = DisplayList::new();
    map.render(&mut frame);
    let mut drawn = images(&frame);
    drawn.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
    assert_eq!(
        drawn,
        vec![
            (String::new(), [0.0, 0.0, 2.0, 2.0]),
            (String::new(), [0.0, 2.0, 2.0, 2.0]),
            (String::new(), [2.0, 0.0, 2.0, 2.0]),
            (String::new(), [2.0, 2.0, 2.0, 2.0]),
        ]
    );
}

#[tokio::test]
async fn panning_away_cancels_and_drops_late_results() {
    let transport = Arc::new(GatedTransport::default());
    let mut map = map_with(3.0, transport.clone());
    map.tick(16.0);
    let first: Vec<CellKey> = tile_states(&map).into_iter().map(|(key, _)| key).collect();
    assert_eq!(first.len(), 4);
    settle().await;

    map.pan_to(GeoVec::new(150.0, 0.0)).unwrap();
    map.tick(16.0);
    let second: Vec<CellKey> = tile_states(&map).into_iter().map(|(key, _)| key).collect();
    assert_eq!(second.len(), 4);
    assert!(first.iter().all(|key| !second.contains(key)));
    let loader = map.tile_loader().unwrap();
    assert_eq!(loader.stats().cancelled, 4);
    assert_eq!(loader.in_flight_count(), 4);

    settle().await;
    transport.gate.notify_waiters();
    settle().await;
    map.tick(16.0);

    let loader = map.tile_loader().unwrap();
    assert_eq!(loader.stats().dropped_results, 4);
    assert_eq!(loader.stats().loaded, 4);
    assert!(first.iter().all(|key| !loader.cache().contains(key)));
    assert!(second.iter().all(|key| loader.cache().contains(key)));
    assert_eq!(map.metrics().unwrap().dropped_results(), 4);
}

#[tokio::test]
async fn failed_tiles_leave_a_blank_slot_and_the_frame_continues() {
    let mut map = map_with(0.0, Arc::new(FailingTransport));
    let layer = map.add_layer("cities").unwrap();
    map.add_point(layer, 0, &point(0.0, 0.0)).unwrap();

    map.tick(16.0);
    settle().await;
    let summary = map.tick(16.0);
    assert_eq!(summary.failed().count(), 0);
    assert_eq!(tile_states(&map), vec![(CellKey::root(), TileState::Failed)]);
    assert_eq!(map.metrics().unwrap().tiles_failed, 1);

    let mut frame = DisplayList::new();
    let drawn = map.render(&mut frame);
    assert!(images(&frame).is_empty());
    assert_eq!(drawn, 2);
    assert!(frame.commands.iter().any(|c| matches!(c, DrawCommand::Arc { .. })));
}

#[tokio::test]
async fn pointer_finds_the_topmost_object() {
    let mut map = map_with(0.0, Arc::new(MemoryTransport::default()));
    let points = map.add_layer("points").unwrap();
    let pies = map.add_layer("pies").unwrap();
    let dot = map.add_point(points, 4, &point(0.0, 0.0)).unwrap();
    let pie = map
        .add_pie(
            pies,
            9,
            &PieSpec {
                lon: 0.0,
                lat: 0.0,
                radius: 20.0,
                values: vec![1.0, 3.0],
            },
        )
        .unwrap();
    map.tick(16.0);

    // world (128, 128) sits at the client center
    let hit = map.search(128.0, 138.0).unwrap();
    assert_eq!((hit.entity, hit.layer_index, hit.index, hit.part), (pie, 2, 9, 1));
    assert!(map.search(10.0, 10.0).is_none());

    map.remove_entity(pie).unwrap();
    let hit = map.search(128.0, 130.0).unwrap();
    assert_eq!((hit.entity, hit.layer_index, hit.index), (dot, 1, 4));
    assert!(map.search(128.0, 138.0).is_none());
}

#[tokio::test]
async fn resize_recomputes_needed_tiles() {
    let mut map = map_with(2.0, Arc::new(MemoryTransport::default()));
    map.tick(16.0);
    assert_eq!(tile_states(&map).len(), 4);

    map.resize(600.0, 600.0).unwrap();
    map.tick(16.0);
    assert_eq!(tile_states(&map).len(), 16);
    assert!(map.resize(0.0, 10.0).is_err());

    // oversized viewports are refused and the old size stays
    map.set_zoom(10.0).unwrap();
    assert!(map.resize(1e6, 1e6).is_err());
    map.tick(16.0);
    assert!(tile_states(&map).len() <= 16);
    assert_eq!(map.viewport().size, ClientVec::new(600.0, 600.0));
}

#[tokio::test]
async fn paths_stay_visible_and_hittable_after_a_level_change() {
    let mut map = map_with(0.0, Arc::new(MemoryTransport::default()));
    let routes = map.add_layer("routes").unwrap();
    let path = map
        .add_path(
            routes,
            0,
            &PathSpec {
                coordinates: vec![[-90.0, 0.0], [90.0, 0.0]],
                stroke_width: 2.0,
                color: None,
            },
        )
        .unwrap();
    map.tick(16.0);

    map.set_zoom(3.0).unwrap();
    map.pan_to(GeoVec::new(80.0, 0.0)).unwrap();
    map.tick(16.0);

    let world = map.world();
    let dimension = world.get_component::<ScreenDimensionComponent>(path).unwrap().0;
    assert_eq!(dimension.x, 1024.0);
    let scale = world.get_component::<ScaleComponent>(path).unwrap();
    assert_eq!((scale.zoom, scale.scale), (3, 1.0));
    assert!(world.has_component::<VisibleComponent>(path));

    let mut frame = DisplayList::new();
    map.render(&mut frame);
    assert!(frame
        .commands
        .iter()
        .any(|c| matches!(c, DrawCommand::LineTo { y, .. } if (y - 128.0).abs() < 1e-6)));
    assert!(frame.commands.iter().any(|c| matches!(c, DrawCommand::Stroke)));

    // the client center sits on the line at lon 80
    let hit = map.search(128.0, 128.0).unwrap();
    assert_eq!((hit.entity, hit.layer_index, hit.index), (path, 1, 0));
    assert!(map.search(128.0, 20.0).is_none());
}
