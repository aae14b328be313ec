use atelier_canvas::draw::settings::{load_from_path, save_to_path};
use atelier_canvas::draw::{
    Canvas, DefaultFetcher, EngineConfig, EraserReach, HostControls, HostHooks, Rgba,
};
use atelier_canvas::replay::{load_script, replay};
use std::sync::Arc;

#[test]
fn settings_file_drives_canvas_construction() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("canvas_settings.json");
    let config = EngineConfig {
        logical_width: 32,
        logical_height: 16,
        default_color: Rgba::rgba(0x45, 0xb7, 0xd1, 255),
        background_color: None,
        export_multiplier: 3.0,
        eraser_reach: EraserReach::AllLayers,
        lesson_title: Some("Gesture Drawing 101".into()),
        ..EngineConfig::default()
    };
    save_to_path(&path, &config).expect("save");
    let loaded = load_from_path(&path).expect("load");
    assert_eq!(loaded, config);

    let canvas = Canvas::new(
        loaded,
        HostControls::default(),
        Arc::new(DefaultFetcher),
        HostHooks::default(),
    )
    .expect("canvas");
    canvas.attach().expect("attach");
    let artifact = canvas.handle().download().expect("download");
    assert_eq!(artifact.file_name, "gesture-drawing-101-artwork.png");
    assert_eq!((artifact.raster.width, artifact.raster.height), (96, 48));

    let decoded = image::load_from_memory(&artifact.raster.png)
        .expect("decode")
        .to_rgba8();
    // No paper colour: an empty canvas exports fully transparent.
    assert_eq!(decoded.get_pixel(0, 0).0, [0, 0, 0, 0]);
}

#[test]
fn invalid_settings_file_is_rejected_by_the_engine() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("canvas_settings.json");
    std::fs::write(&path, r#"{ "min_width": 10, "max_width": 2 }"#).expect("write");
    let loaded = load_from_path(&path).expect("parses");
    assert!(Canvas::new(
        loaded,
        HostControls::default(),
        Arc::new(DefaultFetcher),
        HostHooks::default()
    )
    .is_err());
}

#[test]
fn script_file_replays_into_strokes() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("script.json");
    std::fs::write(
        &path,
        r##"[
            {"op": "set_color", "color": "#8B4513"},
            {"op": "set_width", "width": 4},
            {"op": "begin", "x": 2, "y": 2},
            {"op": "extend", "x": 20, "y": 2},
            {"op": "end"},
            {"op": "set_tool", "tool": "eraser"},
            {"op": "begin", "x": 10, "y": 2},
            {"op": "cancel"},
            {"op": "begin", "x": 2, "y": 10}
        ]"##,
    )
    .expect("write script");

    let canvas = Canvas::new(
        EngineConfig {
            logical_width: 24,
            logical_height: 24,
            ..EngineConfig::default()
        },
        HostControls::default(),
        Arc::new(DefaultFetcher),
        HostHooks::default(),
    )
    .expect("canvas");
    canvas.attach().expect("attach");

    let steps = load_script(&path).expect("script");
    let summary = replay(&canvas, &steps);
    assert_eq!(summary.rejected, 0);
    assert_eq!(summary.strokes, 2);
    let surface = canvas.render().expect("render");
    assert_eq!(surface.pixel(11, 2), Rgba::rgba(0x8b, 0x45, 0x13, 255));
}
