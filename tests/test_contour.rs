//! Built-in contour detector and its model files.

mod common;

use tempfile::TempDir;
use vision_gate::detection::{
    ClassFilter, ContourDetector, ContourModelLoader, ContourParams, Detector, ModelCache, ModelLoader,
    crop_region,
};
use vision_gate::detection::contours::find_contours;
use vision_gate::detection::preprocessing::edge_map;
use vision_gate::error::StationError;

use common::*;

const PART: Rect = Rect::new(60, 50, 140, 130);

#[test]
fn test_detects_rectangle_with_offset() -> anyhow::Result<()> {
    let image = rectangle_image(200, 200, PART);
    let detector = ContourDetector::new(ContourParams::default());

    let result = detector.detect(&image, 0, 0.0, (1000, 2000))?;
    assert!(result.found);
    assert!(result.keypoints.is_none());

    let bbox = result.bbox.expect("bbox");
    // Edge pixels sit on the rectangle outline, give or take the blur
    let outer = Rect::new(50, 40, 150, 140).translate(1000, 2000);
    assert!(outer.contains_rect(&bbox), "{bbox} not within {outer}");
    assert!(bbox.width().max(bbox.height()) >= 60, "{bbox} too small");
    Ok(())
}

#[test]
fn test_blank_image_not_found() -> anyhow::Result<()> {
    let image = rectangle_image(100, 100, Rect::new(0, 0, 0, 0));
    let detector = ContourDetector::new(ContourParams::default());

    let result = detector.detect(&image, 0, 0.0, (0, 0))?;
    assert!(!result.found);
    assert!(result.bbox.is_none());
    Ok(())
}

#[test]
fn test_class_filters() -> anyhow::Result<()> {
    let image = rectangle_image(200, 200, PART);
    let params = ContourParams {
        classes: vec![
            ClassFilter::any(0),
            ClassFilter {
                min_width: 150,
                ..ClassFilter::any(1)
            },
        ],
        ..ContourParams::default()
    };
    let detector = ContourDetector::new(params);

    assert!(detector.detect(&image, 0, 0.0, (0, 0))?.found);
    assert!(!detector.detect(&image, 1, 0.0, (0, 0))?.found, "too narrow for class 1");
    assert!(matches!(
        detector.detect(&image, 7, 0.0, (0, 0)),
        Err(StationError::Detection(_))
    ));
    Ok(())
}

#[test]
fn test_model_files_and_cache() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    std::fs::write(
        dir.path().join("bolt.toml"),
        r#"
        blur_sigma = 1.0

        [[classes]]
        id = 2
        name = "bolt"
        min_width = 10
        "#,
    )?;

    let loader = ContourModelLoader::new(dir.path());
    assert!(matches!(loader.load("nut"), Err(StationError::ModelNotFound(_))));

    let mut cache = ModelCache::new(Box::new(loader));
    let image = rectangle_image(200, 200, PART);
    let first = cache.get("bolt")?;
    assert!(first.detect(&image, 2, 0.0, (0, 0))?.found);

    cache.get("bolt")?;
    assert_eq!(cache.cached_models(), vec!["bolt"]);
    assert!(cache.get("nut").is_err());
    assert_eq!(cache.cached_models(), vec!["bolt"]);
    Ok(())
}

#[test]
fn test_model_loaded_once() -> anyhow::Result<()> {
    let loader = ScriptedLoader::default()
        .with_model("m", ScriptedDetector::new(DetectionResult::not_found()));
    let loads = loader.loads.clone();
    let mut cache = ModelCache::new(Box::new(loader));

    for _ in 0..3 {
        cache.get("m")?;
    }
    assert_eq!(loads.load(std::sync::atomic::Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_crop_region_bounds() -> anyhow::Result<()> {
    let image = rectangle_image(200, 100, PART);

    let crop = crop_region(&image, &Rect::new(10, 20, 110, 70))?;
    assert_eq!((crop.width(), crop.height()), (100, 50));

    assert!(crop_region(&image, &Rect::new(0, 0, 200, 100)).is_ok());
    assert!(matches!(
        crop_region(&image, &Rect::new(150, 0, 250, 50)),
        Err(StationError::Image(_))
    ));
    assert!(crop_region(&image, &Rect::new(-1, 0, 10, 10)).is_err());
    Ok(())
}

#[test]
fn test_edge_groups_become_bounding_boxes() -> anyhow::Result<()> {
    let mut edges = image::GrayImage::new(20, 20);
    for i in 2..=6 {
        edges.put_pixel(i, 3, image::Luma([255]));
        edges.put_pixel(i, 8, image::Luma([255]));
    }
    edges.put_pixel(15, 15, image::Luma([255]));

    let groups = find_contours(&edges, 2);
    assert_eq!(groups.len(), 2, "stray pixel filtered, separate lines kept apart");
    assert_eq!((groups[0].min_x, groups[0].max_x, groups[0].min_y, groups[0].max_y), (2, 6, 3, 3));
    assert_eq!(groups[0].pixel_count, 5);
    assert_eq!(groups[1].min_y, 8);

    let blank = image::DynamicImage::new_luma8(20, 20);
    assert!(edge_map(&blank, 0.0, 20.0, 50.0).pixels().all(|p| p.0[0] == 0));
    let part = rectangle_image(200, 200, PART);
    assert!(edge_map(&part, 1.0, 20.0, 50.0).pixels().any(|p| p.0[0] == 255));
    Ok(())
}
