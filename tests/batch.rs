use std::fs;
use std::path::Path;

use image::RgbImage;
use serde_json::Value;

use fast_goggles::{
    BackendOptions, BiasRule, DetectorSet, GogglesConfig, ImageProcessor, ImageRecord,
};

fn torso(x0: f64, y0: f64, x1: f64, y1: f64) -> String {
    format!(
        r#"[
            {{"landmark_id": 0, "x": {cx}, "y": {top}, "z": 0.0, "visibility": 0.2}},
            {{"landmark_id": 11, "x": {x0}, "y": {y0}, "z": 0.0, "visibility": 0.9}},
            {{"landmark_id": 12, "x": {x1}, "y": {y0}, "z": 0.0, "visibility": 0.9}},
            {{"landmark_id": 23, "x": {x0}, "y": {y1}, "z": 0.0, "visibility": 0.9}},
            {{"landmark_id": 24, "x": {x1}, "y": {y1}, "z": 0.0, "visibility": 0.9}}
        ]"#,
        cx = (x0 + x1) / 2.0,
        top = y0 - 10.0,
    )
}

/// Five decodable photos, one undecodable one, and fixtures for their detections.
fn build_batch(input: &Path, fixtures: &Path) {
    for name in ["alpha", "bravo", "charlie", "delta", "foxtrot", "golf"] {
        RgbImage::from_pixel(400, 400, image::Rgb([90, 120, 150]))
            .save(input.join(format!("{name}.png")))
            .unwrap();
    }
    fs::write(input.join("echo.jpg"), b"definitely not a jpeg").unwrap();
    fs::write(input.join("README.txt"), b"ignored").unwrap();

    let alpha = format!(
        r#"{{
            "people": [{}, {}],
            "objects": [
                {{"label": "dog", "confidence": 0.9, "box": [10, 10, 90, 90]}},
                {{"label": "cat", "confidence": 0.1, "box": [20, 20, 60, 60]}}
            ],
            "faces": [{{"box": [100, 100, 200, 200], "emotion": "Happy"}}]
        }}"#,
        torso(50.0, 50.0, 80.0, 120.0),
        torso(260.0, 260.0, 320.0, 340.0)
    );
    fs::write(fixtures.join("alpha.json"), alpha).unwrap();
    fs::write(
        fixtures.join("bravo.json"),
        r#"{"faces": [{"box": [100, 100, 200, 200], "emotion": "sad"}]}"#,
    )
    .unwrap();
    fs::write(
        fixtures.join("charlie.json"),
        r#"{"faces": [{"box": [0, 0, 30, 30], "emotion": "happy"}, {"box": [300, 300, 310, 310], "emotion": "happy"}]}"#,
    )
    .unwrap();
    fs::write(
        fixtures.join("delta.json"),
        r#"{"faces": [{"box": [100, 100, 200, 200], "emotion": "happy"}], "fail": ["objects"]}"#,
    )
    .unwrap();
    fs::write(
        fixtures.join("golf.json"),
        r#"{"faces": [{"box": [100, 100, 200, 200], "emotion": "happy", "classifier_fault": true}]}"#,
    )
    .unwrap();
}

fn config(fixtures: &Path) -> GogglesConfig {
    let mut cfg = GogglesConfig::default();
    cfg.detectors.pose = "fixture".into();
    cfg.detectors.objects = "fixture".into();
    cfg.detectors.faces = "fixture".into();
    cfg.detectors.emotions = "fixture".into();
    cfg.detectors.fixture_dir = Some(fixtures.to_path_buf());
    cfg.detectors.object_min_confidence = 0.2;
    cfg.landmark_min_visibility = 0.5;
    cfg.bias_rules = vec![BiasRule {
        name: "Dog".into(),
        biasamount: 1.0,
    }];
    cfg
}

fn run(input: &Path, output: &Path, cfg: &GogglesConfig) -> (Vec<ImageRecord>, usize) {
    let detectors = DetectorSet::from_settings(&cfg.detectors, &BackendOptions::default()).unwrap();
    let mut processor = ImageProcessor::new(input, output, cfg, detectors, true).unwrap();
    let records = processor.process_directory().unwrap();
    let timing = processor.timing().unwrap();
    assert_eq!(timing.file_times.len(), 7);
    (records, processor.skipped().len())
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn batch_ranks_isolates_failures_and_persists() {
    let input = tempfile::tempdir().unwrap();
    let fixtures = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    build_batch(input.path(), fixtures.path());
    let cfg = config(fixtures.path());

    let (records, skipped) = run(input.path(), output.path(), &cfg);
    assert_eq!(skipped, 2);

    let names: Vec<&str> = records.iter().map(|r| r.image_name.as_str()).collect();
    assert_eq!(
        names,
        vec!["alpha.png", "charlie.png", "bravo.png", "foxtrot.png", "golf.png"]
    );

    let alpha = &records[0];
    assert_eq!(alpha.poses.len(), 2);
    assert!(alpha.poses.iter().all(|p| p.landmark(0).is_none()));
    assert_eq!(alpha.objects.len(), 1);
    assert!(close(alpha.score_components.emotion_score, 1.0));
    assert!(close(alpha.score_components.object_score, 1.0));
    assert!(close(alpha.score, 2.0));

    let charlie = &records[1];
    assert_eq!(charlie.faces.len(), 1);
    assert!(close(charlie.faces[0].face_quality, 0.5));
    assert!(close(charlie.score, 0.375));

    let foxtrot = &records[3];
    assert_eq!(foxtrot.score_components.face_quality_score, -1.0);

    let golf = &records[4];
    assert_eq!(golf.faces.len(), 1);
    assert_eq!(golf.faces[0].emotion, "unknown");
    assert_eq!(golf.score, 0.0);

    let summary: Value =
        serde_json::from_str(&fs::read_to_string(output.path().join("summary.json")).unwrap())
            .unwrap();
    let summary_names: Vec<&str> = summary
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["image_name"].as_str().unwrap())
        .collect();
    assert_eq!(
        summary_names,
        vec!["alpha.png", "bravo.png", "charlie.png", "foxtrot.png", "golf.png"]
    );

    let doc: Value = serde_json::from_str(
        &fs::read_to_string(output.path().join("alpha_results.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(doc["faces"][0]["box"], serde_json::json!([100, 100, 200, 200]));
    assert_eq!(doc["faces"][0]["emotion"], "Happy");
    assert_eq!(doc["objects"][0]["label"], "dog");
    assert!(doc["poses"][0][0]["landmark_id"].is_number());
    assert!(doc["score_components"]["final_score"].is_number());

    assert!(!output.path().join("delta_results.json").exists());
    assert!(!output.path().join("echo_results.json").exists());
}

#[test]
fn rerun_is_idempotent() {
    let input = tempfile::tempdir().unwrap();
    let fixtures = tempfile::tempdir().unwrap();
    let first_out = tempfile::tempdir().unwrap();
    let second_out = tempfile::tempdir().unwrap();
    build_batch(input.path(), fixtures.path());
    let cfg = config(fixtures.path());

    let (first, _) = run(input.path(), first_out.path(), &cfg);
    let (second, _) = run(input.path(), second_out.path(), &cfg);

    let summarize = |records: &[ImageRecord]| -> Vec<(String, f64)> {
        records
            .iter()
            .map(|r| (r.image_name.clone(), r.score))
            .collect()
    };
    assert_eq!(summarize(&first), summarize(&second));
    assert_eq!(
        fs::read_to_string(first_out.path().join("summary.json")).unwrap(),
        fs::read_to_string(second_out.path().join("summary.json")).unwrap()
    );
}

#[test]
fn raw_and_jpeg_pair_keep_separate_result_documents() {
    let input = tempfile::tempdir().unwrap();
    let fixtures = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    for name in ["IMG_1.jpg", "IMG_1.png", "IMG_2.png"] {
        RgbImage::new(120, 90).save(input.path().join(name)).unwrap();
    }
    fs::write(
        fixtures.path().join("IMG_1.png.json"),
        r#"{"faces": [{"box": [30, 20, 60, 50], "emotion": "happy"}]}"#,
    )
    .unwrap();

    let cfg = config(fixtures.path());
    let detectors = DetectorSet::from_settings(&cfg.detectors, &BackendOptions::default()).unwrap();
    let mut processor = ImageProcessor::new(input.path(), output.path(), &cfg, detectors, false).unwrap();
    let records = processor.process_directory().unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].image_name, "IMG_1.png");

    let mut docs: Vec<String> = fs::read_dir(output.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with("_results.json"))
        .collect();
    docs.sort();
    assert_eq!(
        docs,
        vec!["IMG_1.jpg_results.json", "IMG_1.png_results.json", "IMG_2_results.json"]
    );

    let png: Value = serde_json::from_str(
        &fs::read_to_string(output.path().join("IMG_1.png_results.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(png["image_name"], "IMG_1.png");
    assert_eq!(png["faces"].as_array().unwrap().len(), 1);
    let jpg: Value = serde_json::from_str(
        &fs::read_to_string(output.path().join("IMG_1.jpg_results.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(jpg["image_name"], "IMG_1.jpg");
    assert!(jpg["faces"].as_array().unwrap().is_empty());
}
