use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use fast_goggles::config::GogglesConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "GOGGLES_CONFIG",
        "GOGGLES_DESIRED_EMOTION",
        "GOGGLES_DCRAW_PATH",
        "GOGGLES_DCRAW_TIMEOUT_SECS",
        "GOGGLES_FIXTURE_DIR",
        "GOGGLES_BIAS_CONFIG",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "desired_emotion": "surprise",
        "pose": { "dedup_threshold_px": 35.0, "landmark_min_visibility": 0.5 },
        "face": { "min_side_px": 32 },
        "raw": { "dcraw_path": "/opt/dcraw/bin/dcraw", "timeout_secs": 30 },
        "detectors": { "pose": "fixture", "faces": "fixture", "fixture_dir": "/data/fixtures" },
        "bias": [
            { "name": "dog", "biasamount": 1.5 },
            { "name": "cake", "biasamount": 0.5 }
        ]
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("GOGGLES_CONFIG", file.path());
    std::env::set_var("GOGGLES_DESIRED_EMOTION", "happy");
    std::env::set_var("GOGGLES_DCRAW_TIMEOUT_SECS", "45");

    let cfg = GogglesConfig::load().expect("load config");

    assert_eq!(cfg.desired_emotion, "happy");
    assert_eq!(cfg.dedup.threshold_px, 35.0);
    assert_eq!(cfg.dedup.min_region_px, 100);
    assert_eq!(cfg.landmark_min_visibility, 0.5);
    assert_eq!(cfg.face.min_side_px, 32);
    assert_eq!(cfg.face.min_completeness, 0.5);
    assert_eq!(cfg.raw.dcraw_path, PathBuf::from("/opt/dcraw/bin/dcraw"));
    assert_eq!(cfg.raw.timeout, Duration::from_secs(45));
    assert_eq!(cfg.detectors.pose, "fixture");
    assert_eq!(cfg.detectors.objects, "null");
    assert_eq!(cfg.detectors.fixture_dir, Some(PathBuf::from("/data/fixtures")));
    assert_eq!(cfg.bias_rules.len(), 2);
    assert_eq!(cfg.bias_rules[0].name, "dog");

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
desired_emotion = "sad"

[fusion]
no_face_score = -2.0
quality_cap = 1.5

[[bias]]
name = "umbrella"
biasamount = 0.25
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let cfg = GogglesConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.desired_emotion, "sad");
    assert_eq!(cfg.fusion.no_face_score, -2.0);
    assert_eq!(cfg.fusion.quality_cap, 1.5);
    assert_eq!(cfg.fusion.partial_penalty, 0.3);
    assert_eq!(cfg.bias_rules[0].name, "umbrella");

    clear_env();
}

#[test]
fn bias_config_env_replaces_file_rules() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut bias = NamedTempFile::new().expect("temp bias");
    std::io::Write::write_all(&mut bias, br#"[{"name": "kite", "biasamount": 3.0}]"#)
        .expect("write bias");
    std::env::set_var("GOGGLES_BIAS_CONFIG", bias.path());

    let cfg = GogglesConfig::load().expect("load config");
    assert_eq!(cfg.bias_rules.len(), 1);
    assert_eq!(cfg.bias_rules[0].biasamount, 3.0);

    clear_env();
}

#[test]
fn rejects_unknown_keys_and_bad_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut unknown = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut unknown, br#"{"face": {"min_size": 10}}"#).expect("write");
    assert!(GogglesConfig::load_from(Some(unknown.path())).is_err());

    let mut bad = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut bad, br#"{"face": {"min_completeness": 1.5}}"#).expect("write");
    let err = GogglesConfig::load_from(Some(bad.path())).unwrap_err();
    assert!(err.to_string().contains("face.min_completeness"));

    std::env::set_var("GOGGLES_DCRAW_TIMEOUT_SECS", "soon");
    assert!(GogglesConfig::load().is_err());
    std::env::set_var("GOGGLES_DCRAW_TIMEOUT_SECS", "0");
    assert!(GogglesConfig::load().is_err());

    clear_env();
}
