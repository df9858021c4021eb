use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::face::FaceQualityParams;
use crate::ingest::RawSettings;
use crate::model::BiasRule;
use crate::pose::DedupParams;
use crate::scoring::FusionParams;

const DEFAULT_DESIRED_EMOTION: &str = "happy";
const DEFAULT_BACKEND: &str = "null";
const DEFAULT_OBJECT_INPUT_SIZE: u32 = 640;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct GogglesConfigFile {
    desired_emotion: Option<String>,
    pose: Option<PoseConfigFile>,
    face: Option<FaceConfigFile>,
    fusion: Option<FusionConfigFile>,
    raw: Option<RawConfigFile>,
    detectors: Option<DetectorConfigFile>,
    bias: Option<Vec<BiasRule>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PoseConfigFile {
    dedup_threshold_px: Option<f64>,
    min_region_px: Option<u32>,
    landmark_min_visibility: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FaceConfigFile {
    min_side_px: Option<i64>,
    min_completeness: Option<f64>,
    small_face_ratio: Option<f64>,
    small_face_penalty: Option<f64>,
    boost_min_ratio: Option<f64>,
    boost_max_ratio: Option<f64>,
    boost_factor: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FusionConfigFile {
    partial_full_credit: Option<f64>,
    partial_penalty: Option<f64>,
    no_face_score: Option<f64>,
    multi_face_avg_threshold: Option<f64>,
    multi_face_bonus: Option<f64>,
    quality_cap: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawConfigFile {
    dcraw_path: Option<PathBuf>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    pose: Option<String>,
    objects: Option<String>,
    faces: Option<String>,
    emotions: Option<String>,
    fixture_dir: Option<PathBuf>,
    object_model: Option<PathBuf>,
    object_input_size: Option<u32>,
    object_min_confidence: Option<f32>,
    verbose: Option<bool>,
}

/// Bias rules file: either a bare list or a table with `[[bias]]` entries.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BiasFile {
    List(Vec<BiasRule>),
    Table { bias: Vec<BiasRule> },
}

/// Which backend answers each capability, plus backend inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub pose: String,
    pub objects: String,
    pub faces: String,
    pub emotions: String,
    pub fixture_dir: Option<PathBuf>,
    pub object_model: Option<PathBuf>,
    pub object_input_size: u32,
    pub object_min_confidence: f32,
    pub verbose: bool,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            pose: DEFAULT_BACKEND.to_string(),
            objects: DEFAULT_BACKEND.to_string(),
            faces: DEFAULT_BACKEND.to_string(),
            emotions: DEFAULT_BACKEND.to_string(),
            fixture_dir: None,
            object_model: None,
            object_input_size: DEFAULT_OBJECT_INPUT_SIZE,
            object_min_confidence: 0.0,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GogglesConfig {
    pub desired_emotion: String,
    pub dedup: DedupParams,
    pub landmark_min_visibility: f64,
    pub face: FaceQualityParams,
    pub fusion: FusionParams,
    pub raw: RawSettings,
    pub detectors: DetectorSettings,
    pub bias_rules: Vec<BiasRule>,
}

impl Default for GogglesConfig {
    fn default() -> Self {
        // Defaults cannot fail.
        Self::from_file(GogglesConfigFile::default())
    }
}

impl GogglesConfig {
    /// Defaults, then the file named by `GOGGLES_CONFIG`, then environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("GOGGLES_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like [`GogglesConfig::load`] but with an explicit config file.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: GogglesConfigFile) -> Self {
        let pose = file.pose.unwrap_or_default();
        let face = file.face.unwrap_or_default();
        let fusion = file.fusion.unwrap_or_default();
        let raw = file.raw.unwrap_or_default();
        let detectors = file.detectors.unwrap_or_default();

        let default_dedup = DedupParams::default();
        let default_face = FaceQualityParams::default();
        let default_fusion = FusionParams::default();
        let default_raw = RawSettings::default();
        let default_detectors = DetectorSettings::default();

        Self {
            desired_emotion: file
                .desired_emotion
                .unwrap_or_else(|| DEFAULT_DESIRED_EMOTION.to_string()),
            dedup: DedupParams {
                threshold_px: pose.dedup_threshold_px.unwrap_or(default_dedup.threshold_px),
                min_region_px: pose.min_region_px.unwrap_or(default_dedup.min_region_px),
            },
            landmark_min_visibility: pose.landmark_min_visibility.unwrap_or(0.0),
            face: FaceQualityParams {
                min_side_px: face.min_side_px.unwrap_or(default_face.min_side_px),
                min_completeness: face.min_completeness.unwrap_or(default_face.min_completeness),
                small_face_ratio: face.small_face_ratio.unwrap_or(default_face.small_face_ratio),
                small_face_penalty: face
                    .small_face_penalty
                    .unwrap_or(default_face.small_face_penalty),
                boost_min_ratio: face.boost_min_ratio.unwrap_or(default_face.boost_min_ratio),
                boost_max_ratio: face.boost_max_ratio.unwrap_or(default_face.boost_max_ratio),
                boost_factor: face.boost_factor.unwrap_or(default_face.boost_factor),
            },
            fusion: FusionParams {
                partial_full_credit: fusion
                    .partial_full_credit
                    .unwrap_or(default_fusion.partial_full_credit),
                partial_penalty: fusion.partial_penalty.unwrap_or(default_fusion.partial_penalty),
                no_face_score: fusion.no_face_score.unwrap_or(default_fusion.no_face_score),
                multi_face_avg_threshold: fusion
                    .multi_face_avg_threshold
                    .unwrap_or(default_fusion.multi_face_avg_threshold),
                multi_face_bonus: fusion.multi_face_bonus.unwrap_or(default_fusion.multi_face_bonus),
                quality_cap: fusion.quality_cap.unwrap_or(default_fusion.quality_cap),
            },
            raw: RawSettings {
                dcraw_path: raw.dcraw_path.unwrap_or(default_raw.dcraw_path),
                timeout: raw
                    .timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(default_raw.timeout),
            },
            detectors: DetectorSettings {
                pose: detectors.pose.unwrap_or(default_detectors.pose),
                objects: detectors.objects.unwrap_or(default_detectors.objects),
                faces: detectors.faces.unwrap_or(default_detectors.faces),
                emotions: detectors.emotions.unwrap_or(default_detectors.emotions),
                fixture_dir: detectors.fixture_dir,
                object_model: detectors.object_model,
                object_input_size: detectors
                    .object_input_size
                    .unwrap_or(default_detectors.object_input_size),
                object_min_confidence: detectors
                    .object_min_confidence
                    .unwrap_or(default_detectors.object_min_confidence),
                verbose: detectors.verbose.unwrap_or(default_detectors.verbose),
            },
            bias_rules: file.bias.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(emotion) = std::env::var("GOGGLES_DESIRED_EMOTION") {
            if !emotion.trim().is_empty() {
                self.desired_emotion = emotion.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("GOGGLES_DCRAW_PATH") {
            if !path.trim().is_empty() {
                self.raw.dcraw_path = PathBuf::from(path);
            }
        }
        if let Ok(timeout) = std::env::var("GOGGLES_DCRAW_TIMEOUT_SECS") {
            let seconds: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("GOGGLES_DCRAW_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.raw.timeout = Duration::from_secs(seconds);
        }
        if let Ok(dir) = std::env::var("GOGGLES_FIXTURE_DIR") {
            if !dir.trim().is_empty() {
                self.detectors.fixture_dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(path) = std::env::var("GOGGLES_BIAS_CONFIG") {
            if !path.trim().is_empty() {
                self.bias_rules = load_bias_rules(Path::new(&path))?;
            }
        }
        Ok(())
    }

    /// Check value ranges. Called by `load`; call again after CLI overrides.
    pub fn validate(&self) -> Result<()> {
        if self.desired_emotion.trim().is_empty() {
            return Err(anyhow!("desired_emotion must not be empty"));
        }
        require_non_negative("pose.dedup_threshold_px", self.dedup.threshold_px)?;
        require_unit("pose.landmark_min_visibility", self.landmark_min_visibility)?;

        if self.face.min_side_px < 0 {
            return Err(anyhow!("face.min_side_px must be >= 0"));
        }
        require_unit("face.min_completeness", self.face.min_completeness)?;
        require_non_negative("face.small_face_ratio", self.face.small_face_ratio)?;
        require_non_negative("face.small_face_penalty", self.face.small_face_penalty)?;
        require_non_negative("face.boost_min_ratio", self.face.boost_min_ratio)?;
        require_non_negative("face.boost_max_ratio", self.face.boost_max_ratio)?;
        require_non_negative("face.boost_factor", self.face.boost_factor)?;
        if self.face.boost_min_ratio > self.face.boost_max_ratio {
            return Err(anyhow!(
                "face.boost_min_ratio ({}) must not exceed face.boost_max_ratio ({})",
                self.face.boost_min_ratio,
                self.face.boost_max_ratio
            ));
        }

        require_unit("fusion.partial_full_credit", self.fusion.partial_full_credit)?;
        require_non_negative("fusion.partial_penalty", self.fusion.partial_penalty)?;
        if !self.fusion.no_face_score.is_finite() {
            return Err(anyhow!("fusion.no_face_score must be finite"));
        }
        require_non_negative("fusion.multi_face_avg_threshold", self.fusion.multi_face_avg_threshold)?;
        require_non_negative("fusion.multi_face_bonus", self.fusion.multi_face_bonus)?;
        require_non_negative("fusion.quality_cap", self.fusion.quality_cap)?;

        if self.raw.timeout.is_zero() {
            return Err(anyhow!("raw.timeout_secs must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.detectors.object_min_confidence) {
            return Err(anyhow!("detectors.object_min_confidence must be within [0, 1]"));
        }
        for rule in &self.bias_rules {
            if rule.name.trim().is_empty() {
                return Err(anyhow!("bias rule names must not be empty"));
            }
            if !rule.biasamount.is_finite() {
                return Err(anyhow!("bias rule '{}' has a non-finite biasamount", rule.name));
            }
        }
        Ok(())
    }
}

fn require_non_negative(key: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(anyhow!("{} must be a finite value >= 0 (got {})", key, value));
    }
    Ok(())
}

fn require_unit(key: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be within [0, 1] (got {})", key, value));
    }
    Ok(())
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
}

fn read_config_file(path: &Path) -> Result<GogglesConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = if is_toml(path) {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

/// Read an ordered list of bias rules from a JSON or TOML file.
pub fn load_bias_rules(path: &Path) -> Result<Vec<BiasRule>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read bias rules {}: {}", path.display(), e))?;
    let parsed: BiasFile = if is_toml(path) {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid bias rules {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid bias rules {}: {}", path.display(), e))?
    };
    Ok(match parsed {
        BiasFile::List(rules) => rules,
        BiasFile::Table { bias } => bias,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tuned_constants() {
        let cfg = GogglesConfig::default();
        assert_eq!(cfg.desired_emotion, "happy");
        assert_eq!(cfg.dedup.threshold_px, 50.0);
        assert_eq!(cfg.face.small_face_ratio, 0.01);
        assert_eq!(cfg.fusion.no_face_score, -1.0);
        assert_eq!(cfg.raw.dcraw_path, PathBuf::from("dcraw"));
        assert_eq!(cfg.detectors.pose, "null");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_inverted_boost_window() {
        let mut cfg = GogglesConfig::default();
        cfg.face.boost_min_ratio = 0.5;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("boost_min_ratio"));
    }

    #[test]
    fn bias_rules_load_from_json_list_and_toml_table() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("bias.json");
        std::fs::write(&json, r#"[{"name": "dog", "biasamount": 1.5}]"#).unwrap();
        let toml_path = dir.path().join("bias.toml");
        std::fs::write(
            &toml_path,
            "[[bias]]\nname = \"cake\"\nbiasamount = 2.0\n\n[[bias]]\nname = \"tie\"\nbiasamount = -0.5\n",
        )
        .unwrap();

        assert_eq!(load_bias_rules(&json).unwrap()[0].name, "dog");
        let rules = load_bias_rules(&toml_path).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].biasamount, -0.5);
    }
}
