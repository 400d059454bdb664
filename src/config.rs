use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::danger::{DangerTier, TierEntry, TierTable};

const DEFAULT_DB_PATH: &str = "detections.db";
const DEFAULT_RESULTS_DIR: &str = "results";
const DEFAULT_PERSIST_INTERVAL_SECS: f64 = 5.0;
const DEFAULT_PUBLISH_CAPACITY: usize = 4;
const DEFAULT_IDLE_WAIT_MS: u64 = 100;
const MAX_IDLE_WAIT_MS: u64 = 100;
const DEFAULT_DETECTOR_BACKEND: &str = "stub";
const DEFAULT_MODEL_PATH: &str = "models/didray.onnx";
const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const ALARM_ASSET_CANDIDATES: [&str; 2] = ["assets/alarm.wav", "alarm.wav"];

#[derive(Debug, Deserialize, Default)]
struct EngineConfigFile {
    db_path: Option<String>,
    results_dir: Option<PathBuf>,
    persistence: Option<PersistenceConfigFile>,
    alarm: Option<AlarmConfigFile>,
    detector: Option<DetectorConfigFile>,
    stream: Option<StreamConfigFile>,
    tiers: Option<Vec<TierConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct PersistenceConfigFile {
    interval_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct AlarmConfigFile {
    asset: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    class_names: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    publish_capacity: Option<usize>,
    idle_wait_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TierConfigFile {
    tier: String,
    labels: Vec<String>,
    color: Option<[u8; 3]>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub db_path: String,
    pub results_dir: PathBuf,
    pub persist_interval: Duration,
    pub alarm_asset: Option<PathBuf>,
    pub detector: DetectorSettings,
    pub stream: StreamSettings,
    pub tiers: TierTable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    /// `stub` or `tract`.
    pub backend: String,
    pub model_path: PathBuf,
    pub input_width: u32,
    pub input_height: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Model class index → label.
    pub class_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Slots in the frame publication channel before the oldest is dropped.
    pub publish_capacity: usize,
    /// Park granularity while paused.
    pub idle_wait: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            publish_capacity: DEFAULT_PUBLISH_CAPACITY,
            idle_wait: Duration::from_millis(DEFAULT_IDLE_WAIT_MS),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let tiers = TierTable::default();
        let class_names = tiers.all_labels();
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
            persist_interval: Duration::from_secs_f64(DEFAULT_PERSIST_INTERVAL_SECS),
            alarm_asset: None,
            detector: DetectorSettings {
                backend: DEFAULT_DETECTOR_BACKEND.to_string(),
                model_path: PathBuf::from(DEFAULT_MODEL_PATH),
                input_width: DEFAULT_MODEL_INPUT,
                input_height: DEFAULT_MODEL_INPUT,
                confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
                iou_threshold: DEFAULT_IOU_THRESHOLD,
                class_names,
            },
            stream: StreamSettings::default(),
            tiers,
        }
    }
}

impl EngineConfig {
    /// Load from the TOML file named by `DIDRAY_CONFIG` (if set), then apply
    /// `DIDRAY_*` environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DIDRAY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.resolve_alarm_asset();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document without consulting the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: EngineConfigFile =
            toml::from_str(raw).map_err(|e| anyhow!("invalid config: {}", e))?;
        let mut cfg = Self::from_file(file)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: EngineConfigFile) -> Result<Self> {
        let defaults = Self::default();

        let tiers = match file.tiers {
            Some(rows) => {
                let entries = rows
                    .into_iter()
                    .map(|row| {
                        let tier = DangerTier::parse(&row.tier)?;
                        Ok(TierEntry {
                            tier,
                            labels: row.labels,
                            color: row.color.unwrap_or_else(|| tier.default_color()),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                TierTable::new(entries)?
            }
            None => defaults.tiers,
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .unwrap_or(defaults.detector.backend),
            model_path: detector_file
                .model_path
                .unwrap_or(defaults.detector.model_path),
            input_width: detector_file
                .input_width
                .unwrap_or(defaults.detector.input_width),
            input_height: detector_file
                .input_height
                .unwrap_or(defaults.detector.input_height),
            confidence_threshold: detector_file
                .confidence_threshold
                .unwrap_or(defaults.detector.confidence_threshold),
            iou_threshold: detector_file
                .iou_threshold
                .unwrap_or(defaults.detector.iou_threshold),
            class_names: detector_file
                .class_names
                .unwrap_or_else(|| tiers.all_labels()),
        };

        let stream_file = file.stream.unwrap_or_default();
        let stream = StreamSettings {
            publish_capacity: stream_file
                .publish_capacity
                .unwrap_or(defaults.stream.publish_capacity),
            idle_wait: stream_file
                .idle_wait_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.stream.idle_wait),
        };

        let persist_interval = match file.persistence.and_then(|p| p.interval_secs) {
            Some(secs) => interval_from_secs(secs)?,
            None => defaults.persist_interval,
        };

        Ok(Self {
            db_path: file.db_path.unwrap_or(defaults.db_path),
            results_dir: file.results_dir.unwrap_or(defaults.results_dir),
            persist_interval,
            alarm_asset: file.alarm.and_then(|alarm| alarm.asset),
            detector,
            stream,
            tiers,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("DIDRAY_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(dir) = std::env::var("DIDRAY_RESULTS_DIR") {
            if !dir.trim().is_empty() {
                self.results_dir = PathBuf::from(dir);
            }
        }
        if let Ok(asset) = std::env::var("DIDRAY_ALARM_ASSET") {
            if !asset.trim().is_empty() {
                self.alarm_asset = Some(PathBuf::from(asset));
            }
        }
        if let Ok(model) = std::env::var("DIDRAY_MODEL_PATH") {
            if !model.trim().is_empty() {
                self.detector.model_path = PathBuf::from(model);
            }
        }
        if let Ok(backend) = std::env::var("DIDRAY_DETECTOR") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_string();
            }
        }
        if let Ok(interval) = std::env::var("DIDRAY_PERSIST_INTERVAL_SECS") {
            let secs: f64 = interval.trim().parse().map_err(|_| {
                anyhow!("DIDRAY_PERSIST_INTERVAL_SECS must be a number of seconds")
            })?;
            self.persist_interval = interval_from_secs(secs)?;
        }
        Ok(())
    }

    /// Fall back to the conventional asset locations when none is configured.
    fn resolve_alarm_asset(&mut self) {
        if self.alarm_asset.is_some() {
            return;
        }
        self.alarm_asset = ALARM_ASSET_CANDIDATES
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.is_file());
        if self.alarm_asset.is_none() {
            log::info!("no alarm asset found; alarm will run silently");
        }
    }

    fn validate(&mut self) -> Result<()> {
        if self.persist_interval.is_zero() {
            return Err(anyhow!("persistence interval must be greater than zero"));
        }
        if self.stream.publish_capacity == 0 {
            return Err(anyhow!("stream.publish_capacity must be at least 1"));
        }
        let idle_ms = self.stream.idle_wait.as_millis() as u64;
        if idle_ms == 0 || idle_ms > MAX_IDLE_WAIT_MS {
            return Err(anyhow!(
                "stream.idle_wait_ms must be within 1..={}",
                MAX_IDLE_WAIT_MS
            ));
        }
        for (name, value) in [
            ("confidence_threshold", self.detector.confidence_threshold),
            ("iou_threshold", self.detector.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("detector.{} must be within [0, 1]", name));
            }
        }
        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(anyhow!("detector input size must be non-zero"));
        }
        self.detector.backend = self.detector.backend.to_ascii_lowercase();
        Ok(())
    }
}

fn interval_from_secs(secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(anyhow!("persistence interval must be a positive number of seconds"));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn read_config_file(path: &Path) -> Result<EngineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_original_policy() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.persist_interval, Duration::from_secs(5));
        assert_eq!(cfg.stream.idle_wait, Duration::from_millis(100));
        assert_eq!(cfg.db_path, "detections.db");
        assert_eq!(cfg.tiers.classify("Gun"), DangerTier::Critical);
        assert!(cfg.detector.class_names.contains(&"Wrench".to_string()));
    }

    #[test]
    fn toml_tiers_replace_the_default_table() -> Result<()> {
        let cfg = EngineConfig::from_toml_str(
            r#"
            [persistence]
            interval_secs = 2.5

            [[tiers]]
            tier = "critical"
            labels = ["Rifle"]
            color = [1, 2, 3]

            [[tiers]]
            tier = "medium"
            labels = ["Bat"]
            "#,
        )?;
        assert_eq!(cfg.persist_interval, Duration::from_millis(2500));
        assert_eq!(cfg.tiers.classify("Rifle"), DangerTier::Critical);
        assert_eq!(cfg.tiers.classify("Bat"), DangerTier::Medium);
        assert_eq!(cfg.tiers.classify("Gun"), DangerTier::Low);
        assert_eq!(cfg.tiers.color(DangerTier::Critical), [1, 2, 3]);
        assert_eq!(cfg.detector.class_names, vec!["Bat", "Rifle"]);
        Ok(())
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(EngineConfig::from_toml_str("[persistence]\ninterval_secs = 0").is_err());
        assert!(EngineConfig::from_toml_str("[stream]\npublish_capacity = 0").is_err());
        assert!(EngineConfig::from_toml_str("[stream]\nidle_wait_ms = 500").is_err());
        assert!(EngineConfig::from_toml_str("[detector]\niou_threshold = 1.5").is_err());
        assert!(EngineConfig::from_toml_str("[[tiers]]\ntier = \"extreme\"\nlabels = []").is_err());
    }
}
