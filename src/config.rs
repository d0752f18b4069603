use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::pipeline::extraction::OcrEngine;
use crate::pipeline::structuring::LlmBackend;

/// Application-level constants
pub const APP_NAME: &str = "deedflow";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Folder names under the data directory.
pub const NEWLY_UPLOADED_DIR: &str = "newly_uploaded";
pub const PROCESSED_DIR: &str = "processed";
pub const FAILED_DIR: &str = "failed";
pub const LEFT_OVER_REG_FEE_DIR: &str = "left_over_reg_fee";
pub const VISION_FAILED_DIR: &str = "vision_failed";

const DATABASE_FILE: &str = "deeds.db";
const ENV_PREFIX: &str = "DEEDFLOW_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Default tracing filter when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "info,deedflow=info"
}

/// Default data directory: `~/deedflow`, or `./deedflow` without a home directory.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

// ═══════════════════════════════════════════
// Settings groups
// ═══════════════════════════════════════════

/// Worker pool sizes and the hand-off queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSettings {
    pub ocr_workers: usize,
    pub llm_workers: usize,
    pub queue_capacity: usize,
    /// Pool size of the single-stage (legacy) mode.
    pub legacy_workers: usize,
    pub vision_workers: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            ocr_workers: 5,
            llm_workers: 5,
            queue_capacity: 2,
            legacy_workers: 2,
            vision_workers: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrSettings {
    pub engine: OcrEngine,
    pub languages: String,
    pub oem: u8,
    pub psm: u8,
    pub dpi: u32,
    pub max_pages: usize,
    /// OCR output shorter than this fails the document.
    pub min_text_chars: usize,
    /// Also read the fee from labelled lines of the OCR text.
    pub fee_from_ocr_text: bool,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            engine: OcrEngine::Tesseract,
            languages: "eng+kan".into(),
            oem: 1,
            psm: 4,
            dpi: 300,
            max_pages: 25,
            min_text_chars: 100,
            fee_from_ocr_text: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmSettings {
    pub backend: LlmBackend,
    /// Overrides the backend's default URL.
    pub base_url: Option<String>,
    pub model: String,
    pub vision_model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            backend: LlmBackend::Ollama,
            base_url: None,
            model: "qwen2.5:14b".into(),
            vision_model: "qwen2.5vl:7b".into(),
            api_key: None,
            temperature: 0.6,
            max_tokens: 4096,
            timeout_secs: 300,
        }
    }
}

/// External fee-table detector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectorSettings {
    /// Executable invoked as `<command> <image> <output> <confidence>`.
    /// Table detection is skipped when unset.
    pub command: Option<PathBuf>,
    pub confidence: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            command: None,
            confidence: 0.80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeeSettings {
    pub min_fee: f64,
    pub max_misc_fee: f64,
    pub threshold_pct: f64,
}

impl Default for FeeSettings {
    fn default() -> Self {
        Self {
            min_fee: 4000.0,
            max_misc_fee: 4000.0,
            threshold_pct: 0.7,
        }
    }
}

// ═══════════════════════════════════════════
// Settings
// ═══════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    pub data_dir: PathBuf,
    /// Defaults to `<data_dir>/deeds.db`.
    pub database_path: Option<PathBuf>,
    pub pipeline: PipelineSettings,
    pub ocr: OcrSettings,
    pub llm: LlmSettings,
    pub detector: DetectorSettings,
    pub fees: FeeSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_path: None,
            pipeline: PipelineSettings::default(),
            ocr: OcrSettings::default(),
            llm: LlmSettings::default(),
            detector: DetectorSettings::default(),
            fees: FeeSettings::default(),
        }
    }
}

impl Settings {
    /// Defaults overlaid with `DEEDFLOW_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup` (keyed by full variable name).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut s = Self::default();

        if let Some(v) = get("DATA_DIR") {
            s.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("DATABASE") {
            s.database_path = Some(PathBuf::from(v));
        }

        overlay(&get, "OCR_WORKERS", &mut s.pipeline.ocr_workers)?;
        overlay(&get, "LLM_WORKERS", &mut s.pipeline.llm_workers)?;
        overlay(&get, "QUEUE_CAPACITY", &mut s.pipeline.queue_capacity)?;
        overlay(&get, "LEGACY_WORKERS", &mut s.pipeline.legacy_workers)?;
        overlay(&get, "VISION_WORKERS", &mut s.pipeline.vision_workers)?;

        overlay(&get, "OCR_ENGINE", &mut s.ocr.engine)?;
        if let Some(v) = get("OCR_LANGUAGES") {
            s.ocr.languages = v;
        }
        overlay(&get, "OCR_OEM", &mut s.ocr.oem)?;
        overlay(&get, "OCR_PSM", &mut s.ocr.psm)?;
        overlay(&get, "OCR_DPI", &mut s.ocr.dpi)?;
        overlay(&get, "OCR_MAX_PAGES", &mut s.ocr.max_pages)?;
        overlay(&get, "OCR_MIN_TEXT_CHARS", &mut s.ocr.min_text_chars)?;
        overlay(&get, "FEE_FROM_OCR_TEXT", &mut s.ocr.fee_from_ocr_text)?;

        overlay(&get, "LLM_BACKEND", &mut s.llm.backend)?;
        if let Some(v) = get("LLM_BASE_URL") {
            s.llm.base_url = Some(v);
        }
        if let Some(v) = get("LLM_MODEL") {
            s.llm.model = v;
        }
        if let Some(v) = get("VISION_MODEL") {
            s.llm.vision_model = v;
        }
        if let Some(v) = get("LLM_API_KEY") {
            s.llm.api_key = Some(v);
        }
        overlay(&get, "LLM_TEMPERATURE", &mut s.llm.temperature)?;
        overlay(&get, "LLM_MAX_TOKENS", &mut s.llm.max_tokens)?;
        overlay(&get, "LLM_TIMEOUT_SECS", &mut s.llm.timeout_secs)?;

        if let Some(v) = get("DETECTOR_COMMAND") {
            s.detector.command = Some(PathBuf::from(v));
        }
        overlay(&get, "DETECTOR_CONFIDENCE", &mut s.detector.confidence)?;

        overlay(&get, "MIN_FEE", &mut s.fees.min_fee)?;
        overlay(&get, "MAX_MISC_FEE", &mut s.fees.max_misc_fee)?;
        overlay(&get, "FEE_THRESHOLD", &mut s.fees.threshold_pct)?;

        Ok(s)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(DATABASE_FILE))
    }

    pub fn newly_uploaded_dir(&self) -> PathBuf {
        self.data_dir.join(NEWLY_UPLOADED_DIR)
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.data_dir.join(PROCESSED_DIR)
    }

    pub fn failed_dir(&self) -> PathBuf {
        self.data_dir.join(FAILED_DIR)
    }

    pub fn left_over_reg_fee_dir(&self) -> PathBuf {
        self.data_dir.join(LEFT_OVER_REG_FEE_DIR)
    }

    pub fn vision_failed_dir(&self) -> PathBuf {
        self.data_dir.join(VISION_FAILED_DIR)
    }

    /// Every folder the pipelines read from or write to.
    pub fn folders(&self) -> Vec<(&'static str, PathBuf)> {
        [
            NEWLY_UPLOADED_DIR,
            PROCESSED_DIR,
            FAILED_DIR,
            LEFT_OVER_REG_FEE_DIR,
            VISION_FAILED_DIR,
        ]
        .into_iter()
        .map(|name| (name, self.data_dir.join(name)))
        .collect()
    }

    /// Create the data directory and all pipeline folders.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for (_, dir) in self.folders() {
            std::fs::create_dir_all(&dir)?;
        }
        tracing::debug!(data_dir = %self.data_dir.display(), "Pipeline folders ready");
        Ok(())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

fn overlay<T>(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
    target: &mut T,
) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = get(name) {
        *target = raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: format!("{ENV_PREFIX}{name}"),
            value: raw.clone(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_match_deployment() {
        let s = Settings::default();
        assert_eq!(s.pipeline.ocr_workers, 5);
        assert_eq!(s.pipeline.llm_workers, 5);
        assert_eq!(s.pipeline.queue_capacity, 2);
        assert_eq!(s.pipeline.legacy_workers, 2);
        assert_eq!(s.pipeline.vision_workers, 1);
        assert_eq!(s.ocr.engine, OcrEngine::Tesseract);
        assert_eq!(s.ocr.languages, "eng+kan");
        assert_eq!(s.ocr.min_text_chars, 100);
        assert_eq!(s.fees.min_fee, 4000.0);
        assert_eq!(s.llm.max_tokens, 4096);
        assert!((s.detector.confidence - 0.80).abs() < f32::EPSILON);
    }

    #[test]
    fn environment_overrides_defaults() {
        let s = settings_from(&[
            ("DEEDFLOW_DATA_DIR", "/srv/deeds"),
            ("DEEDFLOW_OCR_WORKERS", "8"),
            ("DEEDFLOW_LLM_BACKEND", "groq"),
            ("DEEDFLOW_LLM_API_KEY", "gsk_test"),
            ("DEEDFLOW_FEE_FROM_OCR_TEXT", "true"),
            ("DEEDFLOW_OCR_ENGINE", "text_layer"),
            ("DEEDFLOW_QUEUE_CAPACITY", " "),
        ])
        .unwrap();

        assert_eq!(s.data_dir, PathBuf::from("/srv/deeds"));
        assert_eq!(s.pipeline.ocr_workers, 8);
        assert_eq!(s.pipeline.queue_capacity, 2);
        assert_eq!(s.llm.backend, LlmBackend::Groq);
        assert_eq!(s.llm.api_key.as_deref(), Some("gsk_test"));
        assert!(s.ocr.fee_from_ocr_text);
        assert_eq!(s.ocr.engine, OcrEngine::TextLayer);
        assert_eq!(s.database_path(), PathBuf::from("/srv/deeds/deeds.db"));
    }

    #[test]
    fn unparsable_value_names_the_variable() {
        let err = settings_from(&[("DEEDFLOW_LLM_WORKERS", "many")]).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, value, .. } => {
                assert_eq!(key, "DEEDFLOW_LLM_WORKERS");
                assert_eq!(value, "many");
            }
        }
    }

    #[test]
    fn folders_live_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let s = Settings {
            data_dir: dir.path().to_path_buf(),
            ..Settings::default()
        };
        s.ensure_directories().unwrap();
        for (_, folder) in s.folders() {
            assert!(folder.is_dir());
            assert!(folder.starts_with(dir.path()));
        }
        assert!(s.failed_dir().ends_with("failed"));
    }

    #[test]
    fn api_key_not_serialised() {
        let mut s = Settings::default();
        s.llm.api_key = Some("secret".into());
        let json = serde_json::to_string(&s).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.1.0");
    }
}
