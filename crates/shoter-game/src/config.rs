use shoter_core::PipelineOptions;
use std::path::PathBuf;
use std::time::Duration;

/// Used when no base URL is set at runtime or at build time.
pub const FALLBACK_BACKEND_BASE_URL: &str = "http://192.168.1.36:8080/api/users/";

/// Game configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the backend user API; endpoint names are joined onto it.
    pub backend_base_url: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub max_dimension: u32,
    pub face_margin: f32,
    pub jpeg_quality: u8,
    pub detect_soft_budget: Option<Duration>,
    /// `None` leaves backend requests unbounded.
    pub http_timeout: Option<Duration>,
    /// Where captured frames are staged before processing.
    pub capture_dir: PathBuf,
}

impl Config {
    /// Load configuration from `SHOTER_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = PipelineOptions::default();

        let backend_base_url = var("SHOTER_BACKEND_BASE_URL")
            .filter(|v| !v.trim().is_empty())
            .or_else(|| option_env!("SHOTER_BACKEND_BASE_URL").map(str::to_string))
            .unwrap_or_else(|| FALLBACK_BACKEND_BASE_URL.to_string());

        Self {
            backend_base_url,
            model_dir: var("SHOTER_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(shoter_core::default_model_dir),
            max_dimension: parsed(&var, "SHOTER_MAX_DIMENSION")
                .filter(|&v: &u32| v > 0)
                .unwrap_or(defaults.max_dimension),
            face_margin: parsed(&var, "SHOTER_FACE_MARGIN")
                .filter(|v: &f32| v.is_finite() && *v >= 0.0)
                .unwrap_or(defaults.face_margin),
            jpeg_quality: parsed(&var, "SHOTER_JPEG_QUALITY")
                .filter(|v: &u8| (1..=100).contains(v))
                .unwrap_or(defaults.jpeg_quality),
            detect_soft_budget: parsed(&var, "SHOTER_DETECT_TIMEOUT_MS").map(Duration::from_millis),
            http_timeout: parsed(&var, "SHOTER_HTTP_TIMEOUT_SECS").map(Duration::from_secs),
            capture_dir: var("SHOTER_CAPTURE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            max_dimension: self.max_dimension,
            face_margin: self.face_margin,
            jpeg_quality: self.jpeg_quality,
            detect_soft_budget: self.detect_soft_budget,
        }
    }
}

fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]);
        assert_eq!(config.max_dimension, 1280);
        assert_eq!(config.jpeg_quality, 90);
        assert!((config.face_margin - 0.2).abs() < f32::EPSILON);
        assert!(config.detect_soft_budget.is_none());
        assert!(config.http_timeout.is_none());
        assert_eq!(config.model_dir, shoter_core::default_model_dir());
        let expected_url = option_env!("SHOTER_BACKEND_BASE_URL").unwrap_or(FALLBACK_BACKEND_BASE_URL);
        assert_eq!(config.backend_base_url, expected_url);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("SHOTER_BACKEND_BASE_URL", "http://10.0.0.5/api/users/"),
            ("SHOTER_MODEL_DIR", "/opt/models"),
            ("SHOTER_MAX_DIMENSION", "640"),
            ("SHOTER_FACE_MARGIN", "0.1"),
            ("SHOTER_JPEG_QUALITY", "75"),
            ("SHOTER_DETECT_TIMEOUT_MS", "250"),
            ("SHOTER_HTTP_TIMEOUT_SECS", " 15 "),
            ("SHOTER_CAPTURE_DIR", "/var/tmp/shots"),
        ]);
        assert_eq!(config.backend_base_url, "http://10.0.0.5/api/users/");
        assert_eq!(config.scrfd_model_path(), PathBuf::from("/opt/models/det_10g.onnx"));
        assert_eq!(config.detect_soft_budget, Some(Duration::from_millis(250)));
        assert_eq!(config.http_timeout, Some(Duration::from_secs(15)));
        assert_eq!(config.capture_dir, PathBuf::from("/var/tmp/shots"));

        let options = config.pipeline_options();
        assert_eq!(options.max_dimension, 640);
        assert_eq!(options.jpeg_quality, 75);
        assert_eq!(options.detect_soft_budget, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config(&[
            ("SHOTER_BACKEND_BASE_URL", "  "),
            ("SHOTER_MAX_DIMENSION", "0"),
            ("SHOTER_FACE_MARGIN", "-1"),
            ("SHOTER_JPEG_QUALITY", "250"),
            ("SHOTER_HTTP_TIMEOUT_SECS", "soon"),
        ]);
        assert_ne!(config.backend_base_url.trim(), "");
        assert_eq!(config.max_dimension, 1280);
        assert!((config.face_margin - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.jpeg_quality, 90);
        assert!(config.http_timeout.is_none());
    }
}
