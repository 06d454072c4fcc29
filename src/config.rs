use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::semantic::DEFAULT_MODEL;

const CONFIG_FILE: &str = "config.yaml";

/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_EMBED_BATCH_SIZE: usize = 8;

const DEFAULT_TOP_K: usize = 10;
const DEFAULT_SEMANTIC_TOP_K: usize = 100;
const DEFAULT_MAX_DECORATION_SCORE: f32 = 0.85;
const DEFAULT_MIN_PLAIN_SCORE: f32 = 0.325;
const DEFAULT_IMAGE_TEXT_WEIGHT: f32 = 0.4;
const DEFAULT_TYPE_DETECTION_THRESHOLD: f32 = 0.25;

const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_MODEL: &str = "gpt-4.1-nano";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins. Empty means any origin.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Maximum upload size in megabytes
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            cors_origins: default_cors_origins(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:3001".to_string(),
    ]
}

fn default_max_upload_mb() -> usize {
    20
}

/// Where the catalog images live.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    /// Directory under `data_root` holding one sub-directory per category
    #[serde(default = "default_dataset_dir")]
    pub dataset_dir: String,

    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Optional JSON sidecar with descriptions and style scores
    #[serde(default = "default_metadata_file")]
    pub metadata_file: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            dataset_dir: default_dataset_dir(),
            extensions: default_extensions(),
            metadata_file: default_metadata_file(),
        }
    }
}

impl DataConfig {
    pub fn dataset_path(&self) -> PathBuf {
        self.data_root.join(&self.dataset_dir)
    }
}

fn default_data_root() -> PathBuf {
    PathBuf::from("./data")
}

fn default_dataset_dir() -> String {
    "Jewellery_Data".to_string()
}

fn default_extensions() -> Vec<String> {
    vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()]
}

fn default_metadata_file() -> String {
    "metadata.json".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Embedding model name (e.g., "clip-vit-b32")
    #[serde(default = "default_model")]
    pub name: String,

    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            batch_size: default_embed_batch_size(),
            download_timeout_secs: default_download_timeout_secs(),
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_embed_batch_size() -> usize {
    DEFAULT_EMBED_BATCH_SIZE
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

/// Search defaults. Request values win when present.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Neighbors fetched before post-filtering
    #[serde(default = "default_semantic_top_k")]
    pub semantic_top_k: usize,

    /// Applied while style scoring is active and the request sets none
    #[serde(default = "default_max_decoration_score")]
    pub max_decoration_score: f32,

    #[serde(default = "default_min_plain_score")]
    pub min_plain_score: f32,

    /// Share of the text embedding when an image comes with text
    #[serde(default = "default_image_text_weight")]
    pub image_text_weight: f32,

    /// Minimum zero-shot score for detecting the jewelry type of an upload
    #[serde(default = "default_type_detection_threshold")]
    pub type_detection_threshold: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            semantic_top_k: default_semantic_top_k(),
            max_decoration_score: default_max_decoration_score(),
            min_plain_score: default_min_plain_score(),
            image_text_weight: default_image_text_weight(),
            type_detection_threshold: default_type_detection_threshold(),
        }
    }
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_semantic_top_k() -> usize {
    DEFAULT_SEMANTIC_TOP_K
}

fn default_max_decoration_score() -> f32 {
    DEFAULT_MAX_DECORATION_SCORE
}

fn default_min_plain_score() -> f32 {
    DEFAULT_MIN_PLAIN_SCORE
}

fn default_image_text_weight() -> f32 {
    DEFAULT_IMAGE_TEXT_WEIGHT
}

fn default_type_detection_threshold() -> f32 {
    DEFAULT_TYPE_DETECTION_THRESHOLD
}

/// A family of decoration phrases, used when a negated term contains
/// one of the triggers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TermFamily {
    pub triggers: Vec<String>,
    pub templates: Vec<String>,
}

/// Dataset-specific vocabulary driving query enhancement.
///
/// Templates use `{category}` and `{term}` placeholders.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VocabularyConfig {
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,

    #[serde(default = "default_negation_cues")]
    pub negation_cues: Vec<String>,

    /// Positive phrase substituted for "<cue> <term>"
    #[serde(default = "default_negation_rewrites")]
    pub negation_rewrites: BTreeMap<String, String>,

    #[serde(default = "default_plain_cues")]
    pub plain_cues: Vec<String>,

    #[serde(default = "default_decoration_templates")]
    pub decoration_templates: Vec<String>,

    #[serde(default = "default_decoration_families")]
    pub decoration_families: Vec<TermFamily>,

    /// Plain phrases per category; `plain_fallback` covers the rest
    #[serde(default = "default_plain_terms")]
    pub plain_terms: BTreeMap<String, Vec<String>>,

    #[serde(default = "default_plain_fallback")]
    pub plain_fallback: String,
}

impl Default for VocabularyConfig {
    fn default() -> Self {
        Self {
            categories: default_categories(),
            negation_cues: default_negation_cues(),
            negation_rewrites: default_negation_rewrites(),
            plain_cues: default_plain_cues(),
            decoration_templates: default_decoration_templates(),
            decoration_families: default_decoration_families(),
            plain_terms: default_plain_terms(),
            plain_fallback: default_plain_fallback(),
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn default_categories() -> Vec<String> {
    strings(&["ring", "necklace"])
}

fn default_negation_cues() -> Vec<String> {
    strings(&["no", "without"])
}

fn default_negation_rewrites() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("no".to_string(), "plain simple".to_string()),
        ("without".to_string(), "minimalist smooth".to_string()),
    ])
}

fn default_plain_cues() -> Vec<String> {
    strings(&["plain", "simple", "minimalist"])
}

fn default_decoration_templates() -> Vec<String> {
    strings(&[
        "{category} with {term}",
        "{term} {category}",
        "{category} featuring {term}",
        "{term}s on {category}",
        "{category} set with {term}s",
    ])
}

fn default_decoration_families() -> Vec<TermFamily> {
    vec![
        TermFamily {
            triggers: strings(&["diamond", "stone", "gem"]),
            templates: strings(&[
                "jeweled {category}",
                "sparkly {category}",
                "{category} with stones",
                "{category} with gems",
            ]),
        },
        TermFamily {
            triggers: strings(&["pendant", "charm"]),
            templates: strings(&[
                "{category} with pendant",
                "{category} with charm",
                "pendant {category}",
                "charm {category}",
            ]),
        },
        TermFamily {
            triggers: strings(&["pattern", "design", "engraving"]),
            templates: strings(&[
                "patterned {category}",
                "engraved {category}",
                "ornate {category}",
                "{category} with design",
            ]),
        },
    ]
}

fn default_plain_terms() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([
        (
            "ring".to_string(),
            strings(&[
                "plain gold ring",
                "simple ring band",
                "smooth metal ring",
                "minimalist ring",
                "wedding band",
                "plain ring",
            ]),
        ),
        (
            "necklace".to_string(),
            strings(&[
                "plain gold necklace",
                "simple chain necklace",
                "minimalist necklace",
                "basic necklace chain",
                "smooth necklace",
            ]),
        ),
    ])
}

fn default_plain_fallback() -> String {
    "plain simple {category}".to_string()
}

/// Vision language model used for OCR and product descriptions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Never written back to disk
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,

    /// Longest side of the thumbnail sent to the model
    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_size: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout_secs(),
            thumbnail_size: default_thumbnail_size(),
        }
    }
}

impl LlmConfig {
    /// The client is only built when enabled and a key is present.
    pub fn is_usable(&self) -> bool {
        self.enabled
            && self
                .api_key
                .as_deref()
                .map(|key| !key.trim().is_empty())
                .unwrap_or(false)
    }
}

fn default_true() -> bool {
    true
}

fn default_llm_base_url() -> String {
    DEFAULT_LLM_BASE_URL.to_string()
}

fn default_llm_model() -> String {
    DEFAULT_LLM_MODEL.to_string()
}

fn default_llm_timeout_secs() -> u64 {
    30
}

fn default_thumbnail_size() -> u32 {
    512
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub vocabulary: VocabularyConfig,
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let search = &self.search;
        if !(1..=100).contains(&search.default_top_k) {
            return Err(invalid("search.default_top_k", "must be between 1 and 100"));
        }
        if !(1..=1000).contains(&search.semantic_top_k) {
            return Err(invalid(
                "search.semantic_top_k",
                "must be between 1 and 1000",
            ));
        }
        for (field, value) in [
            ("search.max_decoration_score", search.max_decoration_score),
            ("search.min_plain_score", search.min_plain_score),
            ("search.image_text_weight", search.image_text_weight),
            (
                "search.type_detection_threshold",
                search.type_detection_threshold,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(field, format!("must be in [0, 1], got {value}")));
            }
        }

        let vocab = &self.vocabulary;
        if vocab.categories.is_empty() {
            return Err(invalid("vocabulary.categories", "must not be empty"));
        }
        if vocab
            .categories
            .iter()
            .any(|c| c.trim().is_empty() || c.chars().any(char::is_whitespace))
        {
            return Err(invalid(
                "vocabulary.categories",
                "categories must be single non-empty words",
            ));
        }
        for cue in vocab.negation_rewrites.keys() {
            if !vocab.negation_cues.contains(cue) {
                return Err(invalid(
                    "vocabulary.negation_rewrites",
                    format!("'{cue}' is not a negation cue"),
                ));
            }
        }

        if self.model.batch_size == 0 {
            return Err(invalid("model.batch_size", "must be greater than 0"));
        }
        if self.model.download_timeout_secs == 0 {
            return Err(invalid(
                "model.download_timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.data.extensions.is_empty() {
            return Err(invalid("data.extensions", "must not be empty"));
        }

        if self.llm.enabled {
            url::Url::parse(&self.llm.base_url)
                .map_err(|err| invalid("llm.base_url", err.to_string()))?;
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, creating it with defaults when
    /// missing, then apply environment overrides and validate.
    pub fn load_with(base_path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let base_path = base_path.as_ref();
        let config_path = base_path.join(CONFIG_FILE);

        if !config_path.exists() {
            std::fs::create_dir_all(base_path)?;
            std::fs::write(&config_path, serde_yml::to_string(&Self::default())?)?;
        }

        let config_str = std::fs::read_to_string(&config_path)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;
        config.base_path = base_path.to_path_buf();

        // resave in case new fields were added
        let current = serde_yml::to_string(&config)?;
        if config_str != current {
            std::fs::write(&config_path, current)?;
        }

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Overrides from the environment; `lookup` is injectable for tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup("JEWEL_DATA_ROOT") {
            self.data.data_root = PathBuf::from(root);
        }
        if let Some(bind) = lookup("JEWEL_BIND") {
            self.server.bind_addr = bind;
        }
        if let Some(port) = lookup("JEWEL_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(origins) = lookup("JEWEL_CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(base_url) = lookup("OPENAI_BASE_URL") {
            self.llm.base_url = base_url;
        }
        if let Some(model) = lookup("OPENAI_MODEL") {
            self.llm.model = model;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.vocabulary.categories, vec!["ring", "necklace"]);
        assert_eq!(config.search.semantic_top_k, 100);
    }

    #[test]
    fn test_load_creates_default_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load_with(tmp.path()).unwrap();

        assert!(tmp.path().join(CONFIG_FILE).exists());
        assert_eq!(config.base_path(), tmp.path());
        assert_eq!(config.model.name, DEFAULT_MODEL);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "vocabulary:\n  categories: [ring, bracelet]\n",
        )
        .unwrap();

        let config = Config::load_with(tmp.path()).unwrap();
        assert_eq!(config.vocabulary.categories, vec!["ring", "bracelet"]);
        assert_eq!(config.vocabulary.negation_cues, vec!["no", "without"]);
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let mut config = Config::default();
        config.search.max_decoration_score = 1.5;

        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "search.max_decoration_score",
                ..
            }
        ));
    }

    #[test]
    fn test_empty_vocabulary_rejected() {
        let mut config = Config::default();
        config.vocabulary.categories.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rewrite_for_unknown_cue_rejected() {
        let mut config = Config::default();
        config
            .vocabulary
            .negation_rewrites
            .insert("sans".to_string(), "plain".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("JEWEL_DATA_ROOT", "/srv/jewels"),
            ("JEWEL_PORT", "9090"),
            ("JEWEL_CORS_ORIGINS", "https://a.example, https://b.example"),
            ("OPENAI_API_KEY", "sk-test"),
        ]);

        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.data.data_root, PathBuf::from("/srv/jewels"));
        assert_eq!(config.server.port, 9090);
        assert_eq!(
            config.server.cors_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert!(config.llm.is_usable());
    }

    #[test]
    fn test_api_key_not_serialized() {
        let mut config = Config::default();
        config.llm.api_key = Some("sk-secret".to_string());

        let yaml = serde_yml::to_string(&config).unwrap();
        assert!(!yaml.contains("sk-secret"));
    }

    #[test]
    fn test_llm_unusable_without_key() {
        let config = Config::default();
        assert!(!config.llm.is_usable());
    }
}
