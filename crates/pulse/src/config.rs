//! Explicit configuration for every pipeline component.
//!
//! A [`Config`] is built once at startup, validated, and then handed to the components that need
//! it. Nothing in the library reads global state, so tests can swap in synthetic journals and
//! taxonomies freely.
//!
//! Sources, later ones overriding earlier ones:
//! 1. built-in defaults ([`Config::default`]),
//! 2. a JSON file (see [`Config::load`]),
//! 3. environment variables `PULSE_API_KEY`, `PULSE_BASE_URL` and `PULSE_DATABASE`, with a `.env`
//!    file in the working directory loaded first.
//!
//! # Examples
//!
//! ```
//! use pulse::config::Config;
//!
//! let config: Config = serde_json::from_str(
//!   r#"{ "journals": [{ "name": "Cell", "feed_url": "https://www.cell.com/cell/current.rss",
//!                      "domain_patterns": ["cell.com"] }] }"#,
//! )
//! .unwrap();
//! config.validate().unwrap();
//! assert_eq!(config.ingest.per_journal_limit, 3);
//! ```

use std::{collections::HashSet, env, path::Path};

use url::Url;

use super::*;
use crate::article::UNKNOWN_JOURNAL;

/// The pseudo-field meaning "no field"; never offered to the classifier.
pub const NO_FIELD: &str = "无";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Journals to ingest, in matching priority order
  pub journals: Vec<JournalConfig>,
  /// Closed set of research fields
  pub taxonomy: Taxonomy,
  /// Model endpoint and model names
  pub llm:      LlmConfig,
  /// Batch behaviour
  pub ingest:   IngestConfig,
  /// Database location, [`Database::default_path`] when absent
  pub database: Option<PathBuf>,
}

/// One journal feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalConfig {
  /// Display name stored on every article of this journal
  pub name:             String,
  /// RSS or Atom feed URL
  pub feed_url:         String,
  /// Substrings that identify this journal's article links
  pub domain_patterns:  Vec<String>,
  /// Substrings that veto a domain match, e.g. a sub-journal under the parent's domain
  #[serde(default)]
  pub exclude_patterns: Vec<String>,
}

impl JournalConfig {
  /// Whether `link` belongs to this journal.
  pub fn matches(&self, link: &str) -> bool {
    self.domain_patterns.iter().any(|p| link.contains(p.as_str()))
      && !self.exclude_patterns.iter().any(|p| link.contains(p.as_str()))
  }
}

/// Resolves the display name of the journal that `link` belongs to.
///
/// Journals are tested in order; the first whose domain patterns match and whose exclusion
/// patterns do not wins. Unmatched and placeholder links resolve to [`UNKNOWN_JOURNAL`].
pub fn identify_journal<'a>(journals: &'a [JournalConfig], link: &str) -> &'a str {
  if article::is_placeholder_link(link) {
    return UNKNOWN_JOURNAL;
  }
  journals.iter().find(|j| j.matches(link)).map(|j| j.name.as_str()).unwrap_or(UNKNOWN_JOURNAL)
}

/// The closed, ordered set of research fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Taxonomy {
  /// Field names in presentation order
  fields: Vec<String>,
}

impl Taxonomy {
  /// Builds a taxonomy from field names, dropping the [`NO_FIELD`] pseudo-field.
  pub fn new<I, S>(fields: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>, {
    Self { fields: fields.into_iter().map(Into::into).filter(|f| f != NO_FIELD).collect() }
  }

  /// Whether `field` belongs to the taxonomy.
  pub fn contains(&self, field: &str) -> bool { self.fields.iter().any(|f| f == field) }

  /// Field names in presentation order.
  pub fn fields(&self) -> &[String] { &self.fields }

  /// Number of fields.
  pub fn len(&self) -> usize { self.fields.len() }

  /// Whether the taxonomy has no fields.
  pub fn is_empty(&self) -> bool { self.fields.is_empty() }

  /// Returns `field` if it belongs to the taxonomy, [`PulseError::UnknownField`] otherwise.
  pub fn require<'a>(&self, field: &'a str) -> Result<&'a str, PulseError> {
    if self.contains(field) {
      Ok(field)
    } else {
      Err(PulseError::UnknownField(field.to_string()))
    }
  }
}

impl Default for Taxonomy {
  fn default() -> Self {
    Self::new([
      "数学与统计学",
      "物理学与力学",
      "化学与材料科学",
      "地球科学",
      "天文学与空间科学",
      "生命科学与生物医学工程",
      "能源与动力工程",
      "电子与信息工程",
      "计算机科学与人工智能",
      "环境科学与工程",
    ])
  }
}

/// Connection details for the OpenAI-compatible chat endpoint.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
  /// Base URL, without the `/chat/completions` suffix
  pub base_url:             String,
  /// Bearer token; only read from the environment in practice
  #[serde(skip_serializing)]
  pub api_key:              String,
  /// Model used for translation and abstracts
  pub enrichment_model:     String,
  /// Model used for field classification
  pub classification_model: String,
  /// Reasoning model used for logic graphs
  pub reasoning_model:      String,
  /// Per-request timeout
  pub timeout_secs:         u64,
  /// Retries after the first failed attempt
  pub max_retries:          u32,
  /// Base delay for exponential backoff between retries
  pub retry_delay_ms:       u64,
}

impl Default for LlmConfig {
  fn default() -> Self {
    Self {
      base_url:             "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
      api_key:              String::new(),
      enrichment_model:     "qwen-plus".to_string(),
      classification_model: "qwen-plus".to_string(),
      reasoning_model:      "deepseek-r1".to_string(),
      timeout_secs:         120,
      max_retries:          1,
      retry_delay_ms:       1000,
    }
  }
}

impl std::fmt::Debug for LlmConfig {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LlmConfig")
      .field("base_url", &self.base_url)
      .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
      .field("enrichment_model", &self.enrichment_model)
      .field("classification_model", &self.classification_model)
      .field("reasoning_model", &self.reasoning_model)
      .field("timeout_secs", &self.timeout_secs)
      .field("max_retries", &self.max_retries)
      .field("retry_delay_ms", &self.retry_delay_ms)
      .finish()
  }
}

/// Batch behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
  /// Maximum number of today's entries taken from each journal
  pub per_journal_limit:   usize,
  /// Generate logic graphs for newly inserted articles
  pub logic_graphs:        bool,
  /// Timeout for each feed download
  pub feed_timeout_secs:   u64,
}

impl Default for IngestConfig {
  fn default() -> Self { Self { per_journal_limit: 3, logic_graphs: true, feed_timeout_secs: 30 } }
}

impl Default for Config {
  fn default() -> Self {
    let journal = |name: &str, feed_url: &str, domains: &[&str], excludes: &[&str]| JournalConfig {
      name:             name.to_string(),
      feed_url:         feed_url.to_string(),
      domain_patterns:  domains.iter().map(|s| s.to_string()).collect(),
      exclude_patterns: excludes.iter().map(|s| s.to_string()).collect(),
    };

    Self {
      journals: vec![
        journal("Science", "https://science.sciencemag.org/rss/current.xml", &["science.org"], &[]),
        journal("Nature", "https://www.nature.com/nature.rss", &["nature.com"], &[
          "biomedeng",
          "natbiomedeng",
          "ncomms",
        ]),
        journal(
          "Nature Biomedical Engineering",
          "https://www.nature.com/natbiomedeng.rss",
          &["biomedeng", "natbiomedeng"],
          &[],
        ),
        journal("Cell", "https://www.cell.com/cell/current.rss", &["cell.com"], &[]),
        journal("The Lancet", "http://www.thelancet.com/rssfeed/lancet_online.xml", &[
          "thelancet.com",
        ], &[]),
        journal("Nature Communications", "https://www.nature.com/ncomms.rss", &["ncomms"], &[]),
      ],
      taxonomy: Taxonomy::default(),
      llm:      LlmConfig::default(),
      ingest:   IngestConfig::default(),
      database: None,
    }
  }
}

impl Config {
  /// Default location of the config file in the user's config directory.
  pub fn default_path() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("pulse").join("config.json")
  }

  /// Loads configuration from `path`, or from [`Config::default_path`] when that file exists,
  /// or from the built-in defaults; then applies environment overrides and validates.
  ///
  /// An explicitly given path that cannot be read is an error.
  pub fn load(path: Option<&Path>) -> Result<Self, PulseError> {
    let _ = dotenvy::dotenv();

    let mut config = match path {
      Some(path) => Self::from_file(path)?,
      None => {
        let default = Self::default_path();
        if default.exists() {
          Self::from_file(&default)?
        } else {
          debug!("No config file at {}, using built-in defaults", default.display());
          Self::default()
        }
      },
    };

    config.apply_env();
    config.validate()?;
    Ok(config)
  }

  /// Reads a JSON config file without applying overrides.
  pub fn from_file(path: &Path) -> Result<Self, PulseError> {
    debug!("Reading config from {}", path.display());
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
  }

  /// Applies `PULSE_API_KEY`, `PULSE_BASE_URL` and `PULSE_DATABASE`.
  pub fn apply_env(&mut self) {
    if let Ok(key) = env::var("PULSE_API_KEY") {
      self.llm.api_key = key;
    }
    if let Ok(url) = env::var("PULSE_BASE_URL") {
      self.llm.base_url = url;
    }
    if let Ok(path) = env::var("PULSE_DATABASE") {
      self.database = Some(PathBuf::from(path));
    }
  }

  /// Checks the journal list and the taxonomy.
  pub fn validate(&self) -> Result<(), PulseError> {
    if self.journals.is_empty() {
      return Err(PulseError::Config("no journals configured".to_string()));
    }

    let mut names = HashSet::new();
    for journal in &self.journals {
      if journal.name.trim().is_empty() {
        return Err(PulseError::Config(format!("journal with feed {} has no name", journal.feed_url)));
      }
      if !names.insert(journal.name.as_str()) {
        return Err(PulseError::Config(format!("journal {} is configured twice", journal.name)));
      }
      if journal.feed_url.trim().is_empty() {
        return Err(PulseError::Config(format!("journal {} has no feed URL", journal.name)));
      }
      let url = Url::parse(&journal.feed_url).map_err(|e| {
        PulseError::Config(format!("journal {} has an invalid feed URL: {e}", journal.name))
      })?;
      if !matches!(url.scheme(), "http" | "https") {
        return Err(PulseError::Config(format!(
          "journal {} feed URL must be http(s), got {}",
          journal.name,
          url.scheme()
        )));
      }
      if journal.domain_patterns.iter().all(|p| p.trim().is_empty()) {
        return Err(PulseError::Config(format!("journal {} has no domain patterns", journal.name)));
      }
    }

    if self.taxonomy.is_empty() {
      return Err(PulseError::Config("taxonomy has no fields".to_string()));
    }
    let mut fields = HashSet::new();
    for field in self.taxonomy.fields() {
      if field.trim().is_empty() || field == NO_FIELD {
        return Err(PulseError::Config(format!("invalid taxonomy field {field:?}")));
      }
      if !fields.insert(field.as_str()) {
        return Err(PulseError::Config(format!("taxonomy field {field} is listed twice")));
      }
    }

    if self.ingest.per_journal_limit == 0 {
      return Err(PulseError::Config("per_journal_limit must be at least 1".to_string()));
    }
    Ok(())
  }

  /// Fails when no API key is available; call before any command that talks to the model.
  pub fn require_api_key(&self) -> Result<(), PulseError> {
    if self.llm.api_key.trim().is_empty() {
      return Err(PulseError::Config("PULSE_API_KEY is required".to_string()));
    }
    Ok(())
  }

  /// The configured database path or [`Database::default_path`].
  pub fn database_path(&self) -> PathBuf { self.database.clone().unwrap_or_else(Database::default_path) }
}
