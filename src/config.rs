use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub taxonomy: TaxonomyConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub review: ReviewConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Allowed enum values and length bounds for staged candidates.
#[derive(Debug, Deserialize, Clone)]
pub struct TaxonomyConfig {
    #[serde(default = "default_difficulties")]
    pub difficulties: Vec<String>,
    #[serde(default = "default_types")]
    pub types: Vec<String>,
    #[serde(default = "default_max_topic_len")]
    pub max_topic_len: usize,
    #[serde(default = "default_max_topic_len")]
    pub max_subtopic_len: usize,
    #[serde(default = "default_max_question_len")]
    pub max_question_len: usize,
    #[serde(default = "default_max_answer_len")]
    pub max_answer_len: usize,
    #[serde(default = "default_min_text_len")]
    pub min_text_len: usize,
}

impl Default for TaxonomyConfig {
    fn default() -> Self {
        Self {
            difficulties: default_difficulties(),
            types: default_types(),
            max_topic_len: default_max_topic_len(),
            max_subtopic_len: default_max_topic_len(),
            max_question_len: default_max_question_len(),
            max_answer_len: default_max_answer_len(),
            min_text_len: default_min_text_len(),
        }
    }
}

fn default_difficulties() -> Vec<String> {
    vec!["Basic".to_string(), "Advanced".to_string()]
}
fn default_types() -> Vec<String> {
    [
        "Definition",
        "Problem",
        "GenConcept",
        "Calculation",
        "Analysis",
        "Question",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_max_topic_len() -> usize {
    100
}
fn default_max_question_len() -> usize {
    5000
}
fn default_max_answer_len() -> usize {
    10000
}
fn default_min_text_len() -> usize {
    1
}

/// Duplicate detection settings.
#[derive(Debug, Deserialize, Clone)]
pub struct DedupConfig {
    /// Similarity score at or above which a candidate is flagged.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Cap on authoritative candidates fetched per staged record.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: i64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            candidate_k: default_candidate_k(),
        }
    }
}

fn default_threshold() -> f64 {
    0.8
}
fn default_candidate_k() -> i64 {
    80
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReviewConfig {
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

fn default_page_size() -> i64 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Bearer token required on every request when set. Stands in for the
    /// out-of-scope authentication collaborator.
    #[serde(default)]
    pub auth_token: Option<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.taxonomy.difficulties.is_empty() {
        anyhow::bail!("taxonomy.difficulties must not be empty");
    }
    if config.taxonomy.types.is_empty() {
        anyhow::bail!("taxonomy.types must not be empty");
    }
    if config.taxonomy.min_text_len == 0 {
        anyhow::bail!("taxonomy.min_text_len must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.dedup.threshold) {
        anyhow::bail!("dedup.threshold must be in [0.0, 1.0]");
    }
    if config.dedup.candidate_k < 1 {
        anyhow::bail!("dedup.candidate_k must be >= 1");
    }

    if config.review.page_size < 1 {
        anyhow::bail!("review.page_size must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qbank.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let (_dir, path) = write_config(
            r#"
[db]
path = "/tmp/qbank.sqlite"

[server]
bind = "127.0.0.1:7461"
"#,
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.dedup.threshold, 0.8);
        assert_eq!(cfg.taxonomy.difficulties, vec!["Basic", "Advanced"]);
        assert_eq!(cfg.taxonomy.max_answer_len, 10000);
        assert_eq!(cfg.review.page_size, 50);
        assert!(cfg.server.auth_token.is_none());
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let (_dir, path) = write_config(
            r#"
[db]
path = "/tmp/qbank.sqlite"

[dedup]
threshold = 1.5

[server]
bind = "127.0.0.1:7461"
"#,
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_empty_difficulties_rejected() {
        let (_dir, path) = write_config(
            r#"
[db]
path = "/tmp/qbank.sqlite"

[taxonomy]
difficulties = []

[server]
bind = "127.0.0.1:7461"
"#,
        );
        assert!(load_config(&path).is_err());
    }
}
