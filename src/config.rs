use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::TreeError;

pub const DEFAULT_CONFIG_FILE: &str = "protein-tree.json";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default = "default_build_root")]
    pub build_root: String,
    #[serde(default = "default_error_log")]
    pub error_log: String,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default = "default_host_rewrites")]
    pub host_rewrites: Vec<HostRewrite>,
    #[serde(default)]
    pub merge_synonyms: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: None,
            build_root: default_build_root(),
            error_log: default_error_log(),
            engine: EngineConfig::default(),
            download: DownloadConfig::default(),
            host_rewrites: default_host_rewrites(),
            merge_synonyms: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_engine_program")]
    pub program: String,
    #[serde(default = "default_engine_args")]
    pub args: Vec<String>,
    /// CURIE prefixes handed to the filter operation, keyed by database name.
    #[serde(default = "default_prefixes")]
    pub prefixes: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: default_engine_program(),
            args: default_engine_args(),
            prefixes: default_prefixes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadConfig {
    /// Dataset URL; `{proteome_id}` is replaced per species.
    #[serde(default = "default_url_template")]
    pub url_template: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            url_template: default_url_template(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HostRewrite {
    pub from: String,
    pub to: String,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `protein-tree.json` when present, or the defaults.
    pub fn resolve(path: Option<&str>) -> Result<Config, TreeError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| TreeError::ConfigRead(config_path.clone()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Config, TreeError> {
        let config: Config =
            serde_json::from_str(content).map_err(|err| TreeError::ConfigParse(err.to_string()))?;
        if let Some(version) = config.schema_version {
            if version > 1 {
                return Err(TreeError::ConfigParse(format!(
                    "unsupported schema_version {version}"
                )));
            }
        }
        if !config.download.url_template.contains("{proteome_id}") {
            return Err(TreeError::ConfigParse(
                "download.url_template must contain {proteome_id}".to_string(),
            ));
        }
        Ok(config)
    }
}

fn default_build_root() -> String {
    "build".to_string()
}

fn default_error_log() -> String {
    "errors.txt".to_string()
}

fn default_engine_program() -> String {
    "java".to_string()
}

fn default_engine_args() -> Vec<String> {
    vec![
        "-Xmx8G".to_string(),
        "-jar".to_string(),
        "util/robot.jar".to_string(),
    ]
}

fn default_prefixes() -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "UniProt".to_string(),
            "http://www.uniprot.org/uniprot/".to_string(),
        ),
        (
            "GenPept".to_string(),
            "https://www.ncbi.nlm.nih.gov/protein/".to_string(),
        ),
    ])
}

fn default_url_template() -> String {
    "https://rest.uniprot.org/uniprotkb/stream?compressed=true&format=rdf&query=proteome:{proteome_id}"
        .to_string()
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_host_rewrites() -> Vec<HostRewrite> {
    vec![HostRewrite {
        from: "purl.uniprot".to_string(),
        to: "www.uniprot".to_string(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let config = ConfigLoader::parse("{}").unwrap();
        assert_eq!(config.build_root, "build");
        assert_eq!(config.error_log, "errors.txt");
        assert_eq!(config.engine.program, "java");
        assert!(config.engine.prefixes.contains_key("UniProt"));
        assert_eq!(config.host_rewrites, default_host_rewrites());
        assert!(!config.merge_synonyms);
    }

    #[test]
    fn overrides_are_applied() {
        let config = ConfigLoader::parse(
            r#"{"build_root": "out", "merge_synonyms": true, "engine": {"program": "robot", "args": []}}"#,
        )
        .unwrap();
        assert_eq!(config.build_root, "out");
        assert!(config.merge_synonyms);
        assert_eq!(config.engine.program, "robot");
        assert!(config.engine.args.is_empty());
        assert!(!config.engine.prefixes.is_empty());
    }

    #[test]
    fn url_template_needs_placeholder() {
        let err = ConfigLoader::parse(r#"{"download": {"url_template": "https://example.org"}}"#)
            .unwrap_err();
        assert!(matches!(err, TreeError::ConfigParse(_)));
    }
}
