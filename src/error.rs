use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum TreeError {
    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to read table {path}: {message}")]
    TableRead { path: PathBuf, message: String },

    #[error("cannot parse table {0} (unknown format, expected .tsv or .csv)")]
    UnknownTableFormat(PathBuf),

    #[error("table {path} is missing required column `{column}`")]
    MissingColumn { path: PathBuf, column: String },

    #[error("table {0} has no header row")]
    MissingHeader(PathBuf),

    #[error("failed to read query template at {0}")]
    QueryTemplateRead(PathBuf),

    #[error("query template {0} has no [TAXON_ID] placeholder")]
    QueryTemplatePlaceholder(PathBuf),

    #[error("dataset download failed: {0}")]
    DownloadHttp(String),

    #[error("dataset source returned status {status}: {message}")]
    DownloadStatus { status: u16, message: String },

    #[error("downloaded dataset is empty: {0}")]
    EmptyDownload(String),

    #[error("failed to start reasoning engine `{program}`: {message}")]
    EngineSpawn { program: String, message: String },

    #[error("invalid document pattern: {0}")]
    Pattern(String),

    #[error("failed to read document {path}: {message}")]
    DocumentRead { path: PathBuf, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

/// Reason a single build unit ended in `Failed`. These never abort the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BuildFailure {
    Fetch { species: String, cause: String },
    Decompress { species: String, cause: String },
    Construct { species: String, cause: String },
    Merge { species: String, cause: String },
    Filter { species: String, cause: String },
    MissingDescriptor { species: String },
    Filesystem { species: String, cause: String },
}

impl BuildFailure {
    pub fn species(&self) -> &str {
        match self {
            BuildFailure::Fetch { species, .. }
            | BuildFailure::Decompress { species, .. }
            | BuildFailure::Construct { species, .. }
            | BuildFailure::Merge { species, .. }
            | BuildFailure::Filter { species, .. }
            | BuildFailure::MissingDescriptor { species }
            | BuildFailure::Filesystem { species, .. } => species,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BuildFailure::Fetch { .. } => "fetch",
            BuildFailure::Decompress { .. } => "decompress",
            BuildFailure::Construct { .. } => "construct",
            BuildFailure::Merge { .. } => "merge",
            BuildFailure::Filter { .. } => "filter",
            BuildFailure::MissingDescriptor { .. } => "missing-descriptor",
            BuildFailure::Filesystem { .. } => "filesystem",
        }
    }
}

// One line per failure in the error log, so causes are flattened.
impl fmt::Display for BuildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flat = |cause: &str| cause.replace(['\n', '\r'], " ");
        match self {
            BuildFailure::Fetch { species, cause } => {
                write!(f, "Could not download dataset for {species}: {}", flat(cause))
            }
            BuildFailure::Decompress { species, cause } => {
                write!(f, "Unable to unzip dataset for {species}: {}", flat(cause))
            }
            BuildFailure::Construct { species, cause } => {
                write!(f, "Unable to construct branch for {species}: {}", flat(cause))
            }
            BuildFailure::Merge { species, cause } => {
                write!(f, "Unable to merge synonyms for {species}: {}", flat(cause))
            }
            BuildFailure::Filter { species, cause } => {
                write!(f, "Unable to trim branch for {species}: {}", flat(cause))
            }
            BuildFailure::MissingDescriptor { species } => write!(f, "MISSING: {species}"),
            BuildFailure::Filesystem { species, cause } => {
                write!(f, "Unable to prepare build directory for {species}: {}", flat(cause))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reason_is_single_line() {
        let failure = BuildFailure::Construct {
            species: "9606-human".to_string(),
            cause: "exit status 1\nstack trace".to_string(),
        };
        let line = failure.to_string();
        assert!(!line.contains('\n'));
        assert!(line.starts_with("Unable to construct branch for 9606-human"));
        assert_eq!(failure.kind(), "construct");
    }

    #[test]
    fn missing_descriptor_reason() {
        let failure = BuildFailure::MissingDescriptor {
            species: "4932".to_string(),
        };
        assert_eq!(failure.to_string(), "MISSING: 4932");
        assert_eq!(failure.species(), "4932");
    }
}
