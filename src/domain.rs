use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpeciesId(String);

impl SpeciesId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpeciesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SpeciesId {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("empty species id".to_string());
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Identity of a protein row: the source database plus its accession.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProteinKey {
    pub database: String,
    pub accession: String,
}

impl ProteinKey {
    pub fn new(database: impl Into<String>, accession: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            accession: accession.into(),
        }
    }

    /// Term used in filter term files, e.g. `UniProt:P69905`.
    pub fn curie(&self) -> String {
        format!("{}:{}", self.database, self.accession)
    }
}

impl fmt::Display for ProteinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.database, self.accession)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProteinFields {
    pub name: String,
    pub title: String,
    pub sequence: String,
    pub proteome_id: String,
    pub proteome_label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProteinRecord {
    pub key: ProteinKey,
    pub species: SpeciesId,
    pub fields: ProteinFields,
}

impl ProteinRecord {
    /// Diff equality: every descriptive field, never the identifying key.
    pub fn same_content(&self, other: &ProteinRecord) -> bool {
        self.fields == other.fields
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpeciesDescriptor {
    pub species_key: String,
    pub species_id: SpeciesId,
    pub species_label: String,
    pub active_taxa: String,
    pub group: String,
    pub proteome_id: String,
}

/// Keys and groups become directory names under the build root.
pub fn is_path_component(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn species_id_is_trimmed() {
        let id: SpeciesId = " 9606 ".parse().unwrap();
        assert_eq!(id.as_str(), "9606");
    }

    #[test]
    fn species_id_rejects_empty() {
        assert!("  ".parse::<SpeciesId>().is_err());
    }

    #[test]
    fn protein_key_curie() {
        let key = ProteinKey::new("UniProt", "P69905");
        assert_eq!(key.curie(), "UniProt:P69905");
        assert_eq!(key.to_string(), "UniProt:P69905");
    }

    #[test]
    fn content_equality_ignores_key() {
        let base = ProteinRecord {
            key: ProteinKey::new("UniProt", "P1"),
            species: "9606".parse().unwrap(),
            fields: ProteinFields {
                name: "Hemoglobin".to_string(),
                ..ProteinFields::default()
            },
        };
        let mut other = base.clone();
        other.key = ProteinKey::new("GenPept", "GP2");
        assert!(base.same_content(&other));
        other.fields.sequence = "MVL".to_string();
        assert!(!base.same_content(&other));
    }

    #[test]
    fn path_components() {
        assert!(is_path_component("9606-human"));
        assert!(!is_path_component(".."));
        assert!(!is_path_component("a/b"));
        assert!(!is_path_component(""));
    }
}
