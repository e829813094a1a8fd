use std::fs;
use std::path::Path;

use crate::domain::SpeciesDescriptor;
use crate::error::TreeError;

pub const TAXON_ID: &str = "[TAXON_ID]";
pub const TAXON_LABEL: &str = "[TAXON_LABEL]";

/// Construct query with `[TAXON_ID]` and `[TAXON_LABEL]` placeholders.
#[derive(Debug, Clone)]
pub struct QueryTemplate {
    text: String,
}

impl QueryTemplate {
    pub fn load(path: &Path) -> Result<Self, TreeError> {
        let text = fs::read_to_string(path)
            .map_err(|_| TreeError::QueryTemplateRead(path.to_path_buf()))?;
        if !text.contains(TAXON_ID) {
            return Err(TreeError::QueryTemplatePlaceholder(path.to_path_buf()));
        }
        Ok(Self { text })
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn instantiate(&self, descriptor: &SpeciesDescriptor) -> String {
        self.text
            .replace(TAXON_ID, descriptor.species_id.as_str())
            .replace(TAXON_LABEL, &escape_literal(&descriptor.species_label))
    }
}

/// Escapes text for use inside a double-quoted query string literal.
pub fn escape_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(label: &str) -> SpeciesDescriptor {
        SpeciesDescriptor {
            species_key: "11676-hiv".to_string(),
            species_id: "11676".parse().unwrap(),
            species_label: label.to_string(),
            active_taxa: String::new(),
            group: "virus".to_string(),
            proteome_id: "UP000002241".to_string(),
        }
    }

    #[test]
    fn substitutes_both_placeholders() {
        let template = QueryTemplate::from_text(
            "BIND(<http://purl.obolibrary.org/obo/NCBITaxon_[TAXON_ID]> AS ?taxon)\nBIND(\"[TAXON_LABEL] protein\" AS ?label)\n",
        );
        let query = template.instantiate(&descriptor("Human immunodeficiency virus 1"));
        assert!(query.contains("NCBITaxon_11676>"));
        assert!(query.contains("\"Human immunodeficiency virus 1 protein\""));
    }

    #[test]
    fn quotes_in_label_cannot_break_the_literal() {
        let template = QueryTemplate::from_text("\"[TAXON_LABEL]\" [TAXON_ID]");
        let query = template.instantiate(&descriptor("strain \"B\\1\""));
        assert_eq!(query, "\"strain \\\"B\\\\1\\\"\" 11676");
    }

    #[test]
    fn template_without_taxon_placeholder_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("build-branch.rq");
        fs::write(&path, "SELECT * WHERE { ?s ?p ?o }").unwrap();
        assert!(matches!(
            QueryTemplate::load(&path),
            Err(TreeError::QueryTemplatePlaceholder(_))
        ));
    }
}
