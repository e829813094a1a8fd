//! Protein synonyms from the source-parents table, rendered as a small Turtle
//! document that the engine merges into a species subtree.
//!
//! Parents whose IRI names an "other" node (proteins without a database
//! parent) get their sources attached as child classes instead of synonyms.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use tracing::warn;

use crate::domain::SpeciesDescriptor;
use crate::error::TreeError;
use crate::query::escape_literal;
use crate::species::DescriptorTable;
use crate::table::Table;

const IEDB: &str = "http://iedb.org/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynonymEntry {
    Synonym {
        parent_iri: String,
        name: String,
    },
    OtherChild {
        other_iri: String,
        source_id: String,
        name: String,
        database: String,
        accession: String,
    },
}

#[derive(Debug, Clone, Default)]
pub struct SynonymTable {
    by_species: HashMap<String, Vec<SynonymEntry>>,
}

impl SynonymTable {
    pub fn load(path: &Path, descriptors: &DescriptorTable) -> Result<Self, TreeError> {
        let table = Table::read(path)?;
        Self::from_table(&table, descriptors)
    }

    pub fn from_table(table: &Table, descriptors: &DescriptorTable) -> Result<Self, TreeError> {
        if table.is_empty() {
            return Ok(Self::default());
        }
        let species = table.require_column(&["Species Key", "Proteome Label"])?;
        let parent = table.require_column(&["Parent IRI"])?;
        let name = table.require_column(&["Name"])?;
        let source_id = table.column(&["Source ID"]);
        let database = table.column(&["Database"]);
        let accession = table.column(&["Accession"]);
        let cell = |row: &crate::table::Row, idx: Option<usize>| {
            idx.map(|idx| row.get(idx).trim().to_string())
                .unwrap_or_default()
        };

        let mut synonyms = Self::default();
        for row in table.rows() {
            let parent_iri = row.get(parent).trim().replace("https", "http");
            let label = row.get(name).trim().to_string();
            if parent_iri.is_empty() || label.is_empty() {
                warn!(line = row.line, "skipping synonym row without parent or name");
                continue;
            }
            if parent_iri.contains("other") {
                let Some(descriptor) = other_node_species(&parent_iri)
                    .and_then(|taxon| taxon.parse().ok())
                    .and_then(|taxon| descriptors.get(&taxon))
                else {
                    continue;
                };
                synonyms
                    .by_species
                    .entry(descriptor.species_key.clone())
                    .or_default()
                    .push(SynonymEntry::OtherChild {
                        other_iri: parent_iri,
                        source_id: cell(row, source_id),
                        name: label,
                        database: cell(row, database),
                        accession: cell(row, accession),
                    });
            } else {
                let key = row.get(species).trim().to_string();
                if key.is_empty() {
                    warn!(line = row.line, "skipping synonym row without species");
                    continue;
                }
                synonyms
                    .by_species
                    .entry(key)
                    .or_default()
                    .push(SynonymEntry::Synonym {
                        parent_iri,
                        name: label,
                    });
            }
        }
        Ok(synonyms)
    }

    pub fn for_species(&self, species_key: &str) -> &[SynonymEntry] {
        self.by_species
            .get(species_key)
            .map(|entries| entries.as_slice())
            .unwrap_or(&[])
    }
}

/// `http://iedb.org/taxon-protein/9606-other` → `9606`.
fn other_node_species(iri: &str) -> Option<&str> {
    let segment = iri.trim_end_matches('/').rsplit('/').next()?;
    let taxon = segment.split('-').next()?;
    (!taxon.is_empty()).then_some(taxon)
}

fn accession_iri(database: &str, accession: &str) -> Option<String> {
    match database {
        "GenPept" => Some(format!("https://www.ncbi.nlm.nih.gov/protein/{accession}")),
        "UniProt" => Some(format!("https://www.uniprot.org/uniprot/{accession}")),
        _ => None,
    }
}

fn literal(value: &str) -> String {
    format!("\"{}\"^^xsd:string", escape_literal(value))
}

pub fn render_turtle(descriptor: &SpeciesDescriptor, entries: &[SynonymEntry]) -> String {
    let mut out = String::new();
    out.push_str("@prefix iedb: <http://iedb.org/> .\n");
    out.push_str("@prefix owl: <http://www.w3.org/2002/07/owl#> .\n");
    out.push_str("@prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .\n");
    out.push_str("@prefix xsd: <http://www.w3.org/2001/XMLSchema#> .\n");

    let mut parents: Vec<(&str, Vec<&str>)> = Vec::new();
    let mut others: Vec<(&str, Vec<&SynonymEntry>)> = Vec::new();
    for entry in entries {
        match entry {
            SynonymEntry::Synonym { parent_iri, name } => {
                match parents.iter_mut().find(|(iri, _)| iri == parent_iri) {
                    Some((_, names)) => names.push(name),
                    None => parents.push((parent_iri, vec![name])),
                }
            }
            SynonymEntry::OtherChild { other_iri, .. } => {
                match others.iter_mut().find(|(iri, _)| iri == other_iri) {
                    Some((_, children)) => children.push(entry),
                    None => others.push((other_iri, vec![entry])),
                }
            }
        }
    }

    for (parent, names) in parents {
        let values = names.iter().map(|name| literal(name)).collect::<Vec<_>>();
        let _ = write!(
            out,
            "\n<{parent}> a owl:Class ;\n    iedb:protein-synonym {} .\n",
            values.join(" , ")
        );
    }

    for (other, children) in others {
        let _ = write!(
            out,
            "\n<{other}> a owl:Class ;\n    rdfs:subClassOf <{IEDB}taxon-protein/{}> ;\n    rdfs:label {} .\n",
            descriptor.species_id,
            literal(&format!("Other {} protein", descriptor.species_label)),
        );
        for child in children {
            let SynonymEntry::OtherChild {
                source_id,
                name,
                database,
                accession,
                ..
            } = child
            else {
                continue;
            };
            let Some(accession_iri) = accession_iri(database, accession) else {
                warn!(%name, %database, "unknown source database, skipping synonym child");
                continue;
            };
            let _ = write!(
                out,
                "\n<{IEDB}source/{source_id}> a owl:Class ;\n    rdfs:subClassOf <{other}> ;\n    rdfs:label {} ;\n    iedb:has-accession {} ;\n    iedb:has-accession-iri <{accession_iri}> ;\n    iedb:has-source-database {} ;\n    iedb:has-source-id {} .\n",
                literal(name),
                literal(accession),
                literal(database),
                literal(source_id),
            );
        }
    }
    out
}
