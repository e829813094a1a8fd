use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::domain::{ProteinFields, ProteinKey, ProteinRecord, SpeciesId};
use crate::error::TreeError;
use crate::table::{Row, Table, write_csv};

const ACCESSION: &[&str] = &["Accession", "Accession ID"];
const DATABASE: &[&str] = &["Database", "Source Database"];
const SPECIES: &[&str] = &["Species ID", "Taxon ID"];

pub const PROTEIN_HEADER: &[&str] = &[
    "Accession",
    "Database",
    "Name",
    "Title",
    "Species ID",
    "Proteome ID",
    "Proteome Label",
    "Sequence",
];

/// All proteins of one species, in table order.
#[derive(Debug, Clone)]
pub struct SpeciesProteins {
    species: SpeciesId,
    records: Vec<ProteinRecord>,
    index: HashMap<ProteinKey, usize>,
}

impl SpeciesProteins {
    fn new(species: SpeciesId) -> Self {
        Self {
            species,
            records: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn species(&self) -> &SpeciesId {
        &self.species
    }

    pub fn records(&self) -> &[ProteinRecord] {
        &self.records
    }

    pub fn get(&self, key: &ProteinKey) -> Option<&ProteinRecord> {
        self.index.get(key).map(|&idx| &self.records[idx])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Point-in-time protein catalog, grouped by species. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    taken_at: Option<DateTime<Utc>>,
    species: Vec<SpeciesProteins>,
    index: HashMap<SpeciesId, usize>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, TreeError> {
        let table = Table::read(path)?;
        let mut snapshot = Self::from_table(&table)?;
        snapshot.taken_at = fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        Ok(snapshot)
    }

    pub fn from_table(table: &Table) -> Result<Self, TreeError> {
        if table.is_empty() {
            return Ok(Self::empty());
        }
        let accession = table.require_column(ACCESSION)?;
        let database = table.require_column(DATABASE)?;
        let species = table.require_column(SPECIES)?;
        let name = table.column(&["Name"]);
        let title = table.column(&["Title"]);
        let sequence = table.column(&["Sequence"]);
        let proteome_id = table.column(&["Proteome ID"]);
        let proteome_label = table.column(&["Proteome Label"]);
        let optional = |row: &Row, idx: Option<usize>| {
            idx.map(|idx| row.get(idx).to_string()).unwrap_or_default()
        };

        let mut records = Vec::with_capacity(table.rows().len());
        for row in table.rows() {
            let acc = row.get(accession).trim();
            let db = row.get(database).trim();
            let species_id = match row.get(species).parse::<SpeciesId>() {
                Ok(id) if !acc.is_empty() && !db.is_empty() => id,
                _ => {
                    warn!(
                        path = %table.path().display(),
                        line = row.line,
                        "skipping malformed protein row (missing accession, database or species)"
                    );
                    continue;
                }
            };
            records.push(ProteinRecord {
                key: ProteinKey::new(db, acc),
                species: species_id,
                fields: ProteinFields {
                    name: optional(row, name),
                    title: optional(row, title),
                    sequence: optional(row, sequence),
                    proteome_id: optional(row, proteome_id),
                    proteome_label: optional(row, proteome_label),
                },
            });
        }
        Ok(Self::from_records(records))
    }

    /// Groups records by species. A key repeated within one species keeps its
    /// first row.
    pub fn from_records(records: impl IntoIterator<Item = ProteinRecord>) -> Self {
        let mut snapshot = Self::empty();
        for record in records {
            let slot = match snapshot.index.get(&record.species) {
                Some(&idx) => idx,
                None => {
                    snapshot.species.push(SpeciesProteins::new(record.species.clone()));
                    let idx = snapshot.species.len() - 1;
                    snapshot.index.insert(record.species.clone(), idx);
                    idx
                }
            };
            let group = &mut snapshot.species[slot];
            if group.index.contains_key(&record.key) {
                warn!(
                    protein = %record.key,
                    species = %record.species,
                    "duplicate protein in snapshot, keeping first row"
                );
                continue;
            }
            group.index.insert(record.key.clone(), group.records.len());
            group.records.push(record);
        }
        snapshot
    }

    pub fn taken_at(&self) -> Option<DateTime<Utc>> {
        self.taken_at
    }

    pub fn species(&self, id: &SpeciesId) -> Option<&SpeciesProteins> {
        self.index.get(id).map(|&idx| &self.species[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpeciesProteins> {
        self.species.iter()
    }

    pub fn species_count(&self) -> usize {
        self.species.len()
    }

    pub fn protein_count(&self) -> usize {
        self.species.iter().map(SpeciesProteins::len).sum()
    }
}

pub fn protein_row(record: &ProteinRecord) -> Vec<String> {
    vec![
        record.key.accession.clone(),
        record.key.database.clone(),
        record.fields.name.clone(),
        record.fields.title.clone(),
        record.species.to_string(),
        record.fields.proteome_id.clone(),
        record.fields.proteome_label.clone(),
        record.fields.sequence.clone(),
    ]
}

pub fn render_protein_table<'a>(records: impl IntoIterator<Item = &'a ProteinRecord>) -> String {
    let rows = records.into_iter().map(protein_row).collect::<Vec<_>>();
    write_csv(PROTEIN_HEADER, &rows)
}

/// Reads a protein table when one is given; no table means an empty catalog.
pub fn load_optional(path: Option<&Path>) -> Result<Snapshot, TreeError> {
    match path {
        Some(path) => Snapshot::load(path),
        None => Ok(Snapshot::empty()),
    }
}
