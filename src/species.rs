use std::collections::HashMap;
use std::path::Path;

use tracing::warn;

use crate::domain::{SpeciesDescriptor, SpeciesId, is_path_component};
use crate::error::TreeError;
use crate::table::Table;

/// Species descriptors indexed by species id. Loaded once per run.
#[derive(Debug, Clone, Default)]
pub struct DescriptorTable {
    descriptors: Vec<SpeciesDescriptor>,
    by_species: HashMap<SpeciesId, usize>,
}

impl DescriptorTable {
    pub fn load(path: &Path) -> Result<Self, TreeError> {
        let table = Table::read(path)?;
        Self::from_table(&table)
    }

    pub fn from_table(table: &Table) -> Result<Self, TreeError> {
        if table.is_empty() {
            return Err(TreeError::MissingHeader(table.path().to_path_buf()));
        }
        let key = table.require_column(&["Species Key"])?;
        let species = table.require_column(&["Species ID"])?;
        let label = table.require_column(&["Species Label"])?;
        let group = table.require_column(&["Group"])?;
        let proteome = table.require_column(&["Proteome ID"])?;
        let taxa = table.column(&["Active Taxa"]);

        let mut descriptors = Vec::new();
        for row in table.rows() {
            let species_key = row.get(key).trim();
            let group_name = row.get(group).trim();
            let species_id = match row.get(species).parse::<SpeciesId>() {
                Ok(id) if is_path_component(species_key) && is_path_component(group_name) => id,
                _ => {
                    warn!(
                        path = %table.path().display(),
                        line = row.line,
                        "skipping malformed species row"
                    );
                    continue;
                }
            };
            descriptors.push(SpeciesDescriptor {
                species_key: species_key.to_string(),
                species_id,
                species_label: row.get(label).trim().to_string(),
                active_taxa: taxa.map(|idx| row.get(idx).trim().to_string()).unwrap_or_default(),
                group: group_name.to_string(),
                proteome_id: row.get(proteome).trim().to_string(),
            });
        }
        Ok(Self::from_descriptors(descriptors))
    }

    pub fn from_descriptors(descriptors: impl IntoIterator<Item = SpeciesDescriptor>) -> Self {
        let mut table = Self::default();
        for descriptor in descriptors {
            if table.by_species.contains_key(&descriptor.species_id) {
                warn!(
                    species = %descriptor.species_id,
                    key = %descriptor.species_key,
                    "duplicate species descriptor, keeping first row"
                );
                continue;
            }
            table
                .by_species
                .insert(descriptor.species_id.clone(), table.descriptors.len());
            table.descriptors.push(descriptor);
        }
        table
    }

    pub fn get(&self, species: &SpeciesId) -> Option<&SpeciesDescriptor> {
        self.by_species.get(species).map(|&idx| &self.descriptors[idx])
    }

    pub fn by_key(&self, species_key: &str) -> Option<&SpeciesDescriptor> {
        self.descriptors
            .iter()
            .find(|descriptor| descriptor.species_key == species_key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpeciesDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
