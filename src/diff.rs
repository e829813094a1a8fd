use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{ProteinRecord, SpeciesId};
use crate::error::TreeError;
use crate::snapshot::{Snapshot, render_protein_table};
use crate::store::BuildLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivationReason {
    /// Absent from the previous snapshot.
    New,
    /// Present before, but no completed build exists for it.
    NeverBuilt,
    /// At least one protein was added or had its fields changed.
    Changed,
    /// Read back from an active-set table; the reason is not recorded there.
    Listed,
}

#[derive(Debug, Clone)]
pub struct ActiveSpecies {
    pub species: SpeciesId,
    pub reason: ActivationReason,
    pub proteins: Vec<ProteinRecord>,
}

/// Species that must be rebuilt this run, each with its whole current protein
/// list.
#[derive(Debug, Clone, Default)]
pub struct ActiveSet {
    entries: Vec<ActiveSpecies>,
}

impl ActiveSet {
    pub fn load(path: &Path) -> Result<Self, TreeError> {
        Ok(Self::from_snapshot(&Snapshot::load(path)?))
    }

    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let entries = snapshot
            .iter()
            .map(|species| ActiveSpecies {
                species: species.species().clone(),
                reason: ActivationReason::Listed,
                proteins: species.records().to_vec(),
            })
            .collect();
        Self { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveSpecies> {
        self.entries.iter()
    }

    pub fn get(&self, species: &SpeciesId) -> Option<&ActiveSpecies> {
        self.entries.iter().find(|entry| &entry.species == species)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn protein_count(&self) -> usize {
        self.entries.iter().map(|entry| entry.proteins.len()).sum()
    }

    pub fn species_ids(&self) -> Vec<&SpeciesId> {
        self.entries.iter().map(|entry| &entry.species).collect()
    }

    /// Distinct species ids, space separated, in active-set order.
    pub fn render_species_list(&self) -> String {
        let mut seen = HashSet::new();
        let ids = self
            .entries
            .iter()
            .map(|entry| entry.species.as_str())
            .filter(|id| seen.insert(*id))
            .collect::<Vec<_>>();
        format!("{}\n", ids.join(" "))
    }

    pub fn render(&self) -> String {
        render_protein_table(self.entries.iter().flat_map(|entry| entry.proteins.iter()))
    }

    pub fn write(&self, path: &Path) -> Result<(), TreeError> {
        BuildLayout::write_bytes_atomic(path, self.render().as_bytes())
    }
}

/// Computes the species to rebuild. Pure: neither snapshot is modified and no
/// I/O happens here.
pub fn compute_active_set(
    previous: &Snapshot,
    current: &Snapshot,
    built: &HashSet<SpeciesId>,
) -> ActiveSet {
    let mut entries = Vec::new();
    for species in current.iter() {
        let id = species.species();
        let reason = match previous.species(id) {
            None => Some(ActivationReason::New),
            Some(_) if !built.contains(id) => Some(ActivationReason::NeverBuilt),
            Some(last) => species
                .records()
                .iter()
                .any(|record| {
                    last.get(&record.key)
                        .map(|old| !old.same_content(record))
                        .unwrap_or(true)
                })
                .then_some(ActivationReason::Changed),
        };
        match reason {
            Some(reason) => {
                debug!(species = %id, ?reason, proteins = species.len(), "species is active");
                entries.push(ActiveSpecies {
                    species: id.clone(),
                    reason,
                    proteins: species.records().to_vec(),
                });
            }
            None => debug!(species = %id, "species unchanged"),
        }
    }
    let active = ActiveSet { entries };
    info!(
        species = current.species_count(),
        active = active.len(),
        proteins = active.protein_count(),
        "computed active set"
    );
    active
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProteinFields, ProteinKey};

    fn protein(species: &str, accession: &str, name: &str) -> ProteinRecord {
        ProteinRecord {
            key: ProteinKey::new("UniProt", accession),
            species: species.parse().unwrap(),
            fields: ProteinFields {
                name: name.to_string(),
                ..ProteinFields::default()
            },
        }
    }

    fn built(ids: &[&str]) -> HashSet<SpeciesId> {
        ids.iter().map(|id| id.parse().unwrap()).collect()
    }

    #[test]
    fn added_protein_activates_whole_species() {
        let previous = Snapshot::from_records([protein("S1", "P1", "a")]);
        let current = Snapshot::from_records([protein("S1", "P1", "a"), protein("S1", "P2", "b")]);
        let active = compute_active_set(&previous, &current, &built(&["S1"]));
        assert_eq!(active.len(), 1);
        let entry = active.get(&"S1".parse().unwrap()).unwrap();
        assert_eq!(entry.reason, ActivationReason::Changed);
        let accessions = entry
            .proteins
            .iter()
            .map(|p| p.key.accession.as_str())
            .collect::<Vec<_>>();
        assert_eq!(accessions, ["P1", "P2"]);
    }

    #[test]
    fn changed_field_activates_species() {
        let previous = Snapshot::from_records([protein("S1", "P1", "a")]);
        let current = Snapshot::from_records([protein("S1", "P1", "renamed")]);
        let active = compute_active_set(&previous, &current, &built(&["S1"]));
        assert_eq!(
            active.get(&"S1".parse().unwrap()).map(|e| e.reason),
            Some(ActivationReason::Changed)
        );
    }

    #[test]
    fn identical_and_built_species_is_excluded() {
        let previous = Snapshot::from_records([protein("S1", "P1", "a"), protein("S2", "P9", "z")]);
        let current = Snapshot::from_records([protein("S1", "P1", "a"), protein("S2", "P9", "z")]);
        let active = compute_active_set(&previous, &current, &built(&["S1", "S2"]));
        assert!(active.is_empty());
    }

    #[test]
    fn unbuilt_species_is_active_even_when_identical() {
        let previous = Snapshot::from_records([protein("S1", "P1", "a")]);
        let current = Snapshot::from_records([protein("S1", "P1", "a")]);
        let active = compute_active_set(&previous, &current, &built(&[]));
        assert_eq!(
            active.get(&"S1".parse().unwrap()).map(|e| e.reason),
            Some(ActivationReason::NeverBuilt)
        );
    }

    #[test]
    fn new_species_is_active() {
        let previous = Snapshot::empty();
        let current = Snapshot::from_records([protein("S3", "P1", "a")]);
        let active = compute_active_set(&previous, &current, &built(&["S3"]));
        assert_eq!(
            active.get(&"S3".parse().unwrap()).map(|e| e.reason),
            Some(ActivationReason::New)
        );
    }

    #[test]
    fn removed_protein_alone_does_not_activate() {
        let previous = Snapshot::from_records([protein("S1", "P1", "a"), protein("S1", "P2", "b")]);
        let current = Snapshot::from_records([protein("S1", "P1", "a")]);
        let active = compute_active_set(&previous, &current, &built(&["S1"]));
        assert!(active.is_empty());
    }

    #[test]
    fn species_list_is_space_separated() {
        let current = Snapshot::from_records([
            protein("9606", "P1", "a"),
            protein("9606", "P2", "b"),
            protein("10090", "P3", "c"),
        ]);
        let active = compute_active_set(&Snapshot::empty(), &current, &built(&[]));
        assert_eq!(active.render_species_list(), "9606 10090\n");
    }

    #[test]
    fn order_follows_current_snapshot() {
        let current = Snapshot::from_records([
            protein("S9", "P1", "a"),
            protein("S1", "P2", "b"),
            protein("S5", "P3", "c"),
        ]);
        let active = compute_active_set(&Snapshot::empty(), &current, &built(&[]));
        let ids = active
            .species_ids()
            .into_iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, ["S9", "S1", "S5"]);
    }
}
