use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use protein_tree::diff::{ActivationReason, ActiveSet, compute_active_set};
use protein_tree::domain::{ProteinKey, SpeciesDescriptor};
use protein_tree::error::TreeError;
use protein_tree::snapshot::{Snapshot, load_optional};
use protein_tree::store::{BuildLayout, BuildManifest, fingerprint};

const HEADER: &str = "Accession\tDatabase\tName\tTitle\tSpecies ID\tProteome ID\tProteome Label\tSequence\n";

fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn mark_built(layout: &BuildLayout, species_id: &str, key: &str) {
    let descriptor = SpeciesDescriptor {
        species_key: key.to_string(),
        species_id: species_id.parse().unwrap(),
        species_label: key.to_string(),
        active_taxa: String::new(),
        group: "other".to_string(),
        proteome_id: String::new(),
    };
    let paths = layout.ensure_unit_dir(&descriptor).unwrap();
    fs::write(paths.subtree.as_std_path(), "").unwrap();
    BuildLayout::write_manifest(
        &paths.manifest,
        &BuildManifest {
            species_id: descriptor.species_id.clone(),
            species_key: key.to_string(),
            group: descriptor.group.clone(),
            protein_count: 1,
            fingerprint: fingerprint(&[]),
            completed_at: "2026-01-01T00:00:00Z".to_string(),
            tool: "protein-tree/test".to_string(),
        },
    )
    .unwrap();
}

#[test]
fn added_protein_rebuilds_whole_species() {
    let temp = tempfile::tempdir().unwrap();
    let previous = write(
        &temp,
        "previous.tsv",
        &format!("{HEADER}P1\tUniProt\tHb\t\tS1\tUP1\tS one\tMVL\n"),
    );
    let current = write(
        &temp,
        "current.tsv",
        &format!(
            "{HEADER}P1\tUniProt\tHb\t\tS1\tUP1\tS one\tMVL\nP2\tUniProt\tMb\t\tS1\tUP1\tS one\tMGL\n"
        ),
    );
    let layout = BuildLayout::new(Utf8PathBuf::from_path_buf(temp.path().join("build")).unwrap());
    mark_built(&layout, "S1", "s1");

    let active = compute_active_set(
        &load_optional(Some(&previous)).unwrap(),
        &Snapshot::load(&current).unwrap(),
        &layout.completed_species().unwrap(),
    );
    assert_eq!(active.len(), 1);
    let entry = active.get(&"S1".parse().unwrap()).unwrap();
    assert_eq!(entry.reason, ActivationReason::Changed);
    let keys = entry.proteins.iter().map(|p| p.key.clone()).collect::<Vec<_>>();
    assert_eq!(
        keys,
        [ProteinKey::new("UniProt", "P1"), ProteinKey::new("UniProt", "P2")]
    );
}

#[test]
fn built_and_unchanged_species_are_skipped() {
    let temp = tempfile::tempdir().unwrap();
    let rows = format!(
        "{HEADER}P1\tUniProt\tHb\t\tS1\tUP1\tS one\tMVL\nQ1\tGenPept\tgp\t\tS2\tUP2\tS two\tMK\n"
    );
    let previous = write(&temp, "previous.tsv", &rows);
    let current = write(&temp, "current.tsv", &rows);
    let layout = BuildLayout::new(Utf8PathBuf::from_path_buf(temp.path().join("build")).unwrap());
    mark_built(&layout, "S1", "s1");

    let active = compute_active_set(
        &Snapshot::load(&previous).unwrap(),
        &Snapshot::load(&current).unwrap(),
        &layout.completed_species().unwrap(),
    );
    let ids = active
        .species_ids()
        .into_iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>();
    assert_eq!(ids, ["S2"]);
    assert_eq!(
        active.get(&"S2".parse().unwrap()).map(|e| e.reason),
        Some(ActivationReason::NeverBuilt)
    );
}

#[test]
fn malformed_rows_are_skipped() {
    let temp = tempfile::tempdir().unwrap();
    let current = write(
        &temp,
        "current.csv",
        "Accession,Database,Species ID\n,UniProt,S1\nP1,,S1\nP2,UniProt,\nP3,UniProt,S1\n",
    );
    let snapshot = Snapshot::load(&current).unwrap();
    assert_eq!(snapshot.protein_count(), 1);
    assert!(snapshot.taken_at().is_some());
}

#[test]
fn missing_key_column_is_fatal() {
    let temp = tempfile::tempdir().unwrap();
    let current = write(&temp, "current.csv", "Accession,Species ID\nP1,S1\n");
    assert_matches!(
        Snapshot::load(&current),
        Err(TreeError::MissingColumn { column, .. }) if column == "Database"
    );
}

#[test]
fn unknown_extension_is_fatal() {
    let temp = tempfile::tempdir().unwrap();
    let current = write(&temp, "current.xlsx", "");
    assert_matches!(
        Snapshot::load(&current),
        Err(TreeError::UnknownTableFormat(_))
    );
}

#[test]
fn active_set_table_round_trips_through_disk() {
    let temp = tempfile::tempdir().unwrap();
    let current = write(
        &temp,
        "current.tsv",
        &format!(
            "{HEADER}P1\tUniProt\tHb, \"alpha\"\t\tS1\tUP1\tS one\tMVL\nQ1\tGenPept\tgp\t\tS2\tUP2\tS two\tMK\n"
        ),
    );
    let active = compute_active_set(
        &Snapshot::empty(),
        &Snapshot::load(&current).unwrap(),
        &Default::default(),
    );
    let output = temp.path().join("active.csv");
    active.write(&output).unwrap();

    let reloaded = ActiveSet::load(&output).unwrap();
    assert_eq!(reloaded.len(), 2);
    let s1 = reloaded.get(&"S1".parse().unwrap()).unwrap();
    assert_eq!(s1.reason, ActivationReason::Listed);
    assert_eq!(s1.proteins[0].fields.name, "Hb, \"alpha\"");
    assert_eq!(s1.proteins[0].fields.sequence, "MVL");
    assert_eq!(reloaded.render_species_list(), "S1 S2\n");
}
