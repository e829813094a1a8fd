use std::fs;

use camino::Utf8PathBuf;

use protein_tree::domain::SpeciesDescriptor;
use protein_tree::store::{BuildLayout, BuildManifest, fingerprint};

fn descriptor(key: &str, id: &str, group: &str) -> SpeciesDescriptor {
    SpeciesDescriptor {
        species_key: key.to_string(),
        species_id: id.parse().unwrap(),
        species_label: key.to_string(),
        active_taxa: id.to_string(),
        group: group.to_string(),
        proteome_id: format!("UP{id}"),
    }
}

fn finish(layout: &BuildLayout, desc: &SpeciesDescriptor) {
    let paths = layout.ensure_unit_dir(desc).unwrap();
    fs::write(paths.subtree.as_std_path(), "subtree").unwrap();
    let manifest = BuildManifest {
        species_id: desc.species_id.clone(),
        species_key: desc.species_key.clone(),
        group: desc.group.clone(),
        protein_count: 0,
        fingerprint: fingerprint(&[]),
        completed_at: "2026-01-01T00:00:00Z".to_string(),
        tool: "protein-tree/test".to_string(),
    };
    BuildLayout::write_manifest(&paths.manifest, &manifest).unwrap();
}

fn temp_layout() -> (tempfile::TempDir, BuildLayout) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("build")).unwrap();
    (temp, BuildLayout::new(root))
}

#[test]
fn missing_build_root_has_no_completed_species() {
    let (_temp, layout) = temp_layout();
    assert!(layout.completed_species().unwrap().is_empty());
}

#[test]
fn completed_species_spans_groups() {
    let (_temp, layout) = temp_layout();
    let human = descriptor("9606-human", "9606", "vertebrate");
    let hiv = descriptor("11676-hiv", "11676", "virus");
    let yeast = descriptor("4932-yeast", "4932", "other");
    finish(&layout, &human);
    finish(&layout, &hiv);
    layout.ensure_unit_dir(&yeast).unwrap();

    let done = layout.completed_species().unwrap();
    assert_eq!(done.len(), 2);
    assert!(done.contains(&human.species_id));
    assert!(done.contains(&hiv.species_id));
    assert!(!done.contains(&yeast.species_id));
}

#[test]
fn corrupt_manifest_is_not_completion() {
    let (_temp, layout) = temp_layout();
    let human = descriptor("9606-human", "9606", "vertebrate");
    finish(&layout, &human);
    let paths = layout.unit_paths(&human);
    fs::write(paths.manifest.as_std_path(), "{ not json").unwrap();
    assert!(layout.completed_species().unwrap().is_empty());
    assert!(BuildLayout::read_manifest(&paths.manifest).is_err());
}

#[test]
fn atomic_write_replaces_content() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("nested").join("active.tsv");
    BuildLayout::write_bytes_atomic(&path, b"first").unwrap();
    BuildLayout::write_bytes_atomic(&path, b"second").unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "second");

    let leftovers = fs::read_dir(path.parent().unwrap())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name() != "active.tsv")
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn removing_a_missing_file_is_fine() {
    let (_temp, layout) = temp_layout();
    let paths = layout
        .ensure_unit_dir(&descriptor("9606-human", "9606", "vertebrate"))
        .unwrap();
    BuildLayout::remove_if_exists(&paths.raw_dataset).unwrap();

    fs::write(paths.raw_dataset.as_std_path(), b"gz").unwrap();
    assert_eq!(BuildLayout::file_size(&paths.raw_dataset), Some(2));
    BuildLayout::remove_if_exists(&paths.raw_dataset).unwrap();
    assert_eq!(BuildLayout::file_size(&paths.raw_dataset), None);
}
