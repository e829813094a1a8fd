use std::fs;

use assert_matches::assert_matches;

use protein_tree::domain::SpeciesId;
use protein_tree::error::TreeError;
use protein_tree::query::QueryTemplate;
use protein_tree::species::DescriptorTable;

#[test]
fn descriptor_table_loads_from_csv() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("proteomes.csv");
    fs::write(
        &path,
        "species_key,species_id,species_label,group,proteome_id\n11676-hiv,11676,\"Human immunodeficiency virus 1\",virus,UP000002241\n",
    )
    .unwrap();

    let table = DescriptorTable::load(&path).unwrap();
    assert_eq!(table.len(), 1);
    let hiv = table.get(&"11676".parse::<SpeciesId>().unwrap()).unwrap();
    assert_eq!(hiv.group, "virus");
    assert_eq!(hiv.species_label, "Human immunodeficiency virus 1");
    assert_eq!(hiv.active_taxa, "");
}

#[test]
fn descriptor_table_needs_proteome_column() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("proteomes.tsv");
    fs::write(&path, "Species Key\tSpecies ID\tSpecies Label\tGroup\n9606-human\t9606\tHomo sapiens\tvertebrate\n").unwrap();
    assert_matches!(
        DescriptorTable::load(&path),
        Err(TreeError::MissingColumn { column, .. }) if column == "Proteome ID"
    );
}

#[test]
fn missing_descriptor_file_is_a_read_error() {
    let temp = tempfile::tempdir().unwrap();
    assert_matches!(
        DescriptorTable::load(&temp.path().join("absent.tsv")),
        Err(TreeError::TableRead { .. })
    );
}

#[test]
fn query_template_requires_taxon_placeholder() {
    let temp = tempfile::tempdir().unwrap();
    let good = temp.path().join("subtree.rq");
    let bad = temp.path().join("broken.rq");
    fs::write(&good, "CONSTRUCT { ?s ?p ?o } WHERE { ?s <in-taxon> <[TAXON_ID]> }").unwrap();
    fs::write(&bad, "CONSTRUCT { ?s ?p ?o } WHERE { ?s ?p ?o }").unwrap();

    assert!(QueryTemplate::load(&good).is_ok());
    assert_matches!(
        QueryTemplate::load(&bad),
        Err(TreeError::QueryTemplatePlaceholder(_))
    );
    assert_matches!(
        QueryTemplate::load(&temp.path().join("absent.rq")),
        Err(TreeError::QueryTemplateRead(_))
    );
}
