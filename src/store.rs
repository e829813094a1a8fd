use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::domain::{ProteinRecord, SpeciesDescriptor, SpeciesId};
use crate::error::TreeError;

pub const RAW_DATASET: &str = "raw-dataset.gz";
pub const DATASET: &str = "dataset.rdf";
pub const QUERY: &str = "build-subtree.rq";
pub const SUBTREE: &str = "subtree.ttl";
pub const SUBTREE_PARTIAL: &str = "subtree.partial.ttl";
pub const ACTIVE_TERMS: &str = "active-terms.txt";
pub const SYNONYMS: &str = "synonyms.ttl";
pub const SYNONYMS_PENDING: &str = "synonyms.pending.ttl";
pub const MANIFEST: &str = "build.json";

/// Files of one species' working directory, `build/<group>/<speciesKey>/`.
#[derive(Debug, Clone)]
pub struct UnitPaths {
    pub dir: Utf8PathBuf,
    pub raw_dataset: Utf8PathBuf,
    pub dataset: Utf8PathBuf,
    pub query: Utf8PathBuf,
    pub subtree: Utf8PathBuf,
    pub subtree_partial: Utf8PathBuf,
    pub active_terms: Utf8PathBuf,
    pub synonyms: Utf8PathBuf,
    pub synonyms_pending: Utf8PathBuf,
    pub manifest: Utf8PathBuf,
}

impl UnitPaths {
    fn new(dir: Utf8PathBuf) -> Self {
        Self {
            raw_dataset: dir.join(RAW_DATASET),
            dataset: dir.join(DATASET),
            query: dir.join(QUERY),
            subtree: dir.join(SUBTREE),
            subtree_partial: dir.join(SUBTREE_PARTIAL),
            active_terms: dir.join(ACTIVE_TERMS),
            synonyms: dir.join(SYNONYMS),
            synonyms_pending: dir.join(SYNONYMS_PENDING),
            manifest: dir.join(MANIFEST),
            dir,
        }
    }

    /// Everything a completed build leaves behind. Removed when the build is
    /// stale.
    pub fn build_artifacts(&self) -> [&Utf8Path; 6] {
        [
            &self.manifest,
            &self.subtree,
            &self.active_terms,
            &self.synonyms,
            &self.raw_dataset,
            &self.subtree_partial,
        ]
    }

    /// Files that depend on the protein list the subtree was filtered for.
    pub fn trim_artifacts(&self) -> [&Utf8Path; 5] {
        [
            &self.subtree,
            &self.subtree_partial,
            &self.active_terms,
            &self.synonyms,
            &self.synonyms_pending,
        ]
    }

    pub fn transients(&self) -> [&Utf8Path; 2] {
        [&self.dataset, &self.query]
    }
}

/// Completion record written when a unit reaches `Done`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub species_id: SpeciesId,
    pub species_key: String,
    pub group: String,
    pub protein_count: usize,
    pub fingerprint: String,
    pub completed_at: String,
    pub tool: String,
}

#[derive(Debug, Clone)]
pub struct BuildLayout {
    root: Utf8PathBuf,
}

impl BuildLayout {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn group_dir(&self, group: &str) -> Utf8PathBuf {
        self.root.join(group)
    }

    pub fn unit_paths(&self, descriptor: &SpeciesDescriptor) -> UnitPaths {
        UnitPaths::new(
            self.group_dir(&descriptor.group)
                .join(&descriptor.species_key),
        )
    }

    pub fn ensure_unit_dir(&self, descriptor: &SpeciesDescriptor) -> Result<UnitPaths, TreeError> {
        let paths = self.unit_paths(descriptor);
        fs::create_dir_all(paths.dir.as_std_path())
            .map_err(|err| TreeError::Filesystem(format!("create {}: {err}", paths.dir)))?;
        Ok(paths)
    }

    /// Species ids whose working directory holds a completion manifest next to
    /// its subtree.
    pub fn completed_species(&self) -> Result<HashSet<SpeciesId>, TreeError> {
        let mut species = HashSet::new();
        if !self.root.as_std_path().exists() {
            return Ok(species);
        }
        for group in read_subdirs(self.root.as_std_path())? {
            for unit in read_subdirs(&group)? {
                let Ok(dir) = Utf8PathBuf::from_path_buf(unit) else {
                    warn!("skipping non-utf8 build directory");
                    continue;
                };
                let paths = UnitPaths::new(dir);
                if !paths.subtree.as_std_path().exists() {
                    continue;
                }
                match Self::read_manifest(&paths.manifest) {
                    Ok(Some(manifest)) => {
                        species.insert(manifest.species_id);
                    }
                    Ok(None) => {}
                    Err(err) => warn!(path = %paths.manifest, error = %err, "unreadable build manifest"),
                }
            }
        }
        Ok(species)
    }

    pub fn read_manifest(path: &Utf8Path) -> Result<Option<BuildManifest>, TreeError> {
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| TreeError::Filesystem(format!("read {path}: {err}")))?;
        let manifest = serde_json::from_str(&content)
            .map_err(|err| TreeError::Filesystem(format!("parse {path}: {err}")))?;
        Ok(Some(manifest))
    }

    pub fn write_manifest(path: &Utf8Path, manifest: &BuildManifest) -> Result<(), TreeError> {
        let content = serde_json::to_vec_pretty(manifest)
            .map_err(|err| TreeError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path.as_std_path(), &content)
    }

    /// Writes through a temp file in the destination directory, so readers see
    /// either the old file or the complete new one.
    pub fn write_bytes_atomic(path: &Path, content: &[u8]) -> Result<(), TreeError> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|err| TreeError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".protein-tree")
            .tempfile_in(parent)
            .map_err(|err| TreeError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| TreeError::Filesystem(err.to_string()))?;
        temp.persist(path)
            .map_err(|err| TreeError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn remove_if_exists(path: &Utf8Path) -> Result<(), TreeError> {
        match fs::remove_file(path.as_std_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(TreeError::Filesystem(format!("remove {path}: {err}"))),
        }
    }

    pub fn file_size(path: &Utf8Path) -> Option<u64> {
        fs::metadata(path.as_std_path()).ok().map(|meta| meta.len())
    }
}

/// Content hash of an active protein list, stored in the manifest to tell a
/// finished build of the same proteins from a stale one.
pub fn fingerprint(proteins: &[ProteinRecord]) -> String {
    let mut hasher = Sha256::new();
    for protein in proteins {
        for part in [
            protein.key.database.as_str(),
            protein.key.accession.as_str(),
            protein.species.as_str(),
            protein.fields.name.as_str(),
            protein.fields.title.as_str(),
            protein.fields.sequence.as_str(),
            protein.fields.proteome_id.as_str(),
            protein.fields.proteome_label.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0x1f]);
        }
        hasher.update([0x1e]);
    }
    format!("{:x}", hasher.finalize())
}

fn read_subdirs(root: &Path) -> Result<Vec<std::path::PathBuf>, TreeError> {
    let mut dirs = Vec::new();
    let entries = fs::read_dir(root).map_err(|err| TreeError::Filesystem(err.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|err| TreeError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}
