//! Per-species build state machine.
//!
//! Each active species becomes a [`BuildUnit`] that walks
//! `Pending → Fetched → Constructed → Trimmed → Done`. Every step first checks
//! whether its artifact is already on disk and reports
//! [`StepOutcome::AlreadySatisfied`] instead of redoing the work, so an
//! interrupted run can simply be started again. A failing unit ends in
//! `Failed` and the batch moves on to the next species.

use std::fs;
use std::path::Path;

use camino::Utf8Path;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{Config, HostRewrite};
use crate::diff::ActiveSet;
use crate::domain::{ProteinRecord, SpeciesDescriptor};
use crate::engine::{EngineFailure, EngineOperation, ReasoningEngine, RetryPolicy};
use crate::error::{BuildFailure, TreeError};
use crate::fs_util::{gunzip_file, rewrite_hosts};
use crate::query::QueryTemplate;
use crate::species::DescriptorTable;
use crate::store::{BuildLayout, BuildManifest, UnitPaths, fingerprint};
use crate::synonyms::{SynonymTable, render_turtle};
use crate::uniprot::DatasetSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitState {
    Pending,
    Fetched,
    Constructed,
    Trimmed,
    Done,
    Failed,
}

impl UnitState {
    pub fn is_terminal(self) -> bool {
        matches!(self, UnitState::Done | UnitState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepOutcome {
    /// The step's artifact already existed; nothing was run.
    AlreadySatisfied,
    Executed,
    /// The step does not apply to this unit (synonym merge without synonyms).
    NotApplicable,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub species: String,
    pub completed: usize,
    pub total: usize,
}

impl ProgressEvent {
    pub fn percent(&self) -> usize {
        if self.total == 0 {
            100
        } else {
            self.completed * 100 / self.total
        }
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.completed)
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);

    fn finish(&self) {}
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub host_rewrites: Vec<HostRewrite>,
    pub retry: RetryPolicy,
    pub merge_synonyms: bool,
}

impl BuildOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            host_rewrites: config.host_rewrites.clone(),
            retry: RetryPolicy::default(),
            merge_synonyms: config.merge_synonyms,
        }
    }
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step: &'static str,
    pub outcome: StepOutcome,
}

/// One species for one run. Only the files under `paths.dir` persist.
#[derive(Debug)]
pub struct BuildUnit<'a> {
    descriptor: &'a SpeciesDescriptor,
    proteins: &'a [ProteinRecord],
    paths: UnitPaths,
    state: UnitState,
    fingerprint: String,
    steps: Vec<StepRecord>,
}

impl<'a> BuildUnit<'a> {
    pub fn new(
        layout: &BuildLayout,
        descriptor: &'a SpeciesDescriptor,
        proteins: &'a [ProteinRecord],
    ) -> Self {
        Self {
            descriptor,
            proteins,
            paths: layout.unit_paths(descriptor),
            state: UnitState::Pending,
            fingerprint: fingerprint(proteins),
            steps: Vec::new(),
        }
    }

    pub fn descriptor(&self) -> &SpeciesDescriptor {
        self.descriptor
    }

    pub fn paths(&self) -> &UnitPaths {
        &self.paths
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    fn key(&self) -> String {
        self.descriptor.species_key.clone()
    }

    /// Filter term file content: one CURIE per active protein.
    fn term_list(&self) -> String {
        let mut terms = String::new();
        for protein in self.proteins {
            terms.push_str(&protein.key.curie());
            terms.push('\n');
        }
        terms
    }

    fn record(&mut self, step: &'static str, outcome: StepOutcome) {
        match outcome {
            StepOutcome::Executed => info!(species = %self.descriptor.species_key, step, "step executed"),
            StepOutcome::AlreadySatisfied => {
                debug!(species = %self.descriptor.species_key, step, "step already satisfied")
            }
            StepOutcome::NotApplicable => {}
        }
        self.steps.push(StepRecord { step, outcome });
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub species_id: String,
    pub species_key: Option<String>,
    pub state: UnitState,
    pub steps: Vec<StepRecord>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    pub units: Vec<UnitReport>,
    pub failures: Vec<BuildFailure>,
}

impl BuildReport {
    /// One failure reason per line. With no failures a log left by an earlier
    /// run is removed and nothing is written; returns whether a log was written.
    pub fn write_error_log(&self, path: &Path) -> Result<bool, TreeError> {
        if self.failures.is_empty() {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(TreeError::Filesystem(err.to_string())),
            }
            return Ok(false);
        }
        let mut content = String::new();
        for failure in &self.failures {
            content.push_str(&failure.to_string());
            content.push('\n');
        }
        BuildLayout::write_bytes_atomic(path, content.as_bytes())?;
        Ok(true)
    }
}

/// Run-wide state handed through the batch: failure list and progress counters.
struct BuildContext<'s> {
    sink: &'s dyn ProgressSink,
    completed: usize,
    report: BuildReport,
}

impl<'s> BuildContext<'s> {
    fn new(sink: &'s dyn ProgressSink, total: usize) -> Self {
        Self {
            sink,
            completed: 0,
            report: BuildReport {
                total,
                ..BuildReport::default()
            },
        }
    }

    fn starting(&self, species: &str) {
        self.sink.event(ProgressEvent {
            species: species.to_string(),
            completed: self.completed,
            total: self.report.total,
        });
    }

    fn finished(&mut self, unit: UnitReport, failure: Option<BuildFailure>) {
        self.completed += 1;
        match unit.state {
            UnitState::Done => self.report.done += 1,
            UnitState::Failed => self.report.failed += 1,
            _ => {}
        }
        if let Some(failure) = failure {
            warn!(species = failure.species(), kind = failure.kind(), "{failure}");
            self.report.failures.push(failure);
        }
        self.report.units.push(unit);
    }

    fn into_report(self) -> BuildReport {
        self.sink.event(ProgressEvent {
            species: String::new(),
            completed: self.completed,
            total: self.report.total,
        });
        self.sink.finish();
        self.report
    }
}

pub struct Orchestrator<S: DatasetSource, E: ReasoningEngine> {
    layout: BuildLayout,
    source: S,
    engine: E,
    template: QueryTemplate,
    options: BuildOptions,
    synonyms: Option<SynonymTable>,
}

impl<S: DatasetSource, E: ReasoningEngine> Orchestrator<S, E> {
    pub fn new(
        layout: BuildLayout,
        source: S,
        engine: E,
        template: QueryTemplate,
        options: BuildOptions,
    ) -> Self {
        Self {
            layout,
            source,
            engine,
            template,
            options,
            synonyms: None,
        }
    }

    pub fn with_synonyms(mut self, synonyms: SynonymTable) -> Self {
        self.synonyms = Some(synonyms);
        self
    }

    pub fn layout(&self) -> &BuildLayout {
        &self.layout
    }

    /// Builds every active species in order. Unit failures are collected in
    /// the report and never stop the batch.
    pub fn run(
        &self,
        active: &ActiveSet,
        descriptors: &DescriptorTable,
        sink: &dyn ProgressSink,
    ) -> BuildReport {
        let mut ctx = BuildContext::new(sink, active.len());
        for entry in active.iter() {
            let Some(descriptor) = descriptors.get(&entry.species) else {
                ctx.starting(entry.species.as_str());
                ctx.finished(
                    UnitReport {
                        species_id: entry.species.to_string(),
                        species_key: None,
                        state: UnitState::Failed,
                        steps: Vec::new(),
                    },
                    Some(BuildFailure::MissingDescriptor {
                        species: entry.species.to_string(),
                    }),
                );
                continue;
            };
            ctx.starting(&descriptor.species_key);
            let mut unit = BuildUnit::new(&self.layout, descriptor, &entry.proteins);
            let failure = self.build(&mut unit).err();
            ctx.finished(
                UnitReport {
                    species_id: descriptor.species_id.to_string(),
                    species_key: Some(descriptor.species_key.clone()),
                    state: unit.state,
                    steps: unit.steps,
                },
                failure,
            );
        }
        let report = ctx.into_report();
        info!(
            total = report.total,
            done = report.done,
            failed = report.failed,
            "build finished"
        );
        report
    }

    /// Drives one unit to a terminal state.
    pub fn build(&self, unit: &mut BuildUnit<'_>) -> Result<(), BuildFailure> {
        self.open(unit)?;
        while !unit.state.is_terminal() {
            self.advance(unit)?;
        }
        Ok(())
    }

    /// Creates the unit directory and settles the starting state from the
    /// completion manifest: a matching fingerprint means `Done`, a different
    /// one means the earlier build is stale and its artifacts are removed.
    /// Without a manifest, a subtree already filtered for another protein list
    /// is discarded so construct runs again.
    pub fn open(&self, unit: &mut BuildUnit<'_>) -> Result<(), BuildFailure> {
        let species = unit.key();
        let filesystem = |cause: TreeError| BuildFailure::Filesystem {
            species: species.clone(),
            cause: cause.to_string(),
        };
        self.layout
            .ensure_unit_dir(unit.descriptor)
            .map_err(filesystem)?;
        let stale = match BuildLayout::read_manifest(&unit.paths.manifest) {
            Ok(Some(manifest))
                if manifest.fingerprint == unit.fingerprint && exists(&unit.paths.subtree) =>
            {
                debug!(species = %species, "build is current");
                unit.state = UnitState::Done;
                return Ok(());
            }
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(err) => {
                warn!(species = %species, error = %err, "discarding unreadable build manifest");
                true
            }
        };
        if stale {
            info!(species = %species, "previous build is stale, rebuilding");
            for artifact in unit.paths.build_artifacts() {
                BuildLayout::remove_if_exists(artifact).map_err(filesystem)?;
            }
        } else if exists(&unit.paths.subtree) {
            let filtered_for = fs::read_to_string(unit.paths.active_terms.as_std_path()).ok();
            if filtered_for.is_some_and(|terms| terms != unit.term_list()) {
                info!(species = %species, "subtree was trimmed for other proteins, constructing again");
                for artifact in unit.paths.trim_artifacts() {
                    BuildLayout::remove_if_exists(artifact).map_err(filesystem)?;
                }
            }
        }
        unit.state = UnitState::Pending;
        Ok(())
    }

    /// Runs the step leaving the unit's current state. Terminal units are left
    /// alone.
    pub fn advance(&self, unit: &mut BuildUnit<'_>) -> Result<StepOutcome, BuildFailure> {
        let result = match unit.state {
            UnitState::Pending => self.fetch(unit).map(|outcome| (outcome, UnitState::Fetched)),
            UnitState::Fetched => self
                .construct(unit)
                .map(|outcome| (outcome, UnitState::Constructed)),
            UnitState::Constructed => self
                .merge_synonyms(unit)
                .and_then(|_| self.trim(unit))
                .map(|outcome| (outcome, UnitState::Trimmed)),
            UnitState::Trimmed => self.complete(unit).map(|outcome| (outcome, UnitState::Done)),
            UnitState::Done | UnitState::Failed => return Ok(StepOutcome::NotApplicable),
        };
        match result {
            Ok((outcome, next)) => {
                unit.state = next;
                Ok(outcome)
            }
            Err(failure) => {
                unit.state = UnitState::Failed;
                Err(failure)
            }
        }
    }

    pub fn fetch(&self, unit: &mut BuildUnit<'_>) -> Result<StepOutcome, BuildFailure> {
        if BuildLayout::file_size(&unit.paths.raw_dataset).is_some_and(|size| size > 0) {
            unit.record("fetch", StepOutcome::AlreadySatisfied);
            return Ok(StepOutcome::AlreadySatisfied);
        }
        let species = unit.key();
        let fetch_failure = |cause: String| BuildFailure::Fetch {
            species: species.clone(),
            cause,
        };
        let temp = tempfile::Builder::new()
            .prefix(".protein-tree")
            .tempfile_in(unit.paths.dir.as_std_path())
            .map_err(|err| fetch_failure(err.to_string()))?;
        let size = self
            .source
            .fetch(unit.descriptor, temp.path())
            .map_err(|err| fetch_failure(err.to_string()))?;
        if size == 0 {
            return Err(fetch_failure(
                TreeError::EmptyDownload(unit.descriptor.proteome_id.clone()).to_string(),
            ));
        }
        temp.persist(unit.paths.raw_dataset.as_std_path())
            .map_err(|err| fetch_failure(err.to_string()))?;
        unit.record("fetch", StepOutcome::Executed);
        Ok(StepOutcome::Executed)
    }

    pub fn construct(&self, unit: &mut BuildUnit<'_>) -> Result<StepOutcome, BuildFailure> {
        if exists(&unit.paths.subtree) {
            unit.record("construct", StepOutcome::AlreadySatisfied);
            return Ok(StepOutcome::AlreadySatisfied);
        }
        let result = self.construct_subtree(unit);
        for transient in unit.paths.transients() {
            if let Err(err) = BuildLayout::remove_if_exists(transient) {
                warn!(path = %transient, error = %err, "could not remove intermediate file");
            }
        }
        result?;
        unit.record("construct", StepOutcome::Executed);
        Ok(StepOutcome::Executed)
    }

    fn construct_subtree(&self, unit: &BuildUnit<'_>) -> Result<(), BuildFailure> {
        let paths = &unit.paths;
        let decompressed = match gunzip_file(
            paths.raw_dataset.as_std_path(),
            paths.dataset.as_std_path(),
        ) {
            Ok(size) => size,
            Err(err) => {
                // A corrupt archive is fetched again on the next run.
                let _ = BuildLayout::remove_if_exists(&paths.raw_dataset);
                return Err(BuildFailure::Decompress {
                    species: unit.key(),
                    cause: err.to_string(),
                });
            }
        };
        if decompressed == 0 {
            let _ = BuildLayout::remove_if_exists(&paths.raw_dataset);
            return Err(BuildFailure::Fetch {
                species: unit.key(),
                cause: TreeError::EmptyDownload(unit.descriptor.proteome_id.clone()).to_string(),
            });
        }

        let species = unit.key();
        let construct_failure = |cause: String| BuildFailure::Construct {
            species: species.clone(),
            cause,
        };
        let query = self.template.instantiate(unit.descriptor);
        BuildLayout::write_bytes_atomic(paths.query.as_std_path(), query.as_bytes())
            .map_err(|err| construct_failure(err.to_string()))?;

        let operation = EngineOperation::Construct {
            dataset: paths.dataset.clone(),
            query: paths.query.clone(),
            output: paths.subtree_partial.clone(),
        };
        self.run_engine(&operation, &paths.subtree_partial)
            .map_err(|failure| construct_failure(failure.to_string()))?;

        // Host normalisation doubles as the move from the partial file to the
        // final subtree.
        let changed = rewrite_hosts(
            paths.subtree_partial.as_std_path(),
            paths.subtree.as_std_path(),
            &self.options.host_rewrites,
        )
        .map_err(|err| construct_failure(err.to_string()))?;
        debug!(species = %unit.descriptor.species_key, changed, "normalised host names");
        let _ = BuildLayout::remove_if_exists(&paths.subtree_partial);
        Ok(())
    }

    /// Merges the species' synonym triples into its subtree. Runs between
    /// construct and trim; `synonyms.ttl` marks it as done.
    pub fn merge_synonyms(&self, unit: &mut BuildUnit<'_>) -> Result<StepOutcome, BuildFailure> {
        let entries = match &self.synonyms {
            Some(table) if self.options.merge_synonyms => {
                table.for_species(&unit.descriptor.species_key)
            }
            _ => &[],
        };
        if entries.is_empty() {
            unit.record("merge", StepOutcome::NotApplicable);
            return Ok(StepOutcome::NotApplicable);
        }
        if exists(&unit.paths.synonyms) {
            unit.record("merge", StepOutcome::AlreadySatisfied);
            return Ok(StepOutcome::AlreadySatisfied);
        }
        let species = unit.key();
        let merge_failure = |cause: String| BuildFailure::Merge {
            species: species.clone(),
            cause,
        };
        let paths = &unit.paths;
        let turtle = render_turtle(unit.descriptor, entries);
        BuildLayout::write_bytes_atomic(paths.synonyms_pending.as_std_path(), turtle.as_bytes())
            .map_err(|err| merge_failure(err.to_string()))?;
        let operation = EngineOperation::Merge {
            base: paths.subtree.clone(),
            addition: paths.synonyms_pending.clone(),
            output: paths.subtree_partial.clone(),
        };
        if let Err(failure) = self.run_engine(&operation, &paths.subtree_partial) {
            let _ = BuildLayout::remove_if_exists(&paths.synonyms_pending);
            return Err(merge_failure(failure.to_string()));
        }
        promote(&paths.subtree_partial, &paths.subtree)
            .map_err(|err| merge_failure(err.to_string()))?;
        promote(&paths.synonyms_pending, &paths.synonyms)
            .map_err(|err| merge_failure(err.to_string()))?;
        unit.record("merge", StepOutcome::Executed);
        Ok(StepOutcome::Executed)
    }

    /// Filters the subtree down to the unit's active proteins plus their
    /// ancestors, descendants and annotations.
    pub fn trim(&self, unit: &mut BuildUnit<'_>) -> Result<StepOutcome, BuildFailure> {
        if exists(&unit.paths.manifest) {
            unit.record("trim", StepOutcome::AlreadySatisfied);
            return Ok(StepOutcome::AlreadySatisfied);
        }
        let species = unit.key();
        let filter_failure = |cause: String| BuildFailure::Filter {
            species: species.clone(),
            cause,
        };
        let paths = &unit.paths;
        let terms = unit.term_list();
        BuildLayout::write_bytes_atomic(paths.active_terms.as_std_path(), terms.as_bytes())
            .map_err(|err| filter_failure(err.to_string()))?;
        let operation = EngineOperation::Filter {
            input: paths.subtree.clone(),
            term_file: paths.active_terms.clone(),
            output: paths.subtree_partial.clone(),
        };
        self.run_engine(&operation, &paths.subtree_partial)
            .map_err(|failure| filter_failure(failure.to_string()))?;
        promote(&paths.subtree_partial, &paths.subtree)
            .map_err(|err| filter_failure(err.to_string()))?;
        unit.record("trim", StepOutcome::Executed);
        Ok(StepOutcome::Executed)
    }

    /// Writes the completion manifest. Requires the trimmed subtree.
    pub fn complete(&self, unit: &mut BuildUnit<'_>) -> Result<StepOutcome, BuildFailure> {
        if !exists(&unit.paths.subtree) {
            return Err(BuildFailure::Filter {
                species: unit.key(),
                cause: format!("{} is missing", unit.paths.subtree),
            });
        }
        if let Ok(Some(manifest)) = BuildLayout::read_manifest(&unit.paths.manifest) {
            if manifest.fingerprint == unit.fingerprint {
                unit.record("complete", StepOutcome::AlreadySatisfied);
                return Ok(StepOutcome::AlreadySatisfied);
            }
        }
        let manifest = BuildManifest {
            species_id: unit.descriptor.species_id.clone(),
            species_key: unit.key(),
            group: unit.descriptor.group.clone(),
            protein_count: unit.proteins.len(),
            fingerprint: unit.fingerprint.clone(),
            completed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            tool: format!("protein-tree/{}", env!("CARGO_PKG_VERSION")),
        };
        BuildLayout::write_manifest(&unit.paths.manifest, &manifest).map_err(|err| {
            BuildFailure::Filesystem {
                species: unit.key(),
                cause: err.to_string(),
            }
        })?;
        unit.record("complete", StepOutcome::Executed);
        Ok(StepOutcome::Executed)
    }

    /// Runs an engine operation under the retry policy. A run that exits
    /// cleanly without producing its output counts as a failure.
    fn run_engine(
        &self,
        operation: &EngineOperation,
        output: &Utf8Path,
    ) -> Result<(), EngineFailure> {
        BuildLayout::remove_if_exists(output).map_err(|err| EngineFailure {
            attempts: 0,
            cause: err.to_string(),
        })?;
        let attempts = self.options.retry.run(&self.engine, operation)?;
        if !exists(output) {
            return Err(EngineFailure {
                attempts,
                cause: format!("{} produced no output", operation.name()),
            });
        }
        Ok(())
    }
}

fn exists(path: &Utf8Path) -> bool {
    path.as_std_path().is_file()
}

fn promote(from: &Utf8Path, to: &Utf8Path) -> Result<(), TreeError> {
    fs::rename(from.as_std_path(), to.as_std_path())
        .map_err(|err| TreeError::Filesystem(format!("rename {from} to {to}: {err}")))
}
