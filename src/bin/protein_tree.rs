use std::path::{Path, PathBuf};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use protein_tree::config::{Config, ConfigLoader};
use protein_tree::diff::{ActiveSet, compute_active_set};
use protein_tree::disambiguate::{DisambiguationReport, DocumentSyntax, disambiguate_file};
use protein_tree::engine::RobotEngine;
use protein_tree::error::TreeError;
use protein_tree::orchestrator::{BuildOptions, BuildReport, Orchestrator, ProgressSink};
use protein_tree::output::{JsonOutput, OutputMode, TerminalProgress};
use protein_tree::query::QueryTemplate;
use protein_tree::snapshot::{Snapshot, load_optional};
use protein_tree::species::DescriptorTable;
use protein_tree::store::BuildLayout;
use protein_tree::synonyms::SynonymTable;
use protein_tree::uniprot::UniprotProteomeSource;

#[derive(Parser)]
#[command(name = "protein-tree")]
#[command(about = "Incremental builder for the multi-species protein tree")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// JSON config file (default: ./protein-tree.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Compute the species to rebuild from two protein tables")]
    Diff(DiffArgs),
    #[command(about = "Build the subtree of every active species")]
    Build(BuildArgs),
    #[command(about = "Make duplicate sibling labels unique")]
    Disambiguate(DisambiguateArgs),
    #[command(about = "List the species ids of an active-set table")]
    Species(SpeciesArgs),
}

#[derive(Args)]
struct DiffArgs {
    #[arg(long)]
    current: PathBuf,

    #[arg(long)]
    previous: Option<PathBuf>,

    #[arg(long)]
    output: PathBuf,

    #[arg(long)]
    build_root: Option<String>,
}

#[derive(Args)]
struct BuildArgs {
    #[arg(long)]
    active: PathBuf,

    #[arg(long)]
    species: PathBuf,

    #[arg(long)]
    query: PathBuf,

    #[arg(long)]
    synonyms: Option<PathBuf>,

    #[arg(long)]
    build_root: Option<String>,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct DisambiguateArgs {
    document: PathBuf,

    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long, value_enum)]
    syntax: Option<DocumentSyntax>,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct SpeciesArgs {
    #[arg(long)]
    active: PathBuf,

    #[arg(long)]
    output: PathBuf,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<TreeError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &TreeError) -> u8 {
    match error {
        TreeError::ConfigRead(_)
        | TreeError::ConfigParse(_)
        | TreeError::TableRead { .. }
        | TreeError::UnknownTableFormat(_)
        | TreeError::MissingColumn { .. }
        | TreeError::MissingHeader(_)
        | TreeError::QueryTemplateRead(_)
        | TreeError::QueryTemplatePlaceholder(_)
        | TreeError::DocumentRead { .. } => 2,
        TreeError::DownloadHttp(_)
        | TreeError::DownloadStatus { .. }
        | TreeError::EmptyDownload(_)
        | TreeError::EngineSpawn { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Diff(args) => run_diff(args, &config),
        Commands::Build(args) => run_build(args, &config, output_mode),
        Commands::Disambiguate(args) => run_disambiguate(args),
        Commands::Species(args) => run_species(args),
    }
}

fn layout(build_root: Option<String>, config: &Config) -> BuildLayout {
    BuildLayout::new(Utf8PathBuf::from(
        build_root.unwrap_or_else(|| config.build_root.clone()),
    ))
}

fn run_diff(args: DiffArgs, config: &Config) -> miette::Result<()> {
    let layout = layout(args.build_root, config);
    let built = layout.completed_species()?;
    let previous = load_optional(args.previous.as_deref())?;
    let current = Snapshot::load(&args.current)?;
    let active = compute_active_set(&previous, &current, &built);
    active.write(&args.output)?;
    println!(
        "{} of {} species active ({} proteins) -> {}",
        active.len(),
        current.species_count(),
        active.protein_count(),
        args.output.display()
    );
    Ok(())
}

fn run_build(args: BuildArgs, config: &Config, output_mode: OutputMode) -> miette::Result<()> {
    let descriptors = DescriptorTable::load(&args.species)?;
    let template = QueryTemplate::load(&args.query)?;
    let active = ActiveSet::load(&args.active)?;
    info!(
        species = active.len(),
        proteins = active.protein_count(),
        descriptors = descriptors.len(),
        "loaded build inputs"
    );

    let source = UniprotProteomeSource::new(&config.download)?;
    let engine = RobotEngine::from_config(&config.engine);
    let mut orchestrator = Orchestrator::new(
        layout(args.build_root, config),
        source,
        engine,
        template,
        BuildOptions::from_config(config),
    );
    match &args.synonyms {
        Some(path) if config.merge_synonyms => {
            orchestrator = orchestrator.with_synonyms(SynonymTable::load(path, &descriptors)?);
        }
        Some(path) => warn!(
            path = %path.display(),
            "ignoring synonyms table because merge_synonyms is disabled"
        ),
        None => {}
    }

    let terminal = TerminalProgress::new();
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Interactive if !args.json => &terminal,
        _ => &JsonOutput,
    };
    let report = orchestrator.run(&active, &descriptors, sink);
    let error_log = Path::new(&config.error_log);
    let wrote_log = report.write_error_log(error_log)?;

    if args.json {
        JsonOutput::print_report(&report).into_diagnostic()?;
        eprintln!("{} errors", report.failed);
    } else {
        print_build_summary(&report, wrote_log.then_some(error_log));
    }
    Ok(())
}

fn print_build_summary(report: &BuildReport, error_log: Option<&Path>) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}protein-tree build{reset}");
    println!("{green}done: {} of {}{reset}", report.done, report.total);
    for failure in &report.failures {
        println!("{yellow}  {failure}{reset}");
    }
    println!("{} errors", report.failed);
    if let Some(path) = error_log {
        println!("see {}", path.display());
    }
}

fn run_disambiguate(args: DisambiguateArgs) -> miette::Result<()> {
    let syntax = args
        .syntax
        .unwrap_or_else(|| DocumentSyntax::from_path(&args.document));
    let output = args.output.as_deref().unwrap_or(&args.document);
    let report = disambiguate_file(&args.document, output, syntax)?;
    if args.json {
        JsonOutput::print_json(&report).into_diagnostic()?;
    } else {
        print_disambiguation_summary(&report, output);
    }
    Ok(())
}

fn print_disambiguation_summary(report: &DisambiguationReport, output: &Path) {
    println!(
        "{} classes, {} duplicate groups, {} labels rewritten -> {}",
        report.classes,
        report.groups,
        report.rewrites.len(),
        output.display()
    );
}

fn run_species(args: SpeciesArgs) -> miette::Result<()> {
    let active = ActiveSet::load(&args.active)?;
    BuildLayout::write_bytes_atomic(&args.output, active.render_species_list().as_bytes())?;
    println!("{} species -> {}", active.len(), args.output.display());
    Ok(())
}
