//! Import command implementation

use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use crate::adapter::{AdapterRegistry, ConvertOptions};
use crate::config::Config;
use crate::import::{ImportOutcome, Importer};
use crate::model::{short_id, FidelityLevel, Platform};

pub struct ImportArgs {
    pub sources: Vec<PathBuf>,
    pub platform: Platform,
    pub root: Option<String>,
    pub tags: Vec<String>,
    pub summary: Option<String>,
    pub working_directory: Option<String>,
    pub fidelity: Option<FidelityLevel>,
    pub no_commit: bool,
}

impl ImportArgs {
    /// Configured defaults with command-line values layered on top
    pub fn options(&self, config: &Config) -> ConvertOptions {
        let mut options = ConvertOptions::from_config(config);
        for tag in &self.tags {
            if !options.tags.contains(tag) {
                options.tags.push(tag.clone());
            }
        }
        options.summary = self.summary.clone();
        options.working_directory = self.working_directory.clone();
        if let Some(fidelity) = self.fidelity {
            options.fidelity = fidelity;
        }
        options
    }
}

pub fn run(config: &Config, args: ImportArgs) -> Result<()> {
    let root = config.resolve_root(args.root.as_deref());
    let auto_commit = config.import.auto_commit && !args.no_commit;

    let registry = AdapterRegistry::new(config);
    let engine = super::engine(config, &root);
    engine
        .layout()
        .ensure()
        .with_context(|| format!("Failed to prepare archive at {}", root.display()))?;
    if auto_commit {
        engine.ensure_repository()?;
    }

    let importer = Importer::new(&registry, &engine, args.options(config)).auto_commit(auto_commit);

    println!("Importing {} {} export(s) into {}", args.sources.len(), args.platform, root.display());
    println!();

    if let [source] = args.sources.as_slice() {
        let outcome = importer
            .import_file(source, args.platform)
            .with_context(|| format!("Import failed: {}", source.display()))?;
        print_outcome(&outcome);
        return Ok(());
    }

    let report = importer.import_batch(&args.sources, args.platform);
    for (_, outcome) in &report.imported {
        print_outcome(outcome);
    }
    for (source, error) in &report.failed {
        println!("✗ {}: {}", source.display(), error);
    }

    println!();
    println!("Imported: {}/{}", report.succeeded(), report.total());
    if !report.failed.is_empty() {
        bail!("{} of {} imports failed", report.failed.len(), report.total());
    }
    Ok(())
}

fn print_outcome(outcome: &ImportOutcome) {
    for record in &outcome.records {
        println!(
            "✓ {} [{}] ({} messages)",
            record.title,
            short_id(&record.id),
            record.message_count
        );
        println!("  Canonical: {}", record.canonical.display());
        println!("  Flow:      {}", record.pointer.display());
    }
    for failure in &outcome.failures {
        println!("✗ {}: {}", outcome.raw.display(), failure);
    }
    match &outcome.commit {
        Some(commit) => println!("  Git: {commit}"),
        None => println!("  Git: not committed"),
    }
}
