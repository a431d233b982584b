use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context};
use modcompat::{
    facade::FacadeRegistry,
    module::Platform,
    platform::TargetDescriptor,
    rewrite::{RewriteConfig, RewriteReport, RewriteSession},
    Module,
};
use serde::Serialize;

use crate::{
    app::SessionOptions,
    output::{Align, TabWriter},
};

/// Load a module file.
pub fn load_module(path: &Path) -> anyhow::Result<Module> {
    Module::from_file(path).with_context(|| format!("failed to load module: {}", path.display()))
}

/// Build a session from the command line options.
///
/// Host and facade modules are trusted under their own names.
pub fn build_session(opts: &SessionOptions, rewrite: bool) -> anyhow::Result<RewriteSession> {
    let hosts = opts
        .hosts
        .iter()
        .map(|path| load_module(path).map(Arc::new))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let facade_modules = opts
        .facade_modules
        .iter()
        .map(|path| load_module(path).map(Arc::new))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut config = if opts.strict {
        RewriteConfig::strict()
    } else if opts.paranoid {
        RewriteConfig::paranoid()
    } else {
        RewriteConfig::default()
    }
    .with_rewrite(rewrite)
    .with_trusted(
        hosts
            .iter()
            .chain(&facade_modules)
            .map(|module| module.name.clone()),
    )
    .with_strip(opts.strip.iter().cloned());
    if let Some(name) = &opts.platform {
        let platform = name
            .parse::<Platform>()
            .map_err(|_| anyhow!("unknown platform '{name}' (expected windows, linux, or macos)"))?;
        config = config.with_platform(platform);
    }

    let mut facades = FacadeRegistry::builder();
    for module in hosts.iter().chain(&facade_modules) {
        facades = facades.module(Arc::clone(module));
    }
    for name in &opts.map_sources {
        facades = facades.source(name);
    }
    for mapping in &opts.map_methods {
        let (old, owner, name) = split_member_mapping(mapping)?;
        facades = facades.map_method(old, owner, name);
    }
    for mapping in &opts.map_fields {
        let (old, owner, name) = split_member_mapping(mapping)?;
        facades = facades.map_field(old, owner, name);
    }
    for mapping in &opts.map_types {
        let (old, facade) = mapping
            .split_once('=')
            .ok_or_else(|| anyhow!("type mapping '{mapping}' is not OLD=FACADE"))?;
        facades = facades.map_facade(old, facade);
    }
    let facades = facades.build().context("invalid facade mapping")?;

    let mut builder = RewriteSession::builder(config).facades(facades);
    for module in hosts.into_iter().chain(facade_modules) {
        builder = builder.trusted_shared(module);
    }
    for path in &opts.targets {
        builder = builder.target(TargetDescriptor::from_file(path));
    }
    builder
        .on_architecture_fix(|module| {
            log::info!("{module}: cleared the 32-bit requirement");
        })
        .build()
        .context("failed to set up the rewrite session")
}

/// Split `OLD=OWNER::NAME`; the old key may itself contain `::`.
fn split_member_mapping(mapping: &str) -> anyhow::Result<(&str, &str, &str)> {
    let (old, new) = mapping
        .split_once('=')
        .ok_or_else(|| anyhow!("member mapping '{mapping}' is not OLD=OWNER::NAME"))?;
    let (owner, name) = new
        .rsplit_once("::")
        .ok_or_else(|| anyhow!("member mapping target '{new}' is not OWNER::NAME"))?;
    Ok((old, owner, name))
}

/// Collect all `.pmod` files of a directory, sorted.
pub fn collect_modules(dir: &Path, recursive: bool) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_modules_into(dir, recursive, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_modules_into(dir: &Path, recursive: bool, files: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            if recursive {
                collect_modules_into(&path, recursive, files)?;
            }
        } else if is_module_file(&path) {
            files.push(path);
        }
    }
    Ok(())
}

/// Returns true if the path has a `.pmod` extension.
pub fn is_module_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pmod"))
}

/// Extract a display-friendly filename from a path.
pub fn file_display_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    )
}

#[derive(Debug, Serialize)]
pub struct RecordOutput {
    pub reference: String,
    pub kind: Option<String>,
    pub handler: String,
    pub result: String,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReportOutput {
    pub file: String,
    pub output: Option<String>,
    pub module: String,
    pub version: String,
    pub verdict: String,
    pub changed: bool,
    pub fatal_reason: Option<String>,
    pub input_digest: Option<String>,
    pub output_digest: Option<String>,
    pub records: Vec<RecordOutput>,
}

impl ReportOutput {
    pub fn new(file: &Path, output: Option<&Path>, report: &RewriteReport) -> Self {
        ReportOutput {
            file: file.display().to_string(),
            output: output
                .filter(|_| report.output_digest().is_some())
                .map(|path| path.display().to_string()),
            module: report.module().to_string(),
            version: report.version().to_string(),
            verdict: report.verdict().to_string(),
            changed: report.changed(),
            fatal_reason: report.fatal_reason().map(str::to_string),
            input_digest: report.input_digest().map(str::to_string),
            output_digest: report.output_digest().map(str::to_string),
            records: report
                .records()
                .map(|record| RecordOutput {
                    reference: record.reference.clone(),
                    kind: record.kind.map(|kind| kind.to_string()),
                    handler: record.handler.to_string(),
                    result: record.result.to_string(),
                    reason: record.reason.clone(),
                })
                .collect(),
        }
    }

    /// Print the verdict line followed by the records.
    pub fn display(&self) {
        println!("{} {}: {}", self.module, self.version, self.verdict);
        if let Some(reason) = &self.fatal_reason {
            println!("  Fatal:  {reason}");
        }
        if let Some(output) = &self.output {
            println!("  Output: {output}");
        }
        if self.records.is_empty() {
            return;
        }

        let mut tw = TabWriter::new(vec![
            ("Result", Align::Left),
            ("Handler", Align::Left),
            ("Reference", Align::Left),
            ("Reason", Align::Left),
        ])
        .indent("  ");
        for record in &self.records {
            tw.row(vec![
                record.result.clone(),
                record.handler.clone(),
                record.reference.clone(),
                record.reason.clone().unwrap_or_default(),
            ]);
        }
        tw.print();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_mapping_splits_on_last_separator() {
        let (old, owner, name) =
            split_member_mapping("Game.Chat::Log(System.String)=Game.Chat::Broadcast").unwrap();
        assert_eq!(old, "Game.Chat::Log(System.String)");
        assert_eq!(owner, "Game.Chat");
        assert_eq!(name, "Broadcast");

        assert!(split_member_mapping("Game.Chat::Log").is_err());
        assert!(split_member_mapping("Game.Chat::Log=Broadcast").is_err());
    }

    #[test]
    fn module_files_by_extension() {
        assert!(is_module_file(Path::new("plugins/Sample.pmod")));
        assert!(is_module_file(Path::new("Sample.PMOD")));
        assert!(!is_module_file(Path::new("Sample.dll")));
        assert!(!is_module_file(Path::new("pmod")));
    }
}
