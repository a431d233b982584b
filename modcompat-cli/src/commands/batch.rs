use std::{
    path::Path,
    sync::atomic::AtomicBool,
    time::Instant,
};

use anyhow::Context;
use modcompat::rewrite::{RewriteJob, Verdict};
use serde::Serialize;

use crate::{
    app::{GlobalOptions, SessionOptions},
    commands::common::{build_session, collect_modules, file_display_name, ReportOutput},
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct FailedEntry {
    file: String,
    error: String,
}

#[derive(Debug, Serialize)]
struct BatchOutput {
    reports: Vec<ReportOutput>,
    failed: Vec<FailedEntry>,
    time_ms: u128,
}

pub struct BatchOptions<'a> {
    pub output_dir: &'a Path,
    pub recursive: bool,
    pub detect_only: bool,
    pub session: &'a SessionOptions,
    pub global: &'a GlobalOptions,
}

pub fn run(dir: &Path, cancel: &AtomicBool, opts: &BatchOptions) -> anyhow::Result<()> {
    let files = collect_modules(dir, opts.recursive)?;
    if files.is_empty() {
        anyhow::bail!("no .pmod files found in {}", dir.display());
    }
    if !opts.detect_only {
        std::fs::create_dir_all(opts.output_dir).with_context(|| {
            format!(
                "failed to create output directory: {}",
                opts.output_dir.display()
            )
        })?;
    }

    let session = build_session(opts.session, !opts.detect_only)?;
    let jobs: Vec<RewriteJob> = files
        .iter()
        .map(|file| {
            let output = (!opts.detect_only).then(|| {
                let relative = file.strip_prefix(dir).unwrap_or(file);
                opts.output_dir.join(relative)
            });
            RewriteJob::new(file, output)
        })
        .collect();

    for job in &jobs {
        if let Some(parent) = job.output.as_deref().and_then(Path::parent) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory: {}", parent.display()))?;
        }
    }

    let start = Instant::now();
    let results = session.process_batch(jobs.clone(), cancel);
    session.close();

    let mut output = BatchOutput {
        reports: Vec::new(),
        failed: Vec::new(),
        time_ms: start.elapsed().as_millis(),
    };
    for (job, result) in jobs.iter().zip(results) {
        match result {
            Ok(report) => output.reports.push(ReportOutput::new(
                &job.input,
                job.output.as_deref(),
                &report,
            )),
            Err(e) => output.failed.push(FailedEntry {
                file: job.input.display().to_string(),
                error: e.to_string(),
            }),
        }
    }

    print_output(&output, opts.global, |out| {
        let mut tw = TabWriter::new(vec![
            ("File", Align::Left),
            ("Module", Align::Left),
            ("Verdict", Align::Left),
            ("Rewritten", Align::Right),
            ("Findings", Align::Right),
        ]);
        for report in &out.reports {
            let rewritten = report
                .records
                .iter()
                .filter(|record| record.result == "rewritten")
                .count();
            tw.row(vec![
                file_display_name(Path::new(&report.file)),
                format!("{} {}", report.module, report.version),
                report.verdict.clone(),
                rewritten.to_string(),
                (report.records.len() - rewritten).to_string(),
            ]);
        }
        tw.print();

        for failed in &out.failed {
            println!("FAILED {}: {}", failed.file, failed.error);
        }

        let fatal = out
            .reports
            .iter()
            .filter(|report| report.verdict == Verdict::Fatal.to_string())
            .count();
        #[allow(clippy::cast_precision_loss)]
        let time_secs = out.time_ms as f64 / 1000.0;
        println!(
            "\n{} modules, {} fatal, {} failed in {time_secs:.1}s",
            out.reports.len(),
            fatal,
            out.failed.len()
        );
    })?;

    if !output.failed.is_empty() {
        anyhow::bail!("{} of {} modules failed", output.failed.len(), files.len());
    }
    Ok(())
}
