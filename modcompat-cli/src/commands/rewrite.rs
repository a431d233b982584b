use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::{
    app::{GlobalOptions, SessionOptions},
    commands::common::{build_session, file_display_name, ReportOutput},
    output::print_output,
};

pub struct RewriteOptions<'a> {
    pub output: Option<&'a Path>,
    pub suffix: &'a str,
    pub report: Option<&'a Path>,
    pub session: &'a SessionOptions,
    pub global: &'a GlobalOptions,
}

pub fn run(path: &Path, opts: &RewriteOptions) -> anyhow::Result<()> {
    let session = build_session(opts.session, true)?;
    let output_path = resolve_output_path(path, opts.output, opts.suffix);

    let report = session
        .process_file(path, Some(&output_path))
        .with_context(|| format!("rewrite failed: {}", path.display()))?;
    session.close();

    let output = ReportOutput::new(path, Some(&output_path), &report);

    if let Some(report_file) = opts.report {
        let json = serde_json::to_string_pretty(&output)?;
        std::fs::write(report_file, json)
            .with_context(|| format!("failed to write report: {}", report_file.display()))?;
        eprintln!("Report written to {}", report_file.display());
    }

    print_output(&output, opts.global, ReportOutput::display)?;

    if !report.verdict().is_loadable() {
        anyhow::bail!(
            "{} must not be loaded, nothing written",
            file_display_name(path)
        );
    }
    Ok(())
}

fn resolve_output_path(input: &Path, output: Option<&Path>, suffix: &str) -> PathBuf {
    if let Some(out) = output {
        return out.to_path_buf();
    }
    input.with_file_name(suffixed_filename(input, suffix))
}

/// `Sample.pmod` with suffix `_compat` becomes `Sample_compat.pmod`.
pub fn suffixed_filename(input: &Path, suffix: &str) -> String {
    let stem = input
        .file_stem()
        .map_or_else(|| "module".into(), |s| s.to_string_lossy());
    match input.extension() {
        Some(ext) => format!("{stem}{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}{suffix}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_defaults_next_to_input() {
        assert_eq!(
            resolve_output_path(Path::new("plugins/Sample.pmod"), None, "_compat"),
            PathBuf::from("plugins/Sample_compat.pmod")
        );
        assert_eq!(
            resolve_output_path(
                Path::new("plugins/Sample.pmod"),
                Some(Path::new("out/Fixed.pmod")),
                "_compat"
            ),
            PathBuf::from("out/Fixed.pmod")
        );
        assert_eq!(suffixed_filename(Path::new("Sample"), "_x"), "Sample_x");
    }
}
