use std::path::Path;

use anyhow::Context;

use crate::{
    app::{GlobalOptions, SessionOptions},
    commands::common::{build_session, ReportOutput},
    output::print_output,
};

pub fn run(path: &Path, session: &SessionOptions, opts: &GlobalOptions) -> anyhow::Result<()> {
    let session = build_session(session, false)?;
    let report = session
        .process_file(path, None)
        .with_context(|| format!("check failed: {}", path.display()))?;
    session.close();

    let output = ReportOutput::new(path, None, &report);
    print_output(&output, opts, ReportOutput::display)?;

    if !report.verdict().is_loadable() {
        anyhow::bail!("{} must not be loaded", output.module);
    }
    Ok(())
}
