//! Per-module rewrite reports.

use std::fmt;

use strum::{Display, EnumIter};

use crate::{
    module::{ReferenceKind, Version},
    rewrite::HandlerResult,
};

/// The overall outcome for one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter)]
pub enum Verdict {
    /// Nothing to do
    #[strum(to_string = "clean")]
    Clean,
    /// Rewritten without findings
    #[strum(to_string = "rewritten")]
    RewrittenOk,
    /// Loadable, with findings worth a warning
    #[strum(to_string = "warnings")]
    HasWarnings,
    /// Must not be loaded
    #[strum(to_string = "fatal")]
    Fatal,
}

impl Verdict {
    /// Returns `true` if the module may be loaded.
    #[must_use]
    pub fn is_loadable(self) -> bool {
        self != Verdict::Fatal
    }
}

/// One non-trivial handler result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteRecord {
    /// The reference as displayed, or the module name for module-level results
    pub reference: String,
    /// Kind of the reference, `None` for module-level results
    pub kind: Option<ReferenceKind>,
    /// Name of the handler that produced the result
    pub handler: &'static str,
    /// The result
    pub result: HandlerResult,
    /// Why, for results that carry an explanation or a rewrite description
    pub reason: Option<String>,
}

impl fmt::Display for RewriteRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.result, self.handler, self.reference)?;
        if let Some(reason) = &self.reason {
            write!(f, ": {reason}")?;
        }
        Ok(())
    }
}

/// The results of one rewrite pass over one module.
///
/// Records are append-only while the pass runs; the report is frozen when the pass returns it.
pub struct RewriteReport {
    module: String,
    version: Version,
    verdict: Verdict,
    records: boxcar::Vec<RewriteRecord>,
    changed: bool,
    fatal_reason: Option<String>,
    input_digest: Option<String>,
    output_digest: Option<String>,
}

impl RewriteReport {
    /// Freeze the records of a pass.
    ///
    /// The verdict follows from the records: `Fatal` if `fatal_reason` is set or a broken
    /// reference was found while `broken_fatal` holds, `HasWarnings` for any other detection,
    /// `RewrittenOk` if something was rewritten, `Clean` otherwise.
    pub(crate) fn new(
        module: String,
        version: Version,
        records: boxcar::Vec<RewriteRecord>,
        changed: bool,
        fatal_reason: Option<String>,
        broken_fatal: bool,
    ) -> Self {
        let verdict = Self::verdict_of(&records, fatal_reason.is_some(), broken_fatal);
        RewriteReport {
            module,
            version,
            verdict,
            records,
            changed,
            fatal_reason,
            input_digest: None,
            output_digest: None,
        }
    }

    fn verdict_of(records: &boxcar::Vec<RewriteRecord>, fatal: bool, broken_fatal: bool) -> Verdict {
        if fatal {
            return Verdict::Fatal;
        }

        let mut verdict = Verdict::Clean;
        for (_, record) in records.iter() {
            let this = match record.result {
                HandlerResult::Unhandled => Verdict::Clean,
                HandlerResult::Rewritten => Verdict::RewrittenOk,
                HandlerResult::DetectedBroken(_) if broken_fatal => Verdict::Fatal,
                _ => Verdict::HasWarnings,
            };
            verdict = verdict.max(this);
        }
        verdict
    }

    pub(crate) fn with_digests(mut self, input: String, output: Option<String>) -> Self {
        self.input_digest = Some(input);
        self.output_digest = output;
        self
    }

    /// Name of the module.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Version of the module.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// The verdict.
    #[must_use]
    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    /// Every record, in the order the handlers produced them.
    pub fn records(&self) -> impl Iterator<Item = &RewriteRecord> {
        self.records.iter().map(|(_, record)| record)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.count()
    }

    /// Returns `true` if no handler reported anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of rewritten references.
    #[must_use]
    pub fn rewritten_count(&self) -> usize {
        self.records()
            .filter(|record| record.result == HandlerResult::Rewritten)
            .count()
    }

    /// Records of detection results.
    pub fn findings(&self) -> impl Iterator<Item = &RewriteRecord> {
        self.records().filter(|record| record.result.is_detection())
    }

    /// Records a handler produced for `reference`.
    pub fn records_for<'a>(&'a self, reference: &'a str) -> impl Iterator<Item = &'a RewriteRecord> {
        self.records()
            .filter(move |record| record.reference == reference)
    }

    /// Returns `true` if the pass changed the module.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.changed
    }

    /// The structural failure behind a fatal verdict.
    #[must_use]
    pub fn fatal_reason(&self) -> Option<&str> {
        self.fatal_reason.as_deref()
    }

    /// SHA-1 of the module file that was read, if the pass read one.
    #[must_use]
    pub fn input_digest(&self) -> Option<&str> {
        self.input_digest.as_deref()
    }

    /// SHA-1 of the module file that was written, if the pass wrote one.
    #[must_use]
    pub fn output_digest(&self) -> Option<&str> {
        self.output_digest.as_deref()
    }
}

impl fmt::Debug for RewriteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RewriteReport")
            .field("module", &self.module)
            .field("version", &self.version)
            .field("verdict", &self.verdict)
            .field("records", &self.records().collect::<Vec<_>>())
            .field("changed", &self.changed)
            .field("fatal_reason", &self.fatal_reason)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(result: HandlerResult) -> RewriteRecord {
        RewriteRecord {
            reference: "[Host]Game.Ghost".into(),
            kind: Some(ReferenceKind::Type),
            handler: "test",
            reason: result.reason().map(str::to_string),
            result,
        }
    }

    fn report(results: Vec<HandlerResult>, broken_fatal: bool) -> RewriteReport {
        let records = boxcar::Vec::new();
        for result in results {
            records.push(record(result));
        }
        RewriteReport::new(
            "Plugin".into(),
            Version::new(1, 0, 0, 0),
            records,
            false,
            None,
            broken_fatal,
        )
    }

    #[test]
    fn verdicts() {
        assert_eq!(report(vec![], false).verdict(), Verdict::Clean);
        assert_eq!(
            report(vec![HandlerResult::Rewritten], false).verdict(),
            Verdict::RewrittenOk
        );
        assert_eq!(
            report(
                vec![HandlerResult::Rewritten, HandlerResult::DetectedDynamic],
                false
            )
            .verdict(),
            Verdict::HasWarnings
        );

        let broken = vec![HandlerResult::DetectedBroken("gone".into())];
        assert_eq!(report(broken.clone(), false).verdict(), Verdict::HasWarnings);
        assert_eq!(report(broken, true).verdict(), Verdict::Fatal);

        let fatal = RewriteReport::new(
            "Plugin".into(),
            Version::default(),
            boxcar::Vec::new(),
            false,
            Some("not IL-only".into()),
            false,
        );
        assert_eq!(fatal.verdict(), Verdict::Fatal);
        assert!(!fatal.verdict().is_loadable());
        assert_eq!(fatal.fatal_reason(), Some("not IL-only"));
    }

    #[test]
    fn queries() {
        let report = report(
            vec![
                HandlerResult::Rewritten,
                HandlerResult::DetectedIncompatible("arity".into()),
            ],
            false,
        );
        assert_eq!(report.len(), 2);
        assert_eq!(report.rewritten_count(), 1);
        assert_eq!(report.findings().count(), 1);
        assert_eq!(report.records_for("[Host]Game.Ghost").count(), 2);
        assert_eq!(
            report.findings().next().unwrap().to_string(),
            "incompatible [test] [Host]Game.Ghost: arity"
        );
    }
}
