//! Sessions sharing resources across many plugin rewrites.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::{
    facade::FacadeRegistry,
    file::{digest_hex, output::write_atomic},
    platform::{PlatformAssemblyMap, TargetDescriptor},
    rewrite::{
        handlers::ArchitectureCallback, InstructionHandler, RewriteConfig, RewritePipeline,
        RewriteReport, SharedResources, Verdict,
    },
    symbols::SymbolUniverse,
    Error, File, Module, Result,
};

/// One input of [`RewriteSession::process_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteJob {
    /// The plugin to rewrite
    pub input: PathBuf,
    /// Where to write the result, `None` to only report
    pub output: Option<PathBuf>,
}

impl RewriteJob {
    /// A job reading `input` and writing to `output`.
    pub fn new(input: impl Into<PathBuf>, output: Option<PathBuf>) -> Self {
        RewriteJob {
            input: input.into(),
            output,
        }
    }
}

/// Collects the trusted modules, facades and platform targets of a session.
pub struct RewriteSessionBuilder {
    config: RewriteConfig,
    trusted: Vec<Arc<Module>>,
    facades: FacadeRegistry,
    targets: Vec<TargetDescriptor>,
    on_architecture_fix: Option<ArchitectureCallback>,
    handlers: Vec<Box<dyn InstructionHandler>>,
}

impl RewriteSessionBuilder {
    /// Add a module to the trusted universe.
    #[must_use]
    pub fn trusted_module(self, module: Module) -> Self {
        self.trusted_shared(Arc::new(module))
    }

    /// Add a module that is also used elsewhere, e.g. as a facade target.
    #[must_use]
    pub fn trusted_shared(mut self, module: Arc<Module>) -> Self {
        self.trusted.push(module);
        self
    }

    /// Use `facades` for member and type mapping.
    #[must_use]
    pub fn facades(mut self, facades: FacadeRegistry) -> Self {
        self.facades = facades;
        self
    }

    /// Add a platform target.
    #[must_use]
    pub fn target(mut self, target: TargetDescriptor) -> Self {
        self.targets.push(target);
        self
    }

    /// Called with the module name whenever a 32-bit requirement is cleared.
    #[must_use]
    pub fn on_architecture_fix<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_architecture_fix = Some(Arc::new(callback));
        self
    }

    /// Add a handler next to the standard set.
    #[must_use]
    pub fn handler(mut self, handler: Box<dyn InstructionHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Load the resources and build the session.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for two trusted modules with the same name or a target
    /// carrying a retired name, and the load error of any platform target.
    pub fn build(self) -> Result<RewriteSession> {
        let mut universe = SymbolUniverse::new(self.config.trusted_module_names.iter().cloned());
        for module in self.trusted {
            universe.add_module(module)?;
        }

        let platform = if self.config.strip_module_names.is_empty() && self.targets.is_empty() {
            None
        } else {
            Some(PlatformAssemblyMap::new(
                self.config.platform_target,
                self.config.strip_module_names.iter().cloned(),
                self.targets,
            )?)
        };

        let callback = self
            .on_architecture_fix
            .unwrap_or_else(|| Arc::new(|_: &str| {}));
        let pipeline = self
            .handlers
            .into_iter()
            .fold(RewritePipeline::from_config(self.config, callback), |pipeline, handler| {
                pipeline.handler(handler)
            });

        info!(
            "Rewrite session: {} trusted modules, {} facades, platform map {}",
            universe.len(),
            self.facades.len(),
            if platform.is_some() { "enabled" } else { "disabled" }
        );

        Ok(RewriteSession {
            pipeline,
            resources: Arc::new(SharedResources {
                universe,
                facades: self.facades,
                platform,
            }),
        })
    }
}

/// Rewrites plugins against one set of shared resources.
///
/// The resources are read-only while plugins are processed, so one session serves any number
/// of plugins, also concurrently through [`RewriteSession::process_batch`].
pub struct RewriteSession {
    pipeline: RewritePipeline,
    resources: Arc<SharedResources>,
}

impl RewriteSession {
    /// Start building a session for `config`.
    #[must_use]
    pub fn builder(config: RewriteConfig) -> RewriteSessionBuilder {
        RewriteSessionBuilder {
            config,
            trusted: Vec::new(),
            facades: FacadeRegistry::default(),
            targets: Vec::new(),
            on_architecture_fix: None,
            handlers: Vec::new(),
        }
    }

    /// The session's pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &RewritePipeline {
        &self.pipeline
    }

    /// The shared resources; they stay alive as long as any clone does.
    #[must_use]
    pub fn shared(&self) -> Arc<SharedResources> {
        self.resources.clone()
    }

    /// Rewrite an in-memory module.
    ///
    /// # Errors
    /// See [`RewritePipeline::run`].
    pub fn rewrite_module(&self, module: &mut Module) -> Result<RewriteReport> {
        self.pipeline.run(module, &self.resources)
    }

    /// Rewrite the plugin at `input` and write the result to `output`.
    ///
    /// An unchanged module is written back byte for byte. Nothing is written for a fatal
    /// report. The input file is closed before the pipeline runs.
    ///
    /// # Errors
    /// Returns the load error of `input`, a pipeline error, or [`Error::WriteFailed`].
    pub fn process_file(&self, input: &Path, output: Option<&Path>) -> Result<RewriteReport> {
        let (mut module, original, input_digest) = {
            let file = File::from_file(input)?;
            let module = Module::from_bytes(file.data())?;
            (module, file.data().to_vec(), file.digest())
        };

        let report = self.rewrite_module(&mut module)?;
        if report.verdict() == Verdict::Fatal {
            warn!(
                "{}: {}",
                input.display(),
                report.fatal_reason().unwrap_or("fatal")
            );
            return Ok(report.with_digests(input_digest, None));
        }

        let Some(output) = output else {
            return Ok(report.with_digests(input_digest, None));
        };

        let bytes = if report.changed() {
            module.to_bytes()?
        } else {
            original
        };
        write_atomic(output, &bytes)?;
        debug!("Wrote {} ({} bytes)", output.display(), bytes.len());

        let output_digest = digest_hex(&bytes);
        Ok(report.with_digests(input_digest, Some(output_digest)))
    }

    /// Process `jobs` in parallel, in input order.
    ///
    /// Jobs not yet started when `cancel` is set fail with a cancellation error; running jobs
    /// finish.
    pub fn process_batch(
        &self,
        jobs: Vec<RewriteJob>,
        cancel: &AtomicBool,
    ) -> Vec<Result<RewriteReport>> {
        jobs.into_par_iter()
            .map(|job| {
                if cancel.load(Ordering::Relaxed) {
                    return Err(Error::Error(format!("{}: cancelled", job.input.display())));
                }
                self.process_file(&job.input, job.output.as_deref())
            })
            .collect()
    }

    /// Release the platform targets.
    ///
    /// Handles still held through [`RewriteSession::shared`] keep the resources alive; the
    /// targets are then released when the last clone is dropped.
    pub fn close(self) {
        match Arc::try_unwrap(self.resources) {
            Ok(SharedResources {
                platform: Some(mut platform),
                ..
            }) => {
                platform.close();
                debug!("Rewrite session closed");
            }
            Ok(_) => debug!("Rewrite session closed"),
            Err(_) => debug!("Rewrite session closed, resources still shared"),
        }
    }
}

impl std::fmt::Debug for RewriteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewriteSession")
            .field("pipeline", &self.pipeline)
            .field("resources", &self.resources)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        module::{ModuleFlags, Platform, Version},
        rewrite::HandlerResult,
        test::{
            build_compat, build_desktop_target, build_host_v2, build_legacy_plugin,
            build_native_plugin, build_plugin,
        },
    };

    fn session(config: RewriteConfig) -> RewriteSession {
        let host = Arc::new(build_host_v2());
        let facades = FacadeRegistry::builder()
            .module(host.clone())
            .module(Arc::new(build_compat()))
            .map_method("Game.World::Log(System.String)", "Game.World", "Broadcast")
            .map_facade("Game.Legacy", "Compat.LegacyFacade")
            .build()
            .unwrap();

        RewriteSession::builder(
            config
                .with_trusted(["Host"])
                .with_platform(Platform::Windows)
                .with_strip(["Host.Win32"]),
        )
        .trusted_shared(host)
        .facades(facades)
        .target(TargetDescriptor::from_module(build_desktop_target(
            Version::new(1, 0, 0, 0),
            false,
        )))
        .build()
        .unwrap()
    }

    fn write(dir: &Path, name: &str, module: &Module) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, module.to_bytes().unwrap()).unwrap();
        path
    }

    #[test]
    fn clean_plugin_is_copied_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let input = write(dir.path(), "in.pmod", &build_plugin());
        let output = dir.path().join("out.pmod");

        let report = session(RewriteConfig::default())
            .process_file(&input, Some(&output))
            .unwrap();
        assert_eq!(report.verdict(), Verdict::Clean);
        assert_eq!(std::fs::read(&input).unwrap(), std::fs::read(&output).unwrap());
        assert_eq!(report.input_digest(), report.output_digest());
    }

    #[test]
    fn rewritten_plugin_loads_again() {
        let dir = tempfile::tempdir().unwrap();
        let input = write(dir.path(), "in.pmod", &build_legacy_plugin());
        let output = dir.path().join("out.pmod");

        let report = session(RewriteConfig::default())
            .process_file(&input, Some(&output))
            .unwrap();
        assert!(report.changed());
        assert_ne!(report.input_digest(), report.output_digest());

        let rewritten = Module::from_file(&output).unwrap();
        assert!(rewritten
            .member_refs
            .iter()
            .any(|member_ref| member_ref.name == "Broadcast"));
    }

    #[test]
    fn fatal_report_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut plugin = build_plugin();
        plugin.flags = ModuleFlags::REQUIRES_32BIT;
        let input = write(dir.path(), "in.pmod", &plugin);
        let output = dir.path().join("out.pmod");

        let report = session(RewriteConfig::default())
            .process_file(&input, Some(&output))
            .unwrap();
        assert_eq!(report.verdict(), Verdict::Fatal);
        assert!(!output.exists());
        assert!(report.output_digest().is_none());
    }

    #[test]
    fn batch_keeps_order_and_honours_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = vec![
            RewriteJob::new(write(dir.path(), "a.pmod", &build_plugin()), None),
            RewriteJob::new(
                write(
                    dir.path(),
                    "b.pmod",
                    &build_native_plugin(Version::new(1, 0, 0, 0), &["Show"]),
                ),
                None,
            ),
        ];
        let session = session(RewriteConfig::default());

        let reports = session.process_batch(jobs.clone(), &AtomicBool::new(false));
        assert_eq!(reports[0].as_ref().unwrap().module(), "SamplePlugin");
        let native = reports[1].as_ref().unwrap();
        assert_eq!(native.module(), "NativePlugin");
        assert!(native
            .records()
            .any(|record| record.handler == "platform" && record.result == HandlerResult::Rewritten));

        let cancelled = session.process_batch(jobs, &AtomicBool::new(true));
        assert!(cancelled.iter().all(Result::is_err));
    }

    #[test]
    fn close_releases_targets_unless_shared() {
        let session = session(RewriteConfig::default());
        let shared = session.shared();
        session.close();
        assert!(!shared.platform.as_ref().unwrap().is_closed());
        assert_eq!(shared.platform.as_ref().unwrap().targets().len(), 1);
    }
}
