//! End-to-end rewriting of plugin modules through a session.
//!
//! Modules are written to a scratch directory, processed from disk and loaded back.

mod common;

use std::{
    fs,
    path::Path,
    sync::{atomic::AtomicBool, Arc},
};

use common::*;
use modcompat::prelude::*;

fn session(config: RewriteConfig) -> Result<RewriteSession> {
    RewriteSession::builder(config.with_trusted(["Host"]))
        .trusted_module(build_host_v2()?)
        .facades(facades()?)
        .build()
}

fn references(module: &Module) -> Vec<String> {
    module
        .enumerate_references()
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn save(module: &Module, dir: &Path, name: &str) -> Result<std::path::PathBuf> {
    let path = dir.join(name);
    module.save(&path)?;
    Ok(path)
}

#[test]
fn clean_plugin_is_written_byte_for_byte() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = save(&build_clean_plugin()?, dir.path(), "Clean.pmod")?;
    let output = dir.path().join("Clean.out.pmod");

    let session = session(RewriteConfig::default())?;
    let report = session.process_file(&input, Some(&output))?;

    assert_eq!(report.verdict(), Verdict::Clean);
    assert!(report.is_empty());
    assert_eq!(fs::read(&input)?, fs::read(&output)?);
    assert!(report.input_digest().is_some());
    assert_eq!(report.input_digest(), report.output_digest());
    Ok(())
}

#[test]
fn legacy_plugin_is_repaired_and_loads_again() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = save(&build_legacy_plugin()?, dir.path(), "Legacy.pmod")?;
    let output = dir.path().join("Legacy.out.pmod");

    let session = session(RewriteConfig::default())?;
    let report = session.process_file(&input, Some(&output))?;

    assert!(report.changed());
    assert_eq!(report.verdict(), Verdict::HasWarnings);
    assert_ne!(report.input_digest(), report.output_digest());

    let rewritten = Module::from_file(&output)?;
    let refs = references(&rewritten);
    assert!(refs.contains(&"[Host]Game.Player::get_Health()".to_string()));
    assert!(refs.contains(&"[Host]Game.Player::set_Health(System.Int32)".to_string()));
    assert!(refs.contains(&"[Host]Game.Player::Damage(System.Int32,System.Boolean)".to_string()));
    assert!(refs.contains(&"[Host]Game.World::Broadcast(System.String)".to_string()));
    assert!(refs.contains(&"[Compat]Compat.LegacyFacade::Notify(System.String)".to_string()));
    assert!(!refs.iter().any(|reference| reference.ends_with("::Health")));

    // Teleport changed arity and Ghost never existed; both stay in the report.
    let teleport: Vec<_> = report
        .records_for("[Host]Game.Player::Teleport(System.Int32)")
        .collect();
    assert_eq!(teleport.len(), 1);
    assert!(matches!(
        teleport[0].result,
        HandlerResult::DetectedIncompatible(_)
    ));
    assert!(report
        .records_for("[Host]Game.Ghost")
        .any(|record| matches!(record.result, HandlerResult::DetectedBroken(_))));
    Ok(())
}

#[test]
fn rewriting_twice_changes_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = save(&build_repairable_plugin()?, dir.path(), "Repairable.pmod")?;
    let first = dir.path().join("Repairable.1.pmod");
    let second = dir.path().join("Repairable.2.pmod");

    let session = session(RewriteConfig::default())?;
    let report = session.process_file(&input, Some(&first))?;
    assert_eq!(report.verdict(), Verdict::RewrittenOk);

    let report = session.process_file(&first, Some(&second))?;
    assert_eq!(report.verdict(), Verdict::Clean);
    assert!(!report.changed());
    assert_eq!(fs::read(&first)?, fs::read(&second)?);

    // Findings that cannot be repaired come back unchanged, but nothing is rewritten again.
    let input = save(&build_legacy_plugin()?, dir.path(), "Legacy.pmod")?;
    let first = dir.path().join("Legacy.1.pmod");
    let second = dir.path().join("Legacy.2.pmod");
    session.process_file(&input, Some(&first))?;
    let report = session.process_file(&first, Some(&second))?;
    assert!(!report.changed());
    assert_eq!(report.rewritten_count(), 0);
    assert_eq!(fs::read(&first)?, fs::read(&second)?);
    Ok(())
}

#[test]
fn detect_only_reports_what_would_change() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = save(&build_legacy_plugin()?, dir.path(), "Legacy.pmod")?;
    let output = dir.path().join("Legacy.out.pmod");

    let session = session(RewriteConfig::detect_only())?;
    let report = session.process_file(&input, Some(&output))?;

    assert!(!report.changed());
    assert_eq!(report.rewritten_count(), 0);
    assert_eq!(report.verdict(), Verdict::HasWarnings);
    assert_eq!(fs::read(&input)?, fs::read(&output)?);

    let health: Vec<_> = report.records_for("[Host]Game.Player::Health").collect();
    assert_eq!(health.len(), 1);
    assert!(health[0]
        .reason
        .as_deref()
        .is_some_and(|reason| reason.starts_with("would ")));
    Ok(())
}

#[test]
fn strict_mode_refuses_broken_plugins() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = save(&build_legacy_plugin()?, dir.path(), "Legacy.pmod")?;
    let output = dir.path().join("Legacy.out.pmod");

    let session = session(RewriteConfig::strict())?;
    let report = session.process_file(&input, Some(&output))?;

    assert_eq!(report.verdict(), Verdict::Fatal);
    assert!(!report.verdict().is_loadable());
    assert!(report.output_digest().is_none());
    assert!(!output.exists());
    Ok(())
}

#[test]
fn retired_platform_module_is_replaced() -> Result<()> {
    let config = RewriteConfig::default()
        .with_platform(Platform::Linux)
        .with_strip(["Host.Win32"]);
    let session = RewriteSession::builder(config)
        .target(TargetDescriptor::from_module(build_desktop_target(HOST_V1)?))
        .build()?;

    let mut plugin = build_native_plugin(&["Show", "Close"])?;
    let report = session.rewrite_module(&mut plugin)?;

    assert_eq!(report.verdict(), Verdict::RewrittenOk);
    assert!(plugin.module_refs.iter().all(|row| row.name != "Host.Win32"));
    let refs = references(&plugin);
    assert!(refs.contains(&"[Host.Desktop]Host.Native.Window".to_string()));
    assert!(refs.contains(&"[Host.Desktop]Host.Native.Window::Close()".to_string()));

    session.close();
    Ok(())
}

#[test]
fn shell_access_is_reported_in_paranoid_mode() -> Result<()> {
    for config in [
        RewriteConfig::paranoid(),
        RewriteConfig::paranoid().with_rewrite(false),
    ] {
        let mut plugin = build_shell_plugin()?;
        let report = session(config)?.rewrite_module(&mut plugin)?;
        assert_eq!(report.verdict(), Verdict::HasWarnings);
        assert!(report
            .records_for("[System]System.Diagnostics.Process")
            .any(|record| record.result == HandlerResult::DetectedShellAccess));
    }

    let mut plugin = build_shell_plugin()?;
    let report = session(RewriteConfig::default())?.rewrite_module(&mut plugin)?;
    assert_eq!(report.verdict(), Verdict::Clean);
    Ok(())
}

#[test]
fn mappings_leave_other_modules_alone() -> Result<()> {
    let mut plugin = build_mixed_plugin()?;
    let report = session(RewriteConfig::default())?.rewrite_module(&mut plugin)?;
    assert!(report.changed());

    let refs = references(&plugin);
    for expected in [
        "[Host]Game.World::Broadcast(System.String)",
        "[Compat]Compat.LegacyFacade::Notify(System.String)",
        "[OtherLib]Game.World::Log(System.String)",
        "[OtherLib]Game.Legacy::Notify(System.String)",
    ] {
        assert!(refs.contains(&expected.to_string()), "{expected} missing from {refs:?}");
    }
    assert!(!refs.contains(&"[Host]Game.World::Log(System.String)".to_string()));
    assert!(report.records_for("[OtherLib]Game.World::Log(System.String)").next().is_none());
    Ok(())
}

#[test]
fn facade_registered_twice_is_rejected() -> Result<()> {
    let result = FacadeRegistry::builder()
        .module(Arc::new(build_host_v2()?))
        .map_method("Game.World::Log(System.String)", "Game.World", "Broadcast")
        .map_method("Game.World::Log(System.String)", "Game.World", "Broadcast")
        .build();
    assert!(matches!(result, Err(Error::Configuration(_))));
    Ok(())
}

#[test]
fn batch_reports_in_input_order() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("out");
    fs::create_dir(&out)?;

    let plugins = [
        ("Clean.pmod", build_clean_plugin()?),
        ("Legacy.pmod", build_legacy_plugin()?),
        ("Shell.pmod", build_shell_plugin()?),
    ];
    let mut jobs = Vec::new();
    for (name, module) in &plugins {
        let input = save(module, dir.path(), name)?;
        jobs.push(RewriteJob::new(input, Some(out.join(name))));
    }

    let session = session(RewriteConfig::default())?;
    let reports = session.process_batch(jobs, &AtomicBool::new(false));
    let names: Vec<String> = reports
        .into_iter()
        .map(|report| report.map(|report| report.module().to_string()))
        .collect::<Result<_>>()?;
    assert_eq!(names, ["CleanPlugin", "LegacyPlugin", "ShellPlugin"]);
    assert!(out.join("Legacy.pmod").exists());
    Ok(())
}
