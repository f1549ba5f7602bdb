use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use sidecar_exec::Executor;
use sidecar_friend::{FriendStore, MergeOptions, Severity};
use sidecar_io::TreeFile;

use crate::cli::*;
use crate::config::SidecarConfig;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = SidecarConfig::load(cli.config.as_deref())?;
    match cli.command {
        Command::Show(args) => cmd_show(args),
        Command::Inspect(args) => cmd_inspect(args, &config),
        Command::Integrity(args) => cmd_integrity(args, &config),
        Command::Merge(args) => cmd_merge(args, &config),
        Command::Clone(args) => cmd_clone(args, &config),
        Command::Reset(args) => cmd_reset(args, &config),
    }
}

fn load(path: &Path, config: &SidecarConfig) -> anyhow::Result<FriendStore> {
    FriendStore::load(path, config.friend.clone()).with_context(|| format!("loading {}", path.display()))
}

fn cmd_show(args: ShowArgs) -> anyhow::Result<()> {
    let file = TreeFile::open(&args.file)?;
    println!("{} {}", "File:".bold(), file.path().display());
    println!("  uid: {}", file.uid().to_string().cyan());
    for (name, meta) in &file.footer().trees {
        println!("  tree {}: {} entries, {} baskets", name.yellow().bold(), meta.num_entries, meta.baskets.len());
        for (branch, ty) in &meta.schema {
            println!("    {branch}: {ty:?}");
        }
    }
    if file.verify_checksum()? {
        println!("  checksum: {}", "ok".green());
    } else {
        println!("  checksum: {}", "MISMATCH".red().bold());
    }
    Ok(())
}

fn cmd_inspect(args: InspectArgs, config: &SidecarConfig) -> anyhow::Result<()> {
    let store = load(&args.friend, config)?;
    let branches: Vec<&String> = store.branches().into_iter().flatten().collect();
    println!("{} {}", "Friend:".bold(), store.name().yellow().bold());
    println!("  branches: {branches:?}");
    println!("  fragments: {}", store.n_fragments());
    println!("  entries: {}", store.n_entries());
    println!("  targets:");
    for target in store.targets() {
        println!("    {} [{},{})", target.key(), target.entry_start, target.entry_stop);
    }
    Ok(())
}

fn cmd_integrity(args: IntegrityArgs, config: &SidecarConfig) -> anyhow::Result<()> {
    let store = load(&args.friend, config)?;
    let pool = config.pool(args.threads)?;
    let executor = pool.as_ref().map(|p| p as &dyn Executor);
    let report = if args.targets {
        store.integrity_with_targets(executor)?
    } else {
        store.integrity(executor)?
    };

    for finding in &report.findings {
        match finding.severity {
            Severity::Warning => println!("{} {finding}", "warning:".yellow().bold()),
            Severity::Error => println!("{} {finding}", "error:".red().bold()),
        }
    }
    let errors = report.errors().count();
    if report.is_clean() {
        println!("{} {} is consistent", "✓".green().bold(), store.name());
    } else {
        println!("{errors} errors, {} warnings", report.warnings().count());
    }
    if errors > 0 {
        bail!("friend {} failed the integrity check", store.name());
    }
    Ok(())
}

fn cmd_merge(args: MergeArgs, config: &SidecarConfig) -> anyhow::Result<()> {
    let store = load(&args.friend, config)?;
    let mut options = MergeOptions::new(args.step.unwrap_or(config.step));
    options.chunk_size = args.chunk_size.or(config.chunk_size);
    options.base_path = args.base_path.or_else(|| config.base_path.clone());
    if let Some(naming) = config.naming(args.naming.as_deref()) {
        options.naming = naming;
    }
    options.writer = config.writer.clone();
    options.clean = !args.keep_sources;

    let pool = config.pool(args.threads)?;
    let merged = store.merge(&options, pool.as_ref().map(|p| p as &dyn Executor))?;
    merged.save(&args.output)?;
    println!(
        "{} Merged {} fragments into {} ({})",
        "✓".green().bold(),
        store.n_fragments(),
        merged.n_fragments(),
        args.output.display()
    );
    Ok(())
}

fn cmd_clone(args: CloneArgs, config: &SidecarConfig) -> anyhow::Result<()> {
    let store = load(&args.friend, config)?;
    let naming = config.naming(args.naming.as_deref());
    let pool = config.pool(args.threads)?;
    let executor = pool.as_ref().map(|p| p as &dyn Executor);

    let plan = store.clone_to(&args.base_path, naming.as_ref(), false, None)?;
    if args.execute {
        let bytes = plan.execute(executor)?;
        println!("{} Copied {} files ({bytes} bytes)", "✓".green().bold(), plan.copies.len());
    } else {
        for (src, dst) in &plan.copies {
            println!("  {} → {}", src.display(), dst.display().to_string().cyan());
        }
        println!("{} files planned; rerun with --execute to copy", plan.copies.len());
    }
    plan.into_store().save(&args.output)?;
    Ok(())
}

fn cmd_reset(args: ResetArgs, config: &SidecarConfig) -> anyhow::Result<()> {
    let mut store = load(&args.friend, config)?;
    if args.confirm != store.name() {
        bail!(
            "confirmation {:?} does not match friend name {:?}; nothing deleted",
            args.confirm,
            store.name()
        );
    }
    let deleted = store.reset(None)?;
    println!("{} Deleted {} files of {}", "✓".green().bold(), deleted.len(), store.name().yellow());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use sidecar_friend::DumpOptions;
    use sidecar_types::{Batch, Column, TargetKey};

    fn saved_store(dir: &Path) -> std::path::PathBuf {
        let key = TargetKey::new(dir.join("main.sct"), Default::default(), "Events");
        let mut store = FriendStore::new("jets");
        for (start, stop) in [(0u64, 10u64), (10, 20)] {
            let data = Batch::new([("x", Column::Int64((start as i64..stop as i64).collect()))]).unwrap();
            store.add(&key.chunk(start, stop).unwrap(), data).unwrap();
        }
        store.dump(&DumpOptions::new(dir.join("parts")), None).unwrap();
        let path = dir.join("jets.json");
        store.save(&path).unwrap();
        path
    }

    fn run(args: &[&str]) -> anyhow::Result<()> {
        run_command(Cli::try_parse_from(args).unwrap())
    }

    #[test]
    fn merge_writes_new_json() {
        let dir = tempfile::tempdir().unwrap();
        let friend = saved_store(dir.path());
        let out = dir.path().join("merged.json");
        run(&["sidecar", "merge", friend.to_str().unwrap(), "-o", out.to_str().unwrap()]).unwrap();

        let merged = FriendStore::load(&out, Default::default()).unwrap();
        assert_eq!(merged.n_fragments(), 1);
        run(&["sidecar", "integrity", out.to_str().unwrap()]).unwrap();
    }

    #[test]
    fn reset_needs_matching_name() {
        let dir = tempfile::tempdir().unwrap();
        let friend = saved_store(dir.path());
        assert!(run(&["sidecar", "reset", friend.to_str().unwrap(), "--confirm", "muons"]).is_err());
        assert!(dir.path().join("parts").read_dir().unwrap().next().is_some());
        run(&["sidecar", "reset", friend.to_str().unwrap(), "--confirm", "jets"]).unwrap();
        assert!(dir.path().join("parts").read_dir().unwrap().next().is_none());
    }

    #[test]
    fn clone_plans_without_copying() {
        let dir = tempfile::tempdir().unwrap();
        let friend = saved_store(dir.path());
        let base = dir.path().join("backup");
        let out = dir.path().join("clone.json");
        run(&["sidecar", "clone", friend.to_str().unwrap(), base.to_str().unwrap(), "-o", out.to_str().unwrap()])
            .unwrap();
        assert!(!base.exists());
        assert!(FriendStore::load(&out, Default::default()).is_ok());
    }
}
