use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "sidecar",
    about = "Inspect, audit and compact friend columns stored next to tree files",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file. Defaults to ./sidecar.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the trees, baskets and checksum of a tree file
    Show(ShowArgs),
    /// Summarize a friend store
    Inspect(InspectArgs),
    /// Audit a friend store and the files behind it
    Integrity(IntegrityArgs),
    /// Compact contiguous items into fewer files
    Merge(MergeArgs),
    /// Copy every file of a friend store under a new directory
    Clone(CloneArgs),
    /// Delete every file of a friend store
    Reset(ResetArgs),
}

#[derive(Args)]
pub struct ShowArgs {
    pub file: PathBuf,
}

#[derive(Args)]
pub struct InspectArgs {
    pub friend: PathBuf,
}

#[derive(Args)]
pub struct IntegrityArgs {
    pub friend: PathBuf,
    #[arg(long)]
    pub threads: Option<usize>,
    /// Also open the target files and report uncovered trailing entries
    #[arg(long)]
    pub targets: bool,
}

#[derive(Args)]
pub struct MergeArgs {
    pub friend: PathBuf,
    #[arg(short, long)]
    pub output: PathBuf,
    #[arg(long)]
    pub step: Option<u64>,
    #[arg(long)]
    pub chunk_size: Option<u64>,
    #[arg(long)]
    pub base_path: Option<PathBuf>,
    #[arg(long)]
    pub naming: Option<String>,
    #[arg(long)]
    pub keep_sources: bool,
    #[arg(long)]
    pub threads: Option<usize>,
}

#[derive(Args)]
pub struct CloneArgs {
    pub friend: PathBuf,
    pub base_path: PathBuf,
    #[arg(short, long)]
    pub output: PathBuf,
    #[arg(long)]
    pub naming: Option<String>,
    /// Copy the files now instead of only planning
    #[arg(long)]
    pub execute: bool,
    #[arg(long)]
    pub threads: Option<usize>,
}

#[derive(Args)]
pub struct ResetArgs {
    pub friend: PathBuf,
    /// Name of the friend store, repeated to confirm deletion
    #[arg(long)]
    pub confirm: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_show() {
        let cli = Cli::try_parse_from(["sidecar", "show", "data.sct"]).unwrap();
        if let Command::Show(args) = cli.command {
            assert_eq!(args.file, PathBuf::from("data.sct"));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_merge() {
        let cli = Cli::try_parse_from([
            "sidecar", "merge", "jets.json", "-o", "merged.json", "--step", "1000", "--chunk-size", "5000",
            "--keep-sources",
        ])
        .unwrap();
        if let Command::Merge(args) = cli.command {
            assert_eq!(args.output, PathBuf::from("merged.json"));
            assert_eq!(args.step, Some(1000));
            assert_eq!(args.chunk_size, Some(5000));
            assert!(args.keep_sources);
            assert!(args.naming.is_none());
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_clone() {
        let cli = Cli::try_parse_from(["sidecar", "clone", "jets.json", "/backup", "-o", "c.json", "--execute"]).unwrap();
        if let Command::Clone(args) = cli.command {
            assert_eq!(args.base_path, PathBuf::from("/backup"));
            assert!(args.execute);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn reset_requires_confirmation() {
        assert!(Cli::try_parse_from(["sidecar", "reset", "jets.json"]).is_err());
        let cli = Cli::try_parse_from(["sidecar", "reset", "jets.json", "--confirm", "jets"]).unwrap();
        assert!(matches!(cli.command, Command::Reset(_)));
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::try_parse_from(["sidecar", "--verbose", "--config", "x.toml", "inspect", "f.json"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
    }
}
