//! Command-line arguments.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use livepatch_core::{
    ReloadConfig, RootMapping,
    config::{DEFAULT_HOST, DEFAULT_PORT},
};

#[derive(Parser, Debug)]
#[command(name = "livepatch", version, about = "Push local script edits into a running engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Watch project roots and patch loaded scripts as they change
    Watch {
        /// Local project roots; the first one also serves remote-served URLs
        #[arg(required = true, value_hint = clap::ValueHint::DirPath)]
        local_roots: Vec<PathBuf>,

        #[command(flatten)]
        opts: ConnectOpts,
    },
    /// Push one file into the engine and exit
    Update {
        /// Local project root
        #[arg(value_hint = clap::ValueHint::DirPath)]
        local_root: PathBuf,

        /// File to push, relative to the root
        #[arg(value_hint = clap::ValueHint::FilePath)]
        file: PathBuf,

        #[command(flatten)]
        opts: ConnectOpts,
    },
}

impl Command {
    pub const fn opts(&self) -> &ConnectOpts {
        match self {
            Self::Watch { opts, .. } | Self::Update { opts, .. } => opts,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ConnectOpts {
    /// Inspector host
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Inspector port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Engine-side root directory; repeat or separate with `|` for several
    #[arg(short, long = "remote-root", value_name = "PATH")]
    pub remote_root: Vec<String>,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,

    /// Treat every file as CommonJS when wrapping for embedded hosts
    #[arg(long)]
    pub force_cjs: bool,

    /// Glob of files never to watch
    #[arg(long, value_name = "GLOB")]
    pub ignore: Option<String>,
}

impl ConnectOpts {
    /// Build the reload configuration for these (absolute) local roots.
    pub fn config(&self, local_roots: &[PathBuf]) -> ReloadConfig {
        let primary = local_roots.first().map_or_else(|| Path::new("."), PathBuf::as_path);
        let remotes = RootMapping::split_remote_roots(&self.remote_root);
        ReloadConfig::new(primary)
            .with_root_mapping(RootMapping::new(local_roots, remotes))
            .with_force_cjs(self.force_cjs)
            .with_ignore(self.ignore.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_defaults() {
        let cli = Cli::try_parse_from(["livepatch", "watch", "/proj"]).unwrap();
        let opts = cli.command.opts();
        assert_eq!(opts.host, "127.0.0.1");
        assert_eq!(opts.port, 9222);
        assert!(opts.remote_root.is_empty());
        assert!(!opts.verbose);
    }

    #[test]
    fn test_watch_requires_a_root() {
        assert!(Cli::try_parse_from(["livepatch", "watch"]).is_err());
    }

    #[test]
    fn test_remote_roots_are_split_and_padded() {
        let cli = Cli::try_parse_from([
            "livepatch", "watch", "/a", "/b", "/c", "-r", "/r1|/r2", "--port", "9229",
        ])
        .unwrap();
        let Command::Watch { local_roots, opts } = cli.command else {
            panic!("expected watch");
        };
        let config = opts.config(&local_roots);
        assert_eq!(config.local_root, PathBuf::from("/a"));
        assert_eq!(config.root_mapping.remote_roots(), vec!["/r1", "/r2", "/r2"]);
        assert_eq!(opts.port, 9229);
    }

    #[test]
    fn test_update_args() {
        let cli = Cli::try_parse_from([
            "livepatch", "update", "/proj", "src/app.js", "-H", "10.0.0.2", "--force-cjs",
            "--ignore", "**/node_modules/**",
        ])
        .unwrap();
        let Command::Update { local_root, file, opts } = cli.command else {
            panic!("expected update");
        };
        assert_eq!(local_root, PathBuf::from("/proj"));
        assert_eq!(file, PathBuf::from("src/app.js"));
        assert_eq!(opts.host, "10.0.0.2");
        let config = opts.config(&[local_root]);
        assert!(config.force_cjs);
        assert_eq!(config.ignore.as_deref(), Some("**/node_modules/**"));
    }
}
