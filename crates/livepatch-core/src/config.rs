//! Reload configuration and local/remote root mapping.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

/// Default inspector host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default inspector port.
pub const DEFAULT_PORT: u16 = 9222;

/// Debugger source cache ceiling, large enough that real projects never evict.
pub const MAX_SCRIPTS_CACHE_SIZE: u64 = 10_000_000;

/// Delay before retrying after a failed attach.
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Delay before retrying after the engine dropped the session.
pub const DISCONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// One `(local, remote)` root pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootPair {
    /// Local filesystem prefix.
    pub local: String,
    /// Prefix as reported by the engine.
    pub remote: String,
}

/// Ordered list of root pairs used to rewrite engine paths into local ones.
///
/// Pairs are tried in order and the first remote root that is a literal
/// prefix of the engine path wins. There is no longest-prefix preference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootMapping {
    pairs: Vec<RootPair>,
}

impl RootMapping {
    /// Build a mapping from local roots and remote roots.
    ///
    /// When there are more local roots than remote roots, the remote list is
    /// padded by repeating its last element. An empty remote list yields an
    /// empty mapping.
    #[must_use]
    pub fn new<L, R>(local_roots: L, remote_roots: R) -> Self
    where
        L: IntoIterator,
        L::Item: AsRef<Path>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        let locals: Vec<String> = local_roots
            .into_iter()
            .map(|p| p.as_ref().to_string_lossy().into_owned())
            .collect();
        let remotes = pad_remote_roots(
            remote_roots.into_iter().map(Into::into).collect(),
            locals.len(),
        );

        let pairs = locals
            .into_iter()
            .zip(remotes)
            .map(|(local, remote)| RootPair { local, remote })
            .collect();

        Self { pairs }
    }

    /// Split raw `--remote-root` values on `|` into individual roots.
    #[must_use]
    pub fn split_remote_roots<I, S>(values: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        values
            .into_iter()
            .flat_map(|v| {
                v.as_ref()
                    .split('|')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToOwned::to_owned)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Configured pairs, in match order.
    #[must_use]
    pub fn pairs(&self) -> &[RootPair] {
        &self.pairs
    }

    /// Effective remote roots after padding.
    #[must_use]
    pub fn remote_roots(&self) -> Vec<&str> {
        self.pairs.iter().map(|p| p.remote.as_str()).collect()
    }

    /// Whether no pairs are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Rewrite `pathname` with the first pair whose remote root prefixes it.
    ///
    /// A pair whose remote root equals its local root never rewrites.
    #[must_use]
    pub fn rewrite(&self, pathname: &str) -> Option<String> {
        self.pairs
            .iter()
            .filter(|p| !p.remote.is_empty() && p.remote != p.local)
            .find(|p| pathname.starts_with(p.remote.as_str()))
            .map(|p| format!("{}{}", p.local, &pathname[p.remote.len()..]))
    }
}

fn pad_remote_roots(mut remotes: Vec<String>, len: usize) -> Vec<String> {
    if let Some(last) = remotes.last().cloned() {
        while remotes.len() < len {
            remotes.push(last.clone());
        }
    }
    remotes
}

/// Everything the session needs to know about the local project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadConfig {
    /// Primary local root. HTTP-served scripts without a root match are joined under it.
    pub local_root: PathBuf,

    /// Local/remote root rewrite rules.
    #[serde(default)]
    pub root_mapping: RootMapping,

    /// Wrap every `.js` file for the embedded host, even if it looks like a module.
    #[serde(default)]
    pub force_cjs: bool,

    /// Glob of paths the watcher should ignore.
    #[serde(default)]
    pub ignore: Option<String>,

    /// Delay before retrying after a failed attach.
    #[serde(default = "default_connect_retry", with = "duration_secs")]
    pub connect_retry_delay: Duration,

    /// Delay before retrying after a lost session.
    #[serde(default = "default_disconnect_retry", with = "duration_secs")]
    pub disconnect_retry_delay: Duration,

    /// `maxScriptsCacheSize` passed when enabling the debugger.
    #[serde(default = "default_cache_size")]
    pub max_scripts_cache_size: u64,
}

const fn default_connect_retry() -> Duration {
    CONNECT_RETRY_DELAY
}

const fn default_disconnect_retry() -> Duration {
    DISCONNECT_RETRY_DELAY
}

const fn default_cache_size() -> u64 {
    MAX_SCRIPTS_CACHE_SIZE
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

impl ReloadConfig {
    /// Create a config rooted at `local_root` with no remote mapping.
    #[must_use]
    pub fn new(local_root: impl Into<PathBuf>) -> Self {
        Self {
            local_root: local_root.into(),
            root_mapping: RootMapping::default(),
            force_cjs: false,
            ignore: None,
            connect_retry_delay: CONNECT_RETRY_DELAY,
            disconnect_retry_delay: DISCONNECT_RETRY_DELAY,
            max_scripts_cache_size: MAX_SCRIPTS_CACHE_SIZE,
        }
    }

    /// Set the root mapping.
    #[must_use]
    pub fn with_root_mapping(mut self, mapping: RootMapping) -> Self {
        self.root_mapping = mapping;
        self
    }

    /// Force CommonJS wrapping for the embedded host.
    #[must_use]
    pub const fn with_force_cjs(mut self, force: bool) -> Self {
        self.force_cjs = force;
        self
    }

    /// Set the watcher ignore glob.
    #[must_use]
    pub fn with_ignore(mut self, pattern: Option<String>) -> Self {
        self.ignore = pattern;
        self
    }

    /// Override both retry delays.
    #[must_use]
    pub const fn with_retry_delays(mut self, connect: Duration, disconnect: Duration) -> Self {
        self.connect_retry_delay = connect;
        self.disconnect_retry_delay = disconnect;
        self
    }
}
