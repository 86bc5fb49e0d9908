//! Mapping protocol-reported script URLs onto local filesystem paths.
//!
//! Resolution order:
//! 1. Embedded hosts report local paths already; those are only normalized.
//! 2. The URL is parsed. `node:` scripts are internal and skipped.
//! 3. `http(s)` URLs are marked remote-served. Otherwise, on drive-letter
//!    platforms, the stray `/` in front of `/C:/...` is dropped.
//! 4. The first root pair whose remote root prefixes the pathname rewrites it.
//! 5. Remote-served pathnames that no pair rewrote are joined under the local root.

use std::path::{Path, PathBuf};

use thiserror::Error;
use url::Url;

use crate::{EngineFlavor, RootMapping};

/// Why a script URL produced no local path.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Script has no URL")]
    EmptyUrl,
    #[error("Internal script: {0}")]
    InternalScheme(String),
    #[error("Malformed script URL {url}: {source}")]
    Malformed {
        url: String,
        source: url::ParseError,
    },
}

/// Path separator rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStyle {
    /// `/`-separated, rooted at `/`.
    Posix,
    /// `\`-separated, optionally prefixed by a drive letter.
    Windows,
}

impl PathStyle {
    /// Style of the running platform.
    #[must_use]
    pub const fn native() -> Self {
        if cfg!(windows) { Self::Windows } else { Self::Posix }
    }

    const fn separator(self) -> char {
        match self {
            Self::Posix => '/',
            Self::Windows => '\\',
        }
    }
}

/// A script URL resolved to a local path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedScript {
    /// Normalized local path.
    pub path: PathBuf,
    /// The URL was `http:` or `https:`.
    pub remote_served: bool,
    /// A root pair rewrote the pathname.
    pub root_rewritten: bool,
}

/// Resolve `url` to a local path using the platform's path rules.
///
/// # Errors
/// Returns error if the URL is empty, internal, or cannot be parsed.
pub fn resolve(
    url: &str,
    flavor: EngineFlavor,
    mapping: &RootMapping,
    local_root: &Path,
) -> Result<ResolvedScript, ResolveError> {
    resolve_with_style(url, flavor, mapping, local_root, PathStyle::native())
}

/// Resolve `url` to a local path using explicit path rules.
///
/// # Errors
/// Returns error if the URL is empty, internal, or cannot be parsed.
pub fn resolve_with_style(
    url: &str,
    flavor: EngineFlavor,
    mapping: &RootMapping,
    local_root: &Path,
    style: PathStyle,
) -> Result<ResolvedScript, ResolveError> {
    if url.is_empty() {
        return Err(ResolveError::EmptyUrl);
    }

    if flavor.urls_are_paths() {
        return Ok(ResolvedScript {
            path: PathBuf::from(normalize(url, style)),
            remote_served: false,
            root_rewritten: false,
        });
    }

    let parsed = Url::parse(url).map_err(|source| ResolveError::Malformed {
        url: url.to_owned(),
        source,
    })?;

    let remote_served = match parsed.scheme() {
        "node" => return Err(ResolveError::InternalScheme(url.to_owned())),
        "http" | "https" => true,
        _ => false,
    };

    let mut pathname = parsed.path().to_owned();
    if !remote_served && style == PathStyle::Windows && has_stray_drive_slash(&pathname) {
        pathname.remove(0);
    }

    let rewritten = mapping.rewrite(&pathname);
    let root_rewritten = rewritten.is_some();
    if let Some(local) = rewritten {
        pathname = local;
    }

    if remote_served && !root_rewritten {
        pathname = format!(
            "{}{}{}",
            local_root.to_string_lossy(),
            style.separator(),
            pathname
        );
    }

    Ok(ResolvedScript {
        path: PathBuf::from(normalize(&pathname, style)),
        remote_served,
        root_rewritten,
    })
}

/// `/C:/...` as produced by `file:///C:/...` URLs.
fn has_stray_drive_slash(pathname: &str) -> bool {
    let bytes = pathname.as_bytes();
    bytes.len() >= 3 && bytes[0] == b'/' && bytes[1].is_ascii_alphabetic() && bytes[2] == b':'
}

/// Normalize a local path with the platform's rules.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    PathBuf::from(normalize(&path.to_string_lossy(), PathStyle::native()))
}

/// Lexically normalize `path`: unify separators, collapse repeated
/// separators, drop `.` segments and fold `..` into its parent.
///
/// `..` above the root of an absolute path is discarded; on a relative path
/// it is kept.
#[must_use]
pub fn normalize(path: &str, style: PathStyle) -> String {
    let sep = style.separator();
    let unified: String = match style {
        PathStyle::Posix => path.to_owned(),
        PathStyle::Windows => path.replace('/', "\\"),
    };

    let (prefix, rest) = match style {
        PathStyle::Windows if has_drive(&unified) => unified.split_at(2),
        _ => ("", unified.as_str()),
    };
    let absolute = rest.starts_with(sep);

    let mut parts: Vec<&str> = Vec::new();
    for segment in rest.split(sep) {
        match segment {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let body = parts.join(&sep.to_string());
    let mut out = String::with_capacity(prefix.len() + body.len() + 1);
    out.push_str(prefix);
    if absolute {
        out.push(sep);
    }
    out.push_str(&body);
    if out.is_empty() {
        out.push('.');
    }
    out
}

fn has_drive(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posix(url: &str, flavor: EngineFlavor, mapping: &RootMapping) -> ResolvedScript {
        resolve_with_style(url, flavor, mapping, Path::new("/local"), PathStyle::Posix).unwrap()
    }

    #[test]
    fn test_file_url_with_root_mapping() {
        let mapping = RootMapping::new(["/local"], ["/remote"]);
        let resolved = posix("file:///remote/foo.js", EngineFlavor::GenericHost, &mapping);
        assert_eq!(resolved.path, PathBuf::from("/local/foo.js"));
        assert!(resolved.root_rewritten);
        assert!(!resolved.remote_served);
    }

    #[test]
    fn test_file_url_without_mapping_kept() {
        let resolved = posix("file:///local/app.js", EngineFlavor::GenericHost, &RootMapping::default());
        assert_eq!(resolved.path, PathBuf::from("/local/app.js"));
        assert!(!resolved.root_rewritten);
    }

    #[test]
    fn test_http_url_joined_under_local_root() {
        let resolved = posix("https://host/foo.js", EngineFlavor::Generic, &RootMapping::default());
        assert_eq!(resolved.path, PathBuf::from("/local/foo.js"));
        assert!(resolved.remote_served);
    }

    #[test]
    fn test_http_url_rewritten_not_joined() {
        let mapping = RootMapping::new(["/work/app"], ["/static"]);
        let resolved = posix("http://cdn:8080/static/js/a.js", EngineFlavor::Generic, &mapping);
        assert_eq!(resolved.path, PathBuf::from("/work/app/js/a.js"));
        assert!(resolved.remote_served && resolved.root_rewritten);
    }

    #[test]
    fn test_node_scheme_skipped() {
        let err = resolve_with_style(
            "node:internal/fs/utils",
            EngineFlavor::GenericHost,
            &RootMapping::default(),
            Path::new("/local"),
            PathStyle::Posix,
        )
        .unwrap_err();
        assert!(matches!(err, ResolveError::InternalScheme(_)));
    }

    #[test]
    fn test_malformed_and_empty_skipped() {
        let mapping = RootMapping::default();
        let root = Path::new("/local");
        assert!(matches!(
            resolve_with_style("not a url", EngineFlavor::Generic, &mapping, root, PathStyle::Posix),
            Err(ResolveError::Malformed { .. })
        ));
        assert!(matches!(
            resolve_with_style("", EngineFlavor::Embedded, &mapping, root, PathStyle::Posix),
            Err(ResolveError::EmptyUrl)
        ));
    }

    #[test]
    fn test_embedded_url_is_a_path() {
        let mapping = RootMapping::new(["/local"], ["/remote"]);
        let resolved = posix("/remote/./lib/../main.js", EngineFlavor::Embedded, &mapping);
        assert_eq!(resolved.path, PathBuf::from("/remote/main.js"));
        assert!(!resolved.root_rewritten);
    }

    #[test]
    fn test_windows_drive_slash_stripped() {
        let resolved = resolve_with_style(
            "file:///C:/proj/src/app.js",
            EngineFlavor::GenericHost,
            &RootMapping::default(),
            Path::new("C:\\proj"),
            PathStyle::Windows,
        )
        .unwrap();
        assert_eq!(resolved.path, PathBuf::from("C:\\proj\\src\\app.js"));
    }

    #[test]
    fn test_normalize_posix() {
        assert_eq!(normalize("/a//b/./c/../d", PathStyle::Posix), "/a/b/d");
        assert_eq!(normalize("/../x", PathStyle::Posix), "/x");
        assert_eq!(normalize("../a/../../b", PathStyle::Posix), "../../b");
        assert_eq!(normalize("", PathStyle::Posix), ".");
        assert_eq!(normalize("/", PathStyle::Posix), "/");
    }

    #[test]
    fn test_normalize_windows() {
        assert_eq!(normalize("C:/a/b/../c", PathStyle::Windows), "C:\\a\\c");
        assert_eq!(normalize("\\a\\.\\b", PathStyle::Windows), "\\a\\b");
    }
}
