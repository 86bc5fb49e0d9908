//! What text gets pushed for a changed file.

use std::{borrow::Cow, path::Path};

use crate::EngineFlavor;

/// Opening half of the CommonJS module factory.
pub const CJS_WRAPPER_HEAD: &str = "(function (exports, require, module, __filename, __dirname) { ";

/// Closing half of the CommonJS module factory.
pub const CJS_WRAPPER_TAIL: &str = "\n});";

/// Wrap `source` in the module factory the embedded host compiles CommonJS files into.
#[must_use]
pub fn wrap_commonjs(source: &str) -> String {
    let mut out = String::with_capacity(CJS_WRAPPER_HEAD.len() + source.len() + CJS_WRAPPER_TAIL.len());
    out.push_str(CJS_WRAPPER_HEAD);
    out.push_str(source);
    out.push_str(CJS_WRAPPER_TAIL);
    out
}

/// A `.js` file that was not served over HTTP.
#[must_use]
pub fn is_commonjs(path: &Path, remote_served: bool) -> bool {
    !remote_served && path.to_string_lossy().ends_with(".js")
}

/// Text to push for `source` at `path`.
///
/// Only the embedded host needs wrapping, and only for CommonJS files
/// (or every file when `force_cjs` is set).
#[must_use]
pub fn prepare_source<'a>(
    flavor: EngineFlavor,
    path: &Path,
    remote_served: bool,
    force_cjs: bool,
    source: &'a str,
) -> Cow<'a, str> {
    if flavor == EngineFlavor::Embedded && (force_cjs || is_commonjs(path, remote_served)) {
        Cow::Owned(wrap_commonjs(source))
    } else {
        Cow::Borrowed(source)
    }
}
