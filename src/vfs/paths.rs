/*!
 * Path Normalization
 * Absolute paths with "." and ".." collapsed, resolved against the cwd
 */

use crate::core::limits::PORT_PATH_PREFIX;
use path_clean::clean;

/// Resolve `path` against `cwd` and collapse "." and ".."
///
/// ".." above the root stays at the root. The result is always absolute and
/// has no trailing slash (except "/").
pub fn resolve(cwd: &str, path: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else if cwd.ends_with('/') {
        format!("{}{}", cwd, path)
    } else {
        format!("{}/{}", cwd, path)
    };

    let cleaned = clean(&joined);
    let cleaned = cleaned.to_string_lossy();
    if cleaned.starts_with('/') {
        cleaned.into_owned()
    } else {
        format!("/{}", cleaned)
    }
}

/// Whether a resolved path belongs to the port handler family
#[inline]
pub fn is_port_path(path: &str) -> bool {
    path.starts_with(PORT_PATH_PREFIX)
}
