//! Virtual path helpers.
//!
//! Tree paths are absolute, `/`-separated strings independent of the host
//! platform's path syntax. The root path is `/` (or `/{name}` for a named
//! root) and every descendant path is the parent path joined with the
//! node's name.

/// A path is relative when it does not start with `/`.
pub fn is_relative(path: &str) -> bool {
    !path.starts_with('/')
}

/// Join a base path and a child name.
pub fn join(base: &str, name: &str) -> String {
    if base.ends_with('/') {
        format!("{base}{name}")
    } else {
        format!("{base}/{name}")
    }
}

/// Non-empty segments of a path (`"/"` yields none).
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Directory component: `/a/b` -> `/a`, `/a` -> `/`.
///
/// Relative paths are returned unchanged; callers validate absoluteness
/// before relying on the result.
pub fn dir_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(i) => &path[..i],
        None => path,
    }
}

/// Final component: `/a/b` -> `b`.
pub fn base_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}
