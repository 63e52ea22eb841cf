//! Virtual path helpers.
//!
//! Drive paths are `/`-separated strings, always rooted at `/`, with no
//! trailing slash except for the root itself. They are never OS paths.

/// Normalize a virtual path: ensure a leading `/`, collapse repeated
/// separators, resolve `.` and `..`, drop any trailing slash.
pub fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// Parent directory of a path. The parent of `/` is `/`.
pub fn path_parent(path: &str) -> String {
    let cleaned = clean_path(path);
    match cleaned.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => cleaned[..i].to_string(),
    }
}

/// Last segment of a path. Empty for `/`.
pub fn path_base(path: &str) -> String {
    let cleaned = clean_path(path);
    cleaned
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Number of segments in a path. `/` has depth 0, `/a/b` has depth 2.
///
/// Trailing slashes are ignored, so `/x/` and `/x` have the same depth.
pub fn path_depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

/// Join a child name onto a directory path.
pub fn join_path(dir: &str, name: &str) -> String {
    clean_path(&format!("{dir}/{name}"))
}

/// True when `path` lies strictly under `ancestor`, segment-wise.
///
/// `/a/b` is under `/a`; `/ab` is not.
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    let ancestor = clean_path(ancestor);
    let path = clean_path(path);
    if path == ancestor {
        return false;
    }
    if ancestor == "/" {
        return true;
    }
    path.strip_prefix(&ancestor)
        .is_some_and(|rest| rest.starts_with('/'))
}
