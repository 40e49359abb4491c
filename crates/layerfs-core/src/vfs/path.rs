//! Logical path helpers.
//!
//! Every store keys entries by a normalized absolute path: a leading `/`,
//! no trailing slash, no `.`/`..`/empty components. The root is `"/"`.

use std::collections::VecDeque;

use super::error::{VfsError, VfsResult};

/// Most symlinks followed while resolving one path.
pub const MAX_LINK_HOPS: usize = 8;

/// Normalize a path: ensure a leading `/`, resolve `.` and `..`.
///
/// `..` above the root stays at the root.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// Returns true for the root path.
pub fn is_root(path: &str) -> bool {
    path == "/"
}

/// Parent of a normalized path. The root has no parent.
pub fn parent(path: &str) -> Option<&str> {
    if is_root(path) {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Final component of a normalized path (empty for the root).
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

/// Join a child name (or relative path) onto a directory.
pub fn join(dir: &str, name: &str) -> String {
    normalize(&format!("{}/{}", dir, name))
}

/// Resolve a symlink target relative to the link's own directory.
pub fn resolve_link(link: &str, target: &str) -> String {
    if target.starts_with('/') {
        normalize(target)
    } else {
        join(parent(link).unwrap_or("/"), target)
    }
}

/// Strict ancestors of a normalized path, root first.
///
/// `ancestors("/a/b/c")` yields `["/", "/a", "/a/b"]`.
pub fn ancestors(path: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = parent(path);
    while let Some(p) = current {
        result.push(p.to_string());
        current = parent(p);
    }
    result.reverse();
    result
}

/// Returns true if `path` equals `dir` or lies beneath it.
pub fn is_within(path: &str, dir: &str) -> bool {
    if is_root(dir) {
        return true;
    }
    path == dir
        || path
            .strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Re-root `path` from under `from` to under `to`.
///
/// Returns `None` when `path` is not within `from`.
pub fn rebase(path: &str, from: &str, to: &str) -> Option<String> {
    if !is_within(path, from) {
        return None;
    }
    let rest = if is_root(from) {
        path
    } else {
        &path[from.len()..]
    };
    Some(normalize(&format!("{}/{}", to, rest)))
}

fn components(path: &str) -> VecDeque<String> {
    path.split('/')
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect()
}

/// Component-by-component symlink resolution.
///
/// The caller looks at each [`candidate`](Self::candidate) prefix and either
/// [`follow`](Self::follow)s it as a link or [`accept`](Self::accept)s it.
/// A followed link is spliced in front of the components still pending, so
/// links in the middle of a path resolve the same way as a final one.
#[derive(Debug)]
pub struct LinkWalk {
    origin: String,
    resolved: String,
    pending: VecDeque<String>,
    hops: usize,
}

impl LinkWalk {
    pub fn new(path: &str) -> Self {
        let origin = normalize(path);
        Self {
            pending: components(&origin),
            resolved: "/".to_string(),
            origin,
            hops: 0,
        }
    }

    /// The next prefix to examine and whether it is the final component.
    pub fn candidate(&self) -> Option<(String, bool)> {
        let name = self.pending.front()?;
        Some((join(&self.resolved, name), self.pending.len() == 1))
    }

    /// Keep the current candidate as it is.
    pub fn accept(&mut self) {
        if let Some(name) = self.pending.pop_front() {
            self.resolved = join(&self.resolved, &name);
        }
    }

    /// Replace the current candidate with the link target it holds.
    pub fn follow(&mut self, target: &str) -> VfsResult<()> {
        self.hops += 1;
        if self.hops > MAX_LINK_HOPS {
            return Err(VfsError::TooManySymlinks(self.origin.clone()));
        }
        let Some(name) = self.pending.pop_front() else {
            return Ok(());
        };
        let link = join(&self.resolved, &name);
        let mut next = components(&resolve_link(&link, target));
        next.extend(self.pending.drain(..));
        self.pending = next;
        self.resolved = "/".to_string();
        Ok(())
    }

    /// The resolved path.
    pub fn finish(self) -> String {
        self.resolved
    }
}

/// Resolve every symlink along `path` with a synchronous lookup.
///
/// `link_target` returns the stored target when its argument is a link. A
/// link in the final position is only followed with `follow_final`.
pub fn resolve_links<F>(path: &str, follow_final: bool, mut link_target: F) -> VfsResult<String>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut walk = LinkWalk::new(path);
    while let Some((candidate, last)) = walk.candidate() {
        match link_target(&candidate) {
            Some(target) if follow_final || !last => walk.follow(&target)?,
            _ => walk.accept(),
        }
    }
    Ok(walk.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("a/b"), "/a/b");
        assert_eq!(normalize("/a/./b/"), "/a/b");
        assert_eq!(normalize("/a/b/../c"), "/a/c");
        assert_eq!(normalize("/../.."), "/");
        assert_eq!(normalize("//a//b"), "/a/b");
    }

    #[test]
    fn test_parent_and_name() {
        assert_eq!(parent("/"), None);
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/a/b"), Some("/a"));
        assert_eq!(file_name("/a/b.txt"), "b.txt");
        assert_eq!(file_name("/"), "");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
        assert_eq!(join("/Icons/Cache", "/a/b.txt.cache"), "/Icons/Cache/a/b.txt.cache");
    }

    #[test]
    fn test_resolve_link() {
        assert_eq!(resolve_link("/a/link", "b.txt"), "/a/b.txt");
        assert_eq!(resolve_link("/a/link", "../c"), "/c");
        assert_eq!(resolve_link("/a/link", "/x/y"), "/x/y");
    }

    #[test]
    fn test_ancestors() {
        assert_eq!(ancestors("/"), Vec::<String>::new());
        assert_eq!(ancestors("/a"), vec!["/"]);
        assert_eq!(ancestors("/a/b/c"), vec!["/", "/a", "/a/b"]);
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("/a/b", "/a"));
        assert!(is_within("/a", "/a"));
        assert!(!is_within("/ab", "/a"));
        assert!(is_within("/anything", "/"));
    }

    #[test]
    fn test_rebase() {
        assert_eq!(rebase("/a/x/y", "/a", "/b"), Some("/b/x/y".to_string()));
        assert_eq!(rebase("/a", "/a", "/b"), Some("/b".to_string()));
        assert_eq!(rebase("/c", "/a", "/b"), None);
    }

    fn links(path: &str) -> Option<String> {
        match path {
            "/docs/latest" => Some("v2.txt".into()),
            "/alias" => Some("/docs".into()),
            "/up" => Some("../docs/latest".into()),
            "/loop" => Some("/loop".into()),
            _ => None,
        }
    }

    #[test]
    fn test_resolve_links() {
        assert_eq!(resolve_links("/docs/latest", true, links).unwrap(), "/docs/v2.txt");
        assert_eq!(resolve_links("/docs/latest", false, links).unwrap(), "/docs/latest");
        assert_eq!(resolve_links("/plain/file", true, links).unwrap(), "/plain/file");
    }

    #[test]
    fn test_resolve_links_through_directories() {
        assert_eq!(resolve_links("/alias/a.txt", false, links).unwrap(), "/docs/a.txt");
        assert_eq!(resolve_links("/alias/latest", true, links).unwrap(), "/docs/v2.txt");
        assert_eq!(resolve_links("/alias/latest", false, links).unwrap(), "/docs/latest");
        assert_eq!(resolve_links("/up", true, links).unwrap(), "/docs/v2.txt");
    }

    #[test]
    fn test_resolve_links_gives_up_on_loops() {
        assert!(matches!(
            resolve_links("/loop/x", true, links),
            Err(VfsError::TooManySymlinks(ref p)) if p == "/loop/x"
        ));
        assert_eq!(resolve_links("/loop", false, links).unwrap(), "/loop");
    }
}
