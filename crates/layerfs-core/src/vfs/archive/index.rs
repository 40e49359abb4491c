//! Archive index parsing.
//!
//! The archive layer is described by a JSON tree fetched once at startup:
//!
//! ```json
//! { "version": 3, "size": 1234, "fsroot": [ node, ... ] }
//! ```
//!
//! Two node encodings are accepted:
//!
//! - **v3**: `[name, size, mtime, mode, uid, gid, target]`. The kind comes
//!   from the `S_IFMT` bits of `mode`; `target` holds the children of a
//!   directory or the destination of a symlink.
//! - **v4**: `[name, kind, size, extra?]` with `kind` 0 = file,
//!   1 = directory, 2 = symlink; `extra` holds children or a link target.

use serde_json::Value;

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::types::FileType;

const S_IFMT: u64 = 0o170000;
const S_IFDIR: u64 = 0o040000;
const S_IFLNK: u64 = 0o120000;

/// Index encoding version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexVersion {
    V3,
    V4,
}

/// One node of the archive tree.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexNode {
    pub name: String,
    pub kind: FileType,
    pub size: u64,
    pub mode: u32,
    /// Modification time in seconds since the epoch, when recorded.
    pub mtime: Option<u64>,
    /// Link target, for symlinks.
    pub target: Option<String>,
    pub children: Vec<IndexNode>,
}

/// Parsed archive index.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveIndex {
    pub version: IndexVersion,
    /// Total byte size of the archive.
    pub total_size: u64,
    /// Top-level entries (children of `/`).
    pub root: Vec<IndexNode>,
}

impl ArchiveIndex {
    /// Parse an index document.
    pub fn from_json(bytes: &[u8]) -> VfsResult<Self> {
        let doc: Value = serde_json::from_slice(bytes)
            .map_err(|e| VfsError::index(format!("invalid JSON: {e}")))?;

        let version = match doc.get("version").and_then(Value::as_u64) {
            Some(3) => IndexVersion::V3,
            Some(4) => IndexVersion::V4,
            Some(other) => return Err(VfsError::index(format!("unsupported version {other}"))),
            None => return Err(VfsError::index("missing version")),
        };
        let total_size = doc.get("size").and_then(Value::as_u64).unwrap_or(0);
        let fsroot = doc
            .get("fsroot")
            .and_then(Value::as_array)
            .ok_or_else(|| VfsError::index("missing fsroot"))?;

        let root = parse_nodes(fsroot, version)?;
        Ok(Self {
            version,
            total_size,
            root,
        })
    }

    /// Visit every node with its absolute path, parents before children.
    pub fn walk(&self, mut visit: impl FnMut(&str, &IndexNode)) {
        fn recurse(dir: &str, nodes: &[IndexNode], visit: &mut dyn FnMut(&str, &IndexNode)) {
            for node in nodes {
                let path = if dir == "/" {
                    format!("/{}", node.name)
                } else {
                    format!("{}/{}", dir, node.name)
                };
                visit(&path, node);
                recurse(&path, &node.children, visit);
            }
        }
        recurse("/", &self.root, &mut visit);
    }
}

fn parse_nodes(values: &[Value], version: IndexVersion) -> VfsResult<Vec<IndexNode>> {
    values
        .iter()
        .map(|value| match version {
            IndexVersion::V3 => parse_v3(value),
            IndexVersion::V4 => parse_v4(value),
        })
        .collect()
}

fn fields(value: &Value, min: usize) -> VfsResult<&Vec<Value>> {
    let fields = value
        .as_array()
        .ok_or_else(|| VfsError::index(format!("node is not an array: {value}")))?;
    if fields.len() < min {
        return Err(VfsError::index(format!("node has {} fields, need {min}", fields.len())));
    }
    Ok(fields)
}

fn name(fields: &[Value]) -> VfsResult<String> {
    let name = fields[0]
        .as_str()
        .ok_or_else(|| VfsError::index("node name is not a string"))?;
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(VfsError::index(format!("invalid node name {name:?}")));
    }
    Ok(name.to_string())
}

fn parse_v3(value: &Value) -> VfsResult<IndexNode> {
    let fields = fields(value, 4)?;
    let name = name(fields)?;
    let size = fields[1].as_u64().unwrap_or(0);
    let mtime = fields[2].as_u64();
    let mode = fields[3]
        .as_u64()
        .ok_or_else(|| VfsError::index(format!("{name}: mode is not a number")))?;
    let target = fields.get(6).unwrap_or(&Value::Null);

    let (kind, children, link) = match mode & S_IFMT {
        S_IFDIR => {
            let children = match target.as_array() {
                Some(children) => parse_nodes(children, IndexVersion::V3)?,
                None => Vec::new(),
            };
            (FileType::Directory, children, None)
        }
        S_IFLNK => {
            let link = target
                .as_str()
                .ok_or_else(|| VfsError::index(format!("{name}: symlink without target")))?;
            (FileType::Symlink, Vec::new(), Some(link.to_string()))
        }
        _ => (FileType::File, Vec::new(), None),
    };

    Ok(IndexNode {
        name,
        kind,
        size,
        mode: (mode & 0o7777) as u32,
        mtime,
        target: link,
        children,
    })
}

fn parse_v4(value: &Value) -> VfsResult<IndexNode> {
    let fields = fields(value, 3)?;
    let name = name(fields)?;
    let tag = fields[1]
        .as_u64()
        .ok_or_else(|| VfsError::index(format!("{name}: kind is not a number")))?;
    let size = fields[2].as_u64().unwrap_or(0);
    let extra = fields.get(3).unwrap_or(&Value::Null);

    let node = |kind, mode, target, children| IndexNode {
        name: name.clone(),
        kind,
        size,
        mode,
        mtime: None,
        target,
        children,
    };

    match tag {
        0 => Ok(node(FileType::File, 0o644, None, Vec::new())),
        1 => {
            let children = match extra.as_array() {
                Some(children) => parse_nodes(children, IndexVersion::V4)?,
                None => Vec::new(),
            };
            Ok(node(FileType::Directory, 0o755, None, children))
        }
        2 => {
            let link = extra
                .as_str()
                .ok_or_else(|| VfsError::index(format!("{name}: symlink without target")))?;
            Ok(node(FileType::Symlink, 0o777, Some(link.to_string()), Vec::new()))
        }
        other => Err(VfsError::index(format!("{name}: unknown kind tag {other}"))),
    }
}
