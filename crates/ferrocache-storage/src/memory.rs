//! In-memory [`StorageDriver`] used by tests and by any caller that
//! wants a driver with no filesystem footprint.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

use crate::driver::{validate_path, ContentReader, FileInfo, FileWriter, StorageDriver, WalkAction};
use crate::error::StorageError;

#[derive(Debug, Clone)]
enum Node {
    Dir(BTreeMap<String, Node>),
    File(FileNode),
}

#[derive(Debug, Clone)]
struct FileNode {
    bytes: Vec<u8>,
    modified: chrono::DateTime<Utc>,
}

fn split(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// A tree of `dir`/`file` nodes guarded by a single mutex, matching the
/// reference in-memory driver's "one lock over the whole tree" model.
pub struct MemoryDriver {
    root: Arc<Mutex<Node>>,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self {
            root: Arc::new(Mutex::new(Node::Dir(BTreeMap::new()))),
        }
    }

    fn navigate<'a>(root: &'a Node, segments: &[&str]) -> Option<&'a Node> {
        let mut current = root;
        for seg in segments {
            match current {
                Node::Dir(children) => current = children.get(*seg)?,
                Node::File(_) => return None,
            }
        }
        Some(current)
    }

    fn navigate_mut<'a>(root: &'a mut Node, segments: &[&str]) -> Option<&'a mut Node> {
        let mut current = root;
        for seg in segments {
            match current {
                Node::Dir(children) => current = children.get_mut(*seg)?,
                Node::File(_) => return None,
            }
        }
        Some(current)
    }

    /// Create (if needed) every directory on the way to `segments`,
    /// returning a mutable reference to the parent directory map.
    fn mkdirp_parent<'a>(
        root: &'a mut Node,
        segments: &[&str],
    ) -> Result<&'a mut BTreeMap<String, Node>, StorageError> {
        let mut current = root;
        for seg in segments {
            match current {
                Node::Dir(children) => {
                    current = children
                        .entry(seg.to_string())
                        .or_insert_with(|| Node::Dir(BTreeMap::new()));
                }
                Node::File(_) => {
                    return Err(StorageError::InvalidPath(format!(
                        "{} is a file, not a directory",
                        seg
                    )));
                }
            }
        }
        match current {
            Node::Dir(children) => Ok(children),
            Node::File(_) => unreachable!(),
        }
    }

    fn remove(root: &mut Node, segments: &[&str]) -> Option<Node> {
        if segments.is_empty() {
            return None;
        }
        let (last, parents) = segments.split_last().unwrap();
        let parent = Self::navigate_mut(root, parents)?;
        match parent {
            Node::Dir(children) => children.remove(*last),
            Node::File(_) => None,
        }
    }

    fn put(root: &mut Node, segments: &[&str], bytes: Vec<u8>) -> Result<(), StorageError> {
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| StorageError::InvalidPath("/".to_string()))?;
        let parent = Self::mkdirp_parent(root, parents)?;
        parent.insert(
            last.to_string(),
            Node::File(FileNode {
                bytes,
                modified: Utc::now(),
            }),
        );
        Ok(())
    }

    fn walk_node(node: &Node, prefix: &str, visitor: &mut dyn for<'a> FnMut(&'a FileInfo) -> WalkAction) {
        match node {
            Node::File(f) => {
                visitor(&FileInfo {
                    path: prefix.to_string(),
                    size: f.bytes.len() as u64,
                    is_dir: false,
                    modified: f.modified,
                });
            }
            Node::Dir(children) => {
                for (name, child) in children {
                    let child_path = if prefix == "/" {
                        format!("/{}", name)
                    } else {
                        format!("{}/{}", prefix, name)
                    };
                    match child {
                        Node::Dir(_) => {
                            let action = visitor(&FileInfo {
                                path: child_path.clone(),
                                size: 0,
                                is_dir: true,
                                modified: Utc::now(),
                            });
                            if action == WalkAction::Continue {
                                Self::walk_node(child, &child_path, visitor);
                            }
                        }
                        Node::File(_) => {
                            Self::walk_node(child, &child_path, visitor);
                        }
                    }
                }
            }
        }
    }

    fn usage_node(node: &Node) -> u64 {
        match node {
            Node::File(f) => f.bytes.len() as u64,
            Node::Dir(children) => children.values().map(Self::usage_node).sum(),
        }
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    async fn get_content(&self, path: &str) -> Result<Bytes, StorageError> {
        validate_path(path)?;
        let segments = split(path);
        let root = self.root.lock();
        match Self::navigate(&root, &segments) {
            Some(Node::File(f)) => Ok(Bytes::from(f.bytes.clone())),
            Some(Node::Dir(_)) => Err(StorageError::InvalidPath(path.to_string())),
            None => Err(StorageError::PathNotFound(path.to_string())),
        }
    }

    async fn put_content(&self, path: &str, content: Bytes) -> Result<(), StorageError> {
        validate_path(path)?;
        let segments = split(path);
        let mut root = self.root.lock();
        Self::put(&mut root, &segments, content.to_vec())
    }

    async fn reader(&self, path: &str, offset: u64) -> Result<ContentReader, StorageError> {
        validate_path(path)?;
        let segments = split(path);
        let root = self.root.lock();
        let bytes = match Self::navigate(&root, &segments) {
            Some(Node::File(f)) => f.bytes.clone(),
            Some(Node::Dir(_)) => return Err(StorageError::InvalidPath(path.to_string())),
            None => return Err(StorageError::PathNotFound(path.to_string())),
        };
        if offset as usize > bytes.len() {
            return Err(StorageError::InvalidOffset {
                path: path.to_string(),
                offset: offset as i64,
            });
        }
        let remaining = bytes[offset as usize..].to_vec();
        Ok(Box::pin(BytesReader { data: remaining, pos: 0 }))
    }

    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn FileWriter>, StorageError> {
        validate_path(path)?;
        let initial = if append {
            let segments = split(path);
            let root = self.root.lock();
            match Self::navigate(&root, &segments) {
                Some(Node::File(f)) => f.bytes.clone(),
                Some(Node::Dir(_)) => return Err(StorageError::InvalidPath(path.to_string())),
                None => Vec::new(),
            }
        } else {
            Vec::new()
        };

        Ok(Box::new(MemoryWriter {
            root: self.root.clone(),
            path: path.to_string(),
            buffer: initial,
            sealed: false,
            cancelled: false,
        }))
    }

    async fn stat(&self, path: &str) -> Result<FileInfo, StorageError> {
        validate_path(path)?;
        let segments = split(path);
        let root = self.root.lock();
        if segments.is_empty() {
            return Ok(FileInfo {
                path: "/".to_string(),
                size: Self::usage_node(&root),
                is_dir: true,
                modified: Utc::now(),
            });
        }
        match Self::navigate(&root, &segments) {
            Some(Node::File(f)) => Ok(FileInfo {
                path: path.to_string(),
                size: f.bytes.len() as u64,
                is_dir: false,
                modified: f.modified,
            }),
            Some(node @ Node::Dir(_)) => Ok(FileInfo {
                path: path.to_string(),
                size: Self::usage_node(node),
                is_dir: true,
                modified: Utc::now(),
            }),
            None => Err(StorageError::PathNotFound(path.to_string())),
        }
    }

    async fn list(&self, path: &str) -> Result<Vec<String>, StorageError> {
        validate_path(path)?;
        let segments = split(path);
        let root = self.root.lock();
        let node = if segments.is_empty() {
            &root
        } else {
            Self::navigate(&root, &segments).ok_or_else(|| StorageError::PathNotFound(path.to_string()))?
        };
        match node {
            Node::Dir(children) => {
                let base = path.trim_end_matches('/');
                Ok(children
                    .keys()
                    .map(|name| format!("{}/{}", base, name))
                    .collect())
            }
            Node::File(_) => Err(StorageError::NotADirectory(path.to_string())),
        }
    }

    async fn mv(&self, source: &str, dest: &str) -> Result<(), StorageError> {
        validate_path(source)?;
        validate_path(dest)?;
        let src_segments = split(source);
        let dst_segments = split(dest);
        let mut root = self.root.lock();
        let node = Self::remove(&mut root, &src_segments)
            .ok_or_else(|| StorageError::PathNotFound(source.to_string()))?;
        let (last, parents) = dst_segments
            .split_last()
            .ok_or_else(|| StorageError::InvalidPath(dest.to_string()))?;
        let parent = Self::mkdirp_parent(&mut root, parents)?;
        parent.insert(last.to_string(), node);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        validate_path(path)?;
        let segments = split(path);
        let mut root = self.root.lock();
        Self::remove(&mut root, &segments)
            .map(|_| ())
            .ok_or_else(|| StorageError::PathNotFound(path.to_string()))
    }

    async fn walk(
        &self,
        path: &str,
        visitor: &mut (dyn for<'a> FnMut(&'a FileInfo) -> WalkAction + Send),
    ) -> Result<(), StorageError> {
        validate_path(path)?;
        let segments = split(path);
        let root = self.root.lock();
        let node = if segments.is_empty() {
            &root
        } else {
            Self::navigate(&root, &segments).ok_or_else(|| StorageError::PathNotFound(path.to_string()))?
        };
        Self::walk_node(node, path.trim_end_matches('/'), visitor);
        Ok(())
    }

    async fn usage(&self, path: &str) -> Result<u64, StorageError> {
        validate_path(path)?;
        let segments = split(path);
        let root = self.root.lock();
        let node = if segments.is_empty() {
            &root
        } else {
            match Self::navigate(&root, &segments) {
                Some(n) => n,
                None => return Ok(0),
            }
        };
        Ok(Self::usage_node(node))
    }
}

struct BytesReader {
    data: Vec<u8>,
    pos: usize,
}

impl AsyncRead for BytesReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let remaining = &this.data[this.pos..];
        let n = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}

struct MemoryWriter {
    root: Arc<Mutex<Node>>,
    path: String,
    buffer: Vec<u8>,
    sealed: bool,
    cancelled: bool,
}

#[async_trait]
impl FileWriter for MemoryWriter {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, StorageError> {
        if self.sealed || self.cancelled {
            return Err(StorageError::Unsupported("writer already finalized"));
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn size(&self) -> u64 {
        self.buffer.len() as u64
    }

    async fn cancel(&mut self) -> Result<(), StorageError> {
        if self.sealed || self.cancelled {
            return Err(StorageError::Unsupported("writer already finalized"));
        }
        self.cancelled = true;
        let segments = split(&self.path);
        let mut root = self.root.lock();
        MemoryDriver::remove(&mut root, &segments);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StorageError> {
        if self.sealed || self.cancelled {
            return Err(StorageError::Unsupported("writer already finalized"));
        }
        self.sealed = true;
        let segments = split(&self.path);
        let mut root = self.root.lock();
        MemoryDriver::put(&mut root, &segments, std::mem::take(&mut self.buffer))
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}
