//! Filesystem-backed [`StorageDriver`].
//!
//! Maps the driver's `/`-rooted path tree directly onto a directory on
//! local disk. This is the production backend; [`crate::MemoryDriver`]
//! exists purely for tests that don't want to touch disk.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use crate::driver::{validate_path, ContentReader, FileInfo, FileWriter, StorageDriver, WalkAction};
use crate::error::StorageError;

pub struct FsDriver {
    root: PathBuf,
}

impl FsDriver {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        validate_path(path)?;
        let mut out = self.root.clone();
        for component in Path::new(path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(seg) => out.push(seg),
                Component::CurDir => {}
                _ => return Err(StorageError::InvalidPath(path.to_string())),
            }
        }
        Ok(out)
    }

    fn to_virtual(&self, real: &Path) -> String {
        let rel = real.strip_prefix(&self.root).unwrap_or(real);
        let s = rel.to_string_lossy().replace('\\', "/");
        format!("/{}", s)
    }

    async fn walk_dir(
        real_dir: PathBuf,
        virtual_prefix: String,
        visitor: &mut (dyn for<'a> FnMut(&'a FileInfo) -> WalkAction + Send),
    ) -> Result<(), StorageError> {
        let mut stack = vec![(real_dir, virtual_prefix)];
        while let Some((dir, vpath)) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::Io(e)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                let name = entry.file_name().to_string_lossy().to_string();
                let child_vpath = format!("{}/{}", vpath.trim_end_matches('/'), name);
                if meta.is_dir() {
                    let action = visitor(&FileInfo {
                        path: child_vpath.clone(),
                        size: 0,
                        is_dir: true,
                        modified: meta
                            .modified()
                            .map(DateTime::<Utc>::from)
                            .unwrap_or_else(|_| Utc::now()),
                    });
                    if action == WalkAction::Continue {
                        stack.push((entry.path(), child_vpath));
                    }
                } else {
                    visitor(&FileInfo {
                        path: child_vpath,
                        size: meta.len(),
                        is_dir: false,
                        modified: meta
                            .modified()
                            .map(DateTime::<Utc>::from)
                            .unwrap_or_else(|_| Utc::now()),
                    });
                }
            }
        }
        Ok(())
    }

    fn not_found_or_io(path: &str, e: std::io::Error) -> StorageError {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::PathNotFound(path.to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

#[async_trait]
impl StorageDriver for FsDriver {
    async fn get_content(&self, path: &str) -> Result<Bytes, StorageError> {
        let real = self.resolve(path)?;
        let data = fs::read(&real)
            .await
            .map_err(|e| Self::not_found_or_io(path, e))?;
        Ok(Bytes::from(data))
    }

    async fn put_content(&self, path: &str, content: Bytes) -> Result<(), StorageError> {
        let real = self.resolve(path)?;
        if let Some(parent) = real.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = real.with_extension("tmp-write");
        fs::write(&tmp, &content).await?;
        fs::rename(&tmp, &real).await?;
        Ok(())
    }

    async fn reader(&self, path: &str, offset: u64) -> Result<ContentReader, StorageError> {
        let real = self.resolve(path)?;
        let mut file = fs::File::open(&real)
            .await
            .map_err(|e| Self::not_found_or_io(path, e))?;
        let size = file.metadata().await?.len();
        if offset > size {
            return Err(StorageError::InvalidOffset {
                path: path.to_string(),
                offset: offset as i64,
            });
        }
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        Ok(Box::pin(file))
    }

    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn FileWriter>, StorageError> {
        let real = self.resolve(path)?;
        if let Some(parent) = real.parent() {
            fs::create_dir_all(parent).await?;
        }
        let initial_size = if append {
            fs::metadata(&real).await.map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&real)
            .await?;
        debug!("opened writer at {:?} (append={})", real, append);
        Ok(Box::new(FsWriter {
            path: real,
            file: Some(file),
            size: initial_size,
            sealed: false,
            cancelled: false,
        }))
    }

    async fn stat(&self, path: &str) -> Result<FileInfo, StorageError> {
        let real = self.resolve(path)?;
        let meta = fs::metadata(&real)
            .await
            .map_err(|e| Self::not_found_or_io(path, e))?;
        let size = if meta.is_dir() {
            let mut total = 0u64;
            Self::walk_dir(real.clone(), path.trim_end_matches('/').to_string(), &mut |info| {
                if !info.is_dir {
                    total += info.size;
                }
                WalkAction::Continue
            })
            .await?;
            total
        } else {
            meta.len()
        };
        Ok(FileInfo {
            path: path.to_string(),
            size,
            is_dir: meta.is_dir(),
            modified: meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    async fn list(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let real = self.resolve(path)?;
        let meta = fs::metadata(&real)
            .await
            .map_err(|e| Self::not_found_or_io(path, e))?;
        if !meta.is_dir() {
            return Err(StorageError::NotADirectory(path.to_string()));
        }
        let mut entries = fs::read_dir(&real).await?;
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            out.push(self.to_virtual(&entry.path()));
        }
        Ok(out)
    }

    async fn mv(&self, source: &str, dest: &str) -> Result<(), StorageError> {
        let real_src = self.resolve(source)?;
        let real_dst = self.resolve(dest)?;
        if fs::metadata(&real_src).await.is_err() {
            return Err(StorageError::PathNotFound(source.to_string()));
        }
        if let Some(parent) = real_dst.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&real_src, &real_dst).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let real = self.resolve(path)?;
        let meta = fs::metadata(&real)
            .await
            .map_err(|e| Self::not_found_or_io(path, e))?;
        if meta.is_dir() {
            fs::remove_dir_all(&real).await?;
        } else {
            fs::remove_file(&real).await?;
        }
        Ok(())
    }

    async fn walk(
        &self,
        path: &str,
        visitor: &mut (dyn for<'a> FnMut(&'a FileInfo) -> WalkAction + Send),
    ) -> Result<(), StorageError> {
        let real = self.resolve(path)?;
        if fs::metadata(&real).await.is_err() {
            return Err(StorageError::PathNotFound(path.to_string()));
        }
        Self::walk_dir(real, path.trim_end_matches('/').to_string(), visitor).await
    }

    async fn usage(&self, path: &str) -> Result<u64, StorageError> {
        let real = self.resolve(path)?;
        if fs::metadata(&real).await.is_err() {
            return Ok(0);
        }
        let mut total = 0u64;
        Self::walk_dir(real, path.trim_end_matches('/').to_string(), &mut |info| {
            if !info.is_dir {
                total += info.size;
            }
            WalkAction::Continue
        })
        .await?;
        Ok(total)
    }
}

struct FsWriter {
    path: PathBuf,
    file: Option<fs::File>,
    size: u64,
    sealed: bool,
    cancelled: bool,
}

#[async_trait]
impl FileWriter for FsWriter {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, StorageError> {
        if self.sealed || self.cancelled {
            return Err(StorageError::Unsupported("writer already finalized"));
        }
        let file = self.file.as_mut().expect("writer open");
        file.write_all(buf).await?;
        self.size += buf.len() as u64;
        Ok(buf.len())
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn cancel(&mut self) -> Result<(), StorageError> {
        if self.sealed || self.cancelled {
            return Err(StorageError::Unsupported("writer already finalized"));
        }
        self.cancelled = true;
        self.file = None;
        match fs::remove_file(&self.path).await {
            Ok(()) | Err(_) => Ok(()),
        }
    }

    async fn commit(&mut self) -> Result<(), StorageError> {
        if self.sealed || self.cancelled {
            return Err(StorageError::Unsupported("writer already finalized"));
        }
        if let Some(file) = self.file.as_mut() {
            file.flush().await?;
        }
        self.sealed = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        self.file = None;
        Ok(())
    }
}
