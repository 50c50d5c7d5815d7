use crate::config::ServerConfig;
use crate::http::Outcome;
use log::{debug, error, warn};
use memmap2::Mmap;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Permission bit for "readable by others"
const OTHER_READ: u32 = 0o004;

/// The file backing a response: resolved path, size and memory mapping
///
/// A connection owns exactly one of these and reuses it for every request.
/// The mapping is released by [`ResolvedFile::release`], which is safe to call
/// any number of times; dropping the value releases it as well.
pub struct ResolvedFile {
    path: Vec<u8>,
    size: u64,
    map: Option<Mmap>,
}

impl ResolvedFile {
    pub fn new(path_capacity: usize) -> Self {
        Self {
            path: Vec::with_capacity(path_capacity),
            size: 0,
            map: None,
        }
    }

    /// Filesystem path of the last resolution
    pub fn path(&self) -> &Path {
        Path::new(OsStr::from_bytes(&self.path))
    }

    /// Size of the resolved file in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_mapped(&self) -> bool {
        self.map.is_some()
    }

    /// Mapped file contents, empty when nothing is mapped
    pub fn contents(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    /// Unmap the file. Returns whether a mapping was actually released.
    pub fn release(&mut self) -> bool {
        self.map.take().is_some()
    }

    /// Forget the last resolution, including its mapping
    pub fn clear(&mut self) {
        self.release();
        self.path.clear();
        self.size = 0;
    }
}

/// Maps request URLs onto files below the document root
#[derive(Debug, Clone)]
pub struct Resolver {
    document_root: PathBuf,
    path_capacity: usize,
}

impl Resolver {
    pub fn new<P: Into<PathBuf>>(document_root: P, path_capacity: usize) -> Self {
        Self {
            document_root: document_root.into(),
            path_capacity,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.document_root.clone(), config.path_buffer_size)
    }

    pub fn document_root(&self) -> &Path {
        &self.document_root
    }

    pub fn path_capacity(&self) -> usize {
        self.path_capacity
    }

    /// Resolve `url` into `file`, mapping the target on success
    ///
    /// Checks run in order: traversal, existence, other-read permission,
    /// directory. Any earlier mapping held by `file` is released first.
    pub fn resolve(&self, url: &[u8], file: &mut ResolvedFile) -> Outcome {
        file.clear();

        if url.split(|&b| b == b'/').any(|segment| segment == b"..") {
            warn!("rejecting parent segment in {}", String::from_utf8_lossy(url));
            return Outcome::BadRequest;
        }

        file.path.extend_from_slice(self.document_root.as_os_str().as_bytes());
        let room = self.path_capacity.saturating_sub(file.path.len() + 1);
        if url.len() > room {
            warn!(
                "path for {} truncated to {} bytes",
                String::from_utf8_lossy(url),
                self.path_capacity
            );
        }
        file.path.extend_from_slice(&url[..url.len().min(room)]);

        let path = Path::new(OsStr::from_bytes(&file.path));
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("stat {} failed: {}", path.display(), e);
                return Outcome::ResourceNotFound;
            }
        };

        if metadata.permissions().mode() & OTHER_READ == 0 {
            return Outcome::Forbidden;
        }
        if metadata.is_dir() {
            return Outcome::BadRequest;
        }
        if metadata.len() == 0 {
            return Outcome::FileReady;
        }

        let handle = match File::open(path) {
            Ok(handle) => handle,
            Err(e) => {
                error!("open {} failed: {}", path.display(), e);
                return Outcome::InternalError;
            }
        };
        // SAFETY: the mapping is read-only and private to this connection
        let map = match unsafe { Mmap::map(&handle) } {
            Ok(map) => map,
            Err(e) => {
                error!("mmap {} failed: {}", path.display(), e);
                return Outcome::InternalError;
            }
        };
        // The mapping keeps the contents alive; the descriptor is not needed
        drop(handle);

        file.size = map.len() as u64;
        file.map = Some(map);
        Outcome::FileReady
    }
}
