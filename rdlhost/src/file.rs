//! Hosted-file records and their memory mappings.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::Mutex;

use crate::HOST_ROOT;
use crate::errors::HostError;

/// File catalog of one host server, keyed by absolute source path.
#[derive(Default)]
pub(crate) struct FileTable {
    pub files: HashMap<String, HostFile>,
    pub counter: u32,
}

pub(crate) type SharedTable = Arc<Mutex<FileTable>>;

#[derive(Debug)]
pub(crate) struct HostFile {
    pub id: u32,
    pub clients: Vec<String>,
    pub mime_type: String,
    pub url_path: String,
    /// Live mapping shared by every in-flight response.
    /// Invariant: `mapping.is_some()` iff `mapped_count > 0`.
    pub mapping: Option<Arc<Mmap>>,
    pub mapped_count: u32,
}

impl HostFile {
    pub fn new(source: &Path, id: u32) -> Result<Self, HostError> {
        if !source.is_file() {
            return Err(HostError::ObjectNotFound(source.display().to_string()));
        }

        let mime_type = mime_guess::from_path(source)
            .first()
            .ok_or_else(|| HostError::BadMime(source.display().to_string()))?
            .to_string();

        // The extension in the URL is cosmetic; routing is by exact match.
        let extension = source
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();

        Ok(Self {
            id,
            clients: Vec::new(),
            mime_type,
            url_path: format!("{}/{}{}", HOST_ROOT, id, extension),
            mapping: None,
            mapped_count: 0,
        })
    }

    pub fn has_client(&self, client: &str) -> bool {
        self.clients.iter().any(|c| c == client)
    }

    /// Removes `client` from the client set. False if it was not registered.
    pub fn remove_client(&mut self, client: &str) -> bool {
        match self.clients.iter().position(|c| c == client) {
            Some(pos) => {
                self.clients.remove(pos);
                true
            }
            None => false,
        }
    }
}

impl FileTable {
    /// Register `client` for `source`, creating the record on first sight.
    /// Adding the same client twice is a no-op (set semantics).
    pub fn add_file(&mut self, client: &str, source: &str) -> Result<String, HostError> {
        if let Some(file) = self.files.get_mut(source) {
            if !file.has_client(client) {
                file.clients.push(client.to_string());
            }
            return Ok(file.url_path.clone());
        }

        let mut file = HostFile::new(Path::new(source), self.counter)?;
        self.counter += 1;
        file.clients.push(client.to_string());

        let url_path = file.url_path.clone();
        self.files.insert(source.to_string(), file);
        Ok(url_path)
    }

    /// Source path of the record published under `url_path`, if any.
    pub fn source_for_url(&self, url_path: &str) -> Option<String> {
        self.files
            .iter()
            .find(|(_, file)| file.url_path == url_path)
            .map(|(source, _)| source.clone())
    }
}

/// Decrements the source file's mapping reference when an HTTP response body
/// has been fully written (or abandoned). The mapping slot is nulled when the
/// count returns to zero; the mapped bytes themselves stay valid until the
/// last `Arc<Mmap>` clone is gone.
pub(crate) struct MapRelease {
    pub table: SharedTable,
    pub source: String,
}

impl Drop for MapRelease {
    fn drop(&mut self) {
        let mut table = self.table.lock();

        if let Some(file) = table.files.get_mut(&self.source) {
            if file.mapped_count > 0 {
                file.mapped_count -= 1;

                if file.mapped_count == 0 {
                    file.mapping = None;
                }
            }
        }
    }
}

/// Zero-copy response body: the mapped bytes plus the release hook.
pub(crate) struct MappedBody {
    pub map: Arc<Mmap>,
    pub _release: MapRelease,
}

impl AsRef<[u8]> for MappedBody {
    fn as_ref(&self) -> &[u8] {
        &self.map
    }
}
