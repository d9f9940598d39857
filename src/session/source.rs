use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use crate::engine::DocumentInput;
use crate::error::OpenError;

/// Backing data of an open document
///
/// The engine reads from the source lazily, so a session keeps it alive
/// until its document handle has been released.
#[derive(Debug)]
pub enum DocumentSource {
    /// Document read from an open file
    File(File),
    /// Document loaded from owned bytes
    Bytes(Arc<Vec<u8>>),
}

impl DocumentSource {
    /// Create source from bytes
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self::Bytes(Arc::new(data))
    }

    /// Open a file-backed source
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, OpenError> {
        Ok(Self::File(File::open(path)?))
    }

    pub(crate) fn input(&self) -> DocumentInput<'_> {
        match self {
            DocumentSource::File(file) => DocumentInput::File(file),
            DocumentSource::Bytes(bytes) => DocumentInput::Bytes(bytes.as_slice()),
        }
    }
}

impl From<File> for DocumentSource {
    fn from(file: File) -> Self {
        Self::File(file)
    }
}

impl From<Vec<u8>> for DocumentSource {
    fn from(data: Vec<u8>) -> Self {
        Self::from_bytes(data)
    }
}

impl From<Arc<Vec<u8>>> for DocumentSource {
    fn from(data: Arc<Vec<u8>>) -> Self {
        Self::Bytes(data)
    }
}
