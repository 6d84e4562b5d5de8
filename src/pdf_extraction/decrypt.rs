// Decryption gate: bytes (+ password) in, plaintext document handle out
use std::io::Write;
use std::sync::Arc;

use lopdf::Document;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::security::SecurityHandler;
use crate::types::{CamsError, Result};

/// A loaded, decrypted, page-addressable PDF.
pub struct DocumentHandle {
    document: Arc<Document>,
    plain_bytes: Vec<u8>,
    encrypted: bool,
    page_count: usize,
}

impl std::fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentHandle")
            .field("page_count", &self.page_count)
            .field("encrypted", &self.encrypted)
            .field("bytes", &self.plain_bytes.len())
            .finish()
    }
}

impl DocumentHandle {
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// A reference-counted view of the document for work moved off the async runtime.
    pub fn shared(&self) -> Arc<Document> {
        Arc::clone(&self.document)
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn was_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Plaintext bytes of the document, for engines that work on files.
    pub fn plain_bytes(&self) -> &[u8] {
        &self.plain_bytes
    }

    /// Write the plaintext document to a temporary `.pdf` file that lives as
    /// long as the returned guard.
    pub fn materialize(&self) -> std::io::Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("camsfolio_")
            .suffix(".pdf")
            .tempfile()?;
        file.write_all(&self.plain_bytes)?;
        file.flush()?;
        Ok(file)
    }
}

/// Open `bytes` as a PDF, unlocking it with `password` when it is encrypted.
///
/// The password is tried as the user password first and then as the owner
/// password. Unencrypted documents ignore the password.
pub fn open(bytes: &[u8], password: Option<&str>) -> Result<DocumentHandle> {
    let mut document = load(bytes)?;
    let Some(handler) = SecurityHandler::from_document(&document)? else {
        debug!("document is not encrypted");
        return Ok(handle(document, bytes.to_vec(), false));
    };
    debug!(version = handler.version(), revision = handler.revision(), "document is encrypted");

    let file_key = match password {
        Some(password) if !password.is_empty() => unlock_key(&handler, password.as_bytes())?,
        // An empty user password still opens many "protected" statements.
        _ => handler.user_key(b"").ok_or(CamsError::PasswordRequired)?,
    };

    handler.decrypt_document(&mut document, &file_key);
    let mut plain_bytes = Vec::with_capacity(bytes.len());
    document
        .save_to(&mut plain_bytes)
        .map_err(|err| CamsError::CorruptDocument(format!("re-serializing decrypted document: {err}")))?;
    // Object streams are only readable once their contents are plaintext.
    let document = load(&plain_bytes)?;
    Ok(handle(document, plain_bytes, true))
}

fn unlock_key(handler: &SecurityHandler, password: &[u8]) -> Result<Vec<u8>> {
    if let Some(key) = handler.user_key(password) {
        info!("unlocked document with user password");
        return Ok(key);
    }
    if let Some(key) = handler.owner_key(password) {
        info!("unlocked document with owner password");
        return Ok(key);
    }
    Err(CamsError::PasswordInvalid)
}

fn load(bytes: &[u8]) -> Result<Document> {
    if bytes.is_empty() {
        return Err(CamsError::CorruptDocument("empty input".into()));
    }
    Document::load_mem(bytes).map_err(|err| CamsError::CorruptDocument(err.to_string()))
}

fn handle(document: Document, plain_bytes: Vec<u8>, encrypted: bool) -> DocumentHandle {
    let page_count = document.get_pages().len();
    DocumentHandle {
        document: Arc::new(document),
        plain_bytes,
        encrypted,
        page_count,
    }
}
