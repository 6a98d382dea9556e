//! File system seam.
//!
//! The token core routes the file-oriented instructions (SELECT by file id,
//! READ/UPDATE BINARY, CREATE/DELETE FILE) through this trait and feeds it
//! the authentication state. What the files mean is the backend's business.

use crate::error::TokenError;

/// Backend for the file-oriented instruction subset.
pub trait FileSystem {
    /// SELECT with a file-oriented P1 (anything but select-by-name).
    fn select(&mut self, p1: u8, p2: u8, data: &[u8]) -> Result<Vec<u8>, TokenError>;

    /// READ BINARY from the selected file.
    fn read(&self, offset: u16, len: usize) -> Result<Vec<u8>, TokenError>;

    /// UPDATE BINARY on the selected file.
    fn update(&mut self, offset: u16, data: &[u8]) -> Result<(), TokenError>;

    /// CREATE FILE from a file descriptor blob.
    fn create(&mut self, descriptor: &[u8]) -> Result<(), TokenError>;

    /// DELETE FILE by the two-byte identifier in the command data.
    fn delete(&mut self, data: &[u8]) -> Result<(), TokenError>;

    /// Called whenever the token's authentication state changes.
    fn set_authenticated(&mut self, authenticated: bool);
}

/// In-memory backend: flat identifier-to-contents map, one selected file.
///
/// Write operations require the authenticated flag the token core manages.
pub struct MemoryFileSystem {
    files: std::collections::BTreeMap<u16, Vec<u8>>,
    selected: Option<u16>,
    authenticated: bool,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self {
            files: std::collections::BTreeMap::new(),
            selected: None,
            authenticated: false,
        }
    }

    fn require_auth(&self) -> Result<(), TokenError> {
        if self.authenticated {
            Ok(())
        } else {
            Err(TokenError::SecurityStatusNotSatisfied)
        }
    }

    fn file_id(data: &[u8]) -> Result<u16, TokenError> {
        if data.len() != 2 {
            return Err(TokenError::WrongLength);
        }
        Ok(((data[0] as u16) << 8) | data[1] as u16)
    }
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MemoryFileSystem {
    fn select(&mut self, _p1: u8, _p2: u8, data: &[u8]) -> Result<Vec<u8>, TokenError> {
        let id = Self::file_id(data)?;
        if self.files.contains_key(&id) {
            self.selected = Some(id);
            Ok(Vec::new())
        } else {
            Err(TokenError::FileNotFound)
        }
    }

    fn read(&self, offset: u16, len: usize) -> Result<Vec<u8>, TokenError> {
        let id = self.selected.ok_or(TokenError::CommandNotAllowed)?;
        let contents = self.files.get(&id).ok_or(TokenError::FileNotFound)?;
        let start = offset as usize;
        if start > contents.len() {
            return Err(TokenError::IncorrectP1P2);
        }
        let end = contents.len().min(start + len);
        Ok(contents[start..end].to_vec())
    }

    fn update(&mut self, offset: u16, data: &[u8]) -> Result<(), TokenError> {
        self.require_auth()?;
        let id = self.selected.ok_or(TokenError::CommandNotAllowed)?;
        let contents = self.files.get_mut(&id).ok_or(TokenError::FileNotFound)?;
        let start = offset as usize;
        if start > contents.len() {
            return Err(TokenError::IncorrectP1P2);
        }
        let end = start + data.len();
        if end > contents.len() {
            contents.resize(end, 0);
        }
        contents[start..end].copy_from_slice(data);
        Ok(())
    }

    fn create(&mut self, descriptor: &[u8]) -> Result<(), TokenError> {
        self.require_auth()?;
        let id = Self::file_id(descriptor.get(..2).ok_or(TokenError::WrongLength)?)?;
        if self.files.contains_key(&id) {
            return Err(TokenError::DataInvalid);
        }
        self.files.insert(id, Vec::new());
        Ok(())
    }

    fn delete(&mut self, data: &[u8]) -> Result<(), TokenError> {
        self.require_auth()?;
        let id = Self::file_id(data)?;
        if self.files.remove(&id).is_none() {
            return Err(TokenError::FileNotFound);
        }
        if self.selected == Some(id) {
            self.selected = None;
        }
        Ok(())
    }

    fn set_authenticated(&mut self, authenticated: bool) {
        self.authenticated = authenticated;
    }
}
