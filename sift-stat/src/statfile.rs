//! On-disk statfiles and the pool that keeps them open.
//!
//! A statfile is a fixed-capacity table of token weights. Files are
//! `bincode`-encoded; writes go to a temporary file that is renamed over the
//! original so a crash mid-flush never leaves a torn statfile behind.

use std::{
    collections::HashMap,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, SerializationError, StatError},
    tokenizer::Token,
};

/// Bytes of statfile capacity taken by one block
pub const BLOCK_SIZE: u64 = 16;

/// Weight of a token that has never been trained
pub const NEUTRAL_WEIGHT: f32 = 1.0;

const VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct StatBlock {
    h1: u32,
    h2: u32,
    value: f32,
    hits: u32,
}

impl StatBlock {
    const fn key(&self) -> (u32, u32) {
        (self.h1, self.h2)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Statfile {
    version: u32,
    capacity: usize,
    /// Sorted by `(h1, h2)`
    blocks: Vec<StatBlock>,
}

impl Statfile {
    const fn new(capacity: usize) -> Self {
        Self {
            version: VERSION,
            capacity,
            blocks: Vec::new(),
        }
    }

    fn find(&self, token: Token) -> std::result::Result<usize, usize> {
        self.blocks
            .binary_search_by_key(&(token.h1, token.h2), StatBlock::key)
    }

    fn get(&self, token: Token) -> Option<f32> {
        self.find(token).ok().map(|index| self.blocks[index].value)
    }

    fn set(&mut self, token: Token, value: f32) {
        match self.find(token) {
            Ok(index) => {
                let block = &mut self.blocks[index];
                block.value = value;
                block.hits = block.hits.saturating_add(1);
            }
            Err(_) if self.capacity == 0 => {}
            Err(mut index) => {
                if self.blocks.len() >= self.capacity {
                    let evict = self.least_informative();
                    self.blocks.remove(evict);
                    if evict < index {
                        index -= 1;
                    }
                }

                self.blocks.insert(
                    index,
                    StatBlock {
                        h1: token.h1,
                        h2: token.h2,
                        value,
                        hits: 1,
                    },
                );
            }
        }
    }

    /// Index of the block whose weight is closest to neutral
    fn least_informative(&self) -> usize {
        self.blocks
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                (a.value - NEUTRAL_WEIGHT)
                    .abs()
                    .total_cmp(&(b.value - NEUTRAL_WEIGHT).abs())
            })
            .map_or(0, |(index, _)| index)
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(
            self,
            bincode::config::standard(),
        )?)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let (file, _): (Self, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;

        if file.version != VERSION {
            return Err(SerializationError::Version(file.version).into());
        }

        Ok(file)
    }
}

struct OpenStatfile {
    file: Statfile,
    dirty: bool,
}

/// The statfiles this process currently has open, keyed by path
#[derive(Default)]
pub struct StatfilePool {
    files: HashMap<PathBuf, OpenStatfile>,
}

impl StatfilePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    ///
    /// Open the statfile at `path`, if it isn't already
    ///
    /// # Errors
    /// [`StatError::NotFound`] if there is no such file, otherwise any error
    /// reading or decoding it
    ///
    pub fn open(&mut self, path: &Path) -> Result<()> {
        if self.is_open(path) {
            return Ok(());
        }

        let bytes = fs::read(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                StatError::NotFound(path.to_path_buf())
            } else {
                StatError::Io(err)
            }
        })?;

        let file = Statfile::decode(&bytes)?;
        tracing::debug!(
            path = %path.display(),
            blocks = file.blocks.len(),
            capacity = file.capacity,
            "Opened statfile"
        );

        self.files
            .insert(path.to_path_buf(), OpenStatfile { file, dirty: false });

        Ok(())
    }

    ///
    /// Create an empty statfile with room for `blocks` tokens
    ///
    /// The file is written to disk but not opened.
    ///
    /// # Errors
    /// If the file already exists, or cannot be written
    ///
    pub fn create(&self, path: &Path, blocks: u64) -> Result<()> {
        let capacity = usize::try_from(blocks).unwrap_or(usize::MAX);
        let bytes = Statfile::new(capacity).encode()?;

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;

        tracing::info!(path = %path.display(), capacity, "Created statfile");

        Ok(())
    }

    fn opened(&self, path: &Path) -> Result<&OpenStatfile> {
        self.files
            .get(path)
            .ok_or_else(|| StatError::NotOpen(path.to_path_buf()))
    }

    ///
    /// # Errors
    /// If the statfile is not open
    ///
    pub fn get(&self, path: &Path, token: Token) -> Result<Option<f32>> {
        Ok(self.opened(path)?.file.get(token))
    }

    ///
    /// Store the weight of `token`, evicting the least informative block when full
    ///
    /// # Errors
    /// If the statfile is not open
    ///
    pub fn set(&mut self, path: &Path, token: Token, value: f32) -> Result<()> {
        let open = self
            .files
            .get_mut(path)
            .ok_or_else(|| StatError::NotOpen(path.to_path_buf()))?;

        open.file.set(token, value);
        open.dirty = true;

        Ok(())
    }

    ///
    /// Number of tokens stored in an open statfile
    ///
    /// # Errors
    /// If the statfile is not open
    ///
    pub fn len(&self, path: &Path) -> Result<usize> {
        Ok(self.opened(path)?.file.blocks.len())
    }

    ///
    /// Write an open statfile back to disk if it has changed
    ///
    /// # Errors
    /// If the statfile is not open, or cannot be written
    ///
    pub fn flush(&mut self, path: &Path) -> Result<()> {
        let open = self
            .files
            .get_mut(path)
            .ok_or_else(|| StatError::NotOpen(path.to_path_buf()))?;

        if !open.dirty {
            return Ok(());
        }

        let bytes = open.file.encode()?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;

        open.dirty = false;
        tracing::trace!(path = %path.display(), "Flushed statfile");

        Ok(())
    }

    /// Drop an open statfile without flushing it
    pub fn close(&mut self, path: &Path) {
        self.files.remove(path);
    }
}

impl std::fmt::Debug for StatfilePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatfilePool")
            .field("open", &self.files.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    const fn token(h1: u32, h2: u32) -> Token {
        Token { h1, h2 }
    }

    #[test]
    fn open_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("spam");

        let mut pool = StatfilePool::new();
        assert!(matches!(pool.open(&path), Err(StatError::NotFound(p)) if p == path));
        assert!(!pool.is_open(&path));
    }

    #[test]
    fn create_then_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("spam");

        let mut pool = StatfilePool::new();
        pool.create(&path, 8).unwrap();
        pool.open(&path).unwrap();

        assert!(pool.is_open(&path));
        assert_eq!(pool.len(&path).unwrap(), 0);
        assert_eq!(pool.get(&path, token(1, 2)).unwrap(), None);
    }

    #[test]
    fn create_refuses_to_clobber() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("spam");

        let pool = StatfilePool::new();
        pool.create(&path, 8).unwrap();
        assert!(matches!(pool.create(&path, 8), Err(StatError::Io(_))));
    }

    #[test]
    fn create_in_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("spam");

        assert!(StatfilePool::new().create(&path, 8).is_err());
    }

    #[test]
    fn unopened_statfile_is_rejected() {
        let mut pool = StatfilePool::new();
        let path = Path::new("/nonexistent/spam");

        assert!(matches!(pool.get(path, token(1, 1)), Err(StatError::NotOpen(_))));
        assert!(matches!(
            pool.set(path, token(1, 1), 2.0),
            Err(StatError::NotOpen(_))
        ));
        assert!(matches!(pool.flush(path), Err(StatError::NotOpen(_))));
    }

    #[test]
    fn weights_survive_flush_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("spam");

        let mut pool = StatfilePool::new();
        pool.create(&path, 8).unwrap();
        pool.open(&path).unwrap();
        pool.set(&path, token(3, 4), 1.5).unwrap();
        pool.set(&path, token(1, 2), 0.5).unwrap();
        pool.flush(&path).unwrap();
        pool.close(&path);

        let mut pool = StatfilePool::new();
        pool.open(&path).unwrap();
        assert_eq!(pool.get(&path, token(3, 4)).unwrap(), Some(1.5));
        assert_eq!(pool.get(&path, token(1, 2)).unwrap(), Some(0.5));
        assert_eq!(pool.len(&path).unwrap(), 2);
    }

    #[test]
    fn full_statfile_evicts_most_neutral_block() {
        let mut file = Statfile::new(2);
        file.set(token(1, 1), 3.0);
        file.set(token(2, 2), 1.1);
        file.set(token(3, 3), 0.2);

        assert_eq!(file.blocks.len(), 2);
        assert_eq!(file.get(token(1, 1)), Some(3.0));
        assert_eq!(file.get(token(2, 2)), None);
        assert_eq!(file.get(token(3, 3)), Some(0.2));
    }

    #[test]
    fn updating_existing_token_does_not_evict() {
        let mut file = Statfile::new(1);
        file.set(token(1, 1), 2.0);
        file.set(token(1, 1), 4.0);

        assert_eq!(file.blocks.len(), 1);
        assert_eq!(file.get(token(1, 1)), Some(4.0));
        assert_eq!(file.blocks[0].hits, 2);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("spam");
        fs::write(&path, [0xff; 3]).unwrap();

        assert!(matches!(
            StatfilePool::new().open(&path),
            Err(StatError::Serialization(_))
        ));
    }
}
