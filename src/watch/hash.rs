// src/watch/hash.rs

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blake3::Hasher;
use tracing::{debug, info};

use crate::fs::FileSystem;
use crate::types::HashStorageMode;

/// Hash file location relative to the config root.
pub const HASH_FILE_PATH: &str = ".devrunner/hashes";

/// blake3 of one file's content, hex encoded.
pub fn compute_file_hash(fs: &dyn FileSystem, path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut reader = fs
        .open_read(path)
        .with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Combine per-file hashes into one. Callers pass them ordered by path.
pub fn compute_aggregate_hash<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (&'a Path, &'a str)>,
{
    let mut hasher = Hasher::new();
    for (path, hash) in entries {
        // The path takes part so a rename counts as a change.
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(&[0]);
        hasher.update(hash.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Last seen aggregate hash per source.
pub trait HashStore: Send + Sync {
    fn load(&self, source: &str) -> Result<Option<String>>;
    fn save(&mut self, source: &str, hash: &str) -> Result<()>;
    /// Forget sources that are no longer configured.
    fn prune(&mut self, active: &[&str]) -> Result<()>;
}

/// Pick the store for `mode`; `root` is where `.devrunner/` lives.
pub fn open_hash_store(mode: HashStorageMode, root: &Path) -> Box<dyn HashStore> {
    match mode {
        HashStorageMode::File => Box::new(FileHashStore::new(root.to_path_buf())),
        HashStorageMode::Memory => Box::new(MemoryHashStore::default()),
    }
}

/// `<root>/.devrunner/hashes`, one `name hash` pair per line.
#[derive(Debug)]
pub struct FileHashStore {
    root: PathBuf,
}

impl FileHashStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path(&self) -> PathBuf {
        self.root.join(HASH_FILE_PATH)
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        let path = self.path();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e).with_context(|| format!("reading hash file at {:?}", path)),
        };

        Ok(text
            .lines()
            .filter_map(|line| line.trim().split_once(char::is_whitespace))
            .map(|(name, hash)| (name.to_string(), hash.trim().to_string()))
            .collect())
    }

    fn write_all(&self, map: &BTreeMap<String, String>) -> Result<()> {
        let path = self.path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating hash directory at {:?}", parent))?;
        }
        let file = fs::File::create(&path).with_context(|| format!("creating hash file at {:?}", path))?;
        let mut writer = BufWriter::new(file);
        for (name, hash) in map {
            writeln!(writer, "{name} {hash}")?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl HashStore for FileHashStore {
    fn load(&self, source: &str) -> Result<Option<String>> {
        Ok(self.read_all()?.remove(source))
    }

    fn save(&mut self, source: &str, hash: &str) -> Result<()> {
        let mut map = self.read_all()?;
        map.insert(source.to_string(), hash.to_string());
        self.write_all(&map)?;
        debug!(source = %source, hash = %hash, "stored source hash (file)");
        Ok(())
    }

    fn prune(&mut self, active: &[&str]) -> Result<()> {
        let mut map = self.read_all()?;
        let before = map.len();
        map.retain(|k, _| active.contains(&k.as_str()));
        if map.len() < before {
            self.write_all(&map)?;
            info!(removed = before - map.len(), "pruned stale source hashes");
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryHashStore {
    map: BTreeMap<String, String>,
}

impl HashStore for MemoryHashStore {
    fn load(&self, source: &str) -> Result<Option<String>> {
        Ok(self.map.get(source).cloned())
    }

    fn save(&mut self, source: &str, hash: &str) -> Result<()> {
        self.map.insert(source.to_string(), hash.to_string());
        debug!(source = %source, hash = %hash, "stored source hash (memory)");
        Ok(())
    }

    fn prune(&mut self, active: &[&str]) -> Result<()> {
        self.map.retain(|k, _| active.contains(&k.as_str()));
        Ok(())
    }
}
