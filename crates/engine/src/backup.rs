//! Backup archives and retention
//!
//! `shapedb-<timestamp>.backup.tar.zst` contains:
//! - `MANIFEST.json` - format version, document counts, xxh3 checksums
//! - `<collection>.jsonl` - one extended-JSON document per line
//!
//! Archives are written to a temp file and renamed into place, so a failed
//! backup never leaves a partial archive behind. After a successful write
//! only the newest `retain` archives are kept.

use crate::database::BackupConfig;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shapedb_core::{Document, Error, Result, Value};
use shapedb_storage::{DocumentStore, FindOptions};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, Header};
use tracing::{error, info, warn};

/// Archive format version
pub const BACKUP_FORMAT_VERSION: u32 = 1;

/// Manifest entry name
pub const MANIFEST: &str = "MANIFEST.json";

const PREFIX: &str = "shapedb-";
const SUFFIX: &str = ".backup.tar.zst";

/// Archive metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    /// Archive format version
    pub format_version: u32,
    /// Crate version that wrote the archive
    pub writer_version: String,
    /// RFC 3339 creation time
    pub created_at: String,
    /// Documents per collection
    pub collections: BTreeMap<String, u64>,
    /// xxh3 checksum per entry
    pub checksums: BTreeMap<String, String>,
}

/// Decoded archive
#[derive(Debug, Clone, PartialEq)]
pub struct BackupContents {
    /// Archive metadata
    pub manifest: BackupManifest,
    /// Documents per collection
    pub collections: BTreeMap<String, Vec<Document>>,
}

fn xxh3_hex(data: &[u8]) -> String {
    use xxhash_rust::xxh3::xxh3_64;
    format!("{:016x}", xxh3_64(data))
}

fn entry_name(collection: &str) -> String {
    format!("{}.jsonl", collection)
}

fn serialization(e: serde_json::Error) -> Error {
    Error::Serialization(e.to_string())
}

/// Exports collections through the storage capability
pub struct BackupManager {
    config: BackupConfig,
}

impl BackupManager {
    /// Create a manager for the given settings
    pub fn new(config: BackupConfig) -> Self {
        BackupManager { config }
    }

    /// Export and prune, reporting success as a boolean
    ///
    /// Failures are logged, never returned.
    pub async fn run(&self, store: &dyn DocumentStore, collections: &[&str]) -> bool {
        let Some(directory) = self.config.directory.as_deref() else {
            warn!("Backup requested but no backup directory is configured");
            return false;
        };
        match self.export(store, collections, directory).await {
            Ok(path) => {
                if let Err(e) = prune(directory, self.config.retain) {
                    warn!(directory = %directory.display(), error = %e, "Failed to prune old backups");
                }
                info!(path = %path.display(), collections = collections.len(), "Backup written");
                true
            }
            Err(e) => {
                error!(directory = %directory.display(), error = %e, "Backup failed");
                false
            }
        }
    }

    /// Write one archive into `directory`, returning its path
    pub async fn export(
        &self,
        store: &dyn DocumentStore,
        collections: &[&str],
        directory: &Path,
    ) -> Result<PathBuf> {
        let mut dumped = Vec::with_capacity(collections.len());
        for name in collections {
            let docs = store.find(name, &Document::new(), &FindOptions::new()).await?;
            dumped.push((name.to_string(), docs));
        }

        let now = Utc::now();
        let path = directory.join(format!("{}{}{}", PREFIX, now.format("%Y%m%dT%H%M%S%6fZ"), SUFFIX));
        let level = self.config.compression_level;
        let created_at = now.to_rfc3339();
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_archive(&target, &dumped, &created_at, level))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;
        Ok(path)
    }
}

fn write_archive(
    path: &Path,
    collections: &[(String, Vec<Document>)],
    created_at: &str,
    compression_level: i32,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut manifest = BackupManifest {
        format_version: BACKUP_FORMAT_VERSION,
        writer_version: env!("CARGO_PKG_VERSION").to_string(),
        created_at: created_at.to_string(),
        collections: BTreeMap::new(),
        checksums: BTreeMap::new(),
    };
    let mut entries = Vec::with_capacity(collections.len());
    for (name, docs) in collections {
        let mut data = Vec::new();
        for doc in docs {
            serde_json::to_writer(&mut data, &Value::Object(doc.clone()).to_json())
                .map_err(serialization)?;
            data.push(b'\n');
        }
        let entry = entry_name(name);
        manifest.checksums.insert(entry.clone(), xxh3_hex(&data));
        manifest.collections.insert(name.clone(), docs.len() as u64);
        entries.push((entry, data));
    }
    let manifest_json = serde_json::to_vec_pretty(&manifest).map_err(serialization)?;

    let temp_path = path.with_extension("tmp");
    let written = (|| -> Result<()> {
        let file = File::create(&temp_path)?;
        let encoder = zstd::Encoder::new(BufWriter::new(file), compression_level)?.auto_finish();
        let mut builder = Builder::new(encoder);
        add_file(&mut builder, MANIFEST, &manifest_json)?;
        for (entry, data) in &entries {
            add_file(&mut builder, entry, data)?;
        }
        let mut encoder = builder.into_inner()?;
        encoder.flush()?;
        Ok(())
    })();

    match written {
        Ok(()) => {
            fs::rename(&temp_path, path)?;
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            Err(e)
        }
    }
}

fn add_file<W: Write>(builder: &mut Builder<W>, path: &str, data: &[u8]) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_path(path)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    builder.append(&header, data)?;
    Ok(())
}

/// Delete all but the newest `retain` archives in `directory`
///
/// Archive names sort chronologically. Returns the deleted paths.
pub fn prune(directory: &Path, retain: usize) -> Result<Vec<PathBuf>> {
    let mut archives = list_archives(directory)?;
    let excess = archives.len().saturating_sub(retain);
    let removed: Vec<PathBuf> = archives.drain(..excess).collect();
    for path in &removed {
        fs::remove_file(path)?;
    }
    Ok(removed)
}

/// Archives in `directory`, oldest first
pub fn list_archives(directory: &Path) -> Result<Vec<PathBuf>> {
    let mut archives = Vec::new();
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        let is_archive = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(PREFIX) && n.ends_with(SUFFIX));
        if is_archive {
            archives.push(path);
        }
    }
    archives.sort();
    Ok(archives)
}

/// Reads and verifies backup archives
pub struct BackupReader;

impl BackupReader {
    /// Decode an archive, verifying the format version and every checksum
    pub fn read(path: &Path) -> Result<BackupContents> {
        let mut files = Self::extract_all_files(path)?;

        let manifest_data = files
            .remove(MANIFEST)
            .ok_or_else(|| Error::Serialization(format!("{} missing from backup", MANIFEST)))?;
        let manifest: BackupManifest =
            serde_json::from_slice(&manifest_data).map_err(serialization)?;
        if manifest.format_version != BACKUP_FORMAT_VERSION {
            return Err(Error::Serialization(format!(
                "unsupported backup format version {}",
                manifest.format_version
            )));
        }

        let mut collections = BTreeMap::new();
        for name in manifest.collections.keys() {
            let entry = entry_name(name);
            let data = files
                .get(&entry)
                .ok_or_else(|| Error::Serialization(format!("{} missing from backup", entry)))?;
            let expected = manifest.checksums.get(&entry).map(String::as_str);
            let actual = xxh3_hex(data);
            if expected != Some(actual.as_str()) {
                return Err(Error::Serialization(format!(
                    "checksum mismatch for {}: expected {:?}, got {}",
                    entry, expected, actual
                )));
            }
            collections.insert(name.clone(), decode_lines(data)?);
        }

        Ok(BackupContents {
            manifest,
            collections,
        })
    }

    fn extract_all_files(path: &Path) -> Result<BTreeMap<String, Vec<u8>>> {
        let decoder = zstd::Decoder::new(BufReader::new(File::open(path)?))?;
        let mut archive = Archive::new(decoder);
        let mut files = BTreeMap::new();
        for entry in archive.entries()? {
            let mut entry = entry?;
            let name = entry.path()?.to_string_lossy().to_string();
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            files.insert(name, data);
        }
        Ok(files)
    }
}

fn decode_lines(data: &[u8]) -> Result<Vec<Document>> {
    let mut docs = Vec::new();
    for line in data.split(|b| *b == b'\n').filter(|l| !l.is_empty()) {
        let json: serde_json::Value = serde_json::from_slice(line).map_err(serialization)?;
        match Value::from_json(&json) {
            Value::Object(doc) => docs.push(doc),
            other => {
                return Err(Error::Serialization(format!(
                    "expected a document, found {}",
                    other.type_name()
                )))
            }
        }
    }
    Ok(docs)
}
