//! The management daemon's persisted volume store (§6 external interfaces):
//! one directory per volume holding `info` (flat `key=value` text), a
//! `bricks/<host>:<path>` file per brick, and a global `options` file. The
//! store is rewritten whole on every version bump; this core reads it back
//! only at bootstrap and on reconfigure — there is no incremental-update
//! path, matching the textual layout described in the reference
//! implementation's `glusterd-utils.h`.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{GlusterError, GlusterResult};

/// One brick entry as the store records it — just enough to reconstruct the
/// `host:path` identity used elsewhere in brick selection (C12).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrickRecord {
    pub host: String,
    pub path: String,
}

/// A volume's full persisted state: everything `VolumeStore::write` needs to
/// reproduce the on-disk layout from scratch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRecord {
    pub name: String,
    pub version: u64,
    pub volume_type: String,
    pub bricks: Vec<BrickRecord>,
    pub options: Vec<(String, String)>,
}

impl VolumeRecord {
    pub fn new(name: impl Into<String>, volume_type: impl Into<String>) -> Self {
        VolumeRecord {
            name: name.into(),
            version: 1,
            volume_type: volume_type.into(),
            bricks: Vec::new(),
            options: Vec::new(),
        }
    }

    pub fn add_brick(&mut self, host: impl Into<String>, path: impl Into<String>) {
        self.bricks.push(BrickRecord {
            host: host.into(),
            path: path.into(),
        });
    }

    pub fn set_option(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(existing) = self.options.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = value;
        } else {
            self.options.push((key, value));
        }
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }
}

/// A single volume's directory under the store root.
pub struct VolumeStore {
    dir: PathBuf,
}

impl VolumeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        VolumeStore { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Rewrite the whole directory: `info`, every `bricks/<host>:<path>`
    /// file (the brick directory is wiped first so a shrinking brick list
    /// doesn't leave stale files behind), and `options`. There is no
    /// partial-update entry point — every version bump goes through here.
    pub fn write(&self, record: &VolumeRecord) -> GlusterResult<()> {
        fs::create_dir_all(&self.dir).map_err(io_err)?;

        let bricks_dir = self.dir.join("bricks");
        if bricks_dir.exists() {
            fs::remove_dir_all(&bricks_dir).map_err(io_err)?;
        }
        fs::create_dir_all(&bricks_dir).map_err(io_err)?;

        let mut info = String::new();
        write_kv(&mut info, "type", &record.volume_type);
        write_kv(&mut info, "version", &record.version.to_string());
        write_kv(&mut info, "count", &record.bricks.len().to_string());
        fs::write(self.dir.join("info"), info).map_err(io_err)?;

        for brick in &record.bricks {
            let file_name = format!("{}:{}", brick.host, brick.path.replace('/', "-"));
            let mut contents = String::new();
            write_kv(&mut contents, "hostname", &brick.host);
            write_kv(&mut contents, "path", &brick.path);
            fs::write(bricks_dir.join(file_name), contents).map_err(io_err)?;
        }

        let mut options = String::new();
        for (key, value) in &record.options {
            write_kv(&mut options, key, value);
        }
        fs::write(self.dir.join("options"), options).map_err(io_err)?;

        Ok(())
    }

    /// Read the volume back. Called only at bootstrap and on reconfigure
    /// events, per the external-interface contract — nothing on the FOP
    /// path touches this.
    pub fn read(&self) -> GlusterResult<VolumeRecord> {
        let info = parse_kv(&read_required(&self.dir.join("info"))?);
        let volume_type = info
            .get("type")
            .cloned()
            .ok_or_else(|| GlusterError::not_found("info: missing \"type\""))?;
        let version: u64 = info
            .get("version")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| GlusterError::invalid_argument("info: missing or unparseable \"version\""))?;

        let bricks = self.read_bricks()?;

        let mut options: Vec<(String, String)> = match fs::read_to_string(self.dir.join("options")) {
            Ok(text) => parse_kv(&text).into_iter().collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(io_err(e)),
        };
        options.sort();

        let name = self
            .dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        Ok(VolumeRecord {
            name,
            version,
            volume_type,
            bricks,
            options,
        })
    }

    fn read_bricks(&self) -> GlusterResult<Vec<BrickRecord>> {
        let bricks_dir = self.dir.join("bricks");
        if !bricks_dir.exists() {
            return Ok(Vec::new());
        }
        let mut file_names: Vec<PathBuf> = fs::read_dir(&bricks_dir)
            .map_err(io_err)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        file_names.sort();

        let mut bricks = Vec::with_capacity(file_names.len());
        for path in file_names {
            let kv = parse_kv(&read_required(&path)?);
            let host = kv
                .get("hostname")
                .cloned()
                .ok_or_else(|| GlusterError::not_found("brick file missing \"hostname\""))?;
            let brick_path = kv
                .get("path")
                .cloned()
                .ok_or_else(|| GlusterError::not_found("brick file missing \"path\""))?;
            bricks.push(BrickRecord { host, path: brick_path });
        }
        Ok(bricks)
    }
}

fn write_kv(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push('=');
    out.push_str(value);
    out.push('\n');
}

fn parse_kv(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn read_required(path: &Path) -> GlusterResult<String> {
    fs::read_to_string(path).map_err(io_err)
}

fn io_err(e: io::Error) -> GlusterError {
    GlusterError::fatal(format!("volume store: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> VolumeRecord {
        let mut record = VolumeRecord::new("vol0", "replicate");
        record.add_brick("host-a", "/data/brick0");
        record.add_brick("host-b", "/data/brick0");
        record.set_option("nfs.disable", "true");
        record
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let store = VolumeStore::new(dir.path().join("vol0"));
        let record = sample();
        store.write(&record).unwrap();

        let read_back = store.read().unwrap();
        assert_eq!(read_back.name, "vol0");
        assert_eq!(read_back.version, 1);
        assert_eq!(read_back.volume_type, "replicate");
        assert_eq!(read_back.bricks, record.bricks);
        assert_eq!(read_back.options, vec![("nfs.disable".to_string(), "true".to_string())]);
    }

    #[test]
    fn version_bump_rewrite_drops_stale_brick_files() {
        let dir = tempdir().unwrap();
        let store = VolumeStore::new(dir.path().join("vol0"));
        let mut record = sample();
        store.write(&record).unwrap();

        record.bricks.pop();
        record.bump_version();
        store.write(&record).unwrap();

        let read_back = store.read().unwrap();
        assert_eq!(read_back.version, 2);
        assert_eq!(read_back.bricks.len(), 1);
    }

    #[test]
    fn missing_directory_surfaces_as_fatal_io_error() {
        let dir = tempdir().unwrap();
        let store = VolumeStore::new(dir.path().join("no-such-volume"));
        let err = store.read().unwrap_err();
        assert_eq!(err.kind, crate::error::Kind::FatalInvariantViolation);
    }

    #[test]
    fn info_file_missing_version_key_is_invalid_argument() {
        let dir = tempdir().unwrap();
        let volume_dir = dir.path().join("vol0");
        fs::create_dir_all(&volume_dir).unwrap();
        fs::write(volume_dir.join("info"), "type=replicate\n").unwrap();
        let store = VolumeStore::new(volume_dir);
        let err = store.read().unwrap_err();
        assert_eq!(err.kind, crate::error::Kind::InvalidArgument);
    }
}
