//! Directory-backed, content-addressed archiver.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use ghostdex_common::{Result, error::Error};

use crate::{archive::Archiver, codec, value::Value};

const UNIT_EXTENSION: &str = "json";

static NEXT_TMP: AtomicU64 = AtomicU64::new(0);

/// Stores each unit as `<dir>/<content address>.json`.
///
/// Pushing a unit that is already present does not touch the file. Files are
/// written to a temporary name first and renamed into place, so readers never
/// see a partial unit.
#[derive(Debug, Clone)]
pub struct FileArchiver {
    dir: PathBuf,
}

impl FileArchiver {
    /// Opens (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<FileArchiver> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| Error::io(dir.display().to_string(), e))?;
        Ok(FileArchiver { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn unit_path(&self, meta: &Value) -> Result<PathBuf> {
        let name = meta.as_str("reference")?;
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::invalid_format(
                "reference",
                format!("not a content address: {name:?}"),
            ));
        }
        Ok(self.dir.join(format!("{name}.{UNIT_EXTENSION}")))
    }

    /// Lists the references of all stored units.
    pub fn references(&self) -> Result<Vec<Value>> {
        let mut refs = Vec::new();
        let entries =
            fs::read_dir(&self.dir).map_err(|e| Error::io(self.dir.display().to_string(), e))?;
        for entry in entries {
            let path = entry.map_err(|e| Error::io("read_dir", e))?.path();
            if path.extension().and_then(|x| x.to_str()) == Some(UNIT_EXTENSION) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    refs.push(Value::String(stem.to_string()));
                }
            }
        }
        refs.sort_by(|a, b| codec::canonical_key(a).cmp(&codec::canonical_key(b)));
        Ok(refs)
    }
}

impl Archiver<Value> for FileArchiver {
    fn pull(&self, meta: &Value) -> Result<Value> {
        let path = self.unit_path(meta)?;
        let bytes = fs::read(&path).map_err(|e| Error::io(path.display().to_string(), e))?;
        codec::decode(&bytes)
    }

    fn push(&self, data: &Value) -> Result<Value> {
        let bytes = codec::encode(data)?;
        let meta = Value::String(codec::content_address(&bytes));
        let path = self.unit_path(&meta)?;
        if path.exists() {
            log::trace!("unit {} already stored", path.display());
            return Ok(meta);
        }

        // Workers may push equal units at the same time.
        let tmp = path.with_extension(format!(
            "{}.{}.tmp",
            std::process::id(),
            NEXT_TMP.fetch_add(1, Ordering::Relaxed)
        ));
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        };
        write().map_err(|e| {
            let _ = fs::remove_file(&tmp);
            Error::io(path.display().to_string(), e)
        })?;
        log::trace!("stored unit {} ({} bytes)", path.display(), bytes.len());
        Ok(meta)
    }
}
