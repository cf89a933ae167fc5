use std::fs;
use std::io::{self, Write};
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// A fully written and synced temporary file waiting to replace its target.
#[derive(Debug)]
pub(crate) struct PendingWrite {
    temp_path: PathBuf,
    target: PathBuf,
}

impl PendingWrite {
    #[cfg(test)]
    pub(crate) fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Atomically replace the target with the temporary file.
    pub(crate) fn commit(self) -> io::Result<()> {
        if let Err(err) = fs::rename(&self.temp_path, &self.target) {
            let _ = fs::remove_file(&self.temp_path);
            return Err(err);
        }
        Ok(())
    }
}

/// Write `data` next to `path` without touching `path` itself.
pub(crate) fn write_temp(path: &Path, data: &[u8]) -> io::Result<PendingWrite> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", path.display()),
        )
    })?;

    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let temp_name = format!(
        ".{}.tmp-{}-{nonce}",
        file_name.to_string_lossy(),
        std::process::id()
    );
    let temp_path = path.with_file_name(temp_name);

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let write_result = (|| -> io::Result<()> {
        let mut temp_file = options.open(&temp_path)?;
        temp_file.write_all(data)?;
        temp_file.sync_all()?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }

    Ok(PendingWrite {
        temp_path,
        target: path.to_path_buf(),
    })
}

/// Replace `path` with `data` via a temporary file and a rename.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    write_temp(path, data)?.commit()
}
