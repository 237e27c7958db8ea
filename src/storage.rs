use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use rusty_ulid::Ulid;

/// Write `data` to `path` atomically.
///
/// The bytes land in a sibling temp file first, get fsynced, and only then
/// replace the target with a rename. Readers never observe a torn file.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let temp_path = temp_sibling(path);

    let result = (|| {
        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()
    })();

    if let Err(err) = result {
        let _ = std::fs::remove_file(&temp_path);
        return Err(err);
    }

    std::fs::rename(&temp_path, path)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    path.with_file_name(format!(".{}-{file_name}.tmp", Ulid::generate()))
}

/// Create the directory (and parents) if it does not exist yet.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}
