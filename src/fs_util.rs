use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::Builder;

use crate::error::QimbaError;

/// Writes `content` next to `path` and renames it into place.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), QimbaError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|err| QimbaError::fs(parent, err))?;
    let mut temp = Builder::new()
        .prefix(".qimba-write")
        .tempfile_in(parent)
        .map_err(|err| QimbaError::fs(parent, err))?;
    temp.write_all(content)
        .and_then(|_| temp.flush())
        .map_err(|err| QimbaError::fs(temp.path(), err))?;
    temp.persist(path)
        .map_err(|err| QimbaError::fs(path, err.error))?;
    Ok(())
}

/// Creates a uniquely named directory under `parent` that outlives the call.
pub fn make_temp_dir(parent: &Path, prefix: &str) -> Result<PathBuf, QimbaError> {
    fs::create_dir_all(parent).map_err(|err| QimbaError::fs(parent, err))?;
    let dir = Builder::new()
        .prefix(prefix)
        .tempdir_in(parent)
        .map_err(|err| QimbaError::fs(parent, err))?;
    Ok(dir.keep())
}

/// Concatenates `sources` byte-for-byte into a new file at `dest`.
pub fn concatenate(sources: &[PathBuf], dest: &Path) -> Result<u64, QimbaError> {
    let file = File::create(dest).map_err(|err| QimbaError::fs(dest, err))?;
    let mut writer = BufWriter::new(file);
    let mut total = 0;
    for source in sources {
        let mut reader = File::open(source).map_err(|err| QimbaError::fs(source, err))?;
        total += io::copy(&mut reader, &mut writer).map_err(|err| QimbaError::fs(dest, err))?;
    }
    writer.flush().map_err(|err| QimbaError::fs(dest, err))?;
    Ok(total)
}
