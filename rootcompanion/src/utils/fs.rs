use std::fs::{self, create_dir_all, File};
use std::io::{self, ErrorKind, Read};
use std::path::Path;

/// Separator used for paths on the device
pub const DEVICE_PATH_SEP: &'static str = "/";
pub const DEVICE_PATH_SEP_CHAR: char = '/';

pub fn ensure_dir_exists(p: &Path) -> io::Result<()> {
    if p.exists() {
        return Ok(());
    }

    create_dir_all(p)
}

/// Returns the path as a str and panics if that fails
pub fn path_must_str(path: &Path) -> &str {
    path.to_str().expect("valid paths")
}

pub fn open_file(path: &Path) -> crate::Result<File> {
    match File::open(path) {
        Ok(v) => Ok(v),
        Err(e) => match e.kind() {
            ErrorKind::NotFound => Err(crate::Error::MissingFile(path_must_str(path).into())),
            _ => Err(e.into()),
        },
    }
}

pub fn read_file(path: &Path) -> crate::Result<String> {
    match fs::read_to_string(path) {
        Ok(v) => Ok(v),
        Err(e) => match e.kind() {
            ErrorKind::NotFound => Err(crate::Error::MissingFile(path_must_str(path).into())),
            _ => Err(e.into()),
        },
    }
}

/// Read at most `limit` bytes from the start of the file.
///
/// Errors are returned untouched so callers can inspect the [ErrorKind].
pub fn read_file_bounded(path: &Path, limit: usize) -> io::Result<Vec<u8>> {
    let f = File::open(path)?;
    let mut buf = Vec::with_capacity(limit.min(4096));
    f.take(limit as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Returns the final component of a device path, `None` if there is no
/// separator in the path at all
pub fn device_file_name(path: &str) -> Option<&str> {
    path.rfind(DEVICE_PATH_SEP_CHAR).map(|idx| &path[idx + 1..])
}

/// Returns everything before the final separator of a device path
pub fn device_parent(path: &str) -> Option<&str> {
    path.rfind(DEVICE_PATH_SEP_CHAR).map(|idx| &path[..idx])
}
