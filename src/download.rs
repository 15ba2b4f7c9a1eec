//! Streaming a response body to disk without trusting the destination.
//!
//! The artifact is always created fresh: exclusive create, no symlink
//! following, owner-only permissions, and a post-open check that the
//! handle really is a regular file.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use crate::context::Context;
use crate::error::{Result, UpdateError};
use crate::http::Session;

/// Size of each body read while streaming to disk
const CHUNK_SIZE: usize = 4096;

/// Directory prefixes writable by every local user
const SHARED_TEMP_DIRS: &[&str] = &["/tmp/", "/var/tmp/", "/dev/shm/"];

/// Stream the session's body into a freshly created file at `path`.
///
/// Returns the number of bytes written. A partially written file is left
/// in place on failure.
pub fn save_body(session: &mut Session, path: &Path, ctx: &Context) -> Result<u64> {
    if in_shared_temp_dir(path) {
        ctx.warn(format_args!(
            "Saving update to {} is insecure due to potential symlink attacks",
            path.display()
        ));
    }
    ctx.progress(format_args!("Downloading update to {}", path.display()));

    remove_stale(path)?;
    let mut file = create_exclusive(path)?;

    let prefetched = session.take_prefetched();
    let mut written = 0u64;
    if !prefetched.is_empty() {
        write_chunk(&mut file, &prefetched, path)?;
        written += prefetched.len() as u64;
    }

    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = session.read(&mut buf)?;
        if n == 0 {
            break;
        }
        write_chunk(&mut file, &buf[..n], path)?;
        written += n as u64;
    }

    ctx.trace(format_args!("Wrote {} bytes to {}", written, path.display()));
    Ok(written)
}

/// Remove a previous artifact. Anything that is not a regular file is
/// refused rather than removed, so a planted symlink is never replaced
/// silently.
fn remove_stale(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_file() => match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(UpdateError::io(
                format!("Cannot remove {}", path.display()),
                e,
            )),
        },
        Ok(_) => Err(UpdateError::NotRegularFile(path.to_path_buf())),
        Err(_) => Ok(()),
    }
}

/// Open `path` write-only with create + exclusive, never following a
/// final symlink, mode 0600.
fn create_exclusive(path: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600).custom_flags(libc::O_NOFOLLOW);
    }

    let file = options.open(path).map_err(|e| {
        UpdateError::io(format!("Cannot open image file {}", path.display()), e)
    })?;

    let meta = file
        .metadata()
        .map_err(|e| UpdateError::io(format!("Cannot stat {}", path.display()), e))?;
    if !meta.is_file() {
        return Err(UpdateError::NotRegularFile(path.to_path_buf()));
    }
    Ok(file)
}

fn write_chunk(file: &mut File, chunk: &[u8], path: &Path) -> Result<()> {
    file.write_all(chunk)
        .map_err(|e| UpdateError::io(format!("Cannot save response to {}", path.display()), e))
}

fn in_shared_temp_dir(path: &Path) -> bool {
    let text = path.to_string_lossy();
    SHARED_TEMP_DIRS.iter().any(|dir| text.starts_with(dir))
}
