//! Writing extracted contents out to the host filesystem: directory creation
//! plus a streaming copy from a [`ReadableStorage`] to a file on disk.

use crate::storage::{ReadableStorage, StorageError};
use snafu::{ResultExt, Snafu};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Bytes moved per `read`/`write` pair when streaming a section or file out
/// to disk. Larger than the internal storage-to-storage copy buffer since
/// this one crosses into the OS file cache.
const STREAM_BUFFER_SIZE: usize = 0x400000;

#[derive(Debug, Snafu)]
pub enum SinkError {
    #[snafu(display("Failed to create directory {}: {}", path.display(), source))]
    Mkdir {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to create file {}: {}", path.display(), source))]
    CreateFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to write to {}: {}", path.display(), source))]
    WriteFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to read source storage: {}", source))]
    Read { source: StorageError },
}

/// Creates `path` and any missing parent directories; a no-op if it already
/// exists.
pub fn mkdir_p(path: impl AsRef<Path>) -> Result<(), SinkError> {
    let path = path.as_ref();
    std::fs::create_dir_all(path).context(MkdirSnafu { path })
}

/// Streams the full contents of `storage` to a freshly created file at
/// `path`, overwriting anything already there.
pub fn write_storage_to_file(
    storage: &impl ReadableStorage,
    path: impl AsRef<Path>,
) -> Result<(), SinkError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        mkdir_p(parent)?;
    }

    let mut file = File::create(path).context(CreateFileSnafu { path })?;

    let size = storage.get_size();
    let mut buf = vec![0u8; STREAM_BUFFER_SIZE];
    for offset in (0..size).step_by(STREAM_BUFFER_SIZE) {
        let chunk_size = std::cmp::min(STREAM_BUFFER_SIZE as u64, size - offset) as usize;
        storage
            .read(offset, &mut buf[..chunk_size])
            .context(ReadSnafu)?;
        file.write_all(&buf[..chunk_size])
            .context(WriteFileSnafu { path })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::VecStorage;

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("hac-sink-test-{}-{:?}", name, std::thread::current().id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn mkdir_p_creates_nested_directories() {
        let root = scratch_dir("mkdir_p");
        let nested = root.join("a").join("b").join("c");

        mkdir_p(&nested).unwrap();
        assert!(nested.is_dir());

        // already existing -> no-op, not an error
        mkdir_p(&nested).unwrap();

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn write_storage_to_file_streams_full_contents() {
        let root = scratch_dir("write_storage");
        let path = root.join("out").join("section.bin");

        let data = (0..=255u16).map(|b| b as u8).cycle().take(0x10000).collect::<Vec<u8>>();
        let storage = VecStorage::new(data.clone());

        write_storage_to_file(&storage, &path).unwrap();

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written, data);

        std::fs::remove_dir_all(&root).unwrap();
    }
}
