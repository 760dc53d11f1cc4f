// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::Blob;
use std::{
    fs::File,
    io::Write,
    path::Path,
};

/// Reads bytes from a file using `pread`.
#[cfg(unix)]
pub fn read_blob_at(file: &File, offset: u64, size: usize) -> std::io::Result<Blob> {
    use std::os::unix::fs::FileExt;

    let mut buf = vec![0; size];
    file.read_exact_at(&mut buf, offset)?;
    Ok(buf.into())
}

#[cfg(windows)]
pub fn read_blob_at(file: &File, offset: u64, size: usize) -> std::io::Result<Blob> {
    use std::os::windows::fs::FileExt;

    let mut buf = vec![0; size];
    let mut pos = 0;

    while pos < size {
        let n = file.seek_read(&mut buf[pos..], offset + pos as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "EOF during positional read",
            ));
        }
        pos += n;
    }

    Ok(buf.into())
}

/// Atomically writes a file.
pub fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    #[allow(clippy::expect_used)]
    let folder = path.parent().expect("should have a parent directory");

    let mut temp_file = tempfile::NamedTempFile::new_in(folder)?;
    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file_mut().sync_all()?;
    temp_file.persist(path)?;

    #[cfg(not(target_os = "windows"))]
    {
        let file = File::open(folder)?;
        file.sync_all()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn atomic_write_then_pread() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data");

        write_atomic(&path, b"hello positional world")?;

        let file = File::open(&path)?;
        assert_eq!(b"positional", &*read_blob_at(&file, 6, 10)?);

        Ok(())
    }
}
