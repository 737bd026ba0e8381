//! Positioned reads and writes of whole-block runs from the data region.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::BmpFsResult;
use crate::layout::BLOCK_SIZE;

/// Read `n` blocks starting at `start` into a freshly allocated buffer.
pub fn read_blocks(file: &mut File, blocks_offset: u64, start: u64, n: u64) -> BmpFsResult<Vec<u8>> {
    let mut buf = vec![0u8; (n * BLOCK_SIZE) as usize];
    file.seek(SeekFrom::Start(blocks_offset + start * BLOCK_SIZE))?;
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// Write a whole-block buffer (`buf.len()` must be a multiple of `BLOCK_SIZE`) starting at block
/// `start`, and flush before returning.
pub fn write_blocks(file: &mut File, blocks_offset: u64, start: u64, buf: &[u8]) -> BmpFsResult<()> {
    debug_assert_eq!(buf.len() as u64 % BLOCK_SIZE, 0);
    file.seek(SeekFrom::Start(blocks_offset + start * BLOCK_SIZE))?;
    file.write_all(buf)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn scratch_file(size: u64) -> (tempfile::TempDir, File) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocks.img");
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        file.set_len(size).unwrap();
        (dir, file)
    }

    #[test]
    fn write_then_read_back_round_trips() {
        let (_dir, mut file) = scratch_file(4096);
        let data = vec![0xABu8; 1024];
        write_blocks(&mut file, 0, 0, &data).unwrap();
        let read = read_blocks(&mut file, 0, 0, 2).unwrap();
        assert_eq!(read, data);
    }

    #[test]
    fn blocks_offset_is_honored() {
        let (_dir, mut file) = scratch_file(4096);
        let data = vec![0x11u8; 512];
        write_blocks(&mut file, 512, 1, &data).unwrap();
        let read = read_blocks(&mut file, 512, 1, 1).unwrap();
        assert_eq!(read, data);
    }
}
