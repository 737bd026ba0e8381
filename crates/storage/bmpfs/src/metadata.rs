//! The file-metadata table and free-block bitmap: the single contiguous metadata region that is
//! read once at mount and rewritten in full after every mutating operation.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::BmpFsResult;
use crate::layout::{Layout, MAX_FILES};

const NAME_LEN: usize = 256;
/// name(256) + size(8) + created(8) + modified(8) + accessed(8) + first_block(4) + num_blocks(4)
/// + mode(4) + uid(4) + gid(4) + is_dir(1)
pub const RECORD_SIZE: usize = 309;

const NO_BLOCK: u32 = 0xFFFF_FFFF;

pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFMT: u32 = 0o170000;

/// Seconds since the Unix epoch, matching the on-disk field width.
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// One 309-byte slot of the file-metadata table. Free iff `name[0] == 0`.
#[derive(Debug, Clone, Copy)]
pub struct FileRecord {
    name: [u8; NAME_LEN],
    pub size: u64,
    pub created: u64,
    pub modified: u64,
    pub accessed: u64,
    pub first_block: Option<u32>,
    pub num_blocks: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub is_dir: bool,
}

impl FileRecord {
    fn empty() -> Self {
        Self {
            name: [0u8; NAME_LEN],
            size: 0,
            created: 0,
            modified: 0,
            accessed: 0,
            first_block: None,
            num_blocks: 0,
            mode: 0,
            uid: 0,
            gid: 0,
            is_dir: false,
        }
    }

    pub fn is_free(&self) -> bool {
        self.name[0] == 0
    }

    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(0);
        std::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    /// Set the name; caller has already validated length via [`crate::path::validate_name`].
    fn set_name(&mut self, name: &str) {
        self.name = [0u8; NAME_LEN];
        self.name[..name.len()].copy_from_slice(name.as_bytes());
    }

    pub fn new_file(name: &str, mode: u32, uid: u32, gid: u32) -> Self {
        let t = now();
        let mut rec = Self::empty();
        rec.set_name(name);
        rec.created = t;
        rec.modified = t;
        rec.accessed = t;
        rec.mode = S_IFREG | (mode & 0o777);
        rec.uid = uid;
        rec.gid = gid;
        rec.is_dir = false;
        rec
    }

    pub fn new_dir(name: &str, mode: u32, uid: u32, gid: u32) -> Self {
        let mut rec = Self::new_file(name, mode, uid, gid);
        rec.mode = S_IFDIR | (mode & 0o777);
        rec.is_dir = true;
        rec
    }

    fn encode(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), RECORD_SIZE);
        let mut off = 0;
        buf[off..off + NAME_LEN].copy_from_slice(&self.name);
        off += NAME_LEN;
        buf[off..off + 8].copy_from_slice(&self.size.to_le_bytes());
        off += 8;
        buf[off..off + 8].copy_from_slice(&self.created.to_le_bytes());
        off += 8;
        buf[off..off + 8].copy_from_slice(&self.modified.to_le_bytes());
        off += 8;
        buf[off..off + 8].copy_from_slice(&self.accessed.to_le_bytes());
        off += 8;
        buf[off..off + 4].copy_from_slice(&self.first_block.unwrap_or(NO_BLOCK).to_le_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.num_blocks.to_le_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.mode.to_le_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.uid.to_le_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.gid.to_le_bytes());
        off += 4;
        buf[off] = self.is_dir as u8;
    }

    fn decode(buf: &[u8]) -> Self {
        debug_assert_eq!(buf.len(), RECORD_SIZE);
        let mut off = 0;
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&buf[off..off + NAME_LEN]);
        off += NAME_LEN;
        let size = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let created = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let modified = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let accessed = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let raw_first_block = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let num_blocks = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let mode = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let uid = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let gid = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let is_dir = buf[off] != 0;

        Self {
            name,
            size,
            created,
            modified,
            accessed,
            first_block: if raw_first_block == NO_BLOCK {
                None
            } else {
                Some(raw_first_block)
            },
            num_blocks,
            mode,
            uid,
            gid,
            is_dir,
        }
    }
}

/// The free-block bitmap plus the fixed-capacity metadata table, mirrored to the backing image's
/// metadata region as one contiguous run.
pub struct MetadataStore {
    pub bitmap: Vec<u8>,
    pub records: Vec<FileRecord>,
    layout: Layout,
}

impl MetadataStore {
    /// Build an all-zero (empty filesystem) store for `layout`.
    pub fn empty(layout: Layout) -> Self {
        Self {
            bitmap: vec![0u8; layout.bitmap_bytes as usize],
            records: vec![FileRecord::empty(); MAX_FILES],
            layout,
        }
    }

    /// Read the whole metadata region from `file` in one transfer.
    pub fn read(file: &mut File, layout: Layout) -> BmpFsResult<Self> {
        file.seek(SeekFrom::Start(layout.data_offset))?;
        let mut buf = vec![0u8; layout.metadata_bytes as usize];
        file.read_exact(&mut buf)?;

        let bitmap = buf[..layout.bitmap_bytes as usize].to_vec();
        let table = &buf[layout.bitmap_bytes as usize..];
        let records = table
            .chunks_exact(RECORD_SIZE)
            .map(FileRecord::decode)
            .collect();

        Ok(Self {
            bitmap,
            records,
            layout,
        })
    }

    /// Rewrite the whole metadata region and flush. Called at the end of every mutating
    /// operation; a flush failure is a fatal `EIO` to the caller.
    pub fn write(&self, file: &mut File) -> BmpFsResult<()> {
        let mut buf = vec![0u8; self.layout.metadata_bytes as usize];
        buf[..self.bitmap.len()].copy_from_slice(&self.bitmap);

        let table = &mut buf[self.bitmap.len()..];
        for (rec, chunk) in self.records.iter().zip(table.chunks_exact_mut(RECORD_SIZE)) {
            rec.encode(chunk);
        }

        file.seek(SeekFrom::Start(self.layout.data_offset))?;
        file.write_all(&buf)?;
        file.sync_all()?;
        Ok(())
    }

    /// Find the slot index (and a mutable reference) for a non-root name, by linear scan.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.records
            .iter()
            .position(|r| !r.is_free() && r.name_str() == name)
    }

    /// Find the lowest-index free slot.
    pub fn find_free_slot(&self) -> Option<usize> {
        self.records.iter().position(FileRecord::is_free)
    }

    pub fn total_blocks(&self) -> u64 {
        self.layout.total_blocks
    }

    pub fn free_blocks(&self) -> u64 {
        self.bitmap.iter().filter(|&&b| b == 0).count() as u64
    }

    pub fn used_slots(&self) -> u64 {
        self.records.iter().filter(|r| !r.is_free()).count() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips_through_encode_decode() {
        let mut rec = FileRecord::new_file("hello.txt", 0o644, 1000, 1000);
        rec.size = 1234;
        rec.first_block = Some(7);
        rec.num_blocks = 3;

        let mut buf = [0u8; RECORD_SIZE];
        rec.encode(&mut buf);
        let decoded = FileRecord::decode(&buf);

        assert_eq!(decoded.name_str(), "hello.txt");
        assert_eq!(decoded.size, 1234);
        assert_eq!(decoded.first_block, Some(7));
        assert_eq!(decoded.num_blocks, 3);
        assert_eq!(decoded.mode, S_IFREG | 0o644);
        assert!(!decoded.is_dir);
    }

    #[test]
    fn no_first_block_round_trips_as_sentinel() {
        let rec = FileRecord::new_file("x", 0o600, 0, 0);
        let mut buf = [0u8; RECORD_SIZE];
        rec.encode(&mut buf);
        assert_eq!(
            u32::from_le_bytes(buf[288..292].try_into().unwrap()),
            NO_BLOCK
        );
        assert_eq!(FileRecord::decode(&buf).first_block, None);
    }

    #[test]
    fn free_slot_has_zero_first_name_byte() {
        let rec = FileRecord::empty();
        assert!(rec.is_free());
    }

    #[test]
    fn find_scans_linearly_and_skips_free_slots() {
        let layout = Layout::from_dimensions(64, 64);
        let mut store = MetadataStore::empty(layout);
        store.records[3] = FileRecord::new_file("needle", 0o644, 0, 0);
        assert_eq!(store.find("needle"), Some(3));
        assert_eq!(store.find("missing"), None);
    }
}
