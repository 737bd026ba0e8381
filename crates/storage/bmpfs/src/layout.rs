//! Layout calculator: turns image dimensions into the block/metadata geometry the rest of the
//! crate reads and writes against.

use crate::bmp::{row_stride, DATA_OFFSET};
use crate::metadata::RECORD_SIZE;

/// Fixed block size for the data region.
pub const BLOCK_SIZE: u64 = 512;

/// Fixed-capacity slot count for the file-metadata table.
pub const MAX_FILES: usize = 1000;

/// Geometry derived once at mount time from the backing image's dimensions.
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub data_offset: u64,
    pub data_size: u64,
    pub total_blocks: u64,
    pub bitmap_bytes: u64,
    pub metadata_bytes: u64,
    /// File offset where block 0 of the data region begins.
    pub blocks_offset: u64,
}

impl Layout {
    /// Compute layout from the image's declared pixel-region size.
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        let stride = row_stride(width) as u64;
        let data_size = stride * height as u64;
        Self::from_data_size(data_size)
    }

    fn from_data_size(data_size: u64) -> Self {
        let total_blocks = data_size / BLOCK_SIZE;
        let bitmap_bytes = total_blocks;
        let metadata_bytes = bitmap_bytes + MAX_FILES as u64 * RECORD_SIZE as u64;

        Self {
            data_offset: DATA_OFFSET as u64,
            data_size,
            total_blocks,
            bitmap_bytes,
            metadata_bytes,
            blocks_offset: DATA_OFFSET as u64 + metadata_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_image_layout_matches_spec() {
        let layout = Layout::from_dimensions(2048, 2048);
        assert_eq!(layout.data_size, 12_582_912);
        assert_eq!(layout.total_blocks, 12_582_912 / 512);
        assert_eq!(layout.bitmap_bytes, layout.total_blocks);
        assert_eq!(layout.metadata_bytes, layout.bitmap_bytes + 1000 * 309);
        assert_eq!(layout.blocks_offset, 54 + layout.metadata_bytes);
    }

    #[test]
    fn small_image_layout() {
        // width=4 -> stride 12, height=100 -> data_size 1200 -> 2 blocks of 512
        let layout = Layout::from_dimensions(4, 100);
        assert_eq!(layout.data_size, 1200);
        assert_eq!(layout.total_blocks, 2);
    }
}
