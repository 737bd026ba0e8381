//! BMP container: the 14-byte file header and 40-byte DIB header that make the backing image a
//! structurally valid 24bpp bitmap, plus the writer that lays down a fresh zeroed image.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{BmpFsError, BmpFsResult};

/// "BM" read as a little-endian u16.
pub const BMP_SIGNATURE: u16 = 0x4D42;

pub const FILE_HEADER_SIZE: u32 = 14;
pub const INFO_HEADER_SIZE: u32 = 40;
pub const DATA_OFFSET: u32 = FILE_HEADER_SIZE + INFO_HEADER_SIZE;

const BITS_PER_PIXEL: u16 = 24;
const PLANES: u16 = 1;
const COMPRESSION: u32 = 0;
const PIXELS_PER_METRE: i32 = 2835;

/// Default dimensions used when materializing a fresh backing image.
pub const DEFAULT_WIDTH: u32 = 2048;
pub const DEFAULT_HEIGHT: u32 = 2048;

/// The 14-byte BMP file header.
#[derive(Debug, Clone, Copy)]
pub struct FileHeader {
    pub signature: u16,
    pub file_size: u32,
    pub data_offset: u32,
}

/// The 40-byte BITMAPINFOHEADER.
#[derive(Debug, Clone, Copy)]
pub struct InfoHeader {
    pub width: i32,
    pub height: i32,
    pub planes: u16,
    pub bits_per_pixel: u16,
    pub compression: u32,
    pub image_size: u32,
    pub x_pixels_per_metre: i32,
    pub y_pixels_per_metre: i32,
    pub colors_used: u32,
    pub colors_important: u32,
}

impl FileHeader {
    fn encode(&self) -> [u8; FILE_HEADER_SIZE as usize] {
        let mut buf = [0u8; FILE_HEADER_SIZE as usize];
        buf[0..2].copy_from_slice(&self.signature.to_le_bytes());
        buf[2..6].copy_from_slice(&self.file_size.to_le_bytes());
        // bytes 6..10 are the two reserved u16 fields, left zero
        buf[10..14].copy_from_slice(&self.data_offset.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            signature: u16::from_le_bytes(buf[0..2].try_into().unwrap()),
            file_size: u32::from_le_bytes(buf[2..6].try_into().unwrap()),
            data_offset: u32::from_le_bytes(buf[10..14].try_into().unwrap()),
        }
    }
}

impl InfoHeader {
    fn encode(&self) -> [u8; INFO_HEADER_SIZE as usize] {
        let mut buf = [0u8; INFO_HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&INFO_HEADER_SIZE.to_le_bytes());
        buf[4..8].copy_from_slice(&self.width.to_le_bytes());
        buf[8..12].copy_from_slice(&self.height.to_le_bytes());
        buf[12..14].copy_from_slice(&self.planes.to_le_bytes());
        buf[14..16].copy_from_slice(&self.bits_per_pixel.to_le_bytes());
        buf[16..20].copy_from_slice(&self.compression.to_le_bytes());
        buf[20..24].copy_from_slice(&self.image_size.to_le_bytes());
        buf[24..28].copy_from_slice(&self.x_pixels_per_metre.to_le_bytes());
        buf[28..32].copy_from_slice(&self.y_pixels_per_metre.to_le_bytes());
        buf[32..36].copy_from_slice(&self.colors_used.to_le_bytes());
        buf[36..40].copy_from_slice(&self.colors_important.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            width: i32::from_le_bytes(buf[4..8].try_into().unwrap()),
            height: i32::from_le_bytes(buf[8..12].try_into().unwrap()),
            planes: u16::from_le_bytes(buf[12..14].try_into().unwrap()),
            bits_per_pixel: u16::from_le_bytes(buf[14..16].try_into().unwrap()),
            compression: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            image_size: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            x_pixels_per_metre: i32::from_le_bytes(buf[24..28].try_into().unwrap()),
            y_pixels_per_metre: i32::from_le_bytes(buf[28..32].try_into().unwrap()),
            colors_used: u32::from_le_bytes(buf[32..36].try_into().unwrap()),
            colors_important: u32::from_le_bytes(buf[36..40].try_into().unwrap()),
        }
    }
}

/// Row stride in bytes for a 24bpp image of the given width, 4-byte padded.
pub fn row_stride(width: u32) -> u32 {
    (width * 3 + 3) & !3
}

/// Create a new backing image at `path` with a zero-filled pixel region sized for
/// `width` x `height`. Fails if the file already exists to avoid clobbering a mounted image.
pub fn create_container(path: &std::path::Path, width: u32, height: u32) -> BmpFsResult<()> {
    let stride = row_stride(width);
    let pixel_size = stride as u64 * height as u64;

    let file_header = FileHeader {
        signature: BMP_SIGNATURE,
        file_size: DATA_OFFSET + pixel_size as u32,
        data_offset: DATA_OFFSET,
    };

    let info_header = InfoHeader {
        width: width as i32,
        height: height as i32,
        planes: PLANES,
        bits_per_pixel: BITS_PER_PIXEL,
        compression: COMPRESSION,
        image_size: pixel_size as u32,
        x_pixels_per_metre: PIXELS_PER_METRE,
        y_pixels_per_metre: PIXELS_PER_METRE,
        colors_used: 0,
        colors_important: 0,
    };

    let mut file = File::options()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)?;

    file.write_all(&file_header.encode())?;
    file.write_all(&info_header.encode())?;

    write_zeros(&mut file, pixel_size)?;
    file.sync_all()?;

    log::info!(
        "created backing image {} ({}x{}, {} byte pixel region)",
        path.display(),
        width,
        height,
        pixel_size
    );
    Ok(())
}

/// Write `len` zero bytes at the file's current position, in chunks, without materializing the
/// whole region in memory at once.
fn write_zeros(file: &mut File, len: u64) -> std::io::Result<()> {
    const CHUNK: usize = 1 << 20;
    let zeros = vec![0u8; CHUNK.min(len.max(1) as usize)];
    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(zeros.len() as u64) as usize;
        file.write_all(&zeros[..n])?;
        remaining -= n as u64;
    }
    Ok(())
}

/// Read and validate both headers from an open backing image.
pub fn read_headers(file: &mut File) -> BmpFsResult<(FileHeader, InfoHeader)> {
    file.seek(SeekFrom::Start(0))?;

    let mut header_buf = [0u8; (FILE_HEADER_SIZE + INFO_HEADER_SIZE) as usize];
    file.read_exact(&mut header_buf)?;

    let file_header = FileHeader::decode(&header_buf[..FILE_HEADER_SIZE as usize]);
    if file_header.signature != BMP_SIGNATURE {
        log::error!(
            "backing image signature {:#x} is not a BMP",
            file_header.signature
        );
        return Err(BmpFsError::InvalidFormat);
    }

    let info_header = InfoHeader::decode(&header_buf[FILE_HEADER_SIZE as usize..]);
    Ok((file_header, info_header))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_then_read_headers_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fs.bmp");
        create_container(&path, 64, 32).unwrap();

        let mut file = File::options().read(true).write(true).open(&path).unwrap();
        let (fh, ih) = read_headers(&mut file).unwrap();

        assert_eq!(fh.signature, BMP_SIGNATURE);
        assert_eq!(fh.data_offset, DATA_OFFSET);
        let stride = row_stride(64);
        assert_eq!(fh.file_size, DATA_OFFSET + stride * 32);
        assert_eq!(ih.width, 64);
        assert_eq!(ih.height, 32);
        assert_eq!(ih.bits_per_pixel, 24);
        assert_eq!(ih.planes, 1);
        assert_eq!(ih.compression, 0);
    }

    #[test]
    fn rejects_bad_signature() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.bmp");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&[0u8; 64]).unwrap();
        }
        let mut file = File::options().read(true).write(true).open(&path).unwrap();
        assert_eq!(read_headers(&mut file).unwrap_err(), BmpFsError::InvalidFormat);
    }

    #[test]
    fn row_stride_is_four_byte_padded() {
        assert_eq!(row_stride(2048), 6144);
        assert_eq!(row_stride(1), 4);
        assert_eq!(row_stride(4), 12);
    }
}
