use super::driver::types::{Format, Vec2I};

/// D3D12 row pitch alignment for buffer <-> texture copies.
pub const TEXTURE_DATA_PITCH_ALIGNMENT: u32 = 256;

pub fn align_up(v: u64, a: u64) -> u64 {
    debug_assert!(a.is_power_of_two());
    (v + (a - 1)) & !(a - 1)
}

/// How the rows of a 2D texture are laid out in a linear buffer.
///
/// Computed once from the backend's alignment rules when a staging buffer is
/// created and never changed afterwards.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Footprint {
    /// Byte offset of the first row inside the buffer.
    pub offset: u64,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    /// Distance in bytes between the starts of two consecutive rows.
    pub row_pitch: u32,
    /// Bytes spanned by the whole image. The last row is not padded.
    pub total_size: u64,
}

impl Footprint {
    /// Footprint whose row pitch is `width * bytes_per_pixel` rounded up to
    /// `alignment` (a power of two, `1` for tightly packed rows).
    pub fn aligned(format: Format, size: Vec2I, alignment: u32) -> Self {
        let width = size.x.max(0) as u32;
        let height = size.y.max(0) as u32;
        let row_bytes = width as u64 * format.bytes_per_pixel() as u64;
        let row_pitch = align_up(row_bytes, alignment.max(1) as u64);
        let total_size = if height == 0 {
            0
        } else {
            row_pitch * (height as u64 - 1) + row_bytes
        };

        Self {
            offset: 0,
            format,
            width,
            height,
            row_pitch: row_pitch as u32,
            total_size,
        }
    }

    /// A buffer viewed as one row of `bytes` raw bytes.
    pub fn linear(bytes: u64) -> Self {
        let width = bytes.min(u32::MAX as u64) as u32;
        Self {
            offset: 0,
            format: Format::Unknown,
            width,
            height: 1,
            row_pitch: width,
            total_size: bytes,
        }
    }

    /// Meaningful bytes in a single row.
    pub fn row_bytes(&self) -> u32 {
        self.width * self.format.bytes_per_pixel()
    }

    pub fn is_tight(&self) -> bool {
        self.row_pitch == self.row_bytes()
    }

    /// Bytes of the image once padding is removed.
    pub fn tight_size(&self) -> u64 {
        self.row_bytes() as u64 * self.height as u64
    }
}

/// Copies `rows` rows of `row_bytes` bytes between two pitched layouts.
/// Bytes between `row_bytes` and the destination pitch are left untouched.
pub fn copy_rows(
    src: &[u8],
    src_pitch: usize,
    dst: &mut [u8],
    dst_pitch: usize,
    row_bytes: usize,
    rows: usize,
) {
    if src_pitch == row_bytes && dst_pitch == row_bytes {
        let len = row_bytes * rows;
        dst[..len].copy_from_slice(&src[..len]);
        return;
    }

    for i in 0..rows {
        let s = i * src_pitch;
        let d = i * dst_pitch;
        dst[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
    }
}
