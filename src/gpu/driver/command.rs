use crate::gpu::footprint::Footprint;

/// A single copy recorded into a one-shot transfer.
#[derive(Debug)]
pub enum CopyCommand<'a, R> {
    /// Staging buffer laid out as `footprint` into mip 0 of `dst`.
    BufferToTexture {
        src: &'a R,
        footprint: Footprint,
        dst: &'a R,
    },
    /// Mip 0 / layer 0 of `src` into `dst`, laid out as `footprint`.
    TextureToBuffer {
        src: &'a R,
        dst: &'a R,
        footprint: Footprint,
    },
    BufferToBuffer {
        src: &'a R,
        src_offset: u64,
        dst: &'a R,
        dst_offset: u64,
        size: u64,
    },
}
