pub mod command;
pub mod state;
pub mod types;

use super::error::AllocationError;
use types::{HeapType, ResourceDesc, ResourceDimension, UsageBits};

impl ResourceDesc {
    /// Rejects requests no backend can satisfy, before any native call is
    /// made.
    pub fn validate(&self) -> Result<(), AllocationError> {
        if self.extent.is_empty() || self.bytes == 0 {
            return Err(AllocationError::ZeroSized(self.extent));
        }

        let unsupported = AllocationError::UnsupportedFormat {
            format: self.format,
            usage: self.usage,
        };

        match self.dimension {
            ResourceDimension::Buffer => {
                if self
                    .usage
                    .intersects(UsageBits::RENDER_TARGET | UsageBits::DEPTH_STENCIL)
                {
                    return Err(unsupported);
                }
            }
            ResourceDimension::Texture2D => {
                if self.heap != HeapType::DeviceLocal || self.format == types::Format::Unknown {
                    return Err(unsupported);
                }
                if self.format.is_depth() {
                    if self.usage.contains(UsageBits::RENDER_TARGET) {
                        return Err(unsupported);
                    }
                } else if self.usage.contains(UsageBits::DEPTH_STENCIL) {
                    return Err(unsupported);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::state::ResourceState;
    use super::types::*;
    use crate::gpu::error::AllocationError;

    #[test]
    fn zero_height_is_rejected() {
        let desc = ResourceDesc::texture_2d(
            Format::R8G8B8A8Unorm,
            Vec2I::new(256, 0),
            UsageBits::SAMPLED | UsageBits::COPY_DST,
            ResourceState::CopyDestination,
        );
        assert!(matches!(desc.validate(), Err(AllocationError::ZeroSized(_))));
    }

    #[test]
    fn depth_format_cannot_be_a_color_target() {
        let desc = ResourceDesc::texture_2d(
            Format::D32Float,
            Vec2I::new(16, 16),
            UsageBits::RENDER_TARGET,
            ResourceState::GenericRead,
        );
        assert!(matches!(
            desc.validate(),
            Err(AllocationError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn textures_live_in_device_memory() {
        let mut desc = ResourceDesc::texture_2d(
            Format::R8G8B8A8Unorm,
            Vec2I::new(4, 4),
            UsageBits::SAMPLED,
            ResourceState::CopyDestination,
        );
        desc.heap = HeapType::HostUpload;
        assert!(desc.validate().is_err());
    }

    #[test]
    fn upload_buffer_is_valid() {
        let desc = ResourceDesc::buffer(HeapType::HostUpload, 64, UsageBits::COPY_SRC);
        assert!(desc.validate().is_ok());
        assert_eq!(desc.byte_size(), 64);
    }

    #[test]
    fn large_sizes_are_kept_exact() {
        let desc = ResourceDesc::buffer(HeapType::HostUpload, 1 << 31, UsageBits::COPY_SRC);
        assert_eq!(desc.byte_size(), 1 << 31);
        assert_eq!(desc.extent.x, i32::MAX);

        let texture = ResourceDesc::texture_2d(
            Format::R16G16B16A16Float,
            Vec2I::new(16384, 16384),
            UsageBits::SAMPLED | UsageBits::COPY_DST,
            ResourceState::CopyDestination,
        );
        assert_eq!(texture.byte_size(), 16384 * 16384 * 8);
    }
}
