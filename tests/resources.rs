mod common;

use std::sync::Arc;

use common::{null_graphics, null_graphics_with, pattern};
use llgi::gpu::null::{NullDevice, NullDeviceInfo};
use llgi::{
    AllocationError, BufferUsage, DeviceType, Format, GPUError, ResourceState, Texture,
    TextureDesc, TextureType, Vec2I,
};

#[test]
fn zero_height_texture_is_rejected() {
    let (device, graphics) = null_graphics();
    let err = graphics
        .create_texture(&TextureDesc {
            size: Vec2I::new(16, 0),
            ..Default::default()
        })
        .err()
        .unwrap();

    assert!(matches!(
        err,
        GPUError::Allocation(AllocationError::ZeroSized(Vec2I { x: 16, y: 0 }))
    ));
    assert_eq!(device.live_allocations(), 0);
}

#[test]
fn depth_format_cannot_back_a_render_target() {
    let (device, graphics) = null_graphics();
    let err = graphics
        .create_render_texture(Vec2I::new(4, 4), Format::D24S8)
        .err()
        .unwrap();
    assert!(matches!(
        err,
        GPUError::Allocation(AllocationError::UnsupportedFormat { .. })
    ));
    assert_eq!(device.live_allocations(), 0);
}

#[test]
fn dropping_textures_returns_all_memory() {
    let (device, graphics) = null_graphics();
    {
        let _color = graphics
            .create_texture(&TextureDesc {
                size: Vec2I::new(31, 17),
                ..Default::default()
            })
            .unwrap();
        let _depth = graphics.create_depth_texture(Vec2I::new(31, 17)).unwrap();
        assert_eq!(device.live_allocations(), 3);
    }
    assert_eq!(device.live_allocations(), 0);
    assert_eq!(device.memory_in_use(), 0);
}

#[test]
fn out_of_memory_is_reported_with_the_request() {
    let (device, graphics) = null_graphics_with(NullDeviceInfo {
        memory_budget: Some(64),
        ..Default::default()
    });
    let err = graphics.create_vertex_buffer(128).err().unwrap();
    assert!(matches!(
        err,
        GPUError::Allocation(AllocationError::OutOfMemory { requested: 128 })
    ));
    assert_eq!(device.live_allocations(), 0);
}

#[test]
fn buffers_past_two_gigabytes_request_their_full_size() {
    let (device, graphics) = null_graphics_with(NullDeviceInfo {
        memory_budget: Some(1 << 20),
        ..Default::default()
    });
    let size = (1u64 << 31) + 64;
    let err = graphics.create_vertex_buffer(size).err().unwrap();
    assert!(matches!(
        err,
        GPUError::Allocation(AllocationError::OutOfMemory { requested }) if requested == size
    ));
    assert_eq!(device.live_allocations(), 0);
}

#[test]
fn vertex_buffer_round_trip() {
    let (_device, graphics) = null_graphics();
    let mut vertices = graphics.create_vertex_buffer(96).unwrap();
    let bytes = pattern(96);
    vertices.lock().unwrap().copy_from_slice(&bytes);
    vertices.unlock().unwrap();

    assert_eq!(vertices.usage(), BufferUsage::Vertex);
    assert_eq!(vertices.state(), ResourceState::GenericRead);
    assert_eq!(graphics.read_buffer(&mut vertices), bytes);
}

#[test]
fn index_buffer_counts_elements() {
    let (_device, graphics) = null_graphics();
    let mut indices = graphics.create_index_buffer(2, 6).unwrap();
    assert_eq!(indices.size(), 12);
    assert_eq!(indices.count(), 6);

    let data: [u16; 6] = [0, 1, 2, 2, 1, 3];
    indices
        .lock()
        .unwrap()
        .copy_from_slice(bytemuck::cast_slice(&data));
    indices.unlock().unwrap();
    assert_eq!(indices.read(), bytemuck::cast_slice::<u16, u8>(&data).to_vec());
}

#[test]
fn standalone_texture_has_no_graphics() {
    let device = Arc::new(NullDevice::default());
    let texture = Texture::new(Arc::clone(&device), &TextureDesc::default()).unwrap();
    assert!(texture.graphics().is_none());
    assert_eq!(texture.texture_type(), TextureType::Color);
    assert_eq!(texture.memory_size(), 4);
}

#[test]
fn created_textures_keep_graphics_alive() {
    let (_device, graphics) = null_graphics();
    let texture = graphics.create_texture(&TextureDesc::default()).unwrap();
    drop(graphics);

    let owner = texture.graphics().unwrap();
    assert_eq!(owner.device_type(), DeviceType::Null);
    assert_eq!(owner.swap_buffer_count(), 2);
}
