mod common;

use common::{null_graphics, pattern, solid};
use llgi::gpu::null::{Fault, JournalEntry};
use llgi::{
    Color8, Format, GPUError, ResourceState, StateError, TextureDesc, TextureType, TransferError,
    Vec2I,
};

#[test]
fn solid_red_color_texture() {
    let (device, graphics) = null_graphics();
    let mut texture = graphics
        .create_texture(&TextureDesc {
            size: Vec2I::new(256, 256),
            format: Format::R8G8B8A8Unorm,
            ty: TextureType::Color,
        })
        .unwrap();
    assert_eq!(texture.state(), ResourceState::CopyDestination);

    let red = solid(Color8::new(255, 0, 0, 255), 256 * 256);
    texture.write_pixels(&red).unwrap();

    assert_eq!(texture.state(), ResourceState::GenericRead);
    assert!(device.journal().contains(&JournalEntry::CopyBufferToTexture {
        row_pitch: 1024,
        rows: 256,
    }));

    let pixels = texture.capture();
    assert_eq!(pixels.len(), 256 * 256 * 4);
    assert!(pixels.chunks_exact(4).all(|p| p == [255, 0, 0, 255]));
}

#[test]
fn padded_rows_survive_upload_and_capture() {
    let (device, graphics) = null_graphics();
    let size = Vec2I::new(100, 7);
    let mut texture = graphics
        .create_texture(&TextureDesc {
            size,
            ..Default::default()
        })
        .unwrap();

    let bytes = pattern(100 * 7 * 4);
    texture.write(&bytes).unwrap();

    assert!(device.journal().contains(&JournalEntry::CopyBufferToTexture {
        row_pitch: 512,
        rows: 7,
    }));
    assert_eq!(texture.capture(), bytes);
}

#[test]
fn relocking_returns_the_same_region() {
    let (_device, graphics) = null_graphics();
    let mut texture = graphics
        .create_texture(&TextureDesc {
            size: Vec2I::new(10, 4),
            ..Default::default()
        })
        .unwrap();

    texture.lock().unwrap().fill(7);
    assert!(texture.is_locked());
    assert!(texture.lock().unwrap().iter().all(|b| *b == 7));
    texture.unlock().unwrap();

    assert!(!texture.is_locked());
    assert_eq!(texture.capture(), vec![7u8; 10 * 4 * 4]);
}

#[test]
fn unlock_without_writes_keeps_contents() {
    let (_device, graphics) = null_graphics();
    let mut texture = graphics
        .create_texture(&TextureDesc {
            size: Vec2I::new(16, 16),
            ..Default::default()
        })
        .unwrap();
    assert!(texture.is_shadowed());
    let bytes = pattern(16 * 16 * 4);
    texture.write(&bytes).unwrap();

    texture.lock().unwrap();
    texture.unlock().unwrap();

    assert_eq!(texture.state(), ResourceState::GenericRead);
    assert_eq!(texture.capture(), bytes);
}

#[test]
fn unpadded_rows_lock_the_upload_buffer_directly() {
    let (device, graphics) = null_graphics();
    let mut texture = graphics
        .create_texture(&TextureDesc {
            size: Vec2I::new(64, 4),
            ..Default::default()
        })
        .unwrap();
    assert!(texture.is_editable());
    assert!(!texture.is_shadowed());

    let blank = texture.capture();
    assert_eq!(blank, vec![0u8; 64 * 4 * 4]);
    texture.lock().unwrap();
    texture.unlock().unwrap();
    assert_eq!(texture.capture(), blank);

    let bytes = pattern(64 * 4 * 4);
    texture.write(&bytes).unwrap();
    assert!(device.journal().contains(&JournalEntry::CopyBufferToTexture {
        row_pitch: 256,
        rows: 4,
    }));

    assert_eq!(&*texture.lock().unwrap(), &bytes[..]);
    texture.unlock().unwrap();
    assert_eq!(texture.state(), ResourceState::GenericRead);
    assert_eq!(texture.capture(), bytes);
}

#[test]
fn render_textures_accept_uploads() {
    let (_device, graphics) = null_graphics();
    let mut texture = graphics
        .create_render_texture(Vec2I::new(33, 3), Format::B8G8R8A8Unorm)
        .unwrap();
    assert_eq!(texture.state(), ResourceState::GenericRead);
    assert!(texture.is_editable());

    let bytes = pattern(33 * 3 * 4);
    texture.write(&bytes).unwrap();
    assert_eq!(texture.capture(), bytes);
    assert_eq!(texture.state(), ResourceState::GenericRead);
}

#[test]
fn depth_textures_are_not_editable() {
    let (_device, graphics) = null_graphics();
    let mut depth = graphics.create_depth_texture(Vec2I::new(8, 8)).unwrap();

    assert_eq!(depth.format(), Format::D32Float);
    assert_eq!(depth.state(), ResourceState::DepthRead);
    assert!(matches!(
        depth.lock(),
        Err(GPUError::State(StateError::NotEditable))
    ));
    assert_eq!(depth.capture().len(), 8 * 8 * 4);
    assert_eq!(depth.state(), ResourceState::DepthRead);
}

#[test]
fn failed_upload_leaves_state_untouched() {
    let (device, graphics) = null_graphics();
    let mut texture = graphics
        .create_texture(&TextureDesc {
            size: Vec2I::new(4, 4),
            ..Default::default()
        })
        .unwrap();

    device.inject_fault(Fault::Submit);
    let err = texture.write(&pattern(64)).unwrap_err();
    assert!(matches!(err, GPUError::Transfer(TransferError::Submit(_))));
    assert_eq!(texture.state(), ResourceState::CopyDestination);
    assert_eq!(
        device.device_state(texture.resource().unwrap()),
        Some(ResourceState::CopyDestination)
    );
    assert!(!texture.is_locked());

    texture.write(&pattern(64)).unwrap();
    assert_eq!(texture.state(), ResourceState::GenericRead);
}
