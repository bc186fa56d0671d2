mod common;

use common::{null_graphics, null_graphics_with, pattern};
use llgi::gpu::null::{Fault, JournalEntry, NullDeviceInfo};
use llgi::{Format, ResourceState, Vec2I};

#[test]
fn capture_returns_tightly_packed_pixels() {
    let (_device, graphics) = null_graphics();
    let mut target = graphics
        .create_render_texture(Vec2I::new(100, 50), Format::R8G8B8A8Unorm)
        .unwrap();
    let bytes = pattern(100 * 50 * 4);
    target.write(&bytes).unwrap();

    let pixels = graphics.capture_render_target(&mut target);
    assert_eq!(pixels.len() as u64, target.memory_size());
    assert_eq!(pixels, bytes);
}

#[test]
fn capture_is_idempotent() {
    let (device, graphics) = null_graphics();
    let mut target = graphics
        .create_render_texture(Vec2I::new(17, 9), Format::R8G8B8A8Unorm)
        .unwrap();
    target.write(&pattern(17 * 9 * 4)).unwrap();

    let first = target.capture();
    let second = target.capture();
    assert_eq!(first, second);
    assert_eq!(target.state(), ResourceState::GenericRead);
    assert_eq!(
        device.device_state(target.resource().unwrap()),
        Some(ResourceState::GenericRead)
    );
}

#[test]
fn screen_capture_returns_to_present() {
    let (device, graphics) = null_graphics();
    let size = Vec2I::new(64, 32);
    let image = device
        .create_screen_image(Format::B8G8R8A8Unorm, size)
        .unwrap();
    let presented = pattern(64 * 32 * 4);
    device.overwrite(&image, &presented).unwrap();

    let mut screen = graphics.wrap_screen_texture(image, Format::B8G8R8A8Unorm, size);
    assert!(!screen.is_editable());
    device.clear_journal();

    assert_eq!(screen.capture(), presented);
    assert_eq!(screen.state(), ResourceState::PresentSource);
    assert_eq!(
        device.device_state(screen.resource().unwrap()),
        Some(ResourceState::PresentSource)
    );

    let journal = device.journal();
    assert_eq!(journal.first(), Some(&JournalEntry::WaitIdle));
    let barriers: Vec<_> = journal
        .iter()
        .filter(|e| matches!(e, JournalEntry::Barrier { .. }))
        .cloned()
        .collect();
    assert_eq!(
        barriers,
        vec![
            JournalEntry::Barrier {
                before: ResourceState::PresentSource,
                after: ResourceState::CopySource,
            },
            JournalEntry::Barrier {
                before: ResourceState::CopySource,
                after: ResourceState::PresentSource,
            },
        ]
    );
}

#[test]
fn failed_capture_is_empty_and_releases_readback() {
    let (device, graphics) = null_graphics();
    let mut target = graphics
        .create_render_texture(Vec2I::new(8, 8), Format::R8G8B8A8Unorm)
        .unwrap();
    let live = device.live_allocations();
    let used = device.memory_in_use();

    device.inject_fault(Fault::Submit);
    assert!(target.capture().is_empty());

    assert_eq!(target.state(), ResourceState::GenericRead);
    assert_eq!(device.live_allocations(), live);
    assert_eq!(device.memory_in_use(), used);
}

#[test]
fn capture_without_memory_for_readback_is_empty() {
    // 16x16 RGBA: a 1024-byte image and a 3904-byte staging buffer with
    // 256-byte rows. Nothing is left for the readback buffer.
    let (_device, graphics) = null_graphics_with(NullDeviceInfo {
        memory_budget: Some(1024 + 3904),
        ..Default::default()
    });
    let mut target = graphics
        .create_render_texture(Vec2I::new(16, 16), Format::R8G8B8A8Unorm)
        .unwrap();

    assert!(target.capture().is_empty());
    assert_eq!(target.state(), ResourceState::GenericRead);
}
