#![allow(dead_code)]

use std::sync::Arc;

use llgi::gpu::null::{NullDevice, NullDeviceInfo};
use llgi::{Color8, Graphics, GraphicsInfo};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Headless graphics over a fresh null device with 256-byte row pitches.
pub fn null_graphics() -> (Arc<NullDevice>, Graphics<NullDevice>) {
    null_graphics_with(NullDeviceInfo::default())
}

pub fn null_graphics_with(info: NullDeviceInfo) -> (Arc<NullDevice>, Graphics<NullDevice>) {
    init_logging();
    let device = Arc::new(NullDevice::new(info));
    let graphics = Graphics::headless(Arc::clone(&device), GraphicsInfo::default());
    (device, graphics)
}

pub fn solid(color: Color8, count: usize) -> Vec<Color8> {
    vec![color; count]
}

/// Bytes that differ from row to row and from column to column.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
