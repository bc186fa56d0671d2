mod common;

use common::{null_graphics, pattern};
use llgi::gpu::null::{Fault, JournalEntry};
use llgi::{
    execute_one_shot, GPUError, ResourceState, StateError, TextureDesc, TransferError,
    TransferObject, Vec2I,
};

const CREATION_ORDER: [TransferObject; 4] = [
    TransferObject::CommandAllocator,
    TransferObject::CommandBuffer,
    TransferObject::Fence,
    TransferObject::Event,
];

#[test]
fn each_creation_failure_unwinds_in_reverse() {
    for (failing, object) in CREATION_ORDER.iter().copied().enumerate() {
        let (device, graphics) = null_graphics();
        let mut texture = graphics
            .create_texture(&TextureDesc {
                size: Vec2I::new(4, 4),
                ..Default::default()
            })
            .unwrap();
        let live = device.live_allocations();
        device.clear_journal();

        device.inject_fault(Fault::Create(object));
        let err = texture.write(&pattern(64)).unwrap_err();
        assert!(
            matches!(err, GPUError::Transfer(TransferError::Create { object: o, .. }) if o == object),
            "{object}: {err}"
        );

        let mut expected: Vec<_> = CREATION_ORDER[..failing]
            .iter()
            .map(|o| JournalEntry::Create(*o))
            .collect();
        expected.extend(
            CREATION_ORDER[..failing]
                .iter()
                .rev()
                .map(|o| JournalEntry::Destroy(*o)),
        );
        assert_eq!(device.journal(), expected, "{object}");
        assert_eq!(texture.state(), ResourceState::CopyDestination);
        assert_eq!(device.live_allocations(), live);
    }
}

#[test]
fn submit_failure_tears_down_everything() {
    let (device, graphics) = null_graphics();
    let mut texture = graphics
        .create_texture(&TextureDesc {
            size: Vec2I::new(4, 4),
            ..Default::default()
        })
        .unwrap();
    device.clear_journal();

    device.inject_fault(Fault::Submit);
    assert!(texture.write(&pattern(64)).is_err());

    let journal = device.journal();
    assert!(!journal.contains(&JournalEntry::Submit));
    let destroyed: Vec<_> = journal
        .iter()
        .filter_map(|e| match e {
            JournalEntry::Destroy(o) => Some(*o),
            _ => None,
        })
        .collect();
    let mut reversed = CREATION_ORDER.to_vec();
    reversed.reverse();
    assert_eq!(destroyed, reversed);
}

#[test]
fn wait_failure_still_tears_down() {
    let (device, graphics) = null_graphics();
    let mut texture = graphics
        .create_texture(&TextureDesc {
            size: Vec2I::new(4, 4),
            ..Default::default()
        })
        .unwrap();
    device.clear_journal();

    device.inject_fault(Fault::Wait);
    let err = texture.write(&pattern(64)).unwrap_err();
    assert!(matches!(err, GPUError::Transfer(TransferError::Wait(_))));

    let journal = device.journal();
    assert!(journal.contains(&JournalEntry::Submit));
    assert_eq!(journal.last(), Some(&JournalEntry::Destroy(TransferObject::CommandAllocator)));
}

#[test]
fn recording_error_skips_submission() {
    let (device, _graphics) = null_graphics();

    let err = execute_one_shot(&*device, |_| Err(StateError::NotAllocated.into())).unwrap_err();
    assert!(matches!(err, GPUError::State(StateError::NotAllocated)));

    let journal = device.journal();
    assert!(!journal.contains(&JournalEntry::Submit));
    assert_eq!(
        journal.iter().filter(|e| matches!(e, JournalEntry::Destroy(_))).count(),
        CREATION_ORDER.len()
    );
}

#[test]
fn explicit_transition_is_skipped_when_already_there() {
    let (device, graphics) = null_graphics();
    let mut texture = graphics
        .create_texture(&TextureDesc {
            size: Vec2I::new(2, 2),
            ..Default::default()
        })
        .unwrap();
    device.clear_journal();

    texture.transition(ResourceState::CopyDestination).unwrap();
    assert!(device.journal().is_empty());

    texture.transition(ResourceState::CopySource).unwrap();
    assert_eq!(texture.state(), ResourceState::CopySource);
    assert!(device.journal().contains(&JournalEntry::Barrier {
        before: ResourceState::CopyDestination,
        after: ResourceState::CopySource,
    }));
}
