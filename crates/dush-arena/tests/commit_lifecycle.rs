//! Commit/decommit traffic as seen by the memory provider.

use dush_arena::{AllocErrorKind, Arena, ArenaConfig, ArenaError};
use dush_test_utils::fixtures::{test_arena_config, TEST_RESERVE_SIZE};
use dush_test_utils::{MemoryCall, RecordingMemory};

fn recording_arena() -> (RecordingMemory, Arena<RecordingMemory>) {
    let mem = RecordingMemory::new();
    let arena = Arena::with_memory(mem.clone(), test_arena_config()).unwrap();
    (mem, arena)
}

#[test]
fn provider_sees_lazy_commit_and_hysteresis() {
    let (mem, mut arena) = recording_arena();

    arena.push(1000, 1).unwrap();
    arena.push(5000, 1).unwrap();
    arena.pop_to(0);
    arena.push(70_000, 1).unwrap();
    arena.pop_to(0);
    drop(arena);

    assert_eq!(
        mem.calls(),
        vec![
            MemoryCall::Reserve {
                size: TEST_RESERVE_SIZE
            },
            MemoryCall::Commit {
                reservation: 0,
                offset: 0,
                size: 4096
            },
            MemoryCall::Commit {
                reservation: 0,
                offset: 4096,
                size: 4096
            },
            MemoryCall::Commit {
                reservation: 0,
                offset: 8192,
                size: 65_536
            },
            MemoryCall::Decommit {
                reservation: 0,
                offset: 0,
                size: 73_728
            },
            MemoryCall::Release {
                reservation: 0,
                size: TEST_RESERVE_SIZE
            },
        ]
    );
}

#[test]
fn pushes_within_committed_space_make_no_calls() {
    let (mem, arena) = recording_arena();
    arena.push(10, 1).unwrap();
    mem.clear_calls();

    for _ in 0..100 {
        arena.push(16, 8).unwrap();
    }
    assert!(mem.calls().is_empty());
}

#[test]
fn small_pops_never_decommit() {
    let (mem, mut arena) = recording_arena();
    arena.push(60 << 10, 1).unwrap();
    for _ in 0..10 {
        arena.pop_to(0);
        arena.push(60 << 10, 1).unwrap();
    }
    assert_eq!(mem.decommitted_bytes(), 0);
    assert_eq!(mem.committed_bytes(), 60 << 10);
}

#[test]
#[cfg(not(feature = "aggressive-asserts"))]
fn refused_commit_leaves_arena_untouched() {
    let (mem, arena) = recording_arena();
    arena.push(100, 1).unwrap();
    let (pos, commit_pos) = (arena.pos(), arena.commit_pos());

    mem.set_commit_failure(true);
    let err = arena.push(10_000, 1).unwrap_err();
    assert_eq!(
        err,
        ArenaError::CommitFailed {
            offset: 4096,
            size: 8192
        }
    );
    assert_eq!(err.kind(), AllocErrorKind::OutOfMemory);
    assert_eq!(dush_arena::last_error(), Some(AllocErrorKind::OutOfMemory));
    assert_eq!(arena.pos(), pos);
    assert_eq!(arena.commit_pos(), commit_pos);

    mem.set_commit_failure(false);
    arena.push(10_000, 1).unwrap();
    assert_eq!(arena.pos(), 10_100);
}

#[test]
fn refused_decommit_keeps_pages_committed() {
    let (mem, mut arena) = recording_arena();
    arena.push(200 << 10, 1).unwrap();

    mem.set_decommit_failure(true);
    arena.reset();
    assert_eq!(arena.pos(), 0);
    assert_eq!(arena.commit_pos(), 200 << 10);
    assert_eq!(dush_arena::last_error(), None);

    mem.set_decommit_failure(false);
    arena.reset();
    assert_eq!(arena.commit_pos(), 0);
    assert_eq!(mem.decommitted_bytes(), 200 << 10);
}

#[test]
fn zero_reserve_never_reaches_provider() {
    let mem = RecordingMemory::new();
    let arena = Arena::with_memory(mem.clone(), ArenaConfig::new(0)).unwrap();
    arena.push(0, 8).unwrap();
    arena.release().unwrap();
    assert!(mem.calls().is_empty());
}

#[test]
fn refused_reservation_is_reported() {
    let mem = RecordingMemory::new();
    mem.fail_reserve_at(0);
    let err = Arena::with_memory(mem.clone(), test_arena_config()).unwrap_err();
    assert_eq!(
        err,
        ArenaError::ReserveFailed {
            size: TEST_RESERVE_SIZE
        }
    );
    assert_eq!(dush_arena::last_error_string(), "Out of memory");
}

#[test]
fn explicit_release_returns_whole_reservation() {
    let (mem, arena) = recording_arena();
    arena.push(5000, 1).unwrap();
    arena.release().unwrap();
    assert_eq!(
        mem.calls().last(),
        Some(&MemoryCall::Release {
            reservation: 0,
            size: TEST_RESERVE_SIZE
        })
    );
}

#[test]
fn temp_region_drop_decommits_large_spans() {
    let (mem, mut arena) = recording_arena();
    arena.push(100, 1).unwrap();
    {
        let region = arena.begin_temp();
        region.push(300 << 10, 1).unwrap();
    }
    assert_eq!(arena.pos(), 100);
    assert_eq!(arena.commit_pos(), 4096);
    assert!(mem
        .calls()
        .iter()
        .any(|call| matches!(call, MemoryCall::Decommit { offset: 4096, .. })));
}
