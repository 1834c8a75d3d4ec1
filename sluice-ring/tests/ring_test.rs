use sluice_ring::{Behavior, Ring, SyncType, Transfer};

const ALL_SYNC: [SyncType; 4] = [
    SyncType::Single,
    SyncType::MultiPlain,
    SyncType::MultiHts,
    SyncType::MultiRts,
];

fn rings(capacity: u32) -> Vec<Ring<u64>> {
    let mut out = Vec::new();
    for prod in ALL_SYNC {
        for cons in ALL_SYNC {
            out.push(Ring::with_sync(capacity, prod, cons).unwrap());
        }
    }
    out
}

#[test]
fn test_simple_push_pop() {
    let q = Ring::new(2).unwrap();
    assert!(q.is_empty());
    assert!(!q.is_full());

    assert!(q.push(1u32).is_ok());
    assert!(!q.is_empty());
    assert!(!q.is_full());

    assert!(q.push(2).is_ok());
    assert!(q.is_full());

    assert_eq!(q.push(3), Err(3));

    assert_eq!(q.pop(), Some(1));
    assert!(!q.is_full());

    assert_eq!(q.pop(), Some(2));
    assert!(q.is_empty());

    assert_eq!(q.pop(), None);
}

#[test]
fn test_wrap_around_fifo() {
    for ring in rings(4) {
        assert_eq!(ring.enqueue_bulk(&[0xA, 0xB, 0xC, 0xD]), 4);

        let mut out = [0u64; 2];
        assert_eq!(ring.dequeue_bulk(&mut out), 2);
        assert_eq!(out, [0xA, 0xB]);

        assert_eq!(ring.enqueue_bulk(&[0xE, 0xF]), 2);

        let mut out = [0u64; 4];
        assert_eq!(ring.dequeue_bulk(&mut out), 4);
        assert_eq!(out, [0xC, 0xD, 0xE, 0xF], "{ring:?}");
    }
}

#[test]
fn test_bulk_is_all_or_nothing() {
    for ring in rings(8) {
        assert_eq!(ring.enqueue_bulk(&[1; 6]), 6);
        assert_eq!(ring.enqueue_bulk(&[2; 3]), 0);
        assert_eq!(ring.count(), 6);
        assert_eq!(ring.producer_snapshot().head, 6);

        let mut out = [0u64; 7];
        assert_eq!(ring.dequeue_bulk(&mut out), 0);
        assert_eq!(ring.consumer_snapshot().head, 0);
        assert_eq!(ring.count(), 6);
    }
}

#[test]
fn test_burst_takes_what_fits() {
    for ring in rings(8) {
        let t = ring.enqueue(&[7; 11], Behavior::UpTo);
        assert_eq!(t, Transfer { count: 8, remaining: 0 });
        assert!(ring.is_full());

        let mut out = [0u64; 5];
        let t = ring.dequeue(&mut out, Behavior::UpTo);
        assert_eq!(t, Transfer { count: 5, remaining: 3 });

        let mut out = [0u64; 5];
        assert_eq!(ring.dequeue_burst(&mut out), 3);
        assert_eq!(ring.dequeue_burst(&mut out), 0);
    }
}

#[test]
fn test_zero_request_is_noop() {
    for ring in rings(4) {
        assert_eq!(ring.enqueue(&[], Behavior::Exact), Transfer::default());
        let mut out: [u64; 0] = [];
        assert_eq!(ring.dequeue(&mut out, Behavior::UpTo), Transfer::default());
        assert_eq!(ring.producer_snapshot().head, 0);
        assert_eq!(ring.consumer_snapshot().head, 0);
        if let Some(cnt) = ring.producer_snapshot().head_cnt {
            assert_eq!(cnt, 0);
        }
    }
}

#[test]
fn test_count_and_free_count() {
    let ring = Ring::<u32>::new(16).unwrap();
    assert_eq!(ring.capacity(), 16);
    assert_eq!(ring.free_count(), 16);
    ring.enqueue_bulk(&[0; 10]);
    assert_eq!(ring.count(), 10);
    assert_eq!(ring.free_count(), 6);
    let mut out = [0; 4];
    ring.dequeue_bulk(&mut out);
    assert_eq!(ring.count(), 6);
    assert_eq!(ring.free_count(), 10);
}

#[test]
fn test_every_wrap_offset() {
    for ring in rings(4) {
        let mut next = 0u64;
        let mut expect = 0u64;
        for round in 0..37 {
            let burst = (round % 4) + 1;
            let items: Vec<u64> = (next..next + burst).collect();
            assert_eq!(ring.enqueue_bulk(&items), burst as u32);
            next += burst;

            let mut out = vec![0u64; burst as usize];
            assert_eq!(ring.dequeue_bulk(&mut out), burst as u32);
            for v in out {
                assert_eq!(v, expect);
                expect += 1;
            }
        }
        assert!(ring.is_empty());
    }
}

#[test]
fn test_struct_elements() {
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Desc {
        addr: u64,
        len: u16,
        flags: u8,
    }

    let ring = Ring::<Desc>::with_sync(8, SyncType::MultiHts, SyncType::MultiRts).unwrap();
    let d = Desc {
        addr: 0xdead_beef,
        len: 1500,
        flags: 3,
    };
    ring.push(d).unwrap();
    assert_eq!(ring.pop(), Some(d));
}

#[test]
fn test_debug_dump_mentions_disciplines() {
    let ring = Ring::<u32>::with_sync(8, SyncType::MultiRts, SyncType::Single).unwrap();
    let dump = format!("{ring:?}");
    assert!(dump.contains("MultiRts"));
    assert!(dump.contains("Single"));
    assert!(dump.contains("capacity: 8"));
}

#[test]
fn test_exact_size_ring_holds_requested_count() {
    for prod in ALL_SYNC {
        for cons in ALL_SYNC {
            let ring = Ring::<u32>::builder(15)
                .producer(prod)
                .consumer(cons)
                .exact_size(true)
                .build()
                .unwrap();
            assert_eq!(ring.capacity(), 15);
            assert_eq!(ring.size(), 16);

            let items: Vec<u32> = (0..16).collect();
            assert_eq!(ring.enqueue_bulk(&items), 0);
            assert_eq!(ring.enqueue_burst(&items), 15);
            assert!(ring.is_full());
            assert_eq!(ring.free_count(), 0);
            assert_eq!(ring.push(99), Err(99));

            // Walk the positions across the storage wrap several times.
            for round in 0..40u32 {
                assert_eq!(ring.pop(), Some(round));
                assert!(ring.push(15 + round).is_ok());
                assert!(ring.is_full());
            }
            let mut out = [0u32; 15];
            assert_eq!(ring.dequeue_bulk(&mut out), 15);
            let expected: Vec<u32> = (40..55).collect();
            assert_eq!(&out[..], &expected[..]);
        }
    }
}

#[test]
fn test_non_exact_capacity_must_be_power_of_two() {
    let err = Ring::<u32>::builder(15).build().unwrap_err();
    assert_eq!(err, sluice_ring::RingError::CapacityNotPowerOfTwo(15));
}
