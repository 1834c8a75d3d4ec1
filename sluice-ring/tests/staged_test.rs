use rand::Rng;
use sluice_ring::{Behavior, RingError, StagedRing, SyncType};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

#[test]
fn test_out_of_order_release_dequeues_in_order() {
    let ring = StagedRing::<u32>::new(16, 1).unwrap();
    assert_eq!(ring.enqueue_bulk(&[1, 2, 3, 4, 5, 6]), 6);

    let (mut a, mut b, mut c) = ([0u32; 2], [0u32; 2], [0u32; 2]);
    let ra = ring.acquire(0, &mut a, Behavior::Exact).unwrap();
    let rb = ring.acquire(0, &mut b, Behavior::Exact).unwrap();
    let rc = ring.acquire(0, &mut c, Behavior::Exact).unwrap();
    assert_eq!((a, b, c), ([1, 2], [3, 4], [5, 6]));

    let mut out = [0u32; 6];
    rc.release_with(&[50, 60]);
    assert_eq!(ring.dequeue_burst(&mut out), 0);
    rb.release_with(&[30, 40]);
    assert_eq!(ring.dequeue_burst(&mut out), 0);
    assert_eq!(ring.stage_snapshot(0).unwrap().tail, 0);

    // The oldest range completes the run; everything flows through at once.
    ra.release_with(&[10, 20]);
    assert_eq!(ring.stage_snapshot(0).unwrap().tail, 6);
    assert_eq!(ring.dequeue_burst(&mut out), 6);
    assert_eq!(out, [10, 20, 30, 40, 50, 60]);
    assert!(ring.is_empty());
}

#[test]
fn test_next_stage_waits_for_previous_release() {
    let ring = StagedRing::<u32>::new(8, 3).unwrap();
    ring.enqueue_bulk(&[1, 2, 3, 4, 5]);

    let mut buf = [0u32; 8];
    assert!(ring.acquire_burst(1, &mut buf).unwrap().is_empty());

    // Stage 0 takes ranges of three, stage 1 of two, stage 2 one at a time.
    let r = ring.acquire(0, &mut buf[..3], Behavior::Exact).unwrap();
    assert_eq!((r.len(), r.remaining()), (3, 2));
    r.release_with(&[10, 20, 30]);
    let r = ring.acquire_burst(0, &mut buf).unwrap();
    assert_eq!(r.len(), 2);
    drop(r);

    let r = ring.acquire(1, &mut buf[..2], Behavior::Exact).unwrap();
    assert_eq!(&buf[..2], &[10, 20]);
    r.release();
    assert!(ring.acquire_bulk(2, &mut buf[..3]).unwrap().is_empty());
    for expected in [10, 20] {
        let r = ring.acquire(2, &mut buf[..1], Behavior::Exact).unwrap();
        assert_eq!(buf[0], expected);
        r.release();
    }

    let mut out = [0u32; 8];
    assert_eq!(ring.dequeue_burst(&mut out), 2);
    assert_eq!(&out[..2], &[10, 20]);
    assert_eq!(ring.count(), 3);
}

#[test]
fn test_dropped_reservation_releases_unchanged() {
    let ring = StagedRing::<u32>::new(4, 1).unwrap();
    ring.enqueue_bulk(&[7, 8]);
    {
        let mut buf = [0u32; 2];
        let r = ring.acquire_bulk(0, &mut buf).unwrap();
        assert_eq!(r.stage(), 0);
    }
    let mut out = [0u32; 2];
    assert_eq!(ring.dequeue_bulk(&mut out), 2);
    assert_eq!(out, [7, 8]);
}

#[test]
fn test_metadata_follows_elements() {
    let ring = StagedRing::<u32, u16>::builder(5, 2)
        .producer(SyncType::Single)
        .consumer(SyncType::Single)
        .build()
        .unwrap();
    assert_eq!(ring.size(), 8);
    let t = ring.enqueue_with_meta(&[1, 2, 3], &[7, 8, 9, 10], Behavior::Exact);
    assert_eq!(t.count, 3);
    assert_eq!(t.remaining, 2);

    let (mut items, mut meta) = ([0u32; 3], [0u16; 3]);
    let r = ring
        .acquire_with_meta(0, &mut items, &mut meta, Behavior::Exact)
        .unwrap();
    assert_eq!(meta, [7, 8, 9]);
    r.release_with_meta(&[11, 12, 13], &[70, 80, 90]);

    let r = ring
        .acquire_with_meta(1, &mut items, &mut meta[..2], Behavior::UpTo)
        .unwrap();
    assert_eq!(r.len(), 2);
    assert_eq!((&items[..2], &meta[..2]), (&[11, 12][..], &[70, 80][..]));
    r.release();
    let r = ring.acquire_burst(1, &mut items).unwrap();
    assert_eq!(r.len(), 1);
    r.release();

    let (mut out, mut out_meta) = ([0u32; 4], [0u16; 4]);
    let t = ring.dequeue_with_meta(&mut out, &mut out_meta, Behavior::UpTo);
    assert_eq!(t.count, 3);
    assert_eq!(&out[..3], &[11, 12, 13]);
    assert_eq!(&out_meta[..3], &[70, 80, 90]);
}

#[test]
fn test_exact_capacity_is_honoured() {
    let ring = StagedRing::<u64>::new(10, 1).unwrap();
    assert_eq!((ring.capacity(), ring.size(), ring.stages()), (10, 16, 1));
    let items: Vec<u64> = (0..16).collect();
    assert_eq!(ring.enqueue_bulk(&items), 0);
    assert_eq!(ring.enqueue_burst(&items), 10);
    assert_eq!(ring.free_count(), 0);

    // Elements held by a stage still count against the capacity.
    let mut buf = [0u64; 4];
    let r = ring.acquire_bulk(0, &mut buf).unwrap();
    assert_eq!(ring.count(), 10);
    r.release();
    let mut out = [0u64; 4];
    assert_eq!(ring.dequeue_bulk(&mut out), 4);
    assert_eq!(ring.enqueue_burst(&items), 4);
}

#[test]
fn test_stage_index_checked() {
    let ring = StagedRing::<u32>::new(8, 2).unwrap();
    let mut buf = [0u32; 1];
    assert_eq!(
        ring.acquire(2, &mut buf, Behavior::UpTo).unwrap_err(),
        RingError::StageOutOfRange { stage: 2, stages: 2 }
    );
    assert!(ring.stage_snapshot(5).is_err());
    let dump = format!("{ring:?}");
    assert!(dump.contains("stages"), "{dump}");
}

#[test]
#[should_panic(expected = "release of 2 elements")]
fn test_release_with_short_slice_panics() {
    let ring = StagedRing::<u32>::new(4, 1).unwrap();
    ring.enqueue_bulk(&[1, 2]);
    let mut buf = [0u32; 2];
    let r = ring.acquire_bulk(0, &mut buf).unwrap();
    r.release_with(&[1]);
}

/// Two producers feed three stages of two workers each. Workers hold their
/// ranges for random lengths of time, so releases within a stage interleave,
/// yet every producer's sequence reaches the consumer in order and every
/// element was seen by every stage exactly once.
#[test]
#[cfg_attr(miri, ignore)]
fn test_pipeline_keeps_order_under_contention() {
    const STAGES: u32 = 3;
    const WORKERS: usize = 2;
    const PRODUCERS: u64 = 2;
    const PER_PRODUCER: u64 = 20_000;

    let ring = Arc::new(
        StagedRing::<u64, u32>::builder(100, STAGES)
            .producer(SyncType::MultiRts)
            .consumer(SyncType::MultiHts)
            .build()
            .unwrap(),
    );
    let done = Arc::new(AtomicBool::new(false));

    let mut producers = vec![];
    for p in 0..PRODUCERS {
        let ring = ring.clone();
        producers.push(thread::spawn(move || {
            let mut next = 0;
            while next < PER_PRODUCER {
                let items = [(p << 32) | next];
                if ring.enqueue_with_meta(&items, &[0], Behavior::Exact).count == 1 {
                    next += 1;
                } else {
                    thread::yield_now();
                }
            }
        }));
    }

    let mut workers = vec![];
    for stage in 0..STAGES {
        for _ in 0..WORKERS {
            let ring = ring.clone();
            let done = done.clone();
            workers.push(thread::spawn(move || {
                let mut rng = rand::rng();
                let (mut items, mut meta) = ([0u64; 8], [0u32; 8]);
                while !done.load(Ordering::Acquire) {
                    let want = rng.random_range(1..=8);
                    let r = ring
                        .acquire_with_meta(stage, &mut items[..want], &mut meta[..want], Behavior::UpTo)
                        .unwrap();
                    if r.is_empty() {
                        thread::yield_now();
                        continue;
                    }
                    let n = r.len() as usize;
                    for m in &mut meta[..n] {
                        assert_eq!(*m, stage, "element skipped or repeated a stage");
                        *m += 1;
                    }
                    if rng.random_bool(0.3) {
                        thread::yield_now();
                    }
                    r.release_with_meta(&items[..n], &meta[..n]);
                }
            }));
        }
    }

    let mut expected = [0u64; PRODUCERS as usize];
    let (mut out, mut meta) = ([0u64; 16], [0u32; 16]);
    let mut got = 0;
    while got < PRODUCERS * PER_PRODUCER {
        let n = ring.dequeue_with_meta(&mut out, &mut meta, Behavior::UpTo).count as usize;
        for (&v, &m) in out[..n].iter().zip(&meta[..n]) {
            assert_eq!(m, STAGES);
            let p = (v >> 32) as usize;
            assert_eq!(v & 0xFFFF_FFFF, expected[p], "producer {p} out of order");
            expected[p] += 1;
        }
        got += n as u64;
        if n == 0 {
            thread::yield_now();
        }
    }
    done.store(true, Ordering::Release);

    for h in producers.into_iter().chain(workers) {
        h.join().unwrap();
    }
    assert!(ring.is_empty());
    assert_eq!(expected, [PER_PRODUCER; PRODUCERS as usize]);
}
