use exposure_kernel::record::EventRecord;
use exposure_kernel::types::id::EphemeralId;
use exposure_kernel::types::TimeRange;
use exposure_node::store::{AppendOutcome, EventStore, StoreConfig};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn rec(b: u8, t: u64) -> EventRecord {
    EventRecord::new(EphemeralId([b; 16]), -60 - b as i16 % 20, t, Some(format!("u4pr{}", b % 7).into_bytes()))
}

fn segment_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|x| x == "log"))
        .collect();
    files.sort();
    files
}

fn all(store: &EventStore) -> Vec<EventRecord> {
    store.query(TimeRange::all(), None).map(|r| r.unwrap()).collect()
}

#[test]
fn test_records_survive_reopen() {
    let dir = tempdir().unwrap();
    {
        let store = EventStore::open(dir.path(), StoreConfig { segment_max_bytes: 512 }).unwrap();
        for i in 0..40u8 {
            assert_eq!(store.append(&rec(i, 1_000 + i as u64)).unwrap(), AppendOutcome::Stored);
        }
    }

    let store = EventStore::open(dir.path(), StoreConfig { segment_max_bytes: 512 }).unwrap();
    assert_eq!(store.len(), 40);
    assert!(store.segment_count() > 1);
    assert_eq!(all(&store)[17], rec(17, 1_017));
    assert_eq!(store.append(&rec(3, 1_003)).unwrap(), AppendOutcome::Duplicate);
}

#[test]
fn test_torn_tail_is_truncated() {
    let dir = tempdir().unwrap();
    {
        let store = EventStore::open(dir.path(), StoreConfig::default()).unwrap();
        store.append(&rec(1, 10)).unwrap();
        store.append(&rec(2, 20)).unwrap();
    }
    let newest = segment_files(dir.path()).pop().unwrap();
    let clean_len = fs::metadata(&newest).unwrap().len();
    {
        // A crash in the middle of writing a third frame.
        let mut file = OpenOptions::new().append(true).open(&newest).unwrap();
        file.write_all(&[0x45, 0x58, 0x50, 0x52, 3, 0, 0, 0, 0, 0]).unwrap();
    }

    let store = EventStore::open(dir.path(), StoreConfig::default()).unwrap();
    assert_eq!(store.len(), 2);
    assert_eq!(fs::metadata(&newest).unwrap().len(), clean_len);

    store.append(&rec(3, 30)).unwrap();
    drop(store);
    let store = EventStore::open(dir.path(), StoreConfig::default()).unwrap();
    assert_eq!(all(&store).len(), 3);
    assert_eq!(store.corrupted_count(), 0);
}

#[test]
fn test_corrupt_middle_frame_skipped_on_open() {
    let dir = tempdir().unwrap();
    let frame_len;
    {
        let store = EventStore::open(dir.path(), StoreConfig::default()).unwrap();
        for i in 1..=3u8 {
            store.append(&EventRecord::new(EphemeralId([i; 16]), -50, i as u64, None)).unwrap();
        }
        frame_len = store.stats().active_segment_bytes / 3;
    }
    let seg = segment_files(dir.path()).pop().unwrap();
    let mut bytes = fs::read(&seg).unwrap();
    bytes[(frame_len + 30) as usize] ^= 0xFF;
    fs::write(&seg, &bytes).unwrap();

    let store = EventStore::open(dir.path(), StoreConfig::default()).unwrap();
    assert_eq!(store.corrupted_count(), 1);
    let ids: Vec<u8> = all(&store).iter().map(|r| r.ephemeral_id.0[0]).collect();
    assert_eq!(ids, vec![1, 3]);
}

#[test]
fn test_corruption_found_during_scan_is_counted() {
    let dir = tempdir().unwrap();
    let store = EventStore::open(dir.path(), StoreConfig::default()).unwrap();
    for i in 1..=3u8 {
        store.append(&EventRecord::new(EphemeralId([i; 16]), -50, i as u64, None)).unwrap();
    }
    let frame_len = store.stats().active_segment_bytes / 3;

    // Damage the first frame behind the store's back.
    let seg = segment_files(dir.path()).pop().unwrap();
    let mut file = OpenOptions::new().write(true).open(&seg).unwrap();
    let mut bytes = fs::read(&seg).unwrap();
    bytes[30] ^= 0xFF;
    file.write_all(&bytes[..frame_len as usize]).unwrap();
    file.sync_all().unwrap();

    let results: Vec<_> = store.query(TimeRange::all(), None).collect();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(store.corrupted_count(), 1);
}

#[test]
fn test_scan_started_before_sweep_keeps_its_snapshot() {
    let dir = tempdir().unwrap();
    let store = EventStore::open(dir.path(), StoreConfig { segment_max_bytes: 256 }).unwrap();
    for i in 0..20u8 {
        store.append(&rec(i, i as u64 * 10)).unwrap();
    }

    let mut scan = store.query(TimeRange::all(), None);
    let first = scan.next().unwrap().unwrap();
    assert_eq!(first.observed_at, 0);

    let stats = store.sweep_expired_at(1_000, Duration::from_secs(900)).unwrap();
    assert_eq!(stats.records_removed, 10);
    assert_eq!(store.len(), 10);

    // The old scan still sees everything it snapshotted, expired or not.
    let rest: Vec<u64> = scan.map(|r| r.unwrap().observed_at).collect();
    assert_eq!(rest.len(), 19);
    assert_eq!(rest[0], 10);

    // A new scan only sees the survivors, and only their files remain.
    let fresh: Vec<u64> = store.query(TimeRange::all(), None).map(|r| r.unwrap().observed_at).collect();
    assert_eq!(fresh, (10..20).map(|i| i * 10).collect::<Vec<u64>>());
    assert_eq!(segment_files(dir.path()).len(), store.segment_count());
}

#[test]
fn test_sweep_survives_reopen() {
    let dir = tempdir().unwrap();
    {
        let store = EventStore::open(dir.path(), StoreConfig { segment_max_bytes: 256 }).unwrap();
        for i in 0..12u8 {
            store.append(&rec(i, i as u64 * 100)).unwrap();
        }
        store.sweep_expired_at(1_200, Duration::from_secs(600)).unwrap();
        assert_eq!(store.len(), 6);
    }
    let store = EventStore::open(dir.path(), StoreConfig { segment_max_bytes: 256 }).unwrap();
    assert_eq!(store.len(), 6);
    assert!(all(&store).iter().all(|r| r.observed_at >= 600));
}

#[test]
fn test_torn_tail_after_sweep_is_truncated_on_every_reopen() {
    let dir = tempdir().unwrap();
    let config = StoreConfig { segment_max_bytes: 200 };
    {
        let store = EventStore::open(dir.path(), config).unwrap();
        for i in 0..6u8 {
            store.append(&rec(i, 10 + i as u64)).unwrap();
        }
        for i in 0..3u8 {
            store.append(&rec(100 + i, 5_000 + i as u64)).unwrap();
        }
        let stats = store.sweep_expired_at(5_000, Duration::from_secs(4_985)).unwrap();
        assert_eq!(stats.segments_rewritten, 2);
        assert_eq!(stats.records_removed, 5);
        store.append(&rec(200, 5_100)).unwrap();
    }

    // Appends land in the highest-numbered segment, compaction output or not.
    let active = segment_files(dir.path()).pop().unwrap();
    let clean_len = fs::metadata(&active).unwrap().len();
    {
        let mut file = OpenOptions::new().append(true).open(&active).unwrap();
        file.write_all(&[0x45, 0x58, 0x50, 0x52, 9, 0, 0]).unwrap();
    }

    for _ in 0..2 {
        let store = EventStore::open(dir.path(), config).unwrap();
        assert_eq!(store.corrupted_count(), 0);
        assert_eq!(store.len(), 5);
        assert_eq!(fs::metadata(&active).unwrap().len(), clean_len);
        assert!(all(&store).iter().any(|r| r.observed_at == 5_100));
    }
}

#[test]
fn test_concurrent_appends_readers_and_sweeps() {
    const CUTOFF: u64 = 5_000;
    let dir = tempdir().unwrap();
    let store = Arc::new(EventStore::open(dir.path(), StoreConfig { segment_max_bytes: 1024 }).unwrap());

    // Expired records already on disk when the sweeper starts.
    for i in 0..40u64 {
        store.append(&EventRecord::new(EphemeralId([200; 16]), -70, i, None)).unwrap();
    }

    let writers: Vec<_> = (0..4u8)
        .map(|w| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..50u64 {
                    let record = EventRecord::new(EphemeralId([w; 16]), -55, 10_000 + i, None);
                    store.append(&record).unwrap();
                    // Late arrivals that are already past retention.
                    let stale = EventRecord::new(EphemeralId([w + 100; 16]), -80, 1_000 + i, None);
                    assert_eq!(store.append(&stale).unwrap(), AppendOutcome::Stored);
                    // Every writer also retries its previous record.
                    if i > 0 {
                        let again = EventRecord::new(EphemeralId([w; 16]), -90, 10_000 + i - 1, None);
                        assert_eq!(store.append(&again).unwrap(), AppendOutcome::Duplicate);
                    }
                }
            })
        })
        .collect();

    let reader = {
        let store = store.clone();
        thread::spawn(move || {
            for _ in 0..20 {
                let mut last = 0;
                for record in store.query(TimeRange::all(), None) {
                    let t = record.unwrap().observed_at;
                    assert!(t >= last);
                    last = t;
                }
            }
        })
    };

    let sweeper = {
        let store = store.clone();
        thread::spawn(move || {
            let mut removed = 0;
            let mut rewritten = 0;
            for _ in 0..10 {
                let stats = store.sweep_expired_at(10_000, Duration::from_secs(10_000 - CUTOFF)).unwrap();
                removed += stats.records_removed;
                rewritten += stats.segments_rewritten;
                thread::sleep(Duration::from_millis(1));
            }
            (removed, rewritten)
        })
    };

    for w in writers {
        w.join().unwrap();
    }
    reader.join().unwrap();
    let (mut removed, rewritten) = sweeper.join().unwrap();
    assert!(rewritten > 0);

    let last = store.sweep_expired_at(10_000, Duration::from_secs(10_000 - CUTOFF)).unwrap();
    removed += last.records_removed;

    let appended = 40 + 4 * 50 * 2;
    assert_eq!(removed, 40 + 4 * 50);
    assert_eq!(store.len(), appended - removed);

    let survivors: Vec<u64> = all(&store).iter().map(|r| r.observed_at).collect();
    assert_eq!(survivors.len(), 200);
    assert!(survivors.iter().all(|&t| t >= CUTOFF));
    assert_eq!(store.corrupted_count(), 0);
    drop(store);

    let store = EventStore::open(dir.path(), StoreConfig { segment_max_bytes: 1024 }).unwrap();
    assert_eq!(store.len(), 200);
    assert!(all(&store).iter().all(|r| r.observed_at >= CUTOFF));
    assert_eq!(store.corrupted_count(), 0);
    assert_eq!(segment_files(dir.path()).len(), store.segment_count());
}
