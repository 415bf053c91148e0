// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::batch::{derive_ephemeral_id, KeyedBlake3Verifier, PublishedKeyBatch};
use crate::matcher::{match_all, Matcher};
use crate::record::EventRecord;
use crate::staged::StagedIdentifiers;
use crate::types::id::{DiagnosisKey, EphemeralId, Epoch};
use std::convert::Infallible;
use std::vec::Vec;

const IDS_PER_KEY: u32 = 8;

fn signer() -> KeyedBlake3Verifier {
    KeyedBlake3Verifier::from_secret("matching-tests")
}

#[test]
fn test_tie_break_prefers_earliest_epoch() {
    // One identifier staged under epochs 5 and 7 (rotation-boundary overlap).
    let shared = EphemeralId([0x42; 16]);
    let mut staged = StagedIdentifiers::new();
    staged.insert(shared, Epoch(7));
    staged.insert(shared, Epoch(5));

    let record = EventRecord::new(shared, -58, 1_000, None);
    let matches: Vec<_> = match_all(vec![record], &staged).collect();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].matched_epoch, Epoch(5));
}

#[test]
fn test_tie_break_through_batches() {
    let key = DiagnosisKey([9; 16]);
    let batch5 = PublishedKeyBatch::signed(Epoch(5), vec![key], &signer());
    let (mut staged, _) = StagedIdentifiers::from_batch(&batch5, IDS_PER_KEY);

    // Epoch 7's batch republishes an identifier seen in epoch 5.
    let overlap = derive_ephemeral_id(&key, Epoch(5), 3);
    let (mut later, _) = StagedIdentifiers::from_batch(
        &PublishedKeyBatch::signed(Epoch(7), vec![DiagnosisKey([1; 16])], &signer()),
        IDS_PER_KEY,
    );
    later.insert(overlap, Epoch(7));

    // Merge order must not matter.
    let mut reversed = later.clone();
    reversed.merge(staged.clone());
    staged.merge(later);

    let record = EventRecord::new(overlap, -70, 10, None);
    for set in [&staged, &reversed] {
        let m: Vec<_> = match_all(vec![record.clone()], set).collect();
        assert_eq!(m[0].matched_epoch, Epoch(5));
        assert_eq!(m[0].derived_id, overlap);
    }
}

#[test]
fn test_exact_match_not_prefix() {
    let staged_id = EphemeralId([7; 16]);
    let mut near = [7u8; 16];
    near[15] = 8;

    let mut staged = StagedIdentifiers::new();
    staged.insert(staged_id, Epoch(1));

    let records = vec![
        EventRecord::new(EphemeralId(near), -50, 1, None),
        EventRecord::new(staged_id, -50, 2, None),
    ];
    let found: Vec<_> = match_all(records, &staged).collect();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].event_record.observed_at, 2);
}

#[test]
fn test_streaming_over_large_source() {
    let key = DiagnosisKey([3; 16]);
    let batch = PublishedKeyBatch::signed(Epoch(2), vec![key], &signer());
    let (staged, counts) = StagedIdentifiers::from_batch(&batch, IDS_PER_KEY);
    assert_eq!(counts.inserted, IDS_PER_KEY as usize);

    let target = derive_ephemeral_id(&key, Epoch(2), 0);
    // Lazily generated source: never materialised.
    let source = (0..50_000u64).map(|i| {
        let id = if i % 10_000 == 0 {
            target
        } else {
            let mut b = [0u8; 16];
            b.copy_from_slice(&blake3::hash(&i.to_le_bytes()).as_bytes()[..16]);
            EphemeralId(b)
        };
        Ok::<_, Infallible>(EventRecord::new(id, -80, i, None))
    });
    let mut matcher = Matcher::new(source, &staged);
    let hits = matcher.by_ref().filter_map(Result::ok).count();
    assert_eq!(hits, 5);
    assert_eq!(matcher.scanned(), 50_000);
}
