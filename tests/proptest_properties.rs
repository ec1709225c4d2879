use crossrep::config::FilterConfig;
use crossrep::engine::RunDetector;
use crossrep::hash::rolling::HashEngine;
use crossrep::hash::shuffle::ByteShuffle;
use crossrep::map::FingerprintMap;
use proptest::prelude::*;

fn test_config() -> FilterConfig {
    FilterConfig {
        common_modulus: 10_007,
        ..FilterConfig::default()
    }
}

/// Hash a whole stream in one call.
fn hash_single_pass(engine: &HashEngine, data: &[u8]) -> (Vec<u64>, Vec<u8>) {
    let n = data.len() - engine.shingle_len() + 1;
    let dv = engine.filter_count();
    let mut com = vec![0u64; n];
    let mut div = vec![0u8; (n + 1) * dv];
    engine.hash_batch(data, n, &mut com, &mut div);
    div.truncate(n * dv);
    (com, div)
}

/// Hash a stream in batches with the carry stitching the reader performs:
/// each batch buffer is the previous batch's trailing LC bytes followed by
/// the fresh input, and the first batch's sentinel shingles are dropped.
fn hash_batched(engine: &HashEngine, data: &[u8], batch_size: usize) -> (Vec<u64>, Vec<u8>) {
    let lc = engine.shingle_len() - 1;
    let dv = engine.filter_count();
    let mut carry = vec![0u8; lc];
    let mut com_out = Vec::new();
    let mut div_out = Vec::new();

    let mut offset = 0;
    let mut first = true;
    while offset < data.len() {
        let n = batch_size.min(data.len() - offset);
        let mut buf = carry.clone();
        buf.extend_from_slice(&data[offset..offset + n]);
        let mut com = vec![0u64; n];
        let mut div = vec![0u8; (n + 1) * dv];
        engine.hash_batch(&buf, n, &mut com, &mut div);

        let j0 = if first { lc } else { 0 };
        com_out.extend_from_slice(&com[j0..n]);
        div_out.extend_from_slice(&div[j0 * dv..n * dv]);

        carry.copy_from_slice(&buf[n..n + lc]);
        offset += n;
        first = false;
    }
    (com_out, div_out)
}

proptest! {
    #[test]
    fn prop_batched_hashing_equals_single_pass(
        data in proptest::collection::vec(any::<u8>(), 64..2048),
        batch_size in 8usize..512
    ) {
        let engine = HashEngine::new(&test_config());
        let (com_one, div_one) = hash_single_pass(&engine, &data);
        let (com_batched, div_batched) = hash_batched(&engine, &data, batch_size);

        // The carry stitches batches into the exact single-pass shingle
        // stream: no gap, no duplication, any batch size.
        prop_assert_eq!(com_batched, com_one);
        prop_assert_eq!(div_batched, div_one);
    }

    #[test]
    fn prop_rolled_fingerprints_equal_direct_folds(
        data in proptest::collection::vec(any::<u8>(), 16..512)
    ) {
        let engine = HashEngine::new(&test_config());
        let (com, div) = hash_single_pass(&engine, &data);
        let dv = engine.filter_count();
        for j in 0..data.len() - engine.shingle_len() + 1 {
            prop_assert_eq!(com[j], engine.fold_common(&data[j..]));
            for id in 0..dv {
                prop_assert_eq!(div[j * dv + id], engine.fold_div(id, &data[j..]));
            }
        }
    }

    #[test]
    fn prop_shuffle_is_a_bijection(seed in any::<u64>()) {
        let shuffle = ByteShuffle::from_seed(seed);
        let mut seen = [false; 256];
        for &v in shuffle.table() {
            prop_assert!(!seen[v as usize]);
            seen[v as usize] = true;
        }
    }

    #[test]
    fn prop_marked_shingles_always_probe_as_hits(
        data in proptest::collection::vec(any::<u8>(), 32..1024)
    ) {
        // One-sidedness: whatever was marked can never be missed.
        let cfg = test_config();
        let engine = HashEngine::new(&cfg);
        let mut map = FingerprintMap::new(cfg.map_len()).unwrap();

        let n = data.len() - cfg.shingle_len + 1;
        let dv = cfg.filter_count;
        let mut div = vec![0u8; dv];
        for j in 0..n {
            for (id, d) in div.iter_mut().enumerate() {
                *d = engine.fold_div(id, &data[j..]);
            }
            map.mark(engine.fold_common(&data[j..]), &div);
        }
        for j in 0..n {
            for (id, d) in div.iter_mut().enumerate() {
                *d = engine.fold_div(id, &data[j..]);
            }
            prop_assert!(map.is_hit(engine.fold_common(&data[j..]), &div));
        }
    }

    #[test]
    fn prop_residue_counts_runs_exactly(
        hits in proptest::collection::vec(any::<bool>(), 0..512),
        threshold in 0u64..8
    ) {
        let mut detector = RunDetector::new(threshold);
        let mut residues = Vec::with_capacity(hits.len());
        for &hit in &hits {
            detector.observe(hit);
            residues.push(detector.residue());
        }

        // Residue never decreases.
        prop_assert!(residues.windows(2).all(|w| w[0] <= w[1]));

        // A run of k hits contributes exactly max(0, k - threshold).
        let mut expected = 0u64;
        let mut run = 0u64;
        for &hit in &hits {
            if hit {
                run += 1;
            } else {
                expected += run.saturating_sub(threshold);
                run = 0;
            }
        }
        expected += run.saturating_sub(threshold);
        prop_assert_eq!(detector.residue(), expected);
    }

    #[test]
    fn prop_max_count_is_the_longest_run(
        hits in proptest::collection::vec(any::<bool>(), 0..512)
    ) {
        let mut detector = RunDetector::new(3);
        for &hit in &hits {
            detector.observe(hit);
        }
        let longest = hits
            .split(|&h| !h)
            .map(|run| run.len() as u64)
            .max()
            .unwrap_or(0);
        prop_assert_eq!(detector.max_count(), longest);
    }
}
