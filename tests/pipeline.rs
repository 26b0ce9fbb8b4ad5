//! End-to-end pipeline tests: optimise, index, filter, merge, align.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use pals::pack::{Packed, Packer};
use pals::pair::new_feature_pair;
use pals::report::GffWriter;
use pals::{DpHit, Pals, PalsError, Sequence};

/// Keeps the selected word size small enough for test-sized finger
/// arrays.
const TEST_MAX_MEM: u64 = 64 << 20;

fn random_seq(rng: &mut StdRng, len: usize) -> Vec<u8> {
    (0..len).map(|_| b"ACGT"[rng.random_range(0..4)]).collect()
}

fn substitute(rng: &mut StdRng, seq: &[u8], rate: f64) -> (Vec<u8>, usize) {
    let mut out = seq.to_vec();
    let mut changed = 0;
    for b in out.iter_mut() {
        if rng.random_range(0.0..1.0) < rate {
            let old = *b;
            while *b == old {
                *b = b"ACGT"[rng.random_range(0..4)];
            }
            changed += 1;
        }
    }
    (out, changed)
}

fn check_thresholds(hits: &[DpHit], min_len: usize, min_id: f64) {
    for h in hits {
        assert!(h.aepos - h.abpos >= min_len, "target span below minimum");
        assert!(h.bepos - h.bbpos >= min_len, "query span below minimum");
        assert!(
            h.error <= 1.0 - min_id + 1e-9,
            "identity {} below {min_id}",
            1.0 - h.error
        );
    }
}

#[test]
fn doubled_sequence_self_comparison_finds_the_repeat() {
    let mut rng = StdRng::seed_from_u64(42);
    let unit = random_seq(&mut rng, 100);
    let mut doubled = unit.clone();
    doubled.extend_from_slice(&unit);
    let target = Sequence::new("doubled", doubled);

    let mut aligner = Pals::new(&target, &target, true).with_max_mem(TEST_MAX_MEM);
    aligner.optimise(50, 0.95).unwrap();
    aligner.build_index().unwrap();
    let hits = aligner.align(false).unwrap();
    aligner.cleanup().unwrap();

    assert_eq!(hits.len(), 1);
    let h = hits[0];
    // The second copy against the first, never the trivial identity.
    assert_eq!((h.abpos, h.aepos), (100, 200));
    assert_eq!((h.bbpos, h.bepos), (0, 100));
    assert_eq!(h.error, 0.0);
    check_thresholds(&hits, 50, 0.95);
}

#[test]
fn substituted_query_aligns_full_length() {
    let mut rng = StdRng::seed_from_u64(7);
    let target_seq = random_seq(&mut rng, 10_000);
    let (query_seq, changed) = substitute(&mut rng, &target_seq, 0.01);
    assert!(changed > 0);

    let target = Sequence::new("t", target_seq);
    let query = Sequence::new("q", query_seq);

    let mut aligner = Pals::new(&target, &query, false).with_max_mem(TEST_MAX_MEM);
    aligner.optimise(400, 0.95).unwrap();
    aligner.build_index().unwrap();
    let hits = aligner.align(false).unwrap();
    aligner.cleanup().unwrap();

    assert_eq!(hits.len(), 1);
    let h = hits[0];
    assert!(h.aepos - h.abpos >= 9_500, "span {}", h.aepos - h.abpos);
    assert!(h.bepos - h.bbpos >= 9_500);
    // Roughly one part in a hundred of identity lost.
    assert!(h.error <= 0.02, "error {}", h.error);
    check_thresholds(&hits, 400, 0.95);
}

#[test]
fn reverse_complement_query_is_recovered_on_the_minus_strand() {
    let target = Sequence::new("t", b"ACGTACGT".to_vec());
    let query = Sequence::new("q", pals::sequence::reverse_complement(&target.seq));

    let mut aligner = Pals::new(&target, &query, false);
    aligner.optimise(5, 0.9).unwrap();
    aligner.build_index().unwrap();

    let forward = aligner.align(false).unwrap();
    let reverse = aligner.align(true).unwrap();
    aligner.cleanup().unwrap();

    assert!(reverse.iter().any(|h| {
        h.aepos - h.abpos == target.len() && h.bepos - h.bbpos == query.len()
    }));

    let t_packed = Packed::from_sequence(target.clone());
    let q_packed = Packed::from_sequence(query.clone());
    let pair = new_feature_pair(&t_packed, &q_packed, &reverse[0], true).unwrap();
    assert_eq!(pair.strand, -1);

    // This palindromic query matches on the forward strand too.
    assert!(!forward.is_empty());
}

#[test]
fn degenerate_query_shorter_than_word_size() {
    let mut rng = StdRng::seed_from_u64(3);
    let target = Sequence::new("t", random_seq(&mut rng, 10_000));
    let query = Sequence::new("q", b"ACG".to_vec());

    let mut aligner = Pals::new(&target, &query, false).with_max_mem(TEST_MAX_MEM);
    aligner.optimise(50, 0.95).unwrap();
    aligner.build_index().unwrap();
    let hits = aligner.align(false).unwrap();
    aligner.cleanup().unwrap();
    assert!(hits.is_empty());
}

#[test]
fn infeasible_memory_cap_fails_parameter_search() {
    let target = Sequence::new("t", vec![b'A'; 1_000_000]);
    let cap = 10 * pals::index::KmerIndex::finger_bytes(4);
    let mut aligner = Pals::new(&target, &target, true).with_max_mem(cap);
    assert!(matches!(
        aligner.optimise(400, 0.94),
        Err(PalsError::ParameterSearchFailed)
    ));
}

#[test]
fn rerunning_the_pipeline_is_deterministic() {
    let mut rng = StdRng::seed_from_u64(99);
    let unit = random_seq(&mut rng, 150);
    let mut seq = unit.clone();
    seq.extend_from_slice(&random_seq(&mut rng, 40));
    seq.extend_from_slice(&unit);
    let target = Sequence::new("t", seq);

    let run = || {
        let mut aligner = Pals::new(&target, &target, true).with_max_mem(TEST_MAX_MEM);
        aligner.optimise(50, 0.95).unwrap();
        aligner.build_index().unwrap();
        let hits = aligner.align(false).unwrap();
        aligner.cleanup().unwrap();
        hits
    };

    let first = run();
    let second = run();
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn minus_strand_hits_invert_onto_the_forward_query() {
    // Aligning against the reverse-complemented query and inverting
    // the query coordinates must agree with aligning the reverse
    // complement directly on the forward strand.
    let mut rng = StdRng::seed_from_u64(11);
    let core = random_seq(&mut rng, 300);
    let target = Sequence::new("t", core.clone());
    let query = Sequence::new("q", pals::sequence::reverse_complement(&core));

    let mut aligner = Pals::new(&target, &query, false).with_max_mem(TEST_MAX_MEM);
    aligner.optimise(50, 0.95).unwrap();
    aligner.build_index().unwrap();
    let minus = aligner.align(true).unwrap();
    aligner.cleanup().unwrap();

    let flipped = Sequence::new("qf", pals::sequence::reverse_complement(&query.seq));
    let mut direct = Pals::new(&target, &flipped, false).with_max_mem(TEST_MAX_MEM);
    direct.optimise(50, 0.95).unwrap();
    direct.build_index().unwrap();
    let plus = direct.align(false).unwrap();
    direct.cleanup().unwrap();

    assert!(!minus.is_empty());
    assert_eq!(minus, plus);

    // And the coordinate inversion lands on the forward query.
    let qlen = query.len();
    for h in &minus {
        let (from, to) = (qlen - h.bepos, qlen - h.bbpos);
        assert!(from < to && to <= qlen);
    }
}

#[test]
fn sticky_error_until_reset() {
    let target = Sequence::new("t", b"ACGTACGTACGTACGTACGTACGTACGTACGT".to_vec());
    let mut aligner = Pals::new(&target, &target, true);
    assert!(aligner.align(false).is_err());
    assert!(matches!(
        aligner.align(false),
        Err(PalsError::BadParameter { .. })
    ));
    aligner.reset();
    aligner.optimise(8, 0.9).unwrap();
    aligner.build_index().unwrap();
    assert!(aligner.align(false).is_ok());
}

#[test]
fn packed_contigs_round_trip_into_gff() {
    let mut rng = StdRng::seed_from_u64(5);
    let repeat = random_seq(&mut rng, 200);

    let mut t = Packer::new("target");
    t.add("chrA", &repeat).unwrap();
    t.add("chrB", &random_seq(&mut rng, 300)).unwrap();
    let target = t.finish();

    let mut q = Packer::new("query");
    q.add("contig1", &repeat).unwrap();
    let query = q.finish();

    let mut aligner = Pals::new(&target.seq, &query.seq, false).with_max_mem(TEST_MAX_MEM);
    aligner.optimise(100, 0.95).unwrap();
    aligner.build_index().unwrap();
    let hits = aligner.align(false).unwrap();
    aligner.cleanup().unwrap();

    assert_eq!(hits.len(), 1);
    let pair = new_feature_pair(&target, &query, &hits[0], false).unwrap();
    assert_eq!(pair.a.id, "chrA");
    assert_eq!(pair.b.id, "contig1");
    assert_eq!((pair.a.start, pair.a.end), (0, 200));
    assert_eq!((pair.b.start, pair.b.end), (0, 200));

    let mut out = Vec::new();
    {
        let mut w = GffWriter::new(&mut out);
        w.write(&pair).unwrap();
        w.finish().unwrap();
    }
    let line = String::from_utf8(out).unwrap();
    assert!(line.starts_with("contig1\tpals\thit\t1\t200\t"));
    assert!(line.contains("Target chrA 1 200; maxe 0"));
}
