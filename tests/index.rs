use kira_kmer_typer::encode::{canonical, encode_kmer};
use kira_kmer_typer::*;
use std::io::Cursor;

fn random_seq(seed: u64, len: usize) -> Vec<u8> {
    let mut x = seed;
    (0..len)
        .map(|_| {
            x = x
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            b"ACGT"[(x >> 62) as usize]
        })
        .collect()
}

fn canon31(window: &[u8]) -> u64 {
    canonical(encode_kmer::<u64>(window).unwrap(), 31)
}

fn fasta(records: &[Vec<u8>]) -> FastaReader {
    let mut text = Vec::new();
    for (i, seq) in records.iter().enumerate() {
        text.extend_from_slice(format!(">r{i}\n").as_bytes());
        text.extend_from_slice(seq);
        text.push(b'\n');
    }
    FastaReader::from_reader(Cursor::new(text))
}

fn build(records: &[Vec<u8>], mode: BuildMode) -> KmerCounter<u64> {
    let mut counter = KmerCounter::<u64>::new(CounterConfig::default().fasta_mode(mode));
    counter.read_target_fasta(&fasta(records)).unwrap();
    counter
}

fn compact(kmer: u64) -> String {
    (0..11)
        .rev()
        .map(|i| (((kmer >> (6 * i)) & 63) as u8 + b'0') as char)
        .collect()
}

#[test]
fn shared_kmer_moves_to_overflow_with_both_labels() {
    let x = random_seq(1, 50);
    let mut b = random_seq(2, 30);
    b.extend_from_slice(&x[..31]);

    let counter = build(&[x.clone(), b.clone()], BuildMode::MultiLabel);
    let index = counter.index();

    assert_eq!(index.total_labels(), 51);
    assert_eq!(index.len(), 50);
    assert_eq!(index.overflow().len(), 1);

    let shared = canon31(&x[..31]);
    assert_eq!(index.lookup(shared), Some(Resolved::Multi(&[0, 50])));

    for seq in [&x, &b] {
        for window in seq.windows(31) {
            let kmer = canon31(window);
            if kmer != shared {
                assert!(matches!(index.lookup(kmer), Some(Resolved::Single(_))));
            }
        }
    }
}

#[test]
fn single_label_mode_keeps_first_label() {
    let x = random_seq(1, 50);
    let mut b = random_seq(2, 30);
    b.extend_from_slice(&x[..31]);

    let counter = build(&[x.clone(), b], BuildMode::SingleLabel);
    let index = counter.index();

    assert_eq!(index.total_labels(), 50);
    assert!(index.overflow().is_empty());
    assert_eq!(index.lookup(canon31(&x[..31])), Some(Resolved::Single(0)));
    // labels follow first-seen order
    for (i, window) in x.windows(31).enumerate() {
        assert_eq!(index.lookup(canon31(window)), Some(Resolved::Single(i as u32)));
    }
}

#[test]
fn overflow_list_keeps_every_context_in_order() {
    let shared = random_seq(7, 31);
    let records: Vec<Vec<u8>> = (0..4)
        .map(|i| {
            let mut r = random_seq(10 + i, 5);
            r.extend_from_slice(&shared);
            r
        })
        .collect();

    let counter = build(&records, BuildMode::MultiLabel);
    let resolved = counter.index().lookup(canon31(&shared)).unwrap();
    assert_eq!(resolved.labels(), &[5, 11, 17, 23]);
    assert_eq!(counter.total_kmers(), 24);
}

#[test]
fn reverse_complement_reference_counts_as_the_same_kmer() {
    let x = random_seq(3, 31);
    let rc: Vec<u8> = x
        .iter()
        .rev()
        .map(|&b| match b {
            b'A' => b'T',
            b'C' => b'G',
            b'G' => b'C',
            _ => b'A',
        })
        .collect();
    let counter = build(&[x.clone(), rc], BuildMode::MultiLabel);
    assert_eq!(counter.index().len(), 1);
    assert_eq!(counter.index().lookup(canon31(&x)).unwrap().labels(), &[0, 1]);
}

#[test]
fn soft_masked_reference_kmers_are_skipped() {
    let mut seq = random_seq(4, 32);
    seq[31] = seq[31].to_ascii_lowercase();
    let counter = build(&[seq.clone()], BuildMode::SingleLabel);
    assert_eq!(counter.total_kmers(), 1);

    let mut counter = KmerCounter::<u64>::new(CounterConfig::default().skip_soft_masked(false));
    counter.read_target_fasta(&fasta(&[seq])).unwrap();
    assert_eq!(counter.total_kmers(), 2);
}

#[test]
fn assign_or_get_transitions() {
    let mut index = KmerIndex::<u64>::new();
    assert_eq!(index.assign_or_get(7, BuildMode::SingleLabel).unwrap(), Assigned::New(0));
    assert_eq!(index.assign_or_get(7, BuildMode::SingleLabel).unwrap(), Assigned::Existing(0));
    assert_eq!(index.assign_or_get(9, BuildMode::MultiLabel).unwrap(), Assigned::New(1));
    assert_eq!(index.assign_or_get(7, BuildMode::MultiLabel).unwrap(), Assigned::Promoted);
    assert_eq!(index.assign_or_get(7, BuildMode::MultiLabel).unwrap(), Assigned::Appended);
    assert_eq!(index.assign_or_get(7, BuildMode::SingleLabel).unwrap(), Assigned::Shared);

    assert_eq!(index.total_labels(), 4);
    assert_eq!(index.lookup(7).unwrap().labels(), &[0, 2, 3]);
    assert_eq!(index.lookup(9), Some(Resolved::Single(1)));
    assert_eq!(index.lookup(11), None);
}

#[test]
fn overflow_store_grows_and_reads_back() {
    let mut store = OverflowStore::<u64>::new();
    assert!(!store.append(1, 5));
    store.promote(1, 10, 20);
    assert_eq!(store.list(1).unwrap().capacity(), OVERFLOW_BLOCK);
    for label in 21..31 {
        assert!(store.append(1, label));
        let list = store.list(1).unwrap();
        // grows by one block when the 6th and 11th labels arrive
        let blocks = list.len().div_ceil(OVERFLOW_BLOCK);
        assert_eq!(list.capacity(), blocks * OVERFLOW_BLOCK, "len {}", list.len());
    }
    let list = store.list(1).unwrap();
    assert_eq!(list.len(), 12);
    assert_eq!(list.capacity(), 15);
    let mut expected = vec![10];
    expected.extend(20..31);
    assert_eq!(store.counts_for(1).unwrap(), expected.as_slice());
    assert_eq!(store.counts_for(2), None);
}

#[test]
fn ktable_rows_each_take_a_label() {
    let kmers: Vec<u64> = (0..3).map(|i| canon31(&random_seq(20 + i, 31))).collect();
    let order = [0usize, 1, 0, 2, 0];
    let mut text = String::from("#gene\tpos\tstrand\tcount\tkey\textra\n");
    for &i in &order {
        text.push_str(&format!("HLA\t0\t+\t1\t{}\t0\n", compact(kmers[i])));
    }
    text.push_str("truncated\trow\n");

    let mut counter = KmerCounter::<u64>::new(CounterConfig::default());
    let total = counter
        .read_target_ktable(&KtableReader::from_reader(Cursor::new(text.into_bytes())))
        .unwrap();

    assert_eq!(total, 5);
    let index = counter.index();
    assert_eq!(index.lookup(kmers[0]).unwrap().labels(), &[0, 2, 4]);
    assert_eq!(index.lookup(kmers[1]), Some(Resolved::Single(1)));
    assert_eq!(index.lookup(kmers[2]), Some(Resolved::Single(3)));
}

#[test]
fn key_field_follows_fixed_columns() {
    assert_eq!(KtableReader::key_field(b"a\tb\tc\td\tKEY\tz"), Some(&b"KEY\tz"[..]));
    assert_eq!(KtableReader::key_field(b"a\tb\tc"), None);
}
