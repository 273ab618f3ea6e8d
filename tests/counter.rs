use flate2::Compression;
use flate2::write::GzEncoder;
use kira_kmer_typer::encode::{canonical, encode_kmer};
use kira_kmer_typer::*;
use std::io::{Cursor, Write};
use std::path::Path;

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

fn revcomp_seq(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .rev()
        .map(|&b| match b {
            b'A' => b'T',
            b'C' => b'G',
            b'G' => b'C',
            _ => b'A',
        })
        .collect()
}

fn canon31(window: &[u8]) -> u64 {
    canonical(encode_kmer::<u64>(window).unwrap(), 31)
}

fn fasta_text(records: &[&[u8]]) -> Vec<u8> {
    let mut text = Vec::new();
    for (i, seq) in records.iter().enumerate() {
        text.extend_from_slice(format!(">r{i}\n").as_bytes());
        text.extend_from_slice(seq);
        text.push(b'\n');
    }
    text
}

fn fastq_text(reads: &[Vec<u8>]) -> Vec<u8> {
    let mut text = Vec::new();
    for (i, seq) in reads.iter().enumerate() {
        text.extend_from_slice(format!("@read{i}\n").as_bytes());
        text.extend_from_slice(seq);
        text.extend_from_slice(b"\n+\n");
        text.extend(std::iter::repeat_n(b'I', seq.len()));
        text.push(b'\n');
    }
    text
}

fn counter_for(reference: &[u8], cfg: CounterConfig) -> KmerCounter<u64> {
    let mut counter = KmerCounter::<u64>::new(cfg.progress_every(0));
    counter
        .read_target_fasta(&FastaReader::from_reader(Cursor::new(fasta_text(&[reference]))))
        .unwrap();
    counter
}

#[test]
fn reads_from_both_strands_hit_the_same_labels() {
    let reference = random_seq(1, 60);
    let counter = counter_for(&reference, CounterConfig::default());
    assert_eq!(counter.total_kmers(), 30);

    let read = reference[10..45].to_vec();
    let reads = vec![read.clone(), revcomp_seq(&read)];
    let src = FastqReader::from_reader(Cursor::new(fastq_text(&reads)));
    let counts = counter.new_sample_counts();
    let stats = CountStats::new();
    counter.count_source(&src, &counts, &stats, 1).unwrap();

    let snapshot = counts.snapshot();
    for (label, &c) in snapshot.iter().enumerate() {
        let expected = if (10..=14).contains(&label) { 2 } else { 0 };
        assert_eq!(c, expected, "label {label}");
    }
    let summary = stats.summary();
    assert_eq!(summary.reads, 2);
    assert_eq!(summary.bases, 2 * 5);
    assert_eq!(summary.background_hits, 0);
}

#[test]
fn short_reads_and_unknown_kmers_add_nothing() {
    let reference = random_seq(2, 40);
    let counter = counter_for(&reference, CounterConfig::default());
    let reads = vec![reference[..20].to_vec(), random_seq(99, 50)];
    let src = FastqReader::from_reader(Cursor::new(fastq_text(&reads)));
    let counts = counter.new_sample_counts();
    let stats = CountStats::new();
    counter.count_source(&src, &counts, &stats, 1).unwrap();

    assert!(counts.snapshot().iter().all(|&c| c == 0));
    assert_eq!(stats.summary().bases, 20);
    assert_eq!(stats.summary().reads, 2);
}

#[test]
fn ambiguous_base_splits_a_read() {
    let reference = random_seq(3, 70);
    let counter = counter_for(&reference, CounterConfig::default());
    let mut read = reference[..70].to_vec();
    read[35] = b'N';
    let src = FastqReader::from_reader(Cursor::new(fastq_text(&[read])));
    let counts = counter.new_sample_counts();
    counter.count_source(&src, &counts, &CountStats::new(), 1).unwrap();

    // windows 0..=4 end before the N, window 36..=39 start after it
    let hit: Vec<usize> = counts
        .snapshot()
        .iter()
        .enumerate()
        .filter(|(_, c)| **c > 0)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(hit, vec![0, 1, 2, 3, 4, 36, 37, 38, 39]);
}

#[test]
fn shared_kmers_count_towards_every_label() {
    let shared = random_seq(4, 31);
    let mut a = random_seq(5, 5);
    a.extend_from_slice(&shared);
    let mut b = random_seq(6, 5);
    b.extend_from_slice(&shared);

    let mut counter = KmerCounter::<u64>::new(
        CounterConfig::default()
            .fasta_mode(BuildMode::MultiLabel)
            .progress_every(0),
    );
    let text = fasta_text(&[a.as_slice(), b.as_slice()]);
    counter
        .read_target_fasta(&FastaReader::from_reader(Cursor::new(text)))
        .unwrap();

    let src = FastqReader::from_reader(Cursor::new(fastq_text(&[shared.clone()])));
    let counts = counter.new_sample_counts();
    counter.count_source(&src, &counts, &CountStats::new(), 1).unwrap();
    assert_eq!(counts.get(5), 1);
    assert_eq!(counts.get(11), 1);
    assert_eq!(counts.snapshot().iter().map(|&c| c as u32).sum::<u32>(), 2);
}

#[test]
fn background_hits_are_tallied_and_still_counted() {
    let reference = random_seq(7, 40);
    let mut counter = counter_for(&reference, CounterConfig::default());
    let bg = FastaReader::from_reader(Cursor::new(fasta_text(&[&reference[..31]])));
    assert_eq!(counter.load_backgrounds_from(&bg).unwrap(), 1);
    assert!(counter.backgrounds().contains(&canon31(&reference[..31])));

    let src = FastqReader::from_reader(Cursor::new(fastq_text(&[reference.clone()])));
    let counts = counter.new_sample_counts();
    let stats = CountStats::new();
    counter.count_source(&src, &counts, &stats, 1).unwrap();

    assert_eq!(stats.summary().background_hits, 1);
    assert!(counts.snapshot().iter().all(|&c| c == 1));
}

#[test]
fn counts_saturate_below_u16_max() {
    let counts = SampleCounts::new(2);
    for _ in 0..70_000 {
        counts.increment(1);
    }
    counts.increment(5);
    assert_eq!(counts.get(1), COUNT_MAX);
    assert_eq!(counts.get(0), 0);
    assert_eq!(counts.get(5), 0);
}

#[test]
fn parallel_scan_matches_single_worker() {
    let reference = random_seq(8, 400);
    let counter = counter_for(&reference, CounterConfig::default());
    let reads: Vec<Vec<u8>> = (0..2000u64)
        .map(|i| {
            let start = (i as usize * 7) % 300;
            let read = reference[start..start + 100].to_vec();
            if i % 2 == 0 { read } else { revcomp_seq(&read) }
        })
        .collect();
    let text = fastq_text(&reads);

    let single = counter.new_sample_counts();
    let single_stats = CountStats::new();
    let src = FastqReader::from_reader(Cursor::new(text.clone()));
    counter
        .count_source(&src, &single, &single_stats, 1)
        .unwrap();

    let parallel = counter.new_sample_counts();
    let parallel_stats = CountStats::new();
    counter
        .count_source(&FastqReader::from_reader(Cursor::new(text)), &parallel, &parallel_stats, 4)
        .unwrap();

    assert_eq!(single.snapshot(), parallel.snapshot());
    assert_eq!(single_stats.summary(), parallel_stats.summary());
    assert_eq!(parallel_stats.summary().reads, 2000);
}

#[test]
fn fasta_samples_carry_kmers_across_lines() {
    let reference = random_seq(9, 80);
    let counter = counter_for(&reference, CounterConfig::default());
    let mut text = b">sample\n".to_vec();
    for line in reference.chunks(20) {
        text.extend_from_slice(line);
        text.push(b'\n');
    }
    let counts = counter.new_sample_counts();
    counter
        .count_source(&FastaReader::from_reader(Cursor::new(text)), &counts, &CountStats::new(), 4)
        .unwrap();
    assert!(counts.snapshot().iter().all(|&c| c == 1));
}

fn write_gz(path: &Path, data: &[u8]) {
    let mut enc = GzEncoder::new(std::fs::File::create(path).unwrap(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap();
}

#[test]
fn call_counts_every_sample_file_in_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    let reference = random_seq(10, 50);
    let ref_path = dir.path().join("ref.fa");
    std::fs::write(&ref_path, fasta_text(&[reference.as_slice()])).unwrap();

    let cfg = CounterConfig::default().threads(2).progress_every(0);
    let mut counter = KmerCounter::<u64>::new(cfg);
    assert_eq!(counter.read_target(&ref_path).unwrap(), 20);

    let samples = dir.path().join("sample");
    std::fs::create_dir(&samples).unwrap();
    write_gz(&samples.join("a.fq.gz"), &fastq_text(&[reference.clone()]));
    std::fs::write(samples.join("b.fasta"), fasta_text(&[reference.as_slice()])).unwrap();
    std::fs::write(samples.join("notes.txt"), b"ignored").unwrap();

    let counts = counter.new_sample_counts();
    let stats = CountStats::new();
    assert_eq!(counter.call(&samples, &counts, &stats).unwrap(), 2);
    assert!(counts.snapshot().iter().all(|&c| c == 2));
    assert_eq!(stats.summary().reads, 2);
}

#[test]
fn cram_inputs_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cram = dir.path().join("x.cram");
    std::fs::write(&cram, b"CRAM").unwrap();
    let counter = KmerCounter::<u64>::new(CounterConfig::default());
    let err = counter
        .call(&cram, &counter.new_sample_counts(), &CountStats::new())
        .unwrap_err();
    assert!(matches!(err, CountError::UnsupportedFormat(_)));
}

#[test]
fn cram_files_in_a_directory_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let reference = random_seq(12, 40);
    let counter = counter_for(&reference, CounterConfig::default().threads(2));

    std::fs::write(dir.path().join("a.cram"), b"CRAM").unwrap();
    std::fs::write(dir.path().join("b.fa"), fasta_text(&[reference.as_slice()])).unwrap();

    let counts = counter.new_sample_counts();
    let stats = CountStats::new();
    assert_eq!(counter.call(dir.path(), &counts, &stats).unwrap(), 1);
    assert!(counts.snapshot().iter().all(|&c| c == 1));
}

#[test]
fn input_kind_by_extension() {
    assert_eq!(InputKind::of(Path::new("x/ref.fa")), InputKind::Fasta);
    assert_eq!(InputKind::of(Path::new("ref.FASTA")), InputKind::Fasta);
    assert_eq!(InputKind::of(Path::new("ref.fa.gz")), InputKind::Fasta);
    assert_eq!(InputKind::of(Path::new("s_R1.fastq.gz")), InputKind::Fastq);
    assert_eq!(InputKind::of(Path::new("s.cram")), InputKind::Cram);
    assert_eq!(InputKind::of(Path::new("db.kmer")), InputKind::Other);
}

#[test]
fn wide_kmers_count_end_to_end() {
    let reference = random_seq(11, 60);
    let cfg = CounterConfig::default().with_k(45).progress_every(0);
    let mut counter = KmerCounter::<u128>::new(cfg);
    let text = fasta_text(&[reference.as_slice()]);
    counter
        .read_target_fasta(&FastaReader::from_reader(Cursor::new(text)))
        .unwrap();
    assert_eq!(counter.total_kmers(), 16);

    let src = FastqReader::from_reader(Cursor::new(fastq_text(&[revcomp_seq(&reference)])));
    let counts = counter.new_sample_counts();
    counter.count_source(&src, &counts, &CountStats::new(), 1).unwrap();
    assert!(counts.snapshot().iter().all(|&c| c == 1));
}
