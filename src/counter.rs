//! Reference build, background set and sample counting.
//!
//! The build phase turns reference sequences (FASTA) or pre-tabulated k-mer
//! tables into a [`KmerIndex`]. The count phase rescans sample inputs with the
//! same rolling encoder and bumps a [`SampleCounts`] cell for every label a
//! k-mer resolves to. Build and count never overlap; counting only takes
//! shared references to the index.

use ahash::AHashSet;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use thiserror::Error;

use crate::encode::{KmerWord, RollingKmer, decode_compact};
use crate::index::{BuildMode, IndexError, KmerIndex};
use crate::reader::{FastaReader, FastqReader, KtableReader, LineSource};

/// Saturation ceiling of a sample count cell.
pub const COUNT_MAX: u16 = u16::MAX - 1;

/// Default k-mer length.
pub const DEFAULT_K: usize = 31;

/// Records between two progress messages.
pub const PROGRESS_EVERY: u64 = 10_000_000;

#[derive(Debug, Error)]
/// Errors returned while building or counting.
pub enum CountError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Index build failure.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// Input whose reader lives outside this crate.
    #[error("unsupported input format: {}", .0.display())]
    UnsupportedFormat(PathBuf),
    /// Worker pool could not be started.
    #[error("thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Input kind, decided from the file name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    /// `.fa` / `.fasta`, optionally gzipped.
    Fasta,
    /// Any other `.gz`.
    Fastq,
    /// `.cram` (reader not provided by this crate).
    Cram,
    /// Anything else; a k-mer table when used as a reference.
    Other,
}

impl InputKind {
    pub fn of(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let stem = name.strip_suffix(".gz").unwrap_or(name.as_str());
        if stem.ends_with(".fa") || stem.ends_with(".fasta") {
            InputKind::Fasta
        } else if name.ends_with(".gz") {
            InputKind::Fastq
        } else if name.ends_with(".cram") {
            InputKind::Cram
        } else {
            InputKind::Other
        }
    }
}

/// Build/count configuration.
#[derive(Clone, Debug)]
pub struct CounterConfig {
    k: usize,
    threads: usize,
    fasta_mode: BuildMode,
    skip_soft_masked: bool,
    progress_every: u64,
    capacity: usize,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            threads: 1,
            fasta_mode: BuildMode::SingleLabel,
            skip_soft_masked: true,
            progress_every: PROGRESS_EVERY,
            capacity: 0,
        }
    }
}

impl CounterConfig {
    /// K-mer length.
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }
    /// Workers replicating the scan of one record-oriented input.
    pub fn threads(mut self, n: usize) -> Self {
        self.threads = n.max(1);
        self
    }
    /// Label assignment for FASTA references (k-mer tables are always multi-label).
    pub fn fasta_mode(mut self, mode: BuildMode) -> Self {
        self.fasta_mode = mode;
        self
    }
    /// Skip reference k-mers ending on a lowercase (soft-masked) base.
    pub fn skip_soft_masked(mut self, yes: bool) -> Self {
        self.skip_soft_masked = yes;
        self
    }
    /// Records between progress messages; 0 disables them.
    pub fn progress_every(mut self, n: u64) -> Self {
        self.progress_every = n;
        self
    }
    /// Expected number of distinct reference k-mers.
    pub fn capacity(mut self, n: usize) -> Self {
        self.capacity = n;
        self
    }

    pub fn k(&self) -> usize {
        self.k
    }
    pub fn thread_count(&self) -> usize {
        self.threads
    }
}

/// One sample's count vector: a saturating `u16` cell per label.
///
/// Cells are atomics so concurrent workers never lose an increment.
#[derive(Debug)]
pub struct SampleCounts {
    cells: Vec<AtomicU16>,
}

impl SampleCounts {
    pub fn new(len: usize) -> Self {
        Self {
            cells: (0..len).map(|_| AtomicU16::new(0)).collect(),
        }
    }

    /// Add one to `label`, stopping at [`COUNT_MAX`]. Out-of-range labels are ignored.
    #[inline]
    pub fn increment(&self, label: u32) {
        if let Some(cell) = self.cells.get(label as usize) {
            let _ = cell.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                (v < COUNT_MAX).then_some(v + 1)
            });
        }
    }

    #[inline]
    pub fn get(&self, label: u32) -> u16 {
        self.cells
            .get(label as usize)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Plain copy of every cell.
    pub fn snapshot(&self) -> Vec<u16> {
        self.cells.iter().map(|c| c.load(Ordering::Relaxed)).collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Aggregate counters shared by all workers of one sample.
#[derive(Debug, Default)]
pub struct CountStats {
    bases: AtomicU64,
    reads: AtomicU64,
    background: AtomicU64,
}

/// Plain copy of [`CountStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CountSummary {
    /// Usable k-mer positions scanned.
    pub bases: u64,
    /// Records (lines) scanned.
    pub reads: u64,
    /// K-mers found in the background set.
    pub background_hits: u64,
}

impl CountStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> CountSummary {
        CountSummary {
            bases: self.bases.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            background_hits: self.background.load(Ordering::Relaxed),
        }
    }
}

/// Walk every indexable k-mer of a reference source.
fn for_each_reference_kmer<W, S, F>(
    src: &S,
    k: usize,
    skip_soft_masked: bool,
    mut f: F,
) -> Result<(), CountError>
where
    W: KmerWord,
    S: LineSource + ?Sized,
    F: FnMut(W) -> Result<(), CountError>,
{
    let mut roll = RollingKmer::<W>::new(k);
    let mut line = Vec::with_capacity(256);
    while src.next_line(&mut line)? {
        match line.first() {
            None | Some(b' ' | b'\t') => continue,
            Some(b'@' | b'+' | b'>') => {
                roll.reset();
                continue;
            }
            _ => {}
        }
        for &base in &line {
            if base == b' ' {
                continue;
            }
            if let Some(kmer) = roll.push(base) {
                if skip_soft_masked && base.is_ascii_lowercase() {
                    continue;
                }
                f(kmer)?;
            }
        }
    }
    Ok(())
}

/// Reference index plus background set, generic over the k-mer width.
pub struct KmerCounter<W: KmerWord> {
    cfg: CounterConfig,
    index: KmerIndex<W>,
    backgrounds: AHashSet<W>,
}

impl<W: KmerWord> KmerCounter<W> {
    /// Panics if `k` does not fit `W`.
    pub fn new(cfg: CounterConfig) -> Self {
        assert!(
            cfg.k > 0 && cfg.k <= W::MAX_K,
            "k must be 1..={} for this k-mer width",
            W::MAX_K
        );
        Self {
            index: KmerIndex::with_capacity(cfg.capacity),
            backgrounds: AHashSet::new(),
            cfg,
        }
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.cfg.k
    }

    #[inline]
    pub fn index(&self) -> &KmerIndex<W> {
        &self.index
    }

    #[inline]
    pub fn backgrounds(&self) -> &AHashSet<W> {
        &self.backgrounds
    }

    /// Labels assigned so far.
    #[inline]
    pub fn total_kmers(&self) -> u32 {
        self.index.total_labels()
    }

    /// Empty count vector sized to the current label space.
    pub fn new_sample_counts(&self) -> SampleCounts {
        SampleCounts::new(self.index.total_labels() as usize)
    }

    // ---- build phase ----

    /// Index a reference file: FASTA by extension, otherwise a k-mer table.
    /// Returns the total number of labels.
    pub fn read_target(&mut self, path: &Path) -> Result<u32, CountError> {
        let total = match InputKind::of(path) {
            InputKind::Fasta => self.read_target_fasta(&FastaReader::from_path(path)?)?,
            _ => self.read_target_ktable(&KtableReader::from_path(path)?)?,
        };
        info!(
            "indexed {}: {} labels, {} distinct k-mers, {} shared",
            path.display(),
            total,
            self.index.len(),
            self.index.overflow().len()
        );
        Ok(total)
    }

    /// Index every k-mer of a FASTA source.
    pub fn read_target_fasta<S: LineSource + ?Sized>(
        &mut self,
        src: &S,
    ) -> Result<u32, CountError> {
        let mode = self.cfg.fasta_mode;
        let index = &mut self.index;
        for_each_reference_kmer(src, self.cfg.k, self.cfg.skip_soft_masked, |kmer| {
            index.assign_or_get(kmer, mode)?;
            Ok(())
        })?;
        Ok(self.index.total_labels())
    }

    /// Index a pre-canonicalized k-mer table; every row takes one label.
    pub fn read_target_ktable<S: LineSource + ?Sized>(
        &mut self,
        src: &S,
    ) -> Result<u32, CountError> {
        let mut row = Vec::with_capacity(256);
        let mut skipped = 0u64;
        while src.next_line(&mut row)? {
            let Some(field) = KtableReader::key_field(&row) else {
                skipped += 1;
                continue;
            };
            let kmer = decode_compact::<W>(field);
            self.index.assign_or_get(kmer, BuildMode::MultiLabel)?;
        }
        if skipped > 0 {
            warn!("skipped {skipped} k-mer table rows without a key column");
        }
        Ok(self.index.total_labels())
    }

    /// Load background k-mers from a FASTA file.
    pub fn load_backgrounds(&mut self, path: &Path) -> Result<usize, CountError> {
        let n = self.load_backgrounds_from(&FastaReader::from_path(path)?)?;
        info!("loaded {} background k-mers from {}", n, path.display());
        Ok(n)
    }

    pub fn load_backgrounds_from<S: LineSource + ?Sized>(
        &mut self,
        src: &S,
    ) -> Result<usize, CountError> {
        let set = &mut self.backgrounds;
        for_each_reference_kmer(src, self.cfg.k, self.cfg.skip_soft_masked, |kmer| {
            set.insert(kmer);
            Ok(())
        })?;
        Ok(self.backgrounds.len())
    }

    // ---- count phase ----

    /// Count one source into `counts`.
    ///
    /// With `threads > 1` the scan is replicated on that many workers pulling
    /// lines from the same source. Multi-line (FASTA) sources are always
    /// scanned by one worker.
    pub fn count_source<S: LineSource + ?Sized>(
        &self,
        src: &S,
        counts: &SampleCounts,
        stats: &CountStats,
        threads: usize,
    ) -> Result<(), CountError> {
        if threads <= 1 || src.multiline_records() {
            return self.scan(src, counts, stats);
        }
        let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
        pool.broadcast(|_| self.scan(src, counts, stats))
            .into_iter()
            .collect()
    }

    /// Single-worker scan loop.
    fn scan<S: LineSource + ?Sized>(
        &self,
        src: &S,
        counts: &SampleCounts,
        stats: &CountStats,
    ) -> Result<(), CountError> {
        let k = self.cfg.k;
        let multiline = src.multiline_records();
        let check_background = !self.backgrounds.is_empty();
        let mut roll = RollingKmer::<W>::new(k);
        let mut line = Vec::with_capacity(512);

        while src.next_line(&mut line)? {
            if multiline {
                match line.first() {
                    None | Some(b' ' | b'\t') => continue,
                    Some(b'@' | b'+' | b'>') => {
                        roll.reset();
                        continue;
                    }
                    _ => {}
                }
            } else {
                if line.is_empty() {
                    continue;
                }
                roll.reset();
            }

            let mut background = 0u64;
            for &base in &line {
                if base == b' ' {
                    continue;
                }
                let Some(kmer) = roll.push(base) else {
                    continue;
                };
                if check_background && self.backgrounds.contains(&kmer) {
                    background += 1;
                }
                if let Some(resolved) = self.index.lookup(kmer) {
                    for &label in resolved.labels() {
                        counts.increment(label);
                    }
                }
            }

            if background > 0 {
                stats.background.fetch_add(background, Ordering::Relaxed);
            }
            stats
                .bases
                .fetch_add(line.len().saturating_sub(k - 1) as u64, Ordering::Relaxed);
            let reads = stats.reads.fetch_add(1, Ordering::Relaxed) + 1;
            if self.cfg.progress_every > 0 && reads % self.cfg.progress_every == 0 {
                info!("processed {}M reads.", reads / 1_000_000);
            }
        }
        Ok(())
    }

    /// Count one file, choosing the reader by extension. Returns `false` for
    /// files that are not sample inputs.
    pub fn count_file(
        &self,
        path: &Path,
        counts: &SampleCounts,
        stats: &CountStats,
    ) -> Result<bool, CountError> {
        match InputKind::of(path) {
            InputKind::Fastq => {
                let src = FastqReader::from_path(path)?;
                self.count_source(&src, counts, stats, self.cfg.threads)?;
            }
            InputKind::Fasta => {
                let src = FastaReader::from_path(path)?;
                self.count_source(&src, counts, stats, 1)?;
            }
            InputKind::Cram => return Err(CountError::UnsupportedFormat(path.to_path_buf())),
            InputKind::Other => {
                warn!("skipping {}: not a FASTA or gzipped FASTQ input", path.display());
                return Ok(false);
            }
        }
        debug!("counted {}", path.display());
        Ok(true)
    }

    /// Count a single file or every regular file of a directory (in name
    /// order) into one sample vector. Returns the number of files counted.
    ///
    /// An explicit `.cram` path is an error; inside a directory it is skipped.
    pub fn call(
        &self,
        path: &Path,
        counts: &SampleCounts,
        stats: &CountStats,
    ) -> Result<usize, CountError> {
        let scan_dir = path.is_dir();
        let files = if scan_dir {
            let mut files = Vec::new();
            for entry in std::fs::read_dir(path)? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    files.push(entry.path());
                }
            }
            files.sort();
            files
        } else {
            vec![path.to_path_buf()]
        };

        let mut counted = 0usize;
        for file in &files {
            if scan_dir && InputKind::of(file) == InputKind::Cram {
                warn!("skipping {}: CRAM input is not supported", file.display());
                continue;
            }
            if self.count_file(file, counts, stats)? {
                counted += 1;
            }
        }
        let s = stats.summary();
        info!(
            "{}: {} files, {} reads, {} k-mer positions, {} background hits",
            path.display(),
            counted,
            s.reads,
            s.bases,
            s.background_hits
        );
        Ok(counted)
    }
}
