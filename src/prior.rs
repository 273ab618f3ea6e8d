//! Chunked reference-database loader with a bounded pool of reusable slots.
//!
//! The database is a sequence of chunks, one per gene group. [`PriorData::load_index`]
//! scans the file once and records every chunk's byte range; afterwards
//! [`PriorData::get_chunk`] loads a chunk into one of `buffer_size + overrun`
//! slots and hands out a [`ChunkHandle`]. Handles to the same chunk share one
//! slot; a slot is only reassigned once every handle to it has been dropped.
//!
//! Chunk layout (tab separated, in this order):
//!
//! ```text
//! @<prefix> <genenum> <numgroups> <kmervec_start> <kmervec_size> <nodenum>
//! $ <allele names ...>                      genenum names
//! % <path sizes ...>                        genenum u32
//! <label> <counts ...>                      kmervec_size rows of genenum u16
//! ! <normalization prior ...>               genenum * genenum f32
//! & <group of each allele ...>              genenum u16
//! ^ <k-mers per group ...>                  numgroups u32
//! ~ <parent> <distance> <path>              nodenum rows, -1 for none
//! ```

use ahash::AHashSet;
use log::{debug, info};
use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::ops::{Deref, Range};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::alloc::{AllocError, AllocPolicy, try_allocate};

/// Default number of chunk slots.
pub const DEFAULT_BUFFER_SIZE: usize = 200;

/// Extra slots on top of the configured buffer size.
pub const BUFFER_OVERRUN: usize = 10;

#[derive(Debug, Error)]
/// Errors returned by the reference-database loader.
pub enum PriorError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed chunk.
    #[error("malformed reference database chunk {chunk}: {detail}")]
    Format { chunk: usize, detail: String },
    /// Allocation retries exhausted.
    #[error(transparent)]
    Allocation(#[from] AllocError),
    /// Chunk index past the end of the index.
    #[error("chunk {index} out of range ({chunks} chunks)")]
    ChunkOutOfRange { index: usize, chunks: usize },
    /// Worker pool could not be started.
    #[error("thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Loader configuration.
#[derive(Clone, Debug)]
pub struct PriorConfig {
    buffer_size: usize,
    overrun: usize,
    alloc: AllocPolicy,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            overrun: BUFFER_OVERRUN,
            alloc: AllocPolicy::default(),
        }
    }
}

impl PriorConfig {
    /// Number of chunks that may be resident at once.
    pub fn with_buffer_size(mut self, n: usize) -> Self {
        self.buffer_size = n;
        self
    }
    /// Extra slots beyond the buffer size.
    pub fn with_overrun(mut self, n: usize) -> Self {
        self.overrun = n;
        self
    }
    /// Retry policy for chunk allocations.
    pub fn with_alloc_policy(mut self, policy: AllocPolicy) -> Self {
        self.alloc = policy;
        self
    }

    pub fn slot_count(&self) -> usize {
        (self.buffer_size + self.overrun).max(1)
    }
}

/// Node of a group's phylogenetic tree.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PhyloNode {
    /// Parent node, `None` for the root.
    pub parent: Option<u32>,
    /// Branch length to the parent.
    pub distance: f32,
    /// Path (allele) this node stands for, `None` for internal nodes.
    pub path: Option<u32>,
}

/// Chunk header line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct ChunkHeader {
    prefix: String,
    genenum: usize,
    numgroups: usize,
    kmervec_start: usize,
    kmervec_size: usize,
    nodenum: usize,
}

impl ChunkHeader {
    fn parse(line: &str) -> Result<Self, String> {
        let body = line
            .trim_end()
            .strip_prefix('@')
            .ok_or_else(|| "header must start with '@'".to_string())?;
        let mut fields = body.split('\t');
        let prefix = fields
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| "missing prefix".to_string())?
            .to_string();
        let mut num = |what: &str| -> Result<usize, String> {
            let raw = fields.next().ok_or_else(|| format!("missing {what}"))?;
            raw.trim()
                .parse()
                .map_err(|_| format!("invalid {what} '{raw}'"))
        };
        let header = ChunkHeader {
            genenum: num("gene count")?,
            numgroups: num("group count")?,
            kmervec_start: num("k-mer start")?,
            kmervec_size: num("k-mer count")?,
            nodenum: num("node count")?,
            prefix,
        };
        header.matrix_len()?;
        header.norm_len()?;
        header.kmervec_start.checked_add(header.kmervec_size).ok_or_else(|| {
            format!(
                "k-mer span {}+{} overflows",
                header.kmervec_start, header.kmervec_size
            )
        })?;
        Ok(header)
    }

    /// Cells of the presence matrix, `genenum * kmervec_size`.
    fn matrix_len(&self) -> Result<usize, String> {
        self.genenum.checked_mul(self.kmervec_size).ok_or_else(|| {
            format!(
                "matrix of {} x {} overflows",
                self.genenum, self.kmervec_size
            )
        })
    }

    /// Values of the normalization prior, `genenum * genenum`.
    fn norm_len(&self) -> Result<usize, String> {
        self.genenum
            .checked_mul(self.genenum)
            .ok_or_else(|| format!("prior of {0} x {0} overflows", self.genenum))
    }

    /// Every row or value a chunk declares takes at least one byte of text, so
    /// none of the declared sizes may exceed the chunk's length.
    fn fits(&self, bytes: u64) -> Result<(), String> {
        let sizes = [
            ("k-mer count", self.kmervec_size),
            ("matrix", self.matrix_len()?),
            ("normalization prior", self.norm_len()?),
            ("node count", self.nodenum),
        ];
        for (what, n) in sizes {
            if n as u64 > bytes {
                return Err(format!("{what} {n} exceeds the chunk's {bytes} bytes"));
            }
        }
        Ok(())
    }
}

/// One gene group's reference data.
///
/// Buffers are kept across reuse of the owning slot and only grow.
#[derive(Debug, Default)]
pub struct PriorChunk {
    index: usize,
    header: ChunkHeader,
    genenames: Vec<String>,
    pathnames: Vec<String>,
    pathsizes: Vec<u32>,
    kmer_matrix: Vec<u16>,
    prior_norm: Vec<f32>,
    genegroups: Vec<u16>,
    groupkmernums: Vec<u32>,
    phylo_tree: Vec<PhyloNode>,
}

impl PriorChunk {
    /// Chunk index within the database.
    pub fn index(&self) -> usize {
        self.index
    }
    pub fn prefix(&self) -> &str {
        &self.header.prefix
    }
    /// Number of paths (alleles).
    pub fn genenum(&self) -> usize {
        self.header.genenum
    }
    pub fn numgroups(&self) -> usize {
        self.header.numgroups
    }
    /// Gene name of each path: the allele name up to its first `_`.
    pub fn gene_names(&self) -> &[String] {
        &self.genenames
    }
    pub fn path_names(&self) -> &[String] {
        &self.pathnames
    }
    pub fn path_sizes(&self) -> &[u32] {
        &self.pathsizes
    }
    /// Global k-mer labels covered by this chunk; column `j` is label `start + j`.
    pub fn kmer_span(&self) -> Range<usize> {
        self.header.kmervec_start..self.header.kmervec_start + self.header.kmervec_size
    }
    /// Presence matrix, path-major: `genenum` rows of `kmervec_size` columns.
    pub fn kmer_matrix(&self) -> &[u16] {
        &self.kmer_matrix
    }
    pub fn matrix_row(&self, path: usize) -> &[u16] {
        let width = self.header.kmervec_size;
        &self.kmer_matrix[path * width..(path + 1) * width]
    }
    /// Normalization prior, `genenum * genenum` values.
    pub fn prior_norm(&self) -> &[f32] {
        &self.prior_norm
    }
    pub fn groups(&self) -> &[u16] {
        &self.genegroups
    }
    pub fn group_kmer_counts(&self) -> &[u32] {
        &self.groupkmernums
    }
    pub fn tree(&self) -> &[PhyloNode] {
        &self.phylo_tree
    }

    fn parse(&mut self, index: usize, text: &str, policy: AllocPolicy) -> Result<(), PriorError> {
        let mut lines = ChunkLines {
            chunk: index,
            lines: text.lines(),
        };
        self.index = index;
        self.load_header(&mut lines)?;
        self.load_alleles(&mut lines)?;
        self.load_sizes(&mut lines)?;
        self.load_matrix(&mut lines, policy)?;
        self.load_norm(&mut lines, policy)?;
        self.load_groups(&mut lines)?;
        self.load_tree(&mut lines, policy)?;
        Ok(())
    }

    fn load_header(&mut self, lines: &mut ChunkLines<'_>) -> Result<(), PriorError> {
        let line = lines.next_line("header")?;
        self.header = ChunkHeader::parse(line).map_err(|d| lines.err(d))?;
        Ok(())
    }

    fn load_alleles(&mut self, lines: &mut ChunkLines<'_>) -> Result<(), PriorError> {
        let mut fields = lines.record('$', "allele names")?;
        self.pathnames.clear();
        self.genenames.clear();
        for _ in 0..self.header.genenum {
            let name = fields
                .next()
                .filter(|n| !n.is_empty())
                .ok_or_else(|| lines.err("too few allele names"))?;
            let gene = name.split('_').next().unwrap_or(name);
            self.genenames.push(gene.to_string());
            self.pathnames.push(name.to_string());
        }
        Ok(())
    }

    fn load_sizes(&mut self, lines: &mut ChunkLines<'_>) -> Result<(), PriorError> {
        let mut fields = lines.record('%', "path sizes")?;
        self.pathsizes.clear();
        for _ in 0..self.header.genenum {
            self.pathsizes.push(lines.field(&mut fields, "path size")?);
        }
        Ok(())
    }

    fn load_matrix(
        &mut self,
        lines: &mut ChunkLines<'_>,
        policy: AllocPolicy,
    ) -> Result<(), PriorError> {
        let (genenum, width) = (self.header.genenum, self.header.kmervec_size);
        let cells = self.header.matrix_len().map_err(|d| lines.err(d))?;
        try_allocate(&mut self.kmer_matrix, cells, 0, "k-mer matrix", policy)?;
        for col in 0..width {
            let line = lines.next_line("matrix row")?;
            let mut fields = line.split('\t');
            let label: usize = lines.field(&mut fields, "k-mer label")?;
            if label != self.header.kmervec_start + col {
                return Err(lines.err(format!(
                    "matrix row {col} has label {label}, expected {}",
                    self.header.kmervec_start + col
                )));
            }
            for path in 0..genenum {
                self.kmer_matrix[path * width + col] = lines.field(&mut fields, "k-mer count")?;
            }
        }
        Ok(())
    }

    fn load_norm(
        &mut self,
        lines: &mut ChunkLines<'_>,
        policy: AllocPolicy,
    ) -> Result<(), PriorError> {
        let n = self.header.norm_len().map_err(|d| lines.err(d))?;
        try_allocate(&mut self.prior_norm, n, 0.0, "normalization prior", policy)?;
        let mut fields = lines.record('!', "normalization prior")?;
        for value in self.prior_norm.iter_mut() {
            *value = lines.field(&mut fields, "prior value")?;
        }
        Ok(())
    }

    fn load_groups(&mut self, lines: &mut ChunkLines<'_>) -> Result<(), PriorError> {
        let mut fields = lines.record('&', "group assignments")?;
        self.genegroups.clear();
        for _ in 0..self.header.genenum {
            let group: u16 = lines.field(&mut fields, "group")?;
            if group as usize >= self.header.numgroups {
                return Err(lines.err(format!(
                    "group {group} outside {} groups",
                    self.header.numgroups
                )));
            }
            self.genegroups.push(group);
        }
        let mut fields = lines.record('^', "group k-mer counts")?;
        self.groupkmernums.clear();
        for _ in 0..self.header.numgroups {
            self.groupkmernums
                .push(lines.field(&mut fields, "group k-mer count")?);
        }
        Ok(())
    }

    fn load_tree(
        &mut self,
        lines: &mut ChunkLines<'_>,
        policy: AllocPolicy,
    ) -> Result<(), PriorError> {
        let nodenum = self.header.nodenum;
        try_allocate(
            &mut self.phylo_tree,
            nodenum,
            PhyloNode::default(),
            "phylogenetic tree",
            policy,
        )?;
        for i in 0..nodenum {
            let mut fields = lines.record('~', "tree node")?;
            let parent: i64 = lines.field(&mut fields, "parent")?;
            let distance: f32 = lines.field(&mut fields, "distance")?;
            let path: i64 = lines.field(&mut fields, "path")?;
            if parent >= nodenum as i64 || parent == i as i64 {
                return Err(lines.err(format!("node {i} has invalid parent {parent}")));
            }
            self.phylo_tree[i] = PhyloNode {
                parent: u32::try_from(parent).ok(),
                distance,
                path: u32::try_from(path).ok(),
            };
        }
        Ok(())
    }
}

/// Line cursor over one chunk's text, skipping blank and `#` lines.
struct ChunkLines<'a> {
    chunk: usize,
    lines: std::str::Lines<'a>,
}

impl<'a> ChunkLines<'a> {
    fn err(&self, detail: impl Into<String>) -> PriorError {
        PriorError::Format {
            chunk: self.chunk,
            detail: detail.into(),
        }
    }

    fn next_line(&mut self, what: &str) -> Result<&'a str, PriorError> {
        for line in self.lines.by_ref() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            return Ok(line);
        }
        Err(self.err(format!("missing {what}")))
    }

    /// Next line, which must start with `marker`; yields its tab-separated fields.
    fn record(
        &mut self,
        marker: char,
        what: &str,
    ) -> Result<std::str::Split<'a, char>, PriorError> {
        let line = self.next_line(what)?;
        let rest = line
            .strip_prefix(marker)
            .ok_or_else(|| self.err(format!("expected {what} line starting with '{marker}'")))?;
        Ok(rest.strip_prefix('\t').unwrap_or(rest).split('\t'))
    }

    fn field<T: FromStr>(
        &self,
        fields: &mut std::str::Split<'a, char>,
        what: &str,
    ) -> Result<T, PriorError> {
        let raw = fields
            .next()
            .ok_or_else(|| self.err(format!("missing {what}")))?;
        raw.trim()
            .parse()
            .map_err(|_| self.err(format!("invalid {what} '{raw}'")))
    }
}

/// Byte range and header of one chunk, recorded by the index scan.
#[derive(Clone, Debug)]
struct ChunkEntry {
    header: ChunkHeader,
    offset: u64,
    len: u64,
}

#[derive(Debug, Default)]
struct Slot {
    chunk: PriorChunk,
    raw: Vec<u8>,
}

#[derive(Clone, Copy, Debug, Default)]
struct SlotState {
    chunk: Option<usize>,
    refs: usize,
    ready: bool,
}

#[derive(Debug, Default)]
struct PoolState {
    slots: Vec<SlotState>,
    cursor: usize,
    next_chunk: usize,
}

impl PoolState {
    fn resident(&self, index: usize) -> Option<usize> {
        self.slots.iter().position(|s| s.chunk == Some(index))
    }

    /// Round-robin search for a slot nobody holds.
    fn free_slot(&mut self) -> Option<usize> {
        let n = self.slots.len();
        let slot = (0..n)
            .map(|i| (self.cursor + i) % n)
            .find(|&s| self.slots[s].refs == 0)?;
        self.cursor = (slot + 1) % n;
        Some(slot)
    }
}

/// Reference database reader and chunk pool.
pub struct PriorData {
    path: PathBuf,
    cfg: PriorConfig,
    entries: Vec<ChunkEntry>,
    total_kmers: usize,
    file: Mutex<File>,
    state: Mutex<PoolState>,
    changed: Condvar,
    slots: Vec<RwLock<Slot>>,
}

impl PriorData {
    /// Open a database. Call [`load_index`](Self::load_index) before fetching chunks.
    pub fn open(path: &Path, cfg: PriorConfig) -> Result<Self, PriorError> {
        let file = File::open(path)?;
        let n = cfg.slot_count();
        Ok(PriorData {
            path: path.to_path_buf(),
            entries: Vec::new(),
            total_kmers: 0,
            file: Mutex::new(file),
            state: Mutex::new(PoolState {
                slots: vec![SlotState::default(); n],
                ..PoolState::default()
            }),
            changed: Condvar::new(),
            slots: (0..n).map(|_| RwLock::new(Slot::default())).collect(),
            cfg,
        })
    }

    /// Index every chunk of the file. Returns the number of chunks.
    pub fn load_index(&mut self) -> Result<usize, PriorError> {
        self.scan_index(None)
    }

    /// Index only chunks whose prefix is in `genes`.
    pub fn load_index_filtered(&mut self, genes: &AHashSet<String>) -> Result<usize, PriorError> {
        self.scan_index(Some(genes))
    }

    fn scan_index(&mut self, genes: Option<&AHashSet<String>>) -> Result<usize, PriorError> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut entries: Vec<ChunkEntry> = Vec::new();
        let mut current: Option<ChunkEntry> = None;
        let mut line = Vec::with_capacity(1024);
        let mut offset = 0u64;
        let mut seen = 0usize;

        let close = |entry: Option<ChunkEntry>,
                     end: u64,
                     chunk: usize,
                     entries: &mut Vec<ChunkEntry>|
         -> Result<(), PriorError> {
            let Some(mut e) = entry else {
                return Ok(());
            };
            e.len = end - e.offset;
            e.header
                .fits(e.len)
                .map_err(|detail| PriorError::Format { chunk, detail })?;
            if genes.is_none_or(|g| g.contains(&e.header.prefix)) {
                entries.push(e);
            }
            Ok(())
        };

        loop {
            line.clear();
            let n = reader.read_until(b'\n', &mut line)?;
            if n == 0 {
                break;
            }
            if line.first() == Some(&b'@') {
                close(current.take(), offset, seen.saturating_sub(1), &mut entries)?;
                let text = String::from_utf8_lossy(&line);
                let header = ChunkHeader::parse(&text).map_err(|detail| PriorError::Format {
                    chunk: seen,
                    detail,
                })?;
                current = Some(ChunkEntry {
                    header,
                    offset,
                    len: 0,
                });
                seen += 1;
            }
            offset += n as u64;
        }
        close(current.take(), offset, seen.saturating_sub(1), &mut entries)?;

        self.total_kmers = entries
            .iter()
            .map(|e| e.header.kmervec_start + e.header.kmervec_size)
            .max()
            .unwrap_or(0);
        self.entries = entries;
        *self.state.get_mut() = PoolState {
            slots: vec![SlotState::default(); self.slots.len()],
            ..PoolState::default()
        };
        info!(
            "indexed {} of {} chunks covering {} k-mers in {}",
            self.entries.len(),
            seen,
            self.total_kmers,
            self.path.display()
        );
        Ok(self.entries.len())
    }

    pub fn chunk_count(&self) -> usize {
        self.entries.len()
    }

    /// One past the highest k-mer label referenced by any indexed chunk.
    pub fn total_kmers(&self) -> usize {
        self.total_kmers
    }

    /// Prefixes of the indexed chunks, in chunk order.
    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.header.prefix.as_str())
    }

    /// Check out chunk `index`, loading it into a free slot if it is not resident.
    ///
    /// Blocks while every slot is held. A thread holding more handles than
    /// there are slots therefore never returns.
    pub fn get_chunk(&self, index: usize) -> Result<ChunkHandle<'_>, PriorError> {
        if index >= self.entries.len() {
            return Err(PriorError::ChunkOutOfRange {
                index,
                chunks: self.entries.len(),
            });
        }

        let mut state = self.state.lock();
        let slot = loop {
            if let Some(s) = state.resident(index) {
                if state.slots[s].ready {
                    state.slots[s].refs += 1;
                    drop(state);
                    return Ok(self.handle(s));
                }
                // another thread is loading it
                self.changed.wait(&mut state);
                continue;
            }
            if let Some(s) = state.free_slot() {
                state.slots[s] = SlotState {
                    chunk: Some(index),
                    refs: 1,
                    ready: false,
                };
                break s;
            }
            self.changed.wait(&mut state);
        };
        drop(state);

        debug!("loading chunk {index} into slot {slot}");
        let loaded = self.load_chunk(index, &mut self.slots[slot].write());

        let mut state = self.state.lock();
        match loaded {
            Ok(()) => {
                state.slots[slot].ready = true;
                self.changed.notify_all();
                drop(state);
                Ok(self.handle(slot))
            }
            Err(e) => {
                state.slots[slot] = SlotState::default();
                self.changed.notify_all();
                Err(e)
            }
        }
    }

    /// Check out the next chunk not marked in `finished`, scanning round robin
    /// from where the previous call stopped. `None` once everything is finished.
    pub fn get_next_chunk(&self, finished: &[bool]) -> Result<Option<ChunkHandle<'_>>, PriorError> {
        let n = self.entries.len();
        let next = {
            let mut state = self.state.lock();
            let start = state.next_chunk;
            let next = (0..n)
                .map(|i| (start + i) % n)
                .find(|&i| !finished.get(i).copied().unwrap_or(false));
            if let Some(i) = next {
                state.next_chunk = (i + 1) % n;
            }
            next
        };
        match next {
            Some(i) => self.get_chunk(i).map(Some),
            None => Ok(None),
        }
    }

    /// Give a handle back. Equivalent to dropping it.
    pub fn release_chunk(&self, chunk: ChunkHandle<'_>) {
        drop(chunk);
    }

    /// Outstanding handles on chunk `index`, if it is resident.
    pub fn ref_count(&self, index: usize) -> Option<usize> {
        let state = self.state.lock();
        state
            .resident(index)
            .filter(|&s| state.slots[s].ready)
            .map(|s| state.slots[s].refs)
    }

    /// Run `f` on every chunk using `threads` workers that pull chunks with
    /// [`get_next_chunk`](Self::get_next_chunk). Results come back in chunk order.
    pub fn process_chunks<F, R>(&self, threads: usize, f: F) -> Result<Vec<R>, PriorError>
    where
        F: Fn(&PriorChunk) -> R + Sync,
        R: Send,
    {
        let claimed = Mutex::new(vec![false; self.entries.len()]);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .build()?;

        let per_worker = pool.broadcast(|_| -> Result<Vec<(usize, R)>, PriorError> {
            let mut out = Vec::new();
            loop {
                let finished = claimed.lock().clone();
                let Some(chunk) = self.get_next_chunk(&finished)? else {
                    return Ok(out);
                };
                {
                    let mut claimed = claimed.lock();
                    if claimed[chunk.index()] {
                        continue;
                    }
                    claimed[chunk.index()] = true;
                }
                out.push((chunk.index(), f(&*chunk)));
            }
        });

        let mut results = Vec::with_capacity(self.entries.len());
        for worker in per_worker {
            results.extend(worker?);
        }
        results.sort_by_key(|(i, _)| *i);
        Ok(results.into_iter().map(|(_, r)| r).collect())
    }

    fn handle(&self, slot: usize) -> ChunkHandle<'_> {
        ChunkHandle {
            owner: self,
            slot,
            guard: self.slots[slot].read(),
        }
    }

    fn release_slot(&self, slot: usize) {
        let mut state = self.state.lock();
        let s = &mut state.slots[slot];
        s.refs = s.refs.saturating_sub(1);
        if s.refs == 0 {
            self.changed.notify_all();
        }
    }

    /// Read the chunk's bytes under the file lock, then parse them.
    fn load_chunk(&self, index: usize, slot: &mut Slot) -> Result<(), PriorError> {
        let entry = &self.entries[index];
        try_allocate(&mut slot.raw, entry.len as usize, 0, "chunk bytes", self.cfg.alloc)?;
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(entry.offset))?;
            file.read_exact(&mut slot.raw)?;
        }
        let text = std::str::from_utf8(&slot.raw).map_err(|e| PriorError::Format {
            chunk: index,
            detail: e.to_string(),
        })?;
        slot.chunk.parse(index, text, self.cfg.alloc)
    }
}

/// Checked-out chunk. Dropping it releases the slot reference.
pub struct ChunkHandle<'a> {
    owner: &'a PriorData,
    slot: usize,
    guard: RwLockReadGuard<'a, Slot>,
}

impl ChunkHandle<'_> {
    /// Pool slot backing this chunk.
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl Deref for ChunkHandle<'_> {
    type Target = PriorChunk;

    fn deref(&self) -> &PriorChunk {
        &self.guard.chunk
    }
}

impl Drop for ChunkHandle<'_> {
    fn drop(&mut self) {
        // The read guard is released right after; a loader that claims the
        // slot in between waits on the write lock.
        self.owner.release_slot(self.slot);
    }
}
