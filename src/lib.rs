//! Canonical k-mer indexing and counting for k-mer based genotyping.
//!
//! - Rolling 2-bit encoder with O(1) reverse complement; the canonical k-mer is
//!   the larger of the two strands ([`encode`]).
//! - Label index built once from reference sequences or k-mer tables, with an
//!   overflow store for k-mers shared by several labels ([`KmerIndex`]).
//! - Saturating per-sample count vectors filled by one or more workers
//!   ([`KmerCounter`]).
//! - Chunked reference-database loader with a bounded pool of reusable slots
//!   and RAII chunk handles ([`PriorData`]).
//!
//! The width of a packed k-mer is a type parameter: `u64` for k <= 31,
//! `u128` for k <= 63.

pub mod alloc;
mod counter;
pub mod encode;
mod index;
mod overflow;
mod prior;
pub mod reader;

pub use alloc::{AllocError, AllocPolicy};
pub use counter::{
    COUNT_MAX, CountError, CountStats, CountSummary, CounterConfig, DEFAULT_K, InputKind,
    KmerCounter, SampleCounts,
};
pub use encode::{KmerWord, RollingKmer, canonical, encode_kmer, revcomp};
pub use index::{Assigned, BuildMode, IndexError, KmerIndex, OVERFLOW_SENTINEL, Resolved};
pub use overflow::{LabelList, OVERFLOW_BLOCK, OverflowStore};
pub use prior::{
    BUFFER_OVERRUN, ChunkHandle, DEFAULT_BUFFER_SIZE, PhyloNode, PriorChunk, PriorConfig,
    PriorData, PriorError,
};
pub use reader::{FastaReader, FastqReader, KtableReader, LineSource};
