//! KmerIndex: canonical k-mer → label map with an overflow side table.
//!
//! Labels are handed out sequentially from 0 in first-seen order during the
//! build phase. A k-mer carrying more than one label keeps
//! [`OVERFLOW_SENTINEL`] in the primary map and its label list in the
//! [`OverflowStore`]. After the build the index is only read, so shared
//! references may be used from any number of counting threads.

use ahash::AHashMap;
use thiserror::Error;

use crate::encode::KmerWord;
use crate::overflow::OverflowStore;

/// Primary-map value marking a k-mer whose labels live in the overflow store.
pub const OVERFLOW_SENTINEL: u32 = u32::MAX;

#[derive(Debug, Error)]
/// Errors raised while building an index.
pub enum IndexError {
    /// More distinct labels requested than a `u32` can address.
    #[error("label space exhausted after {0} labels")]
    LabelSpaceExhausted(u32),
}

/// How repeated k-mers are handled during the build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// A repeated k-mer keeps its first label and consumes no new one.
    #[default]
    SingleLabel,
    /// Every occurrence consumes a new label; repeats go to the overflow store.
    MultiLabel,
}

/// Outcome of [`KmerIndex::assign_or_get`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Assigned {
    /// First sighting; the new label.
    New(u32),
    /// Already indexed with this single label (single-label mode).
    Existing(u32),
    /// Second label seen; the k-mer moved to the overflow store.
    Promoted,
    /// Label appended to an existing overflow list.
    Appended,
    /// Already in the overflow store (single-label mode, nothing changed).
    Shared,
}

/// A resolved lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolved<'a> {
    Single(u32),
    Multi(&'a [u32]),
}

impl Resolved<'_> {
    /// Every label position this k-mer counts towards.
    #[inline]
    pub fn labels(&self) -> &[u32] {
        match self {
            Resolved::Single(label) => std::slice::from_ref(label),
            Resolved::Multi(labels) => labels,
        }
    }
}

/// K-mer index: build-time assignment plus read-only lookup.
#[derive(Debug)]
pub struct KmerIndex<W: KmerWord> {
    map: AHashMap<W, u32>,
    overflow: OverflowStore<W>,
    next_label: u32,
}

impl<W: KmerWord> Default for KmerIndex<W> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

#[inline]
fn take_label(next: &mut u32) -> Result<u32, IndexError> {
    if *next == OVERFLOW_SENTINEL {
        return Err(IndexError::LabelSpaceExhausted(*next));
    }
    let label = *next;
    *next += 1;
    Ok(label)
}

impl<W: KmerWord> KmerIndex<W> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty index with room for `capacity` distinct k-mers.
    pub fn with_capacity(capacity: usize) -> Self {
        KmerIndex {
            map: AHashMap::with_capacity(capacity),
            overflow: OverflowStore::new(),
            next_label: 0,
        }
    }

    /// Build-phase insert.
    ///
    /// New k-mers always take the next label. For a k-mer already present the
    /// outcome depends on `mode`; see [`BuildMode`].
    pub fn assign_or_get(&mut self, kmer: W, mode: BuildMode) -> Result<Assigned, IndexError> {
        let next = &mut self.next_label;
        match self.map.get_mut(&kmer) {
            None => {
                let label = take_label(next)?;
                self.map.insert(kmer, label);
                Ok(Assigned::New(label))
            }
            Some(slot) if *slot == OVERFLOW_SENTINEL => match mode {
                BuildMode::SingleLabel => Ok(Assigned::Shared),
                BuildMode::MultiLabel => {
                    let label = take_label(next)?;
                    self.overflow.append(kmer, label);
                    Ok(Assigned::Appended)
                }
            },
            Some(slot) => match mode {
                BuildMode::SingleLabel => Ok(Assigned::Existing(*slot)),
                BuildMode::MultiLabel => {
                    let label = take_label(next)?;
                    let first = std::mem::replace(slot, OVERFLOW_SENTINEL);
                    self.overflow.promote(kmer, first, label);
                    Ok(Assigned::Promoted)
                }
            },
        }
    }

    /// Count-phase lookup. `None` for k-mers outside the reference universe.
    #[inline]
    pub fn lookup(&self, kmer: W) -> Option<Resolved<'_>> {
        match *self.map.get(&kmer)? {
            OVERFLOW_SENTINEL => self.overflow.counts_for(kmer).map(Resolved::Multi),
            label => Some(Resolved::Single(label)),
        }
    }

    #[inline]
    pub fn contains(&self, kmer: W) -> bool {
        self.map.contains_key(&kmer)
    }

    /// Distinct k-mers indexed.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Labels handed out so far; also the length a sample vector needs.
    #[inline]
    pub fn total_labels(&self) -> u32 {
        self.next_label
    }

    #[inline]
    pub fn overflow(&self) -> &OverflowStore<W> {
        &self.overflow
    }

    #[cfg(test)]
    pub(crate) fn set_next_label(&mut self, next: u32) {
        self.next_label = next;
    }
}
