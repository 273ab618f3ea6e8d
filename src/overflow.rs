//! Overflow store: label lists for k-mers shared by more than one label.
//!
//! A k-mer enters the store exactly once, when its second label is seen
//! ([`OverflowStore::promote`]); every later label for it is appended. Lists
//! grow in blocks of [`OVERFLOW_BLOCK`] labels and never shrink.

use ahash::AHashMap;

use crate::encode::KmerWord;

/// Growth increment (in labels) of an overflow list.
pub const OVERFLOW_BLOCK: usize = 5;

/// Ordered labels sharing one k-mer, in first-seen order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelList {
    labels: Vec<u32>,
}

impl LabelList {
    fn pair(first: u32, second: u32) -> Self {
        let mut labels = Vec::with_capacity(OVERFLOW_BLOCK);
        labels.push(first);
        labels.push(second);
        Self { labels }
    }

    fn push(&mut self, label: u32) {
        if self.labels.len() == self.labels.capacity() {
            self.labels.reserve_exact(OVERFLOW_BLOCK);
        }
        self.labels.push(label);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Allocated slots; grows by [`OVERFLOW_BLOCK`] at a time.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.labels.capacity()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u32] {
        &self.labels
    }
}

/// Side table of multi-label k-mers. Read-only once the build phase ends.
#[derive(Debug)]
pub struct OverflowStore<W: KmerWord> {
    entries: AHashMap<W, LabelList>,
}

impl<W: KmerWord> Default for OverflowStore<W> {
    fn default() -> Self {
        Self {
            entries: AHashMap::new(),
        }
    }
}

impl<W: KmerWord> OverflowStore<W> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the list `[first, second]` for `kmer`. Must be called once per k-mer.
    pub fn promote(&mut self, kmer: W, first: u32, second: u32) {
        let prev = self.entries.insert(kmer, LabelList::pair(first, second));
        debug_assert!(prev.is_none(), "k-mer promoted twice");
    }

    /// Append `label` to an already promoted k-mer. Returns `false` if the
    /// k-mer was never promoted.
    pub fn append(&mut self, kmer: W, label: u32) -> bool {
        match self.entries.get_mut(&kmer) {
            Some(list) => {
                list.push(label);
                true
            }
            None => false,
        }
    }

    /// Every label sharing `kmer`, in first-seen order.
    #[inline]
    pub fn counts_for(&self, kmer: W) -> Option<&[u32]> {
        self.entries.get(&kmer).map(LabelList::as_slice)
    }

    #[inline]
    pub fn list(&self, kmer: W) -> Option<&LabelList> {
        self.entries.get(&kmer)
    }

    /// Number of promoted k-mers.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
