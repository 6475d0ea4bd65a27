//! Deterministic candidate selection and bounded top-K retention.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use rayon::prelude::*;

/// A scored candidate. `similarity` is the raw structural similarity used
/// as the first tie-breaker.
#[derive(Clone, Debug, PartialEq)]
pub struct Scored<I> {
    pub id: I,
    pub score: f64,
    pub similarity: f64,
}

/// Winner of a selection plus how many candidates tied with it.
#[derive(Clone, Debug, PartialEq)]
pub struct Choice<I> {
    pub best: Scored<I>,
    pub tied: usize,
}

impl<I> Choice<I> {
    pub fn is_ambiguous(&self) -> bool {
        self.tied > 1
    }
}

/// Highest score strictly above `floor`. Candidates within `margin` of the
/// top score are tied; the tie goes to the highest raw similarity, then the
/// smallest id.
pub fn pick_best<I: Ord>(
    candidates: impl IntoIterator<Item = Scored<I>>,
    floor: f64,
    margin: f64,
) -> Option<Choice<I>> {
    let eligible: Vec<Scored<I>> = candidates
        .into_iter()
        .filter(|c| c.score > floor)
        .collect();
    let top = eligible.iter().map(|c| c.score).fold(f64::NEG_INFINITY, f64::max);
    if !top.is_finite() {
        return None;
    }
    let mut tied: Vec<Scored<I>> = eligible
        .into_iter()
        .filter(|c| top - c.score <= margin)
        .collect();
    let count = tied.len();
    tied.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.id.cmp(&b.id))
    });
    tied.into_iter().next().map(|best| Choice { best, tied: count })
}

/// Score every candidate in parallel. `score` returns `(score, similarity)`.
pub fn score_all<'c, F>(candidates: &[&'c str], score: F) -> Vec<Scored<&'c str>>
where
    F: Fn(&str) -> (f64, f64) + Sync,
{
    candidates
        .par_iter()
        .map(|&id| {
            let (score, similarity) = score(id);
            Scored { id, score, similarity }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Bounded top-K
// ---------------------------------------------------------------------------

struct Ranked<T> {
    score: f64,
    item: T,
}

// Higher score ranks higher; on equal score the smaller item ranks higher.
impl<T: Ord> Ord for Ranked<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.item.cmp(&self.item))
    }
}

impl<T: Ord> PartialOrd for Ranked<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Ord> PartialEq for Ranked<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: Ord> Eq for Ranked<T> {}

/// Fixed-capacity min-heap keeping the `k` best-ranked items.
pub struct TopK<T> {
    capacity: usize,
    heap: BinaryHeap<Reverse<Ranked<T>>>,
}

impl<T: Ord> TopK<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity + 1),
        }
    }

    pub fn push(&mut self, score: f64, item: T) {
        if self.capacity == 0 {
            return;
        }
        let entry = Ranked { score, item };
        if self.heap.len() < self.capacity {
            self.heap.push(Reverse(entry));
            return;
        }
        let beats_worst = self
            .heap
            .peek()
            .is_some_and(|Reverse(worst)| entry > *worst);
        if beats_worst {
            self.heap.pop();
            self.heap.push(Reverse(entry));
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Entries best first.
    pub fn into_sorted_vec(self) -> Vec<(f64, T)> {
        // Ascending order of Reverse is descending rank.
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(r)| (r.score, r.item))
            .collect()
    }
}
