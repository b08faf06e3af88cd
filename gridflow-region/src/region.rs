//! A region: a finite, canonicalized set of disjoint [`GridBox`]es.

use serde::{Deserialize, Serialize};

use crate::box_::GridBox;

/// A finite set of pairwise-disjoint boxes of the same dimensionality.
///
/// A `Region` is always kept canonical: empty boxes are dropped,
/// overlapping input is resolved into disjoint pieces, and boxes that
/// are adjacent along exactly one dimension (and otherwise identical)
/// are merged into a single larger box. Canonicalization is idempotent:
/// `canonicalize(canonicalize(r)) == canonicalize(r)`.
#[derive(Clone, Eq, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct Region<const D: usize> {
    boxes: Vec<GridBox<D>>,
}

impl<const D: usize> Region<D> {
    /// The empty region.
    pub fn empty() -> Self {
        Region { boxes: Vec::new() }
    }

    /// A region containing a single box (dropped if empty).
    pub fn single(b: GridBox<D>) -> Self {
        Region::from_boxes(vec![b])
    }

    /// Builds a canonical region from an arbitrary, possibly overlapping
    /// or unsorted, collection of boxes.
    pub fn from_boxes(boxes: Vec<GridBox<D>>) -> Self {
        Region { boxes: canonicalize(boxes) }
    }

    /// True if the region covers no points.
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// The total number of points covered, i.e. the sum of the areas of
    /// the (disjoint) constituent boxes.
    pub fn area(&self) -> i64 {
        self.boxes.iter().map(GridBox::area).sum()
    }

    /// Iterates over the canonical constituent boxes, in the
    /// deterministic lexicographic order used throughout the runtime.
    pub fn iterate_boxes(&self) -> impl Iterator<Item = &GridBox<D>> {
        self.boxes.iter()
    }

    /// The constituent boxes as a slice.
    pub fn boxes(&self) -> &[GridBox<D>] {
        &self.boxes
    }

    /// True if every point of `b` is covered by this region.
    pub fn contains(&self, b: &GridBox<D>) -> bool {
        if b.is_empty() {
            return true;
        }
        let mut remaining = vec![*b];
        for region_box in &self.boxes {
            let mut next = Vec::new();
            for piece in remaining {
                if piece.overlaps(region_box) {
                    next.extend(piece.difference(region_box));
                } else {
                    next.push(piece);
                }
            }
            remaining = next;
            if remaining.is_empty() {
                return true;
            }
        }
        remaining.is_empty()
    }

    /// The union `self ∪ other`.
    pub fn union(&self, other: &Self) -> Self {
        let mut boxes = self.difference(other).boxes;
        boxes.extend(other.boxes.iter().copied());
        Region::from_boxes(boxes)
    }

    /// The intersection `self ∩ other`.
    pub fn intersection(&self, other: &Self) -> Self {
        let mut boxes = Vec::new();
        for a in &self.boxes {
            for b in &other.boxes {
                if let Some(overlap) = a.intersect(b) {
                    boxes.push(overlap);
                }
            }
        }
        Region::from_boxes(boxes)
    }

    /// The set difference `self \ other`.
    pub fn difference(&self, other: &Self) -> Self {
        let mut pieces = self.boxes.clone();
        for subtracted in &other.boxes {
            let mut next = Vec::new();
            for p in pieces {
                if p.overlaps(subtracted) {
                    next.extend(p.difference(subtracted));
                } else {
                    next.push(p);
                }
            }
            pieces = next;
        }
        Region::from_boxes(pieces)
    }
}

/// Resolves an arbitrary bag of boxes into the canonical disjoint,
/// merged, sorted form.
fn canonicalize<const D: usize>(boxes: Vec<GridBox<D>>) -> Vec<GridBox<D>> {
    let mut disjoint: Vec<GridBox<D>> = Vec::new();
    for b in boxes {
        if b.is_empty() {
            continue;
        }
        let mut pieces = vec![b];
        for existing in &disjoint {
            let mut next = Vec::new();
            for p in pieces {
                if p.overlaps(existing) {
                    next.extend(p.difference(existing));
                } else {
                    next.push(p);
                }
            }
            pieces = next;
        }
        disjoint.extend(pieces);
    }

    // Merge boxes that agree on every dimension but one, and are
    // adjacent or overlapping along that one, to a fixpoint.
    loop {
        let mut merged_any = false;
        'search: for i in 0..disjoint.len() {
            for j in (i + 1)..disjoint.len() {
                if let Some(merged) = try_merge(&disjoint[i], &disjoint[j]) {
                    disjoint[i] = merged;
                    disjoint.remove(j);
                    merged_any = true;
                    break 'search;
                }
            }
        }
        if !merged_any {
            break;
        }
    }

    disjoint.sort();
    disjoint
}

/// If `a` and `b` differ along at most one dimension and are adjacent or
/// overlapping along it, returns their union as a single box.
fn try_merge<const D: usize>(a: &GridBox<D>, b: &GridBox<D>) -> Option<GridBox<D>> {
    let mut differing = None;
    for d in 0..D {
        if a.offset[d] != b.offset[d] || a.range[d] != b.range[d] {
            if differing.is_some() {
                return None;
            }
            differing = Some(d);
        }
    }
    let d = match differing {
        None => return Some(*a), // exact duplicates
        Some(d) => d,
    };

    let a_lo = a.offset[d];
    let a_hi = a.end(d);
    let b_lo = b.offset[d];
    let b_hi = b.end(d);
    if a_hi < b_lo || b_hi < a_lo {
        return None; // gap between them
    }
    let mut merged = *a;
    merged.offset[d] = a_lo.min(b_lo);
    merged.range[d] = a_hi.max(b_hi) - merged.offset[d];
    Some(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r1(boxes: &[(i64, i64)]) -> Region<1> {
        Region::from_boxes(boxes.iter().map(|&(o, r)| GridBox::new([o], [r])).collect())
    }

    #[test]
    fn canonicalize_merges_adjacent_boxes() {
        let region = r1(&[(0, 4), (4, 4)]);
        assert_eq!(region.boxes(), &[GridBox::new([0], [8])]);
    }

    #[test]
    fn canonicalize_resolves_overlap() {
        let region = r1(&[(0, 6), (4, 6)]);
        assert_eq!(region.area(), 10);
        assert!(region.contains(&GridBox::new([0], [10])));
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let once = r1(&[(0, 4), (4, 4), (20, 3)]);
        let twice = Region::from_boxes(once.boxes().to_vec());
        assert_eq!(once, twice);
    }

    #[test]
    fn union_intersection_difference_laws() {
        let a = r1(&[(0, 8)]);
        let b = r1(&[(4, 8)]);

        let union = a.union(&b);
        assert_eq!(union.area(), 12);
        assert!(union.contains(&GridBox::new([0], [12])));

        let inter = a.intersection(&b);
        assert_eq!(inter.area(), 4);
        assert!(inter.contains(&GridBox::new([4], [4])));

        // (A ∪ B) \ B ⊇ A \ B
        let diff_ab = a.difference(&b);
        let lhs = union.difference(&b);
        for piece in diff_ab.iterate_boxes() {
            assert!(lhs.contains(piece));
        }

        // A ∩ A == A
        assert_eq!(a.intersection(&a), a);
    }

    #[test]
    fn empty_region_contains_nothing_but_empty_box() {
        let empty: Region<1> = Region::empty();
        assert!(empty.is_empty());
        assert!(empty.contains(&GridBox::new([0], [0])));
        assert!(!empty.contains(&GridBox::new([0], [1])));
    }
}
