//! Scaling histograms.
//!
//! A [`ScalingMap`] counts how many contractions occur at each [`Shape`].
//! Every "is this program better" decision in the optimizer compares two
//! of these maps: walk both from the highest shape downward, and the
//! first shape whose counts differ decides.

use crate::shape::Shape;
use std::collections::BTreeMap;
use std::ops::{AddAssign, Sub, SubAssign};

/// Outcome of comparing two scaling maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapCmp {
    ThisBetter,
    OtherBetter,
    Same,
    /// Neither map carries any entries; there is nothing to rank.
    Incomparable,
}

/// Histogram over shapes with a total "better-than" order.
///
/// Counts are signed: subtracting a predicted saving can leave negative
/// entries, which [`ScalingMap::all_positive`] clamps away.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScalingMap {
    map: BTreeMap<Shape, i64>,
}

impl ScalingMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `count` additional contractions at `shape`.
    pub fn add(&mut self, shape: Shape, count: i64) {
        let entry = self.map.entry(shape).or_insert(0);
        *entry += count;
        if *entry == 0 {
            self.map.remove(&shape);
        }
    }

    pub fn get(&self, shape: &Shape) -> i64 {
        self.map.get(shape).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Total number of recorded contractions (negative entries clamp
    /// to zero in the sum).
    pub fn total(&self) -> i64 {
        self.map.values().filter(|&&v| v > 0).sum()
    }

    /// Iterate entries from the highest shape downward.
    pub fn iter_desc(&self) -> impl Iterator<Item = (&Shape, &i64)> {
        self.map.iter().rev()
    }

    /// All shapes present in either map, descending.
    fn merged_keys_desc(&self, other: &ScalingMap) -> Vec<Shape> {
        let mut keys: Vec<Shape> = self
            .map
            .keys()
            .chain(other.map.keys())
            .copied()
            .collect();
        keys.sort_unstable();
        keys.dedup();
        keys.reverse();
        keys
    }

    /// Compare against `other`: the first shape (from the top) whose
    /// counts differ decides, the map with the lower count winning. A
    /// shape missing from one map counts as zero there.
    pub fn compare(&self, other: &ScalingMap) -> MapCmp {
        if self.map.is_empty() && other.map.is_empty() {
            return MapCmp::Incomparable;
        }
        for key in self.merged_keys_desc(other) {
            let a = self.get(&key);
            let b = other.get(&key);
            match a.cmp(&b) {
                std::cmp::Ordering::Less => return MapCmp::ThisBetter,
                std::cmp::Ordering::Greater => return MapCmp::OtherBetter,
                std::cmp::Ordering::Equal => {}
            }
        }
        MapCmp::Same
    }

    /// Total ordering for sorting candidate results (best first).
    pub fn cmp_order(&self, other: &ScalingMap) -> std::cmp::Ordering {
        match self.compare(other) {
            MapCmp::ThisBetter => std::cmp::Ordering::Less,
            MapCmp::OtherBetter => std::cmp::Ordering::Greater,
            MapCmp::Same | MapCmp::Incomparable => std::cmp::Ordering::Equal,
        }
    }

    pub fn is_strictly_better_than(&self, other: &ScalingMap) -> bool {
        self.compare(other) == MapCmp::ThisBetter
    }

    pub fn is_worse_than(&self, other: &ScalingMap) -> bool {
        self.compare(other) == MapCmp::OtherBetter
    }

    /// Clamp negative counts to zero (used after subtracting predicted
    /// savings from a snapshot).
    pub fn all_positive(&mut self) {
        self.map.retain(|_, v| *v > 0);
    }
}

impl AddAssign<&ScalingMap> for ScalingMap {
    fn add_assign(&mut self, rhs: &ScalingMap) {
        for (&shape, &count) in &rhs.map {
            self.add(shape, count);
        }
    }
}

impl SubAssign<&ScalingMap> for ScalingMap {
    fn sub_assign(&mut self, rhs: &ScalingMap) {
        for (&shape, &count) in &rhs.map {
            self.add(shape, -count);
        }
    }
}

impl Sub<&ScalingMap> for &ScalingMap {
    type Output = ScalingMap;

    fn sub(self, rhs: &ScalingMap) -> ScalingMap {
        let mut out = self.clone();
        out -= rhs;
        out
    }
}

impl std::fmt::Display for ScalingMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (shape, count) in self.iter_desc() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{shape}: {count}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(o: u16, v: u16) -> Shape {
        Shape {
            o_act: o,
            v_act: v,
            ..Shape::default()
        }
    }

    #[test]
    fn test_highest_shape_decides() {
        let mut a = ScalingMap::new();
        let mut b = ScalingMap::new();
        // a has fewer o2v4 contractions but many more o2v2; a still wins
        a.add(shape(2, 4), 1);
        a.add(shape(2, 2), 100);
        b.add(shape(2, 4), 2);
        b.add(shape(2, 2), 1);
        assert_eq!(a.compare(&b), MapCmp::ThisBetter);
        assert_eq!(b.compare(&a), MapCmp::OtherBetter);
    }

    #[test]
    fn test_missing_shape_counts_as_zero() {
        let mut a = ScalingMap::new();
        let mut b = ScalingMap::new();
        a.add(shape(2, 2), 1);
        b.add(shape(2, 2), 1);
        b.add(shape(2, 4), 1);
        // b carries an extra top shape, so a is better
        assert_eq!(a.compare(&b), MapCmp::ThisBetter);
    }

    #[test]
    fn test_same_and_incomparable() {
        let mut a = ScalingMap::new();
        let mut b = ScalingMap::new();
        assert_eq!(a.compare(&b), MapCmp::Incomparable);
        a.add(shape(1, 1), 3);
        b.add(shape(1, 1), 3);
        assert_eq!(a.compare(&b), MapCmp::Same);
    }

    #[test]
    fn test_subtract_and_clamp() {
        let mut a = ScalingMap::new();
        a.add(shape(2, 2), 1);
        let mut b = ScalingMap::new();
        b.add(shape(2, 2), 3);
        let mut diff = &a - &b;
        assert_eq!(diff.get(&shape(2, 2)), -2);
        diff.all_positive();
        assert!(diff.is_empty());
    }

    #[test]
    fn test_total_skips_negatives() {
        let mut a = ScalingMap::new();
        a.add(shape(2, 2), 3);
        a.add(shape(1, 1), -5);
        assert_eq!(a.total(), 3);
    }

    #[test]
    fn test_zero_entries_removed() {
        let mut a = ScalingMap::new();
        a.add(shape(1, 1), 2);
        a.add(shape(1, 1), -2);
        assert!(a.is_empty());
    }
}
