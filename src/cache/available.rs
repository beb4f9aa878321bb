//! Price ladder merge
//!
//! One `Available` holds one ladder for one runner. Rows are keyed by their
//! first element, which is the price for full-depth rows (`[price, size]`)
//! and the level index for depth rows (`[level, price, size]`). A zero in
//! the size position deletes the keyed entry. Rows are applied strictly in
//! the order given.

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::warn;

use super::{LadderOrder, PriceSize};
use crate::parser::LadderRow;

/// Position of the size field in a `[price, size]` row
pub const FULL_DEPTH: usize = 1;
/// Position of the size field in a `[level, price, size]` row
pub const LEVEL_DEPTH: usize = 2;

#[derive(Debug, Clone)]
pub struct Available {
    /// Keyed by price or by level, depending on the row shape
    book: BTreeMap<Decimal, PriceSize>,
    /// Index of the size field; the price sits just before it
    deletion_select: usize,
    order: LadderOrder,
    /// Sorted view, rebuilt after each update
    serialised: Vec<PriceSize>,
}

impl Available {
    pub fn new(rows: &[LadderRow], deletion_select: usize, order: LadderOrder) -> Self {
        let mut available = Self {
            book: BTreeMap::new(),
            deletion_select,
            order,
            serialised: Vec::new(),
        };
        available.update(rows);
        available
    }

    /// Ladder fed by `[price, size]` rows
    pub fn full(rows: &[LadderRow], order: LadderOrder) -> Self {
        Self::new(rows, FULL_DEPTH, order)
    }

    /// Ladder fed by `[level, price, size]` rows
    pub fn levels(rows: &[LadderRow], order: LadderOrder) -> Self {
        Self::new(rows, LEVEL_DEPTH, order)
    }

    pub fn empty(deletion_select: usize, order: LadderOrder) -> Self {
        Self::new(&[], deletion_select, order)
    }

    /// Merge update rows in order
    pub fn update(&mut self, rows: &[LadderRow]) {
        for row in rows {
            let (key, price, size) = match (
                row.first(),
                row.get(self.deletion_select - 1),
                row.get(self.deletion_select),
            ) {
                (Some(key), Some(price), Some(size)) => (*key, *price, *size),
                _ => {
                    warn!(row = ?row, expected_len = self.deletion_select + 1, "Malformed ladder row skipped");
                    continue;
                }
            };

            if size.is_zero() {
                self.book.remove(&key);
            } else {
                self.book.insert(key, PriceSize { price, size });
            }
        }
        self.serialise();
    }

    /// Empty the ladder; the serialized view becomes an empty list
    pub fn clear(&mut self) {
        self.book.clear();
        self.serialise();
    }

    pub fn serialised(&self) -> &[PriceSize] {
        &self.serialised
    }

    pub fn is_empty(&self) -> bool {
        self.book.is_empty()
    }

    pub fn len(&self) -> usize {
        self.book.len()
    }

    pub fn order(&self) -> LadderOrder {
        self.order
    }

    fn serialise(&mut self) {
        let mut ladder: Vec<PriceSize> = self.book.values().copied().collect();
        match self.order {
            LadderOrder::Ascending => ladder.sort_by(|a, b| a.price.cmp(&b.price)),
            LadderOrder::Descending => ladder.sort_by(|a, b| b.price.cmp(&a.price)),
        }
        self.serialised = ladder;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ps(price: Decimal, size: Decimal) -> PriceSize {
        PriceSize { price, size }
    }

    #[test]
    fn test_full_depth_sorted_ascending() {
        let available = Available::full(
            &[vec![dec!(27), dec!(0.95)], vec![dec!(13), dec!(28.01)], vec![dec!(1.02), dec!(1157.21)]],
            LadderOrder::Ascending,
        );
        assert_eq!(
            available.serialised(),
            &[ps(dec!(1.02), dec!(1157.21)), ps(dec!(13), dec!(28.01)), ps(dec!(27), dec!(0.95))]
        );
    }

    #[test]
    fn test_full_depth_sorted_descending() {
        let available = Available::full(
            &[vec![dec!(1.01), dec!(12)], vec![dec!(1.02), dec!(34.45)]],
            LadderOrder::Descending,
        );
        assert_eq!(
            available.serialised(),
            &[ps(dec!(1.02), dec!(34.45)), ps(dec!(1.01), dec!(12))]
        );
    }

    #[test]
    fn test_full_depth_upsert_and_insert() {
        let mut available = Available::full(
            &[vec![dec!(27), dec!(0.95)], vec![dec!(13), dec!(28.01)]],
            LadderOrder::Ascending,
        );
        available.update(&[vec![dec!(27), dec!(6.9)], vec![dec!(30), dec!(1)]]);
        assert_eq!(
            available.serialised(),
            &[ps(dec!(13), dec!(28.01)), ps(dec!(27), dec!(6.9)), ps(dec!(30), dec!(1))]
        );
    }

    #[test]
    fn test_full_depth_zero_removes_price() {
        let mut available = Available::full(
            &[vec![dec!(27), dec!(0.95)], vec![dec!(13), dec!(28.01)], vec![dec!(1.02), dec!(1157.21)]],
            LadderOrder::Ascending,
        );
        available.update(&[vec![dec!(27), dec!(0)]]);
        assert_eq!(
            available.serialised(),
            &[ps(dec!(1.02), dec!(1157.21)), ps(dec!(13), dec!(28.01))]
        );

        // removing an absent price is a no-op
        available.update(&[vec![dec!(99), dec!(0)]]);
        assert_eq!(available.len(), 2);
    }

    #[test]
    fn test_levels_replace_by_index() {
        let mut available = Available::levels(
            &[vec![dec!(0), dec!(36), dec!(10.57)], vec![dec!(1), dec!(38), dec!(3.57)]],
            LadderOrder::Ascending,
        );
        available.update(&[vec![dec!(0), dec!(36), dec!(0.57)]]);
        assert_eq!(
            available.serialised(),
            &[ps(dec!(36), dec!(0.57)), ps(dec!(38), dec!(3.57))]
        );
    }

    #[test]
    fn test_levels_index_shift() {
        // remove at an unused index followed by rewrites of the remaining levels
        let mut available = Available::levels(
            &[vec![dec!(1), dec!(1.01), dec!(9835.74)], vec![dec!(0), dec!(1.02), dec!(1126.22)]],
            LadderOrder::Descending,
        );
        available.update(&[
            vec![dec!(2), dec!(0), dec!(0)],
            vec![dec!(1), dec!(1.01), dec!(9835.74)],
            vec![dec!(0), dec!(1.02), dec!(1126.22)],
        ]);
        assert_eq!(available.len(), 2);
        assert_eq!(
            available.serialised(),
            &[ps(dec!(1.02), dec!(1126.22)), ps(dec!(1.01), dec!(9835.74))]
        );
    }

    #[test]
    fn test_levels_rows_applied_in_order() {
        let mut available = Available::levels(
            &[vec![dec!(0), dec!(36), dec!(10.57)], vec![dec!(1), dec!(38), dec!(3.57)]],
            LadderOrder::Ascending,
        );
        available.update(&[
            vec![dec!(0), dec!(36), dec!(0)],
            vec![dec!(1), dec!(38), dec!(0)],
            vec![dec!(0), dec!(38), dec!(3.57)],
        ]);
        assert_eq!(available.serialised(), &[ps(dec!(38), dec!(3.57))]);
    }

    #[test]
    fn test_clear() {
        let mut available = Available::full(&[vec![dec!(1.5), dec!(2)]], LadderOrder::Ascending);
        available.clear();
        assert!(available.is_empty());
        assert!(available.serialised().is_empty());
    }

    #[test]
    fn test_malformed_row_skipped() {
        let mut available = Available::levels(&[], LadderOrder::Ascending);
        available.update(&[vec![dec!(0), dec!(1.5)], vec![dec!(1), dec!(1.6), dec!(3)]]);
        assert_eq!(available.serialised(), &[ps(dec!(1.6), dec!(3))]);
    }
}
