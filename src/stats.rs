//! Partition statistics: per-group average and exact median of every field.
//!
//! A window's rows are grouped by calendar date (or into a single all-time
//! group), and each field is ranked independently of the others. The median
//! is the mean of the values at 1-based ranks `(n + 1) / 2` and `n / 2 + 1`
//! (integer division), which coincide for odd `n`. Both statistics are
//! rounded to two decimals.
//!
//! The rank and rounding helpers are public so the store can apply the same
//! arithmetic to order statistics it selects in SQL for the all-time pass.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

// ---

/// How rows are partitioned before aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    Daily,
    AllTime,
}

/// Key of one aggregate record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum GroupKey {
    Day(NaiveDate),
    AllTime,
}

/// Average and median of one field within one group.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct FieldAggregate {
    pub avg: Option<f64>,
    pub median: Option<f64>,
}

/// One group's statistics, one entry per catalog field in catalog order.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRecord {
    pub key: GroupKey,
    pub fields: Vec<FieldAggregate>,
}

/// A raw reading reduced to what aggregation needs.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowRow {
    pub day: NaiveDate,
    pub values: Vec<Option<f64>>,
}

/// Round half away from zero to two decimals.
///
/// Works on the binary value scaled by 100, so a decimal "half cent" that is
/// stored slightly below the midpoint rounds down (`9.935 → 9.93`).
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// The two 1-based ranks whose values average to the median of `n` values.
pub fn median_ranks(n: usize) -> Option<(usize, usize)> {
    // ---
    if n == 0 {
        return None;
    }
    Some(((n + 1) / 2, n / 2 + 1))
}

/// Rounded mean, or `None` when nothing was counted.
pub fn mean(count: usize, sum: f64) -> Option<f64> {
    // ---
    if count == 0 {
        return None;
    }
    Some(round2(sum / count as f64))
}

/// Rounded median from the values at the two central ranks.
pub fn median_from_central(lo: f64, hi: f64) -> f64 {
    round2((lo + hi) / 2.0)
}

/// Aggregate one field's values. The slice is sorted in place.
pub fn summarize_field(values: &mut [f64]) -> FieldAggregate {
    // ---
    let Some((lo, hi)) = median_ranks(values.len()) else {
        return FieldAggregate::default();
    };

    let sum: f64 = values.iter().sum();
    // Stable sort, so equal values keep row order.
    values.sort_by(f64::total_cmp);

    FieldAggregate {
        avg: mean(values.len(), sum),
        median: Some(median_from_central(values[lo - 1], values[hi - 1])),
    }
}

/// Group `rows` and aggregate every field of every group.
///
/// Records come out in ascending key order. Empty input yields no records;
/// callers treat that as nothing to write.
pub fn summarize(rows: &[WindowRow], field_count: usize, grouping: Grouping) -> Vec<AggregateRecord> {
    // ---
    let mut groups: BTreeMap<GroupKey, Vec<Vec<f64>>> = BTreeMap::new();

    for row in rows {
        let key = match grouping {
            Grouping::Daily => GroupKey::Day(row.day),
            Grouping::AllTime => GroupKey::AllTime,
        };
        let columns = groups
            .entry(key)
            .or_insert_with(|| vec![Vec::new(); field_count]);

        for (i, column) in columns.iter_mut().enumerate() {
            if let Some(v) = row.values.get(i).copied().flatten() {
                column.push(v);
            }
        }
    }

    groups
        .into_iter()
        .map(|(key, mut columns)| AggregateRecord {
            key,
            fields: columns.iter_mut().map(|c| summarize_field(c)).collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn row(d: u32, values: &[f64]) -> WindowRow {
        WindowRow {
            day: day(d),
            values: values.iter().copied().map(Some).collect(),
        }
    }

    #[test]
    fn test_median_odd_count() {
        // ---
        let mut values = vec![5.0, 1.0, 4.0, 2.0, 3.0];
        assert_eq!(summarize_field(&mut values).median, Some(3.0));
    }

    #[test]
    fn test_median_even_count() {
        // ---
        let mut values = vec![4.0, 3.0, 2.0, 1.0];
        assert_eq!(summarize_field(&mut values).median, Some(2.5));
    }

    #[test]
    fn test_average_rounded() {
        // ---
        let mut values = vec![10.0, 20.0, 30.0];
        assert_eq!(summarize_field(&mut values).avg, Some(20.0));

        let mut thirds = vec![1.0, 1.0, 2.0];
        assert_eq!(summarize_field(&mut thirds).avg, Some(1.33));
    }

    #[test]
    fn test_half_cent_medians() {
        // ---
        let median = |a: f64, b: f64| summarize_field(&mut [a, b]).median;

        // Exact binary midpoints round away from zero.
        assert_eq!(median(0.0, 0.25), Some(0.13));
        assert_eq!(median(1.0, 1.25), Some(1.13));
        assert_eq!(median(-0.25, 0.0), Some(-0.13));

        // Decimal midpoints follow their binary value.
        assert_eq!(median(0.01, 0.02), Some(0.02));
        assert_eq!(median(9.93, 9.94), Some(9.93));
    }

    #[test]
    fn test_median_ranks() {
        // ---
        assert_eq!(median_ranks(0), None);
        assert_eq!(median_ranks(1), Some((1, 1)));
        assert_eq!(median_ranks(2), Some((1, 2)));
        assert_eq!(median_ranks(4), Some((2, 3)));
        assert_eq!(median_ranks(5), Some((3, 3)));
    }

    #[test]
    fn test_single_value_and_duplicates() {
        // ---
        let mut one = vec![7.125];
        let agg = summarize_field(&mut one);
        assert_eq!(agg.avg, Some(7.13));
        assert_eq!(agg.median, Some(7.13));

        let mut ties = vec![2.0, 2.0, 2.0, 9.0];
        assert_eq!(summarize_field(&mut ties).median, Some(2.0));
    }

    #[test]
    fn test_empty_field_is_null() {
        // ---
        assert_eq!(summarize_field(&mut []), FieldAggregate::default());
    }

    #[test]
    fn test_daily_grouping_is_per_date_and_ordered() {
        // ---
        let rows = vec![
            row(2, &[10.0, 1.0]),
            row(1, &[1.0, 100.0]),
            row(2, &[20.0, 3.0]),
            row(1, &[3.0, 300.0]),
            row(2, &[30.0, 2.0]),
        ];

        let records = summarize(&rows, 2, Grouping::Daily);
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].key, GroupKey::Day(day(1)));
        assert_eq!(records[0].fields[0].avg, Some(2.0));
        assert_eq!(records[0].fields[1].median, Some(200.0));

        assert_eq!(records[1].key, GroupKey::Day(day(2)));
        assert_eq!(records[1].fields[0].median, Some(20.0));
        assert_eq!(records[1].fields[1].median, Some(2.0));
    }

    #[test]
    fn test_fields_are_ranked_independently() {
        // ---
        // No single row holds both medians.
        let rows = vec![row(1, &[1.0, 30.0]), row(1, &[2.0, 10.0]), row(1, &[3.0, 20.0])];
        let records = summarize(&rows, 2, Grouping::AllTime);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, GroupKey::AllTime);
        assert_eq!(records[0].fields[0].median, Some(2.0));
        assert_eq!(records[0].fields[1].median, Some(20.0));
    }

    #[test]
    fn test_nulls_are_skipped() {
        // ---
        let rows = vec![
            WindowRow { day: day(1), values: vec![Some(4.0), None] },
            WindowRow { day: day(1), values: vec![Some(6.0), None] },
        ];
        let records = summarize(&rows, 2, Grouping::Daily);
        assert_eq!(records[0].fields[0].avg, Some(5.0));
        assert_eq!(records[0].fields[1], FieldAggregate::default());
    }

    #[test]
    fn test_empty_input_yields_no_records() {
        // ---
        assert!(summarize(&[], 3, Grouping::Daily).is_empty());
        assert!(summarize(&[], 3, Grouping::AllTime).is_empty());
    }
}
