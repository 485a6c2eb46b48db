//! Keep-the-newest selection over timestamped records.

use std::time::SystemTime;

/// Outcome of a retention split. Both halves are ordered newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retention<T> {
    pub kept: Vec<T>,
    pub expired: Vec<T>,
}

/// Keep the `keep` most recent records by timestamp and select the rest for
/// deletion.
///
/// The sort is stable, so records sharing a timestamp keep their input order.
pub fn split_retained<T, F>(mut records: Vec<T>, keep: usize, timestamp: F) -> Retention<T>
where
    F: Fn(&T) -> SystemTime,
{
    records.sort_by(|a, b| timestamp(b).cmp(&timestamp(a)));
    let expired = if records.len() > keep {
        records.split_off(keep)
    } else {
        Vec::new()
    };
    Retention {
        kept: records,
        expired,
    }
}

/// The record with the greatest timestamp. On ties the earliest one in input
/// order wins.
pub fn latest<T, F>(records: &[T], timestamp: F) -> Option<&T>
where
    F: Fn(&T) -> SystemTime,
{
    records.iter().fold(None, |best: Option<&T>, r| match best {
        Some(b) if timestamp(b) >= timestamp(r) => Some(b),
        _ => Some(r),
    })
}
