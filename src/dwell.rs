//! Run-length dwell duration.
//!
//! The time a subject spends at a location is the sum, over every maximal run
//! of consecutive readings labeled with that location, of the time between the
//! run's first and last reading. Runs of a single reading contribute nothing.

use crate::LocationLabel;

/// Total dwell time for `target` across a time-ordered labeled sequence.
///
/// `timestamps` and `labels` are parallel slices in ascending time order. The
/// scan walks the sequence from the end of the window backwards, pairing run
/// boundaries into `(first, last)` spans. Each span contributes the elapsed time
/// between its edge readings, so ascending input never yields a negative total.
///
/// # Example
/// ```
/// use significant_locations::dwell_duration;
///
/// let timestamps = [0, 1000, 2000, 3000, 4000];
/// let labels = [Some(0), Some(0), None, Some(0), Some(0)];
/// assert_eq!(dwell_duration(&timestamps, &labels, 0), 2000);
/// ```
pub fn dwell_duration(timestamps: &[i64], labels: &[LocationLabel], target: usize) -> u64 {
    debug_assert_eq!(timestamps.len(), labels.len());
    let n = timestamps.len().min(labels.len());

    let reversed_ts: Vec<i64> = timestamps[..n].iter().rev().copied().collect();
    let membership = labels[..n].iter().rev().map(|label| *label == Some(target));

    // Boundary indices of the false-padded membership sequence
    let mut edges = Vec::new();
    let mut previous = false;
    for (i, member) in membership.chain(std::iter::once(false)).enumerate() {
        if member != previous {
            edges.push(i);
            previous = member;
        }
    }

    edges
        .chunks_exact(2)
        .map(|span| (span[0], span[1] - 1))
        .filter(|(first, last)| first != last)
        .map(|(first, last)| reversed_ts[first].abs_diff(reversed_ts[last]))
        .sum()
}
