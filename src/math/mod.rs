// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Some helper mathematics.


use hifitime::Epoch;

/// The number of baselines formed by `num_antennas` antennas, including
/// auto-correlation "baselines".
pub fn num_baselines_with_autos(num_antennas: usize) -> usize {
    num_antennas * (num_antennas + 1) / 2
}

/// Convert a pair of antenna indices into an index into an upper-triangular
/// packed array of baselines (auto-correlations included). The ordering is
/// "sensible", e.g. (0, 0), (0, 1), ..., (0, n-1), (1, 1), (1, 2), ...
///
/// `ant1` must not be bigger than `ant2`, and `ant2` must be less than
/// `num_antennas`; this is not checked here.
#[inline]
pub fn baseline_index(ant1: usize, ant2: usize, num_antennas: usize) -> usize {
    ant1 * num_antennas - ant1 * (ant1 + 1) / 2 + ant2
}

/// All of the antenna pairs formed by `num_antennas` antennas (autos
/// included), in the same order as [`baseline_index`].
pub fn baseline_pairs(num_antennas: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..num_antennas).flat_map(move |ant1| (ant1..num_antennas).map(move |ant2| (ant1, ant2)))
}

/// Get the average of a bunch of GPS times [seconds] as an [`Epoch`]. Returns
/// `None` if there were no times.
pub(crate) fn average_gps_seconds(sum: f64, count: usize) -> Option<Epoch> {
    if count == 0 {
        None
    } else {
        Some(Epoch::from_gpst_seconds(sum / count as f64))
    }
}
