// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to supply baseline geometry.


use hifitime::{Duration, Epoch};
use log::debug;
use marlu::{pos::xyz::xyzs_to_cross_uvws, precession::get_lmst, RADec, XyzGeodetic, UVW};

/// Something that can calculate the [`UVW`] of a baseline at a time. This is
/// used when visibilities are averaged in time, because the UVWs of the
/// averaged visibilities must be at the averaged time.
pub trait UvwCalculator: Send + Sync {
    /// Get the [`UVW`] of the baseline formed by `ant1` and `ant2` at `time`
    /// \[metres\].
    fn calculate_uvw(&self, time: Epoch, ant1: usize, ant2: usize) -> UVW;

    /// The number of antennas that UVWs can be calculated for. Antenna indices
    /// must be less than this.
    fn num_tiles(&self) -> usize;
}

/// Calculates [`UVW`]s from the geodetic positions of an array's antennas and
/// a phase centre. No precession is applied.
#[derive(Debug, Clone)]
pub struct ArrayUvwCalculator {
    tile_xyzs: Vec<XyzGeodetic>,
    phase_centre: RADec,

    /// \[radians\]
    array_longitude_rad: f64,

    dut1: Duration,
}

impl ArrayUvwCalculator {
    pub fn new(
        tile_xyzs: Vec<XyzGeodetic>,
        phase_centre: RADec,
        array_longitude_rad: f64,
        dut1: Duration,
    ) -> ArrayUvwCalculator {
        debug!(
            "UVWs are calculated for {} tiles towards phase centre RA {:.4}°, Dec {:.4}°",
            tile_xyzs.len(),
            phase_centre.ra.to_degrees(),
            phase_centre.dec.to_degrees()
        );
        ArrayUvwCalculator {
            tile_xyzs,
            phase_centre,
            array_longitude_rad,
            dut1,
        }
    }
}

impl UvwCalculator for ArrayUvwCalculator {
    fn calculate_uvw(&self, time: Epoch, ant1: usize, ant2: usize) -> UVW {
        // Auto-correlations have no baseline.
        if ant1 == ant2 {
            return UVW {
                u: 0.0,
                v: 0.0,
                w: 0.0,
            };
        }

        let lst = get_lmst(self.array_longitude_rad, time, self.dut1);
        let hadec = self.phase_centre.to_hadec(lst);
        let xyzs = [self.tile_xyzs[ant1], self.tile_xyzs[ant2]];
        xyzs_to_cross_uvws(&xyzs, hadec)[0]
    }

    fn num_tiles(&self) -> usize {
        self.tile_xyzs.len()
    }
}
