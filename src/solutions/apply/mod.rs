// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A visibility stage that applies calibration solutions.


use std::path::Path;

use log::{debug, warn};
use marlu::Jones;

use super::{CalibrationSolutions, SolutionStore, SolutionsApplyError};
use crate::{
    constants::NUM_POLARISATIONS,
    io::write::{AntennaInfo, BandInfo, VisRow, VisStage, VisStageError},
};

/// Applies direction-independent calibration solutions to every row; for a
/// baseline of antennas A and B with solutions `J_A` and `J_B`, the corrected
/// visibilities are `J_A · D · J_Bᴴ`.
pub struct ApplySolutionsStage {
    solutions: CalibrationSolutions,

    /// The number of observation channels that share a solution channel. Only
    /// known once band information is given.
    chans_per_solution: Option<usize>,

    num_obs_chans: usize,
}

impl ApplySolutionsStage {
    /// Read solutions out of a store. The store must have exactly 1 interval
    /// and 4 polarisations.
    pub fn new<S: SolutionStore + ?Sized>(
        store: &mut S,
    ) -> Result<ApplySolutionsStage, SolutionsApplyError> {
        Ok(Self::from_solutions(CalibrationSolutions::from_store(
            store,
        )?))
    }

    pub fn from_solutions(solutions: CalibrationSolutions) -> ApplySolutionsStage {
        ApplySolutionsStage {
            solutions,
            chans_per_solution: None,
            num_obs_chans: 0,
        }
    }

    /// Read solutions from an "André Offringa style" binary file.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<ApplySolutionsStage, SolutionsApplyError> {
        Ok(Self::from_solutions(CalibrationSolutions::read_ao(file)?))
    }

    pub fn solutions(&self) -> &CalibrationSolutions {
        &self.solutions
    }

    fn apply(&self, row: &mut VisRow, chans_per_solution: usize) -> Result<(), SolutionsApplyError> {
        let num_antennas = self.solutions.num_antennas();
        if row.ant1 >= num_antennas || row.ant2 >= num_antennas {
            return Err(SolutionsApplyError::AntennaOutOfRange {
                ant1: row.ant1,
                ant2: row.ant2,
                num_antennas,
            });
        }
        if row.num_channels() != self.num_obs_chans || !row.is_consistent() {
            return Err(SolutionsApplyError::ChannelMismatch {
                ant1: row.ant1,
                ant2: row.ant2,
                got: row.num_channels(),
                expected: self.num_obs_chans,
            });
        }

        let sols1 = self.solutions.di_jones.row(row.ant1);
        let sols2 = self.solutions.di_jones.row(row.ant2);
        for (i_chan, (vis_data, vis_flags)) in
            row.data.iter_mut().zip(row.flags.iter_mut()).enumerate()
        {
            let i_sol_chan = i_chan / chans_per_solution;
            let sol1 = sols1[i_sol_chan];
            let sol2 = sols2[i_sol_chan];

            // One of the antennas doesn't have a solution; flag.
            if sol1.any_nan() || sol2.any_nan() {
                *vis_data = Jones::default();
                *vis_flags = [true; NUM_POLARISATIONS];
            } else {
                // Promote the data before demoting it again.
                let d: Jones<f64> = Jones::from(*vis_data);
                *vis_data = Jones::from((sol1 * d) * sol2.h());
            }
        }

        Ok(())
    }
}

impl VisStage for ApplySolutionsStage {
    fn name(&self) -> &'static str {
        "apply solutions"
    }

    fn write_band_info(&mut self, band: BandInfo) -> Result<BandInfo, VisStageError> {
        let obs_chans = band.num_channels();
        let sol_chans = self.solutions.num_channels();
        if sol_chans == 0 || obs_chans < sol_chans || obs_chans % sol_chans != 0 {
            return Err(SolutionsApplyError::ChannelsNotMultiple {
                obs_chans,
                sol_chans,
            }
            .into());
        }
        let chans_per_solution = obs_chans / sol_chans;
        debug!("Applying each of {sol_chans} solution channels to {chans_per_solution} observation channels");
        self.chans_per_solution = Some(chans_per_solution);
        self.num_obs_chans = obs_chans;
        Ok(band)
    }

    fn write_antennas(&mut self, antennas: &[AntennaInfo]) -> Result<(), VisStageError> {
        if antennas.len() != self.solutions.num_antennas() {
            warn!(
                "The observation has {} antennas, but the calibration solutions have {}",
                antennas.len(),
                self.solutions.num_antennas()
            );
        }
        Ok(())
    }

    fn write_row(&self, mut row: VisRow) -> Result<Option<VisRow>, VisStageError> {
        let chans_per_solution = self
            .chans_per_solution
            .ok_or(SolutionsApplyError::NoBandInfo)?;
        self.apply(&mut row, chans_per_solution)?;
        Ok(Some(row))
    }
}
