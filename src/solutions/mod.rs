// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to read, write and apply direction-independent calibration solutions.

pub mod ao;
pub mod apply;
mod error;

pub use ao::AoSolutionsFile;
pub use error::*;

use std::path::Path;

use hifitime::Epoch;
use log::{debug, warn};
use marlu::{c64, Jones};
use ndarray::prelude::*;
use rayon::prelude::*;

use crate::constants::NUM_POLARISATIONS;

/// A source of calibration solutions. Solutions are read sequentially, one
/// complex gain per call, in (interval, antenna, channel, polarisation) order.
pub trait SolutionStore {
    fn num_intervals(&self) -> usize;

    fn num_polarisations(&self) -> usize;

    fn num_channels(&self) -> usize;

    fn num_antennas(&self) -> usize;

    /// Read the next complex gain.
    fn read_next_solution(&mut self) -> Result<c64, SolutionsReadError>;

    /// The start time of the solution interval, if known.
    fn start_time(&self) -> Option<Epoch> {
        None
    }

    /// The end time of the solution interval, if known.
    fn end_time(&self) -> Option<Epoch> {
        None
    }
}

/// Direction-independent calibration solutions for a single time interval.
#[derive(Debug, Clone)]
pub struct CalibrationSolutions {
    /// The Jones matrices of each antenna and channel. This has dimensions of
    /// (num_antennas, num_channels). Flagged solutions are NaN. These Jones
    /// matrices, when applied to data Jones matrices, should approximate the
    /// model Jones matrices used in calibration.
    pub di_jones: Array2<Jones<f64>>,

    /// The indices of antennas whose solutions are all NaN. Zero indexed.
    pub flagged_antennas: Vec<usize>,

    /// The indices of channels whose solutions are all NaN. Zero indexed.
    pub flagged_channels: Vec<usize>,

    pub start_timestamp: Option<Epoch>,

    pub end_timestamp: Option<Epoch>,
}

impl CalibrationSolutions {
    /// Read all of the solutions out of a [`SolutionStore`]. Only stores with
    /// a single interval and 4 polarisations can be used.
    pub fn from_store<S: SolutionStore + ?Sized>(
        store: &mut S,
    ) -> Result<CalibrationSolutions, SolutionsApplyError> {
        if store.num_intervals() != 1 {
            return Err(SolutionsApplyError::NumIntervals {
                got: store.num_intervals(),
            });
        }
        if store.num_polarisations() != NUM_POLARISATIONS {
            return Err(SolutionsApplyError::NumPolarisations {
                got: store.num_polarisations(),
            });
        }

        let num_antennas = store.num_antennas();
        let num_channels = store.num_channels();
        let mut di_jones = Array2::from_elem((num_antennas, num_channels), Jones::identity());
        for j in di_jones.iter_mut() {
            *j = Jones::from([
                store.read_next_solution()?,
                store.read_next_solution()?,
                store.read_next_solution()?,
                store.read_next_solution()?,
            ]);
        }

        let solutions = CalibrationSolutions::new(di_jones, store.start_time(), store.end_time());
        debug!(
            "Read calibration solutions for {num_antennas} antennas and {num_channels} channels"
        );
        if !solutions.flagged_antennas.is_empty() {
            warn!(
                "Calibration solutions flag {} antennas: {:?}",
                solutions.flagged_antennas.len(),
                solutions.flagged_antennas
            );
        }
        Ok(solutions)
    }

    /// Read solutions from an "André Offringa style" binary file.
    pub fn read_ao<P: AsRef<Path>>(file: P) -> Result<CalibrationSolutions, SolutionsApplyError> {
        let mut store = AoSolutionsFile::open(file)?;
        Self::from_store(&mut store)
    }

    /// Write these solutions to an "André Offringa style" binary file.
    pub fn write_ao<P: AsRef<Path>>(&self, file: P) -> Result<(), SolutionsWriteError> {
        ao::write(self, file.as_ref())
    }

    /// Make solutions out of Jones matrices with dimensions (num_antennas,
    /// num_channels), finding flagged antennas and channels.
    pub fn new(
        di_jones: Array2<Jones<f64>>,
        start_timestamp: Option<Epoch>,
        end_timestamp: Option<Epoch>,
    ) -> CalibrationSolutions {
        // Find any antennas containing only NaNs; these are flagged.
        let flagged_antennas = di_jones
            .axis_iter(Axis(0))
            .into_par_iter()
            .enumerate()
            .filter(|(_, di_jones)| di_jones.iter().all(|j| j.any_nan()))
            .map(|pair| pair.0)
            .collect();

        // Also find any flagged channels.
        let flagged_channels = di_jones
            .axis_iter(Axis(1))
            .into_par_iter()
            .enumerate()
            .filter(|(_, di_jones)| di_jones.iter().all(|j| j.any_nan()))
            .map(|pair| pair.0)
            .collect();

        CalibrationSolutions {
            di_jones,
            flagged_antennas,
            flagged_channels,
            start_timestamp,
            end_timestamp,
        }
    }

    pub fn num_antennas(&self) -> usize {
        self.di_jones.len_of(Axis(0))
    }

    pub fn num_channels(&self) -> usize {
        self.di_jones.len_of(Axis(1))
    }
}
