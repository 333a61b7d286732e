// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with reading, writing or applying calibration solutions.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SolutionsReadError {
    #[error(
        "When reading {file}, expected MWAOCAL as the first 7 characters, got '{got}' instead!"
    )]
    AndreBinaryStr { file: String, got: String },

    #[error(
        "When reading {file}, expected a value {expected} in the header, but got '{got}' instead!"
    )]
    AndreBinaryVal {
        file: String,
        expected: &'static str,
        got: String,
    },

    #[error("Tried to read more solutions than the store has ({num} complex gains)")]
    Exhausted { num: usize },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SolutionsWriteError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SolutionsApplyError {
    #[error("Calibration solutions have {got} intervals; only 1 interval is supported")]
    NumIntervals { got: usize },

    #[error("Calibration solutions have {got} polarisations; only 4 polarisations are supported")]
    NumPolarisations { got: usize },

    #[error("The observation has {obs_chans} channels, which is not a non-zero multiple of the {sol_chans} solution channels")]
    ChannelsNotMultiple { obs_chans: usize, sol_chans: usize },

    #[error("Tried to apply solutions to a row before band information was given")]
    NoBandInfo,

    #[error("Row for baseline ({ant1}, {ant2}) refers to an antenna beyond the {num_antennas} antennas in the calibration solutions")]
    AntennaOutOfRange {
        ant1: usize,
        ant2: usize,
        num_antennas: usize,
    },

    #[error("Row for baseline ({ant1}, {ant2}) has {got} channels, but the band has {expected}")]
    ChannelMismatch {
        ant1: usize,
        ant2: usize,
        got: usize,
        expected: usize,
    },

    #[error(transparent)]
    Read(#[from] SolutionsReadError),
}
