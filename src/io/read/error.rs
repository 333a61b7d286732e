// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors from reading visibilities.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisReadError {
    #[error("Requested timesteps {start}..{end}, but only {available} timesteps are available")]
    TimestepsOutOfRange {
        start: usize,
        end: usize,
        available: usize,
    },

    #[error("Timestep {timestep} has {got} rows, but {expected} baselines were expected")]
    WrongNumRows {
        timestep: usize,
        got: usize,
        expected: usize,
    },

    #[error("Visibility row for baseline ({ant1}, {ant2}) at timestep {timestep} is malformed: {reason}")]
    BadRow {
        timestep: usize,
        ant1: usize,
        ant2: usize,
        reason: &'static str,
    },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
