// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to write (and read back) flags in mwaf files.

mod error;
pub mod mwaf;

pub use error::{MwafReadError, MwafWriteError};
pub use mwaf::{read_mwaf, FlagWriter, MwafFile};

use crate::constants::NUM_POLARISATIONS;

/// Reduce per-polarisation flags to one flag per channel; a channel is flagged
/// if any of its polarisations are flagged.
pub fn reduce_polarisations(flags: &[[bool; NUM_POLARISATIONS]]) -> Vec<bool> {
    flags.iter().map(|f| f.iter().any(|&f| f)).collect()
}
