// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Useful constants.
 */

/// The number of instrumental polarisations in every visibility (XX, XY, YX,
/// YY).
pub const NUM_POLARISATIONS: usize = 4;

/// The default number of coarse channels (a.k.a. subbands or gpuboxes) in an
/// MWA observation.
pub const DEFAULT_NUM_SUBBANDS: usize = 24;

/// The default amount of memory that visibilities read in a single time
/// chunk may occupy \[bytes\]. 4 GiB.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 4 * 1024 * 1024 * 1024;

/// The version of the mwaf format written out.
pub const MWAF_VERSION: &str = "1.0";

/// The placeholder in flag filename templates that gets replaced by the
/// two-digit gpubox number.
pub const FLAG_FILENAME_PLACEHOLDER: &str = "%%";
