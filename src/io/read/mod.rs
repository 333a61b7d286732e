// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to handle reading visibilities in time chunks.

mod error;
pub use error::VisReadError;

use std::{collections::HashMap, ops::Range};

use hifitime::Epoch;
use log::trace;

use super::write::{AntennaInfo, BandInfo, VisRow};
use crate::math::num_baselines_with_autos;

/// Something that supplies visibilities. Every timestep must contain a row for
/// every baseline (auto-correlations included) of the antennas.
pub trait VisRead: Send + Sync {
    fn band_info(&self) -> &BandInfo;

    fn antennas(&self) -> &[AntennaInfo];

    /// The timestamps of every timestep that can be read.
    fn timestamps(&self) -> &[Epoch];

    fn num_timesteps(&self) -> usize {
        self.timestamps().len()
    }

    /// Read all of the rows for the timesteps in `timesteps`.
    fn read_chunk(&mut self, timesteps: Range<usize>) -> Result<VisChunk, VisReadError>;
}

/// The visibilities of a range of timesteps, grouped by baseline.
#[derive(Debug, Clone, Default)]
pub struct VisChunk {
    pub timesteps: Range<usize>,

    /// Rows for each (ant1, ant2) pair, in time order.
    rows: HashMap<(usize, usize), Vec<VisRow>>,
}

impl VisChunk {
    pub fn new(timesteps: Range<usize>) -> VisChunk {
        VisChunk {
            timesteps,
            rows: HashMap::new(),
        }
    }

    /// Add a row. Rows for the same baseline must be inserted in time order.
    pub fn insert(&mut self, row: VisRow) {
        self.rows.entry((row.ant1, row.ant2)).or_default().push(row);
    }

    /// Get all of the rows of a baseline.
    pub fn baseline_rows(&self, ant1: usize, ant2: usize) -> &[VisRow] {
        self.rows
            .get(&(ant1, ant2))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Take all of the rows of a baseline out of the chunk.
    pub fn take_baseline_rows(&mut self, ant1: usize, ant2: usize) -> Vec<VisRow> {
        self.rows.remove(&(ant1, ant2)).unwrap_or_default()
    }

    pub fn num_baselines(&self) -> usize {
        self.rows.len()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.values().map(|v| v.len()).sum()
    }
}

/// A [`VisRead`] over visibilities that are already in memory.
pub struct MemoryVisReader {
    band: BandInfo,
    antennas: Vec<AntennaInfo>,
    timestamps: Vec<Epoch>,

    /// [timestep][baseline]
    rows: Vec<Vec<VisRow>>,
}

impl MemoryVisReader {
    /// Create a new reader. `rows` is indexed by timestep, and each timestep
    /// must contain one row per baseline (autos included). The timestamp of
    /// each timestep is taken from its first row.
    pub fn new(
        band: BandInfo,
        antennas: Vec<AntennaInfo>,
        rows: Vec<Vec<VisRow>>,
    ) -> Result<MemoryVisReader, VisReadError> {
        let num_baselines = num_baselines_with_autos(antennas.len());
        let mut timestamps = Vec::with_capacity(rows.len());
        for (timestep, timestep_rows) in rows.iter().enumerate() {
            if timestep_rows.len() != num_baselines {
                return Err(VisReadError::WrongNumRows {
                    timestep,
                    got: timestep_rows.len(),
                    expected: num_baselines,
                });
            }
            for row in timestep_rows {
                let reason = if row.ant1 > row.ant2 {
                    Some("ant1 is bigger than ant2")
                } else if row.ant2 >= antennas.len() {
                    Some("antenna index is out of range")
                } else if !row.is_consistent() {
                    Some("data, flags and weights have different lengths")
                } else if row.num_channels() != band.num_channels() {
                    Some("channel count doesn't match the band")
                } else {
                    None
                };
                if let Some(reason) = reason {
                    return Err(VisReadError::BadRow {
                        timestep,
                        ant1: row.ant1,
                        ant2: row.ant2,
                        reason,
                    });
                }
            }
            // A timestep with no baselines has no time; this can only happen
            // with no antennas.
            if let Some(first) = timestep_rows.first() {
                timestamps.push(first.time);
            }
        }

        Ok(MemoryVisReader {
            band,
            antennas,
            timestamps,
            rows,
        })
    }
}

impl VisRead for MemoryVisReader {
    fn band_info(&self) -> &BandInfo {
        &self.band
    }

    fn antennas(&self) -> &[AntennaInfo] {
        &self.antennas
    }

    fn timestamps(&self) -> &[Epoch] {
        &self.timestamps
    }

    fn read_chunk(&mut self, timesteps: Range<usize>) -> Result<VisChunk, VisReadError> {
        if timesteps.start > timesteps.end || timesteps.end > self.rows.len() {
            return Err(VisReadError::TimestepsOutOfRange {
                start: timesteps.start,
                end: timesteps.end,
                available: self.rows.len(),
            });
        }
        trace!("Reading timesteps {timesteps:?} from memory");

        let mut chunk = VisChunk::new(timesteps.clone());
        for timestep_rows in &self.rows[timesteps] {
            for row in timestep_rows {
                chunk.insert(row.clone());
            }
        }
        Ok(chunk)
    }
}
