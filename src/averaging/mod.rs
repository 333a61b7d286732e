// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A visibility stage that averages visibilities in time and frequency.
//!
//! Only unflagged samples contribute to an average. An averaged sample with no
//! unflagged contributions is flagged, and its visibility is zero.

mod error;

pub use error::AveragingError;

use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex},
};

use hifitime::Duration;
use log::{debug, warn};
use marlu::{c64, Jones};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::{
    constants::NUM_POLARISATIONS,
    coord::UvwCalculator,
    io::write::{AntennaInfo, BandInfo, ChannelInfo, VisRow, VisStage, VisStageError},
    math::{average_gps_seconds, baseline_index, baseline_pairs},
};

/// What to do with averaging windows that haven't received all of their rows
/// when the stream ends.
#[derive(
    Debug,
    Display,
    EnumIter,
    EnumString,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PartialWindowPolicy {
    /// Partial windows are thrown away (with a warning).
    #[default]
    #[strum(serialize = "discard")]
    Discard,

    /// Partial windows are averaged over the rows that they did receive.
    #[strum(serialize = "flush")]
    Flush,
}

/// The sums of a single baseline's visibilities as they're averaged.
#[derive(Debug, Clone)]
pub struct AveragingBuffer {
    ant1: usize,
    ant2: usize,

    /// The sums of unflagged visibilities ([output channel][polarisation]).
    data_sum: Vec<[c64; NUM_POLARISATIONS]>,

    /// The summed weights ([output channel][polarisation]). Each unflagged
    /// sample adds 1.
    weight_sum: Vec<[f32; NUM_POLARISATIONS]>,

    /// The number of unflagged samples ([output channel][polarisation]).
    counts: Vec<[u32; NUM_POLARISATIONS]>,

    /// The sum of all row times as GPS seconds.
    time_sum: f64,
    centroid_sum: f64,
    interval_sum: Duration,
    num_rows: usize,
}

impl AveragingBuffer {
    fn new(ant1: usize, ant2: usize, num_out_chans: usize) -> AveragingBuffer {
        AveragingBuffer {
            ant1,
            ant2,
            data_sum: vec![[c64::default(); NUM_POLARISATIONS]; num_out_chans],
            weight_sum: vec![[0.0; NUM_POLARISATIONS]; num_out_chans],
            counts: vec![[0; NUM_POLARISATIONS]; num_out_chans],
            time_sum: 0.0,
            centroid_sum: 0.0,
            interval_sum: Duration::from_seconds(0.0),
            num_rows: 0,
        }
    }

    /// The number of rows accumulated since the last flush.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    fn accumulate(&mut self, row: &VisRow, freq_factor: usize) {
        for (i_out, ((data_sum, weight_sum), counts)) in self
            .data_sum
            .iter_mut()
            .zip(self.weight_sum.iter_mut())
            .zip(self.counts.iter_mut())
            .enumerate()
        {
            let chans = i_out * freq_factor..(i_out + 1) * freq_factor;
            for (vis, flags) in row.data[chans.clone()].iter().zip(&row.flags[chans]) {
                for i_pol in 0..NUM_POLARISATIONS {
                    if flags[i_pol] {
                        continue;
                    }
                    let v = vis[i_pol];
                    data_sum[i_pol] += c64::new(v.re as f64, v.im as f64);
                    weight_sum[i_pol] += 1.0;
                    counts[i_pol] += 1;
                }
            }
        }

        self.time_sum += row.time.to_gpst_seconds();
        self.centroid_sum += row.time_centroid.to_gpst_seconds();
        self.interval_sum += row.interval;
        self.num_rows += 1;
    }

    /// Turn the sums into an averaged row, then reset. Returns `None` if there
    /// was nothing in the buffer.
    fn flush(&mut self, uvw_calc: &dyn UvwCalculator) -> Option<VisRow> {
        let time = average_gps_seconds(self.time_sum, self.num_rows)?;
        let time_centroid = average_gps_seconds(self.centroid_sum, self.num_rows)?;

        let num_out_chans = self.data_sum.len();
        let mut data = Vec::with_capacity(num_out_chans);
        let mut flags = Vec::with_capacity(num_out_chans);
        for (data_sum, counts) in self.data_sum.iter().zip(self.counts.iter()) {
            let mut jones = [c64::default(); NUM_POLARISATIONS];
            let mut chan_flags = [false; NUM_POLARISATIONS];
            for i_pol in 0..NUM_POLARISATIONS {
                // Cells with no contributions stay zero.
                if counts[i_pol] == 0 {
                    chan_flags[i_pol] = true;
                } else {
                    jones[i_pol] = data_sum[i_pol] / counts[i_pol] as f64;
                }
            }
            data.push(Jones::<f32>::from(Jones::<f64>::from(jones)));
            flags.push(chan_flags);
        }

        let row = VisRow {
            time,
            time_centroid,
            ant1: self.ant1,
            ant2: self.ant2,
            uvw: uvw_calc.calculate_uvw(time, self.ant1, self.ant2),
            interval: self.interval_sum,
            data,
            flags,
            weights: self.weight_sum.clone(),
        };
        self.reset();
        Some(row)
    }

    fn reset(&mut self) {
        self.data_sum
            .iter_mut()
            .for_each(|d| *d = [c64::default(); NUM_POLARISATIONS]);
        self.weight_sum
            .iter_mut()
            .for_each(|w| *w = [0.0; NUM_POLARISATIONS]);
        self.counts
            .iter_mut()
            .for_each(|c| *c = [0; NUM_POLARISATIONS]);
        self.time_sum = 0.0;
        self.centroid_sum = 0.0;
        self.interval_sum = Duration::from_seconds(0.0);
        self.num_rows = 0;
    }
}

/// Averages visibilities in time and frequency. Every baseline has its own
/// [`AveragingBuffer`], which is flushed once `time_factor` rows have been
/// given to it.
pub struct AveragingStage {
    time_factor: NonZeroUsize,
    freq_factor: NonZeroUsize,
    uvw_calc: Arc<dyn UvwCalculator>,
    policy: PartialWindowPolicy,

    num_in_chans: Option<usize>,
    num_antennas: Option<usize>,

    /// One buffer per baseline, indexed by [`baseline_index`]. Only allocated
    /// once both band information and antennas are known.
    buffers: Vec<Mutex<AveragingBuffer>>,

    /// The number of trailing channels that don't fill a frequency average.
    num_dropped_chans: usize,
}

impl AveragingStage {
    pub fn new(
        time_factor: NonZeroUsize,
        freq_factor: NonZeroUsize,
        uvw_calc: Arc<dyn UvwCalculator>,
        policy: PartialWindowPolicy,
    ) -> AveragingStage {
        AveragingStage {
            time_factor,
            freq_factor,
            uvw_calc,
            policy,
            num_in_chans: None,
            num_antennas: None,
            buffers: vec![],
            num_dropped_chans: 0,
        }
    }

    pub fn time_factor(&self) -> NonZeroUsize {
        self.time_factor
    }

    pub fn freq_factor(&self) -> NonZeroUsize {
        self.freq_factor
    }

    pub fn policy(&self) -> PartialWindowPolicy {
        self.policy
    }

    /// The number of trailing input channels that are dropped because they
    /// can't fill a whole frequency average.
    pub fn num_dropped_channels(&self) -> usize {
        self.num_dropped_chans
    }

    fn num_out_chans(&self) -> Option<usize> {
        self.num_in_chans.map(|n| n / self.freq_factor.get())
    }

    /// (Re)allocate the buffers if everything needed is known.
    fn allocate(&mut self) {
        if let (Some(num_out_chans), Some(num_antennas)) = (self.num_out_chans(), self.num_antennas) {
            self.buffers = baseline_pairs(num_antennas)
                .map(|(ant1, ant2)| Mutex::new(AveragingBuffer::new(ant1, ant2, num_out_chans)))
                .collect();
            debug!(
                "Allocated {} averaging buffers with {num_out_chans} channels each",
                self.buffers.len()
            );
        }
    }

    fn check_row(&self, row: &VisRow) -> Result<usize, AveragingError> {
        let (num_in_chans, num_antennas) = match (self.num_in_chans, self.num_antennas) {
            (Some(c), Some(a)) => (c, a),
            _ => return Err(AveragingError::NotInitialised),
        };
        if row.ant1 > row.ant2 {
            return Err(AveragingError::BadBaseline {
                ant1: row.ant1,
                ant2: row.ant2,
            });
        }
        if row.ant2 >= num_antennas {
            return Err(AveragingError::AntennaOutOfRange {
                ant1: row.ant1,
                ant2: row.ant2,
                num_antennas,
            });
        }
        if row.num_channels() != num_in_chans || !row.is_consistent() {
            return Err(AveragingError::ChannelMismatch {
                ant1: row.ant1,
                ant2: row.ant2,
                got: row.num_channels(),
                expected: num_in_chans,
            });
        }
        Ok(baseline_index(row.ant1, row.ant2, num_antennas))
    }
}

impl VisStage for AveragingStage {
    fn name(&self) -> &'static str {
        "averaging"
    }

    fn write_band_info(&mut self, band: BandInfo) -> Result<BandInfo, VisStageError> {
        let freq_factor = self.freq_factor.get();
        let num_in_chans = band.num_channels();
        if num_in_chans < freq_factor {
            return Err(AveragingError::TooFewChannels {
                num_chans: num_in_chans,
                factor: freq_factor,
            }
            .into());
        }

        self.num_dropped_chans = num_in_chans % freq_factor;
        if self.num_dropped_chans != 0 {
            warn!(
                "The frequency average factor {freq_factor} doesn't divide the {num_in_chans} channels evenly; the last {} channels are dropped",
                self.num_dropped_chans
            );
        }

        // Each output channel's details are the mean of its input channels.
        let channels = band
            .channels
            .chunks_exact(freq_factor)
            .map(|group| {
                let n = group.len() as f64;
                ChannelInfo {
                    freq_hz: group.iter().map(|c| c.freq_hz).sum::<f64>() / n,
                    width_hz: group.iter().map(|c| c.width_hz).sum::<f64>() / n,
                    effective_bw_hz: group.iter().map(|c| c.effective_bw_hz).sum::<f64>() / n,
                    resolution_hz: group.iter().map(|c| c.resolution_hz).sum::<f64>() / n,
                }
            })
            .collect::<Vec<_>>();
        debug!(
            "Averaging {num_in_chans} channels into {} channels and every {} rows into 1",
            channels.len(),
            self.time_factor
        );

        self.num_in_chans = Some(num_in_chans);
        self.allocate();

        // The band as a whole is unchanged by averaging.
        Ok(BandInfo {
            name: band.name,
            channels,
            ref_freq_hz: band.ref_freq_hz,
            total_bandwidth_hz: band.total_bandwidth_hz,
            flag_row: band.flag_row,
        })
    }

    fn write_antennas(&mut self, antennas: &[AntennaInfo]) -> Result<(), VisStageError> {
        let num_tiles = self.uvw_calc.num_tiles();
        if num_tiles < antennas.len() {
            return Err(AveragingError::TooFewTiles {
                num_tiles,
                num_antennas: antennas.len(),
            }
            .into());
        }
        self.num_antennas = Some(antennas.len());
        self.allocate();
        Ok(())
    }

    fn write_row(&self, row: VisRow) -> Result<Option<VisRow>, VisStageError> {
        let i_baseline = self.check_row(&row)?;
        // A baseline's rows are only ever given to one worker, and rows are
        // checked before anything touches the buffer, so its lock can't be
        // poisoned.
        let mut buffer = self.buffers[i_baseline].lock().unwrap();
        buffer.accumulate(&row, self.freq_factor.get());
        if buffer.num_rows() == self.time_factor.get() {
            Ok(buffer.flush(self.uvw_calc.as_ref()))
        } else {
            Ok(None)
        }
    }

    fn finish(&self) -> Result<Vec<VisRow>, VisStageError> {
        let mut rows = vec![];
        let mut num_partial = 0;
        for buffer in &self.buffers {
            // All workers have been joined by now.
            let mut buffer = buffer.lock().unwrap();
            if buffer.num_rows() == 0 {
                continue;
            }
            num_partial += 1;
            match self.policy {
                PartialWindowPolicy::Discard => buffer.reset(),
                PartialWindowPolicy::Flush => rows.extend(buffer.flush(self.uvw_calc.as_ref())),
            }
        }

        if num_partial > 0 {
            match self.policy {
                PartialWindowPolicy::Discard => warn!(
                    "Discarded {num_partial} averaging windows that had fewer than {} rows",
                    self.time_factor
                ),
                PartialWindowPolicy::Flush => debug!(
                    "Flushed {num_partial} averaging windows that had fewer than {} rows",
                    self.time_factor
                ),
            }
        }
        Ok(rows)
    }
}
