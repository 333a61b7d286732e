// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to handle passing visibilities through processing stages and writing
//! them out.

mod error;
pub use error::{VisSinkError, VisStageError};

use hifitime::{Duration, Epoch};
use log::trace;
use marlu::{Jones, XyzGeodetic, UVW};

use crate::constants::NUM_POLARISATIONS;

/// Details on a single fine channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelInfo {
    /// The centre frequency of the channel \[Hz\].
    pub freq_hz: f64,

    /// The width of the channel \[Hz\].
    pub width_hz: f64,

    /// The effective noise bandwidth of the channel \[Hz\].
    pub effective_bw_hz: f64,

    /// The spectral resolution of the channel \[Hz\].
    pub resolution_hz: f64,
}

impl ChannelInfo {
    /// A channel whose width, effective bandwidth and resolution are all the
    /// same.
    pub fn new(freq_hz: f64, width_hz: f64) -> ChannelInfo {
        ChannelInfo {
            freq_hz,
            width_hz,
            effective_bw_hz: width_hz,
            resolution_hz: width_hz,
        }
    }
}

/// The spectral window of the visibilities flowing through stages.
#[derive(Debug, Clone, PartialEq)]
pub struct BandInfo {
    pub name: String,

    /// Every channel in this band, in ascending row order.
    pub channels: Vec<ChannelInfo>,

    /// The reference frequency of the band (the frequency of the first
    /// channel) \[Hz\].
    pub ref_freq_hz: f64,

    /// The sum of all channel widths \[Hz\].
    pub total_bandwidth_hz: f64,

    pub flag_row: bool,
}

impl BandInfo {
    /// Create a new [`BandInfo`], deriving the reference frequency and total
    /// bandwidth from the channels.
    pub fn new(name: String, channels: Vec<ChannelInfo>) -> BandInfo {
        let ref_freq_hz = channels.first().map(|c| c.freq_hz).unwrap_or(0.0);
        let total_bandwidth_hz = channels.iter().map(|c| c.width_hz).sum();
        BandInfo {
            name,
            channels,
            ref_freq_hz,
            total_bandwidth_hz,
            flag_row: false,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }
}

/// An antenna (a.k.a. tile).
#[derive(Debug, Clone, PartialEq)]
pub struct AntennaInfo {
    pub name: String,

    /// The geodetic position of the antenna \[metres\].
    pub position: XyzGeodetic,
}

/// All of the visibilities of a single baseline at a single time.
#[derive(Debug, Clone)]
pub struct VisRow {
    /// The (centroid) time of this row.
    pub time: Epoch,

    /// The centroid of the data that went into this row.
    pub time_centroid: Epoch,

    pub ant1: usize,
    pub ant2: usize,

    pub uvw: UVW,

    /// The integration time of this row.
    pub interval: Duration,

    /// Visibilities ([channel]), one Jones matrix per channel.
    pub data: Vec<Jones<f32>>,

    /// Flags (1:1 with the visibilities), per polarisation.
    pub flags: Vec<[bool; NUM_POLARISATIONS]>,

    /// Weights (1:1 with the visibilities), per polarisation.
    pub weights: Vec<[f32; NUM_POLARISATIONS]>,
}

impl VisRow {
    /// Make a row of unflagged visibilities, all with weight 1.
    pub fn new(
        time: Epoch,
        interval: Duration,
        ant1: usize,
        ant2: usize,
        uvw: UVW,
        data: Vec<Jones<f32>>,
    ) -> VisRow {
        let num_chans = data.len();
        VisRow {
            time,
            time_centroid: time,
            ant1,
            ant2,
            uvw,
            interval,
            data,
            flags: vec![[false; NUM_POLARISATIONS]; num_chans],
            weights: vec![[1.0; NUM_POLARISATIONS]; num_chans],
        }
    }

    pub fn num_channels(&self) -> usize {
        self.data.len()
    }

    /// Do the data, flags and weights all have the same number of channels?
    pub fn is_consistent(&self) -> bool {
        self.flags.len() == self.data.len() && self.weights.len() == self.data.len()
    }
}

/// A processing stage that visibilities flow through before they're written
/// out. Stages are chained together in a [`StageChain`]; each one sees the
/// band information and antennas before any rows arrive, and may change the
/// band information seen by the stages after it.
///
/// Rows for a single baseline are always given to a stage in time order, but
/// rows for different baselines may arrive concurrently.
pub trait VisStage: Send + Sync {
    /// A name for this stage, used in log messages.
    fn name(&self) -> &'static str;

    /// Take the band information of the incoming visibilities and return the
    /// band information of the visibilities this stage produces.
    fn write_band_info(&mut self, band: BandInfo) -> Result<BandInfo, VisStageError>;

    fn write_antennas(&mut self, antennas: &[AntennaInfo]) -> Result<(), VisStageError>;

    /// Process a row of visibilities. A stage may absorb the row (returning
    /// `None`), e.g. while accumulating an average.
    fn write_row(&self, row: VisRow) -> Result<Option<VisRow>, VisStageError>;

    /// The end of the stream has been reached; return any rows that are still
    /// held by this stage.
    fn finish(&self) -> Result<Vec<VisRow>, VisStageError> {
        Ok(vec![])
    }
}

/// Something that takes the visibilities produced by a [`StageChain`]. Only the
/// orchestrating thread uses a sink.
pub trait VisSink {
    fn write_band_info(&mut self, band: &BandInfo) -> Result<(), VisSinkError>;

    fn write_antennas(&mut self, antennas: &[AntennaInfo]) -> Result<(), VisSinkError>;

    fn write_row(&mut self, row: &VisRow) -> Result<(), VisSinkError>;

    /// No more rows are coming.
    fn finish(&mut self) -> Result<(), VisSinkError>;
}

/// An ordered list of [`VisStage`]s. Band information and antennas are
/// forwarded to every stage in order; rows go through each stage in turn until
/// one absorbs them.
#[derive(Default)]
pub struct StageChain {
    stages: Vec<Box<dyn VisStage>>,
}

impl StageChain {
    pub fn new() -> StageChain {
        StageChain::default()
    }

    /// Append a stage to the end of the chain.
    pub fn with_stage<S: VisStage + 'static>(mut self, stage: S) -> StageChain {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn push(&mut self, stage: Box<dyn VisStage>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The names of the stages, in order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Give the band information to every stage in order. The returned band
    /// information is what comes out the end of the chain.
    pub fn write_band_info(&mut self, band: BandInfo) -> Result<BandInfo, VisStageError> {
        self.stages.iter_mut().try_fold(band, |band, stage| {
            trace!("Giving band info to stage '{}'", stage.name());
            stage.write_band_info(band)
        })
    }

    pub fn write_antennas(&mut self, antennas: &[AntennaInfo]) -> Result<(), VisStageError> {
        for stage in self.stages.iter_mut() {
            stage.write_antennas(antennas)?;
        }
        Ok(())
    }

    /// Pass a row through all of the stages.
    pub fn process_row(&self, row: VisRow) -> Result<Option<VisRow>, VisStageError> {
        Self::process_from(&self.stages, row)
    }

    fn process_from(
        stages: &[Box<dyn VisStage>],
        row: VisRow,
    ) -> Result<Option<VisRow>, VisStageError> {
        let mut row = Some(row);
        for stage in stages {
            row = match row {
                Some(r) => stage.write_row(r)?,
                None => break,
            };
        }
        Ok(row)
    }

    /// Finish all of the stages in order. Rows released by a stage are passed
    /// through all of the stages after it.
    pub fn finish_rows(&self) -> Result<Vec<VisRow>, VisStageError> {
        let mut out = vec![];
        for (i_stage, stage) in self.stages.iter().enumerate() {
            let downstream = &self.stages[i_stage + 1..];
            for row in stage.finish()? {
                if let Some(row) = Self::process_from(downstream, row)? {
                    out.push(row);
                }
            }
        }
        Ok(out)
    }
}

/// A [`VisSink`] that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub band: Option<BandInfo>,
    pub antennas: Vec<AntennaInfo>,
    pub rows: Vec<VisRow>,
    pub finished: bool,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }
}

impl VisSink for MemorySink {
    fn write_band_info(&mut self, band: &BandInfo) -> Result<(), VisSinkError> {
        if self.finished {
            return Err(VisSinkError::AlreadyFinished);
        }
        self.band = Some(band.clone());
        Ok(())
    }

    fn write_antennas(&mut self, antennas: &[AntennaInfo]) -> Result<(), VisSinkError> {
        if self.finished {
            return Err(VisSinkError::AlreadyFinished);
        }
        self.antennas = antennas.to_vec();
        Ok(())
    }

    fn write_row(&mut self, row: &VisRow) -> Result<(), VisSinkError> {
        if self.finished {
            return Err(VisSinkError::AlreadyFinished);
        }
        let band = self.band.as_ref().ok_or(VisSinkError::NoBandInfo)?;
        if row.num_channels() != band.num_channels() {
            return Err(VisSinkError::ChannelMismatch {
                ant1: row.ant1,
                ant2: row.ant2,
                got: row.num_channels(),
                expected: band.num_channels(),
            });
        }
        self.rows.push(row.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), VisSinkError> {
        self.finished = true;
        Ok(())
    }
}
