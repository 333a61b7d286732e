// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Preprocessing arguments and parameters.
//!
//! [`PreprocessArgs`] are unparsed and user-facing; every field is optional,
//! and they may be read from a toml or json file. Parsing them gives
//! [`PreprocessParams`], which are ready to be used directly.

mod error;
pub mod partition;
pub mod preprocess;

pub use error::{ArgsFileError, ParamsError};
pub use preprocess::PreprocessError;

use std::{
    fs::File,
    io::Read,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use itertools::Itertools;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::{
    averaging::{AveragingStage, PartialWindowPolicy},
    constants::{DEFAULT_MAX_BUFFER_SIZE, DEFAULT_NUM_SUBBANDS, FLAG_FILENAME_PLACEHOLDER},
    coord::UvwCalculator,
    flagging::{FlagWriter, MwafWriteError},
    io::write::StageChain,
    solutions::apply::ApplySolutionsStage,
};
use partition::NodePartition;

#[derive(Debug, Display, EnumIter, EnumString)]
enum ArgFileTypes {
    #[strum(serialize = "toml")]
    Toml,
    #[strum(serialize = "json")]
    Json,
}

lazy_static::lazy_static! {
    static ref ARG_FILE_TYPES_COMMA_SEPARATED: String = ArgFileTypes::iter().join(", ");
}

/// Arguments for preprocessing. Anything not given gets a default when parsed.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessArgs {
    /// Path to calibration solutions to apply. If not given, no solutions are
    /// applied.
    pub solutions: Option<PathBuf>,

    /// The number of timesteps to average together. Default: 1.
    pub time_average_factor: Option<usize>,

    /// The number of channels to average together. Default: 1.
    pub freq_average_factor: Option<usize>,

    /// What to do with averaging windows that are incomplete at the end of the
    /// observation. Default: discard.
    pub partial_window_policy: Option<PartialWindowPolicy>,

    /// The number of worker threads. Default: the available parallelism.
    pub num_threads: Option<usize>,

    /// The maximum number of bytes of visibilities held at once. Default: 4
    /// GiB.
    pub max_buffer_size: Option<usize>,

    /// The (zero-indexed) rank of this node. Default: 0.
    pub node_rank: Option<usize>,

    /// The number of nodes that the subbands are split over. Default: 1.
    pub num_nodes: Option<usize>,

    /// The number of subbands (coarse channels) in the observation. Default:
    /// 24.
    pub num_subbands: Option<usize>,

    /// The filename template of mwaf files, e.g. "flags_%%.mwaf". If not
    /// given, no flags are written.
    pub flag_template: Option<String>,

    /// The HDU offset [timesteps] of each subband's source file.
    pub hdu_offsets: Option<Vec<i32>>,

    /// The source file index of each subband. Default: the identity.
    pub subband_to_file_index: Option<Vec<usize>>,

    pub no_progress_bars: bool,
}

impl PreprocessArgs {
    /// Read arguments from a toml or json file.
    pub fn from_file<P: AsRef<Path>>(arg_file: P) -> Result<PreprocessArgs, ArgsFileError> {
        fn inner(arg_file: &Path) -> Result<PreprocessArgs, ArgsFileError> {
            debug!(
                "Attempting to parse argument file {} ...",
                arg_file.display()
            );

            let mut contents = String::new();
            let arg_file_type = arg_file
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .and_then(|e| ArgFileTypes::from_str(&e).ok());
            match arg_file_type {
                Some(ArgFileTypes::Toml) => {
                    debug!("Parsing toml file...");
                    let mut fh = File::open(arg_file)?;
                    fh.read_to_string(&mut contents)?;
                    toml::from_str(&contents).map_err(|e| ArgsFileError::TomlDecode {
                        file: arg_file.display().to_string(),
                        err: e.to_string(),
                    })
                }

                Some(ArgFileTypes::Json) => {
                    debug!("Parsing json file...");
                    let mut fh = File::open(arg_file)?;
                    fh.read_to_string(&mut contents)?;
                    serde_json::from_str(&contents).map_err(|e| ArgsFileError::JsonDecode {
                        file: arg_file.display().to_string(),
                        err: e.to_string(),
                    })
                }

                None => Err(ArgsFileError::UnrecognisedArgFileExt(
                    arg_file.display().to_string(),
                )),
            }
        }
        inner(arg_file.as_ref())
    }

    /// Merge two sets of arguments, preferring the arguments of `self`.
    pub fn merge(self, other: PreprocessArgs) -> PreprocessArgs {
        // Ensure all of the other args are accounted for by pattern matching.
        let PreprocessArgs {
            solutions,
            time_average_factor,
            freq_average_factor,
            partial_window_policy,
            num_threads,
            max_buffer_size,
            node_rank,
            num_nodes,
            num_subbands,
            flag_template,
            hdu_offsets,
            subband_to_file_index,
            no_progress_bars,
        } = other;
        PreprocessArgs {
            solutions: self.solutions.or(solutions),
            time_average_factor: self.time_average_factor.or(time_average_factor),
            freq_average_factor: self.freq_average_factor.or(freq_average_factor),
            partial_window_policy: self.partial_window_policy.or(partial_window_policy),
            num_threads: self.num_threads.or(num_threads),
            max_buffer_size: self.max_buffer_size.or(max_buffer_size),
            node_rank: self.node_rank.or(node_rank),
            num_nodes: self.num_nodes.or(num_nodes),
            num_subbands: self.num_subbands.or(num_subbands),
            flag_template: self.flag_template.or(flag_template),
            hdu_offsets: self.hdu_offsets.or(hdu_offsets),
            subband_to_file_index: self.subband_to_file_index.or(subband_to_file_index),
            no_progress_bars: self.no_progress_bars || no_progress_bars,
        }
    }

    pub fn parse(self) -> Result<PreprocessParams, ParamsError> {
        let PreprocessArgs {
            solutions,
            time_average_factor,
            freq_average_factor,
            partial_window_policy,
            num_threads,
            max_buffer_size,
            node_rank,
            num_nodes,
            num_subbands,
            flag_template,
            hdu_offsets,
            subband_to_file_index,
            no_progress_bars,
        } = self;

        let time_average_factor = NonZeroUsize::new(time_average_factor.unwrap_or(1))
            .ok_or(ParamsError::TimeFactorZero)?;
        let freq_average_factor = NonZeroUsize::new(freq_average_factor.unwrap_or(1))
            .ok_or(ParamsError::FreqFactorZero)?;
        let num_threads = match num_threads {
            Some(n) => NonZeroUsize::new(n).ok_or(ParamsError::NumThreadsZero)?,
            None => std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
        };
        let max_buffer_size = match max_buffer_size.unwrap_or(DEFAULT_MAX_BUFFER_SIZE) {
            0 => return Err(ParamsError::MaxBufferSizeZero),
            n => n,
        };
        let num_subbands = match num_subbands.unwrap_or(DEFAULT_NUM_SUBBANDS) {
            0 => return Err(ParamsError::NumSubbandsZero),
            n => n,
        };
        let partition = NodePartition::new(
            node_rank.unwrap_or(0),
            num_nodes.unwrap_or(1),
            0..num_subbands,
        )?;

        if let Some(template) = flag_template.as_ref() {
            if !template.contains(FLAG_FILENAME_PLACEHOLDER) {
                return Err(ParamsError::NoFlagPlaceholder(template.clone()));
            }
        } else if hdu_offsets.is_some() || subband_to_file_index.is_some() {
            warn!("HDU offsets or a subband-to-file map were given, but no flags are being written");
        }
        if let Some(offsets) = hdu_offsets.as_ref() {
            if offsets.len() != num_subbands {
                return Err(ParamsError::BadHduOffsets {
                    expected: num_subbands,
                    got: offsets.len(),
                });
            }
        }
        if let Some(map) = subband_to_file_index.as_ref() {
            if map.len() != num_subbands {
                return Err(ParamsError::BadSubbandMap {
                    expected: num_subbands,
                    got: map.len(),
                });
            }
        }

        Ok(PreprocessParams {
            solutions_file: solutions,
            time_average_factor,
            freq_average_factor,
            partial_window_policy: partial_window_policy.unwrap_or_default(),
            num_threads,
            max_buffer_size,
            num_subbands,
            partition,
            flag_template,
            hdu_offsets,
            subband_to_file_index,
            progress_bars: !no_progress_bars,
        })
    }
}

/// Parameters for preprocessing, ready to be used.
#[derive(Debug, Clone)]
pub struct PreprocessParams {
    pub solutions_file: Option<PathBuf>,
    pub time_average_factor: NonZeroUsize,
    pub freq_average_factor: NonZeroUsize,
    pub partial_window_policy: PartialWindowPolicy,
    pub num_threads: NonZeroUsize,

    /// \[bytes\]
    pub max_buffer_size: usize,

    pub num_subbands: usize,

    /// The subbands that this node handles.
    pub partition: NodePartition,

    pub flag_template: Option<String>,
    pub hdu_offsets: Option<Vec<i32>>,
    pub subband_to_file_index: Option<Vec<usize>>,

    /// Progress bars are only drawn if this is true and stdout is a terminal.
    pub progress_bars: bool,
}

impl PreprocessParams {
    /// Build the visibility stages: calibration solutions are applied first
    /// (if there are any), then visibilities are averaged (if either factor is
    /// more than 1).
    pub fn build_chain(&self, uvw_calc: Arc<dyn UvwCalculator>) -> Result<StageChain, ParamsError> {
        let mut chain = StageChain::new();
        if let Some(file) = self.solutions_file.as_ref() {
            debug!("Applying calibration solutions from {}", file.display());
            chain.push(Box::new(ApplySolutionsStage::from_file(file)?));
        }
        if self.time_average_factor.get() > 1 || self.freq_average_factor.get() > 1 {
            debug!(
                "Averaging {} timesteps and {} channels together",
                self.time_average_factor, self.freq_average_factor
            );
            chain.push(Box::new(AveragingStage::new(
                self.time_average_factor,
                self.freq_average_factor,
                uvw_calc,
                self.partial_window_policy,
            )));
        }
        Ok(chain)
    }

    /// Create the flag writer for this node's subbands, if a flag template was
    /// given.
    pub fn create_flag_writer(
        &self,
        gps_time: u32,
        num_timesteps: usize,
    ) -> Result<Option<FlagWriter>, MwafWriteError> {
        let template = match self.flag_template.as_ref() {
            Some(t) => t,
            None => return Ok(None),
        };
        let mut writer = FlagWriter::new(
            template,
            gps_time,
            num_timesteps,
            self.num_subbands,
            &self.partition,
            self.subband_to_file_index.clone(),
        )?;
        if let Some(offsets) = self.hdu_offsets.clone() {
            writer.set_hdu_offsets(offsets)?;
        }
        Ok(Some(writer))
    }
}
