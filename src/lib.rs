// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Preprocessing of Murchison Widefield Array (MWA) correlator output.

Visibilities flow through a chain of stages (calibration solution
application, then time/frequency averaging) into a visibility sink, while
their flags are written into one mwaf file per coarse channel. The work is
split over nodes by coarse channel, over threads by baseline and over time in
memory-bounded chunks.
 */

pub mod averaging;
pub mod constants;
pub mod coord;
mod error;
pub mod flagging;
pub mod io;
pub(crate) mod math;
pub(crate) mod misc;
pub mod params;
pub mod solutions;

// Re-exports.
pub use averaging::{AveragingStage, PartialWindowPolicy};
pub use coord::{ArrayUvwCalculator, UvwCalculator};
pub use error::PreprocessorError;
pub use flagging::{
    read_mwaf, reduce_polarisations, FlagWriter, MwafFile, MwafReadError, MwafWriteError,
};
pub use io::{
    read::{MemoryVisReader, VisChunk, VisRead, VisReadError},
    write::{
        AntennaInfo, BandInfo, ChannelInfo, MemorySink, StageChain, VisRow, VisSink, VisStage,
    },
};
pub use math::{baseline_index, baseline_pairs, num_baselines_with_autos};
pub use misc::setup_logging;
pub use params::{
    partition::{ChunkPlan, NodePartition},
    preprocess::{run_preprocess, PreprocessSummary},
    ArgsFileError, ParamsError, PreprocessArgs, PreprocessError, PreprocessParams,
};
pub use solutions::{
    apply::ApplySolutionsStage, AoSolutionsFile, CalibrationSolutions, SolutionStore,
};

// External re-exports.
pub use marlu::{c32, c64, Jones, RADec, XyzGeodetic, UVW};
