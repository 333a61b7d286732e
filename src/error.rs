// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all preprocessing-related errors.

use thiserror::Error;

use crate::{
    averaging::AveragingError,
    flagging::{MwafReadError, MwafWriteError},
    io::{
        read::VisReadError,
        write::{VisSinkError, VisStageError},
    },
    params::{partition::PartitionError, ArgsFileError, ParamsError, PreprocessError},
    solutions::{SolutionsApplyError, SolutionsReadError, SolutionsWriteError},
};

/// The top-level error type. Anything that can go wrong while preprocessing
/// can be converted into one of these.
#[derive(Error, Debug)]
pub enum PreprocessorError {
    #[error("{0}")]
    ArgsFile(#[from] ArgsFileError),

    #[error("{0}")]
    Params(#[from] ParamsError),

    #[error("{0}")]
    Partition(#[from] PartitionError),

    #[error("{0}")]
    SolutionsRead(#[from] SolutionsReadError),

    #[error("{0}")]
    SolutionsWrite(#[from] SolutionsWriteError),

    #[error("{0}")]
    SolutionsApply(#[from] SolutionsApplyError),

    #[error("{0}")]
    Averaging(#[from] AveragingError),

    #[error("{0}")]
    MwafWrite(#[from] MwafWriteError),

    #[error("{0}")]
    MwafRead(#[from] MwafReadError),

    #[error("{0}")]
    VisRead(#[from] VisReadError),

    #[error("{0}")]
    VisStage(#[from] VisStageError),

    #[error("{0}")]
    VisSink(#[from] VisSinkError),

    #[error("{0}")]
    Preprocess(#[from] PreprocessError),
}
