// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors from writing visibilities through stages and into sinks.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisStageError {
    #[error(transparent)]
    SolutionsApply(#[from] crate::solutions::SolutionsApplyError),

    #[error(transparent)]
    Averaging(#[from] crate::averaging::AveragingError),
}

#[derive(Error, Debug)]
pub enum VisSinkError {
    #[error("Tried to write a visibility row before any band information was given to the sink")]
    NoBandInfo,

    #[error("Visibility row for baseline ({ant1}, {ant2}) has {got} channels, but the band has {expected}")]
    ChannelMismatch {
        ant1: usize,
        ant2: usize,
        got: usize,
        expected: usize,
    },

    #[error("Tried to write to a visibility sink that has already been finished")]
    AlreadyFinished,

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
