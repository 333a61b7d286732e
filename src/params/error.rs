// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with preprocessing arguments and parameters.

use thiserror::Error;

use super::{partition::PartitionError, ARG_FILE_TYPES_COMMA_SEPARATED};

#[derive(Error, Debug)]
pub enum ArgsFileError {
    #[error("Argument file '{0}' doesn't have a recognised file extension! Valid extensions are: {}", *ARG_FILE_TYPES_COMMA_SEPARATED)]
    UnrecognisedArgFileExt(String),

    #[error("Couldn't decode toml structure from {file}:\n{err}")]
    TomlDecode { file: String, err: String },

    #[error("Couldn't decode json structure from {file}:\n{err}")]
    JsonDecode { file: String, err: String },

    #[error("IO error when trying to read argument file: {0}")]
    IO(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ParamsError {
    #[error("The time averaging factor cannot be 0")]
    TimeFactorZero,

    #[error("The frequency averaging factor cannot be 0")]
    FreqFactorZero,

    #[error("The number of threads cannot be 0")]
    NumThreadsZero,

    #[error("The maximum buffer size cannot be 0 bytes")]
    MaxBufferSizeZero,

    #[error("The number of subbands cannot be 0")]
    NumSubbandsZero,

    #[error("The flag filename template '{0}' doesn't contain the '%%' placeholder")]
    NoFlagPlaceholder(String),

    #[error("Got {got} HDU offsets, but there are {expected} subbands")]
    BadHduOffsets { expected: usize, got: usize },

    #[error("Got a subband-to-file map with {got} entries, but there are {expected} subbands")]
    BadSubbandMap { expected: usize, got: usize },

    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error(transparent)]
    SolutionsApply(#[from] crate::solutions::SolutionsApplyError),
}
