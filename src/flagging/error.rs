// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with writing and reading mwaf flag files.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MwafWriteError {
    #[error("This node has been assigned no subbands; there's nothing to write flags for")]
    EmptyPartition,

    #[error("The node's subbands {start}..{end} go beyond the {num_subbands} subbands of the observation")]
    PartitionOutOfRange {
        start: usize,
        end: usize,
        num_subbands: usize,
    },

    #[error("The mwaf filename template '{template}' doesn't contain the '%%' placeholder")]
    NoPlaceholder { template: String },

    #[error("The subband-to-file map {map:?} is not a permutation of 0..{num_subbands}")]
    BadPermutation { map: Vec<usize>, num_subbands: usize },

    #[error("Got {got} HDU offsets, but there are {expected} subbands")]
    BadOffsets { expected: usize, got: usize },

    #[error("HDU offsets can't be changed after flag rows have been written")]
    OffsetsAfterRows,

    #[error("The {num_chans} channels given can't be split evenly over {num_subbands} subbands")]
    ChannelsNotDivisible { num_chans: usize, num_subbands: usize },

    #[error("The {what} changed after the mwaf headers were written")]
    MetadataChanged { what: &'static str },

    #[error("Tried to write flags before both band information and antennas were given")]
    HeadersNotWritten,

    #[error("Got {got} flags in a row, but {expected} channels were expected")]
    WrongNumChannels { got: usize, expected: usize },

    #[error("Flag row {row} is for baseline ({ant1}, {ant2}), but flag rows must be written in baseline order")]
    UnexpectedBaseline { row: u64, ant1: usize, ant2: usize },

    #[error("Tried to write row {row} to {file}, but row {last_row} was already written")]
    Misordered {
        file: PathBuf,
        row: i64,
        last_row: i64,
    },

    #[error(transparent)]
    Fitsio(#[from] fitsio::errors::Error),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum MwafReadError {
    #[error("{file}: unhandled mwaf version '{version}'")]
    UnhandledVersion { file: PathBuf, version: String },

    #[error("{file}: {what} is {value}, which can't be negative")]
    Negative {
        file: PathBuf,
        what: &'static str,
        value: i64,
    },

    #[error(transparent)]
    Fitsio(#[from] fitsio::errors::Error),
}
