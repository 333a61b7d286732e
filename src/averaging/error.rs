// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AveragingError {
    #[error("Tried to average a row before both band information and antennas were given")]
    NotInitialised,

    #[error("The band has {num_chans} channels, which is fewer than the frequency average factor {factor}")]
    TooFewChannels { num_chans: usize, factor: usize },

    #[error("UVWs can only be calculated for {num_tiles} tiles, but there are {num_antennas} antennas")]
    TooFewTiles {
        num_tiles: usize,
        num_antennas: usize,
    },

    #[error("Baseline ({ant1}, {ant2}) is not upper triangular; the first antenna must not be bigger than the second")]
    BadBaseline { ant1: usize, ant2: usize },

    #[error("Baseline ({ant1}, {ant2}) refers to an antenna beyond the {num_antennas} known antennas")]
    AntennaOutOfRange {
        ant1: usize,
        ant2: usize,
        num_antennas: usize,
    },

    #[error("Row for baseline ({ant1}, {ant2}) has {got} channels, but the band has {expected}")]
    ChannelMismatch {
        ant1: usize,
        ant2: usize,
        got: usize,
        expected: usize,
    },
}
