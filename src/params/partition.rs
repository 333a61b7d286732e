// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Splitting work over nodes (by subband) and over time (by memory).

use std::ops::Range;

use log::{debug, warn};
use thiserror::Error;

use crate::constants::NUM_POLARISATIONS;

/// The subbands assigned to a single node of a multi-node run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePartition {
    pub rank: usize,
    pub num_nodes: usize,

    /// The subbands that this node is responsible for.
    pub subbands: Range<usize>,
}

impl NodePartition {
    /// Split `range` as evenly as possible over `num_nodes` nodes and get the
    /// part of node `rank`.
    pub fn new(
        rank: usize,
        num_nodes: usize,
        range: Range<usize>,
    ) -> Result<NodePartition, PartitionError> {
        if num_nodes == 0 {
            return Err(PartitionError::NoNodes);
        }
        if rank >= num_nodes {
            return Err(PartitionError::RankTooBig { rank, num_nodes });
        }

        let len = range.len();
        let start = len * rank / num_nodes + range.start;
        let end = len * (rank + 1) / num_nodes + range.start;
        debug!("Node {rank} of {num_nodes} gets subbands {start}..{end}");
        Ok(NodePartition {
            rank,
            num_nodes,
            subbands: start..end,
        })
    }

    /// A single node that gets all of the subbands.
    pub fn single(num_subbands: usize) -> NodePartition {
        NodePartition {
            rank: 0,
            num_nodes: 1,
            subbands: 0..num_subbands,
        }
    }

    pub fn num_subbands(&self) -> usize {
        self.subbands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subbands.is_empty()
    }

    /// The number of channels in each of this node's subbands, if the node's
    /// `num_channels` split evenly over them.
    pub fn channels_per_subband(&self, num_channels: usize) -> Option<usize> {
        let num_subbands = self.num_subbands();
        if num_subbands == 0 || num_channels % num_subbands != 0 {
            None
        } else {
            Some(num_channels / num_subbands)
        }
    }
}

/// How the timesteps of an observation are read in chunks, so that no more
/// than a maximum amount of memory is used for visibilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    pub timesteps_per_chunk: usize,

    /// The timesteps of each chunk. Together they cover every timestep
    /// exactly once, in order.
    pub chunks: Vec<Range<usize>>,
}

impl ChunkPlan {
    /// The number of bytes needed for a single timestep of visibilities,
    /// flags and weights.
    pub fn bytes_per_timestep(num_baselines: usize, num_channels: usize) -> usize {
        num_baselines
            * num_channels
            * NUM_POLARISATIONS
            * (std::mem::size_of::<marlu::c32>()
                + std::mem::size_of::<f32>()
                + std::mem::size_of::<bool>())
    }

    pub fn new(num_timesteps: usize, bytes_per_timestep: usize, max_buffer_size: usize) -> ChunkPlan {
        let mut timesteps_per_chunk = max_buffer_size.checked_div(bytes_per_timestep).unwrap_or(num_timesteps);
        if timesteps_per_chunk == 0 {
            warn!(
                "A single timestep needs {bytes_per_timestep} bytes, more than the maximum buffer size of {max_buffer_size} bytes; more memory than requested will be used"
            );
            timesteps_per_chunk = 1;
        }

        let chunks = if num_timesteps == 0 {
            vec![]
        } else {
            // Spread the timesteps evenly over the chunks.
            let num_chunks = num_timesteps.div_ceil(timesteps_per_chunk);
            (0..num_chunks)
                .map(|i| num_timesteps * i / num_chunks..num_timesteps * (i + 1) / num_chunks)
                .collect()
        };
        debug!(
            "{num_timesteps} timesteps will be processed in {} chunks (at most {timesteps_per_chunk} timesteps per chunk)",
            chunks.len()
        );

        ChunkPlan {
            timesteps_per_chunk,
            chunks,
        }
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }
}

#[derive(Error, Debug)]
pub enum PartitionError {
    #[error("The number of nodes must be at least 1")]
    NoNodes,

    #[error("Node rank {rank} is not less than the number of nodes ({num_nodes})")]
    RankTooBig { rank: usize, num_nodes: usize },
}
