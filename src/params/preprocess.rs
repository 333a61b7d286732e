// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Running visibilities through the stages, into a sink and flag files.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    thread::{self, ScopedJoinHandle},
};

use crossbeam_channel::{bounded, unbounded};
use crossbeam_utils::atomic::AtomicCell;
use indicatif::ProgressBar;
use log::{debug, info, warn};
use scopeguard::defer_on_unwind;
use thiserror::Error;

use super::{partition::ChunkPlan, PreprocessParams};
use crate::{
    flagging::{reduce_polarisations, FlagWriter, MwafWriteError},
    io::{
        read::{VisChunk, VisRead, VisReadError},
        write::{StageChain, VisRow, VisSink, VisSinkError, VisStageError},
    },
    math::{baseline_pairs, num_baselines_with_autos},
    misc::{is_a_tty, make_baseline_progress_bar},
};

/// What happened during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreprocessSummary {
    pub num_timesteps: usize,
    pub num_chunks: usize,

    /// The number of rows read from the source.
    pub num_rows_in: usize,

    /// The number of rows given to the sink.
    pub num_rows_out: usize,

    /// The number of flag rows given to the flag writer.
    pub num_flag_rows: u64,

    /// The mwaf files that were written.
    pub flag_files: Vec<PathBuf>,
}

/// Everything that workers share.
struct RunContext<'a> {
    chain: &'a StageChain,

    /// Set when any thread has an issue, so the others can stop early.
    error: &'a AtomicCell<bool>,

    progress: &'a ProgressBar,
}

/// The results of a single baseline over a time chunk.
struct BaselineOutput {
    ant1: usize,
    ant2: usize,

    /// Rows that came out of the end of the stage chain, in time order.
    rows: Vec<VisRow>,

    /// Flags of every input row (one per channel, polarisations reduced), in
    /// time order.
    flags: Vec<Vec<bool>>,
}

/// Run all of the visibilities of `reader` through `chain` and into `sink`.
/// The flags of the input visibilities are written by `flag_writer` (if
/// given), which is finished once all rows are written.
///
/// Timesteps are read in chunks that fit in the maximum buffer size. In each
/// chunk, baselines are handed to a pool of worker threads; the chunk is only
/// done once all of its baselines are. Output rows are then given to the sink
/// ordered by baseline then time, and flag rows are written ordered by time
/// then baseline.
pub fn run_preprocess(
    params: &PreprocessParams,
    reader: &mut dyn VisRead,
    chain: &mut StageChain,
    sink: &mut dyn VisSink,
    mut flag_writer: Option<FlagWriter>,
) -> Result<PreprocessSummary, PreprocessError> {
    let band = reader.band_info().clone();
    let antennas = reader.antennas().to_vec();
    let num_timesteps = reader.num_timesteps();
    let num_antennas = antennas.len();
    let num_baselines = num_baselines_with_autos(num_antennas);
    info!(
        "Preprocessing {num_timesteps} timesteps of {num_antennas} antennas ({num_baselines} baselines) and {} channels",
        band.num_channels()
    );
    let partition = &params.partition;
    match partition.channels_per_subband(band.num_channels()) {
        Some(n) => info!(
            "Node {} of {} has subbands {:?} ({n} channels each)",
            partition.rank, partition.num_nodes, partition.subbands
        ),
        None => warn!(
            "The {} channels read by node {} of {} don't split evenly over its subbands {:?}",
            band.num_channels(),
            partition.rank,
            partition.num_nodes,
            partition.subbands
        ),
    }
    if !chain.is_empty() {
        info!("Visibility stages: {}", chain.stage_names().join(" -> "));
    }

    if let Some(writer) = flag_writer.as_mut() {
        writer.write_band_info(&band)?;
        writer.write_antennas(&antennas)?;
    }
    let out_band = chain.write_band_info(band.clone())?;
    chain.write_antennas(&antennas)?;
    sink.write_band_info(&out_band)?;
    sink.write_antennas(&antennas)?;

    let plan = ChunkPlan::new(
        num_timesteps,
        ChunkPlan::bytes_per_timestep(num_baselines, band.num_channels()),
        params.max_buffer_size,
    );
    let progress = make_baseline_progress_bar(
        num_baselines * plan.num_chunks(),
        "Preprocessing",
        params.progress_bars && is_a_tty(),
    );
    let error = AtomicCell::new(false);
    let ctx = RunContext {
        chain: &*chain,
        error: &error,
        progress: &progress,
    };

    let mut summary = PreprocessSummary {
        num_timesteps,
        num_chunks: plan.num_chunks(),
        ..Default::default()
    };
    for (i_chunk, timesteps) in plan.chunks.iter().enumerate() {
        debug!(
            "Reading chunk {}/{} (timesteps {timesteps:?})",
            i_chunk + 1,
            plan.num_chunks()
        );
        let chunk = reader.read_chunk(timesteps.clone())?;
        summary.num_rows_in += chunk.num_rows();

        let outputs = process_chunk(&ctx, chunk, num_antennas, params.num_threads.get())?;

        for output in outputs.values() {
            if output.flags.len() != timesteps.len() {
                return Err(PreprocessError::MissingRows {
                    ant1: output.ant1,
                    ant2: output.ant2,
                    got: output.flags.len(),
                    expected: timesteps.len(),
                });
            }
            for row in &output.rows {
                sink.write_row(row)?;
                summary.num_rows_out += 1;
            }
        }

        if let Some(writer) = flag_writer.as_mut() {
            // The outputs are in the same order as the baselines.
            for i_timestep in 0..timesteps.len() {
                for output in outputs.values() {
                    writer.write_row(output.ant1, output.ant2, &output.flags[i_timestep])?;
                    summary.num_flag_rows += 1;
                }
            }
        }
    }
    progress.abandon_with_message("Finished preprocessing");

    // Anything left in the stages.
    let mut leftovers = ctx.chain.finish_rows()?;
    leftovers.sort_by_key(|r| (r.ant1, r.ant2));
    if !leftovers.is_empty() {
        debug!("Writing {} rows released at the end of the stream", leftovers.len());
    }
    for row in &leftovers {
        sink.write_row(row)?;
        summary.num_rows_out += 1;
    }
    sink.finish()?;

    if let Some(writer) = flag_writer {
        summary.flag_files = writer.finish()?;
    }

    info!(
        "Read {} rows, wrote {} rows and {} flag rows",
        summary.num_rows_in, summary.num_rows_out, summary.num_flag_rows
    );
    Ok(summary)
}

/// Run every baseline of a chunk through the stages on worker threads.
fn process_chunk(
    ctx: &RunContext,
    mut chunk: VisChunk,
    num_antennas: usize,
    num_threads: usize,
) -> Result<BTreeMap<(usize, usize), BaselineOutput>, PreprocessError> {
    // Baselines (and their rows) to be processed.
    let (tx_work, rx_work) = bounded(num_threads);
    let (tx_result, rx_result) = unbounded();

    thread::scope(|scope| -> Result<(), PreprocessError> {
        let workers: Vec<ScopedJoinHandle<Result<(), PreprocessError>>> = (0..num_threads)
            .map(|i_thread| {
                let rx_work = rx_work.clone();
                let tx_result = tx_result.clone();
                thread::Builder::new()
                    .name(format!("worker {i_thread}"))
                    .spawn_scoped(scope, move || {
                        // If a panic happens, update our atomic error.
                        defer_on_unwind! { ctx.error.store(true); }

                        for (ant1, ant2, rows) in rx_work.iter() {
                            if ctx.error.load() {
                                break;
                            }
                            let result = process_baseline(ctx.chain, ant1, ant2, rows);
                            // If processing failed, allow the other threads
                            // to see this so they can abandon their work
                            // early.
                            if result.is_err() {
                                ctx.error.store(true);
                            }
                            match tx_result.send(result?) {
                                Ok(()) => (),
                                // If we can't send the message, it's because
                                // the channel has been closed on the other
                                // side; just exit this thread.
                                Err(_) => return Ok(()),
                            }
                            ctx.progress.inc(1);
                        }
                        Ok(())
                    })
                    .expect("OS can create threads")
            })
            .collect();
        drop(rx_work);

        for (ant1, ant2) in baseline_pairs(num_antennas) {
            if ctx.error.load() {
                break;
            }
            let rows = chunk.take_baseline_rows(ant1, ant2);
            // If we can't send, all workers have exited due to error.
            if tx_work.send((ant1, ant2, rows)).is_err() {
                break;
            }
        }
        drop(tx_work);

        // Join all thread handles. This propagates any errors and lets us know
        // if any threads panicked.
        for worker in workers {
            worker.join().unwrap()?;
        }
        Ok(())
    })?;
    drop(tx_result);

    Ok(rx_result
        .into_iter()
        .map(|output: BaselineOutput| ((output.ant1, output.ant2), output))
        .collect())
}

/// Run the rows of a single baseline through the stages. The flags of each
/// input row are kept.
fn process_baseline(
    chain: &StageChain,
    ant1: usize,
    ant2: usize,
    rows: Vec<VisRow>,
) -> Result<BaselineOutput, PreprocessError> {
    let mut out_rows = Vec::with_capacity(rows.len());
    let mut flags = Vec::with_capacity(rows.len());
    for row in rows {
        flags.push(reduce_polarisations(&row.flags));
        if let Some(row) = chain.process_row(row)? {
            out_rows.push(row);
        }
    }
    Ok(BaselineOutput {
        ant1,
        ant2,
        rows: out_rows,
        flags,
    })
}

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Baseline ({ant1}, {ant2}) had {got} rows in a chunk of {expected} timesteps")]
    MissingRows {
        ant1: usize,
        ant2: usize,
        got: usize,
        expected: usize,
    },

    #[error(transparent)]
    VisRead(#[from] VisReadError),

    #[error(transparent)]
    Stage(#[from] VisStageError),

    #[error(transparent)]
    Sink(#[from] VisSinkError),

    #[error(transparent)]
    Mwaf(#[from] MwafWriteError),
}
