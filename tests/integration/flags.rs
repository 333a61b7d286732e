// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests of mwaf files written alongside the visibilities.

use tempfile::TempDir;

use super::*;
use mwa_preproc::{read_mwaf, run_preprocess, ChunkPlan, VisRead};

/// Is (timestep, ant1, ant2, channel) flagged? Only the YY polarisation is
/// flagged, so reducing polarisations must still flag the channel.
fn is_flagged(timestep: usize, ant1: usize, ant2: usize, chan: usize) -> bool {
    (timestep + 2 * ant1 + ant2 + chan) % 3 == 0
}

/// Make rows with flags. `chan_offset` is added to each channel index before
/// deciding if it's flagged, so that a node can make its part of the band.
fn flagged_rows(
    num_timesteps: usize,
    antennas: &[AntennaInfo],
    num_chans: usize,
    chan_offset: usize,
) -> Vec<Vec<VisRow>> {
    let mut rows = make_rows(num_timesteps, antennas, num_chans, |_, _, _, _| {
        Jones::identity()
    });
    for (timestep, timestep_rows) in rows.iter_mut().enumerate() {
        for row in timestep_rows.iter_mut() {
            for (chan, flags) in row.flags.iter_mut().enumerate() {
                flags[3] = is_flagged(timestep, row.ant1, row.ant2, chan + chan_offset);
            }
        }
    }
    rows
}

/// Run rows through a node's pipeline with flags written.
fn run_with_flags(
    params: &PreprocessParams,
    antennas: &[AntennaInfo],
    num_chans: usize,
    rows: Vec<Vec<VisRow>>,
) -> (PreprocessSummary, MemorySink) {
    let mut reader = MemoryVisReader::new(band(num_chans), antennas.to_vec(), rows).unwrap();
    let gps_time = reader.timestamps()[0].to_gpst_seconds() as u32;
    let flag_writer = params
        .create_flag_writer(gps_time, reader.num_timesteps())
        .unwrap();
    assert!(flag_writer.is_some());
    let mut chain = params.build_chain(uvw_calc(antennas)).unwrap();
    let mut sink = MemorySink::new();
    let summary =
        run_preprocess(params, &mut reader, &mut chain, &mut sink, flag_writer).unwrap();
    (summary, sink)
}

/// Check the rows of an mwaf file against the expected flags, for global
/// timesteps starting at `first_timestep` and the channels of the file
/// starting at `chan_offset`.
fn check_rows(rows: &[Vec<bool>], num_ants: usize, first_timestep: usize, chan_offset: usize) {
    let pairs: Vec<_> = baseline_pairs(num_ants).collect();
    for (i_row, flags) in rows.iter().enumerate() {
        let timestep = first_timestep + i_row / pairs.len();
        let (ant1, ant2) = pairs[i_row % pairs.len()];
        let expected: Vec<bool> = (0..flags.len())
            .map(|chan| is_flagged(timestep, ant1, ant2, chan + chan_offset))
            .collect();
        assert_eq!(flags, &expected, "row {i_row}");
    }
}

#[test]
fn test_single_node_flags() {
    let dir = TempDir::new().unwrap();
    let ants = antennas(3);
    let num_timesteps = 4;
    let params = params(PreprocessArgs {
        num_subbands: Some(2),
        flag_template: Some(dir.path().join("1090008640_%%.mwaf").display().to_string()),
        // Averaging doesn't change the flags that are written.
        time_average_factor: Some(2),
        freq_average_factor: Some(2),
        // 2 timesteps per chunk.
        max_buffer_size: Some(2 * ChunkPlan::bytes_per_timestep(6, 4)),
        num_threads: Some(2),
        ..Default::default()
    });
    let (summary, sink) = run_with_flags(&params, &ants, 4, flagged_rows(num_timesteps, &ants, 4, 0));
    assert_eq!(summary.num_chunks, 2);
    assert_eq!(summary.num_flag_rows, 4 * 6);
    assert_eq!(summary.flag_files.len(), 2);
    assert_eq!(sink.rows.len(), 2 * 6);

    for (i_file, file) in summary.flag_files.iter().enumerate() {
        assert_eq!(
            file,
            &dir.path().join(format!("1090008640_{:02}.mwaf", i_file + 1))
        );
        let mwaf = read_mwaf(file).unwrap();
        assert_eq!(mwaf.gps_time, 1090008640);
        assert_eq!(mwaf.num_channels, 2);
        assert_eq!(mwaf.num_antennas, 3);
        assert_eq!(mwaf.num_scans, num_timesteps);
        assert_eq!(mwaf.num_pols, 1);
        assert_eq!(mwaf.gpubox_num, i_file + 1);
        assert_eq!(mwaf.rows.len(), num_timesteps * 6);
        check_rows(&mwaf.rows, 3, 0, 2 * i_file);
    }
}

#[test]
fn test_nodes_write_their_own_subbands() {
    let dir = TempDir::new().unwrap();
    let template = dir.path().join("obs_%%.mwaf").display().to_string();
    let ants = antennas(2);
    let num_timesteps = 3;
    let chans_per_subband = 3;

    for rank in 0..2 {
        let params = params(PreprocessArgs {
            num_subbands: Some(4),
            node_rank: Some(rank),
            num_nodes: Some(2),
            flag_template: Some(template.clone()),
            ..Default::default()
        });
        assert_eq!(params.partition.subbands, 2 * rank..2 * rank + 2);
        // Each node only has the channels of its subbands.
        let num_chans = 2 * chans_per_subband;
        let chan_offset = rank * num_chans;
        let (summary, _) = run_with_flags(
            &params,
            &ants,
            num_chans,
            flagged_rows(num_timesteps, &ants, num_chans, chan_offset),
        );
        assert_eq!(summary.flag_files.len(), 2);

        // Only this node's files (and those of earlier nodes) exist.
        for gpubox in 1..=4 {
            let exists = dir.path().join(format!("obs_{gpubox:02}.mwaf")).exists();
            assert_eq!(exists, gpubox <= 2 * (rank + 1));
        }
    }

    for subband in 0..4 {
        let mwaf = read_mwaf(dir.path().join(format!("obs_{:02}.mwaf", subband + 1))).unwrap();
        assert_eq!(mwaf.gpubox_num, subband + 1);
        assert_eq!(mwaf.num_channels, chans_per_subband);
        assert_eq!(mwaf.rows.len(), num_timesteps * 3);
        check_rows(&mwaf.rows, 2, 0, subband * chans_per_subband);
    }
}

#[test]
fn test_hdu_offsets() {
    let dir = TempDir::new().unwrap();
    let ants = antennas(2);
    let num_timesteps = 3;
    let params = params(PreprocessArgs {
        num_subbands: Some(2),
        flag_template: Some(dir.path().join("obs_%%.mwaf").display().to_string()),
        // The second file starts a timestep later than the first.
        hdu_offsets: Some(vec![0, 1]),
        ..Default::default()
    });
    let (summary, _) = run_with_flags(&params, &ants, 2, flagged_rows(num_timesteps, &ants, 2, 0));

    let first = read_mwaf(&summary.flag_files[0]).unwrap();
    let second = read_mwaf(&summary.flag_files[1]).unwrap();
    assert_eq!(first.num_scans, num_timesteps);
    assert_eq!(second.num_scans, num_timesteps);
    assert_eq!(first.rows.len(), num_timesteps * 3);
    assert_eq!(second.rows.len(), (num_timesteps - 1) * 3);
    check_rows(&first.rows, 2, 0, 0);
    check_rows(&second.rows, 2, 1, 1);
}

#[test]
fn test_subband_to_file_map() {
    let dir = TempDir::new().unwrap();
    let ants = antennas(2);
    let params = params(PreprocessArgs {
        num_subbands: Some(2),
        flag_template: Some(dir.path().join("obs_%%.mwaf").display().to_string()),
        subband_to_file_index: Some(vec![1, 0]),
        ..Default::default()
    });
    let (summary, _) = run_with_flags(&params, &ants, 2, flagged_rows(2, &ants, 2, 0));
    assert_eq!(
        summary.flag_files,
        [dir.path().join("obs_02.mwaf"), dir.path().join("obs_01.mwaf")]
    );

    // Subband 0 is in the second file.
    let mwaf = read_mwaf(dir.path().join("obs_02.mwaf")).unwrap();
    assert_eq!(mwaf.gpubox_num, 2);
    check_rows(&mwaf.rows, 2, 0, 0);
    let mwaf = read_mwaf(dir.path().join("obs_01.mwaf")).unwrap();
    assert_eq!(mwaf.gpubox_num, 1);
    check_rows(&mwaf.rows, 2, 0, 1);
}
