// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests of visibilities going through the whole pipeline.

use approx::assert_abs_diff_eq;
use marlu::Jones;
use ndarray::Array2;
use tempfile::TempDir;

use super::*;
use mwa_preproc::{
    averaging::AveragingError, io::write::VisStageError, run_preprocess, CalibrationSolutions, ChunkPlan,
    PartialWindowPolicy, PreprocessError,
};

fn diag(v: f32) -> Jones<f32> {
    Jones::identity() * v
}

#[test]
fn test_identity_passthrough() {
    let ants = antennas(2);
    let rows = make_rows(3, &ants, 1, |_, _, _, _| Jones::identity());
    let params = params(PreprocessArgs {
        num_threads: Some(2),
        ..Default::default()
    });
    let (summary, sink) = run(&params, &ants, 1, rows);

    assert_eq!(summary.num_timesteps, 3);
    assert_eq!(summary.num_chunks, 1);
    assert_eq!(summary.num_rows_in, 9);
    assert_eq!(summary.num_rows_out, 9);
    assert_eq!(summary.num_flag_rows, 0);
    assert!(summary.flag_files.is_empty());

    assert!(sink.finished);
    assert_eq!(sink.antennas, ants);
    assert_eq!(sink.band.as_ref().unwrap().num_channels(), 1);
    // Ordered by baseline, then time.
    let order: Vec<_> = sink.rows.iter().map(|r| (r.ant1, r.ant2)).collect();
    assert_eq!(
        order,
        [(0, 0), (0, 0), (0, 0), (0, 1), (0, 1), (0, 1), (1, 1), (1, 1), (1, 1)]
    );
    for (i, row) in sink.rows.iter().enumerate() {
        assert_abs_diff_eq!(row.time.to_gpst_seconds(), timestamp(i % 3).to_gpst_seconds());
        assert_abs_diff_eq!(row.data[0], Jones::identity());
        assert_eq!(row.flags, [[false; 4]]);
    }
}

#[test]
fn test_time_average_of_two_timesteps() {
    let ants = antennas(2);
    let rows = make_rows(2, &ants, 1, |t, _, _, _| diag(2.0 + 2.0 * t as f32));
    let params = params(PreprocessArgs {
        time_average_factor: Some(2),
        ..Default::default()
    });
    let (summary, sink) = run(&params, &ants, 1, rows);
    assert_eq!(summary.num_rows_out, 3);

    let calc = uvw_calc(&ants);
    let mean_gps = START_GPS + INTERVAL / 2.0;
    for row in &sink.rows {
        assert_abs_diff_eq!(row.data[0], diag(3.0));
        assert_abs_diff_eq!(row.time.to_gpst_seconds(), mean_gps, epsilon = 1e-6);
        assert_abs_diff_eq!(row.interval.to_seconds(), 2.0 * INTERVAL, epsilon = 1e-9);
        assert_eq!(row.flags, [[false; 4]]);
        assert_eq!(row.weights, [[2.0; 4]]);

        // The UVW is at the averaged time, not either input time.
        let expected = calc.calculate_uvw(row.time, row.ant1, row.ant2);
        assert_abs_diff_eq!(row.uvw.u, expected.u, epsilon = 1e-9);
        assert_abs_diff_eq!(row.uvw.v, expected.v, epsilon = 1e-9);
        assert_abs_diff_eq!(row.uvw.w, expected.w, epsilon = 1e-9);
    }
}

/// Solutions of 2·identity, then averaging by 2 in time and frequency. The
/// results must be the same however the timesteps are chunked and however
/// many threads are used.
#[test]
fn test_solutions_and_averaging_over_chunks() {
    let ants = antennas(3);
    let num_timesteps = 6;
    let num_chans = 4;
    let data = |t: usize, _: usize, _: usize, c: usize| diag(1.0 + t as f32 + 10.0 * c as f32);

    let dir = TempDir::new().unwrap();
    let sols_file = dir.path().join("sols.bin");
    CalibrationSolutions::new(
        Array2::from_elem((ants.len(), 1), Jones::identity() * 2.0),
        None,
        None,
    )
    .write_ao(&sols_file)
    .unwrap();

    let args = PreprocessArgs {
        solutions: Some(sols_file),
        time_average_factor: Some(2),
        freq_average_factor: Some(2),
        ..Default::default()
    };
    let one_chunk = params(PreprocessArgs {
        num_threads: Some(1),
        ..args.clone()
    });
    let bytes = ChunkPlan::bytes_per_timestep(6, num_chans);
    let many_chunks = params(PreprocessArgs {
        num_threads: Some(3),
        max_buffer_size: Some(bytes),
        ..args
    });

    let (summary1, sink1) = run(
        &one_chunk,
        &ants,
        num_chans,
        make_rows(num_timesteps, &ants, num_chans, data),
    );
    let (summary2, mut sink2) = run(
        &many_chunks,
        &ants,
        num_chans,
        make_rows(num_timesteps, &ants, num_chans, data),
    );
    assert_eq!(summary1.num_chunks, 1);
    assert_eq!(summary2.num_chunks, 6);
    assert_eq!(summary1.num_rows_out, 6 * 3);
    assert_eq!(summary2.num_rows_out, 6 * 3);
    assert_eq!(sink1.band.as_ref().unwrap().num_channels(), 2);

    // With many chunks, each chunk's rows are ordered by baseline; put all of
    // the rows in baseline order (keeping time order within each baseline).
    sink2.rows.sort_by_key(|r| (r.ant1, r.ant2));
    for (row1, row2) in sink1.rows.iter().zip(sink2.rows.iter()) {
        assert_eq!((row1.ant1, row1.ant2), (row2.ant1, row2.ant2));
        assert_abs_diff_eq!(row1.time.to_gpst_seconds(), row2.time.to_gpst_seconds());
        assert_eq!(row1.data.len(), 2);
        for (j1, j2) in row1.data.iter().zip(row2.data.iter()) {
            assert_abs_diff_eq!(*j1, *j2);
        }
    }

    // Every baseline has 3 output timesteps. For output timestep k and
    // channel m, the mean input is 1 + (2k + 0.5) + 10(2m + 0.5), and the
    // solutions multiply by 4.
    let cross: Vec<_> = sink1
        .rows
        .iter()
        .filter(|r| (r.ant1, r.ant2) == (0, 1))
        .collect();
    assert_eq!(cross.len(), 3);
    for (k, row) in cross.iter().enumerate() {
        for m in 0..2 {
            let expected = 4.0 * (1.0 + (2 * k) as f32 + 0.5 + 10.0 * (2 * m) as f32 + 5.0);
            assert_abs_diff_eq!(row.data[m], diag(expected), epsilon = 1e-4);
        }
    }
}

#[test]
fn test_partial_windows() {
    let ants = antennas(2);
    let make = || make_rows(3, &ants, 1, |_, _, _, _| diag(1.0));

    let discard = params(PreprocessArgs {
        time_average_factor: Some(2),
        ..Default::default()
    });
    let (summary, sink) = run(&discard, &ants, 1, make());
    assert_eq!(summary.num_rows_out, 3);
    assert_eq!(sink.rows.len(), 3);

    let flush = params(PreprocessArgs {
        time_average_factor: Some(2),
        partial_window_policy: Some(PartialWindowPolicy::Flush),
        ..Default::default()
    });
    let (summary, sink) = run(&flush, &ants, 1, make());
    assert_eq!(summary.num_rows_out, 6);
    // The flushed rows come last, and are made of only the last timestep.
    for row in &sink.rows[3..] {
        assert_abs_diff_eq!(row.time.to_gpst_seconds(), timestamp(2).to_gpst_seconds());
        assert_abs_diff_eq!(row.interval.to_seconds(), INTERVAL, epsilon = 1e-9);
        assert_abs_diff_eq!(row.data[0], diag(1.0));
    }
    let order: Vec<_> = sink.rows[3..].iter().map(|r| (r.ant1, r.ant2)).collect();
    assert_eq!(order, [(0, 0), (0, 1), (1, 1)]);
}

#[test]
fn test_flagged_samples_are_zeroed_by_flagged_solutions() {
    let ants = antennas(2);
    let dir = TempDir::new().unwrap();
    let sols_file = dir.path().join("sols.bin");
    let mut di_jones = Array2::from_elem((2, 1), Jones::identity());
    // Antenna 1 has no solutions.
    di_jones[(1, 0)] = Jones::nan();
    CalibrationSolutions::new(di_jones, None, None)
        .write_ao(&sols_file)
        .unwrap();

    let params = params(PreprocessArgs {
        solutions: Some(sols_file),
        ..Default::default()
    });
    let (_, sink) = run(
        &params,
        &ants,
        1,
        make_rows(1, &ants, 1, |_, _, _, _| diag(5.0)),
    );
    for row in &sink.rows {
        if row.ant1 == 1 || row.ant2 == 1 {
            assert_eq!(row.flags, [[true; 4]]);
            assert_abs_diff_eq!(row.data[0], Jones::default());
        } else {
            assert_eq!(row.flags, [[false; 4]]);
            assert_abs_diff_eq!(row.data[0], diag(5.0));
        }
    }
}

#[test]
fn test_worker_errors_are_propagated() {
    let ants = antennas(2);
    let dir = TempDir::new().unwrap();
    let sols_file = dir.path().join("sols.bin");
    // Solutions for only 1 antenna.
    CalibrationSolutions::new(Array2::from_elem((1, 1), Jones::identity()), None, None)
        .write_ao(&sols_file)
        .unwrap();

    let params = params(PreprocessArgs {
        solutions: Some(sols_file),
        num_threads: Some(2),
        ..Default::default()
    });
    let mut reader =
        MemoryVisReader::new(band(1), ants.clone(), make_rows(2, &ants, 1, |_, _, _, _| diag(1.0)))
            .unwrap();
    let mut chain = params.build_chain(uvw_calc(&ants)).unwrap();
    let mut sink = MemorySink::new();
    let result = run_preprocess(&params, &mut reader, &mut chain, &mut sink, None);
    assert!(matches!(
        result,
        Err(PreprocessError::Stage(VisStageError::SolutionsApply(_)))
    ));
    assert!(!sink.finished);
}

#[test]
fn test_incompatible_solutions_are_rejected_before_rows() {
    let ants = antennas(2);
    let dir = TempDir::new().unwrap();
    let sols_file = dir.path().join("sols.bin");
    // 3 solution channels can't be spread over 4 observation channels.
    CalibrationSolutions::new(Array2::from_elem((2, 3), Jones::identity()), None, None)
        .write_ao(&sols_file)
        .unwrap();

    let params = params(PreprocessArgs {
        solutions: Some(sols_file),
        ..Default::default()
    });
    let mut reader =
        MemoryVisReader::new(band(4), ants.clone(), make_rows(1, &ants, 4, |_, _, _, _| diag(1.0)))
            .unwrap();
    let mut chain = params.build_chain(uvw_calc(&ants)).unwrap();
    let mut sink = MemorySink::new();
    let result = run_preprocess(&params, &mut reader, &mut chain, &mut sink, None);
    assert!(matches!(result, Err(PreprocessError::Stage(_))));
    assert!(sink.rows.is_empty());
}

#[test]
fn test_too_few_tiles_is_an_error_not_a_panic() {
    let ants = antennas(3);
    let params = params(PreprocessArgs {
        time_average_factor: Some(2),
        num_threads: Some(2),
        ..Default::default()
    });
    let mut reader =
        MemoryVisReader::new(band(1), ants.clone(), make_rows(2, &ants, 1, |_, _, _, _| diag(1.0)))
            .unwrap();
    // UVWs can only be made for the first 2 antennas.
    let mut chain = params.build_chain(uvw_calc(&ants[..2])).unwrap();
    let mut sink = MemorySink::new();
    let result = run_preprocess(&params, &mut reader, &mut chain, &mut sink, None);
    assert!(matches!(
        result,
        Err(PreprocessError::Stage(VisStageError::Averaging(
            AveragingError::TooFewTiles {
                num_tiles: 2,
                num_antennas: 3
            }
        )))
    ));
    assert!(sink.rows.is_empty());
}
