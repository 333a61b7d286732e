// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Integration tests.
//!
//! Some help for laying out these tests was taken from:
//! https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod flags;
mod pipeline;

use std::sync::Arc;

use hifitime::{Duration, Epoch};
use marlu::{constants::MWA_LONG_RAD, Jones, RADec, XyzGeodetic};

use mwa_preproc::{
    baseline_pairs, AntennaInfo, ArrayUvwCalculator, BandInfo, ChannelInfo, MemorySink,
    MemoryVisReader, PreprocessArgs, PreprocessParams, PreprocessSummary, UvwCalculator, VisRow,
};

/// The GPS time of the first timestep.
const START_GPS: f64 = 1090008640.0;

/// The integration time of each timestep \[seconds\].
const INTERVAL: f64 = 2.0;

fn band(num_chans: usize) -> BandInfo {
    BandInfo::new(
        "test band".to_string(),
        (0..num_chans)
            .map(|i| ChannelInfo::new(167.055e6 + i as f64 * 40e3, 40e3))
            .collect(),
    )
}

fn antennas(n: usize) -> Vec<AntennaInfo> {
    (0..n)
        .map(|i| AntennaInfo {
            name: format!("Tile{:03}", i + 11),
            position: XyzGeodetic {
                x: 10.0 * i as f64,
                y: -25.0 * i as f64,
                z: 3.0 * i as f64,
            },
        })
        .collect()
}

fn timestamp(timestep: usize) -> Epoch {
    Epoch::from_gpst_seconds(START_GPS + timestep as f64 * INTERVAL)
}

fn uvw_calc(antennas: &[AntennaInfo]) -> Arc<ArrayUvwCalculator> {
    Arc::new(ArrayUvwCalculator::new(
        antennas.iter().map(|a| a.position).collect(),
        RADec::new_degrees(0.0, -27.0),
        MWA_LONG_RAD,
        Duration::from_seconds(0.0),
    ))
}

/// Make rows for every timestep and baseline. `data` gets the visibility of
/// (timestep, ant1, ant2, channel).
fn make_rows<F>(
    num_timesteps: usize,
    antennas: &[AntennaInfo],
    num_chans: usize,
    data: F,
) -> Vec<Vec<VisRow>>
where
    F: Fn(usize, usize, usize, usize) -> Jones<f32>,
{
    let calc = uvw_calc(antennas);
    (0..num_timesteps)
        .map(|timestep| {
            let time = timestamp(timestep);
            baseline_pairs(antennas.len())
                .map(|(ant1, ant2)| {
                    VisRow::new(
                        time,
                        Duration::from_seconds(INTERVAL),
                        ant1,
                        ant2,
                        calc.calculate_uvw(time, ant1, ant2),
                        (0..num_chans)
                            .map(|chan| data(timestep, ant1, ant2, chan))
                            .collect(),
                    )
                })
                .collect()
        })
        .collect()
}

/// Parse arguments into parameters, without progress bars.
fn params(args: PreprocessArgs) -> PreprocessParams {
    PreprocessArgs {
        no_progress_bars: true,
        ..args
    }
    .parse()
    .unwrap()
}

/// Run rows through the stages made by `params` and into a [`MemorySink`].
fn run(
    params: &PreprocessParams,
    antennas: &[AntennaInfo],
    num_chans: usize,
    rows: Vec<Vec<VisRow>>,
) -> (PreprocessSummary, MemorySink) {
    let mut reader = MemoryVisReader::new(band(num_chans), antennas.to_vec(), rows).unwrap();
    let mut chain = params.build_chain(uvw_calc(antennas)).unwrap();
    let mut sink = MemorySink::new();
    let summary =
        mwa_preproc::run_preprocess(params, &mut reader, &mut chain, &mut sink, None).unwrap();
    (summary, sink)
}
