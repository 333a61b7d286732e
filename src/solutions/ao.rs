// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to read and write "André Offringa style" calibration solutions.
//!
//! The binary starts with "MWAOCAL" and 9 zero bytes, then (all
//! little-endian) the number of intervals, antennas, channels and
//! polarisations as u32s, and the start and end GPS times as f64s. The rest of
//! the file is (real, imaginary) f64 pairs in (interval, antenna, channel,
//! polarisation) order.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use hifitime::Epoch;
use log::trace;
use marlu::c64;

use super::{error::*, CalibrationSolutions, SolutionStore};
use crate::constants::NUM_POLARISATIONS;

/// An open "André Offringa style" calibration solutions binary file. The
/// header is read when the file is opened; solutions are read on demand.
pub struct AoSolutionsFile<R: Read = BufReader<File>> {
    reader: R,
    num_intervals: usize,
    num_antennas: usize,
    num_channels: usize,
    num_polarisations: usize,
    start_time: Option<Epoch>,
    end_time: Option<Epoch>,

    /// How many complex gains have been read so far.
    num_read: usize,
}

impl AoSolutionsFile {
    pub fn open<P: AsRef<Path>>(file: P) -> Result<AoSolutionsFile, SolutionsReadError> {
        let file = file.as_ref();
        trace!("Opening AO solutions file {}", file.display());
        let reader = BufReader::new(File::open(file)?);
        AoSolutionsFile::from_reader(reader, &file.display().to_string())
    }
}

impl<R: Read> AoSolutionsFile<R> {
    /// Read the header out of `reader`. `name` is only used in error
    /// messages.
    pub fn from_reader(mut reader: R, name: &str) -> Result<AoSolutionsFile<R>, SolutionsReadError> {
        // The first 7 bytes should be ASCII "MWAOCAL".
        let mut mwaocal = [0; 7];
        reader.read_exact(&mut mwaocal)?;
        if &mwaocal != b"MWAOCAL" {
            return Err(SolutionsReadError::AndreBinaryStr {
                file: name.to_string(),
                got: String::from_utf8_lossy(&mwaocal).to_string(),
            });
        }
        for _ in 0..9 {
            match reader.read_u8()? {
                0 => (),
                v => {
                    return Err(SolutionsReadError::AndreBinaryVal {
                        file: name.to_string(),
                        expected: "0",
                        got: v.to_string(),
                    })
                }
            }
        }
        let num_intervals = reader.read_u32::<LittleEndian>()? as usize;
        let num_antennas = reader.read_u32::<LittleEndian>()? as usize;
        let num_channels = reader.read_u32::<LittleEndian>()? as usize;
        let num_polarisations = reader.read_u32::<LittleEndian>()? as usize;
        // If the start time (read in here as `t`) is 0, then we don't really
        // have a start time!
        let t = reader.read_f64::<LittleEndian>()?;
        let start_time = if t.abs() < f64::EPSILON {
            None
        } else {
            Some(Epoch::from_gpst_seconds(t))
        };
        // And similarly for the end time.
        let t = reader.read_f64::<LittleEndian>()?;
        let end_time = if t.abs() < f64::EPSILON {
            None
        } else {
            Some(Epoch::from_gpst_seconds(t))
        };

        Ok(AoSolutionsFile {
            reader,
            num_intervals,
            num_antennas,
            num_channels,
            num_polarisations,
            start_time,
            end_time,
            num_read: 0,
        })
    }

    fn total_num_solutions(&self) -> usize {
        self.num_intervals * self.num_antennas * self.num_channels * self.num_polarisations
    }
}

impl<R: Read> SolutionStore for AoSolutionsFile<R> {
    fn num_intervals(&self) -> usize {
        self.num_intervals
    }

    fn num_polarisations(&self) -> usize {
        self.num_polarisations
    }

    fn num_channels(&self) -> usize {
        self.num_channels
    }

    fn num_antennas(&self) -> usize {
        self.num_antennas
    }

    fn read_next_solution(&mut self) -> Result<c64, SolutionsReadError> {
        let num = self.total_num_solutions();
        if self.num_read >= num {
            return Err(SolutionsReadError::Exhausted { num });
        }
        let re = self.reader.read_f64::<LittleEndian>()?;
        let im = self.reader.read_f64::<LittleEndian>()?;
        self.num_read += 1;
        Ok(c64::new(re, im))
    }

    fn start_time(&self) -> Option<Epoch> {
        self.start_time
    }

    fn end_time(&self) -> Option<Epoch> {
        self.end_time
    }
}

/// Write a "André-Offringa calibrate format" calibration solutions binary file.
pub fn write(sols: &CalibrationSolutions, file: &Path) -> Result<(), SolutionsWriteError> {
    let mut bin_file = BufWriter::new(File::create(file)?);
    write_to(sols, &mut bin_file)?;
    bin_file.flush()?;
    Ok(())
}

pub(crate) fn write_to<W: Write>(
    sols: &CalibrationSolutions,
    bin_file: &mut W,
) -> Result<(), SolutionsWriteError> {
    let num_intervals = 1;
    let (num_antennas, num_channels) = sols.di_jones.dim();

    // 8 floats, 8 bytes per float.
    let mut buf = [0; 8 * 8];
    bin_file.write_all(b"MWAOCAL")?;
    bin_file.write_u8(0)?;
    bin_file.write_u32::<LittleEndian>(0)?;
    bin_file.write_u32::<LittleEndian>(0)?;
    bin_file.write_u32::<LittleEndian>(num_intervals)?;
    bin_file.write_u32::<LittleEndian>(num_antennas as _)?;
    bin_file.write_u32::<LittleEndian>(num_channels as _)?;
    bin_file.write_u32::<LittleEndian>(NUM_POLARISATIONS as _)?;
    // GPS times; a missing time is written as 0.
    bin_file.write_f64::<LittleEndian>(
        sols.start_timestamp
            .map(|e| e.to_gpst_seconds())
            .unwrap_or(0.0),
    )?;
    bin_file.write_f64::<LittleEndian>(
        sols.end_timestamp
            .map(|e| e.to_gpst_seconds())
            .unwrap_or(0.0),
    )?;

    for j in sols.di_jones.iter() {
        LittleEndian::write_f64_into(
            &[
                j[0].re, j[0].im, j[1].re, j[1].im, j[2].re, j[2].im, j[3].re, j[3].im,
            ],
            &mut buf,
        );
        bin_file.write_all(&buf)?;
    }
    Ok(())
}
