// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to write flags into mwaf files, one file per subband (a.k.a. coarse
//! channel or gpubox).
//!
//! Each file has a primary HDU of metadata and a binary table with a single
//! bit-vector column "FLAGS". Each row of the table holds the flags of one
//! baseline at one timestep, one bit per fine channel of the subband; rows are
//! ordered by time, then baseline.

use std::os::raw::c_char;
use std::path::{Path, PathBuf};

use fitsio::{
    errors::check_status as fits_check_status,
    tables::{ColumnDataType, ColumnDescription},
    FitsFile,
};
use log::{debug, trace};

use super::{MwafReadError, MwafWriteError};
use crate::{
    constants::{FLAG_FILENAME_PLACEHOLDER, MWAF_VERSION},
    io::write::{AntennaInfo, BandInfo},
    math::{baseline_index, num_baselines_with_autos},
    params::partition::NodePartition,
};

/// A single mwaf file being written.
struct FlagShard {
    path: PathBuf,
    fptr: FitsFile,

    /// The (zero-indexed) source file that this shard's subband comes from.
    file_index: usize,

    /// The number of rows in the table so far.
    num_table_rows: i64,

    /// The last (1-indexed) row written; 0 if nothing has been written.
    last_row: i64,
}

/// Writes flags into mwaf files. Only the subbands of a node's partition get
/// files.
///
/// Every row written increments a row counter shared by all of the files. A
/// file's HDU offset (in timesteps) shifts where its rows land; with an offset
/// of `K` timesteps, the first `K` timesteps of rows are skipped for that file,
/// and a negative offset leaves leading rows of that file unwritten.
pub struct FlagWriter {
    shards: Vec<FlagShard>,

    gps_time: u32,
    num_timesteps: usize,
    num_subbands: usize,

    /// HDU offsets [timesteps], indexed by source file.
    hdu_offsets: Vec<i32>,

    /// The number of channels in every row (over all of this node's subbands).
    num_channels: Option<usize>,
    num_antennas: Option<usize>,
    headers_written: bool,

    /// The number of rows written so far.
    row_count: u64,
}

impl FlagWriter {
    /// Create mwaf files for each of the subbands in `partition`. Files are
    /// named by replacing the "%%" in `filename_template` with the 2-digit,
    /// 1-indexed number of the subband's source file, which is looked up in
    /// `subband_to_file_index` (the identity mapping if not given). Any files
    /// that already exist are replaced.
    pub fn new(
        filename_template: &str,
        gps_time: u32,
        num_timesteps: usize,
        num_subbands: usize,
        partition: &NodePartition,
        subband_to_file_index: Option<Vec<usize>>,
    ) -> Result<FlagWriter, MwafWriteError> {
        if partition.is_empty() {
            return Err(MwafWriteError::EmptyPartition);
        }
        if !filename_template.contains(FLAG_FILENAME_PLACEHOLDER) {
            return Err(MwafWriteError::NoPlaceholder {
                template: filename_template.to_string(),
            });
        }
        let file_indices = match subband_to_file_index {
            Some(map) => {
                check_permutation(&map, num_subbands)?;
                map
            }
            None => (0..num_subbands).collect(),
        };
        if partition.subbands.end > num_subbands {
            return Err(MwafWriteError::PartitionOutOfRange {
                start: partition.subbands.start,
                end: partition.subbands.end,
                num_subbands,
            });
        }

        let mut shards = Vec::with_capacity(partition.num_subbands());
        for subband in partition.subbands.clone() {
            let file_index = file_indices[subband];
            let path = PathBuf::from(filename_template.replace(
                FLAG_FILENAME_PLACEHOLDER,
                &format!("{:02}", file_index + 1),
            ));
            if path.exists() {
                trace!("Removing existing {}", path.display());
                std::fs::remove_file(&path)?;
            }
            debug!(
                "Subband {subband} flags are written to {}",
                path.display()
            );
            let fptr = FitsFile::create(&path).open()?;
            shards.push(FlagShard {
                path,
                fptr,
                file_index,
                num_table_rows: 0,
                last_row: 0,
            });
        }

        Ok(FlagWriter {
            shards,
            gps_time,
            num_timesteps,
            num_subbands,
            hdu_offsets: vec![0; num_subbands],
            num_channels: None,
            num_antennas: None,
            headers_written: false,
            row_count: 0,
        })
    }

    /// Set the HDU offsets [timesteps] of every source file. This can't be
    /// done once rows have been written.
    pub fn set_hdu_offsets(&mut self, offsets: Vec<i32>) -> Result<(), MwafWriteError> {
        if self.row_count > 0 {
            return Err(MwafWriteError::OffsetsAfterRows);
        }
        if offsets.len() != self.num_subbands {
            return Err(MwafWriteError::BadOffsets {
                expected: self.num_subbands,
                got: offsets.len(),
            });
        }
        self.hdu_offsets = offsets;
        Ok(())
    }

    /// The paths of all of the files being written.
    pub fn paths(&self) -> Vec<&Path> {
        self.shards.iter().map(|s| s.path.as_path()).collect()
    }

    /// The number of rows written so far.
    pub fn num_rows_written(&self) -> u64 {
        self.row_count
    }

    pub fn write_band_info(&mut self, band: &BandInfo) -> Result<(), MwafWriteError> {
        let num_chans = band.num_channels();
        if num_chans % self.shards.len() != 0 {
            return Err(MwafWriteError::ChannelsNotDivisible {
                num_chans,
                num_subbands: self.shards.len(),
            });
        }
        if self.headers_written && self.num_channels != Some(num_chans) {
            return Err(MwafWriteError::MetadataChanged {
                what: "number of channels",
            });
        }
        self.num_channels = Some(num_chans);
        self.write_headers()
    }

    pub fn write_antennas(&mut self, antennas: &[AntennaInfo]) -> Result<(), MwafWriteError> {
        if self.headers_written && self.num_antennas != Some(antennas.len()) {
            return Err(MwafWriteError::MetadataChanged {
                what: "number of antennas",
            });
        }
        self.num_antennas = Some(antennas.len());
        self.write_headers()
    }

    /// Write the headers of all files once both the channels and antennas are
    /// known.
    fn write_headers(&mut self) -> Result<(), MwafWriteError> {
        let (num_chans, num_antennas) = match (self.num_channels, self.num_antennas) {
            (Some(c), Some(a)) if !self.headers_written => (c, a),
            _ => return Ok(()),
        };
        let chans_per_subband = num_chans / self.shards.len();

        for shard in self.shards.iter_mut() {
            let fptr = &mut shard.fptr;
            let hdu = fptr.hdu(0)?;
            hdu.write_key(fptr, "VERSION", MWAF_VERSION)?;
            hdu.write_key(fptr, "GPSTIME", self.gps_time as i64)?;
            hdu.write_key(fptr, "NCHANS", chans_per_subband as i64)?;
            hdu.write_key(fptr, "NANTENNA", num_antennas as i64)?;
            hdu.write_key(fptr, "NSCANS", self.num_timesteps as i64)?;
            // The polarisations have been reduced to a single flag.
            hdu.write_key(fptr, "NPOLS", 1_i64)?;
            hdu.write_key(fptr, "GPUBOXNO", (shard.file_index + 1) as i64)?;
            hdu.write_key(
                fptr,
                "SOFTWARE",
                format!(
                    "Created by {} v{}",
                    env!("CARGO_PKG_NAME"),
                    env!("CARGO_PKG_VERSION")
                ),
            )?;

            let col = ColumnDescription::new("FLAGS")
                .with_type(ColumnDataType::Bit)
                .that_repeats(chans_per_subband)
                .create()?;
            // The new table is now the current HDU; rows go into it.
            fptr.create_table("FLAGS", &[col])?;
            trace!("Wrote mwaf header to {}", shard.path.display());
        }

        self.headers_written = true;
        Ok(())
    }

    /// Write the (polarisation-reduced) flags of a row. Rows must be written
    /// timestep by timestep, and in baseline order within a timestep.
    pub fn write_row(&mut self, ant1: usize, ant2: usize, flags: &[bool]) -> Result<(), MwafWriteError> {
        let (num_chans, num_antennas) = match (self.headers_written, self.num_channels, self.num_antennas) {
            (true, Some(c), Some(a)) => (c, a),
            _ => return Err(MwafWriteError::HeadersNotWritten),
        };
        if flags.len() != num_chans {
            return Err(MwafWriteError::WrongNumChannels {
                got: flags.len(),
                expected: num_chans,
            });
        }

        let num_baselines = num_baselines_with_autos(num_antennas) as u64;
        let expected_baseline = self.row_count % num_baselines;
        if ant1 > ant2
            || ant2 >= num_antennas
            || baseline_index(ant1, ant2, num_antennas) as u64 != expected_baseline
        {
            return Err(MwafWriteError::UnexpectedBaseline {
                row: self.row_count + 1,
                ant1,
                ant2,
            });
        }

        self.row_count += 1;
        let row = self.row_count as i64;
        let chans_per_subband = num_chans / self.shards.len();
        for (shard, shard_flags) in self
            .shards
            .iter_mut()
            .zip(flags.chunks_exact(chans_per_subband))
        {
            let origin = self.hdu_offsets[shard.file_index] as i64 * num_baselines as i64;
            // Rows before this file's origin aren't written to it.
            if row <= origin {
                continue;
            }
            let local_row = row - origin;
            if local_row <= shard.last_row {
                return Err(MwafWriteError::Misordered {
                    file: shard.path.clone(),
                    row: local_row,
                    last_row: shard.last_row,
                });
            }
            shard.write_flags(local_row, shard_flags)?;
        }

        Ok(())
    }

    /// Close all of the files, returning their paths.
    pub fn finish(self) -> Result<Vec<PathBuf>, MwafWriteError> {
        let mut paths = Vec::with_capacity(self.shards.len());
        for shard in self.shards {
            debug!(
                "Finished writing {} rows to {}",
                shard.num_table_rows,
                shard.path.display()
            );
            paths.push(shard.path);
            // The file is closed when `fptr` is dropped.
        }
        Ok(paths)
    }
}

impl FlagShard {
    /// Write flags into a (1-indexed) row, growing the table if needed. Rows
    /// between the end of the table and `row` are zero (unflagged).
    fn write_flags(&mut self, row: i64, flags: &[bool]) -> Result<(), MwafWriteError> {
        let mut status = 0;
        if row > self.num_table_rows {
            unsafe {
                // ffirow = fits_insert_rows
                fitsio_sys::ffirow(
                    self.fptr.as_raw(),          /* I - FITS file pointer                */
                    self.num_table_rows,         /* I - insert rows following this row   */
                    row - self.num_table_rows,   /* I - number of rows to insert         */
                    &mut status,                 /* IO - error status                    */
                );
            }
            fits_check_status(status)?;
            self.num_table_rows = row;
        }

        let mut bits: Vec<c_char> = flags.iter().map(|&f| f as c_char).collect();
        unsafe {
            // ffpclx = fits_write_col_bit
            fitsio_sys::ffpclx(
                self.fptr.as_raw(), /* I - FITS file pointer                  */
                1,                  /* I - number of column to write (1 = 1st) */
                row,                /* I - first row to write (1 = 1st)        */
                1,                  /* I - first bit to write (1 = 1st)        */
                bits.len() as _,    /* I - number of bits to write             */
                bits.as_mut_ptr(),  /* I - array of logical values             */
                &mut status,        /* IO - error status                       */
            );
        }
        fits_check_status(status)?;
        self.last_row = row;
        Ok(())
    }
}

/// Check that `map` holds every number in `0..num_subbands` exactly once.
fn check_permutation(map: &[usize], num_subbands: usize) -> Result<(), MwafWriteError> {
    let mut seen = vec![false; num_subbands];
    let ok = map.len() == num_subbands
        && map.iter().all(|&i| {
            if i >= num_subbands || seen[i] {
                false
            } else {
                seen[i] = true;
                true
            }
        });
    if ok {
        Ok(())
    } else {
        Err(MwafWriteError::BadPermutation {
            map: map.to_vec(),
            num_subbands,
        })
    }
}

/// The contents of an mwaf file.
#[derive(Debug, Clone)]
pub struct MwafFile {
    pub version: String,
    pub gps_time: i64,

    /// The number of fine channels (NCHANS).
    pub num_channels: usize,

    /// The number of antennas (NANTENNA).
    pub num_antennas: usize,

    /// The number of timesteps (NSCANS).
    pub num_scans: usize,

    pub num_pols: usize,

    /// The 1-indexed gpubox number (GPUBOXNO).
    pub gpubox_num: usize,

    pub software: Option<String>,

    /// The flags of each row of the table ([row][channel]).
    pub rows: Vec<Vec<bool>>,
}

/// Read an mwaf file written by [`FlagWriter`].
pub fn read_mwaf<P: AsRef<Path>>(file: P) -> Result<MwafFile, MwafReadError> {
    let file = file.as_ref();
    trace!("Reading in {}", file.display());
    let mut fptr = FitsFile::open(file)?;
    let hdu = fptr.hdu(0)?;

    let version: String = hdu.read_key(&mut fptr, "VERSION")?;
    if version != MWAF_VERSION {
        return Err(MwafReadError::UnhandledVersion {
            file: file.to_path_buf(),
            version,
        });
    }
    let to_usize = |what: &'static str, value: i64| -> Result<usize, MwafReadError> {
        usize::try_from(value).map_err(|_| MwafReadError::Negative {
            file: file.to_path_buf(),
            what,
            value,
        })
    };
    let gps_time: i64 = hdu.read_key(&mut fptr, "GPSTIME")?;
    let num_channels = to_usize("NCHANS", hdu.read_key(&mut fptr, "NCHANS")?)?;
    let num_antennas = to_usize("NANTENNA", hdu.read_key(&mut fptr, "NANTENNA")?)?;
    let num_scans = to_usize("NSCANS", hdu.read_key(&mut fptr, "NSCANS")?)?;
    let num_pols = to_usize("NPOLS", hdu.read_key(&mut fptr, "NPOLS")?)?;
    let gpubox_num = to_usize("GPUBOXNO", hdu.read_key(&mut fptr, "GPUBOXNO")?)?;
    let software: Option<String> = hdu.read_key(&mut fptr, "SOFTWARE").ok();

    let table = fptr.hdu(1)?;
    let num_rows = to_usize("NAXIS2", table.read_key(&mut fptr, "NAXIS2")?)?;
    let mut rows = Vec::with_capacity(num_rows);
    let mut bits: Vec<c_char> = vec![0; num_channels];
    for row in 1..=num_rows {
        let mut status = 0;
        if num_channels > 0 {
            unsafe {
                // ffgcx = fits_read_col_bit
                fitsio_sys::ffgcx(
                    fptr.as_raw(),     /* I - FITS file pointer                 */
                    1,                 /* I - number of column to read (1 = 1st) */
                    row as _,          /* I - first row to read (1 = 1st)        */
                    1,                 /* I - first bit to read (1 = 1st)        */
                    bits.len() as _,   /* I - number of bits to read             */
                    bits.as_mut_ptr(), /* O - array of logical values            */
                    &mut status,       /* IO - error status                      */
                );
            }
            fits_check_status(status)?;
        }
        rows.push(bits.iter().map(|&b| b != 0).collect());
    }

    Ok(MwafFile {
        version,
        gps_time,
        num_channels,
        num_antennas,
        num_scans,
        num_pols,
        gpubox_num,
        software,
        rows,
    })
}
