//! Archived segments.
//!
//! A rotated buffer is renamed into `<name>.arc/` under a name recording the
//! sequence range and the time range of its records:
//!
//! ```text
//! {first_seq:016x}_{last_seq:016x}_{tmin}_{tmax}.b
//! ```
//!
//! Times are written as hexadecimal floating point (`0x1.8p+1`), which is
//! exact and contains no underscore. Both are `0x0p+0` when the records
//! carried no time information.

use crate::error::{Result, RingBufError};
use crate::paths::archive_dir;
use std::path::{Path, PathBuf};

/// Extension of archived segments.
pub const ARCHIVE_EXTENSION: &str = "b";

/// Parsed name of an archived segment.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ArchiveName {
    /// Sequence number of the first record in the segment.
    pub first_seq: u64,
    /// Sequence number following the last record (exclusive bound).
    pub last_seq: u64,
    /// Smallest record start time.
    pub tmin: f64,
    /// Largest record stop time.
    pub tmax: f64,
}

impl ArchiveName {
    /// File name of the archive.
    pub fn file_name(&self) -> String {
        format!(
            "{:016x}_{:016x}_{}_{}.{}",
            self.first_seq,
            self.last_seq,
            format_hex_float(self.tmin),
            format_hex_float(self.tmax),
            ARCHIVE_EXTENSION
        )
    }

    /// Parse an archive file name (without directory).
    pub fn parse(name: &str) -> Result<Self> {
        let invalid = || RingBufError::InvalidArchiveName {
            name: name.to_string(),
        };

        let stem = name
            .strip_suffix(ARCHIVE_EXTENSION)
            .and_then(|s| s.strip_suffix('.'))
            .ok_or_else(invalid)?;

        let mut parts = stem.split('_');
        let (Some(first), Some(last), Some(tmin), Some(tmax), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(invalid());
        };

        Ok(Self {
            first_seq: u64::from_str_radix(first, 16).map_err(|_| invalid())?,
            last_seq: u64::from_str_radix(last, 16).map_err(|_| invalid())?,
            tmin: parse_hex_float(tmin).ok_or_else(invalid)?,
            tmax: parse_hex_float(tmax).ok_or_else(invalid)?,
        })
    }

    /// Number of records in the segment.
    pub fn num_records(&self) -> u64 {
        self.last_seq.saturating_sub(self.first_seq)
    }

    /// Whether the segment holds the record with sequence number `seq`.
    pub fn contains(&self, seq: u64) -> bool {
        (self.first_seq..self.last_seq).contains(&seq)
    }
}

/// List the archives of the buffer at `rb_path`, ordered by first sequence.
///
/// Files that do not follow the naming scheme (the sequence store, temporary
/// files) are skipped. A missing archive directory yields an empty list.
pub fn list_archives(rb_path: &Path) -> Result<Vec<(ArchiveName, PathBuf)>> {
    let dir = archive_dir(rb_path);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(RingBufError::io(&dir, "read directory")(e)),
    };

    let mut archives = Vec::new();
    for entry in entries {
        let entry = entry.map_err(RingBufError::io(&dir, "read directory"))?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        match ArchiveName::parse(name) {
            Ok(parsed) => archives.push((parsed, entry.path())),
            Err(_) => {
                tracing::trace!(file = %name, "Skipping non-archive file");
            }
        }
    }

    archives.sort_by_key(|(name, _)| (name.first_seq, name.last_seq));
    Ok(archives)
}

/// Format a float as C99 `%a` does: `0x1.8p+1`, `-0x1p-2`, `0x0p+0`, `inf`.
pub fn format_hex_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    let sign = if value.is_sign_negative() { "-" } else { "" };
    if value.is_infinite() {
        return format!("{}inf", sign);
    }

    let bits = value.to_bits();
    let biased_exp = ((bits >> 52) & 0x7ff) as i32;
    let mantissa = bits & ((1u64 << 52) - 1);

    if biased_exp == 0 && mantissa == 0 {
        return format!("{}0x0p+0", sign);
    }

    // Subnormals keep a zero leading digit and the minimum exponent.
    let (lead, exp) = if biased_exp == 0 {
        (0, -1022)
    } else {
        (1, biased_exp - 1023)
    };

    let digits = format!("{:013x}", mantissa);
    let digits = digits.trim_end_matches('0');
    if digits.is_empty() {
        format!("{}0x{}p{:+}", sign, lead, exp)
    } else {
        format!("{}0x{}.{}p{:+}", sign, lead, digits, exp)
    }
}

/// Parse a hexadecimal float as produced by [`format_hex_float`].
pub fn parse_hex_float(s: &str) -> Option<f64> {
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    let magnitude = match body {
        "nan" => f64::NAN,
        "inf" => f64::INFINITY,
        _ => {
            let body = body.strip_prefix("0x")?;
            let (mantissa, exp) = body.split_once('p')?;
            let exp: i32 = exp.parse().ok()?;
            let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
            if int_part.is_empty() || frac_part.len() > 13 {
                return None;
            }
            let int = u64::from_str_radix(int_part, 16).ok()?;
            let frac = if frac_part.is_empty() {
                0.0
            } else {
                let digits = u64::from_str_radix(frac_part, 16).ok()?;
                digits as f64 / 16f64.powi(frac_part.len() as i32)
            };
            (int as f64 + frac) * 2f64.powi(exp)
        }
    };

    Some(if negative { -magnitude } else { magnitude })
}
