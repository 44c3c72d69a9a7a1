//! Calibration point CSV ingest.
//!
//! Turns a dose/netOD table into `CalibrationPoint`s for one channel.
//!
//! Accepted layouts (headers are case-insensitive, a UTF-8 BOM is ignored):
//! - `dose,netod[,netod_sigma|weight]`: one channel per file
//! - `dose,red,green,blue[,red_sigma,...]`: the column named after the
//!   requested channel is used
//!
//! Rows that fail to parse are skipped and reported; a file with no usable
//! rows is an error.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;
use log::info;

use crate::domain::{CalibrationPoint, Channel};
use crate::error::DoseError;

/// Summary stats about the points actually used for fitting.
#[derive(Debug, Clone, Copy)]
pub struct DatasetStats {
    pub n_points: usize,
    pub dose_min: f64,
    pub dose_max: f64,
    pub netod_min: f64,
    pub netod_max: f64,
}

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct IngestedPoints {
    pub channel: Channel,
    /// Column the netOD values were read from.
    pub netod_column: String,
    pub points: Vec<CalibrationPoint>,
    pub stats: DatasetStats,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

/// Load calibration points for `channel` from a CSV file.
pub fn load_calibration_points(path: &Path, channel: Channel) -> Result<IngestedPoints, DoseError> {
    let file = File::open(path)
        .map_err(|e| DoseError::Io(format!("Failed to open CSV '{}': {e}", path.display())))?;
    let ingested = read_calibration_points(file, channel)?;
    info!(
        "Read {} calibration points ({} rows, {} skipped) for {} from {}",
        ingested.points.len(),
        ingested.rows_read,
        ingested.row_errors.len(),
        channel,
        path.display()
    );
    Ok(ingested)
}

pub fn read_calibration_points<R: Read>(reader: R, channel: Channel) -> Result<IngestedPoints, DoseError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| DoseError::InvalidConfig(format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    if !header_map.contains_key("dose") {
        return Err(DoseError::InvalidConfig("Missing required column: `dose`".to_string()));
    }
    let netod_column = if header_map.contains_key("netod") {
        "netod".to_string()
    } else if header_map.contains_key(channel.column_name()) {
        channel.column_name().to_string()
    } else {
        return Err(DoseError::InvalidConfig(format!(
            "Missing netOD column: expected `netod` or `{}`",
            channel.column_name()
        )));
    };
    let sigma_column = format!("{netod_column}_sigma");

    let mut points = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // records() starts after the header; CSV lines are 1-based.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        match parse_row(&record, &header_map, &netod_column, &sigma_column) {
            Ok(point) => points.push(point),
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    let stats = compute_stats(&points).ok_or_else(|| {
        DoseError::InsufficientData(format!(
            "No valid calibration rows ({rows_read} read, {} rejected)",
            row_errors.len()
        ))
    })?;

    Ok(IngestedPoints {
        channel,
        netod_column,
        points,
        stats,
        row_errors,
        rows_read,
    })
}

pub(crate) fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports often prefix the first header with a BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn parse_row(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    netod_column: &str,
    sigma_column: &str,
) -> Result<CalibrationPoint, String> {
    let dose = parse_f64(get_required(record, header_map, "dose")?, "dose")?;
    let netod = parse_f64(get_required(record, header_map, netod_column)?, netod_column)?;
    if dose < 0.0 {
        return Err(format!("Negative dose {dose}"));
    }

    if let Some(s) = get_optional(record, header_map, sigma_column) {
        let sigma = parse_f64(s, sigma_column)?;
        if sigma <= 0.0 {
            return Err(format!("Invalid `{sigma_column}` {sigma} (must be > 0)"));
        }
        return Ok(CalibrationPoint::with_netod_sigma(dose, netod, sigma));
    }
    if let Some(w) = get_optional(record, header_map, "weight") {
        let weight = parse_f64(w, "weight")?;
        if weight <= 0.0 {
            return Err(format!("Invalid `weight` {weight} (must be > 0)"));
        }
        return Ok(CalibrationPoint { dose, netod, weight });
    }
    Ok(CalibrationPoint::new(dose, netod))
}

fn compute_stats(points: &[CalibrationPoint]) -> Option<DatasetStats> {
    if points.is_empty() {
        return None;
    }
    let mut stats = DatasetStats {
        n_points: points.len(),
        dose_min: f64::INFINITY,
        dose_max: f64::NEG_INFINITY,
        netod_min: f64::INFINITY,
        netod_max: f64::NEG_INFINITY,
    };
    for p in points {
        stats.dose_min = stats.dose_min.min(p.dose);
        stats.dose_max = stats.dose_max.max(p.dose);
        stats.netod_min = stats.netod_min.min(p.netod);
        stats.netod_max = stats.netod_max.max(p.netod);
    }
    Some(stats)
}

pub(crate) fn get_required<'a>(
    record: &'a StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
) -> Result<&'a str, String> {
    let idx = header_map
        .get(name)
        .ok_or_else(|| format!("Missing required column: `{name}`"))?;
    record
        .get(*idx)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing required value: `{name}`"))
}

fn get_optional<'a>(record: &'a StringRecord, header_map: &HashMap<String, usize>, name: &str) -> Option<&'a str> {
    let idx = header_map.get(name)?;
    record.get(*idx).map(str::trim).filter(|s| !s.is_empty())
}

pub(crate) fn parse_f64(s: &str, name: &str) -> Result<f64, String> {
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(format!("Invalid `{name}` value '{s}'")),
    }
}
