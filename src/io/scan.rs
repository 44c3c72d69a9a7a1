//! Scan loading.
//!
//! Scans arrive through a `ScanLoader` so image decoders can be plugged in
//! without touching extraction. The shipped loader reads a long-format CSV:
//!
//! ```text
//! row,col,red,green,blue
//! 0,0,41230,38011,30544
//! 0,1,41187,37990,30561
//! ```
//!
//! Any non-empty subset of the channel columns may be present. Every pixel of
//! the `(max_row + 1) x (max_col + 1)` grid must appear exactly once.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use log::info;
use nalgebra::DMatrix;

use crate::domain::Channel;
use crate::error::DoseError;
use crate::film::Scan;
use crate::io::ingest::{build_header_map, get_required, parse_f64};

/// Source of scans.
pub trait ScanLoader {
    fn load_scan(&self, path: &Path) -> Result<Scan, DoseError>;
}

/// Long-format CSV scans.
#[derive(Debug, Clone, Copy)]
pub struct CsvScanLoader {
    pub bit_depth: u8,
}

impl Default for CsvScanLoader {
    fn default() -> Self {
        Self { bit_depth: 16 }
    }
}

impl ScanLoader for CsvScanLoader {
    fn load_scan(&self, path: &Path) -> Result<Scan, DoseError> {
        let file = File::open(path)
            .map_err(|e| DoseError::Io(format!("Failed to open scan '{}': {e}", path.display())))?;
        let scan = read_scan_csv(file, self.bit_depth)
            .map_err(|e| DoseError::InvalidScan(format!("{}: {e}", path.display())))?;
        info!(
            "Loaded scan {} ({}x{}, channels {:?})",
            path.display(),
            scan.shape().0,
            scan.shape().1,
            scan.channels()
        );
        Ok(scan)
    }
}

pub fn read_scan_csv<R: Read>(reader: R, bit_depth: u8) -> Result<Scan, DoseError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = reader
        .headers()
        .map_err(|e| DoseError::InvalidScan(format!("Failed to read scan headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    for col in ["row", "col"] {
        if !header_map.contains_key(col) {
            return Err(DoseError::InvalidScan(format!("Missing required column: `{col}`")));
        }
    }
    let channels: Vec<Channel> = Channel::ALL
        .into_iter()
        .filter(|c| header_map.contains_key(c.column_name()))
        .collect();
    if channels.is_empty() {
        return Err(DoseError::InvalidScan(
            "Scan CSV has none of the `red`, `green`, `blue` columns".to_string(),
        ));
    }

    let mut pixels: Vec<((usize, usize), Vec<f64>)> = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        let record = result.map_err(|e| DoseError::InvalidScan(format!("line {line}: {e}")))?;
        let row_err = |msg: String| DoseError::InvalidScan(format!("line {line}: {msg}"));

        let r = parse_index(get_required(&record, &header_map, "row").map_err(row_err)?, "row").map_err(row_err)?;
        let c = parse_index(get_required(&record, &header_map, "col").map_err(row_err)?, "col").map_err(row_err)?;
        let mut values = Vec::with_capacity(channels.len());
        for ch in &channels {
            let name = ch.column_name();
            let raw = get_required(&record, &header_map, name).map_err(row_err)?;
            values.push(parse_f64(raw, name).map_err(row_err)?);
        }
        pixels.push(((r, c), values));
    }

    let rows = pixels.iter().map(|((r, _), _)| r + 1).max().unwrap_or(0);
    let cols = pixels.iter().map(|((_, c), _)| c + 1).max().unwrap_or(0);
    if rows * cols != pixels.len() {
        return Err(DoseError::InvalidScan(format!(
            "{} pixel rows do not cover a {rows}x{cols} grid exactly once",
            pixels.len()
        )));
    }

    let mut planes: Vec<DMatrix<f64>> = vec![DMatrix::from_element(rows, cols, f64::NAN); channels.len()];
    let mut seen = DMatrix::from_element(rows, cols, false);
    for ((r, c), values) in pixels {
        if seen[(r, c)] {
            return Err(DoseError::InvalidScan(format!("pixel ({r}, {c}) listed twice")));
        }
        seen[(r, c)] = true;
        for (plane, v) in planes.iter_mut().zip(values) {
            plane[(r, c)] = v;
        }
    }

    Scan::new(bit_depth, channels.into_iter().zip(planes).collect())
}

/// Write `scan` in the long format read by `read_scan_csv`.
pub fn write_scan_csv(path: &Path, scan: &Scan) -> Result<(), DoseError> {
    let file = File::create(path)
        .map_err(|e| DoseError::Io(format!("Failed to create scan '{}': {e}", path.display())))?;
    let mut out = BufWriter::new(file);
    write_scan_rows(&mut out, scan)
        .map_err(|e| DoseError::Io(format!("Failed to write scan '{}': {e}", path.display())))?;
    info!("Wrote scan {}", path.display());
    Ok(())
}

pub fn write_scan_rows<W: Write>(out: &mut W, scan: &Scan) -> std::io::Result<()> {
    let channels = scan.channels();
    let planes: Vec<_> = channels.iter().filter_map(|&c| scan.plane(c).ok()).collect();
    let names: Vec<&str> = channels.iter().map(|c| c.column_name()).collect();
    writeln!(out, "row,col,{}", names.join(","))?;

    let (rows, cols) = scan.shape();
    for r in 0..rows {
        for c in 0..cols {
            let values: Vec<String> = planes.iter().map(|p| p[(r, c)].to_string()).collect();
            writeln!(out, "{r},{c},{}", values.join(","))?;
        }
    }
    out.flush()
}

fn parse_index(s: &str, name: &str) -> Result<usize, String> {
    s.parse::<usize>()
        .map_err(|_| format!("Invalid `{name}` index '{s}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_long_format_scan() {
        let csv = "row,col,red,green\n0,0,100,200\n0,1,110,210\n1,0,120,220\n1,1,130,230\n";
        let scan = read_scan_csv(csv.as_bytes(), 8).unwrap();
        assert_eq!(scan.shape(), (2, 2));
        assert_eq!(scan.channels(), vec![Channel::Red, Channel::Green]);
        assert_eq!(scan.plane(Channel::Red).unwrap()[(1, 0)], 120.0);
        assert_eq!(scan.plane(Channel::Green).unwrap()[(0, 1)], 210.0);
        assert!(scan.plane(Channel::Blue).is_err());
    }

    #[test]
    fn incomplete_or_duplicate_pixels_fail() {
        let missing = "row,col,red\n0,0,1\n1,1,1\n";
        assert!(matches!(read_scan_csv(missing.as_bytes(), 16), Err(DoseError::InvalidScan(_))));
        let duplicate = "row,col,red\n0,0,1\n0,0,1\n";
        assert!(matches!(read_scan_csv(duplicate.as_bytes(), 16), Err(DoseError::InvalidScan(_))));
    }

    #[test]
    fn values_are_checked_against_bit_depth() {
        let csv = "row,col,blue\n0,0,300\n";
        assert!(read_scan_csv(csv.as_bytes(), 8).is_err());
        assert!(read_scan_csv(csv.as_bytes(), 16).is_ok());
    }

    #[test]
    fn written_scan_reads_back() {
        let scan = Scan::from_rows(16, Channel::Green, &[vec![1.0, 2.5], vec![3.0, 40000.0]]).unwrap();
        let mut buf = Vec::new();
        write_scan_rows(&mut buf, &scan).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("row,col,green\n0,0,1\n0,1,2.5\n"));
        assert_eq!(read_scan_csv(text.as_bytes(), 16).unwrap(), scan);
    }

    #[test]
    fn loader_reports_missing_file() {
        let err = CsvScanLoader::default()
            .load_scan(Path::new("/nonexistent/scan.csv"))
            .unwrap_err();
        assert!(matches!(err, DoseError::Io(_)));
    }
}
