//! ROI import: rectangles in ImageJ convention.
//!
//! ```text
//! name,left,right,top,bottom
//! spot_1,120,180,40,90
//! ```
//!
//! `right` and `bottom` are exclusive.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;
use log::info;

use crate::error::DoseError;
use crate::film::Roi;
use crate::io::ingest::{build_header_map, get_required};

/// Load rectangular ROIs for a scan of `shape`.
pub fn load_rois(path: &Path, shape: (usize, usize)) -> Result<Vec<Roi>, DoseError> {
    let file = File::open(path)
        .map_err(|e| DoseError::Io(format!("Failed to open ROI file '{}': {e}", path.display())))?;
    let rois = read_rois(file, shape)?;
    info!("Read {} ROIs from {}", rois.len(), path.display());
    Ok(rois)
}

pub fn read_rois<R: Read>(reader: R, shape: (usize, usize)) -> Result<Vec<Roi>, DoseError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = reader
        .headers()
        .map_err(|e| DoseError::InvalidConfig(format!("Failed to read ROI headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    let mut rois: Vec<Roi> = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        let record = result.map_err(|e| DoseError::InvalidConfig(format!("ROI line {line}: {e}")))?;
        let name = field(&record, &header_map, line, "name")?.to_string();
        if rois.iter().any(|r| r.name() == name) {
            return Err(DoseError::InvalidConfig(format!("ROI line {line}: duplicate name '{name}'")));
        }
        let roi = Roi::rect(
            name,
            bound(&record, &header_map, line, "left")?,
            bound(&record, &header_map, line, "right")?,
            bound(&record, &header_map, line, "top")?,
            bound(&record, &header_map, line, "bottom")?,
            shape,
        )?;
        rois.push(roi);
    }

    if rois.is_empty() {
        return Err(DoseError::InsufficientData("ROI file lists no regions".to_string()));
    }
    Ok(rois)
}

fn field<'a>(
    record: &'a StringRecord,
    header_map: &HashMap<String, usize>,
    line: usize,
    name: &str,
) -> Result<&'a str, DoseError> {
    get_required(record, header_map, name).map_err(|e| DoseError::InvalidConfig(format!("ROI line {line}: {e}")))
}

fn bound(record: &StringRecord, header_map: &HashMap<String, usize>, line: usize, name: &str) -> Result<usize, DoseError> {
    let raw = field(record, header_map, line, name)?;
    raw.parse::<usize>()
        .map_err(|_| DoseError::InvalidConfig(format!("ROI line {line}: invalid `{name}` '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_rectangles() {
        let csv = "name,left,right,top,bottom\nA,0,2,0,1\nB,1,3,1,3\n";
        let rois = read_rois(csv.as_bytes(), (3, 3)).unwrap();
        assert_eq!(rois.len(), 2);
        assert_eq!(rois[0].name(), "A");
        assert_eq!(rois[0].len(), 2);
        assert_eq!(rois[1].len(), 4);
    }

    #[test]
    fn rejects_bad_rows() {
        let outside = "name,left,right,top,bottom\nA,0,9,0,1\n";
        assert!(matches!(read_rois(outside.as_bytes(), (3, 3)), Err(DoseError::InvalidScan(_))));
        let dup = "name,left,right,top,bottom\nA,0,1,0,1\nA,1,2,0,1\n";
        assert!(matches!(read_rois(dup.as_bytes(), (3, 3)), Err(DoseError::InvalidConfig(_))));
        let empty = "name,left,right,top,bottom\n";
        assert!(matches!(read_rois(empty.as_bytes(), (3, 3)), Err(DoseError::InsufficientData(_))));
    }
}
