//! Sniffs a calibration setup directory tree into the `CalibrationSetup`
//! data model: a set of cells, each with a parameter range and a set of
//! places, identified purely by which marker files/directories are present.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use mackenzie_core::error::{MackenzieError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamRange {
    pub name: String,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamRanges {
    pub parameters: Vec<ParamRange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationPlace {
    pub place_name: String,
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationCell {
    pub cell_name: String,
    pub param_ranges: ParamRanges,
    pub places: Vec<CalibrationPlace>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationSetup {
    pub setup_name: String,
    pub cells: Vec<CalibrationCell>,
}

pub fn is_epihiper_config_dir(p: &Path) -> bool {
    p.join("traits").exists()
        && p.join("initialization").exists()
        && p.join("intervention").exists()
        && p.join("diseaseModel").exists()
        && p.join("runParameters.json").exists()
}

pub fn is_calibration_cell_dir(p: &Path) -> bool {
    p.join("range.json").exists() && p.join("objective").exists() && p.join("updateParameter").exists()
}

fn read_priority(dir: &Path) -> Result<i32> {
    let priority_file = dir.join("priority");
    if !priority_file.exists() {
        return Ok(1);
    }
    let text = fs::read_to_string(&priority_file)?;
    text.trim()
        .parse()
        .map_err(|_| MackenzieError::Configuration(format!("invalid priority file: {}", priority_file.display())))
}

fn subdirs(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            out.push(entry.path());
        }
    }
    Ok(out)
}

pub fn parse_calibration_cell(dir_path: &Path) -> Result<CalibrationCell> {
    let cell_name = dir_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| MackenzieError::Configuration(format!("invalid cell directory: {}", dir_path.display())))?
        .to_string();

    let range_json = fs::read_to_string(dir_path.join("range.json"))?;
    let param_ranges: ParamRanges = serde_json::from_str(&range_json)?;

    let mut places = Vec::new();
    for child in subdirs(dir_path)? {
        if is_epihiper_config_dir(&child) {
            let place_name = child.file_name().unwrap().to_string_lossy().into_owned();
            let priority = read_priority(&child)?;
            places.push(CalibrationPlace { place_name, priority });
        }
    }

    Ok(CalibrationCell {
        cell_name,
        param_ranges,
        places,
    })
}

pub fn parse_calibration_setup(dir_path: &Path) -> Result<CalibrationSetup> {
    let setup_name = dir_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| MackenzieError::Configuration(format!("invalid setup directory: {}", dir_path.display())))?
        .to_string();

    let mut cells = Vec::new();
    for child in subdirs(dir_path)? {
        if is_calibration_cell_dir(&child) {
            cells.push(parse_calibration_cell(&child)?);
        }
    }

    Ok(CalibrationSetup { setup_name, cells })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch_file(p: &Path) {
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, b"").unwrap();
    }

    fn make_place(dir: &Path) {
        fs::create_dir_all(dir).unwrap();
        for sub in ["traits", "initialization", "intervention", "diseaseModel"] {
            fs::create_dir_all(dir.join(sub)).unwrap();
        }
        touch_file(&dir.join("runParameters.json"));
    }

    fn make_cell(dir: &Path, ranges: &ParamRanges) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("range.json"), serde_json::to_vec(ranges).unwrap()).unwrap();
        fs::create_dir_all(dir.join("objective")).unwrap();
        fs::create_dir_all(dir.join("updateParameter")).unwrap();
    }

    #[test]
    fn parses_cells_and_places_with_default_priority() {
        let dir = tempfile::tempdir().unwrap();
        let setup_dir = dir.path().join("my_setup");
        let ranges = ParamRanges {
            parameters: vec![ParamRange {
                name: "beta".to_string(),
                min: 0.0,
                max: 1.0,
            }],
        };
        let cell_dir = setup_dir.join("cellA");
        make_cell(&cell_dir, &ranges);
        make_place(&cell_dir.join("placeA"));

        let setup = parse_calibration_setup(&setup_dir).unwrap();
        assert_eq!(setup.setup_name, "my_setup");
        assert_eq!(setup.cells.len(), 1);
        assert_eq!(setup.cells[0].cell_name, "cellA");
        assert_eq!(setup.cells[0].places.len(), 1);
        assert_eq!(setup.cells[0].places[0].priority, 1);
    }

    #[test]
    fn reads_explicit_priority_file() {
        let dir = tempfile::tempdir().unwrap();
        let setup_dir = dir.path().join("my_setup");
        let ranges = ParamRanges {
            parameters: vec![ParamRange {
                name: "beta".to_string(),
                min: 0.0,
                max: 1.0,
            }],
        };
        let cell_dir = setup_dir.join("cellA");
        make_cell(&cell_dir, &ranges);
        let place_dir = cell_dir.join("placeA");
        make_place(&place_dir);
        fs::write(place_dir.join("priority"), b"7").unwrap();

        let setup = parse_calibration_setup(&setup_dir).unwrap();
        assert_eq!(setup.cells[0].places[0].priority, 7);
    }

    #[test]
    fn non_cell_directories_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let setup_dir = dir.path().join("my_setup");
        fs::create_dir_all(setup_dir.join("not_a_cell")).unwrap();

        let setup = parse_calibration_setup(&setup_dir).unwrap();
        assert!(setup.cells.is_empty());
    }
}
