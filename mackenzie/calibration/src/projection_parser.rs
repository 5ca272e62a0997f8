//! Sniffs a projection setup directory tree: like a calibration setup but
//! without parameter ranges, and every subdirectory of the setup root is a
//! cell regardless of its contents (places are still marker-detected).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use mackenzie_core::error::{MackenzieError, Result};

use crate::setup_parser::is_epihiper_config_dir;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionPlace {
    pub place_name: String,
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionCell {
    pub cell_name: String,
    pub places: Vec<ProjectionPlace>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionSetup {
    pub setup_name: String,
    pub cells: Vec<ProjectionCell>,
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

pub fn parse_projection_cell(dir_path: &Path) -> Result<ProjectionCell> {
    let cell_name = dir_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| MackenzieError::Configuration(format!("invalid cell directory: {}", dir_path.display())))?
        .to_string();

    let mut places = Vec::new();
    for child in subdirs(dir_path)? {
        if is_epihiper_config_dir(&child) {
            let place_name = child.file_name().unwrap().to_string_lossy().into_owned();
            let priority = read_priority(&child)?;
            places.push(ProjectionPlace { place_name, priority });
        }
    }

    Ok(ProjectionCell { cell_name, places })
}

pub fn parse_projection_setup(dir_path: &Path) -> Result<ProjectionSetup> {
    let setup_name = dir_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| MackenzieError::Configuration(format!("invalid setup directory: {}", dir_path.display())))?
        .to_string();

    let mut cells = Vec::new();
    for child in subdirs(dir_path)? {
        cells.push(parse_projection_cell(&child)?);
    }

    Ok(ProjectionSetup { setup_name, cells })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_place(dir: &Path) {
        fs::create_dir_all(dir).unwrap();
        for sub in ["traits", "initialization", "intervention", "diseaseModel"] {
            fs::create_dir_all(dir.join(sub)).unwrap();
        }
        fs::write(dir.join("runParameters.json"), b"{}").unwrap();
    }

    #[test]
    fn every_subdirectory_is_a_cell() {
        let dir = tempfile::tempdir().unwrap();
        let setup_dir = dir.path().join("setup");
        make_place(&setup_dir.join("cellA").join("placeA"));
        fs::create_dir_all(setup_dir.join("cellB")).unwrap();

        let setup = parse_projection_setup(&setup_dir).unwrap();
        assert_eq!(setup.cells.len(), 2);
        let cell_a = setup.cells.iter().find(|c| c.cell_name == "cellA").unwrap();
        assert_eq!(cell_a.places.len(), 1);
        let cell_b = setup.cells.iter().find(|c| c.cell_name == "cellB").unwrap();
        assert!(cell_b.places.is_empty());
    }
}
