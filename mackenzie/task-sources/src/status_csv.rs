//! Writes the `status.csv` summary every polling loop iteration, mirroring
//! the reference's `pandas.DataFrame(statuses).to_csv(...)`: each row is a
//! free-form set of named columns, and the file's header is the union of
//! every row's keys (rows missing a column get an empty cell).

use std::collections::BTreeMap;
use std::path::Path;

use mackenzie_core::error::{MackenzieError, Result};

pub type StatusRow = BTreeMap<String, String>;

pub fn write_status_csv(path: &Path, rows: &[StatusRow]) -> Result<()> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let mut writer = csv::Writer::from_path(path).map_err(|e| MackenzieError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
    writer
        .write_record(&columns)
        .map_err(|e| MackenzieError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

    for row in rows {
        let record: Vec<&str> = columns
            .iter()
            .map(|c| row.get(c).map(String::as_str).unwrap_or(""))
            .collect();
        writer
            .write_record(&record)
            .map_err(|e| MackenzieError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
    }

    writer
        .flush()
        .map_err(MackenzieError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_header_as_union_of_row_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.csv");

        let mut row1 = StatusRow::new();
        row1.insert("cell".to_string(), "cellA".to_string());
        row1.insert("best_y".to_string(), "0.5".to_string());

        let mut row2 = StatusRow::new();
        row2.insert("cell".to_string(), "cellB".to_string());

        write_status_csv(&path, &[row1, row2]).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next().unwrap(), "best_y,cell");
        assert_eq!(lines.next().unwrap(), "0.5,cellA");
        assert_eq!(lines.next().unwrap(), ",cellB");
    }
}
