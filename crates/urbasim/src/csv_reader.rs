use crate::constants::{DISTRIBUTION_HEADERS, DISTRICT_HEADERS, HISTORY_HEADERS};
use crate::budget::HistoryPoint;
use crate::distribution::{DistributionKind, DistributionTables, DistrictNorm, DistrictNorms};
use crate::error::{Result, UrbaSimError};
use crate::grid::Grid;

use csv::{ReaderBuilder, Trim};
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Reads a raster stored as a header-less CSV matrix.
///
/// Empty fields and `nan` are read as 0 (no-data cells of the preparation pipeline).
///
/// # Errors
/// `MissingLayer` when the file does not exist, `RasterRow` for ragged rows or
/// non-numeric fields.
pub fn read_raster<P: AsRef<Path>>(path: P, name: &str) -> Result<Grid<f64>> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(UrbaSimError::MissingLayer {
            name: name.to_string(),
            path: path.to_path_buf(),
        });
    }
    let file = File::open(path)?;
    read_raster_from_reader(file, name)
}

pub fn read_raster_from_reader<R: Read>(reader: R, name: &str) -> Result<Grid<f64>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut data = Vec::new();
    let mut cols = None;
    let mut rows = 0;

    for (i, result) in rdr.records().enumerate() {
        let rec = result?;
        if rec.iter().all(|f| f.is_empty()) {
            continue;
        }
        match cols {
            None => cols = Some(rec.len()),
            Some(n) if n != rec.len() => {
                return Err(UrbaSimError::RasterRow {
                    name: name.to_string(),
                    row: i + 1,
                    message: format!("expected {} columns, got {}", n, rec.len()),
                });
            }
            Some(_) => {}
        }
        for field in rec.iter() {
            data.push(parse_cell(field).ok_or_else(|| UrbaSimError::RasterRow {
                name: name.to_string(),
                row: i + 1,
                message: format!("'{}' is not a number", field),
            })?);
        }
        rows += 1;
    }

    let cols = cols.unwrap_or(0);
    Grid::from_vec(rows, cols, data).ok_or_else(|| UrbaSimError::RasterRow {
        name: name.to_string(),
        row: rows,
        message: "inconsistent raster size".to_string(),
    })
}

fn parse_cell(field: &str) -> Option<f64> {
    if field.is_empty() || field.eq_ignore_ascii_case("nan") {
        return Some(0.0);
    }
    field.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Rounds to non-negative integers.
pub fn to_counts(grid: &Grid<f64>) -> Grid<u32> {
    grid.map(|v| v.round().clamp(0.0, f64::from(u32::MAX)) as u32)
}

/// Positive values are `true`.
pub fn to_mask(grid: &Grid<f64>) -> Grid<bool> {
    grid.map(|v| v > 0.0)
}

/// Fails when `grid` does not have the reference shape.
pub fn check_shape<T>(grid: &Grid<T>, name: &str, rows: usize, cols: usize) -> Result<()>
where
    T: Copy,
{
    if grid.shape() == (rows, cols) {
        Ok(())
    } else {
        Err(UrbaSimError::ShapeMismatch {
            name: name.to_string(),
            rows,
            cols,
            got_rows: grid.rows(),
            got_cols: grid.cols(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct DistributionRecord {
    district: u32,
    value: u32,
    fitted: f64,
    unfit: f64,
}

#[derive(Debug, Deserialize)]
struct DistrictRecord {
    district: u32,
    m2_per_person: f64,
    residential_share: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct HistoryRecord {
    year: i32,
    population: f64,
    ground_area: f64,
}

/// Adds one `district,value,fitted,unfit` file to `tables`.
pub fn read_distribution_csv<P: AsRef<Path>>(
    path: P,
    kind: DistributionKind,
    tables: &mut DistributionTables,
) -> Result<()> {
    let path = path.as_ref();
    let records: Vec<DistributionRecord> = read_table(path, &DISTRIBUTION_HEADERS)?;
    for rec in records {
        tables.insert(rec.district, kind, rec.value, rec.fitted, rec.unfit)?;
    }
    Ok(())
}

/// Reads `district,m2_per_person,residential_share`.
pub fn read_districts_csv<P: AsRef<Path>>(path: P) -> Result<DistrictNorms> {
    let path = path.as_ref();
    let records: Vec<DistrictRecord> = read_table(path, &DISTRICT_HEADERS[..2])?;
    let mut norms = DistrictNorms::new();
    for (i, rec) in records.into_iter().enumerate() {
        let share = rec.residential_share.unwrap_or(1.0);
        if !(rec.m2_per_person > 0.0) || !(0.0..=1.0).contains(&share) {
            return Err(UrbaSimError::TableRow {
                path: path.to_path_buf(),
                row: i + 2,
                message: format!(
                    "district {} needs m2_per_person > 0 and residential_share in [0, 1]",
                    rec.district
                ),
            });
        }
        norms.insert(
            rec.district,
            DistrictNorm {
                m2_per_person: rec.m2_per_person,
                residential_share: share,
            },
        );
    }
    Ok(norms)
}

/// Reads `year,population,ground_area`.
pub fn read_history_csv<P: AsRef<Path>>(path: P) -> Result<Vec<HistoryPoint>> {
    let records: Vec<HistoryRecord> = read_table(path.as_ref(), &HISTORY_HEADERS)?;
    Ok(records
        .into_iter()
        .map(|r| HistoryPoint {
            year: r.year,
            population: r.population,
            ground_area: r.ground_area,
        })
        .collect())
}

fn read_table<T>(path: &Path, expected: &[&str]) -> Result<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
{
    if !path.is_file() {
        return Err(UrbaSimError::MissingLayer {
            name: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: path.to_path_buf(),
        });
    }
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_path(path)?;

    validate_headers(&mut rdr, path, expected)?;

    let mut records = Vec::new();
    for result in rdr.deserialize() {
        records.push(result?);
    }
    Ok(records)
}

/// Checks that the first columns carry the expected names, in order.
fn validate_headers<R: Read>(
    csv_reader: &mut csv::Reader<R>,
    path: &Path,
    expected: &[&str],
) -> Result<()> {
    let headers = csv_reader.headers().map_err(|e| UrbaSimError::CsvHeader {
        path: path.to_path_buf(),
        message: format!("Failed to read headers: {}", e),
    })?;

    for (i, name) in expected.iter().enumerate() {
        let found = headers.get(i).ok_or_else(|| UrbaSimError::CsvHeader {
            path: path.to_path_buf(),
            message: format!("Missing '{}' column at index {}", name, i),
        })?;
        if found != *name {
            return Err(UrbaSimError::CsvHeader {
                path: path.to_path_buf(),
                message: format!("Expected '{}' in column {}, found '{}'", name, i, found),
            });
        }
    }
    Ok(())
}
