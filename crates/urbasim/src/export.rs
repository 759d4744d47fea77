use crate::constants::{
    LAYER_ARTIF_RATE, LAYER_EXPANSION, LAYER_FLOOR, LAYER_FORCED_DENSIFICATION, LAYER_GROUND,
    LAYER_GROUND_RES, LAYER_HEATMAP, LAYER_OLD_DENSIFICATION, LAYER_POPULATION, LAYER_URBANIZED,
};
use crate::driver::YearOutcome;
use crate::error::{Result, UrbaSimError};
use crate::grid::Grid;
use crate::state::{Layers, UrbanState};
use csv::WriterBuilder;
use serde::Serialize;
use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

/// Formats one raster cell.
pub trait RasterValue: Copy {
    fn to_field(self) -> String;
}

impl RasterValue for u32 {
    fn to_field(self) -> String {
        self.to_string()
    }
}

impl RasterValue for f64 {
    fn to_field(self) -> String {
        format!("{:.6}", self)
    }
}

impl RasterValue for bool {
    fn to_field(self) -> String {
        if self { "1" } else { "0" }.to_string()
    }
}

/// Grid shape and georeference written next to the rasters.
#[derive(Debug, Clone, Serialize)]
pub struct RasterMetadata {
    pub rows: usize,
    pub cols: usize,
    pub cell_size: f64,
    pub projection: Option<String>,
    pub layers: Vec<String>,
}

pub fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| UrbaSimError::CreateDir {
        path: dir.to_path_buf(),
        source: e,
    })
}

fn create_file(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|e| UrbaSimError::CreateFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(BufWriter::new(file))
}

fn csv_builder() -> WriterBuilder {
    #[allow(unused_mut)]
    let mut builder = WriterBuilder::new();
    #[cfg(windows)]
    {
        use csv::Terminator;
        builder = builder.terminator(Terminator::CRLF);
    }
    builder
}

/// Writes `grid` as a header-less CSV matrix to `<dir>/<name>.csv`.
pub fn write_raster<T: RasterValue>(grid: &Grid<T>, dir: &Path, name: &str) -> Result<PathBuf> {
    let file_path = dir.join(format!("{name}.csv"));
    let writer = create_file(&file_path)?;
    let mut wtr = csv_builder().has_headers(false).from_writer(writer);

    for row in 0..grid.rows() {
        wtr.write_record(grid.row(row).iter().map(|&v| v.to_field()))?;
    }

    wtr.flush()?;
    Ok(file_path)
}

/// Writes every persistent layer of `state` into `dir`.
pub fn write_layers(state: &UrbanState, layers: &Layers, dir: &Path) -> Result<Vec<PathBuf>> {
    ensure_dir(dir)?;
    Ok(vec![
        write_raster(&state.built, dir, LAYER_URBANIZED)?,
        write_raster(&state.ground, dir, LAYER_GROUND)?,
        write_raster(&state.ground_res, dir, LAYER_GROUND_RES)?,
        write_raster(&state.floor, dir, LAYER_FLOOR)?,
        write_raster(&state.population, dir, LAYER_POPULATION)?,
        write_raster(
            &state.artificialization_rate(layers.cell_area()),
            dir,
            LAYER_ARTIF_RATE,
        )?,
        write_raster(&state.expansion, dir, LAYER_EXPANSION)?,
        write_raster(&state.forced_densification, dir, LAYER_FORCED_DENSIFICATION)?,
        write_raster(&state.old_densification, dir, LAYER_OLD_DENSIFICATION)?,
    ])
}

pub fn write_heatmap(heat: &Grid<u32>, dir: &Path) -> Result<PathBuf> {
    ensure_dir(dir)?;
    write_raster(heat, dir, LAYER_HEATMAP)
}

/// One row per simulated year.
pub fn write_years(outcomes: &[YearOutcome], dir: &Path) -> Result<PathBuf> {
    ensure_dir(dir)?;
    let file_path = dir.join("years.csv");
    let writer = create_file(&file_path)?;
    let mut wtr = csv_builder().from_writer(writer);
    for outcome in outcomes {
        wtr.serialize(outcome)?;
    }
    wtr.flush()?;
    Ok(file_path)
}

/// Pretty-printed JSON at `<dir>/<file_name>`.
pub fn write_json<T: Serialize>(value: &T, dir: &Path, file_name: &str) -> Result<PathBuf> {
    ensure_dir(dir)?;
    let file_path = dir.join(file_name);
    let writer = create_file(&file_path)?;
    serde_json::to_writer_pretty(writer, value)?;
    Ok(file_path)
}

pub fn write_metadata(layers: &Layers, dir: &Path) -> Result<PathBuf> {
    let (rows, cols) = layers.shape();
    let metadata = RasterMetadata {
        rows,
        cols,
        cell_size: layers.cell_size,
        projection: layers.projection.clone(),
        layers: [
            LAYER_URBANIZED,
            LAYER_GROUND,
            LAYER_GROUND_RES,
            LAYER_FLOOR,
            LAYER_POPULATION,
            LAYER_ARTIF_RATE,
            LAYER_EXPANSION,
            LAYER_FORCED_DENSIFICATION,
            LAYER_OLD_DENSIFICATION,
            LAYER_HEATMAP,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    };
    write_json(&metadata, dir, "metadata.json")
}

/// `<output_dir>/snapshots/<year>/`.
pub fn snapshot_dir(output_dir: &Path, year: i32) -> PathBuf {
    output_dir.join("snapshots").join(year.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layers() -> Layers {
        Layers {
            cell_size: 10.0,
            projection: Some("EPSG:2154".into()),
            district: Grid::filled(2, 2, 1),
            interest: Grid::filled(2, 2, 1.0),
            artif_ratio: Grid::new(2, 2),
            zoning_priority: Grid::new(2, 2),
            ecology: Grid::new(2, 2),
        }
    }

    #[test]
    fn test_write_raster_formats() {
        let temp_dir = TempDir::new().unwrap();
        let counts = Grid::from_vec(2, 2, vec![1u32, 2, 3, 4]).unwrap();
        let mask = Grid::from_vec(1, 3, vec![true, false, true]).unwrap();

        let path = write_raster(&counts, temp_dir.path(), "counts").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "1,2\n3,4\n");

        let path = write_raster(&mask, temp_dir.path(), "mask").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "1,0,1\n");
    }

    #[test]
    fn test_write_layers_and_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("nested").join("out");
        let mut state = UrbanState::with_capacity(Grid::filled(2, 2, 100));
        state.ground[(1, 1)] = 50;

        let written = write_layers(&state, &layers(), &out).unwrap();
        assert_eq!(written.len(), 9);
        for path in &written {
            assert!(path.exists());
        }
        let rate = std::fs::read_to_string(out.join("artificialization_rate.csv")).unwrap();
        assert_eq!(rate.lines().nth(1), Some("0.000000,0.500000"));

        let path = write_metadata(&layers(), &out).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["rows"], 2);
        assert_eq!(json["projection"], "EPSG:2154");
    }

    #[test]
    fn test_write_years_header() {
        let temp_dir = TempDir::new().unwrap();
        let outcomes = vec![YearOutcome {
            year: 2016,
            population_target: 10,
            housed: 10,
            ..Default::default()
        }];
        let path = write_years(&outcomes, temp_dir.path()).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        let mut lines = content.lines();
        assert!(lines.next().unwrap().starts_with("year,population_target,area_budget,housed"));
        assert!(lines.next().unwrap().starts_with("2016,10,0,10"));
    }

    #[test]
    fn test_snapshot_dir() {
        assert_eq!(
            snapshot_dir(Path::new("out"), 2020),
            PathBuf::from("out/snapshots/2020")
        );
    }

    #[test]
    fn test_invalid_output_directory() {
        let grid: Grid<u32> = Grid::new(1, 1);
        let result = write_raster(&grid, Path::new("/invalid/nonexistent/path"), "x");
        assert!(result.is_err());
        let e = result.unwrap_err();
        assert!(matches!(e, UrbaSimError::CreateFile { .. }), "Unexpected error: {e}");
        assert!(e.to_string().contains("Failed to create file"));
    }
}
