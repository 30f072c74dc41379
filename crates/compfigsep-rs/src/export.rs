//! JSON export of figures carrying ground truth and predictions.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::Result;
use crate::params::ExportConfig;
use crate::types::Figure;

/// Directory used when neither a directory nor a file path is configured.
pub const DEFAULT_OUTPUT_DIR: &str = "output";

/// What the export step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Written(PathBuf),
    /// The export was skipped; the reason has been logged.
    Skipped(String),
}

/// Timestamped default file name, e.g. `compfigsep_experiment_2020-June-03_14:05:59.json`.
pub fn default_file_name() -> String {
    format!(
        "compfigsep_experiment_{}.json",
        chrono::Local::now().format("%Y-%B-%d_%H:%M:%S")
    )
}

/// Resolve the output path, `None` when the export should be skipped.
fn resolve_path(config: &ExportConfig) -> Option<PathBuf> {
    let dir = match (&config.output_dir, &config.file_name) {
        (Some(dir), _) => dir.clone(),
        (None, Some(file_name)) => {
            let parent = file_name.parent().unwrap_or_else(|| Path::new(""));
            if !parent.is_dir() {
                return None;
            }
            parent.to_path_buf()
        }
        (None, None) => PathBuf::from(DEFAULT_OUTPUT_DIR),
    };

    let file_name = match &config.file_name {
        Some(name) => name.file_name().map(PathBuf::from)?,
        None => PathBuf::from(default_file_name()),
    };
    Some(dir.join(file_name))
}

/// Write `figures` as one JSON object keyed by image file name.
///
/// Never overwrites: an existing output file skips the export. IO and
/// serialization failures are returned as errors.
pub fn export_figures_to_json(
    figures: &[Figure],
    config: &ExportConfig,
) -> Result<ExportOutcome> {
    let path = match resolve_path(config) {
        Some(p) => p,
        None => {
            let reason = format!("invalid export target {:?}", config.file_name);
            warn!("{}, aborting export", reason);
            return Ok(ExportOutcome::Skipped(reason));
        }
    };

    if path.exists() {
        let reason = format!("JSON output file already exists ({})", path.display());
        warn!("{}, aborting export", reason);
        return Ok(ExportOutcome::Skipped(reason));
    }

    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.is_dir() {
            fs::create_dir_all(dir)?;
        }
    }

    let output: BTreeMap<String, &Figure> = figures
        .iter()
        .map(|figure| (figure.image_filename(), figure))
        .collect();

    let file = fs::File::create(&path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &output)?;
    writer.flush()?;
    info!(path = %path.display(), figures = output.len(), "exported figures");
    Ok(ExportOutcome::Written(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BBox;
    use crate::types::{Label, Panel, SubFigure};

    fn figure() -> Figure {
        let mut figure = Figure::new(0, "imgs/fig_a.png", 100, 80);
        figure.gt_subfigures.push(SubFigure::new(
            Panel::new(BBox::new(0, 0, 50, 80)),
            Some(Label::new(Some(BBox::new(1, 1, 6, 6)), "A")),
        ));
        figure.detected_subfigures.push(SubFigure::new(
            Panel::detected(BBox::new(0, 0, 49, 80), 0.93),
            None,
        ));
        figure
    }

    #[test]
    fn test_export_writes_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExportConfig {
            output_dir: Some(dir.path().join("nested")),
            file_name: Some(PathBuf::from("run.json")),
        };
        let outcome = export_figures_to_json(&[figure()], &config).unwrap();
        let path = dir.path().join("nested").join("run.json");
        assert_eq!(outcome, ExportOutcome::Written(path.clone()));

        let text = fs::read_to_string(&path).unwrap();
        let back: BTreeMap<String, Figure> = serde_json::from_str(&text).unwrap();
        assert_eq!(back["fig_a.png"], figure());
        assert_eq!(back["fig_a.png"].detected_subfigures[0].panel.score, Some(0.93));
    }

    #[test]
    fn test_export_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        fs::write(&path, "{}").unwrap();
        let config = ExportConfig {
            output_dir: Some(dir.path().to_path_buf()),
            file_name: Some(PathBuf::from("run.json")),
        };
        let outcome = export_figures_to_json(&[figure()], &config).unwrap();
        assert!(matches!(outcome, ExportOutcome::Skipped(_)));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn test_export_uses_file_name_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExportConfig {
            output_dir: None,
            file_name: Some(dir.path().join("out.json")),
        };
        let outcome = export_figures_to_json(&[figure()], &config).unwrap();
        assert_eq!(outcome, ExportOutcome::Written(dir.path().join("out.json")));
    }

    #[test]
    fn test_export_skips_invalid_file_name_directory() {
        let config = ExportConfig {
            output_dir: None,
            file_name: Some(PathBuf::from("/nonexistent/dir/out.json")),
        };
        let outcome = export_figures_to_json(&[figure()], &config).unwrap();
        assert!(matches!(outcome, ExportOutcome::Skipped(_)));
    }

    #[test]
    fn test_default_file_name_shape() {
        let name = default_file_name();
        assert!(name.starts_with("compfigsep_experiment_"));
        assert!(name.ends_with(".json"));
    }
}
