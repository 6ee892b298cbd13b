//! Flat CSV motion files: `x, y, z, qx, qy, qz, qw` followed by one column per
//! joint in the robot's flat-file order, six decimals, one row per frame.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use ndarray::{Array2, ArrayView2, Axis, s};

use crate::error::MotionResult;
use crate::mapping::IndexMapping;
use crate::registry::{ROOT_COLUMNS, Representation, RobotVariant};

/// Column range of the root quaternion (XYZW).
pub const QUAT_COLUMNS: std::ops::Range<usize> = 3..7;

/// An assembled flat motion matrix for one robot.
#[derive(Clone, Debug, PartialEq)]
pub struct FlatMotion {
    pub data: Array2<f64>,
    pub variant: RobotVariant,
}

impl FlatMotion {
    pub fn frame_count(&self) -> usize {
        self.data.nrows()
    }
}

/// The column count did not match the robot's layout and was corrected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaWarning {
    pub expected: usize,
    pub found: usize,
}

impl std::fmt::Display for SchemaWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.found < self.expected {
            write!(
                f,
                "expected {} columns but found {}; zero-padding columns {}..{}",
                self.expected, self.found, self.found, self.expected
            )
        } else {
            write!(
                f,
                "expected {} columns but found {}; dropping columns {}..{}",
                self.expected, self.found, self.expected, self.found
            )
        }
    }
}

/// Zero-pads or truncates `data` on the right to exactly `expected` columns.
pub fn fit_columns(data: ArrayView2<'_, f64>, expected: usize) -> (Array2<f64>, Option<SchemaWarning>) {
    let found = data.ncols();
    if found == expected {
        return (data.to_owned(), None);
    }
    let mut fitted = Array2::zeros((data.nrows(), expected));
    let kept = found.min(expected);
    fitted
        .slice_mut(s![.., ..kept])
        .assign(&data.slice(s![.., ..kept]));
    (fitted, Some(SchemaWarning { expected, found }))
}

/// Path of the companion file describing the columns of `csv_path`.
pub fn joint_order_path(csv_path: &Path) -> PathBuf {
    let stem = csv_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    csv_path.with_file_name(format!("{stem}_joint_order.txt"))
}

/// Formats every row with six decimals.
pub fn to_csv(data: ArrayView2<'_, f64>) -> String {
    let mut out = String::with_capacity(data.len() * 10);
    for row in data.axis_iter(Axis(0)) {
        out.push_str(&row.iter().map(|v| format!("{v:.6}")).join(","));
        out.push('\n');
    }
    out
}

/// Writes the CSV and its `_joint_order.txt` companion. Returns the companion path.
///
/// Both files are staged next to their targets and renamed into place only
/// once both are complete.
pub fn write(csv_path: impl AsRef<Path>, motion: &FlatMotion) -> MotionResult<PathBuf> {
    let csv_path = csv_path.as_ref();
    let order_path = joint_order_path(csv_path);
    let csv = to_csv(motion.data.view());
    let order = joint_order_report(motion.variant);
    super::commit(&[csv_path, order_path.as_path()], |partials| {
        for (partial, contents) in partials.iter().zip([csv, order]) {
            fs::write(partial, contents)?;
        }
        Ok(())
    })?;
    tracing::info!(
        path = %csv_path.display(),
        rows = motion.data.nrows(),
        columns = motion.data.ncols(),
        "wrote flat motion"
    );
    Ok(order_path)
}

/// Human-readable listing of the flat-file columns and their simulator indices.
pub fn joint_order_report(variant: RobotVariant) -> String {
    let flat = variant.joint_names(Representation::FlatFile);
    let simulator = variant.joint_names(Representation::Simulator);
    let to_simulator = IndexMapping::build(simulator, flat).mapping;
    let rule = "-".repeat(40);

    let mut out = String::new();
    let _ = writeln!(out, "Joint order ({variant})");
    let _ = writeln!(out, "{}\n", "=".repeat(60));

    let _ = writeln!(out, "Flat-file joint order:\n{rule}");
    for (i, joint) in flat.iter().enumerate() {
        let _ = writeln!(out, "column {}: {joint}", i + ROOT_COLUMNS);
    }

    let _ = writeln!(out, "\n\nSimulator joint order:\n{rule}");
    for (i, joint) in simulator.iter().enumerate() {
        let _ = writeln!(out, "index {i}: {joint}");
    }

    let _ = writeln!(out, "\n\nMapping:\n{rule}");
    let _ = writeln!(out, "flat column -> simulator index -> flat joint -> simulator joint");
    for (i, source) in to_simulator.iter().enumerate() {
        if let Some(index) = source {
            let _ = writeln!(
                out,
                "column {} -> simulator index {index} -> {} -> {}",
                i + ROOT_COLUMNS,
                flat[i],
                simulator[index]
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, array};

    use super::*;
    use crate::error::MotionError;

    #[test]
    fn pads_narrow_matrices_with_zeros() {
        let data = Array2::from_elem((2, 30), 1.5);
        let (fitted, warning) = fit_columns(data.view(), RobotVariant::G1.flat_column_count());
        assert_eq!(fitted.dim(), (2, 36));
        assert!(fitted.slice(s![.., ..30]).iter().all(|&v| v == 1.5));
        assert!(fitted.slice(s![.., 30..]).iter().all(|&v| v == 0.0));
        assert_eq!(warning, Some(SchemaWarning { expected: 36, found: 30 }));
    }

    #[test]
    fn truncates_wide_matrices() {
        let data = Array2::from_shape_fn((2, 40), |(_, c)| c as f64);
        let (fitted, warning) = fit_columns(data.view(), 36);
        assert_eq!(fitted.dim(), (2, 36));
        assert_eq!(fitted[[1, 35]], 35.0);
        assert_eq!(warning, Some(SchemaWarning { expected: 36, found: 40 }));
    }

    #[test]
    fn matching_width_has_no_warning() {
        let data = Array2::<f64>::zeros((1, 30));
        assert_eq!(fit_columns(data.view(), 30).1, None);
    }

    #[test]
    fn csv_uses_six_decimals() {
        let data = array![[0.0, -1.25, 0.85], [1.0 / 3.0, 2.0, 1e-7]];
        assert_eq!(
            to_csv(data.view()),
            "0.000000,-1.250000,0.850000\n0.333333,2.000000,0.000000\n"
        );
    }

    #[test]
    fn companion_file_sits_next_to_csv() {
        assert_eq!(
            joint_order_path(Path::new("/tmp/out/walk.csv")),
            PathBuf::from("/tmp/out/walk_joint_order.txt")
        );
    }

    #[test]
    fn joint_order_report_maps_every_column() {
        let report = joint_order_report(RobotVariant::M3);
        assert!(report.contains("column 7: left_hip_pitch_joint"));
        assert!(report.contains("index 2: waist_yaw"));
        assert!(report.contains("column 19 -> simulator index 2 -> waist_yaw_joint -> waist_yaw"));
        assert_eq!(report.matches(" -> simulator index ").count(), 23);
    }

    #[test]
    fn written_csv_holds_every_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.csv");
        let motion = FlatMotion {
            data: Array2::from_shape_fn((3, 30), |(r, c)| (r * 30 + c) as f64 * 0.5),
            variant: RobotVariant::M3,
        };
        let order_path = write(&path, &motion).unwrap();
        assert!(order_path.exists());

        let text = fs::read_to_string(&path).unwrap();
        let values: Vec<f64> = text
            .lines()
            .flat_map(|line| line.split(','))
            .map(|field| field.parse().unwrap())
            .collect();
        assert_eq!(Array2::from_shape_vec((3, 30), values).unwrap(), motion.data);
    }

    #[test]
    fn failed_write_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("walk.csv");
        // A directory in place of the companion makes its rename fail.
        fs::create_dir(dir.path().join("walk_joint_order.txt")).unwrap();
        let motion = FlatMotion {
            data: Array2::zeros((2, 30)),
            variant: RobotVariant::M3,
        };

        assert!(matches!(write(&path, &motion), Err(MotionError::Io(_))));
        assert!(!path.exists());
        let partials = fs::read_dir(dir.path())
            .unwrap()
            .filter(|entry| entry.as_ref().unwrap().file_name().to_string_lossy().ends_with(".partial"))
            .count();
        assert_eq!(partials, 0);
    }
}
