//! Human-readable summaries of archives and frame dictionaries.

use std::fmt::{self, Write as _};
use std::fs;
use std::path::{Path, PathBuf};

use itertools::Itertools;

use crate::container::frames::{FrameDict, FrameValue, PickleObject};
use crate::container::{ArrayData, MotionArchive, with_array};
use crate::error::MotionResult;

const MIB: f64 = 1024.0 * 1024.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Detail {
    /// Field names only.
    Brief,
    #[default]
    Normal,
    /// Adds statistics and small previews.
    Verbose,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Population standard deviation; only for more than one element.
    pub std: Option<f64>,
}

impl Stats {
    fn of(data: &ArrayData) -> Option<Stats> {
        if !data.is_numeric() || data.is_empty() {
            return None;
        }
        let values = data.to_f64();
        let count = values.len() as f64;
        let (min, max) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let mean = values.sum() / count;
        let std = (values.len() > 1)
            .then(|| (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count).sqrt());
        Some(Stats { min, max, mean, std })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Preview {
    Values(Vec<String>),
    Head(Vec<String>),
    Matrix(Vec<Vec<String>>),
}

impl Preview {
    fn of(data: &ArrayData) -> Option<Preview> {
        let shape = data.shape();
        match *shape {
            [len] if len <= 10 => Some(Preview::Values(with_array!(data, a => a.iter().map(ToString::to_string).collect()))),
            [_] => Some(Preview::Head(with_array!(data, a => a.iter().take(5).map(ToString::to_string).collect()))),
            [rows, cols] if rows <= 5 && cols <= 5 => Some(Preview::Matrix(with_array!(data, a => a
                .outer_iter()
                .map(|row| row.iter().map(ToString::to_string).collect::<Vec<_>>())
                .collect()))),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldSummary {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: &'static str,
    pub size: usize,
    pub nbytes: usize,
    pub stats: Option<Stats>,
    pub preview: Option<Preview>,
}

/// Summary of every field of a loaded archive.
#[derive(Clone, Debug, PartialEq)]
pub struct ArchiveReport {
    pub path: PathBuf,
    pub fields: Vec<FieldSummary>,
    pub skipped: Vec<String>,
    pub total_bytes: usize,
}

impl ArchiveReport {
    pub fn new(archive: &MotionArchive, path: impl Into<PathBuf>) -> Self {
        let fields = archive
            .iter()
            .map(|(name, data)| FieldSummary {
                name: name.to_string(),
                shape: data.shape().to_vec(),
                dtype: data.dtype(),
                size: data.len(),
                nbytes: data.nbytes(),
                stats: Stats::of(data),
                preview: Preview::of(data),
            })
            .collect();
        ArchiveReport {
            path: path.into(),
            fields,
            skipped: archive.skipped.clone(),
            total_bytes: archive.total_bytes(),
        }
    }

    pub fn keys(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn render(&self, detail: Detail) -> String {
        let rule = "=".repeat(50);
        let mut out = String::new();
        let _ = writeln!(out, "Loaded: {}", self.path.display());
        let _ = writeln!(out, "Total arrays: {}", self.fields.len());
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Keys: [{}]", self.keys().join(", "));
        if !self.skipped.is_empty() {
            let _ = writeln!(out, "Skipped (unsupported element type): [{}]", self.skipped.join(", "));
        }

        if detail != Detail::Brief {
            let _ = writeln!(out, "\n{rule}\nDETAILED INFORMATION:\n{rule}");
            for field in &self.fields {
                let _ = writeln!(out, "\nKey: {}", field.name);
                let _ = writeln!(out, "   Shape: {}", shape_tuple(&field.shape));
                let _ = writeln!(out, "   Dtype: {}", field.dtype);
                let _ = writeln!(out, "   Size: {} elements", field.size);
                let _ = writeln!(out, "   Dimensions: {}D", field.shape.len());
                let _ = writeln!(
                    out,
                    "   Memory: {} bytes ({:.2} MB)",
                    field.nbytes,
                    field.nbytes as f64 / MIB
                );
                if detail == Detail::Verbose {
                    render_verbose(&mut out, field);
                }
            }
        }

        let _ = writeln!(out, "\nTotal size: {:.2} MB", self.total_bytes as f64 / MIB);
        out
    }
}

fn render_verbose(out: &mut String, field: &FieldSummary) {
    if let Some(stats) = &field.stats {
        let _ = writeln!(out, "   Min: {:.6}", stats.min);
        let _ = writeln!(out, "   Max: {:.6}", stats.max);
        let _ = writeln!(out, "   Mean: {:.6}", stats.mean);
        if let Some(std) = stats.std {
            let _ = writeln!(out, "   Std: {std:.6}");
        }
    }
    match &field.preview {
        Some(Preview::Values(values)) => {
            let _ = writeln!(out, "   Values: [{}]", values.join(" "));
        }
        Some(Preview::Head(values)) => {
            let _ = writeln!(out, "   First 5 values: [{}] ...", values.join(" "));
        }
        Some(Preview::Matrix(rows)) => {
            let _ = writeln!(out, "   Matrix:");
            for row in rows {
                let _ = writeln!(out, "     [{}]", row.join(" "));
            }
        }
        None => {}
    }
}

fn shape_tuple(shape: &[usize]) -> String {
    match shape {
        [len] => format!("({len},)"),
        _ => format!("({})", shape.iter().join(", ")),
    }
}

/// Writes the archive's field names, one per line.
pub fn save_keys(path: impl AsRef<Path>, archive: &MotionArchive) -> MotionResult<()> {
    let mut out = String::new();
    for name in archive.names() {
        out.push_str(&name);
        out.push('\n');
    }
    fs::write(path, out)?;
    Ok(())
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeySummary {
    pub key: String,
    pub type_name: &'static str,
    pub details: Vec<(&'static str, String)>,
}

impl KeySummary {
    fn new(key: &str, value: &FrameValue) -> Self {
        KeySummary {
            key: key.to_string(),
            type_name: value.type_name(),
            details: describe(key, value),
        }
    }
}

fn describe(key: &str, value: &FrameValue) -> Vec<(&'static str, String)> {
    let lower = key.to_lowercase();
    let mut details = Vec::new();
    match value {
        FrameValue::Array(array) => {
            let shape = array.shape();
            details.push(("shape", shape_tuple(shape)));
            details.push(("dtype", "float64".to_string()));
            details.push(("elements", array.len().to_string()));
            match *shape {
                [len] => details.push(("description", format!("1-D array of length {len}"))),
                [rows, cols] => {
                    details.push(("description", format!("2-D array, {rows} rows x {cols} columns")));
                    if lower.contains("frame") || lower.contains("pose") {
                        details.push(("likely", format!("{rows} frames, {cols} features per frame")));
                    }
                }
                _ => {}
            }
        }
        FrameValue::List(items) => {
            details.push(("length", items.len().to_string()));
            if let Some(first) = items.first() {
                details.push(("element type", first.type_name().to_string()));
                match first {
                    FrameValue::Array(a) => details.push(("element shape", shape_tuple(a.shape()))),
                    FrameValue::List(inner) => details.push(("element length", inner.len().to_string())),
                    _ => {}
                }
                if let Some(second) = items.get(1) {
                    details.push(("first two same type", (first.type_name() == second.type_name()).to_string()));
                    if let (Some(a), Some(b)) = (first.sequence_len(), second.sequence_len()) {
                        details.push(("first two same length", (a == b).to_string()));
                    }
                }
            }
        }
        FrameValue::Int(_) | FrameValue::Float(_) => {
            let shown = scalar(value);
            if lower.contains("fps") {
                details.push(("value", shown.clone()));
                details.push(("description", format!("frame rate ({shown} frames/s)")));
            } else if lower.contains("loop") {
                details.push(("value", shown.clone()));
                details.push(("description", format!("loop mode ({shown})")));
            } else {
                details.push(("value", shown));
            }
        }
        FrameValue::Text(text) => {
            details.push(("value", format!("'{text}'")));
            details.push(("length", format!("{} characters", text.chars().count())));
        }
        FrameValue::Bool(v) => details.push(("value", v.to_string())),
        FrameValue::Dict(dict) => details.push(("entries", dict.len().to_string())),
        FrameValue::None => details.push(("value", "None".to_string())),
        FrameValue::Other(description) => details.push(("value", description.clone())),
    }
    details
}

fn scalar(value: &FrameValue) -> String {
    match value {
        FrameValue::Int(v) => v.to_string(),
        FrameValue::Float(v) => format!("{v:?}"),
        other => other.type_name().to_string(),
    }
}

/// Summary of a decoded pickle.
#[derive(Clone, Debug, PartialEq)]
pub enum FramesReport {
    Dict { path: PathBuf, keys: Vec<KeySummary> },
    Other { path: PathBuf, summary: KeySummary },
}

impl FramesReport {
    pub fn new(object: &PickleObject, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match object {
            PickleObject::Dict(dict) => FramesReport::Dict {
                path,
                keys: dict.iter().map(|(key, value)| KeySummary::new(key, value)).collect(),
            },
            PickleObject::Other(value) => FramesReport::Other {
                path,
                summary: KeySummary::new("", value),
            },
        }
    }

    /// Structure of the `frames` entry, if the dictionary has one.
    pub fn frames_analysis(dict: &FrameDict) -> Option<FramesAnalysis> {
        let frames = dict.get("frames")?;
        let fps = dict.get("fps").and_then(FrameValue::as_f64);
        Some(FramesAnalysis::new(frames, fps))
    }
}

impl fmt::Display for FramesReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(70);
        match self {
            FramesReport::Dict { path, keys } => {
                writeln!(f, "File: {}", path.display())?;
                writeln!(f, "{rule}")?;
                writeln!(f, "Structure: dict ({} keys)", keys.len())?;
                writeln!(f, "{rule}")?;
                for (i, summary) in keys.iter().enumerate() {
                    writeln!(f, "\n{}. key: '{}'", i + 1, summary.key)?;
                    writeln!(f, "   type: {}", summary.type_name)?;
                    for (label, value) in &summary.details {
                        writeln!(f, "   {label}: {value}")?;
                    }
                }
            }
            FramesReport::Other { path, summary } => {
                writeln!(f, "File: {}", path.display())?;
                writeln!(f, "{rule}")?;
                writeln!(f, "Structure: {}", summary.type_name)?;
                writeln!(f, "{rule}")?;
                for (label, value) in &summary.details {
                    writeln!(f, "  {label}: {value}")?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FramesAnalysis {
    pub frame_count: usize,
    pub fps: Option<f64>,
    /// `(label, value)` lines describing the first frame.
    pub first_frame: Vec<(&'static str, String)>,
    pub consistency: Option<String>,
}

impl FramesAnalysis {
    fn new(frames: &FrameValue, fps: Option<f64>) -> Self {
        let mut first_frame = Vec::new();
        let mut consistency = None;
        let frame_count = frames.sequence_len().unwrap_or(0);

        match frames {
            FrameValue::Array(array) if frame_count > 0 => {
                let frame_shape = &array.shape()[1..];
                first_frame.push(("type", "array".to_string()));
                first_frame.push(("shape", shape_tuple(frame_shape)));
                let sampled = frame_count.min(5);
                consistency = Some(format!("first {sampled} frames share shape {}", shape_tuple(frame_shape)));
            }
            FrameValue::List(items) if !items.is_empty() => {
                let first = &items[0];
                first_frame.push(("type", first.type_name().to_string()));
                if let Some(len) = first.sequence_len() {
                    first_frame.push(("length", len.to_string()));
                }
                if let FrameValue::List(elements) = first {
                    if let Some(element) = elements.first() {
                        first_frame.push(("element type", element.type_name().to_string()));
                        if let Some(len) = element.sequence_len() {
                            first_frame.push(("element length", len.to_string()));
                        }
                    }
                }
                let sampled = items.len().min(10);
                let lengths: Vec<usize> = items[..sampled].iter().filter_map(FrameValue::sequence_len).unique().collect();
                consistency = match lengths.as_slice() {
                    [] => None,
                    [len] => Some(format!("first {sampled} frames have length {len}")),
                    lengths => Some(format!("first {sampled} frames differ in length: {lengths:?}")),
                };
            }
            _ => {}
        }

        FramesAnalysis {
            frame_count,
            fps,
            first_frame,
            consistency,
        }
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.fps
            .filter(|&fps| fps > 0.0)
            .map(|fps| self.frame_count as f64 / fps)
    }
}

impl fmt::Display for FramesAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\nFRAMES STRUCTURE")?;
        writeln!(f, "{}", "=".repeat(70))?;
        writeln!(f, "total frames: {}", self.frame_count)?;
        if let Some(fps) = self.fps {
            writeln!(f, "fps: {fps}")?;
        }
        if let Some(duration) = self.duration_seconds() {
            writeln!(f, "duration: {duration:.2} s")?;
            if duration > 60.0 {
                writeln!(f, "          ({:.2} min)", duration / 60.0)?;
            }
        }
        if self.frame_count == 0 {
            writeln!(f, "frames is empty")?;
            return Ok(());
        }
        for (label, value) in &self.first_frame {
            writeln!(f, "first frame {label}: {value}")?;
        }
        if let Some(consistency) = &self.consistency {
            writeln!(f, "\nconsistency: {consistency}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array1, ArrayD, IxDyn, array};
    use serde_pickle::{HashableValue, SerOptions, Value};

    use super::*;
    use crate::container::frames;

    fn archive() -> MotionArchive {
        let mut archive = MotionArchive::new();
        archive.insert("fps", array![50_i64].into_dyn());
        archive.insert("joint_pos", array![[1.0_f32, 2.0], [3.0, 4.0]].into_dyn());
        archive.insert("long", Array1::from_iter((0..12).map(f64::from)).into_dyn());
        archive.insert("body_pos_w", ArrayD::<f64>::zeros(IxDyn(&[2, 3, 3])));
        archive
    }

    #[test]
    fn field_statistics_use_population_std() {
        let report = ArchiveReport::new(&archive(), "clip.npz");
        let joint = &report.fields[1];
        let stats = joint.stats.as_ref().unwrap();
        assert_eq!((stats.min, stats.max, stats.mean), (1.0, 4.0, 2.5));
        assert_eq!(stats.std, Some(1.25_f64.sqrt()));
        assert_eq!(report.fields[0].stats.as_ref().unwrap().std, None);
        assert_eq!(report.total_bytes, 8 + 16 + 96 + 144);
    }

    #[test]
    fn previews_depend_on_shape() {
        let report = ArchiveReport::new(&archive(), "clip.npz");
        assert_eq!(report.fields[0].preview, Some(Preview::Values(vec!["50".into()])));
        assert_eq!(
            report.fields[2].preview,
            Some(Preview::Head(vec!["0".into(), "1".into(), "2".into(), "3".into(), "4".into()]))
        );
        assert!(matches!(report.fields[1].preview, Some(Preview::Matrix(ref rows)) if rows.len() == 2));
        assert_eq!(report.fields[3].preview, None);
    }

    #[test]
    fn brief_render_lists_keys_only() {
        let report = ArchiveReport::new(&archive(), "clip.npz");
        let brief = report.render(Detail::Brief);
        assert!(brief.contains("Keys: [fps, joint_pos, long, body_pos_w]"));
        assert!(!brief.contains("Shape:"));

        let normal = report.render(Detail::Normal);
        assert!(normal.contains("   Shape: (2, 3, 3)"));
        assert!(normal.contains("   Shape: (1,)"));
        assert!(!normal.contains("Mean:"));

        let verbose = report.render(Detail::Verbose);
        assert!(verbose.contains("   Mean: 2.500000"));
        assert!(verbose.contains("   First 5 values: [0 1 2 3 4] ..."));
    }

    #[test]
    fn keys_are_saved_one_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.txt");
        save_keys(&path, &archive()).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "fps\njoint_pos\nlong\nbody_pos_w\n"
        );
    }

    fn dict(entries: Vec<(&str, Value)>) -> FrameDict {
        let map = entries
            .into_iter()
            .map(|(k, v)| (HashableValue::String(k.to_string()), v))
            .collect();
        let bytes = serde_pickle::value_to_vec(&Value::Dict(map), SerOptions::new()).unwrap();
        match frames::from_reader(bytes.as_slice()).unwrap() {
            PickleObject::Dict(dict) => dict,
            other => panic!("expected a dict, got {other:?}"),
        }
    }

    fn rows(rows: usize, cols: usize) -> Value {
        Value::List(
            (0..rows)
                .map(|_| Value::List((0..cols).map(|c| Value::F64(c as f64)).collect()))
                .collect(),
        )
    }

    #[test]
    fn key_summaries_describe_values() {
        let dict = dict(vec![
            ("fps", Value::F64(30.0)),
            ("name", Value::String("walk".into())),
            ("pose_aa", rows(4, 6)),
        ]);
        let report = FramesReport::new(&PickleObject::Dict(dict), "clip.pkl");
        let text = report.to_string();
        assert!(text.contains("Structure: dict (3 keys)"));
        assert!(text.contains("description: frame rate (30.0 frames/s)"));
        assert!(text.contains("value: 'walk'"));
        assert!(text.contains("length: 4 characters"));
        assert!(text.contains("description: 2-D array, 4 rows x 6 columns"));
        assert!(text.contains("likely: 4 frames, 6 features per frame"));
    }

    #[test]
    fn non_dict_reports_type() {
        let object = PickleObject::Other(FrameValue::Text("hello".into()));
        let text = FramesReport::new(&object, "x.pkl").to_string();
        assert!(text.contains("Structure: str"));
    }

    #[test]
    fn frames_analysis_of_rectangular_frames() {
        let dict = dict(vec![("fps", Value::I64(1)), ("frames", rows(90, 3))]);
        let analysis = FramesReport::frames_analysis(&dict).unwrap();
        assert_eq!(analysis.frame_count, 90);
        assert_eq!(analysis.duration_seconds(), Some(90.0));
        let text = analysis.to_string();
        assert!(text.contains("(1.50 min)"));
        assert!(text.contains("first frame shape: (3,)"));
        assert!(text.contains("first 5 frames share shape (3,)"));
    }

    #[test]
    fn frames_analysis_of_ragged_frames() {
        let ragged = Value::List(vec![
            Value::List(vec![Value::F64(1.0), Value::F64(2.0)]),
            Value::List(vec![Value::F64(1.0)]),
        ]);
        let dict = dict(vec![("frames", ragged)]);
        let analysis = FramesReport::frames_analysis(&dict).unwrap();
        assert_eq!(analysis.frame_count, 2);
        assert_eq!(analysis.consistency.as_deref(), Some("first 2 frames differ in length: [2, 1]"));
    }

    #[test]
    fn frames_analysis_needs_frames_key() {
        assert!(FramesReport::frames_analysis(&dict(vec![("fps", Value::I64(30))])).is_none());
    }
}
