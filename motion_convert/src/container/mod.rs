//! The persisted forms of a motion: compressed `.npz` trajectory archives,
//! pickled frame dictionaries and flat CSV files.

pub mod archive;
pub mod flat;
pub mod frames;
mod pickle;

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{ArrayD, Ix2};

use crate::error::{MotionError, MotionResult};
use crate::mapping::{IndexMapping, reorder};

/// An n-dimensional array tagged with its element type.
#[derive(Clone, Debug, PartialEq)]
pub enum ArrayData {
    F64(ArrayD<f64>),
    F32(ArrayD<f32>),
    I64(ArrayD<i64>),
    I32(ArrayD<i32>),
    U8(ArrayD<u8>),
    Bool(ArrayD<bool>),
}

macro_rules! with_array {
    ($data:expr, $array:ident => $body:expr) => {
        match $data {
            ArrayData::F64($array) => $body,
            ArrayData::F32($array) => $body,
            ArrayData::I64($array) => $body,
            ArrayData::I32($array) => $body,
            ArrayData::U8($array) => $body,
            ArrayData::Bool($array) => $body,
        }
    };
}

macro_rules! map_array {
    ($data:expr, $array:ident => $body:expr) => {
        match $data {
            ArrayData::F64($array) => ArrayData::F64($body),
            ArrayData::F32($array) => ArrayData::F32($body),
            ArrayData::I64($array) => ArrayData::I64($body),
            ArrayData::I32($array) => ArrayData::I32($body),
            ArrayData::U8($array) => ArrayData::U8($body),
            ArrayData::Bool($array) => ArrayData::Bool($body),
        }
    };
}

pub(crate) use with_array;

impl ArrayData {
    /// NumPy name of the element type.
    pub fn dtype(&self) -> &'static str {
        match self {
            ArrayData::F64(_) => "float64",
            ArrayData::F32(_) => "float32",
            ArrayData::I64(_) => "int64",
            ArrayData::I32(_) => "int32",
            ArrayData::U8(_) => "uint8",
            ArrayData::Bool(_) => "bool",
        }
    }

    pub fn item_size(&self) -> usize {
        match self {
            ArrayData::F64(_) | ArrayData::I64(_) => 8,
            ArrayData::F32(_) | ArrayData::I32(_) => 4,
            ArrayData::U8(_) | ArrayData::Bool(_) => 1,
        }
    }

    pub fn shape(&self) -> &[usize] {
        with_array!(self, a => a.shape())
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn len(&self) -> usize {
        with_array!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn nbytes(&self) -> usize {
        self.len() * self.item_size()
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, ArrayData::Bool(_))
    }

    /// Values widened to `f64`; booleans become 0 or 1.
    pub fn to_f64(&self) -> ArrayD<f64> {
        match self {
            ArrayData::F64(a) => a.clone(),
            ArrayData::F32(a) => a.mapv(f64::from),
            ArrayData::I64(a) => a.mapv(|v| v as f64),
            ArrayData::I32(a) => a.mapv(f64::from),
            ArrayData::U8(a) => a.mapv(f64::from),
            ArrayData::Bool(a) => a.mapv(|v| if v { 1.0 } else { 0.0 }),
        }
    }

    /// Reorders the columns of a 2-D array, keeping its element type.
    pub fn reorder_columns(&self, mapping: &IndexMapping) -> MotionResult<ArrayData> {
        if self.ndim() != 2 {
            return Err(MotionError::shape(
                "columns",
                format!("expected a 2-D array, got shape {:?}", self.shape()),
            ));
        }
        let reordered = map_array!(self, a => {
            let matrix = a.view().into_dimensionality::<Ix2>().map_err(|e| MotionError::shape("columns", e.to_string()))?;
            reorder(matrix, mapping).into_dyn()
        });
        Ok(reordered)
    }
}

impl From<ArrayD<f64>> for ArrayData {
    fn from(array: ArrayD<f64>) -> Self {
        ArrayData::F64(array)
    }
}

impl From<ArrayD<f32>> for ArrayData {
    fn from(array: ArrayD<f32>) -> Self {
        ArrayData::F32(array)
    }
}

impl From<ArrayD<i64>> for ArrayData {
    fn from(array: ArrayD<i64>) -> Self {
        ArrayData::I64(array)
    }
}

/// Named arrays in file order, as stored in an `.npz` archive.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MotionArchive {
    fields: Vec<(String, ArrayData)>,
    /// Fields present in the file that could not be materialized.
    pub skipped: Vec<String>,
}

impl MotionArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a field, keeping the position of a replaced field.
    pub fn insert(&mut self, name: impl Into<String>, data: impl Into<ArrayData>) {
        let name = name.into();
        let data = data.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = data,
            None => self.fields.push((name, data)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ArrayData> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, data)| data)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArrayData)> {
        self.fields.iter().map(|(name, data)| (name.as_str(), data))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.fields.iter().map(|(_, data)| data.nbytes()).sum()
    }

    /// Returns the field, an `UnsupportedField` error if it was skipped on
    /// load, or a `MissingFields` error listing what is available.
    pub fn require(&self, name: &str) -> MotionResult<&ArrayData> {
        if let Some(data) = self.get(name) {
            return Ok(data);
        }
        if self.was_skipped(name) {
            return Err(MotionError::UnsupportedField {
                field: name.to_string(),
                reason: "present in the file but not a numeric array".to_string(),
            });
        }
        Err(MotionError::MissingFields {
            missing: vec![name.to_string()],
            available: self.names(),
        })
    }

    pub fn was_skipped(&self, name: &str) -> bool {
        self.skipped.iter().any(|skipped| skipped == name)
    }
}

/// Sibling path a file is written to before it is renamed into place.
pub(crate) fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

/// Lets `write` fill one partial file per target, then renames them into
/// place. On error every partial file is removed, and so are targets that
/// were already renamed, so no target is left holding part of the output.
pub(crate) fn commit<F>(targets: &[&Path], write: F) -> MotionResult<()>
where
    F: FnOnce(&[PathBuf]) -> MotionResult<()>,
{
    let partials: Vec<PathBuf> = targets.iter().map(|target| partial_path(target)).collect();
    let result = write(&partials).and_then(|()| rename_all(targets, &partials));
    if result.is_err() {
        for partial in &partials {
            let _ = fs::remove_file(partial);
        }
    }
    result
}

fn rename_all(targets: &[&Path], partials: &[PathBuf]) -> MotionResult<()> {
    for (done, (target, partial)) in targets.iter().zip(partials).enumerate() {
        if let Err(e) = fs::rename(partial, target) {
            for renamed in &targets[..done] {
                let _ = fs::remove_file(renamed);
            }
            return Err(e.into());
        }
    }
    Ok(())
}
