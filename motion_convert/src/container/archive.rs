//! Compressed `.npz` trajectory archives.

use std::fs::File;
use std::io::{BufWriter, Read, Seek};
use std::path::Path;

use ndarray::{ArrayD, IxDyn, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter, ReadNpyError, ReadNpzError, ReadableElement};

use super::{ArrayData, MotionArchive, with_array};
use crate::error::{MotionError, MotionResult};

#[derive(Clone, Copy, Debug, Default)]
pub struct ReadOptions {
    /// Skip fields whose element type cannot be loaded (pickled object
    /// arrays, strings) instead of failing the whole read.
    pub allow_pickle: bool,
}

pub fn read(path: impl AsRef<Path>) -> MotionResult<MotionArchive> {
    read_with(path, ReadOptions::default())
}

pub fn read_with(path: impl AsRef<Path>, options: ReadOptions) -> MotionResult<MotionArchive> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| MotionError::open(path, e))?;
    let mut npz = NpzReader::new(file)?;
    let mut archive = MotionArchive::new();
    for entry in npz.names()? {
        let name = entry.strip_suffix(".npy").unwrap_or(&entry).to_string();
        match read_field(&mut npz, &entry) {
            Ok(data) => {
                tracing::debug!(field = %name, shape = ?data.shape(), dtype = data.dtype(), "loaded field");
                archive.insert(name, data);
            }
            Err(FieldError::Unsupported(reason)) if options.allow_pickle => {
                tracing::warn!("skipping field '{name}': {reason}");
                archive.skipped.push(name);
            }
            Err(FieldError::Unsupported(reason)) => {
                return Err(MotionError::UnsupportedField {
                    field: name,
                    reason: format!("{reason} (pass --allow-pickle to skip it)"),
                });
            }
            Err(FieldError::Read(e)) => return Err(e.into()),
        }
    }
    tracing::info!(path = %path.display(), fields = archive.len(), "loaded archive");
    Ok(archive)
}

enum FieldError {
    Unsupported(String),
    Read(ReadNpzError),
}

fn read_field<R: Read + Seek>(npz: &mut NpzReader<R>, name: &str) -> Result<ArrayData, FieldError> {
    let mut descriptors = Vec::new();
    macro_rules! attempt {
        ($elem:ty, $variant:ident) => {
            match by_name::<R, $elem>(npz, name) {
                Ok(array) => return Ok(ArrayData::$variant(array)),
                Err(ReadNpzError::Npy(ReadNpyError::WrongDescriptor(descriptor))) => {
                    descriptors.push(descriptor.to_string());
                }
                Err(e) => return Err(FieldError::Read(e)),
            }
        };
    }
    attempt!(f64, F64);
    attempt!(f32, F32);
    attempt!(i64, I64);
    attempt!(i32, I32);
    attempt!(u8, U8);
    attempt!(bool, Bool);
    Err(FieldError::Unsupported(format!(
        "unsupported element type {}",
        descriptors.last().map(String::as_str).unwrap_or("?")
    )))
}

fn by_name<R: Read + Seek, A: ReadableElement>(
    npz: &mut NpzReader<R>,
    name: &str,
) -> Result<ArrayD<A>, ReadNpzError> {
    npz.by_name::<OwnedRepr<A>, IxDyn>(name)
}

/// Writes a compressed archive. The data goes to a sibling temporary file that
/// is renamed over `path` once complete, so a failure leaves nothing behind.
pub fn write(path: impl AsRef<Path>, archive: &MotionArchive) -> MotionResult<()> {
    let path = path.as_ref();
    super::commit(&[path], |partials| {
        partials.iter().try_for_each(|partial| write_to(partial, archive))
    })?;
    tracing::info!(path = %path.display(), fields = archive.len(), "wrote archive");
    Ok(())
}

fn write_to(path: &Path, archive: &MotionArchive) -> MotionResult<()> {
    let mut npz = NpzWriter::new_compressed(BufWriter::new(File::create(path)?));
    for (name, data) in archive.iter() {
        with_array!(data, array => npz.add_array(name, array)?);
    }
    npz.finish()?
        .into_inner()
        .map_err(|e| MotionError::Io(e.into_error()))?;
    Ok(())
}
