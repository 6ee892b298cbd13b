//! Pickled frame dictionaries (`.pkl`).
//!
//! The dictionary is decoded into plain values: rectangular numeric lists
//! and NumPy arrays become `f64` arrays, everything else is kept only as far
//! as needed to describe it. Arrays with a non-numeric dtype (strings,
//! objects, records) decode to `FrameValue::Other`.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use ndarray::{Array2, ArrayD, ArrayView2, Ix2, IxDyn, ShapeBuilder};

use super::pickle::{self, Call, Object};
use crate::error::{MotionError, MotionResult};

/// Containers nested deeper than this are not decoded.
const MAX_DEPTH: usize = 64;

const MULTIARRAY: [&str; 2] = ["numpy.core.multiarray", "numpy._core.multiarray"];
const NUMERIC: [&str; 2] = ["numpy.core.numeric", "numpy._core.numeric"];

#[derive(Clone, Debug, PartialEq)]
pub enum FrameValue {
    Array(ArrayD<f64>),
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    List(Vec<FrameValue>),
    Dict(FrameDict),
    None,
    Other(String),
}

impl FrameValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            FrameValue::Array(_) => "array",
            FrameValue::Int(_) => "int",
            FrameValue::Float(_) => "float",
            FrameValue::Bool(_) => "bool",
            FrameValue::Text(_) => "str",
            FrameValue::List(_) => "list",
            FrameValue::Dict(_) => "dict",
            FrameValue::None => "NoneType",
            FrameValue::Other(_) => "object",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FrameValue::Int(v) => Some(*v as f64),
            FrameValue::Float(v) => Some(*v),
            FrameValue::Array(a) if a.len() == 1 => a.iter().next().copied(),
            _ => None,
        }
    }

    /// Number of items for sequences; the leading dimension for arrays.
    pub fn sequence_len(&self) -> Option<usize> {
        match self {
            FrameValue::Array(a) => a.shape().first().copied(),
            FrameValue::List(items) => Some(items.len()),
            _ => None,
        }
    }

    fn from_object(object: &Object, depth: usize) -> Self {
        if depth > MAX_DEPTH {
            return FrameValue::Other(format!("{} nested too deeply", object.type_name()));
        }
        match object {
            Object::None => FrameValue::None,
            Object::Bool(v) => FrameValue::Bool(*v),
            Object::Int(v) => FrameValue::Int(*v),
            Object::BigInt(bytes) => FrameValue::Other(format!("int ({} bytes)", bytes.len())),
            Object::Float(v) => FrameValue::Float(*v),
            Object::Text(text) => FrameValue::Text(text.to_string()),
            Object::Bytes(bytes) => FrameValue::Other(format!("bytes ({} bytes)", bytes.len())),
            Object::Tuple(_) | Object::List(_) => {
                let items = object.items().unwrap_or_default();
                sequence(items.iter().map(|item| FrameValue::from_object(item, depth + 1)).collect())
            }
            Object::Dict(entries) => FrameValue::Dict(FrameDict::from_entries(&entries.borrow(), depth)),
            Object::Set(items) => FrameValue::Other(format!("set ({} items)", items.borrow().len())),
            Object::Global(global) => FrameValue::Other(format!("type {}.{}", global.module, global.name)),
            Object::Call(call) => decode_call(&call.borrow()),
        }
    }
}

fn sequence(items: Vec<FrameValue>) -> FrameValue {
    match stack(&items) {
        Some(array) => FrameValue::Array(array),
        None => FrameValue::List(items),
    }
}

/// Numbers become a 1-D array; arrays sharing one shape gain a leading axis.
fn stack(items: &[FrameValue]) -> Option<ArrayD<f64>> {
    let Some(FrameValue::Array(first)) = items.first() else {
        let values = items
            .iter()
            .map(|item| match item {
                FrameValue::Int(v) => Some(*v as f64),
                FrameValue::Float(v) => Some(*v),
                _ => None,
            })
            .collect::<Option<Vec<f64>>>()?;
        return ArrayD::from_shape_vec(IxDyn(&[values.len()]), values).ok();
    };

    let mut shape = vec![items.len()];
    shape.extend_from_slice(first.shape());
    let mut values = Vec::with_capacity(items.len() * first.len());
    for item in items {
        match item {
            FrameValue::Array(array) if array.shape() == first.shape() => values.extend(array.iter().copied()),
            _ => return None,
        }
    }
    ArrayD::from_shape_vec(IxDyn(&shape), values).ok()
}

fn decode_call(call: &Call) -> FrameValue {
    let Object::Global(callable) = &call.callable else {
        return FrameValue::Other(format!("{} object", call.callable.type_name()));
    };
    if callable.is(&MULTIARRAY, "_reconstruct") {
        return match ndarray_state(call) {
            Ok(array) => FrameValue::Array(array),
            Err(reason) => FrameValue::Other(format!("numpy.ndarray ({reason})")),
        };
    }
    if callable.is(&NUMERIC, "_frombuffer") {
        return match frombuffer_args(call) {
            Ok(array) => FrameValue::Array(array),
            Err(reason) => FrameValue::Other(format!("numpy.ndarray ({reason})")),
        };
    }
    if callable.is(&MULTIARRAY, "scalar") {
        return numpy_scalar(call).unwrap_or_else(|reason| FrameValue::Other(format!("numpy scalar ({reason})")));
    }
    FrameValue::Other(format!("{}.{} object", callable.module, callable.name))
}

/// Rebuilds an array from the `(version, shape, dtype, is_fortran, data)`
/// state passed to `ndarray.__setstate__`.
fn ndarray_state(call: &Call) -> Result<ArrayD<f64>, String> {
    let state = call.state.as_ref().and_then(Object::items).ok_or("no array state")?;
    let state = match state.len() {
        5 => &state[1..],
        4 => &state[..],
        n => return Err(format!("array state has {n} items")),
    };
    let shape = dims(&state[0])?;
    let dtype = Dtype::from_object(&state[1])?;
    let fortran = state[2].as_int().ok_or("order flag is not a bool")? != 0;
    build_array(shape, dtype, fortran, &state[3])
}

/// Protocol 5 form: `_frombuffer(buffer, dtype, shape, order)`.
fn frombuffer_args(call: &Call) -> Result<ArrayD<f64>, String> {
    let [data, dtype, shape, order, ..] = call.args.as_slice() else {
        return Err(format!("{} arguments", call.args.len()));
    };
    let shape = dims(shape)?;
    let dtype = Dtype::from_object(dtype)?;
    build_array(shape, dtype, order.as_text() == Some("F"), data)
}

fn dims(shape: &Object) -> Result<Vec<usize>, String> {
    shape
        .items()
        .and_then(|dims| {
            dims.iter()
                .map(|dim| dim.as_int().and_then(|dim| usize::try_from(dim).ok()))
                .collect::<Option<Vec<usize>>>()
        })
        .ok_or_else(|| "shape is not a tuple of sizes".to_string())
}

fn build_array(shape: Vec<usize>, dtype: Dtype, fortran: bool, data: &Object) -> Result<ArrayD<f64>, String> {
    let bytes = raw_bytes(data).ok_or_else(|| format!("{dtype} data is not a byte string"))?;
    let values = dtype.decode(&bytes)?;

    let expected: usize = shape.iter().product();
    if values.len() != expected {
        return Err(format!("{} values for shape {shape:?}", values.len()));
    }
    let array = if fortran {
        ArrayD::from_shape_vec(IxDyn(&shape).f(), values)
    } else {
        ArrayD::from_shape_vec(IxDyn(&shape), values)
    };
    array.map_err(|e| e.to_string())
}

fn numpy_scalar(call: &Call) -> Result<FrameValue, String> {
    let [dtype, data, ..] = call.args.as_slice() else {
        return Err(format!("{} arguments", call.args.len()));
    };
    let dtype = Dtype::from_object(dtype)?;
    let bytes = raw_bytes(data).ok_or("data is not a byte string")?;
    let values = dtype.decode(&bytes)?;
    let [value] = values.as_slice() else {
        return Err(format!("{} values", values.len()));
    };
    Ok(match dtype.kind {
        'f' => FrameValue::Float(*value),
        'b' => FrameValue::Bool(*value != 0.0),
        _ => FrameValue::Int(*value as i64),
    })
}

/// Bytes, or text that stands for bytes: protocol 2 pickles write them as
/// `_codecs.encode(text, 'latin1')`, protocol 0 as a latin-1 string.
fn raw_bytes(object: &Object) -> Option<Vec<u8>> {
    match object {
        Object::Bytes(bytes) => Some(bytes.to_vec()),
        Object::Text(text) => latin1(text),
        Object::Call(call) => {
            let call = call.borrow();
            let encoded = match (&call.callable, call.args.first()) {
                (Object::Global(codec), Some(Object::Text(text))) if codec.is(&["_codecs"], "encode") => latin1(text),
                _ => None,
            };
            encoded
        }
        _ => None,
    }
}

fn latin1(text: &str) -> Option<Vec<u8>> {
    text.chars().map(|c| u8::try_from(c).ok()).collect()
}

/// A NumPy array-protocol type such as `<f8`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Dtype {
    kind: char,
    size: usize,
    big_endian: bool,
}

impl Dtype {
    /// Reads a pickled `numpy.dtype(descr, align, copy)` whose `BUILD` state
    /// carries the byte order as its second item.
    fn from_object(object: &Object) -> Result<Self, String> {
        let Object::Call(call) = object else {
            return Err(format!("dtype is a {}", object.type_name()));
        };
        let call = call.borrow();
        let descr = call.args.first().and_then(Object::as_text).ok_or("dtype has no descriptor")?;
        let order = call
            .state
            .as_ref()
            .and_then(Object::items)
            .and_then(|state| state.get(1).and_then(Object::as_text).map(str::to_string));
        Dtype::parse(descr, order.as_deref())
    }

    fn parse(descr: &str, order: Option<&str>) -> Result<Self, String> {
        let (prefix, rest) = match descr.chars().next() {
            Some(c @ ('<' | '>' | '|' | '=')) => (Some(c), &descr[1..]),
            _ => (None, descr),
        };
        let order = prefix.or_else(|| order.and_then(|order| order.chars().next()));
        let mut chars = rest.chars();
        let kind = chars.next().ok_or("empty dtype")?;
        let size = chars
            .as_str()
            .parse()
            .map_err(|_| format!("unsupported dtype '{descr}'"))?;
        Ok(Dtype {
            kind,
            size,
            big_endian: order == Some('>'),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<f64>, String> {
        let values = match (self.kind, self.size) {
            ('f', 8) => self.words(bytes)?.into_iter().map(f64::from_le_bytes).collect(),
            ('f', 4) => self.words(bytes)?.into_iter().map(|w| f64::from(f32::from_le_bytes(w))).collect(),
            ('i', 8) => self.words(bytes)?.into_iter().map(|w| i64::from_le_bytes(w) as f64).collect(),
            ('i', 4) => self.words(bytes)?.into_iter().map(|w| f64::from(i32::from_le_bytes(w))).collect(),
            ('i', 2) => self.words(bytes)?.into_iter().map(|w| f64::from(i16::from_le_bytes(w))).collect(),
            ('i', 1) => bytes.iter().map(|&b| f64::from(b as i8)).collect(),
            ('u', 8) => self.words(bytes)?.into_iter().map(|w| u64::from_le_bytes(w) as f64).collect(),
            ('u', 4) => self.words(bytes)?.into_iter().map(|w| f64::from(u32::from_le_bytes(w))).collect(),
            ('u', 2) => self.words(bytes)?.into_iter().map(|w| f64::from(u16::from_le_bytes(w))).collect(),
            ('u', 1) => bytes.iter().map(|&b| f64::from(b)).collect(),
            ('b', 1) => bytes.iter().map(|&b| if b != 0 { 1.0 } else { 0.0 }).collect(),
            _ => return Err(format!("dtype {self} is not numeric")),
        };
        Ok(values)
    }

    /// Splits `bytes` into little-endian items of `N` bytes.
    fn words<const N: usize>(&self, bytes: &[u8]) -> Result<Vec<[u8; N]>, String> {
        if bytes.len() % N != 0 {
            return Err(format!("{} bytes do not divide into {self} items", bytes.len()));
        }
        Ok(bytes
            .chunks_exact(N)
            .map(|chunk| {
                let mut word = [0; N];
                word.copy_from_slice(chunk);
                if self.big_endian {
                    word.reverse();
                }
                word
            })
            .collect())
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order = if self.big_endian { '>' } else { '<' };
        write!(f, "{order}{}{}", self.kind, self.size)
    }
}

/// String-keyed mapping decoded from a pickled `dict`, in insertion order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameDict {
    entries: Vec<(String, FrameValue)>,
}

impl FrameDict {
    fn from_entries(entries: &[(Object, Object)], depth: usize) -> Self {
        let mut dict = FrameDict::default();
        for (key, value) in entries {
            let key = key_text(key);
            let value = FrameValue::from_object(value, depth + 1);
            match dict.entries.iter_mut().find(|(existing, _)| *existing == key) {
                Some(slot) => slot.1 = value,
                None => dict.entries.push((key, value)),
            }
        }
        dict
    }

    pub fn get(&self, key: &str) -> Option<&FrameValue> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FrameValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn key_text(key: &Object) -> String {
    match key {
        Object::Text(text) => text.to_string(),
        Object::Int(v) => v.to_string(),
        Object::Float(v) => v.to_string(),
        Object::Bool(true) => "True".to_string(),
        Object::Bool(false) => "False".to_string(),
        Object::None => "None".to_string(),
        other => format!("<{}>", other.type_name()),
    }
}

/// The decoded top-level object of a pickle file.
#[derive(Clone, Debug, PartialEq)]
pub enum PickleObject {
    Dict(FrameDict),
    Other(FrameValue),
}

impl PickleObject {
    pub fn as_dict(&self) -> MotionResult<&FrameDict> {
        match self {
            PickleObject::Dict(dict) => Ok(dict),
            PickleObject::Other(value) => Err(MotionError::NotADictionary {
                found: value.type_name().to_string(),
            }),
        }
    }
}

pub fn read(path: impl AsRef<Path>) -> MotionResult<PickleObject> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| MotionError::open(path, e))?;
    let object = from_reader(BufReader::new(file))?;
    tracing::info!(path = %path.display(), "loaded pickle");
    Ok(object)
}

/// Decodes a pickle stream without running any of the code it references.
pub fn from_reader<R: Read>(reader: R) -> MotionResult<PickleObject> {
    let object = pickle::load(reader)?;
    Ok(match FrameValue::from_object(&object, 0) {
        FrameValue::Dict(dict) => PickleObject::Dict(dict),
        other => PickleObject::Other(other),
    })
}

/// Root trajectory and joint positions of one motion clip.
#[derive(Clone, Debug, PartialEq)]
pub struct MotionFrames {
    pub root_pos: Array2<f64>,
    pub root_rot: Array2<f64>,
    pub dof_pos: Array2<f64>,
    pub fps: f64,
}

pub const REQUIRED_KEYS: [&str; 4] = ["root_pos", "root_rot", "dof_pos", "fps"];

impl MotionFrames {
    pub fn frame_count(&self) -> usize {
        self.root_pos.nrows()
    }

    pub fn joint_count(&self) -> usize {
        self.dof_pos.ncols()
    }

    pub fn validate(&self) -> MotionResult<()> {
        check_columns("root_pos", self.root_pos.view(), 3)?;
        check_columns("root_rot", self.root_rot.view(), 4)?;
        let frames = self.frame_count();
        for (name, rows) in [("root_rot", self.root_rot.nrows()), ("dof_pos", self.dof_pos.nrows())] {
            if rows != frames {
                return Err(MotionError::shape(
                    name,
                    format!("{rows} frames, but root_pos has {frames}"),
                ));
            }
        }
        Ok(())
    }
}

fn check_columns(name: &str, array: ArrayView2<'_, f64>, columns: usize) -> MotionResult<()> {
    if array.ncols() != columns {
        return Err(MotionError::shape(
            name,
            format!("expected {columns} columns, got {}", array.ncols()),
        ));
    }
    Ok(())
}

impl TryFrom<&FrameDict> for MotionFrames {
    type Error = MotionError;

    fn try_from(dict: &FrameDict) -> MotionResult<Self> {
        let missing: Vec<String> = REQUIRED_KEYS
            .iter()
            .filter(|key| dict.get(key).is_none())
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(MotionError::MissingFields {
                missing,
                available: dict.keys(),
            });
        }

        let matrix = |key: &str| -> MotionResult<Array2<f64>> {
            match dict.get(key) {
                Some(FrameValue::Array(array)) => array
                    .clone()
                    .into_dimensionality::<Ix2>()
                    .map_err(|_| MotionError::shape(key, format!("expected 2 dimensions, got {:?}", array.shape()))),
                Some(other) => Err(MotionError::UnsupportedField {
                    field: key.to_string(),
                    reason: format!("expected a numeric array, found {}", other.type_name()),
                }),
                None => Err(MotionError::MissingFields {
                    missing: vec![key.to_string()],
                    available: dict.keys(),
                }),
            }
        };

        let fps = dict
            .get("fps")
            .and_then(FrameValue::as_f64)
            .ok_or_else(|| MotionError::UnsupportedField {
                field: "fps".to_string(),
                reason: "expected a number".to_string(),
            })?;

        let frames = MotionFrames {
            root_pos: matrix("root_pos")?,
            root_rot: matrix("root_rot")?,
            dof_pos: matrix("dof_pos")?,
            fps,
        };
        frames.validate()?;
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::{BTreeMap, HashMap};
    use std::rc::Rc;

    use ndarray::array;
    use serde_pickle::{HashableValue, SerOptions, Value};

    use super::*;
    use crate::container::pickle::{Global, op};

    fn plain(entries: Vec<(&str, Value)>) -> PickleObject {
        let map: BTreeMap<_, _> = entries
            .into_iter()
            .map(|(k, v)| (HashableValue::String(k.to_string()), v))
            .collect();
        let bytes = serde_pickle::value_to_vec(&Value::Dict(map), SerOptions::new()).unwrap();
        from_reader(bytes.as_slice()).unwrap()
    }

    fn plain_value(value: Value) -> FrameValue {
        match plain(vec![("v", value)]).as_dict().unwrap().get("v") {
            Some(value) => value.clone(),
            None => panic!("value was not decoded"),
        }
    }

    /// Writes pickles the way NumPy does: `_reconstruct` plus a `BUILD`
    /// state, with classes and dtypes memoized and fetched again by `BINGET`.
    struct NumpyPickle {
        bytes: Vec<u8>,
        memo: HashMap<String, u8>,
    }

    impl NumpyPickle {
        fn dict() -> Self {
            NumpyPickle {
                bytes: vec![op::PROTO, 3, op::EMPTY_DICT, op::MARK],
                memo: HashMap::new(),
            }
        }

        fn finish(mut self) -> Vec<u8> {
            self.bytes.extend([op::SETITEMS, op::STOP]);
            self.bytes
        }

        fn recall(&mut self, key: &str) -> bool {
            match self.memo.get(key) {
                Some(&index) => {
                    self.bytes.extend([op::BINGET, index]);
                    true
                }
                None => false,
            }
        }

        fn remember(&mut self, key: String) {
            let index = self.memo.len() as u8;
            self.bytes.extend([op::BINPUT, index]);
            self.memo.insert(key, index);
        }

        fn text(&mut self, text: &str) -> &mut Self {
            self.bytes.push(op::BINUNICODE);
            self.bytes.extend((text.len() as u32).to_le_bytes());
            self.bytes.extend(text.as_bytes());
            self
        }

        fn int(&mut self, v: i32) -> &mut Self {
            self.bytes.push(op::BININT);
            self.bytes.extend(v.to_le_bytes());
            self
        }

        fn data(&mut self, data: &[u8]) {
            self.bytes.push(op::BINBYTES);
            self.bytes.extend((data.len() as u32).to_le_bytes());
            self.bytes.extend(data);
        }

        fn global(&mut self, module: &str, name: &str) {
            let key = format!("{module}.{name}");
            if !self.recall(&key) {
                self.bytes.push(op::GLOBAL);
                self.bytes.extend(format!("{module}\n{name}\n").as_bytes());
                self.remember(key);
            }
        }

        /// `descr` carries the byte order first, e.g. `<f8` or `|b1`.
        fn dtype(&mut self, descr: &str) {
            let key = format!("dtype {descr}");
            if self.recall(&key) {
                return;
            }
            let (order, body) = descr.split_at(1);
            self.global("numpy", "dtype");
            self.text(body);
            self.bytes.extend([op::NEWFALSE, op::NEWTRUE, op::TUPLE3, op::REDUCE]);
            self.remember(key);
            self.bytes.push(op::MARK);
            self.int(3).text(order);
            self.bytes.extend([op::NONE, op::NONE, op::NONE]);
            self.int(-1).int(-1).int(0);
            self.bytes.extend([op::TUPLE, op::BUILD]);
        }

        fn array_in(&mut self, module: &str, shape: &[i32], descr: &str, fortran: bool, data: &[u8]) -> &mut Self {
            self.global(module, "_reconstruct");
            self.global("numpy", "ndarray");
            self.int(0);
            self.bytes.extend([op::TUPLE1, op::SHORT_BINBYTES, 1, b'b', op::TUPLE3, op::REDUCE]);
            self.bytes.push(op::MARK);
            self.int(1);
            self.bytes.push(op::MARK);
            for &dim in shape {
                self.int(dim);
            }
            self.bytes.push(op::TUPLE);
            self.dtype(descr);
            self.bytes.push(if fortran { op::NEWTRUE } else { op::NEWFALSE });
            self.data(data);
            self.bytes.extend([op::TUPLE, op::BUILD]);
            self
        }

        fn array(&mut self, shape: &[i32], descr: &str, data: &[u8]) -> &mut Self {
            self.array_in("numpy.core.multiarray", shape, descr, false, data)
        }

        fn scalar(&mut self, descr: &str, data: &[u8]) -> &mut Self {
            self.global("numpy.core.multiarray", "scalar");
            self.dtype(descr);
            self.bytes.push(op::SHORT_BINBYTES);
            self.bytes.push(data.len() as u8);
            self.bytes.extend(data);
            self.bytes.extend([op::TUPLE2, op::REDUCE]);
            self
        }
    }

    fn f8(values: &[f64]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn f4(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn load_numpy(pickle: NumpyPickle) -> FrameDict {
        match from_reader(pickle.finish().as_slice()).unwrap() {
            PickleObject::Dict(dict) => dict,
            other => panic!("expected a dict, got {other:?}"),
        }
    }

    fn frames() -> MotionFrames {
        MotionFrames {
            root_pos: array![[0.0, 0.0, 0.8], [0.1, 0.0, 0.8]],
            root_rot: array![[0.0, 0.0, 0.0, 1.0], [0.0, 0.0, 0.0, 1.0]],
            dof_pos: array![[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]],
            fps: 30.0,
        }
    }

    #[test]
    fn numpy_arrays_are_rebuilt() {
        let mut pickle = NumpyPickle::dict();
        pickle.text("fps").scalar("<f8", &30.0_f64.to_le_bytes());
        pickle.text("root_pos").array(&[2, 3], "<f8", &f8(&[0.0, 0.0, 0.8, 0.1, 0.0, 0.8]));
        pickle.text("root_rot").array(&[2, 4], "<f4", &f4(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]));
        // Second <f8 array: the dtype comes back from the memo.
        pickle.text("dof_pos").array(&[2, 3], "<f8", &f8(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]));

        let dict = load_numpy(pickle);
        assert_eq!(dict.keys(), vec!["fps", "root_pos", "root_rot", "dof_pos"]);
        assert_eq!(dict.get("fps"), Some(&FrameValue::Float(30.0)));
        assert_eq!(MotionFrames::try_from(&dict).unwrap(), frames());
    }

    #[test]
    fn fortran_ordered_arrays_keep_their_logical_layout() {
        let mut pickle = NumpyPickle::dict();
        pickle
            .text("m")
            .array_in("numpy.core.multiarray", &[2, 3], "<f8", true, &f8(&[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]));
        let dict = load_numpy(pickle);
        assert_eq!(
            dict.get("m"),
            Some(&FrameValue::Array(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]].into_dyn()))
        );
    }

    #[test]
    fn numpy_2_module_path_and_integer_dtypes() {
        let ints: Vec<u8> = [3_i64, -1].iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut pickle = NumpyPickle::dict();
        pickle.text("ids").array_in("numpy._core.multiarray", &[2], "<i8", false, &ints);
        pickle.text("mask").array(&[3], "|b1", &[1, 0, 1]);
        pickle.text("count").scalar("<i8", &7_i64.to_le_bytes());

        let dict = load_numpy(pickle);
        assert_eq!(dict.get("ids"), Some(&FrameValue::Array(array![3.0, -1.0].into_dyn())));
        assert_eq!(dict.get("mask"), Some(&FrameValue::Array(array![1.0, 0.0, 1.0].into_dyn())));
        assert_eq!(dict.get("count"), Some(&FrameValue::Int(7)));
    }

    #[test]
    fn protocol_5_frombuffer_arrays_are_rebuilt() {
        let mut pickle = NumpyPickle::dict();
        pickle.text("root_pos");
        pickle.global("numpy._core.numeric", "_frombuffer");
        pickle.bytes.push(op::MARK);
        pickle.data(&f8(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
        pickle.dtype("<f8");
        pickle.bytes.push(op::MARK);
        pickle.int(3).int(2);
        pickle.bytes.push(op::TUPLE);
        pickle.text("F");
        pickle.bytes.extend([op::TUPLE, op::REDUCE]);
        let dict = load_numpy(pickle);
        assert_eq!(
            dict.get("root_pos"),
            Some(&FrameValue::Array(array![[1.0, 4.0], [2.0, 5.0], [3.0, 6.0]].into_dyn()))
        );
    }

    #[test]
    fn string_arrays_are_described_not_decoded() {
        let mut pickle = NumpyPickle::dict();
        pickle.text("fps").scalar("<f8", &30.0_f64.to_le_bytes());
        pickle.text("root_pos").array(&[1], "<U4", &[b'w', 0, 0, 0, b'a', 0, 0, 0, b'l', 0, 0, 0, b'k', 0, 0, 0]);
        pickle.text("root_rot").array(&[1, 4], "<f8", &f8(&[0.0, 0.0, 0.0, 1.0]));
        pickle.text("dof_pos").array(&[1, 1], "<f8", &f8(&[0.0]));

        let dict = load_numpy(pickle);
        assert!(matches!(
            dict.get("root_pos"),
            Some(FrameValue::Other(description)) if description.contains("numpy.ndarray") && description.contains("<U4")
        ));
        assert!(matches!(
            MotionFrames::try_from(&dict),
            Err(MotionError::UnsupportedField { field, .. }) if field == "root_pos"
        ));
    }

    #[test]
    fn array_data_must_match_its_shape() {
        let mut pickle = NumpyPickle::dict();
        pickle.text("short").array(&[2, 2], "<f8", &f8(&[1.0, 2.0, 3.0]));
        let dict = load_numpy(pickle);
        assert!(matches!(dict.get("short"), Some(FrameValue::Other(d)) if d.contains("3 values")));
    }

    #[test]
    fn dtypes_honour_byte_order() {
        let big = Dtype::parse(">f8", None).unwrap();
        assert_eq!(big.decode(&1.5_f64.to_be_bytes()).unwrap(), vec![1.5]);
        let from_state = Dtype::parse("i2", Some(">")).unwrap();
        assert_eq!(from_state.decode(&[0x01, 0x00]).unwrap(), vec![256.0]);
        assert_eq!(Dtype::parse("f4", Some("<")).unwrap().to_string(), "<f4");
        assert!(Dtype::parse("<f8", None).unwrap().decode(&[0; 7]).is_err());
        assert!(Dtype::parse("<c16", None).unwrap().decode(&[0; 16]).is_err());
    }

    #[test]
    fn protocol_2_bytes_come_from_codecs_encode() {
        let encode = Object::Global(Rc::new(Global {
            module: "_codecs".to_string(),
            name: "encode".to_string(),
        }));
        let call = Object::Call(Rc::new(RefCell::new(Call {
            callable: encode,
            args: vec![Object::Text("\u{0}\u{ff}A".into()), Object::Text("latin1".into())],
            state: None,
        })));
        assert_eq!(raw_bytes(&call), Some(vec![0x00, 0xff, b'A']));
        assert_eq!(raw_bytes(&Object::Text("\u{100}".into())), None);
    }

    #[test]
    fn nested_numbers_become_arrays() {
        let value = Value::List(vec![
            Value::List(vec![Value::I64(1), Value::F64(2.5)]),
            Value::Tuple(vec![Value::F64(3.0), Value::I64(4)]),
        ]);
        assert_eq!(plain_value(value), FrameValue::Array(array![[1.0, 2.5], [3.0, 4.0]].into_dyn()));
    }

    #[test]
    fn ragged_lists_stay_lists() {
        let ragged = Value::List(vec![
            Value::List(vec![Value::F64(1.0), Value::F64(2.0)]),
            Value::List(vec![Value::F64(3.0)]),
        ]);
        assert!(matches!(plain_value(ragged), FrameValue::List(items) if items.len() == 2));

        let mixed_depth = Value::List(vec![Value::F64(1.0), Value::List(vec![Value::F64(2.0)])]);
        assert!(matches!(plain_value(mixed_depth), FrameValue::List(_)));
    }

    #[test]
    fn missing_keys_are_listed() {
        let object = plain(vec![("fps", Value::I64(30)), ("dof_pos", Value::List(vec![]))]);
        match MotionFrames::try_from(object.as_dict().unwrap()) {
            Err(MotionError::MissingFields { missing, available }) => {
                assert_eq!(missing, vec!["root_pos", "root_rot"]);
                assert_eq!(available, vec!["dof_pos", "fps"]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn undecodable_objects_are_rejected_by_field() {
        let mut entries: Vec<(&str, Value)> = REQUIRED_KEYS.iter().map(|&name| (name, Value::None)).collect();
        entries.retain(|(name, _)| *name != "fps");
        entries.push(("fps", Value::F64(50.0)));
        let object = plain(entries);
        assert!(matches!(
            MotionFrames::try_from(object.as_dict().unwrap()),
            Err(MotionError::UnsupportedField { field, .. }) if field == "root_pos"
        ));
    }

    #[test]
    fn frame_counts_must_agree() {
        let mut clip = frames();
        clip.dof_pos = array![[0.1, 0.2, 0.3]];
        assert!(matches!(clip.validate(), Err(MotionError::Shape { field, .. }) if field == "dof_pos"));
    }

    #[test]
    fn non_dictionary_pickles_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.pkl");
        let bytes = serde_pickle::value_to_vec(&Value::List(vec![Value::String("a".into())]), SerOptions::new()).unwrap();
        std::fs::write(&path, bytes).unwrap();

        let object = read(&path).unwrap();
        assert!(matches!(object, PickleObject::Other(FrameValue::List(_))));
        assert!(matches!(object.as_dict(), Err(MotionError::NotADictionary { .. })));
    }
}
