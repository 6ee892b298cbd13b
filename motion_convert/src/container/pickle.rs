//! A non-executing pickle reader.
//!
//! Opcodes are interpreted into plain [`Object`]s. Class references and
//! `REDUCE`/`BUILD` are recorded instead of called, so NumPy arrays come out
//! as a `_reconstruct` call whose state holds the shape, dtype and raw bytes.
//! Containers are shared through the memo, so a `BUILD` on an object is seen
//! by every later reference to it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Read;
use std::rc::Rc;

use crate::error::{MotionError, MotionResult};

pub(crate) type Shared<T> = Rc<RefCell<T>>;

#[derive(Clone, Debug)]
pub(crate) enum Object {
    None,
    Bool(bool),
    Int(i64),
    /// Integer wider than 64 bits, as little-endian two's complement.
    BigInt(Rc<Vec<u8>>),
    Float(f64),
    Text(Rc<str>),
    Bytes(Rc<Vec<u8>>),
    Tuple(Rc<Vec<Object>>),
    List(Shared<Vec<Object>>),
    Dict(Shared<Vec<(Object, Object)>>),
    Set(Shared<Vec<Object>>),
    Global(Rc<Global>),
    Call(Shared<Call>),
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Global {
    pub module: String,
    pub name: String,
}

impl Global {
    pub fn is(&self, modules: &[&str], name: &str) -> bool {
        self.name == name && modules.contains(&self.module.as_str())
    }
}

/// A recorded `callable(*args)`, with the state passed to `BUILD` if any.
#[derive(Debug)]
pub(crate) struct Call {
    pub callable: Object,
    pub args: Vec<Object>,
    pub state: Option<Object>,
}

impl Object {
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::None => "NoneType",
            Object::Bool(_) => "bool",
            Object::Int(_) | Object::BigInt(_) => "int",
            Object::Float(_) => "float",
            Object::Text(_) => "str",
            Object::Bytes(_) => "bytes",
            Object::Tuple(_) => "tuple",
            Object::List(_) => "list",
            Object::Dict(_) => "dict",
            Object::Set(_) => "set",
            Object::Global(_) => "type",
            Object::Call(_) => "object",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Object::Int(v) => Some(*v),
            Object::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Object::Text(text) => Some(&**text),
            _ => None,
        }
    }

    /// Items of a tuple or list.
    pub fn items(&self) -> Option<Vec<Object>> {
        match self {
            Object::Tuple(items) => Some(items.to_vec()),
            Object::List(items) => Some(items.borrow().clone()),
            _ => None,
        }
    }

    fn new_list(items: Vec<Object>) -> Object {
        Object::List(Rc::new(RefCell::new(items)))
    }

    fn new_dict(entries: Vec<(Object, Object)>) -> Object {
        Object::Dict(Rc::new(RefCell::new(entries)))
    }
}

pub(crate) mod op {
    pub const MARK: u8 = b'(';
    pub const STOP: u8 = b'.';
    pub const POP: u8 = b'0';
    pub const POP_MARK: u8 = b'1';
    pub const DUP: u8 = b'2';
    pub const FLOAT: u8 = b'F';
    pub const INT: u8 = b'I';
    pub const BININT: u8 = b'J';
    pub const BININT1: u8 = b'K';
    pub const LONG: u8 = b'L';
    pub const BININT2: u8 = b'M';
    pub const NONE: u8 = b'N';
    pub const REDUCE: u8 = b'R';
    pub const STRING: u8 = b'S';
    pub const BINSTRING: u8 = b'T';
    pub const SHORT_BINSTRING: u8 = b'U';
    pub const UNICODE: u8 = b'V';
    pub const BINUNICODE: u8 = b'X';
    pub const APPEND: u8 = b'a';
    pub const BUILD: u8 = b'b';
    pub const GLOBAL: u8 = b'c';
    pub const DICT: u8 = b'd';
    pub const EMPTY_DICT: u8 = b'}';
    pub const APPENDS: u8 = b'e';
    pub const GET: u8 = b'g';
    pub const BINGET: u8 = b'h';
    pub const LONG_BINGET: u8 = b'j';
    pub const LIST: u8 = b'l';
    pub const EMPTY_LIST: u8 = b']';
    pub const PUT: u8 = b'p';
    pub const BINPUT: u8 = b'q';
    pub const LONG_BINPUT: u8 = b'r';
    pub const SETITEM: u8 = b's';
    pub const TUPLE: u8 = b't';
    pub const EMPTY_TUPLE: u8 = b')';
    pub const SETITEMS: u8 = b'u';
    pub const BINFLOAT: u8 = b'G';
    pub const BINBYTES: u8 = b'B';
    pub const SHORT_BINBYTES: u8 = b'C';
    pub const PROTO: u8 = 0x80;
    pub const NEWOBJ: u8 = 0x81;
    pub const TUPLE1: u8 = 0x85;
    pub const TUPLE2: u8 = 0x86;
    pub const TUPLE3: u8 = 0x87;
    pub const NEWTRUE: u8 = 0x88;
    pub const NEWFALSE: u8 = 0x89;
    pub const LONG1: u8 = 0x8a;
    pub const LONG4: u8 = 0x8b;
    pub const SHORT_BINUNICODE: u8 = 0x8c;
    pub const BINUNICODE8: u8 = 0x8d;
    pub const BINBYTES8: u8 = 0x8e;
    pub const EMPTY_SET: u8 = 0x8f;
    pub const ADDITEMS: u8 = 0x90;
    pub const FROZENSET: u8 = 0x91;
    pub const NEWOBJ_EX: u8 = 0x92;
    pub const STACK_GLOBAL: u8 = 0x93;
    pub const MEMOIZE: u8 = 0x94;
    pub const FRAME: u8 = 0x95;
    pub const BYTEARRAY8: u8 = 0x96;
}

/// Reads one pickled object from `reader`.
pub(crate) fn load<R: Read>(reader: R) -> MotionResult<Object> {
    Machine {
        reader,
        offset: 0,
        stack: Vec::new(),
        marks: Vec::new(),
        memo: HashMap::new(),
    }
    .run()
}

struct Machine<R> {
    reader: R,
    offset: u64,
    stack: Vec<Object>,
    marks: Vec<usize>,
    memo: HashMap<u32, Object>,
}

impl<R: Read> Machine<R> {
    fn run(mut self) -> MotionResult<Object> {
        loop {
            let opcode = self.byte()?;
            match opcode {
                op::PROTO => {
                    self.byte()?;
                }
                op::FRAME => {
                    self.bytes(8)?;
                }
                op::STOP => return self.pop(),
                op::MARK => self.marks.push(self.stack.len()),
                op::POP => {
                    self.pop()?;
                }
                op::POP_MARK => {
                    self.pop_mark()?;
                }
                op::DUP => {
                    let top = self.top()?.clone();
                    self.stack.push(top);
                }

                op::NONE => self.stack.push(Object::None),
                op::NEWTRUE => self.stack.push(Object::Bool(true)),
                op::NEWFALSE => self.stack.push(Object::Bool(false)),
                op::INT => {
                    let line = self.line()?;
                    let value = match line.as_str() {
                        "00" => Object::Bool(false),
                        "01" => Object::Bool(true),
                        text => Object::Int(self.parse(text)?),
                    };
                    self.stack.push(value);
                }
                op::BININT => {
                    let value = i32::from_le_bytes(self.array()?);
                    self.stack.push(Object::Int(i64::from(value)));
                }
                op::BININT1 => {
                    let value = self.byte()?;
                    self.stack.push(Object::Int(i64::from(value)));
                }
                op::BININT2 => {
                    let value = u16::from_le_bytes(self.array()?);
                    self.stack.push(Object::Int(i64::from(value)));
                }
                op::LONG => {
                    let line = self.line()?;
                    let value = self.parse(line.trim_end_matches('L'))?;
                    self.stack.push(Object::Int(value));
                }
                op::LONG1 => {
                    let len = usize::from(self.byte()?);
                    let bytes = self.bytes(len)?;
                    self.stack.push(long(bytes));
                }
                op::LONG4 => {
                    let len = self.len32()?;
                    let bytes = self.bytes(len)?;
                    self.stack.push(long(bytes));
                }
                op::FLOAT => {
                    let line = self.line()?;
                    let value = self.parse(&line)?;
                    self.stack.push(Object::Float(value));
                }
                op::BINFLOAT => {
                    let value = f64::from_be_bytes(self.array()?);
                    self.stack.push(Object::Float(value));
                }

                op::STRING => {
                    let line = self.line()?;
                    let text = line.trim_matches(|c| c == '\'' || c == '"');
                    self.stack.push(Object::Text(text.into()));
                }
                op::UNICODE => {
                    let line = self.line()?;
                    self.stack.push(Object::Text(line.into()));
                }
                op::BINSTRING | op::BINUNICODE => {
                    let len = self.len32()?;
                    let text = self.text(len, opcode == op::BINUNICODE)?;
                    self.stack.push(text);
                }
                op::SHORT_BINSTRING | op::SHORT_BINUNICODE => {
                    let len = usize::from(self.byte()?);
                    let text = self.text(len, opcode == op::SHORT_BINUNICODE)?;
                    self.stack.push(text);
                }
                op::BINUNICODE8 => {
                    let len = self.len64()?;
                    let text = self.text(len, true)?;
                    self.stack.push(text);
                }
                op::SHORT_BINBYTES => {
                    let len = usize::from(self.byte()?);
                    let bytes = self.bytes(len)?;
                    self.stack.push(Object::Bytes(Rc::new(bytes)));
                }
                op::BINBYTES => {
                    let len = self.len32()?;
                    let bytes = self.bytes(len)?;
                    self.stack.push(Object::Bytes(Rc::new(bytes)));
                }
                op::BINBYTES8 | op::BYTEARRAY8 => {
                    let len = self.len64()?;
                    let bytes = self.bytes(len)?;
                    self.stack.push(Object::Bytes(Rc::new(bytes)));
                }

                op::EMPTY_TUPLE => self.stack.push(Object::Tuple(Rc::new(Vec::new()))),
                op::TUPLE => {
                    let items = self.pop_mark()?;
                    self.stack.push(Object::Tuple(Rc::new(items)));
                }
                op::TUPLE1 | op::TUPLE2 | op::TUPLE3 => {
                    let count = usize::from(opcode - op::TUPLE1 + 1);
                    let items = self.pop_n(count)?;
                    self.stack.push(Object::Tuple(Rc::new(items)));
                }
                op::EMPTY_LIST => self.stack.push(Object::new_list(Vec::new())),
                op::LIST => {
                    let items = self.pop_mark()?;
                    self.stack.push(Object::new_list(items));
                }
                op::APPEND => {
                    let item = self.pop()?;
                    self.extend_list(vec![item])?;
                }
                op::APPENDS => {
                    let items = self.pop_mark()?;
                    self.extend_list(items)?;
                }
                op::EMPTY_DICT => self.stack.push(Object::new_dict(Vec::new())),
                op::DICT => {
                    let items = self.pop_mark()?;
                    let entries = pairs(items, self.offset)?;
                    self.stack.push(Object::new_dict(entries));
                }
                op::SETITEM => {
                    let items = self.pop_n(2)?;
                    let entries = pairs(items, self.offset)?;
                    self.set_items(entries)?;
                }
                op::SETITEMS => {
                    let items = self.pop_mark()?;
                    let entries = pairs(items, self.offset)?;
                    self.set_items(entries)?;
                }
                op::EMPTY_SET => self.stack.push(Object::Set(Rc::new(RefCell::new(Vec::new())))),
                op::ADDITEMS => {
                    let items = self.pop_mark()?;
                    match self.top()? {
                        Object::Set(set) => set.borrow_mut().extend(items),
                        other => return Err(self.malformed(format!("ADDITEMS on {}", other.type_name()))),
                    }
                }
                op::FROZENSET => {
                    let items = self.pop_mark()?;
                    self.stack.push(Object::Set(Rc::new(RefCell::new(items))));
                }

                op::GLOBAL => {
                    let module = self.line()?;
                    let name = self.line()?;
                    self.stack.push(Object::Global(Rc::new(Global { module, name })));
                }
                op::STACK_GLOBAL => {
                    let name = self.pop()?;
                    let module = self.pop()?;
                    match (module.as_text(), name.as_text()) {
                        (Some(module), Some(name)) => self.stack.push(Object::Global(Rc::new(Global {
                            module: module.to_string(),
                            name: name.to_string(),
                        }))),
                        _ => return Err(self.malformed("STACK_GLOBAL needs two strings")),
                    }
                }
                op::REDUCE | op::NEWOBJ => {
                    let args = self.pop()?;
                    let callable = self.pop()?;
                    self.call(callable, args)?;
                }
                op::NEWOBJ_EX => {
                    self.pop()?;
                    let args = self.pop()?;
                    let callable = self.pop()?;
                    self.call(callable, args)?;
                }
                op::BUILD => {
                    let state = self.pop()?;
                    match self.top()? {
                        Object::Call(call) => call.borrow_mut().state = Some(state),
                        Object::Dict(dict) => {
                            if let Object::Dict(extra) = state {
                                let extra = extra.borrow().clone();
                                dict.borrow_mut().extend(extra);
                            }
                        }
                        other => return Err(self.malformed(format!("BUILD on {}", other.type_name()))),
                    }
                }

                op::PUT => {
                    let line = self.line()?;
                    let index = self.parse(&line)?;
                    self.put(index)?;
                }
                op::BINPUT => {
                    let index = u32::from(self.byte()?);
                    self.put(index)?;
                }
                op::LONG_BINPUT => {
                    let index = u32::from_le_bytes(self.array()?);
                    self.put(index)?;
                }
                op::MEMOIZE => {
                    let index = self.memo.len() as u32;
                    self.put(index)?;
                }
                op::GET => {
                    let line = self.line()?;
                    let index = self.parse(&line)?;
                    self.get(index)?;
                }
                op::BINGET => {
                    let index = u32::from(self.byte()?);
                    self.get(index)?;
                }
                op::LONG_BINGET => {
                    let index = u32::from_le_bytes(self.array()?);
                    self.get(index)?;
                }

                other => return Err(self.malformed(format!("unsupported opcode 0x{other:02x}"))),
            }
        }
    }

    fn malformed(&self, message: impl Into<String>) -> MotionError {
        MotionError::MalformedPickle {
            offset: self.offset,
            message: message.into(),
        }
    }

    fn byte(&mut self) -> MotionResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn array<const N: usize>(&mut self) -> MotionResult<[u8; N]> {
        let mut buf = [0; N];
        self.reader
            .read_exact(&mut buf)
            .map_err(|_| self.malformed("unexpected end of data"))?;
        self.offset += N as u64;
        Ok(buf)
    }

    fn bytes(&mut self, len: usize) -> MotionResult<Vec<u8>> {
        let mut buf = Vec::new();
        let read = (&mut self.reader).take(len as u64).read_to_end(&mut buf)?;
        self.offset += read as u64;
        if read != len {
            return Err(self.malformed("unexpected end of data"));
        }
        Ok(buf)
    }

    fn len32(&mut self) -> MotionResult<usize> {
        Ok(u32::from_le_bytes(self.array()?) as usize)
    }

    fn len64(&mut self) -> MotionResult<usize> {
        let len = u64::from_le_bytes(self.array()?);
        usize::try_from(len).map_err(|_| self.malformed("length does not fit in memory"))
    }

    fn line(&mut self) -> MotionResult<String> {
        let mut line = Vec::new();
        loop {
            match self.byte()? {
                b'\n' => break,
                byte => line.push(byte),
            }
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    fn text(&mut self, len: usize, strict: bool) -> MotionResult<Object> {
        let bytes = self.bytes(len)?;
        let text = if strict {
            String::from_utf8(bytes).map_err(|_| self.malformed("string is not UTF-8"))?
        } else {
            bytes.iter().map(|&b| char::from(b)).collect()
        };
        Ok(Object::Text(text.into()))
    }

    fn parse<T: std::str::FromStr>(&self, text: &str) -> MotionResult<T> {
        text.trim()
            .parse()
            .map_err(|_| self.malformed(format!("bad number '{text}'")))
    }

    fn top(&self) -> MotionResult<&Object> {
        self.stack.last().ok_or_else(|| self.malformed("stack underflow"))
    }

    fn pop(&mut self) -> MotionResult<Object> {
        match self.stack.pop() {
            Some(object) => Ok(object),
            None => Err(self.malformed("stack underflow")),
        }
    }

    fn pop_n(&mut self, count: usize) -> MotionResult<Vec<Object>> {
        if self.stack.len() < count {
            return Err(self.malformed("stack underflow"));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn pop_mark(&mut self) -> MotionResult<Vec<Object>> {
        let mark = self.marks.pop().ok_or_else(|| self.malformed("missing MARK"))?;
        if mark > self.stack.len() {
            return Err(self.malformed("MARK beyond the stack"));
        }
        Ok(self.stack.split_off(mark))
    }

    fn extend_list(&mut self, items: Vec<Object>) -> MotionResult<()> {
        match self.top()? {
            Object::List(list) => {
                list.borrow_mut().extend(items);
                Ok(())
            }
            other => Err(self.malformed(format!("APPEND on {}", other.type_name()))),
        }
    }

    fn set_items(&mut self, entries: Vec<(Object, Object)>) -> MotionResult<()> {
        match self.top()? {
            Object::Dict(dict) => {
                dict.borrow_mut().extend(entries);
                Ok(())
            }
            other => Err(self.malformed(format!("SETITEM on {}", other.type_name()))),
        }
    }

    fn call(&mut self, callable: Object, args: Object) -> MotionResult<()> {
        let args = args
            .items()
            .ok_or_else(|| self.malformed(format!("call arguments are a {}", args.type_name())))?;
        self.stack.push(Object::Call(Rc::new(RefCell::new(Call {
            callable,
            args,
            state: None,
        }))));
        Ok(())
    }

    fn put(&mut self, index: u32) -> MotionResult<()> {
        let top = self.top()?.clone();
        self.memo.insert(index, top);
        Ok(())
    }

    fn get(&mut self, index: u32) -> MotionResult<()> {
        let object = self
            .memo
            .get(&index)
            .cloned()
            .ok_or_else(|| self.malformed(format!("memo entry {index} is not set")))?;
        self.stack.push(object);
        Ok(())
    }
}

fn long(bytes: Vec<u8>) -> Object {
    if bytes.len() > 8 {
        return Object::BigInt(Rc::new(bytes));
    }
    let fill = if bytes.last().is_some_and(|&b| b & 0x80 != 0) { 0xff } else { 0 };
    let mut buf = [fill; 8];
    buf[..bytes.len()].copy_from_slice(&bytes);
    Object::Int(i64::from_le_bytes(buf))
}

fn pairs(items: Vec<Object>, offset: u64) -> MotionResult<Vec<(Object, Object)>> {
    if items.len() % 2 != 0 {
        return Err(MotionError::MalformedPickle {
            offset,
            message: "odd number of dictionary items".to_string(),
        });
    }
    let mut entries = Vec::with_capacity(items.len() / 2);
    let mut items = items.into_iter();
    while let (Some(key), Some(value)) = (items.next(), items.next()) {
        entries.push((key, value));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_bytes(bytes: &[u8]) -> MotionResult<Object> {
        load(bytes)
    }

    #[test]
    fn scalars_and_containers() {
        // {'a': [1, -2, 3.5], 'b': (True, None)}, protocol 2.
        let mut bytes = vec![op::PROTO, 2, op::EMPTY_DICT, op::BINPUT, 0, op::MARK];
        bytes.extend([op::SHORT_BINUNICODE, 1, b'a', op::EMPTY_LIST, op::MARK, op::BININT1, 1]);
        bytes.push(op::BININT);
        bytes.extend((-2_i32).to_le_bytes());
        bytes.push(op::BINFLOAT);
        bytes.extend(3.5_f64.to_be_bytes());
        bytes.extend([op::APPENDS, op::SHORT_BINUNICODE, 1, b'b', op::NEWTRUE, op::NONE, op::TUPLE2]);
        bytes.extend([op::SETITEMS, op::STOP]);

        let Object::Dict(dict) = load_bytes(&bytes).unwrap() else {
            panic!("expected a dict");
        };
        let dict = dict.borrow();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict[0].0.as_text(), Some("a"));
        let items = dict[0].1.items().unwrap();
        assert_eq!(items[1].as_int(), Some(-2));
        assert!(matches!(items[2], Object::Float(v) if v == 3.5));
        assert!(matches!(dict[1].1, Object::Tuple(ref t) if t.len() == 2));
    }

    #[test]
    fn build_is_visible_through_the_memo() {
        // obj = mod.Cls(); memoized; BUILD; then a second reference via BINGET.
        let mut bytes = vec![op::PROTO, 4, op::GLOBAL];
        bytes.extend(b"mod\nCls\n");
        bytes.extend([op::EMPTY_TUPLE, op::REDUCE, op::MEMOIZE, op::BININT1, 7, op::BUILD]);
        bytes.extend([op::POP, op::BINGET, 0, op::STOP]);

        let Object::Call(call) = load_bytes(&bytes).unwrap() else {
            panic!("expected a call");
        };
        let call = call.borrow();
        assert!(matches!(call.callable, Object::Global(ref g) if g.is(&["mod"], "Cls")));
        assert_eq!(call.state.as_ref().and_then(Object::as_int), Some(7));
    }

    #[test]
    fn long_integers_are_sign_extended() {
        assert_eq!(long(vec![0xff]).as_int(), Some(-1));
        assert_eq!(long(vec![0x00, 0x01]).as_int(), Some(256));
        assert!(matches!(long(vec![0; 9]), Object::BigInt(_)));
    }

    #[test]
    fn truncated_input_is_malformed() {
        assert!(matches!(
            load_bytes(&[op::PROTO, 4, op::BINUNICODE, 10, 0, 0, 0, b'a']),
            Err(MotionError::MalformedPickle { .. })
        ));
        assert!(matches!(
            load_bytes(&[op::PROTO, 4, op::BINGET, 3, op::STOP]),
            Err(MotionError::MalformedPickle { ref message, .. }) if message.contains("memo")
        ));
    }
}
