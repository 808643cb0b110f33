//! Runtime values and operator dispatch
//!
//! Values are a closed tagged union. Binary and unary operators are small
//! enum tags dispatched here; numeric operands promote int → float → string
//! (for `+`), and booleans participate in arithmetic as 0/1.

use crate::address::Address;
use crate::error::{Error, Result};
use crate::list::{ListDefs, ListValue};

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    DivertTarget(Address),
    /// A reference to a variable's binding scope; `content_index` 0 means
    /// global, `n` means local to the frame at call depth `n - 1`.
    VarRef { name: String, content_index: u32 },
    List(ListValue),
    Void,
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::DivertTarget(_) => "divert target",
            Value::VarRef { .. } => "variable reference",
            Value::List(_) => "list",
            Value::Void => "void",
        }
    }

    /// Printable form, as emitted by `out`.
    ///
    /// Void prints as nothing: an inline call to a function without a return
    /// value leaves only its emitted text.
    pub fn output(&self) -> Result<String> {
        match self {
            Value::Int(i) => Ok(i.to_string()),
            Value::Float(f) => Ok(f.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Str(s) => Ok(s.clone()),
            Value::List(l) => Ok(l.to_string()),
            Value::Void => Ok(String::new()),
            other => Err(Error::TypeMismatch {
                expected: "printable value",
                found: other.kind(),
            }),
        }
    }

    pub fn truthy(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            Value::Float(f) => Ok(*f != 0.0),
            Value::List(l) => Ok(!l.is_empty()),
            other => Err(Error::TypeMismatch {
                expected: "truthy value",
                found: other.kind(),
            }),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(*b as i64),
            other => Err(Error::TypeMismatch {
                expected: "int",
                found: other.kind(),
            }),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(Error::TypeMismatch {
                expected: "string",
                found: other.kind(),
            }),
        }
    }

    pub fn as_list(&self) -> Result<&ListValue> {
        match self {
            Value::List(l) => Ok(l),
            other => Err(Error::TypeMismatch {
                expected: "list",
                found: other.kind(),
            }),
        }
    }

    pub fn as_divert_target(&self) -> Result<&Address> {
        match self {
            Value::DivertTarget(a) => Ok(a),
            other => Err(Error::TypeMismatch {
                expected: "divert target",
                found: other.kind(),
            }),
        }
    }
}

/// Binary operator tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Has,
    Hasnt,
    Min,
    Max,
}

/// Unary operator tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Both operands promoted to a common numeric type.
enum NumPair {
    Int(i64, i64),
    Float(f64, f64),
}

fn promote(a: &Value, b: &Value) -> Result<NumPair> {
    let widen = |v: &Value| -> Result<std::result::Result<i64, f64>> {
        match v {
            Value::Int(i) => Ok(Ok(*i)),
            Value::Bool(x) => Ok(Ok(*x as i64)),
            Value::Float(f) => Ok(Err(*f)),
            other => Err(Error::TypeMismatch {
                expected: "number",
                found: other.kind(),
            }),
        }
    };
    match (widen(a)?, widen(b)?) {
        (Ok(x), Ok(y)) => Ok(NumPair::Int(x, y)),
        (Ok(x), Err(y)) => Ok(NumPair::Float(x as f64, y)),
        (Err(x), Ok(y)) => Ok(NumPair::Float(x, y as f64)),
        (Err(x), Err(y)) => Ok(NumPair::Float(x, y)),
    }
}

fn is_string(v: &Value) -> bool {
    matches!(v, Value::Str(_))
}

/// Apply a binary operator. List shifts consult the definitions.
pub fn apply_binary(op: BinaryOp, a: &Value, b: &Value, defs: &ListDefs) -> Result<Value> {
    match op {
        BinaryOp::Add => add(a, b, defs),
        BinaryOp::Sub => sub(a, b, defs),
        BinaryOp::Mul => match promote(a, b)? {
            NumPair::Int(x, y) => Ok(Value::Int(x * y)),
            NumPair::Float(x, y) => Ok(Value::Float(x * y)),
        },
        BinaryOp::Div => match promote(a, b)? {
            NumPair::Int(_, 0) => Err(Error::DivisionByZero),
            NumPair::Int(x, y) => Ok(Value::Int(x / y)),
            NumPair::Float(x, y) => Ok(Value::Float(x / y)),
        },
        BinaryOp::Mod => match promote(a, b)? {
            NumPair::Int(_, 0) => Err(Error::DivisionByZero),
            NumPair::Int(x, y) => Ok(Value::Int(x % y)),
            NumPair::Float(x, y) => Ok(Value::Float(x % y)),
        },
        BinaryOp::And => Ok(Value::Bool(a.truthy()? && b.truthy()?)),
        BinaryOp::Or => Ok(Value::Bool(a.truthy()? || b.truthy()?)),
        BinaryOp::Eq => Ok(Value::Bool(equal(a, b)?)),
        BinaryOp::Ne => Ok(Value::Bool(!equal(a, b)?)),
        BinaryOp::Lt => Ok(Value::Bool(less(a, b, false)?)),
        BinaryOp::Lte => Ok(Value::Bool(less(a, b, true)?)),
        BinaryOp::Gt => Ok(Value::Bool(less(b, a, false)?)),
        BinaryOp::Gte => Ok(Value::Bool(less(b, a, true)?)),
        BinaryOp::Has => Ok(Value::Bool(has(a, b)?)),
        BinaryOp::Hasnt => Ok(Value::Bool(!has(a, b)?)),
        BinaryOp::Min => {
            if less(b, a, false)? {
                Ok(b.clone())
            } else {
                Ok(a.clone())
            }
        }
        BinaryOp::Max => {
            if less(a, b, false)? {
                Ok(b.clone())
            } else {
                Ok(a.clone())
            }
        }
    }
}

/// Apply a unary operator.
pub fn apply_unary(op: UnaryOp, a: &Value) -> Result<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!a.truthy()?)),
        UnaryOp::Neg => match a {
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            Value::Bool(b) => Ok(Value::Int(-(*b as i64))),
            other => Err(Error::TypeMismatch {
                expected: "number",
                found: other.kind(),
            }),
        },
    }
}

fn add(a: &Value, b: &Value, defs: &ListDefs) -> Result<Value> {
    if is_string(a) || is_string(b) {
        return Ok(Value::Str(format!("{}{}", a.output()?, b.output()?)));
    }
    match (a, b) {
        (Value::List(x), Value::List(y)) => Ok(Value::List(x.union(y))),
        (Value::List(x), _) => Ok(Value::List(x.shift(b.as_int()?, defs))),
        _ => match promote(a, b)? {
            NumPair::Int(x, y) => Ok(Value::Int(x + y)),
            NumPair::Float(x, y) => Ok(Value::Float(x + y)),
        },
    }
}

fn sub(a: &Value, b: &Value, defs: &ListDefs) -> Result<Value> {
    match (a, b) {
        (Value::List(x), Value::List(y)) => Ok(Value::List(x.difference(y))),
        (Value::List(x), _) => Ok(Value::List(x.shift(-b.as_int()?, defs))),
        _ => match promote(a, b)? {
            NumPair::Int(x, y) => Ok(Value::Int(x - y)),
            NumPair::Float(x, y) => Ok(Value::Float(x - y)),
        },
    }
}

fn equal(a: &Value, b: &Value) -> Result<bool> {
    if is_string(a) || is_string(b) {
        return Ok(a.output()? == b.output()?);
    }
    match (a, b) {
        (Value::List(x), Value::List(y)) => Ok(x.items() == y.items()),
        (Value::DivertTarget(x), Value::DivertTarget(y)) => Ok(x == y),
        _ => match promote(a, b)? {
            NumPair::Int(x, y) => Ok(x == y),
            NumPair::Float(x, y) => Ok(x == y),
        },
    }
}

fn less(a: &Value, b: &Value, or_equal: bool) -> Result<bool> {
    if is_string(a) || is_string(b) {
        let (x, y) = (a.output()?, b.output()?);
        return Ok(if or_equal { x <= y } else { x < y });
    }
    match (a, b) {
        // Lists compare by their extremes: every member of the lesser list
        // must sit below (or at, for inclusive) every member of the greater.
        (Value::List(x), Value::List(y)) => {
            if or_equal {
                Ok(x.max_value() <= y.min_value())
            } else {
                Ok(x.max_value() < y.min_value())
            }
        }
        (Value::List(x), _) => {
            let y = b.as_int()?;
            Ok(if or_equal {
                x.max_value() <= y
            } else {
                x.max_value() < y
            })
        }
        (_, Value::List(y)) => {
            let x = a.as_int()?;
            Ok(if or_equal {
                x <= y.min_value()
            } else {
                x < y.min_value()
            })
        }
        _ => match promote(a, b)? {
            NumPair::Int(x, y) => Ok(if or_equal { x <= y } else { x < y }),
            NumPair::Float(x, y) => Ok(if or_equal { x <= y } else { x < y }),
        },
    }
}

fn has(a: &Value, b: &Value) -> Result<bool> {
    match (a, b) {
        (Value::List(x), Value::List(y)) => Ok(x.has_all(y)),
        (Value::Str(x), Value::Str(y)) => Ok(x.contains(y.as_str())),
        _ => Err(Error::TypeMismatch {
            expected: "list or string operands",
            found: a.kind(),
        }),
    }
}
