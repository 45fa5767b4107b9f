// File: src/value.rs
//
// The tagged runtime value. Numbers, booleans and null live inline;
// everything else is a non-owning handle into the heap (`object.rs`).

use std::fmt;

use crate::object::{GcRef, Obj, ObjKind};

#[derive(Clone, Copy)]
pub enum Value {
    Bool(bool),
    Null,
    Number(f64),
    Obj(GcRef<Obj>),
}

impl Value {
    pub fn is_falsey(&self) -> bool {
        matches!(self, Value::Null) || matches!(self, Value::Bool(false))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::Obj(o) if matches!(o.kind, ObjKind::String(_)))
    }

    pub fn as_obj(&self) -> Option<GcRef<Obj>> {
        match self {
            Value::Obj(o) => Some(*o),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Null => "null",
            Value::Number(_) => "number",
            Value::Obj(o) => o.type_name(),
        }
    }
}

/// `valuesEqual`: type tags first, then payload. Objects compare by
/// identity — correct as long as every string is interned.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Null, Value::Null) => true,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::Obj(x), Value::Obj(y)) => x.as_ptr() == y.as_ptr(),
        _ => false,
    }
}

/// Mimics C's `%g` closely enough for language-visible output: integral
/// doubles print without a trailing `.0`.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Null => write!(f, "null"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Obj(o) => match &o.kind {
                ObjKind::String(s) => write!(f, "{}", s.as_str()),
                ObjKind::Function(func) => match func.name {
                    Some(name) => write!(f, "<fn {}>", name.as_string().unwrap().as_str()),
                    None => write!(f, "<script>"),
                },
                ObjKind::Native(_) => write!(f, "<native fn>"),
                ObjKind::Closure(c) => {
                    let func = c.function.as_function().unwrap();
                    match func.name {
                        Some(name) => write!(f, "<fn {}>", name.as_string().unwrap().as_str()),
                        None => write!(f, "<script>"),
                    }
                }
                ObjKind::Upvalue(_) => write!(f, "<upvalue>"),
                ObjKind::Class(c) => write!(f, "{}", c.name.as_string().unwrap().as_str()),
                ObjKind::Instance(i) => {
                    let class = i.class.as_class().unwrap();
                    write!(f, "{} instance", class.name.as_string().unwrap().as_str())
                }
                ObjKind::BoundMethod(b) => {
                    let closure = b.method.as_closure().unwrap();
                    let func = closure.function.as_function().unwrap();
                    match func.name {
                        Some(name) => write!(f, "<fn {}>", name.as_string().unwrap().as_str()),
                        None => write!(f, "<script>"),
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_doubles_print_without_trailing_zero() {
        assert_eq!(format_number(7.0), "7");
        assert_eq!(format_number(-3.0), "-3");
    }

    #[test]
    fn fractional_doubles_keep_their_digits() {
        assert_eq!(format_number(1.5), "1.5");
    }

    #[test]
    fn nan_is_never_equal_to_itself() {
        let a = Value::Number(f64::NAN);
        let b = Value::Number(f64::NAN);
        assert!(!values_equal(&a, &b));
    }

    #[test]
    fn falsey_is_null_or_false() {
        assert!(Value::Null.is_falsey());
        assert!(Value::Bool(false).is_falsey());
        assert!(!Value::Bool(true).is_falsey());
        assert!(!Value::Number(0.0).is_falsey());
    }
}
