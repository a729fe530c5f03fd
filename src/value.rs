use std::fmt;

/// Runtime value. Values are copied on assignment, on argument passing and
/// on return; two bindings never share an array.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Result of calling a `void` function.
    Void,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    /// Fixed-length, bounds-checked aggregate.
    Array(Vec<Value>),
}

impl Value {
    /// Truth value of a condition operand, `None` when the variant has none.
    pub fn truth(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(n) => Some(*n != 0),
            Value::Double(n) => Some(*n != 0.0),
            Value::Void | Value::String(_) | Value::Array(_) => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Array(_) => "array",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Double(_))
    }

    /// Convert `value` so it can replace `self` in the same storage slot.
    ///
    /// Numbers convert to the slot's variant (double to int truncates toward
    /// zero). Arrays keep their length and convert element by element
    /// against the elements already stored. Any other mismatch is an error
    /// naming both types.
    pub fn convert_for_store(&self, value: Value) -> Result<Value, String> {
        match (self, value) {
            (Value::Int(_), Value::Int(n)) => Ok(Value::Int(n)),
            (Value::Int(_), Value::Double(d)) => Ok(Value::Int(d as i64)),
            (Value::Double(_), Value::Double(d)) => Ok(Value::Double(d)),
            (Value::Double(_), Value::Int(n)) => Ok(Value::Double(n as f64)),
            (Value::Bool(_), Value::Bool(b)) => Ok(Value::Bool(b)),
            (Value::String(_), Value::String(s)) => Ok(Value::String(s)),
            (Value::Array(slots), Value::Array(items)) => {
                if slots.len() != items.len() {
                    return Err(format!(
                        "cannot store an array of length {} in an array of length {}",
                        items.len(),
                        slots.len()
                    ));
                }
                slots
                    .iter()
                    .zip(items)
                    .map(|(slot, item)| slot.convert_for_store(item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
            (slot, value) => Err(format!(
                "cannot store a {} value in a {} variable",
                value.type_name(),
                slot.type_name()
            )),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Void => write!(f, "void"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Double(n) => {
                // Always show at least one decimal place for doubles
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{:.1}", n)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}
