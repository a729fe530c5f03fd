//! Type-aware operator semantics.
//!
//! Integer arithmetic wraps. Mixed int/double operands promote to double.
//! Bitwise operators only accept ints. Relational operators always produce
//! a bool.

use crate::ast::{BinaryOp, OpClass, UnaryOp};
use crate::error::{CmmError, Span};
use crate::value::Value;
use std::cmp::Ordering;

pub fn evaluate_binary_op(
    operator: BinaryOp,
    left: Value,
    right: Value,
    span: &Span,
) -> Result<Value, CmmError> {
    match operator.class() {
        OpClass::Arithmetic => evaluate_arithmetic(operator, left, right, span),
        OpClass::Relational => evaluate_relation(operator, &left, &right, span),
        OpClass::Bitwise => evaluate_bitwise(operator, left, right, span),
    }
}

pub fn evaluate_unary_op(
    operator: UnaryOp,
    operand: Value,
    span: &Span,
) -> Result<Value, CmmError> {
    match (operator, operand) {
        (UnaryOp::Negate, Value::Int(n)) => Ok(Value::Int(n.wrapping_neg())),
        (UnaryOp::Negate, Value::Double(n)) => Ok(Value::Double(-n)),
        (UnaryOp::Plus, value) if value.is_numeric() => Ok(value),
        (UnaryOp::BitNot, Value::Int(n)) => Ok(Value::Int(!n)),
        (UnaryOp::Not, value) => match value.truth() {
            Some(truth) => Ok(Value::Bool(!truth)),
            None => Err(unary_type_error(operator, &value, span)),
        },
        (operator, value) => Err(unary_type_error(operator, &value, span)),
    }
}

fn unary_type_error(operator: UnaryOp, operand: &Value, span: &Span) -> CmmError {
    CmmError::runtime_error(
        *span,
        format!(
            "Cannot apply unary '{}' to {}",
            operator.symbol(),
            operand.type_name()
        ),
    )
}

fn binary_type_error(operator: BinaryOp, left: &Value, right: &Value, span: &Span) -> CmmError {
    CmmError::runtime_error(
        *span,
        format!(
            "Cannot apply '{}' to {} and {}",
            operator.symbol(),
            left.type_name(),
            right.type_name()
        ),
    )
}

fn as_double(value: &Value) -> Option<f64> {
    match value {
        Value::Int(n) => Some(*n as f64),
        Value::Double(d) => Some(*d),
        _ => None,
    }
}

fn division_by_zero(span: &Span) -> CmmError {
    CmmError::runtime_error(*span, "Division by zero".to_string())
}

fn evaluate_arithmetic(
    operator: BinaryOp,
    left: Value,
    right: Value,
    span: &Span,
) -> Result<Value, CmmError> {
    match (left, right) {
        (Value::Int(l), Value::Int(r)) => {
            let result = match operator {
                BinaryOp::Add => l.wrapping_add(r),
                BinaryOp::Subtract => l.wrapping_sub(r),
                BinaryOp::Multiply => l.wrapping_mul(r),
                BinaryOp::Divide if r == 0 => return Err(division_by_zero(span)),
                BinaryOp::Divide => l.wrapping_div(r),
                _ if r == 0 => return Err(division_by_zero(span)),
                _ => l.wrapping_rem(r),
            };
            Ok(Value::Int(result))
        }
        (Value::String(l), Value::String(r)) if operator == BinaryOp::Add => {
            Ok(Value::String(l + &r))
        }
        (left, right) => {
            let (Some(l), Some(r)) = (as_double(&left), as_double(&right)) else {
                return Err(binary_type_error(operator, &left, &right, span));
            };
            let result = match operator {
                BinaryOp::Add => l + r,
                BinaryOp::Subtract => l - r,
                BinaryOp::Multiply => l * r,
                _ if r == 0.0 => return Err(division_by_zero(span)),
                BinaryOp::Divide => l / r,
                _ => l % r,
            };
            Ok(Value::Double(result))
        }
    }
}

/// `None` when the two values cannot be compared for equality.
fn values_equal(left: &Value, right: &Value) -> Option<bool> {
    match (left, right) {
        (Value::Int(l), Value::Int(r)) => Some(l == r),
        (Value::Bool(l), Value::Bool(r)) => Some(l == r),
        (Value::String(l), Value::String(r)) => Some(l == r),
        (Value::Array(l), Value::Array(r)) => {
            if l.len() != r.len() {
                return Some(false);
            }
            for (a, b) in l.iter().zip(r) {
                if !values_equal(a, b)? {
                    return Some(false);
                }
            }
            Some(true)
        }
        _ => Some(as_double(left)? == as_double(right)?),
    }
}

/// Outer `None` when the kinds have no order; inner `None` for NaN.
fn values_order(left: &Value, right: &Value) -> Option<Option<Ordering>> {
    match (left, right) {
        (Value::Int(l), Value::Int(r)) => Some(Some(l.cmp(r))),
        (Value::Bool(l), Value::Bool(r)) => Some(Some(l.cmp(r))),
        (Value::String(l), Value::String(r)) => Some(Some(l.cmp(r))),
        _ => Some(as_double(left)?.partial_cmp(&as_double(right)?)),
    }
}

fn evaluate_relation(
    operator: BinaryOp,
    left: &Value,
    right: &Value,
    span: &Span,
) -> Result<Value, CmmError> {
    let result = match operator {
        BinaryOp::Equal | BinaryOp::NotEqual => {
            let equal = values_equal(left, right)
                .ok_or_else(|| binary_type_error(operator, left, right, span))?;
            equal == (operator == BinaryOp::Equal)
        }
        _ => {
            let ordering = values_order(left, right)
                .ok_or_else(|| binary_type_error(operator, left, right, span))?;
            match operator {
                BinaryOp::Less => ordering == Some(Ordering::Less),
                BinaryOp::LessEqual => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                BinaryOp::Greater => ordering == Some(Ordering::Greater),
                _ => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            }
        }
    };
    Ok(Value::Bool(result))
}

fn evaluate_bitwise(
    operator: BinaryOp,
    left: Value,
    right: Value,
    span: &Span,
) -> Result<Value, CmmError> {
    let (Value::Int(l), Value::Int(r)) = (&left, &right) else {
        return Err(CmmError::runtime_error_with_help(
            *span,
            format!(
                "Bitwise operator '{}' requires int operands, found {} and {}",
                operator.symbol(),
                left.type_name(),
                right.type_name()
            ),
            "Bitwise operators only work on integers.".to_string(),
        ));
    };
    let (l, r) = (*l, *r);

    let result = match operator {
        BinaryOp::BitAnd => l & r,
        BinaryOp::BitOr => l | r,
        BinaryOp::BitXor => l ^ r,
        _ => {
            if !(0..64).contains(&r) {
                return Err(CmmError::runtime_error(
                    *span,
                    format!("Shift amount {} is out of range", r),
                ));
            }
            if operator == BinaryOp::ShiftLeft {
                l.wrapping_shl(r as u32)
            } else {
                l >> r
            }
        }
    };
    Ok(Value::Int(result))
}
