//! Expression evaluator
//!
//! Evaluates parsed expressions against a [`Scope`] with JavaScript-like
//! semantics. Assignments and updates write through the scope; member
//! assignments rebuild the root variable and store it back.

use super::scope::Scope;
use crate::lexer::Span;
use crate::parser::ast::*;
use parley_core::{format_number, CompileError, CompileResult, ErrorCode, Object, Value};

/// Evaluate `expr` in `scope`.
pub fn evaluate(expr: &Expr, scope: &mut Scope) -> CompileResult<Value> {
    Evaluator::new(scope).eval(expr)
}

/// Result of evaluating a link of a member/call chain.
enum Chained {
    Value(Value),
    /// An optional link met `null`/`undefined`; the rest of the chain is skipped.
    ShortCircuit,
}

/// One key of an assignment path such as `foo.bar[0]`.
struct PathKey {
    name: String,
    computed: bool,
    span: Span,
}

pub struct Evaluator<'a> {
    scope: &'a mut Scope,
}

impl<'a> Evaluator<'a> {
    pub fn new(scope: &'a mut Scope) -> Self {
        Self { scope }
    }

    pub fn eval(&mut self, expr: &Expr) -> CompileResult<Value> {
        match &expr.kind {
            ExprKind::Literal(literal) => Ok(match literal {
                Literal::Undefined => Value::Undefined,
                Literal::Null => Value::Null,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Number(n) => Value::Number(*n),
                Literal::String(s) => Value::String(s.clone()),
            }),

            ExprKind::Identifier(name) => self
                .scope
                .get(name)
                .cloned()
                .map_err(|e| at(e, expr.span)),

            ExprKind::Array(elements) => {
                let items = elements
                    .iter()
                    .map(|element| self.eval(element))
                    .collect::<CompileResult<Vec<_>>>()?;
                Ok(Value::Array(items))
            }

            ExprKind::Object(properties) => {
                let mut object = Object::new();
                for property in properties {
                    let key = match &property.key {
                        PropertyKey::Static(name) => name.clone(),
                        PropertyKey::Computed(key) => property_key(&self.eval(key)?),
                    };
                    let value = self.eval(&property.value)?;
                    object.insert(key, value);
                }
                Ok(Value::Object(object))
            }

            ExprKind::Member { .. } | ExprKind::Call { .. } => match self.eval_chain(expr)? {
                Chained::Value(value) => Ok(value),
                Chained::ShortCircuit => Ok(Value::Undefined),
            },

            ExprKind::Unary { op, argument } => self.eval_unary(*op, argument),

            ExprKind::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, &left, &right).map_err(|e| at(e, expr.span))
            }

            ExprKind::Logical { op, left, right } => {
                let left = self.eval(left)?;
                let take_left = match op {
                    LogicalOp::And => !left.is_truthy(),
                    LogicalOp::Or => left.is_truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if take_left {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }

            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test)?.is_truthy() {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }

            ExprKind::Assign { op, target, value } => self.eval_assign(*op, target, value, expr.span),

            ExprKind::Update {
                op,
                prefix,
                argument,
            } => self.eval_update(*op, *prefix, argument, expr.span),
        }
    }

    // ========================================================================
    // Member & call chains
    // ========================================================================

    fn eval_chain(&mut self, expr: &Expr) -> CompileResult<Chained> {
        match &expr.kind {
            ExprKind::Member {
                object,
                property,
                optional,
            } => {
                let target = match self.eval_link(object)? {
                    Chained::Value(value) => value,
                    Chained::ShortCircuit => return Ok(Chained::ShortCircuit),
                };
                if *optional && target.is_nullish() {
                    return Ok(Chained::ShortCircuit);
                }
                let (key, computed) = match property {
                    MemberProperty::Static(name) => (name.clone(), false),
                    MemberProperty::Computed(key) => (property_key(&self.eval(key)?), true),
                };
                let strict = !computed && !*optional && !object.has_optional_link();
                get_property(&target, &key, strict)
                    .map(Chained::Value)
                    .map_err(|e| at(e, expr.span))
            }

            ExprKind::Call {
                callee,
                arguments,
                optional,
            } => {
                let function = match self.eval_link(callee)? {
                    Chained::Value(value) => value,
                    Chained::ShortCircuit => return Ok(Chained::ShortCircuit),
                };
                if *optional && function.is_nullish() {
                    return Ok(Chained::ShortCircuit);
                }
                let Value::Function(callable) = function else {
                    return Err(CompileError::new(
                        ErrorCode::NotAFunction,
                        format!("'{}' is not a function", describe(callee)),
                    )
                    .at(expr.span.start, expr.span.end));
                };
                let args = arguments
                    .iter()
                    .map(|argument| self.eval(argument))
                    .collect::<CompileResult<Vec<_>>>()?;
                callable.call(&args).map(Chained::Value).map_err(|msg| {
                    CompileError::new(
                        ErrorCode::FunctionCallError,
                        format!("Error calling function '{}': {}", callable.name(), msg),
                    )
                    .at(expr.span.start, expr.span.end)
                })
            }

            _ => self.eval(expr).map(Chained::Value),
        }
    }

    fn eval_link(&mut self, expr: &Expr) -> CompileResult<Chained> {
        match expr.kind {
            ExprKind::Member { .. } | ExprKind::Call { .. } => self.eval_chain(expr),
            _ => self.eval(expr).map(Chained::Value),
        }
    }

    // ========================================================================
    // Unary
    // ========================================================================

    fn eval_unary(&mut self, op: UnaryOp, argument: &Expr) -> CompileResult<Value> {
        if op == UnaryOp::Typeof {
            if let ExprKind::Identifier(name) = &argument.kind {
                if !self.scope.exists(name) {
                    return Ok(Value::from("undefined"));
                }
            }
        }

        let value = self.eval(argument)?;
        Ok(match op {
            UnaryOp::Neg => Value::Number(-value.to_number()),
            UnaryOp::Plus => Value::Number(value.to_number()),
            UnaryOp::Not => Value::Bool(!value.is_truthy()),
            UnaryOp::BitNot => Value::Number(f64::from(!value.to_int32())),
            UnaryOp::Typeof => Value::from(value.type_of()),
            UnaryOp::Void => Value::Undefined,
        })
    }

    // ========================================================================
    // Assignment & update
    // ========================================================================

    fn eval_assign(&mut self, op: AssignOp, target: &Expr, value: &Expr, span: Span) -> CompileResult<Value> {
        if let ExprKind::Identifier(name) = &target.kind {
            let result = match op.binary() {
                None => self.eval(value)?,
                Some(binary_op) => {
                    let current = self.scope.get(name).cloned().map_err(|e| at(e, target.span))?;
                    let rhs = self.eval(value)?;
                    binary(binary_op, &current, &rhs).map_err(|e| at(e, span))?
                }
            };
            self.scope.set(name, result.clone());
            return Ok(result);
        }

        let (root, keys) = self.resolve_path(target)?;
        let before = self.scope.get(&root).cloned().map_err(|e| at(e, target.span))?;

        let result = match op.binary() {
            None => self.eval(value)?,
            Some(binary_op) => {
                let current = read_path(&before, &keys)?;
                let rhs = self.eval(value)?;
                binary(binary_op, &current, &rhs).map_err(|e| at(e, span))?
            }
        };

        // The right-hand side may itself have changed the root variable.
        let mut root_value = self.scope.get(&root).cloned().map_err(|e| at(e, target.span))?;
        write_path(&mut root_value, &keys, result.clone())?;
        self.scope.set(&root, root_value);
        Ok(result)
    }

    fn eval_update(&mut self, op: UpdateOp, prefix: bool, argument: &Expr, span: Span) -> CompileResult<Value> {
        let delta = match op {
            UpdateOp::Increment => 1.0,
            UpdateOp::Decrement => -1.0,
        };
        let check = |value: &Value| match value {
            Value::Number(n) => Ok(*n),
            other => Err(CompileError::invalid_update(op.as_str(), other.kind_name())
                .at(span.start, span.end)),
        };

        let old = if let ExprKind::Identifier(name) = &argument.kind {
            let old = check(self.scope.get(name).map_err(|e| at(e, argument.span))?)?;
            self.scope.set(name, Value::Number(old + delta));
            old
        } else {
            let (root, keys) = self.resolve_path(argument)?;
            let mut root_value = self.scope.get(&root).cloned().map_err(|e| at(e, argument.span))?;
            let old = check(&read_path(&root_value, &keys)?)?;
            write_path(&mut root_value, &keys, Value::Number(old + delta))?;
            self.scope.set(&root, root_value);
            old
        };

        Ok(Value::Number(if prefix { old + delta } else { old }))
    }

    /// Split a member target into its root variable and the keys below it,
    /// evaluating computed keys left to right.
    fn resolve_path(&mut self, target: &Expr) -> CompileResult<(String, Vec<PathKey>)> {
        let mut keys = Vec::new();
        let mut current = target;
        loop {
            match &current.kind {
                ExprKind::Member {
                    object,
                    property,
                    optional: false,
                } => {
                    keys.push((property, current.span));
                    current = object.as_ref();
                }
                ExprKind::Identifier(name) => {
                    let root = name.clone();
                    let mut path = Vec::with_capacity(keys.len());
                    for (property, span) in keys.into_iter().rev() {
                        path.push(match property {
                            MemberProperty::Static(name) => PathKey {
                                name: name.clone(),
                                computed: false,
                                span,
                            },
                            MemberProperty::Computed(key) => PathKey {
                                name: property_key(&self.eval(key)?),
                                computed: true,
                                span,
                            },
                        });
                    }
                    return Ok((root, path));
                }
                _ => {
                    return Err(CompileError::new(
                        ErrorCode::InvalidAssignment,
                        "Invalid assignment target",
                    )
                    .at(target.span.start, target.span.end))
                }
            }
        }
    }
}

// ============================================================================
// PROPERTY ACCESS
// ============================================================================

fn at(err: CompileError, span: Span) -> CompileError {
    if err.start == 0 && err.end == 0 {
        err.at(span.start, span.end)
    } else {
        err
    }
}

/// Property name for a computed key (`foo[1]` reads property `"1"`).
fn property_key(value: &Value) -> String {
    match value {
        Value::Number(n) => format_number(*n),
        other => other.to_js_string(),
    }
}

/// Largest array index; keys at or above it are plain property names.
const MAX_ARRAY_INDEX: usize = u32::MAX as usize - 1;

/// Assignments may not grow an array by more than this many holes.
const MAX_ARRAY_GAP: usize = 1 << 16;

fn array_index(key: &str) -> Option<usize> {
    key.parse::<usize>()
        .ok()
        .filter(|index| *index <= MAX_ARRAY_INDEX && index.to_string() == key)
}

/// Resize `items` to `len`, refusing growth past the hole limit.
fn grow_array(items: &mut Vec<Value>, len: usize, key: &PathKey) -> CompileResult<()> {
    if len > items.len().saturating_add(MAX_ARRAY_GAP) {
        return Err(CompileError::new(
            ErrorCode::InvalidAssignment,
            format!("Array length {} is too large", len),
        )
        .at(key.span.start, key.span.end));
    }
    items.resize(len, Value::Undefined);
    Ok(())
}

/// Read `key` from `target`. A `strict` read (plain dot access) of a missing
/// property is an error; other reads yield `undefined`.
fn get_property(target: &Value, key: &str, strict: bool) -> CompileResult<Value> {
    let missing = || {
        if strict {
            Err(CompileError::property_not_exists(key))
        } else {
            Ok(Value::Undefined)
        }
    };

    match target {
        Value::Undefined | Value::Null => Err(CompileError::new(
            ErrorCode::PropertyNotExists,
            format!("Cannot read property '{}' of {}", key, target.kind_name()),
        )),
        Value::Object(map) => match map.get(key) {
            Some(value) => Ok(value.clone()),
            None => missing(),
        },
        Value::Array(items) => {
            if key == "length" {
                return Ok(Value::from(items.len()));
            }
            match array_index(key) {
                Some(index) => Ok(items.get(index).cloned().unwrap_or_default()),
                None => missing(),
            }
        }
        Value::String(s) => {
            if key == "length" {
                return Ok(Value::from(s.chars().count()));
            }
            match array_index(key) {
                Some(index) => Ok(s
                    .chars()
                    .nth(index)
                    .map(|c| Value::String(c.to_string()))
                    .unwrap_or_default()),
                None => missing(),
            }
        }
        Value::Bool(_) | Value::Number(_) | Value::Function(_) => missing(),
    }
}

fn read_path(root: &Value, keys: &[PathKey]) -> CompileResult<Value> {
    let mut current = root.clone();
    for key in keys {
        current = get_property(&current, &key.name, !key.computed)
            .map_err(|e| e.at(key.span.start, key.span.end))?;
    }
    Ok(current)
}

fn write_path(target: &mut Value, keys: &[PathKey], value: Value) -> CompileResult<()> {
    let Some((key, rest)) = keys.split_first() else {
        *target = value;
        return Ok(());
    };

    if rest.is_empty() {
        return set_property(target, key, value);
    }

    let child = match target {
        Value::Object(map) => map.get_mut(&key.name),
        Value::Array(items) => array_index(&key.name).and_then(|index| items.get_mut(index)),
        other => return Err(invalid_assignment(key, other)),
    };
    match child {
        Some(child) => write_path(child, rest, value),
        None => Err(CompileError::property_not_exists(&key.name).at(key.span.start, key.span.end)),
    }
}

fn set_property(target: &mut Value, key: &PathKey, value: Value) -> CompileResult<()> {
    match target {
        Value::Object(map) => {
            if !key.computed && !map.contains_key(&key.name) {
                return Err(CompileError::property_not_exists(&key.name)
                    .at(key.span.start, key.span.end));
            }
            map.insert(key.name.clone(), value);
            Ok(())
        }
        Value::Array(items) => match array_index(&key.name) {
            Some(index) => {
                if index >= items.len() {
                    grow_array(items, index + 1, key)?;
                }
                items[index] = value;
                Ok(())
            }
            None if key.name == "length" => match value {
                Value::Number(n) if n >= 0.0 && n.fract() == 0.0 && n <= MAX_ARRAY_INDEX as f64 => {
                    grow_array(items, n as usize, key)
                }
                _ => Err(CompileError::new(ErrorCode::InvalidAssignment, "Invalid array length")
                    .at(key.span.start, key.span.end)),
            },
            None if !key.computed => Err(CompileError::property_not_exists(&key.name)
                .at(key.span.start, key.span.end)),
            None => Err(invalid_assignment(key, target)),
        },
        other => Err(invalid_assignment(key, other)),
    }
}

fn invalid_assignment(key: &PathKey, target: &Value) -> CompileError {
    CompileError::new(
        ErrorCode::InvalidAssignment,
        format!(
            "Cannot assign property '{}' on a value of type '{}'",
            key.name,
            target.kind_name()
        ),
    )
    .at(key.span.start, key.span.end)
}

/// Human-readable name of a callee for error messages.
fn describe(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Identifier(name) => name.clone(),
        ExprKind::Member {
            object,
            property: MemberProperty::Static(name),
            ..
        } => format!("{}.{}", describe(object), name),
        ExprKind::Member { object, .. } => format!("{}[...]", describe(object)),
        _ => "expression".to_string(),
    }
}

// ============================================================================
// BINARY OPERATORS
// ============================================================================

/// Apply a binary operator. Errors carry no span; callers attach one.
pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> CompileResult<Value> {
    let number = |f: fn(f64, f64) -> f64| -> CompileResult<Value> {
        Ok(Value::Number(f(left.to_number(), right.to_number())))
    };
    let int32 = |f: fn(i32, i32) -> i32| -> CompileResult<Value> {
        Ok(Value::Number(f64::from(f(left.to_int32(), right.to_int32()))))
    };

    match op {
        BinaryOp::Add => {
            let (l, r) = (left.to_primitive(), right.to_primitive());
            if matches!(l, Value::String(_)) || matches!(r, Value::String(_)) {
                Ok(Value::String(l.to_js_string() + &r.to_js_string()))
            } else {
                Ok(Value::Number(l.to_number() + r.to_number()))
            }
        }
        BinaryOp::Sub => number(|a, b| a - b),
        BinaryOp::Mul => number(|a, b| a * b),
        BinaryOp::Div => number(|a, b| a / b),
        BinaryOp::Rem => number(|a, b| a % b),
        BinaryOp::Pow => number(pow),
        BinaryOp::Eq => Ok(Value::Bool(left.loose_eq(right))),
        BinaryOp::NotEq => Ok(Value::Bool(!left.loose_eq(right))),
        BinaryOp::StrictEq => Ok(Value::Bool(left.strict_eq(right))),
        BinaryOp::StrictNotEq => Ok(Value::Bool(!left.strict_eq(right))),
        BinaryOp::Lt => Ok(Value::Bool(compare(left, right, |o| o.is_lt()))),
        BinaryOp::Le => Ok(Value::Bool(compare(left, right, |o| o.is_le()))),
        BinaryOp::Gt => Ok(Value::Bool(compare(left, right, |o| o.is_gt()))),
        BinaryOp::Ge => Ok(Value::Bool(compare(left, right, |o| o.is_ge()))),
        BinaryOp::Shl => int32(|a, b| a.wrapping_shl(b as u32 & 31)),
        BinaryOp::Shr => int32(|a, b| a.wrapping_shr(b as u32 & 31)),
        BinaryOp::UShr => Ok(Value::Number(f64::from(
            left.to_uint32() >> (right.to_uint32() & 31),
        ))),
        BinaryOp::BitAnd => int32(|a, b| a & b),
        BinaryOp::BitOr => int32(|a, b| a | b),
        BinaryOp::BitXor => int32(|a, b| a ^ b),
        BinaryOp::In => {
            let key = property_key(left);
            match right {
                Value::Object(map) => Ok(Value::Bool(map.contains_key(&key))),
                Value::Array(items) => Ok(Value::Bool(
                    key == "length" || array_index(&key).map(|i| i < items.len()).unwrap_or(false),
                )),
                other => Err(CompileError::new(
                    ErrorCode::UnsupportedOperator,
                    format!(
                        "Cannot use 'in' operator to search for '{}' in a value of type '{}'",
                        key,
                        other.kind_name()
                    ),
                )),
            }
        }
        BinaryOp::Instanceof => Err(CompileError::new(
            ErrorCode::UnsupportedOperator,
            "The 'instanceof' operator is not supported",
        )),
    }
}

fn pow(base: f64, exponent: f64) -> f64 {
    if exponent.is_nan() || (base.abs() == 1.0 && exponent.is_infinite()) {
        return f64::NAN;
    }
    base.powf(exponent)
}

/// Relational comparison: strings compare lexicographically, everything else
/// numerically; any `NaN` makes the comparison false.
fn compare(left: &Value, right: &Value, test: fn(std::cmp::Ordering) -> bool) -> bool {
    let (l, r) = (left.to_primitive(), right.to_primitive());
    if let (Value::String(a), Value::String(b)) = (&l, &r) {
        return test(a.as_str().cmp(b.as_str()));
    }
    l.to_number()
        .partial_cmp(&r.to_number())
        .map(test)
        .unwrap_or(false)
}

// =============================================================================
// TESTS
// =============================================================================
