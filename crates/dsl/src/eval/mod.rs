//! Expression and block evaluation.
//!
//! `evaluate_block` projects a block body onto an [`ArgsSchema`] under a
//! [`Scope`], producing a coerced [`Arguments`] record. Attribute
//! expressions are evaluated exactly once per call.

mod funcs;
mod refs;
mod scope;

pub use refs::{body_references, expr_references};
pub use scope::Scope;

use crate::ast::{Body, Expr, ExprKind, Stmt};
use crate::error::EvalError;
use crate::schema::{ArgsSchema, Arguments, BlockSpec};
use crate::span::Span;
use crate::value::Value;
use indexmap::IndexMap;

/// Project `body` onto `schema`, evaluating attribute expressions in
/// `scope` and coercing results to the declared kinds.
///
/// `span` is the span of the enclosing block, used for whole-body errors
/// (missing attributes or blocks).
pub fn evaluate_block(
    body: &Body,
    span: Span,
    scope: &Scope,
    schema: &ArgsSchema,
) -> Result<Arguments, EvalError> {
    let mut fields: IndexMap<String, Value> = IndexMap::new();

    for stmt in body {
        match stmt {
            Stmt::Attribute(attr) => {
                let spec = schema.attribute(&attr.name).ok_or_else(|| {
                    EvalError::UnknownAttribute {
                        name: attr.name.clone(),
                        span: attr.span,
                    }
                })?;
                if fields.contains_key(&attr.name) {
                    return Err(EvalError::Message {
                        message: format!("attribute {:?} already set", attr.name),
                        span: attr.span,
                    });
                }
                let value = evaluate_expr(&attr.value, scope)?;
                let coerced = value.coerce(&spec.kind).map_err(|source| EvalError::Coerce {
                    name: attr.name.clone(),
                    source,
                    span: attr.span,
                })?;
                fields.insert(attr.name.clone(), coerced);
            }
            Stmt::Block(block) => {
                let name = block.full_name();
                let spec = schema
                    .block_spec(&name)
                    .ok_or_else(|| EvalError::UnknownBlock {
                        name: name.clone(),
                        span: block.span,
                    })?;
                let inner = evaluate_block(&block.body, block.span, scope, &spec.schema)?;
                append_block(&mut fields, spec, inner, block.span)?;
            }
        }
    }

    apply_defaults(&mut fields, schema, span)?;
    Ok(Arguments::new(fields))
}

/// Store a projected sub-block record under its block name.
fn append_block(
    fields: &mut IndexMap<String, Value>,
    spec: &BlockSpec,
    inner: Arguments,
    span: Span,
) -> Result<(), EvalError> {
    let value = inner.to_value();
    if spec.multiple {
        match fields
            .entry(spec.name.clone())
            .or_insert_with(|| Value::List(Vec::new()))
        {
            Value::List(items) => items.push(value),
            _ => unreachable!("multiple blocks always project to lists"),
        }
    } else if fields.contains_key(&spec.name) {
        return Err(EvalError::DuplicateBlock {
            name: spec.name.clone(),
            span,
        });
    } else {
        fields.insert(spec.name.clone(), value);
    }
    Ok(())
}

/// Check required members and fill in defaults.
fn apply_defaults(
    fields: &mut IndexMap<String, Value>,
    schema: &ArgsSchema,
    span: Span,
) -> Result<(), EvalError> {
    for spec in &schema.attributes {
        if fields.contains_key(&spec.name) {
            continue;
        }
        if let Some(default) = &spec.default {
            fields.insert(spec.name.clone(), default.clone());
        } else if spec.required {
            return Err(EvalError::MissingAttribute {
                name: spec.name.clone(),
                span,
            });
        }
    }
    for spec in &schema.blocks {
        if fields.contains_key(&spec.name) {
            continue;
        }
        if spec.required {
            return Err(EvalError::MissingBlock {
                name: spec.name.clone(),
                span,
            });
        }
        if spec.multiple {
            fields.insert(spec.name.clone(), Value::List(Vec::new()));
        }
    }
    Ok(())
}

/// Evaluate one expression in a scope.
pub fn evaluate_expr(expr: &Expr, scope: &Scope) -> Result<Value, EvalError> {
    // Ident/access chains resolve as one dotted lookup so that errors name
    // the full path the user wrote.
    if let Some(path) = expr.as_path() {
        return resolve_path(&path.0, scope, expr.span);
    }

    match &expr.kind {
        ExprKind::Null => Ok(Value::Null),
        ExprKind::Bool(b) => Ok(Value::Bool(*b)),
        ExprKind::Int(n) => Ok(Value::Int(*n)),
        ExprKind::Float(x) => Ok(Value::Float(*x)),
        ExprKind::String(s) => Ok(Value::String(s.clone())),
        ExprKind::Duration(d) => Ok(Value::Duration(*d)),
        ExprKind::Ident(_) => unreachable!("bare identifiers are paths"),
        // Access on a computed base (call result, indexed value).
        ExprKind::Access { object, field } => {
            let object = evaluate_expr(object, scope)?;
            match object {
                Value::Object(fields) => {
                    fields
                        .get(field)
                        .cloned()
                        .ok_or_else(|| EvalError::UnknownReference {
                            name: field.clone(),
                            span: expr.span,
                        })
                }
                other => Err(EvalError::Type {
                    expected: crate::value::ValueKind::Object,
                    actual: other.kind_name(),
                    span: expr.span,
                }),
            }
        }
        ExprKind::Index { object, index } => {
            let object = evaluate_expr(object, scope)?;
            let index = evaluate_expr(index, scope)?;
            index_value(object, index, expr.span)
        }
        ExprKind::Call { func, args } => {
            let args = args
                .iter()
                .map(|arg| evaluate_expr(arg, scope))
                .collect::<Result<Vec<_>, _>>()?;
            funcs::call(func, args, expr.span)
        }
        ExprKind::List(items) => {
            let values = items
                .iter()
                .map(|item| evaluate_expr(item, scope))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::List(values))
        }
        ExprKind::Object(fields) => {
            let mut object = IndexMap::new();
            for (key, value) in fields {
                object.insert(key.clone(), evaluate_expr(value, scope)?);
            }
            Ok(Value::Object(object))
        }
        ExprKind::Unary { op, operand } => {
            let value = evaluate_expr(operand, scope)?;
            unary(*op, value, expr.span)
        }
        ExprKind::Binary { op, left, right } => binary(*op, left, right, scope, expr.span),
        ExprKind::Conditional {
            cond,
            then,
            otherwise,
        } => {
            let cond = evaluate_expr(cond, scope)?;
            match cond {
                Value::Bool(true) => evaluate_expr(then, scope),
                Value::Bool(false) => evaluate_expr(otherwise, scope),
                other => Err(EvalError::Type {
                    expected: crate::value::ValueKind::Bool,
                    actual: other.kind_name(),
                    span: expr.span,
                }),
            }
        }
    }
}

/// Resolve a dotted path against the scope, walking object fields.
fn resolve_path(segments: &[String], scope: &Scope, span: Span) -> Result<Value, EvalError> {
    let root = scope
        .lookup(&segments[0])
        .ok_or_else(|| EvalError::UnknownReference {
            name: segments[0].clone(),
            span,
        })?;

    let mut current = root;
    for (i, segment) in segments.iter().enumerate().skip(1) {
        match current {
            Value::Object(fields) => {
                current = fields.get(segment).ok_or_else(|| EvalError::UnknownReference {
                    name: segments[..=i].join("."),
                    span,
                })?;
            }
            other => {
                return Err(EvalError::Type {
                    expected: crate::value::ValueKind::Object,
                    actual: other.kind_name(),
                    span,
                });
            }
        }
    }
    Ok(current.clone())
}

fn index_value(object: Value, index: Value, span: Span) -> Result<Value, EvalError> {
    match (object, index) {
        (Value::List(items), Value::Int(n)) => {
            let idx = usize::try_from(n).ok().filter(|i| *i < items.len());
            match idx {
                Some(i) => Ok(items[i].clone()),
                None => Err(EvalError::Message {
                    message: format!("index {} out of bounds (len {})", n, items.len()),
                    span,
                }),
            }
        }
        (Value::Object(fields), Value::String(key)) => {
            fields
                .get(&key)
                .cloned()
                .ok_or_else(|| EvalError::UnknownReference { name: key, span })
        }
        (object, index) => Err(EvalError::Message {
            message: format!(
                "cannot index {} with {}",
                object.kind_name(),
                index.kind_name()
            ),
            span,
        }),
    }
}

fn unary(op: crate::ast::UnaryOp, value: Value, span: Span) -> Result<Value, EvalError> {
    use crate::ast::UnaryOp;
    match (op, value) {
        (UnaryOp::Neg, Value::Int(n)) => Ok(Value::Int(-n)),
        (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (op, value) => Err(EvalError::Message {
            message: format!("operator {:?} is not defined for {}", op, value.kind_name()),
            span,
        }),
    }
}

fn binary(
    op: crate::ast::BinaryOp,
    left: &Expr,
    right: &Expr,
    scope: &Scope,
    span: Span,
) -> Result<Value, EvalError> {
    use crate::ast::BinaryOp;

    // Logical operators short-circuit.
    if matches!(op, BinaryOp::And | BinaryOp::Or) {
        let lhs = expect_bool(evaluate_expr(left, scope)?, span)?;
        return match (op, lhs) {
            (BinaryOp::And, false) => Ok(Value::Bool(false)),
            (BinaryOp::Or, true) => Ok(Value::Bool(true)),
            _ => {
                let rhs = expect_bool(evaluate_expr(right, scope)?, span)?;
                Ok(Value::Bool(rhs))
            }
        };
    }

    let lhs = evaluate_expr(left, scope)?;
    let rhs = evaluate_expr(right, scope)?;

    match op {
        BinaryOp::Eq => Ok(Value::Bool(lhs == rhs)),
        BinaryOp::Ne => Ok(Value::Bool(lhs != rhs)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => compare(op, lhs, rhs, span),
        BinaryOp::Add => arithmetic_add(lhs, rhs, span),
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            arithmetic(op, lhs, rhs, span)
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuited above"),
    }
}

fn expect_bool(value: Value, span: Span) -> Result<bool, EvalError> {
    value.as_bool().ok_or_else(|| EvalError::Type {
        expected: crate::value::ValueKind::Bool,
        actual: value.kind_name(),
        span,
    })
}

fn compare(
    op: crate::ast::BinaryOp,
    lhs: Value,
    rhs: Value,
    span: Span,
) -> Result<Value, EvalError> {
    use crate::ast::BinaryOp;
    use std::cmp::Ordering;

    let ordering = match (&lhs, &rhs) {
        (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => a.partial_cmp(b),
        (Value::Duration(a), Value::Duration(b)) => a.partial_cmp(b),
        _ => match (lhs.as_float(), rhs.as_float()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };

    let Some(ordering) = ordering else {
        return Err(EvalError::Message {
            message: format!(
                "cannot compare {} with {}",
                lhs.kind_name(),
                rhs.kind_name()
            ),
            span,
        });
    };

    let result = match op {
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::Le => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::Ge => ordering != Ordering::Less,
        _ => unreachable!(),
    };
    Ok(Value::Bool(result))
}

fn arithmetic_add(lhs: Value, rhs: Value, span: Span) -> Result<Value, EvalError> {
    match (&lhs, &rhs) {
        (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
        (Value::Duration(a), Value::Duration(b)) => Ok(Value::Duration(*a + *b)),
        _ => arithmetic(crate::ast::BinaryOp::Add, lhs, rhs, span),
    }
}

fn arithmetic(
    op: crate::ast::BinaryOp,
    lhs: Value,
    rhs: Value,
    span: Span,
) -> Result<Value, EvalError> {
    use crate::ast::BinaryOp;

    if let (Value::Int(a), Value::Int(b)) = (&lhs, &rhs) {
        let (a, b) = (*a, *b);
        return match op {
            BinaryOp::Add => Ok(Value::Int(a.wrapping_add(b))),
            BinaryOp::Sub => Ok(Value::Int(a.wrapping_sub(b))),
            BinaryOp::Mul => Ok(Value::Int(a.wrapping_mul(b))),
            BinaryOp::Div if b != 0 => Ok(Value::Int(a / b)),
            BinaryOp::Mod if b != 0 => Ok(Value::Int(a % b)),
            BinaryOp::Div | BinaryOp::Mod => Err(EvalError::Message {
                message: "division by zero".to_string(),
                span,
            }),
            _ => unreachable!(),
        };
    }

    match (lhs.as_float(), rhs.as_float()) {
        (Some(a), Some(b)) => match op {
            BinaryOp::Add => Ok(Value::Float(a + b)),
            BinaryOp::Sub => Ok(Value::Float(a - b)),
            BinaryOp::Mul => Ok(Value::Float(a * b)),
            BinaryOp::Div => Ok(Value::Float(a / b)),
            BinaryOp::Mod => Ok(Value::Float(a % b)),
            _ => unreachable!(),
        },
        _ => Err(EvalError::Message {
            message: format!(
                "operator {} is not defined for {} and {}",
                op,
                lhs.kind_name(),
                rhs.kind_name()
            ),
            span,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_expr_text, parse_file};
    use crate::value::ValueKind;
    use std::time::Duration;

    fn eval(source: &str, scope: &Scope) -> Result<Value, EvalError> {
        let expr = parse_expr_text(source).unwrap();
        evaluate_expr(&expr, scope)
    }

    fn scope_with(name: &str, value: Value) -> Scope {
        let mut vars = IndexMap::new();
        vars.insert(name.to_string(), value);
        Scope::new(vars)
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        let scope = Scope::default();
        assert_eq!(eval("1 + 2 * 3", &scope).unwrap(), Value::Int(7));
        assert_eq!(eval("10 / 4", &scope).unwrap(), Value::Int(2));
        assert_eq!(eval("10.0 / 4", &scope).unwrap(), Value::Float(2.5));
        assert_eq!(
            eval("\"a\" + \"b\"", &scope).unwrap(),
            Value::String("ab".into())
        );
    }

    #[test]
    fn test_division_by_zero() {
        let err = eval("1 / 0", &Scope::default()).unwrap_err();
        assert!(matches!(err, EvalError::Message { .. }));
    }

    #[test]
    fn test_short_circuit() {
        // The right operand would fail to resolve; && must not evaluate it.
        let scope = scope_with("enabled", Value::Bool(false));
        assert_eq!(
            eval("enabled && missing.thing", &scope).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_conditional() {
        let scope = scope_with("n", Value::Int(3));
        assert_eq!(eval("n > 2 ? \"big\" : \"small\"", &scope).unwrap(), Value::String("big".into()));
    }

    #[test]
    fn test_path_resolution_through_objects() {
        let mut inner = IndexMap::new();
        inner.insert("port".to_string(), Value::Int(9090));
        let mut outer = IndexMap::new();
        outer.insert("server".to_string(), Value::Object(inner));
        let scope = scope_with("config", Value::Object(outer));

        assert_eq!(eval("config.server.port", &scope).unwrap(), Value::Int(9090));

        let err = eval("config.server.missing", &scope).unwrap_err();
        match err {
            EvalError::UnknownReference { name, .. } => {
                assert_eq!(name, "config.server.missing");
            }
            other => panic!("expected unknown reference, got {:?}", other),
        }
    }

    #[test]
    fn test_indexing() {
        let scope = scope_with(
            "xs",
            Value::List(vec![Value::Int(10), Value::Int(20)]),
        );
        assert_eq!(eval("xs[1]", &scope).unwrap(), Value::Int(20));
        assert!(eval("xs[5]", &scope).is_err());
    }

    #[test]
    fn test_evaluate_block_against_schema() {
        let file = parse_file(
            "test.cfx",
            r#"
            local.pulse "p" {
                max       = 10
                frequency = 10ms
            }
            "#,
        )
        .unwrap();
        let Stmt::Block(block) = &file.body[0] else {
            panic!("expected block");
        };

        let schema = ArgsSchema::new()
            .required("max", ValueKind::Int)
            .optional(
                "frequency",
                ValueKind::Duration,
                Value::Duration(Duration::from_secs(1)),
            )
            .optional("enabled", ValueKind::Bool, Value::Bool(true));

        let args =
            evaluate_block(&block.body, block.span, &Scope::default(), &schema).unwrap();
        assert_eq!(args.int("max"), Some(10));
        assert_eq!(args.duration("frequency"), Some(Duration::from_millis(10)));
        // Default applied for the unset attribute.
        assert_eq!(args.bool("enabled"), Some(true));
    }

    #[test]
    fn test_missing_required_attribute() {
        let file = parse_file("test.cfx", "local.pulse \"p\" { }").unwrap();
        let Stmt::Block(block) = &file.body[0] else {
            panic!("expected block");
        };
        let schema = ArgsSchema::new().required("max", ValueKind::Int);
        let err =
            evaluate_block(&block.body, block.span, &Scope::default(), &schema).unwrap_err();
        assert!(matches!(err, EvalError::MissingAttribute { ref name, .. } if name == "max"));
    }

    #[test]
    fn test_unknown_attribute() {
        let file = parse_file("test.cfx", "local.pulse \"p\" { nope = 1 }").unwrap();
        let Stmt::Block(block) = &file.body[0] else {
            panic!("expected block");
        };
        let schema = ArgsSchema::new();
        let err =
            evaluate_block(&block.body, block.span, &Scope::default(), &schema).unwrap_err();
        assert!(matches!(err, EvalError::UnknownAttribute { ref name, .. } if name == "nope"));
    }

    #[test]
    fn test_sub_blocks_single_and_multiple() {
        let file = parse_file(
            "test.cfx",
            r#"
            syslog.listener "main" {
                tcp { address = ":5514" }
                tcp { address = ":5515" }
            }
            "#,
        )
        .unwrap();
        let Stmt::Block(block) = &file.body[0] else {
            panic!("expected block");
        };

        let schema = ArgsSchema::new().block(
            "tcp",
            false,
            true,
            ArgsSchema::new().required("address", ValueKind::String),
        );
        let args =
            evaluate_block(&block.body, block.span, &Scope::default(), &schema).unwrap();
        let tcp = args.blocks("tcp");
        assert_eq!(tcp.len(), 2);
        assert_eq!(tcp[0].str("address"), Some(":5514"));
        assert_eq!(tcp[1].str("address"), Some(":5515"));

        // The same body against a single-instance schema is a duplicate.
        let single = ArgsSchema::new().block(
            "tcp",
            false,
            false,
            ArgsSchema::new().required("address", ValueKind::String),
        );
        let err =
            evaluate_block(&block.body, block.span, &Scope::default(), &single).unwrap_err();
        assert!(matches!(err, EvalError::DuplicateBlock { .. }));
    }

    #[test]
    fn test_secret_not_rendered_in_errors() {
        // A secret value failing to coerce must not leak its contents.
        let scope = scope_with(
            "token",
            Value::Secret(crate::value::Secret::new("super-sensitive")),
        );
        let err = eval("token + 1", &scope).unwrap_err();
        assert!(!err.to_string().contains("super-sensitive"));
    }
}
