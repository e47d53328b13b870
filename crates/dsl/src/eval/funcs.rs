//! Built-in functions available to configuration expressions.

use crate::ast::Path;
use crate::error::EvalError;
use crate::span::Span;
use crate::value::Value;

/// Invoke a built-in function by name.
pub fn call(func: &Path, args: Vec<Value>, span: Span) -> Result<Value, EvalError> {
    match func.to_string().as_str() {
        "concat" => concat(args, span),
        "len" => len(args, span),
        "coalesce" => Ok(coalesce(args)),
        "to_string" => to_string(args, span),
        "format" => format_fn(args, span),
        name => Err(EvalError::UnknownFunction {
            name: name.to_string(),
            span,
        }),
    }
}

/// `concat(list...)` — concatenate any number of lists.
fn concat(args: Vec<Value>, span: Span) -> Result<Value, EvalError> {
    let mut result = Vec::new();
    for arg in args {
        match arg {
            Value::List(items) => result.extend(items),
            other => {
                return Err(EvalError::Message {
                    message: format!("concat expects lists, got {}", other.kind_name()),
                    span,
                });
            }
        }
    }
    Ok(Value::List(result))
}

/// `len(x)` — length of a list, object, or string.
fn len(args: Vec<Value>, span: Span) -> Result<Value, EvalError> {
    match args.as_slice() {
        [Value::List(items)] => Ok(Value::Int(items.len() as i64)),
        [Value::Object(fields)] => Ok(Value::Int(fields.len() as i64)),
        [Value::String(s)] => Ok(Value::Int(s.chars().count() as i64)),
        [other] => Err(EvalError::Message {
            message: format!("len is not defined for {}", other.kind_name()),
            span,
        }),
        _ => Err(EvalError::Message {
            message: format!("len takes exactly one argument, got {}", args.len()),
            span,
        }),
    }
}

/// `coalesce(args...)` — the first non-null argument, or null.
fn coalesce(args: Vec<Value>) -> Value {
    args.into_iter()
        .find(|v| !matches!(v, Value::Null))
        .unwrap_or(Value::Null)
}

/// `to_string(x)` — render a value as a string.
fn to_string(args: Vec<Value>, span: Span) -> Result<Value, EvalError> {
    match args.as_slice() {
        [Value::String(s)] => Ok(Value::String(s.clone())),
        [value] => Ok(Value::String(format!("{}", value))),
        _ => Err(EvalError::Message {
            message: format!("to_string takes exactly one argument, got {}", args.len()),
            span,
        }),
    }
}

/// `format(fmt, args...)` — replace each `{}` in `fmt` with the next
/// argument's rendering.
fn format_fn(args: Vec<Value>, span: Span) -> Result<Value, EvalError> {
    let mut iter = args.into_iter();
    let fmt = match iter.next() {
        Some(Value::String(s)) => s,
        other => {
            return Err(EvalError::Message {
                message: format!(
                    "format expects a string first, got {}",
                    other.map_or("nothing", |v| v.kind_name())
                ),
                span,
            });
        }
    };

    let mut result = String::with_capacity(fmt.len());
    let mut rest = fmt.as_str();
    while let Some(pos) = rest.find("{}") {
        result.push_str(&rest[..pos]);
        match iter.next() {
            Some(Value::String(s)) => result.push_str(&s),
            Some(value) => result.push_str(&format!("{}", value)),
            None => {
                return Err(EvalError::Message {
                    message: "format has more placeholders than arguments".to_string(),
                    span,
                });
            }
        }
        rest = &rest[pos + 2..];
    }
    result.push_str(rest);
    Ok(Value::String(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_named(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        call(&Path::from(name), args, Span::default())
    }

    #[test]
    fn test_concat() {
        let result = call_named(
            "concat",
            vec![
                Value::List(vec![Value::Int(1)]),
                Value::List(vec![Value::Int(2), Value::Int(3)]),
            ],
        )
        .unwrap();
        assert_eq!(
            result,
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn test_len() {
        assert_eq!(
            call_named("len", vec![Value::String("abc".into())]).unwrap(),
            Value::Int(3)
        );
        assert!(call_named("len", vec![Value::Int(1)]).is_err());
    }

    #[test]
    fn test_coalesce() {
        assert_eq!(
            call_named("coalesce", vec![Value::Null, Value::Int(7)]).unwrap(),
            Value::Int(7)
        );
        assert_eq!(call_named("coalesce", vec![]).unwrap(), Value::Null);
    }

    #[test]
    fn test_format() {
        let result = call_named(
            "format",
            vec![
                Value::String("{}:{}".into()),
                Value::String("host".into()),
                Value::Int(9090),
            ],
        )
        .unwrap();
        assert_eq!(result, Value::String("host:9090".into()));
    }

    #[test]
    fn test_unknown_function() {
        let err = call_named("nope", vec![]).unwrap_err();
        assert!(matches!(err, EvalError::UnknownFunction { .. }));
    }
}
