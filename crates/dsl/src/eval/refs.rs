//! Reference extraction from block bodies.
//!
//! Walks every expression in a body (including nested blocks) and collects
//! the dotted identifier paths that could refer to other nodes' exports.
//! The controller decides which of them actually name a node; single-segment
//! paths can only ever be scope bindings, but are reported anyway so the
//! caller has the full picture.

use crate::ast::{Body, Expr, ExprKind, Path, Stmt};
use std::collections::BTreeSet;

/// Collect all maximal dotted paths referenced by a body, in deterministic
/// sorted order.
pub fn body_references(body: &Body) -> Vec<Path> {
    let mut paths = BTreeSet::new();
    collect_body(body, &mut paths);
    paths.into_iter().collect()
}

/// Collect all maximal dotted paths referenced by one expression.
pub fn expr_references(expr: &Expr) -> Vec<Path> {
    let mut paths = BTreeSet::new();
    collect_expr(expr, &mut paths);
    paths.into_iter().collect()
}

fn collect_body(body: &Body, paths: &mut BTreeSet<Path>) {
    for stmt in body {
        match stmt {
            Stmt::Attribute(attr) => collect_expr(&attr.value, paths),
            Stmt::Block(block) => collect_body(&block.body, paths),
        }
    }
}

fn collect_expr(expr: &Expr, paths: &mut BTreeSet<Path>) {
    // A whole ident/access chain is one reference, not one per segment.
    if let Some(path) = expr.as_path() {
        paths.insert(path);
        return;
    }

    match &expr.kind {
        ExprKind::Null
        | ExprKind::Bool(_)
        | ExprKind::Int(_)
        | ExprKind::Float(_)
        | ExprKind::String(_)
        | ExprKind::Duration(_)
        | ExprKind::Ident(_) => {}
        ExprKind::Access { object, .. } => collect_expr(object, paths),
        ExprKind::Index { object, index } => {
            collect_expr(object, paths);
            collect_expr(index, paths);
        }
        ExprKind::Call { args, .. } => {
            // Function names are not node references.
            for arg in args {
                collect_expr(arg, paths);
            }
        }
        ExprKind::List(items) => {
            for item in items {
                collect_expr(item, paths);
            }
        }
        ExprKind::Object(fields) => {
            for (_, value) in fields {
                collect_expr(value, paths);
            }
        }
        ExprKind::Unary { operand, .. } => collect_expr(operand, paths),
        ExprKind::Binary { left, right, .. } => {
            collect_expr(left, paths);
            collect_expr(right, paths);
        }
        ExprKind::Conditional {
            cond,
            then,
            otherwise,
        } => {
            collect_expr(cond, paths);
            collect_expr(then, paths);
            collect_expr(otherwise, paths);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_file;

    fn refs(source: &str) -> Vec<String> {
        let file = parse_file("test.cfx", source).unwrap();
        body_references(&file.body)
            .into_iter()
            .map(|p| p.to_string())
            .collect()
    }

    #[test]
    fn test_collects_access_chains() {
        let paths = refs(
            r#"
            local.fanout "f" {
                targets = discovery.static.default.targets
            }
            "#,
        );
        assert_eq!(paths, vec!["discovery.static.default.targets"]);
    }

    #[test]
    fn test_collects_inside_calls_lists_and_nested_blocks() {
        let paths = refs(
            r#"
            local.fanout "f" {
                all = concat(a.b.one, [a.b.two])
                sub {
                    x = c.d.three ? y : z
                }
            }
            "#,
        );
        assert_eq!(
            paths,
            vec!["a.b.one", "a.b.two", "c.d.three", "y", "z"]
        );
    }

    #[test]
    fn test_deterministic_and_deduplicated() {
        let paths = refs(
            r#"
            local.sum "s" {
                total = b.x.v + a.y.v + b.x.v
            }
            "#,
        );
        assert_eq!(paths, vec!["a.y.v", "b.x.v"]);
    }
}
