//! Path-substitution utilities.
//!
//! Constraint subject expressions are templates over `__subject__`; the
//! same template gets instantiated with different anchors for every
//! declaring type, so all rewrites here build a new tree and leave the input
//! untouched.

use std::collections::{BTreeMap, BTreeSet};

use super::{Expr, Path, PathStart};

/// Collect every path in an expression, outermost first.
pub fn find_paths(expr: &Expr) -> Vec<&Path> {
    let mut paths = Vec::new();
    collect_paths(expr, &mut paths);
    paths
}

fn collect_paths<'a>(expr: &'a Expr, out: &mut Vec<&'a Path>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Path(path) => {
            out.push(path);
            if let PathStart::Expr(inner) = &path.start {
                collect_paths(inner, out);
            }
        }
        Expr::Set(elements) | Expr::Tuple(elements) | Expr::Call { args: elements, .. } => {
            for e in elements {
                collect_paths(e, out);
            }
        }
        Expr::BinOp { left, right, .. } => {
            collect_paths(left, out);
            collect_paths(right, out);
        }
        Expr::Cast { expr, .. } | Expr::Detached(expr) => collect_paths(expr, out),
        Expr::Select { result, filter } => {
            collect_paths(result, out);
            if let Some(filter) = filter {
                collect_paths(filter, out);
            }
        }
    }
}

/// Names of the pointers an expression reads off its subject.
///
/// Both `.name` and `__subject__.name` count.
pub fn find_subject_ptrs(expr: &Expr) -> BTreeSet<String> {
    find_paths(expr)
        .into_iter()
        .filter(|p| matches!(p.start, PathStart::Partial | PathStart::Subject))
        .filter_map(|p| p.first_step().map(str::to_string))
        .collect()
}

/// Replace `__subject__` with `new_subject`.
pub fn subject_substitute(expr: &Expr, new_subject: &Expr) -> Expr {
    rewrite_paths(expr, &mut |path| match path.start {
        PathStart::Subject => Some(new_subject.clone().extend_path(path.steps.iter().cloned())),
        _ => None,
    })
}

/// Replace subject pointer reads (`.p` and `__subject__.p`) with the
/// expression bound to `p`.
///
/// Pointers without a binding are left as they are.
pub fn subject_paths_substitute(expr: &Expr, bindings: &BTreeMap<String, Expr>) -> Expr {
    rewrite_paths(expr, &mut |path| {
        if !matches!(path.start, PathStart::Partial | PathStart::Subject) {
            return None;
        }
        let (first, rest) = path.steps.split_first()?;
        let bound = bindings.get(first)?;
        Some(bound.clone().extend_path(rest.iter().cloned()))
    })
}

/// Rebuild `expr`, offering every path to `f` top-down.
///
/// When `f` returns a replacement the replacement is used as-is and not
/// visited again.
pub fn rewrite_paths<F>(expr: &Expr, f: &mut F) -> Expr
where
    F: FnMut(&Path) -> Option<Expr>,
{
    match expr {
        Expr::Literal(_) => expr.clone(),
        Expr::Path(path) => {
            if let Some(replacement) = f(path) {
                return replacement;
            }
            let start = match &path.start {
                PathStart::Expr(inner) => PathStart::Expr(Box::new(rewrite_paths(inner, f))),
                other => other.clone(),
            };
            Expr::Path(Path {
                start,
                steps: path.steps.clone(),
            })
        }
        Expr::Set(elements) => Expr::Set(rewrite_all(elements, f)),
        Expr::Tuple(elements) => Expr::Tuple(rewrite_all(elements, f)),
        Expr::BinOp { op, left, right } => Expr::BinOp {
            op: *op,
            left: Box::new(rewrite_paths(left, f)),
            right: Box::new(rewrite_paths(right, f)),
        },
        Expr::Call { func, args } => Expr::Call {
            func: func.clone(),
            args: rewrite_all(args, f),
        },
        Expr::Cast { expr, type_name } => Expr::Cast {
            expr: Box::new(rewrite_paths(expr, f)),
            type_name: type_name.clone(),
        },
        Expr::Detached(inner) => Expr::Detached(Box::new(rewrite_paths(inner, f))),
        Expr::Select { result, filter } => Expr::Select {
            result: Box::new(rewrite_paths(result, f)),
            filter: filter.as_ref().map(|e| Box::new(rewrite_paths(e, f))),
        },
    }
}

fn rewrite_all<F>(exprs: &[Expr], f: &mut F) -> Vec<Expr>
where
    F: FnMut(&Path) -> Option<Expr>,
{
    exprs.iter().map(|e| rewrite_paths(e, f)).collect()
}
