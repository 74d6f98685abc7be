//! Query-text rendering of expressions, used by explain output and tests.

use std::fmt;

use super::{Expr, Path, PathStart, SUBJECT_NAME};
use crate::value::Value;

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
            Value::Object(id) => write!(f, "<uuid>'{id}'"),
            Value::Tuple(items) => {
                write!(f, "(")?;
                write_list(f, items)?;
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.start {
            PathStart::Subject => write!(f, "{SUBJECT_NAME}")?,
            PathStart::Partial => {}
            PathStart::Type(name) | PathStart::Anchor(name) => write!(f, "{name}")?,
            PathStart::Expr(expr) => write!(f, "({expr})")?,
        }
        for step in &self.steps {
            write!(f, ".{step}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Path(p) => write!(f, "{p}"),
            Expr::Set(elements) => {
                write!(f, "{{")?;
                write_list(f, elements)?;
                write!(f, "}}")
            }
            Expr::Tuple(elements) => {
                write!(f, "(")?;
                write_list(f, elements)?;
                write!(f, ")")
            }
            Expr::BinOp { op, left, right } => {
                write_operand(f, left)?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, right)
            }
            Expr::Call { func, args } => {
                write!(f, "{func}(")?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Expr::Cast { expr, type_name } => write!(f, "<{type_name}>{expr}"),
            Expr::Detached(expr) => write!(f, "DETACHED ({expr})"),
            Expr::Select { result, filter } => {
                write!(f, "(SELECT {result}")?;
                if let Some(filter) = filter {
                    write!(f, " FILTER {filter}")?;
                }
                write!(f, ")")
            }
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr) -> fmt::Result {
    if matches!(expr, Expr::BinOp { .. }) {
        write!(f, "({expr})")
    } else {
        write!(f, "{expr}")
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}
