//! Surface expression tree.
//!
//! Conflict checks are synthesized as expressions in this tree and handed
//! to an expression compiler. Trees are immutable values; every rewrite in
//! [`subst`] returns a new tree.

mod display;
pub mod subst;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Placeholder name a constraint subject expression ranges over.
pub const SUBJECT_NAME: &str = "__subject__";

/// Where a path begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PathStart {
    /// The `__subject__` placeholder of a constraint subject expression.
    Subject,
    /// A leading-dot path (`.name`), relative to the enclosing path prefix.
    Partial,
    /// A named object type.
    Type(String),
    /// A named anchor bound in the compile scope.
    Anchor(String),
    /// An arbitrary expression (`(expr).name`).
    Expr(Box<Expr>),
}

/// A path: a start followed by zero or more pointer steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    /// Where the path begins.
    pub start: PathStart,
    /// Pointer names traversed from the start.
    pub steps: Vec<String>,
}

impl Path {
    /// Name of the first step, if any.
    pub fn first_step(&self) -> Option<&str> {
        self.steps.first().map(String::as_str)
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    /// Equality (`=`).
    Eq,
    /// Inequality (`!=`).
    Ne,
    /// Set membership (`IN`).
    In,
    /// Conjunction (`AND`).
    And,
    /// Disjunction (`OR`).
    Or,
    /// String concatenation (`++`).
    Concat,
}

impl BinOp {
    /// Operator as written in query text.
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Eq => "=",
            BinOp::Ne => "!=",
            BinOp::In => "IN",
            BinOp::And => "AND",
            BinOp::Or => "OR",
            BinOp::Concat => "++",
        }
    }
}

/// An expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// A literal value.
    Literal(Value),
    /// A path reference.
    Path(Path),
    /// A set literal `{a, b}`; `{}` is the empty set.
    Set(Vec<Expr>),
    /// A tuple `(a, b)`.
    Tuple(Vec<Expr>),
    /// A binary operation.
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// A function call.
    Call { func: String, args: Vec<Expr> },
    /// A type cast `<type>expr`.
    Cast { expr: Box<Expr>, type_name: String },
    /// An expression evaluated independently of the enclosing query.
    Detached(Box<Expr>),
    /// `SELECT result FILTER filter`.
    Select {
        result: Box<Expr>,
        filter: Option<Box<Expr>>,
    },
}

impl Expr {
    /// A literal.
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    /// A leading-dot path `.name`.
    pub fn partial(name: impl Into<String>) -> Self {
        Expr::Path(Path {
            start: PathStart::Partial,
            steps: vec![name.into()],
        })
    }

    /// `__subject__`.
    pub fn subject() -> Self {
        Expr::Path(Path {
            start: PathStart::Subject,
            steps: Vec::new(),
        })
    }

    /// `__subject__.name`.
    pub fn subject_ptr(name: impl Into<String>) -> Self {
        Expr::Path(Path {
            start: PathStart::Subject,
            steps: vec![name.into()],
        })
    }

    /// A reference to an object type.
    pub fn type_ref(name: impl Into<String>) -> Self {
        Expr::Path(Path {
            start: PathStart::Type(name.into()),
            steps: Vec::new(),
        })
    }

    /// A reference to an anchor.
    pub fn anchor(name: impl Into<String>) -> Self {
        Expr::Path(Path {
            start: PathStart::Anchor(name.into()),
            steps: Vec::new(),
        })
    }

    /// Extend an expression with further pointer steps.
    ///
    /// Paths are extended in place; any other expression becomes the start
    /// of a new path. Extending by nothing returns the expression unchanged.
    pub fn extend_path<I, S>(self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut steps = steps.into_iter().map(Into::into).peekable();
        if steps.peek().is_none() {
            return self;
        }
        match self {
            Expr::Path(mut path) => {
                path.steps.extend(steps);
                Expr::Path(path)
            }
            other => Expr::Path(Path {
                start: PathStart::Expr(Box::new(other)),
                steps: steps.collect(),
            }),
        }
    }

    /// A binary operation.
    pub fn binop(op: BinOp, left: Expr, right: Expr) -> Self {
        Expr::BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// `left = right`.
    pub fn eq(left: Expr, right: Expr) -> Self {
        Self::binop(BinOp::Eq, left, right)
    }

    /// `left AND right`.
    pub fn and(left: Expr, right: Expr) -> Self {
        Self::binop(BinOp::And, left, right)
    }

    /// A function call.
    pub fn call(func: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            func: func.into(),
            args,
        }
    }

    /// The empty set cast to a named type: `<type>{}`.
    pub fn empty_of(type_name: impl Into<String>) -> Self {
        Expr::Cast {
            expr: Box::new(Expr::Set(Vec::new())),
            type_name: type_name.into(),
        }
    }

    /// `DETACHED expr`.
    pub fn detached(expr: Expr) -> Self {
        Expr::Detached(Box::new(expr))
    }

    /// `SELECT result [FILTER filter]`.
    pub fn select(result: Expr, filter: Option<Expr>) -> Self {
        Expr::Select {
            result: Box::new(result),
            filter: filter.map(Box::new),
        }
    }

    /// Check whether this expression is a syntactically empty set,
    /// possibly behind casts.
    pub fn is_empty_set(&self) -> bool {
        match self {
            Expr::Set(elements) => elements.iter().all(Expr::is_empty_set),
            Expr::Cast { expr, .. } => expr.is_empty_set(),
            _ => false,
        }
    }

    /// Get as a path.
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Expr::Path(p) => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_path() {
        let extended = Expr::anchor("v~1").extend_path(["name"]);
        assert_eq!(
            extended,
            Expr::Path(Path {
                start: PathStart::Anchor("v~1".into()),
                steps: vec!["name".into()],
            })
        );

        let wrapped = Expr::Tuple(vec![Expr::lit(1i64)]).extend_path(["a"]);
        assert!(matches!(
            wrapped,
            Expr::Path(Path {
                start: PathStart::Expr(_),
                ..
            })
        ));

        let unchanged = Expr::lit("x").extend_path(Vec::<String>::new());
        assert_eq!(unchanged, Expr::lit("x"));
    }

    #[test]
    fn test_is_empty_set() {
        assert!(Expr::empty_of("std::str").is_empty_set());
        assert!(Expr::Set(vec![Expr::Set(vec![])]).is_empty_set());
        assert!(!Expr::Set(vec![Expr::lit(1i64)]).is_empty_set());
    }
}
