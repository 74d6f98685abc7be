//! Expression compiler interface.
//!
//! The conflict compiler synthesizes expressions and hands them to an
//! [`ExprCompiler`] to be turned into IR sets. [`PathCompiler`] is the
//! reference implementation: it resolves paths against the schema, attaches
//! the anchors an expression uses, and infers volatility from the functions
//! it calls. It understands exactly the expression forms conflict checks are
//! built from and is not a general query compiler.

use std::collections::BTreeSet;

use excl_core::PointerTarget;
use excl_proto::{Expr, IrSet, Path, PathId, PathStart, PointerRef, SetExpr, Span, TypeId};
use tracing::trace;

use crate::error::{CompileError, CompileErrorKind};
use crate::session::{CompileScope, CompileSession};

/// How stable the value of an expression is across evaluations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Volatility {
    /// Depends only on its inputs.
    Immutable,
    /// Reads database state; fixed within one statement.
    Stable,
    /// May differ on every evaluation.
    Volatile,
}

impl Volatility {
    /// Check if this is volatile.
    pub fn is_volatile(self) -> bool {
        self == Volatility::Volatile
    }
}

/// Compiles surface expressions into IR sets.
pub trait ExprCompiler {
    /// Compile an expression in a scope.
    fn compile(
        &self,
        expr: &Expr,
        scope: &CompileScope,
        session: &mut CompileSession<'_>,
    ) -> Result<IrSet, CompileError>;

    /// Infer the volatility of a compiled set.
    fn infer_volatility(&self, set: &IrSet, session: &CompileSession<'_>) -> Volatility;
}

/// Reference expression compiler.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathCompiler;

impl PathCompiler {
    /// Create a compiler.
    pub fn new() -> Self {
        Self
    }
}

/// What a resolved (sub)expression denotes.
#[derive(Debug, Clone)]
struct Resolved {
    path_id: PathId,
    stype: Option<TypeId>,
    rptr: Option<PointerRef>,
}

impl Resolved {
    fn of_set(set: &IrSet) -> Self {
        Self {
            path_id: set.path_id.clone(),
            stype: set.stype,
            rptr: set.rptr.clone(),
        }
    }
}

/// Walk state for one compile call.
struct Walk<'a, 'b, 's> {
    session: &'a mut CompileSession<'s>,
    scope: &'b CompileScope,
    detached: bool,
    used_anchors: BTreeSet<String>,
}

impl ExprCompiler for PathCompiler {
    fn compile(
        &self,
        expr: &Expr,
        scope: &CompileScope,
        session: &mut CompileSession<'_>,
    ) -> Result<IrSet, CompileError> {
        if let Expr::Tuple(elements) = expr {
            let mut compiled = Vec::with_capacity(elements.len());
            for element in elements {
                compiled.push(self.compile(element, scope, session)?);
            }
            let mut set = IrSet::empty(session.fresh_expr(), None);
            set.expr = SetExpr::Tuple(compiled);
            return Ok(set);
        }

        let mut walk = Walk {
            session,
            scope,
            detached: false,
            used_anchors: BTreeSet::new(),
        };
        let prefix = scope.partial_path_prefix.as_ref().map(Resolved::of_set);
        let resolved = walk.resolve(expr, prefix.as_ref())?;
        let used_anchors = walk.used_anchors;

        let mut set = if expr.is_empty_set() {
            IrSet::empty(resolved.path_id, resolved.stype)
        } else {
            IrSet::from_expr(resolved.path_id, resolved.stype, expr.clone())
        };
        set.rptr = resolved.rptr;
        set.scope.detached = matches!(expr, Expr::Detached(_));
        set.scope.force_reassign = scope.force_reassign;
        set.scope.implicit_limit = scope.implicit_limit;
        for name in used_anchors {
            if let Some(anchor) = scope.anchors.get(&name) {
                set.anchors.insert(name, anchor.clone());
            }
        }
        trace!(path_id = ?set.path_id, anchors = set.anchors.len(), "compiled expression");
        Ok(set)
    }

    fn infer_volatility(&self, set: &IrSet, session: &CompileSession<'_>) -> Volatility {
        let own = match &set.expr {
            SetExpr::Empty => Volatility::Immutable,
            SetExpr::Expr(expr) => expr_volatility(expr, session),
            SetExpr::Tuple(elements) => elements
                .iter()
                .map(|e| self.infer_volatility(e, session))
                .max()
                .unwrap_or(Volatility::Immutable),
        };
        set.anchors
            .values()
            .map(|a| self.infer_volatility(a, session))
            .fold(own, Volatility::max)
    }
}

fn expr_volatility(expr: &Expr, session: &CompileSession<'_>) -> Volatility {
    match expr {
        Expr::Literal(_) => Volatility::Immutable,
        Expr::Path(path) => match &path.start {
            PathStart::Type(_) => Volatility::Stable,
            PathStart::Expr(inner) => expr_volatility(inner, session),
            _ => Volatility::Immutable,
        },
        Expr::Set(elements) | Expr::Tuple(elements) => elements
            .iter()
            .map(|e| expr_volatility(e, session))
            .max()
            .unwrap_or(Volatility::Immutable),
        Expr::BinOp { left, right, .. } => {
            expr_volatility(left, session).max(expr_volatility(right, session))
        }
        Expr::Call { func, args } => {
            if session.config().is_volatile_function(func) {
                return Volatility::Volatile;
            }
            args.iter()
                .map(|a| expr_volatility(a, session))
                .max()
                .unwrap_or(Volatility::Immutable)
        }
        Expr::Cast { expr, .. } => expr_volatility(expr, session),
        Expr::Detached(inner) => expr_volatility(inner, session).max(Volatility::Stable),
        Expr::Select { result, filter } => {
            let filter = filter
                .as_ref()
                .map(|f| expr_volatility(f, session))
                .unwrap_or(Volatility::Immutable);
            expr_volatility(result, session).max(filter)
        }
    }
}

impl<'a, 'b, 's> Walk<'a, 'b, 's> {
    fn span(&self) -> Span {
        self.scope.span
    }

    fn opaque(&mut self) -> Resolved {
        Resolved {
            path_id: self.session.fresh_expr(),
            stype: None,
            rptr: None,
        }
    }

    fn resolve(&mut self, expr: &Expr, prefix: Option<&Resolved>) -> Result<Resolved, CompileError> {
        match expr {
            Expr::Literal(_) => Ok(self.opaque()),
            Expr::Path(path) => self.resolve_path(path, prefix),
            Expr::Set(elements) => {
                let mut stypes = BTreeSet::new();
                for element in elements {
                    stypes.insert(self.resolve(element, prefix)?.stype);
                }
                let mut resolved = self.opaque();
                if stypes.len() == 1 {
                    resolved.stype = stypes.into_iter().next().flatten();
                }
                Ok(resolved)
            }
            Expr::Tuple(elements) | Expr::Call { args: elements, .. } => {
                for element in elements {
                    self.resolve(element, prefix)?;
                }
                Ok(self.opaque())
            }
            Expr::BinOp { left, right, .. } => {
                self.resolve(left, prefix)?;
                self.resolve(right, prefix)?;
                Ok(self.opaque())
            }
            Expr::Cast { expr, type_name } => {
                self.resolve(expr, prefix)?;
                let mut resolved = self.opaque();
                if let Ok(ty) = self.session.schema().get_type_by_name(type_name) {
                    resolved.stype = Some(ty.id);
                }
                Ok(resolved)
            }
            Expr::Detached(inner) => {
                let outer = self.detached;
                self.detached = true;
                let inner = self.resolve(inner, None);
                self.detached = outer;
                let inner = inner?;
                Ok(Resolved {
                    path_id: self.session.fresh_detached(),
                    stype: inner.stype,
                    rptr: None,
                })
            }
            Expr::Select { result, filter } => {
                let result = self.resolve(result, prefix)?;
                if let Some(filter) = filter {
                    self.resolve(filter, Some(&result))?;
                }
                Ok(result)
            }
        }
    }

    fn resolve_path(&mut self, path: &Path, prefix: Option<&Resolved>) -> Result<Resolved, CompileError> {
        let mut current = match &path.start {
            PathStart::Subject => {
                return Err(CompileError::internal(format!(
                    "unsubstituted subject reference '{}'",
                    path
                )))
            }
            PathStart::Partial => prefix.cloned().ok_or_else(|| {
                CompileError::new(
                    format!("partial path '{}' has no enclosing path", path),
                    self.span(),
                    CompileErrorKind::InvalidExpr,
                )
            })?,
            PathStart::Type(name) => {
                let ty = self
                    .session
                    .schema()
                    .get_type_by_name(name)
                    .map_err(|_| CompileError::unknown_type(name, self.span()))?;
                let path_id = PathId::for_type(ty.id);
                let self_reference = self
                    .scope
                    .mutating
                    .as_ref()
                    .filter(|mutating| mutating.root_type() == Some(ty.id))
                    .is_some_and(|mutating| !self.session.is_factoring_allowed(mutating));
                if !self.detached && self_reference {
                    return Err(CompileError::new(
                        format!(
                            "invalid reference to {}: self-referencing INSERTs are not allowed",
                            name
                        ),
                        self.span(),
                        CompileErrorKind::SelfReference,
                    ));
                }
                Resolved {
                    path_id,
                    stype: Some(ty.id),
                    rptr: None,
                }
            }
            PathStart::Anchor(name) => {
                let anchor = self.scope.anchors.get(name).ok_or_else(|| {
                    CompileError::internal(format!("anchor '{}' is not bound", name))
                })?;
                self.used_anchors.insert(name.clone());
                Resolved::of_set(anchor)
            }
            PathStart::Expr(inner) => self.resolve(inner, prefix)?,
        };

        for step in &path.steps {
            current = self.step(&current, step)?;
        }
        Ok(current)
    }

    fn step(&mut self, source: &Resolved, name: &str) -> Result<Resolved, CompileError> {
        let schema = self.session.schema();
        let type_id = source.stype.ok_or_else(|| {
            CompileError::new(
                format!("cannot follow '{}' from a non-object value", name),
                self.span(),
                CompileErrorKind::InvalidExpr,
            )
        })?;
        let ptr = schema.getptr(type_id, name)?.ok_or_else(|| {
            CompileError::unknown_pointer(schema.type_name(type_id).unwrap_or("?"), name, self.span())
        })?;
        let stype = match ptr.target {
            PointerTarget::Object(target) => Some(target),
            PointerTarget::Scalar(_) => None,
        };
        Ok(Resolved {
            path_id: source.path_id.extend(ptr.id),
            stype,
            rptr: Some(PointerRef {
                source: source.path_id.clone(),
                pointer: ptr.id,
            }),
        })
    }
}
