//! Insert and update statements.
//!
//! [`MutationCompiler`] turns an [`InsertQuery`] or [`UpdateQuery`] into a
//! [`MutatingStmt`] and attaches every conflict check the statement needs:
//! its own `UNLESS CONFLICT` clause, and the cross-statement checks against
//! statements compiled earlier in the same session.

use excl_proto::{
    Expr, IrSet, MutatingStmt, OnConflictClause, PathId, ShapeElement, Span, Spanned, StmtKind,
    SubjectSet, TypeId,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::compiler::ExprCompiler;
use crate::conflicts::{
    compile_inheritance_conflict_checks, compile_unless_conflict, compile_unless_conflict_on,
};
use crate::error::{CompileError, CompileErrorKind};
use crate::session::{CompileScope, CompileSession};

/// The `UNLESS CONFLICT` part of an insert.
#[derive(Debug, Clone, PartialEq)]
pub enum UnlessConflict {
    /// `UNLESS CONFLICT`: every exclusive constraint of the type.
    Implicit,
    /// `UNLESS CONFLICT ON target [ELSE else_branch]`.
    On {
        target: Spanned<Expr>,
        else_branch: Option<Spanned<Expr>>,
    },
}

/// An `INSERT`.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertQuery {
    /// Qualified name of the type being inserted.
    pub type_name: String,
    /// `(pointer, value)` pairs in source order.
    pub shape: Vec<(String, Expr)>,
    /// Conflict handling.
    pub unless_conflict: Option<UnlessConflict>,
    /// Source span of the statement.
    pub span: Span,
}

impl InsertQuery {
    /// Start an insert into a type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            shape: Vec::new(),
            unless_conflict: None,
            span: Span::default(),
        }
    }

    /// Set a pointer.
    pub fn set(mut self, pointer: impl Into<String>, value: Expr) -> Self {
        self.shape.push((pointer.into(), value));
        self
    }

    /// Add `UNLESS CONFLICT`.
    pub fn unless_conflict(mut self) -> Self {
        self.unless_conflict = Some(UnlessConflict::Implicit);
        self
    }

    /// Add `UNLESS CONFLICT ON target`.
    pub fn unless_conflict_on(mut self, target: Spanned<Expr>) -> Self {
        self.unless_conflict = Some(UnlessConflict::On {
            target,
            else_branch: None,
        });
        self
    }

    /// Add the `ELSE` of an `UNLESS CONFLICT ON`. Ignored without one.
    pub fn otherwise(mut self, else_branch: Spanned<Expr>) -> Self {
        if let Some(UnlessConflict::On { else_branch: slot, .. }) = &mut self.unless_conflict {
            *slot = Some(else_branch);
        }
        self
    }

    /// Set the source span.
    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

/// An `UPDATE`.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateQuery {
    /// Qualified name of the type being updated.
    pub type_name: String,
    /// `(pointer, value)` pairs in source order.
    pub shape: Vec<(String, Expr)>,
    /// Source span of the statement.
    pub span: Span,
}

impl UpdateQuery {
    /// Start an update of a type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            shape: Vec::new(),
            span: Span::default(),
        }
    }

    /// Set a pointer.
    pub fn set(mut self, pointer: impl Into<String>, value: Expr) -> Self {
        self.shape.push((pointer.into(), value));
        self
    }

    /// Set the source span.
    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

/// A compiled insert or update with its conflict checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledMutation {
    /// The statement.
    pub stmt: MutatingStmt,
    /// Checks against earlier statements of the query.
    pub conflict_checks: Vec<OnConflictClause>,
    /// The statement's own `UNLESS CONFLICT` clause.
    pub on_conflict: Option<OnConflictClause>,
}

/// Compiles mutating statements within a session.
pub struct MutationCompiler<'c> {
    compiler: &'c dyn ExprCompiler,
}

impl<'c> MutationCompiler<'c> {
    /// Create a mutation compiler using an expression compiler.
    pub fn new(compiler: &'c dyn ExprCompiler) -> Self {
        Self { compiler }
    }

    /// Compile a shape against the subject being mutated.
    pub fn prepare(
        &self,
        type_id: TypeId,
        path_id: &PathId,
        shape: &[(String, Expr)],
        span: Span,
        session: &mut CompileSession<'_>,
    ) -> Result<Vec<ShapeElement>, CompileError> {
        let schema = session.schema();
        let type_name = schema.type_name(type_id)?;

        let mut elements = Vec::with_capacity(shape.len());
        for (name, value) in shape {
            let ptr = schema
                .getptr(type_id, name)?
                .ok_or_else(|| CompileError::unknown_pointer(type_name, name, span))?;
            if ptr.is_computed() {
                return Err(CompileError::new(
                    format!("cannot assign to computed pointer '{}'", name),
                    span,
                    CompileErrorKind::InvalidExpr,
                ));
            }
            let scope = CompileScope::new().mutating(path_id.clone()).at(span);
            let value: IrSet = self.compiler.compile(value, &scope, session)?;
            elements.push(ShapeElement {
                pointer: ptr.id,
                name: name.clone(),
                value,
            });
        }
        Ok(elements)
    }

    fn build_stmt(
        &self,
        kind: StmtKind,
        type_name: &str,
        shape: &[(String, Expr)],
        span: Span,
        session: &mut CompileSession<'_>,
    ) -> Result<MutatingStmt, CompileError> {
        let schema = session.schema();
        session.config().validate(schema)?;
        let ty = schema
            .get_type_by_name(type_name)
            .map_err(|_| CompileError::unknown_type(type_name, span))?;
        if kind == StmtKind::Insert {
            if ty.is_view {
                return Err(CompileError::new(
                    format!("cannot insert into expression alias '{}'", type_name),
                    span,
                    CompileErrorKind::InvalidInsertTarget,
                ));
            }
            if ty.is_abstract {
                return Err(CompileError::new(
                    format!("cannot insert into abstract object type '{}'", type_name),
                    span,
                    CompileErrorKind::InvalidInsertTarget,
                ));
            }
        }

        let id = session.next_stmt_id();
        let path_id = PathId::for_stmt(id, ty.id);
        let shape = self.prepare(ty.id, &path_id, shape, span, session)?;
        Ok(MutatingStmt {
            id,
            kind,
            subject: SubjectSet {
                path_id,
                stype: ty.id,
                shape,
            },
            span,
        })
    }

    /// Compile an insert.
    ///
    /// Cross-statement checks run before the insert is registered, so they
    /// only see earlier statements.
    #[instrument(skip(self, query, session), fields(type_name = %query.type_name))]
    pub fn compile_insert(
        &self,
        query: &InsertQuery,
        session: &mut CompileSession<'_>,
    ) -> Result<CompiledMutation, CompileError> {
        let stmt = self.build_stmt(
            StmtKind::Insert,
            &query.type_name,
            &query.shape,
            query.span,
            session,
        )?;

        let conflict_checks = compile_inheritance_conflict_checks(&stmt, self.compiler, session)?;
        session.register_stmt(stmt.clone());

        let on_conflict = match &query.unless_conflict {
            None => None,
            Some(UnlessConflict::Implicit) => {
                Some(compile_unless_conflict(&stmt, self.compiler, session)?)
            }
            Some(UnlessConflict::On {
                target,
                else_branch,
            }) => Some(compile_unless_conflict_on(
                &stmt,
                target,
                else_branch.as_ref(),
                self.compiler,
                session,
            )?),
        };

        debug!(
            stmt_id = ?stmt.id,
            checks = conflict_checks.len(),
            unless_conflict = on_conflict.is_some(),
            "compiled insert"
        );
        Ok(CompiledMutation {
            stmt,
            conflict_checks,
            on_conflict,
        })
    }

    /// Compile an update.
    ///
    /// The update is registered before its cross-statement checks run: its
    /// subtypes can conflict with one another.
    #[instrument(skip(self, query, session), fields(type_name = %query.type_name))]
    pub fn compile_update(
        &self,
        query: &UpdateQuery,
        session: &mut CompileSession<'_>,
    ) -> Result<CompiledMutation, CompileError> {
        let stmt = self.build_stmt(
            StmtKind::Update,
            &query.type_name,
            &query.shape,
            query.span,
            session,
        )?;
        session.register_stmt(stmt.clone());

        let conflict_checks = compile_inheritance_conflict_checks(&stmt, self.compiler, session)?;
        debug!(stmt_id = ?stmt.id, checks = conflict_checks.len(), "compiled update");
        Ok(CompiledMutation {
            stmt,
            conflict_checks,
            on_conflict: None,
        })
    }
}
