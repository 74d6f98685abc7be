//! `UNLESS CONFLICT` clause compilation.

use std::collections::BTreeSet;

use excl_core::Schema;
use excl_proto::{
    ConstraintRef, Expr, IrSet, MutatingStmt, OnConflictClause, SetExpr, Spanned, TypeId,
};
use tracing::{debug, instrument};

use super::partition::PointerConstraints;
use super::select::{compile_conflict_select, ConflictRequest};
use crate::compiler::ExprCompiler;
use crate::config::ConflictConfig;
use crate::error::{CompileError, CompileErrorKind};
use crate::session::{CompileScope, CompileSession};

/// Exclusive constraints of every pointer of a type, taken from each
/// pointer's nearest non-derived parent. The identity pointer is skipped.
pub fn exclusive_pointer_constraints(
    schema: &Schema,
    type_id: TypeId,
    config: &ConflictConfig,
) -> Result<Vec<PointerConstraints>, CompileError> {
    let mut result: Vec<PointerConstraints> = Vec::new();
    for ptr in schema.type_pointers(type_id)? {
        let ptr = schema.get_pointer(schema.pointer_nearest_non_derived_parent(ptr.id)?)?;
        if ptr.name == config.identity_pointer || result.iter().any(|p| p.name == ptr.name) {
            continue;
        }
        let mut exclusive = Vec::new();
        for constraint in schema.pointer_constraints(ptr.id)? {
            if schema.constraint_issubclass(constraint.id, &config.exclusive_constraint)? {
                exclusive.push(constraint.id);
            }
        }
        if !exclusive.is_empty() {
            result.push(PointerConstraints::new(&ptr.name, ptr.id, exclusive));
        }
    }
    Ok(result)
}

/// Compile `UNLESS CONFLICT` without a target: every exclusive constraint
/// of the type is checked and no single constraint is named.
#[instrument(skip(stmt, compiler, session), fields(stmt_id = ?stmt.id))]
pub fn compile_unless_conflict(
    stmt: &MutatingStmt,
    compiler: &dyn ExprCompiler,
    session: &mut CompileSession<'_>,
) -> Result<OnConflictClause, CompileError> {
    let schema = session.schema();
    let type_id = stmt.subject.stype;
    let pointers = exclusive_pointer_constraints(schema, type_id, session.config())?;
    let mut objects = Vec::new();
    for constraint in schema.type_constraints(type_id)? {
        if schema.constraint_issubclass(constraint.id, &session.config().exclusive_constraint)? {
            objects.push(constraint.id);
        }
    }

    let request = ConflictRequest {
        stmt,
        subject_type: type_id,
        pointer_constraints: &pointers,
        object_constraints: &objects,
        for_inheritance: false,
        override_set: None,
        span: stmt.span,
    };
    let compiled = compile_conflict_select(&request, compiler, session)?;
    Ok(OnConflictClause::new(compiled.select, compiled.always_check))
}

/// Compile `UNLESS CONFLICT ON <target> [ELSE <alternative>]`.
///
/// The target must be a single pointer of the statement's subject or a
/// tuple of them, and must match exactly one exclusive constraint.
#[instrument(skip(stmt, target, else_branch, compiler, session), fields(stmt_id = ?stmt.id))]
pub fn compile_unless_conflict_on(
    stmt: &MutatingStmt,
    target: &Spanned<Expr>,
    else_branch: Option<&Spanned<Expr>>,
    compiler: &dyn ExprCompiler,
    session: &mut CompileSession<'_>,
) -> Result<OnConflictClause, CompileError> {
    let schema = session.schema();
    let type_id = stmt.subject.stype;
    let type_name = schema.type_name(type_id)?;
    let span = target.span;

    let subject = IrSet::from_expr(
        stmt.subject.path_id.clone(),
        Some(type_id),
        Expr::type_ref(type_name),
    );
    let scope = CompileScope::new().with_prefix(subject).at(span);
    let compiled = compiler
        .compile(&target.value, &scope, session)
        .map_err(|e| e.or_span(span))?;

    let args = match compiled {
        IrSet {
            rptr: None,
            expr: SetExpr::Tuple(elements),
            ..
        } => elements,
        other => vec![other],
    };

    let mut names = BTreeSet::new();
    let mut ptrs = Vec::new();
    for arg in &args {
        let Some(rptr) = &arg.rptr else {
            return Err(CompileError::new(
                "UNLESS CONFLICT argument must be a property, link, or tuple of properties and links",
                span,
                CompileErrorKind::InvalidConflictTarget,
            ));
        };
        if rptr.source != stmt.subject.path_id {
            return Err(CompileError::new(
                "UNLESS CONFLICT argument must be a property of the type being inserted",
                span,
                CompileErrorKind::ForeignPointer,
            ));
        }
    }
    for arg in &args {
        let Some(rptr) = &arg.rptr else {
            return Err(CompileError::internal("pointer reference does not resolve"));
        };
        let ptr = schema.get_pointer(schema.pointer_nearest_non_derived_parent(rptr.pointer)?)?;
        if !ptr.is_single() {
            return Err(CompileError::new(
                "UNLESS CONFLICT property must be a SINGLE property",
                span,
                CompileErrorKind::MultiPointer,
            ));
        }
        names.insert(ptr.name.clone());
        ptrs.push(ptr);
    }

    let exclusive = session.config().exclusive_constraint.clone();
    let objects: Vec<_> = schema
        .object_exclusive_constraints(type_id, &names, &exclusive)?
        .into_iter()
        .map(|c| c.id)
        .collect();
    let mut fields = Vec::new();
    if let [ptr] = ptrs.as_slice() {
        for constraint in schema.pointer_constraints(ptr.id)? {
            if schema.constraint_issubclass(constraint.id, &exclusive)? {
                fields.push(constraint.id);
            }
        }
    }

    let matched: Vec<_> = objects.iter().chain(fields.iter()).copied().collect();
    let [constraint] = matched.as_slice() else {
        return Err(CompileError::new(
            "UNLESS CONFLICT property must have a single exclusive constraint",
            span,
            CompileErrorKind::AmbiguousConstraint,
        )
        .with_hint(format!(
            "found {} exclusive constraints over the given pointers",
            matched.len()
        )));
    };
    debug!(constraint = %constraint, "resolved conflict target");

    let pointers: Vec<_> = ptrs
        .iter()
        .map(|ptr| PointerConstraints::new(&ptr.name, ptr.id, fields.clone()))
        .collect();
    let request = ConflictRequest {
        stmt,
        subject_type: type_id,
        pointer_constraints: &pointers,
        object_constraints: &objects,
        for_inheritance: false,
        override_set: None,
        span: stmt.span,
    };
    let compiled = compile_conflict_select(&request, compiler, session)?;

    let mut clause = OnConflictClause::new(compiled.select, compiled.always_check)
        .with_constraint(ConstraintRef::new(*constraint));

    if let Some(else_branch) = else_branch {
        if compiled.from_ancestor {
            return Err(CompileError::new(
                "UNLESS CONFLICT can not use ELSE when constraint is from a parent type",
                else_branch.span,
                CompileErrorKind::ElseOnInheritedConstraint,
            ));
        }
        let query = match &else_branch.value {
            select @ Expr::Select { .. } => select.clone(),
            other => Expr::select(other.clone(), None),
        };
        let scope = CompileScope::new()
            .mutating(stmt.subject.path_id.clone())
            .at(else_branch.span);
        // The subject may be read only while its own ELSE branch compiles.
        session.allow_factoring(stmt.subject.path_id.clone());
        let compiled_else = compiler.compile(&query, &scope, session);
        session.revoke_factoring(&stmt.subject.path_id);
        let compiled_else = compiled_else.map_err(|e| e.or_span(else_branch.span))?;
        clause = clause.with_else_branch(compiled_else);
    }

    Ok(clause)
}
