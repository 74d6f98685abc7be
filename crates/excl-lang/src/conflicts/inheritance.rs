//! Cross-statement conflict checks.
//!
//! Exclusive constraints declared on a common ancestor are enforced by the
//! storage layer against a snapshot taken when the statement starts, so two
//! statements of one query writing sibling types can both succeed and leave
//! a duplicate behind. For every earlier statement touching a related type,
//! an explicit conflict select is generated per enforcing constraint of the
//! shared ancestor, and a hit is reported against that earlier statement.

use std::collections::BTreeSet;

use excl_proto::{ConstraintId, ConstraintRef, Expr, MutatingStmt, OnConflictClause, StmtId, TypeId};
use tracing::{debug, instrument};

use super::clause::exclusive_pointer_constraints;
use super::partition::{constraint_matters, PointerConstraints};
use super::select::{compile_conflict_select, ConflictRequest};
use crate::compiler::ExprCompiler;
use crate::error::CompileError;
use crate::session::{CompileScope, CompileSession};

/// One constraint of a shared ancestor, isolated for its own check.
struct Entry {
    constraint: ConstraintId,
    pointers: Vec<PointerConstraints>,
    objects: Vec<ConstraintId>,
}

/// `(subject type, shared ancestor, earlier statement)` triples needing a
/// check. Ordered so the output does not depend on hashing.
fn modified_ancestors(
    stmt: &MutatingStmt,
    session: &CompileSession<'_>,
) -> Result<BTreeSet<(TypeId, TypeId, StmtId)>, CompileError> {
    let schema = session.schema();
    let base_object = schema.get_type_by_name(&session.config().base_object)?.id;

    let mut subject_types = vec![stmt.subject.stype];
    if stmt.is_update() {
        subject_types.extend(schema.descendants(stmt.subject.stype)?);
    }

    let mut triples = BTreeSet::new();
    // An update is registered before its checks run, so it can meet itself
    // here; its subtypes may conflict with one another.
    for other in session.dml_stmts() {
        let base = schema.type_nearest_non_derived_parent(other.subject.stype)?;
        let mut other_types = vec![base];
        if other.is_update() {
            other_types.extend(schema.descendants(base)?);
        }

        for other_type in &other_types {
            if schema.is_view(*other_type)? {
                continue;
            }
            for subject_type in &subject_types {
                if schema.is_view(*subject_type)? {
                    continue;
                }
                if subject_type == other_type && !other.is_update() && !stmt.is_update() {
                    continue;
                }
                for anc in schema.nearest_common_ancestors(&[*subject_type, *other_type])? {
                    if anc != base_object {
                        triples.insert((*subject_type, anc, other.id));
                    }
                }
            }
        }
    }
    Ok(triples)
}

/// Enforcing exclusive constraints of `anc`, one entry each.
fn constraint_entries(anc: TypeId, session: &CompileSession<'_>) -> Result<Vec<Entry>, CompileError> {
    let schema = session.schema();
    let config = session.config();
    let mut entries = Vec::new();

    for pointer in exclusive_pointer_constraints(schema, anc, config)? {
        for id in &pointer.constraints {
            if constraint_matters(schema, schema.get_constraint(*id)?)? {
                entries.push(Entry {
                    constraint: *id,
                    pointers: vec![PointerConstraints::new(
                        &pointer.name,
                        pointer.pointer,
                        vec![*id],
                    )],
                    objects: Vec::new(),
                });
            }
        }
    }
    for constraint in schema.type_constraints(anc)? {
        if schema.constraint_issubclass(constraint.id, &config.exclusive_constraint)?
            && constraint_matters(schema, constraint)?
        {
            entries.push(Entry {
                constraint: constraint.id,
                pointers: Vec::new(),
                objects: vec![constraint.id],
            });
        }
    }
    Ok(entries)
}

/// Generate the conflict checks `stmt` needs against every mutating
/// statement compiled before it in the session.
///
/// Each clause names the constraint it checks and the statement a hit is
/// reported against. For an update, anchors read through a detached
/// projection of the updated type so the check sees the row's final state.
#[instrument(skip(stmt, compiler, session), fields(stmt_id = ?stmt.id))]
pub fn compile_inheritance_conflict_checks(
    stmt: &MutatingStmt,
    compiler: &dyn ExprCompiler,
    session: &mut CompileSession<'_>,
) -> Result<Vec<OnConflictClause>, CompileError> {
    if session.dml_stmts().is_empty() {
        return Ok(Vec::new());
    }
    let schema = session.schema();

    let mut clauses = Vec::new();
    for (subject_type, anc, other) in modified_ancestors(stmt, session)? {
        let entries = constraint_entries(anc, session)?;
        if entries.is_empty() {
            let ancestor = schema.type_name(anc)?;
            debug!(%ancestor, "shared ancestor has no exclusive constraints");
            continue;
        }

        let overlay = if stmt.is_update() {
            let subject = Expr::detached(Expr::type_ref(schema.type_name(subject_type)?));
            let scope = CompileScope::new().at(stmt.span);
            Some(compiler.compile(&subject, &scope, session)?)
        } else {
            None
        };

        for entry in entries {
            let request = ConflictRequest {
                stmt,
                subject_type: anc,
                pointer_constraints: &entry.pointers,
                object_constraints: &entry.objects,
                for_inheritance: true,
                override_set: overlay.as_ref(),
                span: stmt.span,
            };
            let compiled = compile_conflict_select(&request, compiler, session)?;
            if compiled.select.is_empty() {
                debug!(constraint = %entry.constraint, "statement does not write the constrained pointers");
                continue;
            }
            clauses.push(
                OnConflictClause::new(compiled.select, false)
                    .with_constraint(ConstraintRef::new(entry.constraint))
                    .with_else_fail(other)
                    .with_update_overlay(overlay.clone()),
            );
        }
    }

    debug!(checks = clauses.len(), "cross-statement conflict checks");
    Ok(clauses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::PathCompiler;
    use excl_core::{PointerDecl, ScalarType, Schema, SchemaBuilder, TypeDecl};
    use excl_proto::{PathId, ShapeElement, Span, StmtKind, SubjectSet};

    fn schema() -> Schema {
        SchemaBuilder::new(1)
            .with_type(
                TypeDecl::abstract_type("default::C")
                    .with_pointer(PointerDecl::property("code", ScalarType::Str).exclusive())
                    .with_pointer(PointerDecl::property("note", ScalarType::Str)),
            )
            .with_type(TypeDecl::new("default::A").extending("default::C"))
            .with_type(TypeDecl::new("default::B").extending("default::C"))
            .with_type(
                TypeDecl::new("default::Plain")
                    .with_pointer(PointerDecl::property("code", ScalarType::Str)),
            )
            .build()
            .unwrap()
    }

    fn stmt(
        session: &mut CompileSession<'_>,
        kind: StmtKind,
        type_name: &str,
        shape: &[(&str, Expr)],
    ) -> MutatingStmt {
        let schema = session.schema();
        let ty = schema.get_type_by_name(type_name).unwrap().id;
        let mut elements = Vec::new();
        for (name, value) in shape {
            let pointer = schema.getptr(ty, name).unwrap().unwrap().id;
            let value = PathCompiler
                .compile(value, &CompileScope::new(), session)
                .unwrap();
            elements.push(ShapeElement {
                pointer,
                name: name.to_string(),
                value,
            });
        }
        MutatingStmt {
            id: session.next_stmt_id(),
            kind,
            subject: SubjectSet {
                path_id: PathId::for_type(ty),
                stype: ty,
                shape: elements,
            },
            span: Span::new(0, 10),
        }
    }

    #[test]
    fn test_no_earlier_statements() {
        let schema = schema();
        let mut session = CompileSession::new(&schema);
        let a = stmt(&mut session, StmtKind::Insert, "default::A", &[("code", Expr::lit("x"))]);

        let clauses = compile_inheritance_conflict_checks(&a, &PathCompiler, &mut session).unwrap();
        assert!(clauses.is_empty());
    }

    #[test]
    fn test_sibling_inserts_get_one_check() {
        let schema = schema();
        let mut session = CompileSession::new(&schema);
        let a = stmt(&mut session, StmtKind::Insert, "default::A", &[("code", Expr::lit("x"))]);
        session.register_stmt(a.clone());
        let b = stmt(&mut session, StmtKind::Insert, "default::B", &[("code", Expr::lit("x"))]);

        let clauses = compile_inheritance_conflict_checks(&b, &PathCompiler, &mut session).unwrap();
        assert_eq!(clauses.len(), 1);
        let clause = &clauses[0];
        assert_eq!(clause.else_fail, Some(a.id));
        assert!(!clause.always_check);
        assert!(clause.update_overlay.is_none());

        let c = schema.get_type_by_name("default::C").unwrap().id;
        let code = schema.getptr(c, "code").unwrap().unwrap();
        assert_eq!(clause.constraint, Some(ConstraintRef::new(code.constraints[0])));
    }

    #[test]
    fn test_statement_without_constrained_pointer_skipped() {
        let schema = schema();
        let mut session = CompileSession::new(&schema);
        let a = stmt(&mut session, StmtKind::Insert, "default::A", &[("code", Expr::lit("x"))]);
        session.register_stmt(a);
        let b = stmt(&mut session, StmtKind::Insert, "default::B", &[("note", Expr::lit("n"))]);

        let clauses = compile_inheritance_conflict_checks(&b, &PathCompiler, &mut session).unwrap();
        assert!(clauses.is_empty());
    }

    #[test]
    fn test_same_type_inserts_and_unrelated_types_skipped() {
        let schema = schema();
        let mut session = CompileSession::new(&schema);
        let first = stmt(&mut session, StmtKind::Insert, "default::A", &[("code", Expr::lit("x"))]);
        session.register_stmt(first);
        let plain = stmt(&mut session, StmtKind::Insert, "default::Plain", &[("code", Expr::lit("x"))]);
        session.register_stmt(plain);
        let second = stmt(&mut session, StmtKind::Insert, "default::A", &[("code", Expr::lit("y"))]);

        let clauses =
            compile_inheritance_conflict_checks(&second, &PathCompiler, &mut session).unwrap();
        assert!(clauses.is_empty());
    }

    #[test]
    fn test_update_reads_through_overlay() {
        let schema = schema();
        let mut session = CompileSession::new(&schema);
        let a = stmt(&mut session, StmtKind::Insert, "default::A", &[("code", Expr::lit("x"))]);
        session.register_stmt(a.clone());
        let update = stmt(&mut session, StmtKind::Update, "default::B", &[("note", Expr::lit("n"))]);

        let clauses =
            compile_inheritance_conflict_checks(&update, &PathCompiler, &mut session).unwrap();
        assert_eq!(clauses.len(), 1);
        let clause = &clauses[0];
        assert_eq!(clause.else_fail, Some(a.id));
        let overlay = clause.update_overlay.as_ref().unwrap();
        assert!(overlay.scope.detached);
        assert!(clause.select.anchors.values().any(|set| set == overlay));
    }
}
