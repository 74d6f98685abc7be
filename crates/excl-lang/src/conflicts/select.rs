//! Conflict-select orchestration.

use std::collections::BTreeMap;

use excl_proto::{ConstraintId, Expr, IrSet, MutatingStmt, SetExpr, Span, TypeId};
use tracing::{debug, instrument};

use super::anchors::{resolve, AnchorRequest};
use super::conditions::synthesize;
use super::partition::{partition, ConstraintBucket, PointerConstraints};
use crate::compiler::ExprCompiler;
use crate::error::CompileError;
use crate::session::{CompileScope, CompileSession};

/// A compiled conflict select.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictSelect {
    /// Detached select of every existing object that collides.
    pub select: IrSet,
    /// The runtime must run the select unconditionally.
    pub always_check: bool,
    /// Some of the constraints are declared on an ancestor type.
    pub from_ancestor: bool,
}

/// Input to [`compile_conflict_select`].
pub struct ConflictRequest<'r> {
    /// Statement being checked.
    pub stmt: &'r MutatingStmt,
    /// Type whose objects the select returns.
    pub subject_type: TypeId,
    /// Pointer-level constraints to check.
    pub pointer_constraints: &'r [PointerConstraints],
    /// Object-level constraints to check.
    pub object_constraints: &'r [ConstraintId],
    /// The caller isolated one constraint for a cross-statement check;
    /// `subject_type` is its declaring type.
    pub for_inheritance: bool,
    /// Post-write projection of the mutated rows.
    pub override_set: Option<&'r IrSet>,
    /// Span errors are reported at.
    pub span: Span,
}

/// Build the detached select of existing objects conflicting with `stmt`.
///
/// One sub-select is generated per declaring type and the results are
/// unioned. The union is compiled without an implicit limit and forced into
/// its own scope so it observes the state before the mutation.
#[instrument(
    skip(request, compiler, session),
    fields(subject = ?request.subject_type, for_inheritance = request.for_inheritance)
)]
pub fn compile_conflict_select(
    request: &ConflictRequest<'_>,
    compiler: &dyn ExprCompiler,
    session: &mut CompileSession<'_>,
) -> Result<ConflictSelect, CompileError> {
    let schema = session.schema();
    let buckets = if request.for_inheritance {
        vec![ConstraintBucket {
            owner: request.subject_type,
            pointers: request.pointer_constraints.to_vec(),
            objects: request.object_constraints.to_vec(),
        }]
    } else {
        partition(
            schema,
            request.pointer_constraints,
            request.object_constraints,
        )?
    };

    let mut from_ancestor = false;
    let mut frags = Vec::new();
    let mut anchors = BTreeMap::new();
    for bucket in &buckets {
        let anchor_request = AnchorRequest {
            stmt: request.stmt,
            subject_type: bucket.owner,
            bucket,
            for_inheritance: request.for_inheritance,
            override_set: request.override_set,
            span: request.span,
        };
        let Some(anchor_map) = resolve(&anchor_request, compiler, session)? else {
            continue;
        };
        let type_name = schema.type_name(bucket.owner)?;
        let identity = &session.config().identity_pointer;
        let Some(cond) = synthesize(schema, &anchor_map, bucket, type_name, identity)? else {
            continue;
        };

        let from_here = bucket.owner != request.subject_type;
        from_ancestor |= from_here;
        debug!(owner = %type_name, from_ancestor = from_here, filter = %cond, "conflict fragment");
        frags.push(Expr::detached(Expr::select(
            Expr::type_ref(type_name),
            Some(cond),
        )));
        anchors.extend(anchor_map.scope_anchors);
    }

    let mut always_check = from_ancestor;
    for child in schema.children(request.subject_type)? {
        if !schema.is_view(*child)? {
            always_check = true;
        }
    }

    let union = if frags.len() == 1 {
        frags.remove(0)
    } else {
        Expr::Set(frags)
    };
    let scope = CompileScope::new()
        .with_anchors(anchors)
        .with_implicit_limit(0)
        .force_reassign()
        .at(request.span);
    let mut select = compiler.compile(&union, &scope, session)?;
    if matches!(select.expr, SetExpr::Tuple(_)) {
        return Err(CompileError::internal(
            "detached select did not compile to a set",
        ));
    }
    select.scope.detached = true;
    select.scope.force_reassign = true;
    select.scope.implicit_limit = Some(0);

    Ok(ConflictSelect {
        select,
        always_check,
        from_ancestor,
    })
}
