//! Anchor resolution.
//!
//! Before a conflict predicate can be written, every pointer it reads needs
//! a value that stands for "what the mutated row will hold". That value is,
//! in order of preference: a path off an override set, the statement's own
//! shape entry (bound to an anchor so it is evaluated once), the pointer's
//! computed expression with its inputs substituted, or a typed empty set.

use std::collections::{BTreeMap, BTreeSet};

use excl_core::{PointerDef, PointerTarget, Schema};
use excl_proto::ql::subst::{find_subject_ptrs, subject_paths_substitute};
use excl_proto::{Expr, IrSet, MutatingStmt, Span, TypeId};
use tracing::trace;

use super::partition::ConstraintBucket;
use crate::compiler::ExprCompiler;
use crate::error::{CompileError, CompileErrorKind};
use crate::session::CompileSession;

/// Values standing in for the pointers of the row being written.
#[derive(Debug, Clone, Default)]
pub struct AnchorMap {
    /// Expression per pointer name. Anchor references, computed expressions
    /// over other bindings, or typed empty sets.
    pub bindings: BTreeMap<String, Expr>,
    /// Pointers with a real value, as opposed to an empty default.
    pub present: BTreeSet<String>,
    /// Compiled sets the anchors in `bindings` refer to.
    pub scope_anchors: BTreeMap<String, IrSet>,
    /// Identity of the mutated row, when resolving against an override set.
    pub identity: Option<Expr>,
}

/// What to resolve anchors for.
pub struct AnchorRequest<'r> {
    /// Statement whose shape supplies values.
    pub stmt: &'r MutatingStmt,
    /// Type the pointers are looked up on.
    pub subject_type: TypeId,
    /// Constraints that will be checked.
    pub bucket: &'r ConstraintBucket,
    /// Resolving for a cross-statement check.
    pub for_inheritance: bool,
    /// Post-write projection of the mutated rows.
    pub override_set: Option<&'r IrSet>,
    /// Span errors are reported at.
    pub span: Span,
}

fn lookup_pointer<'s>(
    schema: &'s Schema,
    type_id: TypeId,
    name: &str,
) -> Result<&'s PointerDef, CompileError> {
    schema.getptr(type_id, name)?.ok_or_else(|| {
        CompileError::internal(format!("pointer reference '{}' does not resolve", name))
    })
}

/// Pointers needed to check the bucket, closed over computed pointers,
/// together with the computed pointers' expressions.
fn needed_pointers(
    schema: &Schema,
    type_id: TypeId,
    bucket: &ConstraintBucket,
) -> Result<(BTreeSet<String>, BTreeMap<String, Expr>), CompileError> {
    let mut needed: BTreeSet<String> = bucket.pointers.iter().map(|p| p.name.clone()).collect();
    for id in &bucket.objects {
        let constraint = schema.get_constraint(*id)?;
        let expr = constraint
            .subject_expr
            .as_ref()
            .ok_or_else(|| CompileError::internal("missing subject expression"))?;
        needed.extend(find_subject_ptrs(expr));
    }

    let mut computed = BTreeMap::new();
    let mut worklist: Vec<String> = needed.iter().cloned().collect();
    while let Some(name) = worklist.pop() {
        let ptr = lookup_pointer(schema, type_id, &name)?;
        if let Some(expr) = &ptr.expr {
            for dep in find_subject_ptrs(expr) {
                if needed.insert(dep.clone()) {
                    worklist.push(dep);
                }
            }
            computed.insert(name, expr.clone());
        }
    }
    Ok((needed, computed))
}

fn empty_value(schema: &Schema, ptr: &PointerDef) -> Result<Expr, CompileError> {
    let type_name = match ptr.target {
        PointerTarget::Scalar(scalar) => scalar.qualified_name(),
        PointerTarget::Object(target) => schema.type_name(target)?,
    };
    Ok(Expr::empty_of(type_name))
}

/// Resolve anchors for every pointer a bucket's constraints read.
///
/// Returns `None` for a cross-statement check whose statement writes none
/// of the needed pointers. An update writing anything at all is checked
/// through its override set regardless.
pub fn resolve(
    request: &AnchorRequest<'_>,
    compiler: &dyn ExprCompiler,
    session: &mut CompileSession<'_>,
) -> Result<Option<AnchorMap>, CompileError> {
    if request.for_inheritance && request.stmt.subject.shape.is_empty() {
        return Ok(None);
    }
    let schema = session.schema();
    let (needed, computed) = needed_pointers(schema, request.subject_type, request.bucket)?;
    let mut anchors = AnchorMap::default();

    if let Some(override_set) = request.override_set {
        let identity = session.config().identity_pointer.clone();
        let overlay = session.fresh_anchor("__dml__");
        for name in needed.iter().chain(std::iter::once(&identity)) {
            lookup_pointer(schema, request.subject_type, name)?;
            anchors
                .bindings
                .insert(name.clone(), Expr::anchor(&overlay).extend_path([name.as_str()]));
            anchors.present.insert(name.clone());
        }
        anchors.identity = anchors.bindings.get(&identity).cloned();
        anchors.scope_anchors.insert(overlay, override_set.clone());
    }

    let mut from_shape = false;
    for elem in &request.stmt.subject.shape {
        if !needed.contains(&elem.name)
            || computed.contains_key(&elem.name)
            || anchors.bindings.contains_key(&elem.name)
        {
            continue;
        }
        if compiler.infer_volatility(&elem.value, session).is_volatile() {
            let message = if request.for_inheritance {
                "INSERT does not support volatile properties with exclusive constraints \
                 when another statement in the same query modifies a related type"
            } else {
                "INSERT UNLESS CONFLICT ON does not support volatile properties"
            };
            return Err(CompileError::new(
                message,
                request.span,
                CompileErrorKind::VolatileAnchor,
            ));
        }
        let anchor = session.fresh_anchor(&elem.name);
        trace!(pointer = %elem.name, anchor = %anchor, "anchored shape value");
        anchors
            .bindings
            .insert(elem.name.clone(), Expr::anchor(&anchor));
        anchors.present.insert(elem.name.clone());
        anchors.scope_anchors.insert(anchor, elem.value.clone());
        from_shape = true;
    }

    if request.for_inheritance && request.override_set.is_none() && !from_shape {
        return Ok(None);
    }

    for name in &needed {
        if anchors.bindings.contains_key(name) || computed.contains_key(name) {
            continue;
        }
        let ptr = lookup_pointer(schema, request.subject_type, name)?;
        anchors.bindings.insert(name.clone(), empty_value(schema, ptr)?);
    }

    // Computed pointers, each after everything it reads.
    let mut pending: BTreeMap<&String, &Expr> = computed
        .iter()
        .filter(|(name, _)| !anchors.bindings.contains_key(*name))
        .collect();
    while !pending.is_empty() {
        let ready: Vec<&String> = pending
            .iter()
            .filter(|(_, expr)| {
                find_subject_ptrs(expr)
                    .iter()
                    .all(|dep| anchors.bindings.contains_key(dep))
            })
            .map(|(name, _)| *name)
            .collect();
        if ready.is_empty() {
            return Err(CompileError::internal("computed pointer cycle"));
        }
        for name in ready {
            if let Some(expr) = pending.remove(name) {
                let value = subject_paths_substitute(expr, &anchors.bindings);
                trace!(pointer = %name, value = %value, "substituted computed pointer");
                anchors.bindings.insert(name.clone(), value);
                anchors.present.insert(name.clone());
            }
        }
    }

    if anchors.bindings.is_empty() {
        return Err(CompileError::new(
            "INSERT UNLESS CONFLICT property requires matching shape",
            request.span,
            CompileErrorKind::MissingShape,
        ));
    }
    Ok(Some(anchors))
}
