//! Conflict predicate synthesis.

use excl_core::Schema;
use excl_proto::ql::subst::{subject_paths_substitute, subject_substitute};
use excl_proto::{BinOp, Expr};

use super::anchors::AnchorMap;
use super::partition::ConstraintBucket;
use crate::error::CompileError;

/// Name of the reduction used to combine predicates.
const ANY_FUNCTION: &str = "any";

/// Build the filter selecting existing objects of `type_name` that collide
/// with the anchored row.
///
/// Pointer constraints compare `anchor = .ptr` (`IN` for multi pointers),
/// object constraints compare their subject expression instantiated with
/// the anchors against the same expression over the candidate. Several
/// predicates are combined with `any({...})` so that a predicate over an
/// empty value cannot make the whole filter empty. With an identity
/// anchor the row itself is excluded.
pub fn synthesize(
    schema: &Schema,
    anchors: &AnchorMap,
    bucket: &ConstraintBucket,
    type_name: &str,
    identity_pointer: &str,
) -> Result<Option<Expr>, CompileError> {
    let mut conds = Vec::new();

    for entry in &bucket.pointers {
        if !anchors.present.contains(&entry.name) {
            continue;
        }
        let Some(binding) = anchors.bindings.get(&entry.name) else {
            continue;
        };
        let anchor = subject_paths_substitute(binding, &anchors.bindings);
        let op = if schema.get_pointer(entry.pointer)?.is_single() {
            BinOp::Eq
        } else {
            BinOp::In
        };
        for id in &entry.constraints {
            let constraint = schema.get_constraint(*id)?;
            let (lhs, rhs) = match &constraint.subject_expr {
                Some(subject) => (
                    subject_substitute(subject, &anchor),
                    subject_substitute(subject, &Expr::partial(&entry.name)),
                ),
                None => (anchor.clone(), Expr::partial(&entry.name)),
            };
            conds.push(Expr::binop(op, lhs, rhs));
        }
    }

    let candidate = Expr::type_ref(type_name);
    for id in &bucket.objects {
        let constraint = schema.get_constraint(*id)?;
        let subject = constraint
            .subject_expr
            .as_ref()
            .ok_or_else(|| CompileError::internal("missing subject expression"))?;
        let lhs = subject_paths_substitute(subject, &anchors.bindings);
        let rhs = subject_substitute(subject, &candidate);
        conds.push(Expr::eq(lhs, rhs));
    }

    let cond = match conds.len() {
        0 => return Ok(None),
        1 => conds.remove(0),
        _ => Expr::call(ANY_FUNCTION, vec![Expr::Set(conds)]),
    };

    let cond = match &anchors.identity {
        Some(identity) => Expr::and(
            cond,
            Expr::binop(BinOp::Ne, identity.clone(), Expr::partial(identity_pointer)),
        ),
        None => cond,
    };
    Ok(Some(cond))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflicts::partition::PointerConstraints;
    use excl_core::{
        ConstraintDecl, PointerDecl, ScalarType, SchemaBuilder, TypeDecl, EXCLUSIVE_CONSTRAINT,
    };
    use excl_proto::TypeId;

    fn schema() -> Schema {
        SchemaBuilder::new(1)
            .with_type(
                TypeDecl::new("default::User")
                    .with_pointer(
                        PointerDecl::property("email", ScalarType::Str).with_constraint(
                            ConstraintDecl::new(EXCLUSIVE_CONSTRAINT)
                                .on(Expr::call("str_lower", vec![Expr::subject()])),
                        ),
                    )
                    .with_pointer(PointerDecl::property("tags", ScalarType::Str).multi().exclusive())
                    .with_pointer(PointerDecl::property("first", ScalarType::Str))
                    .with_pointer(PointerDecl::property("last", ScalarType::Str))
                    .with_constraint(ConstraintDecl::new(EXCLUSIVE_CONSTRAINT).on(Expr::Tuple(
                        vec![Expr::partial("first"), Expr::partial("last")],
                    ))),
            )
            .build()
            .unwrap()
    }

    fn user(schema: &Schema) -> TypeId {
        schema.get_type_by_name("default::User").unwrap().id
    }

    fn entry(schema: &Schema, name: &str) -> PointerConstraints {
        let ptr = schema.getptr(user(schema), name).unwrap().unwrap();
        PointerConstraints::new(name, ptr.id, ptr.constraints.clone())
    }

    fn anchored(names: &[&str]) -> AnchorMap {
        let mut anchors = AnchorMap::default();
        for (i, name) in names.iter().enumerate() {
            anchors
                .bindings
                .insert(name.to_string(), Expr::anchor(format!("{}~{}", name, i + 1)));
            anchors.present.insert(name.to_string());
        }
        anchors
    }

    #[test]
    fn test_single_pointer_with_subject_expr() {
        let schema = schema();
        let mut bucket = ConstraintBucket::new(user(&schema));
        bucket.pointers.push(entry(&schema, "email"));

        let cond = synthesize(&schema, &anchored(&["email"]), &bucket, "default::User", "id")
            .unwrap()
            .unwrap();
        assert_eq!(cond.to_string(), "str_lower(email~1) = str_lower(.email)");
    }

    #[test]
    fn test_multi_pointer_and_disjunction() {
        let schema = schema();
        let mut bucket = ConstraintBucket::new(user(&schema));
        bucket.pointers.push(entry(&schema, "email"));
        bucket.pointers.push(entry(&schema, "tags"));

        let cond = synthesize(
            &schema,
            &anchored(&["email", "tags"]),
            &bucket,
            "default::User",
            "id",
        )
        .unwrap()
        .unwrap();
        let text = cond.to_string();
        assert!(text.starts_with("any({"));
        assert!(text.contains("tags~2 IN .tags"));
    }

    #[test]
    fn test_absent_pointer_skipped() {
        let schema = schema();
        let mut bucket = ConstraintBucket::new(user(&schema));
        bucket.pointers.push(entry(&schema, "email"));

        let mut anchors = AnchorMap::default();
        anchors
            .bindings
            .insert("email".into(), Expr::empty_of("std::str"));
        assert!(synthesize(&schema, &anchors, &bucket, "default::User", "id")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_object_constraint_and_self_exclusion() {
        let schema = schema();
        let mut bucket = ConstraintBucket::new(user(&schema));
        bucket
            .objects
            .push(schema.type_constraints(user(&schema)).unwrap()[0].id);

        let mut anchors = anchored(&["first", "last", "id"]);
        anchors.identity = Some(Expr::anchor("id~3"));
        let cond = synthesize(&schema, &anchors, &bucket, "default::User", "id")
            .unwrap()
            .unwrap();
        assert_eq!(
            cond.to_string(),
            "((first~1, last~2) = (.first, .last)) AND (id~3 != .id)"
        );
    }
}
