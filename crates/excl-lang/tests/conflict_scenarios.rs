//! End-to-end conflict compilation, checked against the reference evaluator.

use excl_core::catalog::{
    ConstraintDecl, PointerDecl, ScalarType, Schema, SchemaBuilder, TypeDecl, EXCLUSIVE_CONSTRAINT,
};
use excl_core::query::{Evaluator, ObjectStore};
use excl_lang::{
    CompileErrorKind, CompileSession, CompiledMutation, InsertQuery, MutationCompiler,
    PathCompiler, UpdateQuery,
};
use excl_proto::{ConstraintRef, Expr, IrSet, Span, Spanned, Value};
use pretty_assertions::assert_eq;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn schema() -> Schema {
    SchemaBuilder::new(3)
        .with_type(
            TypeDecl::new("default::Item")
                .with_pointer(PointerDecl::property("name", ScalarType::Str).exclusive())
                .with_pointer(PointerDecl::property("tags", ScalarType::Str).multi())
                .with_pointer(PointerDecl::link("parent", "default::Item")),
        )
        .with_type(
            TypeDecl::new("default::T")
                .with_pointer(PointerDecl::property("name", ScalarType::Str).exclusive()),
        )
        .with_type(TypeDecl::new("default::U").extending("default::T"))
        .with_type(
            TypeDecl::abstract_type("default::C")
                .with_pointer(PointerDecl::property("code", ScalarType::Str).exclusive())
                .with_pointer(PointerDecl::property("note", ScalarType::Str)),
        )
        .with_type(TypeDecl::new("default::A").extending("default::C"))
        .with_type(TypeDecl::new("default::B").extending("default::C"))
        .with_type(
            TypeDecl::abstract_type("default::Named")
                .with_pointer(PointerDecl::property("first", ScalarType::Str))
                .with_pointer(PointerDecl::property("last", ScalarType::Str))
                .with_constraint(ConstraintDecl::new(EXCLUSIVE_CONSTRAINT).on(Expr::Tuple(vec![
                    Expr::partial("first"),
                    Expr::partial("last"),
                ]))),
        )
        .with_type(TypeDecl::new("default::Cat").extending("default::Named"))
        .with_type(TypeDecl::new("default::Dog").extending("default::Named"))
        .with_type(
            TypeDecl::new("default::Plain")
                .with_pointer(PointerDecl::property("label", ScalarType::Str)),
        )
        .with_type(
            TypeDecl::new("default::Person")
                .with_pointer(PointerDecl::property("first", ScalarType::Str))
                .with_pointer(PointerDecl::property("last", ScalarType::Str))
                .with_pointer(
                    PointerDecl::property("email", ScalarType::Str)
                        .exclusive()
                        .with_constraint(
                            ConstraintDecl::new(EXCLUSIVE_CONSTRAINT)
                                .on(Expr::call("str_lower", vec![Expr::subject()])),
                        ),
                )
                .with_pointer(
                    PointerDecl::property("handle", ScalarType::Str)
                        .computed(Expr::call("str_lower", vec![Expr::partial("first")])),
                )
                .with_pointer(
                    PointerDecl::property("slug", ScalarType::Str)
                        .computed(Expr::call("str_trim", vec![Expr::partial("handle")]))
                        .exclusive(),
                )
                .with_constraint(ConstraintDecl::new(EXCLUSIVE_CONSTRAINT).on(Expr::Tuple(vec![
                    Expr::partial("first"),
                    Expr::partial("last"),
                ]))),
        )
        .build()
        .unwrap()
}

fn target(expr: Expr) -> Spanned<Expr> {
    Spanned::new(expr, Span::new(40, 48))
}

fn insert(session: &mut CompileSession<'_>, query: InsertQuery) -> CompiledMutation {
    MutationCompiler::new(&PathCompiler)
        .compile_insert(&query, session)
        .unwrap()
}

fn eval(schema: &Schema, store: &ObjectStore, set: &IrSet) -> Vec<Value> {
    Evaluator::new(schema, store).eval_set(set).unwrap()
}

fn pointer_constraint(schema: &Schema, type_name: &str, pointer: &str) -> ConstraintRef {
    let ty = schema.get_type_by_name(type_name).unwrap().id;
    ConstraintRef::new(schema.getptr(ty, pointer).unwrap().unwrap().constraints[0])
}

#[test]
fn test_implicit_clause_finds_existing_object() {
    init_tracing();
    let schema = schema();
    let mut store = ObjectStore::new();
    let a = store
        .insert(&schema, "default::Item", [("name", vec![Value::from("a")])])
        .unwrap();
    store
        .insert(&schema, "default::Item", [("name", vec![Value::from("b")])])
        .unwrap();

    let mut session = CompileSession::new(&schema);
    let compiled = insert(
        &mut session,
        InsertQuery::new("default::Item")
            .set("name", Expr::lit("a"))
            .unless_conflict(),
    );
    let clause = compiled.on_conflict.unwrap();

    assert_eq!(
        clause.select.as_expr().unwrap().to_string(),
        "DETACHED ((SELECT default::Item FILTER name~1 = .name))"
    );
    assert!(clause.constraint.is_none());
    assert!(!clause.always_check);
    assert!(clause.select.scope.detached);
    assert_eq!(clause.select.scope.implicit_limit, Some(0));
    assert_eq!(eval(&schema, &store, &clause.select), vec![Value::Object(a)]);
}

#[test]
fn test_subtypes_force_always_check() {
    let schema = schema();
    let mut session = CompileSession::new(&schema);

    let parent = insert(
        &mut session,
        InsertQuery::new("default::T")
            .set("name", Expr::lit("x"))
            .unless_conflict(),
    );
    assert!(parent.on_conflict.unwrap().always_check);

    let child = insert(
        &mut session,
        InsertQuery::new("default::U")
            .set("name", Expr::lit("y"))
            .unless_conflict(),
    );
    assert!(child.on_conflict.unwrap().always_check);
}

#[test]
fn test_subtype_insert_checks_parent_objects() {
    let schema = schema();
    let mut store = ObjectStore::new();
    let existing = store
        .insert(&schema, "default::T", [("name", vec![Value::from("taken")])])
        .unwrap();

    let mut session = CompileSession::new(&schema);
    let compiled = insert(
        &mut session,
        InsertQuery::new("default::U")
            .set("name", Expr::lit("taken"))
            .unless_conflict_on(target(Expr::partial("name"))),
    );
    let clause = compiled.on_conflict.unwrap();

    assert_eq!(
        clause.constraint,
        Some(pointer_constraint(&schema, "default::U", "name"))
    );
    assert!(clause
        .select
        .as_expr()
        .unwrap()
        .to_string()
        .contains("SELECT default::T FILTER"));
    assert_eq!(
        eval(&schema, &store, &clause.select),
        vec![Value::Object(existing)]
    );
}

#[test]
fn test_else_branch() {
    let schema = schema();
    let mut session = CompileSession::new(&schema);
    let compiled = insert(
        &mut session,
        InsertQuery::new("default::T")
            .set("name", Expr::lit("x"))
            .unless_conflict_on(target(Expr::partial("name")))
            .otherwise(Spanned::new(Expr::type_ref("default::T"), Span::new(55, 64))),
    );
    let clause = compiled.on_conflict.unwrap();

    assert_eq!(
        clause.constraint,
        Some(pointer_constraint(&schema, "default::T", "name"))
    );
    let else_branch = clause.else_branch.unwrap();
    assert_eq!(
        else_branch.as_expr(),
        Some(&Expr::select(Expr::type_ref("default::T"), None))
    );
}

#[test]
fn test_else_branch_does_not_allow_later_self_reference() {
    let schema = schema();
    let compiler = MutationCompiler::new(&PathCompiler);
    let self_referencing = InsertQuery::new("default::Item")
        .set("name", Expr::lit("b"))
        .set("parent", Expr::select(Expr::type_ref("default::Item"), None));

    let mut session = CompileSession::new(&schema);
    let err = compiler
        .compile_insert(&self_referencing, &mut session)
        .unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::SelfReference);

    let mut session = CompileSession::new(&schema);
    let with_else = insert(
        &mut session,
        InsertQuery::new("default::Item")
            .set("name", Expr::lit("a"))
            .unless_conflict_on(target(Expr::partial("name")))
            .otherwise(Spanned::new(Expr::type_ref("default::Item"), Span::new(55, 64))),
    );
    assert!(with_else.on_conflict.unwrap().else_branch.is_some());

    let err = compiler
        .compile_insert(&self_referencing, &mut session)
        .unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::SelfReference);
}

#[test]
fn test_else_rejected_for_inherited_constraint() {
    let schema = schema();
    let mut session = CompileSession::new(&schema);
    let else_span = Span::new(55, 64);
    let err = MutationCompiler::new(&PathCompiler)
        .compile_insert(
            &InsertQuery::new("default::U")
                .set("name", Expr::lit("x"))
                .unless_conflict_on(target(Expr::partial("name")))
                .otherwise(Spanned::new(Expr::type_ref("default::U"), else_span)),
            &mut session,
        )
        .unwrap_err();

    assert_eq!(err.kind, CompileErrorKind::ElseOnInheritedConstraint);
    assert_eq!(err.span, else_span);
    assert_eq!(
        err.message,
        "UNLESS CONFLICT can not use ELSE when constraint is from a parent type"
    );
}

#[test]
fn test_invalid_conflict_targets() {
    let schema = schema();
    let compiler = MutationCompiler::new(&PathCompiler);
    let cases = [
        (
            "default::Item",
            Expr::lit(1i64),
            CompileErrorKind::InvalidConflictTarget,
            "UNLESS CONFLICT argument must be a property, link, or tuple of properties and links",
        ),
        (
            "default::Item",
            Expr::partial("parent").extend_path(["name"]),
            CompileErrorKind::ForeignPointer,
            "UNLESS CONFLICT argument must be a property of the type being inserted",
        ),
        (
            "default::Item",
            Expr::partial("tags"),
            CompileErrorKind::MultiPointer,
            "UNLESS CONFLICT property must be a SINGLE property",
        ),
        (
            "default::Person",
            Expr::partial("last"),
            CompileErrorKind::AmbiguousConstraint,
            "UNLESS CONFLICT property must have a single exclusive constraint",
        ),
        (
            "default::Person",
            Expr::partial("email"),
            CompileErrorKind::AmbiguousConstraint,
            "UNLESS CONFLICT property must have a single exclusive constraint",
        ),
    ];

    for (type_name, expr, kind, message) in cases {
        let mut session = CompileSession::new(&schema);
        let err = compiler
            .compile_insert(
                &InsertQuery::new(type_name).unless_conflict_on(target(expr)),
                &mut session,
            )
            .unwrap_err();
        assert_eq!(err.kind, kind);
        assert_eq!(err.message, message);
        assert_eq!(err.span, Span::new(40, 48));
    }
}

#[test]
fn test_ambiguous_target_hint_counts_matches() {
    let schema = schema();
    let mut session = CompileSession::new(&schema);
    let err = MutationCompiler::new(&PathCompiler)
        .compile_insert(
            &InsertQuery::new("default::Person")
                .unless_conflict_on(target(Expr::partial("email"))),
            &mut session,
        )
        .unwrap_err();
    assert_eq!(
        err.hint.as_deref(),
        Some("found 2 exclusive constraints over the given pointers")
    );
}

#[test]
fn test_tuple_target_uses_object_constraint() {
    let schema = schema();
    let mut store = ObjectStore::new();
    let same = store
        .insert(
            &schema,
            "default::Person",
            [
                ("first", vec![Value::from("Ann")]),
                ("last", vec![Value::from("Lee")]),
            ],
        )
        .unwrap();
    store
        .insert(
            &schema,
            "default::Person",
            [
                ("first", vec![Value::from("Ann")]),
                ("last", vec![Value::from("Kim")]),
            ],
        )
        .unwrap();

    let mut session = CompileSession::new(&schema);
    let compiled = insert(
        &mut session,
        InsertQuery::new("default::Person")
            .set("first", Expr::lit("Ann"))
            .set("last", Expr::lit("Lee"))
            .unless_conflict_on(target(Expr::Tuple(vec![
                Expr::partial("first"),
                Expr::partial("last"),
            ]))),
    );
    let clause = compiled.on_conflict.unwrap();

    let person = schema.get_type_by_name("default::Person").unwrap().id;
    let object_constraint = schema.type_constraints(person).unwrap()[0].id;
    assert_eq!(clause.constraint, Some(ConstraintRef::new(object_constraint)));
    assert_eq!(
        clause.select.as_expr().unwrap().to_string(),
        "DETACHED ((SELECT default::Person FILTER (first~1, last~2) = (.first, .last)))"
    );
    assert_eq!(eval(&schema, &store, &clause.select), vec![Value::Object(same)]);
}

#[test]
fn test_computed_chain_is_fully_substituted() {
    let schema = schema();
    let mut store = ObjectStore::new();
    let existing = store
        .insert(&schema, "default::Person", [("first", vec![Value::from("ann")])])
        .unwrap();

    let mut session = CompileSession::new(&schema);
    let compiled = insert(
        &mut session,
        InsertQuery::new("default::Person")
            .set("first", Expr::lit(" Ann"))
            .set("last", Expr::lit("Lee"))
            .unless_conflict_on(target(Expr::partial("slug"))),
    );
    let clause = compiled.on_conflict.unwrap();

    assert_eq!(
        clause.select.as_expr().unwrap().to_string(),
        "DETACHED ((SELECT default::Person FILTER str_trim(str_lower(first~1)) = .slug))"
    );
    assert_eq!(
        eval(&schema, &store, &clause.select),
        vec![Value::Object(existing)]
    );
}

#[test]
fn test_missing_value_yields_empty_select() {
    let schema = schema();
    let mut session = CompileSession::new(&schema);
    let compiled = insert(
        &mut session,
        InsertQuery::new("default::Item")
            .set("tags", Expr::lit("t"))
            .unless_conflict_on(target(Expr::partial("name"))),
    );
    assert!(compiled.on_conflict.unwrap().select.is_empty());
}

#[test]
fn test_zero_constraints_yield_empty_select() {
    let schema = schema();
    let mut session = CompileSession::new(&schema);
    let compiled = insert(
        &mut session,
        InsertQuery::new("default::Plain")
            .set("label", Expr::lit("l"))
            .unless_conflict(),
    );
    let clause = compiled.on_conflict.unwrap();
    assert!(clause.select.is_empty());
    assert!(!clause.always_check);
}

#[test]
fn test_inherited_constraint_partitioned_to_declaring_type() {
    let schema = schema();
    let mut session = CompileSession::new(&schema);
    let compiled = insert(
        &mut session,
        InsertQuery::new("default::A")
            .set("code", Expr::lit("x"))
            .unless_conflict(),
    );
    let clause = compiled.on_conflict.unwrap();
    assert_eq!(
        clause.select.as_expr().unwrap().to_string(),
        "DETACHED ((SELECT default::C FILTER code~1 = .code))"
    );
    assert!(clause.always_check);
}

#[test]
fn test_disjunction_does_not_depend_on_shape_order() {
    let schema = schema();
    let mut store = ObjectStore::new();
    let by_email = store
        .insert(
            &schema,
            "default::Person",
            [
                ("first", vec![Value::from("Zed")]),
                ("email", vec![Value::from("ann@x.io")]),
            ],
        )
        .unwrap();
    let by_slug = store
        .insert(&schema, "default::Person", [("first", vec![Value::from("bob ")])])
        .unwrap();
    store
        .insert(
            &schema,
            "default::Person",
            [
                ("first", vec![Value::from("Nope")]),
                ("email", vec![Value::from("other@x.io")]),
            ],
        )
        .unwrap();

    // `last` is never written, so the object constraint's operand is empty.
    let run = |query: InsertQuery| {
        let mut session = CompileSession::new(&schema);
        let clause = insert(&mut session, query.unless_conflict()).on_conflict.unwrap();
        assert!(clause.select.as_expr().unwrap().to_string().contains("any({"));
        let mut found = eval(&schema, &store, &clause.select);
        found.sort_by_key(|v| format!("{:?}", v));
        found
    };
    let email_first = run(
        InsertQuery::new("default::Person")
            .set("email", Expr::lit("Ann@X.io"))
            .set("first", Expr::lit("Bob")),
    );
    let first_first = run(
        InsertQuery::new("default::Person")
            .set("first", Expr::lit("Bob"))
            .set("email", Expr::lit("Ann@X.io")),
    );

    assert_eq!(email_first, first_first);
    assert_eq!(email_first.len(), 2);
    assert!(email_first.contains(&Value::Object(by_email)));
    assert!(email_first.contains(&Value::Object(by_slug)));
}

#[test]
fn test_volatile_values_rejected() {
    let schema = schema();
    let compiler = MutationCompiler::new(&PathCompiler);

    let mut session = CompileSession::new(&schema);
    let err = compiler
        .compile_insert(
            &InsertQuery::new("default::Item")
                .set("name", Expr::call("random", vec![]))
                .unless_conflict(),
            &mut session,
        )
        .unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::VolatileAnchor);
    assert_eq!(
        err.message,
        "INSERT UNLESS CONFLICT ON does not support volatile properties"
    );

    let mut session = CompileSession::new(&schema);
    insert(
        &mut session,
        InsertQuery::new("default::A").set("code", Expr::lit("x")),
    );
    let err = compiler
        .compile_insert(
            &InsertQuery::new("default::B").set("code", Expr::call("random", vec![])),
            &mut session,
        )
        .unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::VolatileAnchor);
    assert_eq!(
        err.message,
        "INSERT does not support volatile properties with exclusive constraints \
         when another statement in the same query modifies a related type"
    );
}

#[test]
fn test_sibling_inserts_checked_against_each_other() {
    let schema = schema();
    let mut store = ObjectStore::new();
    let clash = store
        .insert(&schema, "default::A", [("code", vec![Value::from("x")])])
        .unwrap();
    store
        .insert(&schema, "default::A", [("code", vec![Value::from("q")])])
        .unwrap();

    let mut session = CompileSession::new(&schema);
    let first = insert(
        &mut session,
        InsertQuery::new("default::A").set("code", Expr::lit("x")),
    );
    assert!(first.conflict_checks.is_empty());

    let second = insert(
        &mut session,
        InsertQuery::new("default::B").set("code", Expr::lit("x")),
    );
    assert_eq!(second.conflict_checks.len(), 1);
    let check = &second.conflict_checks[0];
    assert_eq!(check.else_fail, Some(first.stmt.id));
    assert_eq!(
        check.constraint,
        Some(pointer_constraint(&schema, "default::C", "code"))
    );
    assert_eq!(
        check.select.as_expr().unwrap().to_string(),
        "DETACHED ((SELECT default::C FILTER code~1 = .code))"
    );
    assert_eq!(eval(&schema, &store, &check.select), vec![Value::Object(clash)]);
}

#[test]
fn test_sibling_inserts_checked_on_shared_object_constraint() {
    let schema = schema();
    let mut store = ObjectStore::new();
    let clash = store
        .insert(
            &schema,
            "default::Cat",
            [
                ("first", vec![Value::from("Tom")]),
                ("last", vec![Value::from("Cat")]),
            ],
        )
        .unwrap();
    store
        .insert(
            &schema,
            "default::Dog",
            [
                ("first", vec![Value::from("Tom")]),
                ("last", vec![Value::from("Dog")]),
            ],
        )
        .unwrap();

    let mut session = CompileSession::new(&schema);
    let first = insert(
        &mut session,
        InsertQuery::new("default::Cat")
            .set("first", Expr::lit("Tom"))
            .set("last", Expr::lit("Cat")),
    );
    let second = insert(
        &mut session,
        InsertQuery::new("default::Dog")
            .set("first", Expr::lit("Tom"))
            .set("last", Expr::lit("Cat")),
    );

    let named = schema.get_type_by_name("default::Named").unwrap().id;
    let constraint = schema.type_constraints(named).unwrap()[0].id;
    assert_eq!(second.conflict_checks.len(), 1);
    let check = &second.conflict_checks[0];
    assert_eq!(check.constraint, Some(ConstraintRef::new(constraint)));
    assert_eq!(check.else_fail, Some(first.stmt.id));
    assert_eq!(
        check.select.as_expr().unwrap().to_string(),
        "DETACHED ((SELECT default::Named FILTER (first~1, last~2) = (.first, .last)))"
    );
    assert_eq!(eval(&schema, &store, &check.select), vec![Value::Object(clash)]);
}

#[test]
fn test_sibling_checks_do_not_depend_on_order() {
    let schema = schema();
    let run = |first: &str, second: &str| {
        let mut session = CompileSession::new(&schema);
        insert(&mut session, InsertQuery::new(first).set("code", Expr::lit("x")));
        let compiled = insert(&mut session, InsertQuery::new(second).set("code", Expr::lit("x")));
        compiled
            .conflict_checks
            .iter()
            .map(|c| (c.constraint, c.else_fail))
            .collect::<Vec<_>>()
    };

    assert_eq!(
        run("default::A", "default::B"),
        run("default::B", "default::A")
    );
}

#[test]
fn test_update_checked_through_overlay() {
    let schema = schema();
    let mut store = ObjectStore::new();
    store
        .insert(&schema, "default::A", [("code", vec![Value::from("x")])])
        .unwrap();
    store
        .insert(&schema, "default::B", [("code", vec![Value::from("y")])])
        .unwrap();
    let clash = store
        .insert(&schema, "default::A", [("code", vec![Value::from("y")])])
        .unwrap();

    let mut session = CompileSession::new(&schema);
    let compiler = MutationCompiler::new(&PathCompiler);
    let first = insert(
        &mut session,
        InsertQuery::new("default::A").set("code", Expr::lit("z")),
    );
    let update = compiler
        .compile_update(
            &UpdateQuery::new("default::B").set("note", Expr::lit("n")),
            &mut session,
        )
        .unwrap();

    assert_eq!(update.conflict_checks.len(), 1);
    let check = &update.conflict_checks[0];
    assert_eq!(check.else_fail, Some(first.stmt.id));
    assert!(check.update_overlay.is_some());
    // The B object itself is excluded by identity.
    assert_eq!(eval(&schema, &store, &check.select), vec![Value::Object(clash)]);
}

#[test]
fn test_update_without_shape_needs_no_checks() {
    let schema = schema();
    let mut session = CompileSession::new(&schema);
    insert(
        &mut session,
        InsertQuery::new("default::A").set("code", Expr::lit("x")),
    );

    let update = MutationCompiler::new(&PathCompiler)
        .compile_update(&UpdateQuery::new("default::B"), &mut session)
        .unwrap();
    assert!(update.conflict_checks.is_empty());
}

#[test]
fn test_update_checks_itself_across_subtypes() {
    let schema = schema();
    let mut store = ObjectStore::new();
    store
        .insert(&schema, "default::A", [("code", vec![Value::from("x")])])
        .unwrap();
    store
        .insert(&schema, "default::B", [("code", vec![Value::from("y")])])
        .unwrap();

    let mut session = CompileSession::new(&schema);
    let update = MutationCompiler::new(&PathCompiler)
        .compile_update(
            &UpdateQuery::new("default::C").set("note", Expr::lit("n")),
            &mut session,
        )
        .unwrap();

    assert_eq!(update.conflict_checks.len(), 3);
    for check in &update.conflict_checks {
        assert_eq!(check.else_fail, Some(update.stmt.id));
        assert!(check.update_overlay.is_some());
        assert!(!check.always_check);
        assert!(eval(&schema, &store, &check.select).is_empty());
    }
}

#[test]
fn test_insert_target_validation() {
    let schema = schema();
    let compiler = MutationCompiler::new(&PathCompiler);
    let mut session = CompileSession::new(&schema);

    let err = compiler
        .compile_insert(&InsertQuery::new("default::C"), &mut session)
        .unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::InvalidInsertTarget);
    assert_eq!(err.message, "cannot insert into abstract object type 'default::C'");
}
