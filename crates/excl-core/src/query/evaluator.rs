//! Reference evaluator for compiled sets.
//!
//! Evaluates the expression forms conflict selects are built from with
//! set semantics: operators apply to the cartesian product of their
//! operands, an empty operand yields an empty result, and `FILTER` keeps an
//! element when its predicate yields `true`. Inside `SELECT T FILTER ...`
//! a reference to `T` denotes the element being filtered, and an anchor
//! read through pointer steps (`ov~1.name`, `ov~1.id`) is bound to one
//! element at a time so that every read of it in the filter agrees. Anchors
//! resolve to explicit overrides first and to the compiled set bound in the
//! IR otherwise.

use std::collections::{BTreeMap, BTreeSet};

use excl_proto::ql::subst::find_paths;
use excl_proto::ql::PathStart;
use excl_proto::{BinOp, Expr, IrSet, Path, SetExpr, Value};

use super::store::ObjectStore;
use crate::catalog::{Schema, ID_POINTER};
use crate::error::Error;

/// Evaluates compiled sets against an [`ObjectStore`].
pub struct Evaluator<'a> {
    schema: &'a Schema,
    store: &'a ObjectStore,
    overrides: BTreeMap<String, Vec<Value>>,
}

#[derive(Clone, Copy)]
struct Scope<'s> {
    prefix: Option<&'s Value>,
    factored: Option<(&'s str, &'s Value)>,
    bound: Option<&'s BTreeMap<String, Value>>,
    anchors: &'s BTreeMap<String, IrSet>,
}

impl<'s> Scope<'s> {
    fn root(anchors: &'s BTreeMap<String, IrSet>) -> Self {
        Self {
            prefix: None,
            factored: None,
            bound: None,
            anchors,
        }
    }
}

impl<'a> Evaluator<'a> {
    /// Create an evaluator over a schema and store.
    pub fn new(schema: &'a Schema, store: &'a ObjectStore) -> Self {
        Self {
            schema,
            store,
            overrides: BTreeMap::new(),
        }
    }

    /// Bind an anchor to explicit values, taking precedence over the set
    /// bound in the IR.
    pub fn with_anchor(mut self, name: impl Into<String>, values: Vec<Value>) -> Self {
        self.overrides.insert(name.into(), values);
        self
    }

    /// Evaluate a compiled set.
    pub fn eval_set(&self, set: &IrSet) -> Result<Vec<Value>, Error> {
        match &set.expr {
            SetExpr::Empty => Ok(Vec::new()),
            SetExpr::Expr(expr) => self.eval(expr, Scope::root(&set.anchors)),
            SetExpr::Tuple(elements) => {
                let sets = elements
                    .iter()
                    .map(|e| self.eval_set(e))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(cartesian(sets).into_iter().map(Value::Tuple).collect())
            }
        }
    }

    /// Evaluate a standalone expression with no anchors bound besides the
    /// overrides.
    pub fn eval_expr(&self, expr: &Expr) -> Result<Vec<Value>, Error> {
        let anchors = BTreeMap::new();
        self.eval(expr, Scope::root(&anchors))
    }

    fn eval(&self, expr: &Expr, scope: Scope<'_>) -> Result<Vec<Value>, Error> {
        match expr {
            Expr::Literal(v) => Ok(vec![v.clone()]),
            Expr::Path(path) => self.eval_path(path, scope),
            Expr::Set(elements) => {
                let mut out = Vec::new();
                for e in elements {
                    out.extend(self.eval(e, scope)?);
                }
                Ok(out)
            }
            Expr::Tuple(elements) => {
                let sets = elements
                    .iter()
                    .map(|e| self.eval(e, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(cartesian(sets).into_iter().map(Value::Tuple).collect())
            }
            Expr::BinOp { op, left, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                eval_binop(*op, &left, &right)
            }
            Expr::Call { func, args } => {
                let args = args
                    .iter()
                    .map(|a| self.eval(a, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                eval_call(func, args)
            }
            Expr::Cast { expr, .. } => self.eval(expr, scope),
            Expr::Detached(inner) => self.eval(inner, Scope::root(scope.anchors)),
            Expr::Select { result, filter } => {
                let candidates = self.eval(result, scope)?;
                let Some(filter) = filter else {
                    return Ok(candidates);
                };
                let factored_type = match result.as_ref() {
                    Expr::Path(Path {
                        start: PathStart::Type(name),
                        steps,
                    }) if steps.is_empty() => Some(name.as_str()),
                    _ => None,
                };
                let (names, rows) = self.factor_anchors(filter, scope)?;
                let mut kept = Vec::new();
                for candidate in candidates {
                    let mut matched = false;
                    for row in &rows {
                        let mut bound = scope.bound.cloned().unwrap_or_default();
                        bound.extend(names.iter().cloned().zip(row.iter().cloned()));
                        let verdict = self.eval(
                            filter,
                            Scope {
                                prefix: Some(&candidate),
                                factored: factored_type.map(|name| (name, &candidate)),
                                bound: Some(&bound),
                                anchors: scope.anchors,
                            },
                        )?;
                        if verdict.contains(&Value::Bool(true)) {
                            matched = true;
                            break;
                        }
                    }
                    if matched {
                        kept.push(candidate);
                    }
                }
                Ok(kept)
            }
        }
    }

    fn eval_path(&self, path: &Path, scope: Scope<'_>) -> Result<Vec<Value>, Error> {
        let mut current = match &path.start {
            PathStart::Subject => {
                return Err(Error::Eval("unsubstituted __subject__ reference".into()))
            }
            PathStart::Partial => match scope.prefix {
                Some(prefix) => vec![prefix.clone()],
                None => {
                    return Err(Error::Eval(format!(
                        "partial path '{}' outside of a filter",
                        path
                    )))
                }
            },
            PathStart::Type(name) => match scope.factored {
                Some((factored, value)) if factored == name => vec![value.clone()],
                _ => {
                    let ty = self.schema.get_type_by_name(name)?;
                    self.store
                        .objects_of(self.schema, ty.id)?
                        .into_iter()
                        .map(|o| Value::Object(o.id))
                        .collect()
                }
            },
            PathStart::Anchor(name) => self.eval_anchor(name, scope)?,
            PathStart::Expr(inner) => self.eval(inner, scope)?,
        };

        for step in &path.steps {
            let mut next = Vec::new();
            for value in &current {
                next.extend(self.step(value, step, scope)?);
            }
            current = next;
        }
        Ok(current)
    }

    /// Anchors read through pointer steps in a filter, with every
    /// combination of their elements.
    fn factor_anchors(
        &self,
        filter: &Expr,
        scope: Scope<'_>,
    ) -> Result<(Vec<String>, Vec<Vec<Value>>), Error> {
        let names: BTreeSet<String> = find_paths(filter)
            .into_iter()
            .filter(|p| !p.steps.is_empty())
            .filter_map(|p| match &p.start {
                PathStart::Anchor(name) => Some(name.clone()),
                _ => None,
            })
            .filter(|name| !scope.bound.is_some_and(|b| b.contains_key(name)))
            .collect();
        let names: Vec<String> = names.into_iter().collect();
        let sets = names
            .iter()
            .map(|name| self.eval_anchor(name, scope))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((names, cartesian(sets)))
    }

    fn eval_anchor(&self, name: &str, scope: Scope<'_>) -> Result<Vec<Value>, Error> {
        if let Some(value) = scope.bound.and_then(|b| b.get(name)) {
            return Ok(vec![value.clone()]);
        }
        if let Some(values) = self.overrides.get(name) {
            return Ok(values.clone());
        }
        match scope.anchors.get(name) {
            Some(set) => self.eval_set(set),
            None => Err(Error::Eval(format!("unbound anchor '{}'", name))),
        }
    }

    fn step(&self, value: &Value, name: &str, scope: Scope<'_>) -> Result<Vec<Value>, Error> {
        let Value::Object(id) = value else {
            return Err(Error::Eval(format!(
                "cannot follow '{}' from a {} value",
                name,
                value.type_name()
            )));
        };
        if name == ID_POINTER {
            return Ok(vec![value.clone()]);
        }
        let obj = self
            .store
            .get(*id)
            .ok_or_else(|| Error::Eval(format!("object {} does not exist", id)))?;
        let ptr = self.schema.getptr(obj.type_id, name)?.ok_or_else(|| {
            Error::Eval(format!(
                "object type '{}' has no link or property '{}'",
                self.schema.type_name(obj.type_id).unwrap_or("?"),
                name
            ))
        })?;

        match &ptr.expr {
            Some(expr) => self.eval(
                expr,
                Scope {
                    prefix: Some(value),
                    factored: None,
                    bound: None,
                    anchors: scope.anchors,
                },
            ),
            None => Ok(obj.get(name).to_vec()),
        }
    }
}

/// Cartesian product of a list of sets.
fn cartesian(sets: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    let mut rows: Vec<Vec<Value>> = vec![Vec::new()];
    for set in sets {
        let mut next = Vec::with_capacity(rows.len() * set.len());
        for row in &rows {
            for v in &set {
                let mut extended = row.clone();
                extended.push(v.clone());
                next.push(extended);
            }
        }
        rows = next;
    }
    rows
}

fn as_bool(v: &Value) -> Result<bool, Error> {
    v.as_bool()
        .ok_or_else(|| Error::Eval(format!("expected a bool, got {}", v.type_name())))
}

fn eval_binop(op: BinOp, left: &[Value], right: &[Value]) -> Result<Vec<Value>, Error> {
    if op == BinOp::In {
        return Ok(left
            .iter()
            .map(|l| Value::Bool(right.contains(l)))
            .collect());
    }

    let mut out = Vec::with_capacity(left.len() * right.len());
    for l in left {
        for r in right {
            let v = match op {
                BinOp::Eq => Value::Bool(l == r),
                BinOp::Ne => Value::Bool(l != r),
                BinOp::And => Value::Bool(as_bool(l)? && as_bool(r)?),
                BinOp::Or => Value::Bool(as_bool(l)? || as_bool(r)?),
                BinOp::Concat => match (l.as_str(), r.as_str()) {
                    (Some(a), Some(b)) => Value::String(format!("{}{}", a, b)),
                    _ => {
                        return Err(Error::Eval(format!(
                            "cannot concatenate {} and {}",
                            l.type_name(),
                            r.type_name()
                        )))
                    }
                },
                BinOp::In => unreachable!("handled above"),
            };
            out.push(v);
        }
    }
    Ok(out)
}

fn single_arg(func: &str, mut args: Vec<Vec<Value>>) -> Result<Vec<Value>, Error> {
    if args.len() != 1 {
        return Err(Error::Eval(format!(
            "function '{}' takes 1 argument, got {}",
            func,
            args.len()
        )));
    }
    Ok(args.remove(0))
}

fn map_str(values: Vec<Value>, f: impl Fn(&str) -> String) -> Result<Vec<Value>, Error> {
    values
        .into_iter()
        .map(|v| match v.as_str() {
            Some(s) => Ok(Value::String(f(s))),
            None => Err(Error::Eval(format!("expected a str, got {}", v.type_name()))),
        })
        .collect()
}

fn eval_call(func: &str, args: Vec<Vec<Value>>) -> Result<Vec<Value>, Error> {
    match func {
        "any" | "std::any" => {
            let arg = single_arg(func, args)?;
            let mut result = false;
            for v in &arg {
                result |= as_bool(v)?;
            }
            Ok(vec![Value::Bool(result)])
        }
        "all" | "std::all" => {
            let arg = single_arg(func, args)?;
            let mut result = true;
            for v in &arg {
                result &= as_bool(v)?;
            }
            Ok(vec![Value::Bool(result)])
        }
        "exists" | "std::exists" => {
            let arg = single_arg(func, args)?;
            Ok(vec![Value::Bool(!arg.is_empty())])
        }
        "count" | "std::count" => {
            let arg = single_arg(func, args)?;
            Ok(vec![Value::Int(arg.len() as i64)])
        }
        "str_lower" | "std::str_lower" => map_str(single_arg(func, args)?, str::to_lowercase),
        "str_upper" | "std::str_upper" => map_str(single_arg(func, args)?, str::to_uppercase),
        "str_trim" | "std::str_trim" => map_str(single_arg(func, args)?, |s| s.trim().to_string()),
        _ => Err(Error::Eval(format!("function '{}' is not supported", func))),
    }
}
