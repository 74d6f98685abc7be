//! Compiled IR.
//!
//! These are the artifacts the conflict compiler consumes (mutating
//! statements with compiled shapes) and produces (on-conflict clauses that
//! the code generation stage lowers into conditional writes).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{ConstraintId, PointerId, StmtId, TypeId};
use crate::ql::Expr;
use crate::span::Span;

/// Root of a path id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PathRoot {
    /// All objects of a type. Shared by every reference to that type in
    /// the same (non-detached) scope.
    Type(TypeId),
    /// Subject of a mutating statement on a type.
    Stmt(StmtId, TypeId),
    /// A detached expression; each one gets a fresh namespace.
    Detached(u32),
    /// Any other computed expression.
    Expr(u32),
}

/// Structural identity of a set: its root plus the pointers traversed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathId {
    pub root: PathRoot,
    pub steps: Vec<PointerId>,
}

impl PathId {
    /// Path id for all objects of a type.
    pub fn for_type(type_id: TypeId) -> Self {
        Self {
            root: PathRoot::Type(type_id),
            steps: Vec::new(),
        }
    }

    /// Path id for a detached expression.
    pub fn detached(ns: u32) -> Self {
        Self {
            root: PathRoot::Detached(ns),
            steps: Vec::new(),
        }
    }

    /// Path id for a computed expression.
    pub fn expr(n: u32) -> Self {
        Self {
            root: PathRoot::Expr(n),
            steps: Vec::new(),
        }
    }

    /// Path id for the subject of one mutating statement. Distinct from
    /// every other statement's subject, even on the same type.
    pub fn for_stmt(stmt: StmtId, type_id: TypeId) -> Self {
        Self {
            root: PathRoot::Stmt(stmt, type_id),
            steps: Vec::new(),
        }
    }

    /// The object type this path stands for all objects of, if it is a
    /// type or statement subject root.
    pub fn root_type(&self) -> Option<TypeId> {
        match (&self.root, self.steps.is_empty()) {
            (PathRoot::Type(id), true) | (PathRoot::Stmt(_, id), true) => Some(*id),
            _ => None,
        }
    }

    /// Extend by one pointer step.
    pub fn extend(&self, pointer: PointerId) -> Self {
        let mut steps = self.steps.clone();
        steps.push(pointer);
        Self {
            root: self.root.clone(),
            steps,
        }
    }

    /// Check whether this path id is `other` or a prefix of it.
    pub fn is_prefix_of(&self, other: &PathId) -> bool {
        self.root == other.root && other.steps.starts_with(&self.steps)
    }
}

/// Reference to the pointer a set was reached through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerRef {
    /// Path id of the source set.
    pub source: PathId,
    /// The pointer traversed.
    pub pointer: PointerId,
}

/// Evaluation scope flags of a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SetScope {
    /// Evaluated independently of the enclosing query.
    pub detached: bool,
    /// Forced into its own scope; never fused with enclosing path factoring.
    pub force_reassign: bool,
    /// Implicit result limit; `Some(0)` disables limiting.
    pub implicit_limit: Option<u64>,
}

/// What a compiled set computes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SetExpr {
    /// Statically empty.
    Empty,
    /// An expression.
    Expr(Expr),
    /// A tuple of sets.
    Tuple(Vec<IrSet>),
}

/// A compiled set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrSet {
    /// Structural identity.
    pub path_id: PathId,
    /// Object type of the elements, when they are objects.
    pub stype: Option<TypeId>,
    /// What the set computes.
    pub expr: SetExpr,
    /// Pointer this set was reached through, if it is a pointer path.
    pub rptr: Option<PointerRef>,
    /// Scope flags.
    pub scope: SetScope,
    /// Anchor bindings the expression refers to.
    pub anchors: BTreeMap<String, IrSet>,
}

impl IrSet {
    /// A statically empty set.
    pub fn empty(path_id: PathId, stype: Option<TypeId>) -> Self {
        Self {
            path_id,
            stype,
            expr: SetExpr::Empty,
            rptr: None,
            scope: SetScope::default(),
            anchors: BTreeMap::new(),
        }
    }

    /// A set computing an expression.
    pub fn from_expr(path_id: PathId, stype: Option<TypeId>, expr: Expr) -> Self {
        Self {
            path_id,
            stype,
            expr: SetExpr::Expr(expr),
            rptr: None,
            scope: SetScope::default(),
            anchors: BTreeMap::new(),
        }
    }

    /// Check whether the set is statically empty.
    pub fn is_empty(&self) -> bool {
        matches!(self.expr, SetExpr::Empty)
    }

    /// The expression, when the set computes one.
    pub fn as_expr(&self) -> Option<&Expr> {
        match &self.expr {
            SetExpr::Expr(e) => Some(e),
            _ => None,
        }
    }
}

/// Kind of mutating statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StmtKind {
    Insert,
    Update,
}

/// One entry of a mutation shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeElement {
    /// Pointer being written.
    pub pointer: PointerId,
    /// Short name of the pointer.
    pub name: String,
    /// Compiled value expression.
    pub value: IrSet,
}

/// The subject of a mutating statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectSet {
    /// Path id of the statement's subject.
    pub path_id: PathId,
    /// Type being inserted or updated.
    pub stype: TypeId,
    /// Columns being written, in source order.
    pub shape: Vec<ShapeElement>,
}

/// An insert or update in compiled form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutatingStmt {
    /// Session-unique statement id.
    pub id: StmtId,
    /// Insert or update.
    pub kind: StmtKind,
    /// Subject set and shape.
    pub subject: SubjectSet,
    /// Source span of the statement.
    pub span: Span,
}

impl MutatingStmt {
    /// Check if this is an update.
    pub fn is_update(&self) -> bool {
        self.kind == StmtKind::Update
    }
}

/// Reference to the constraint a clause enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintRef {
    pub id: ConstraintId,
}

impl ConstraintRef {
    /// Create a constraint reference.
    pub fn new(id: ConstraintId) -> Self {
        Self { id }
    }
}

/// A compiled on-conflict clause attached to an insert or update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnConflictClause {
    /// Constraint being enforced; `None` when the target is ambiguous.
    pub constraint: Option<ConstraintRef>,
    /// Select returning every pre-existing object that would collide.
    pub select: IrSet,
    /// The runtime must evaluate the select even when the row looks
    /// trivially conflict-free.
    pub always_check: bool,
    /// Alternative to run instead of failing.
    pub else_branch: Option<IrSet>,
    /// Statement whose context a failure is reported in.
    pub else_fail: Option<StmtId>,
    /// Post-write projection of an update the select reads through.
    pub update_overlay: Option<IrSet>,
}

impl OnConflictClause {
    /// Create a clause with no target, alternative or overlay.
    pub fn new(select: IrSet, always_check: bool) -> Self {
        Self {
            constraint: None,
            select,
            always_check,
            else_branch: None,
            else_fail: None,
            update_overlay: None,
        }
    }

    /// Set the constraint.
    pub fn with_constraint(mut self, constraint: ConstraintRef) -> Self {
        self.constraint = Some(constraint);
        self
    }

    /// Set the alternative branch.
    pub fn with_else_branch(mut self, else_branch: IrSet) -> Self {
        self.else_branch = Some(else_branch);
        self
    }

    /// Set the statement failures are routed to.
    pub fn with_else_fail(mut self, stmt: StmtId) -> Self {
        self.else_fail = Some(stmt);
        self
    }

    /// Set the update overlay.
    pub fn with_update_overlay(mut self, overlay: Option<IrSet>) -> Self {
        self.update_overlay = overlay;
        self
    }
}
