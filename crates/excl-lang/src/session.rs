//! Compilation session and scope.
//!
//! A [`CompileSession`] lives for the compilation of one top-level query.
//! It owns the only mutable state the conflict compiler touches: the
//! statements compiled so far, id counters, and the set of paths that may
//! be referenced while they are being mutated. A [`CompileScope`] is the
//! per-expression context handed to the expression compiler.

use std::collections::{BTreeMap, BTreeSet};

use excl_core::Schema;
use excl_proto::{IrSet, MutatingStmt, PathId, Span, StmtId};

use crate::config::ConflictConfig;

/// State shared by every statement of one compiled query.
pub struct CompileSession<'s> {
    schema: &'s Schema,
    config: ConflictConfig,
    dml_stmts: Vec<MutatingStmt>,
    next_stmt: u32,
    next_anchor: u32,
    next_detached: u32,
    next_expr: u32,
    factoring_allowlist: BTreeSet<PathId>,
}

impl<'s> CompileSession<'s> {
    /// Create a session over a schema snapshot with the default
    /// configuration.
    pub fn new(schema: &'s Schema) -> Self {
        Self::with_config(schema, ConflictConfig::default())
    }

    /// Create a session with an explicit configuration.
    pub fn with_config(schema: &'s Schema, config: ConflictConfig) -> Self {
        Self {
            schema,
            config,
            dml_stmts: Vec::new(),
            next_stmt: 0,
            next_anchor: 0,
            next_detached: 0,
            next_expr: 0,
            factoring_allowlist: BTreeSet::new(),
        }
    }

    /// The schema snapshot.
    pub fn schema(&self) -> &'s Schema {
        self.schema
    }

    /// The configuration.
    pub fn config(&self) -> &ConflictConfig {
        &self.config
    }

    /// Mutating statements compiled so far, in compilation order.
    pub fn dml_stmts(&self) -> &[MutatingStmt] {
        &self.dml_stmts
    }

    /// Append a compiled statement.
    pub fn register_stmt(&mut self, stmt: MutatingStmt) {
        self.dml_stmts.push(stmt);
    }

    /// Allocate a statement id.
    pub fn next_stmt_id(&mut self) -> StmtId {
        self.next_stmt += 1;
        StmtId(self.next_stmt)
    }

    /// Allocate a fresh anchor name for a pointer, e.g. `name~3`.
    pub fn fresh_anchor(&mut self, name: &str) -> String {
        self.next_anchor += 1;
        format!("{}{}{}", name, self.config.anchor_separator, self.next_anchor)
    }

    /// Allocate a fresh detached path namespace.
    pub fn fresh_detached(&mut self) -> PathId {
        self.next_detached += 1;
        PathId::detached(self.next_detached)
    }

    /// Allocate a path id for a computed expression.
    pub fn fresh_expr(&mut self) -> PathId {
        self.next_expr += 1;
        PathId::expr(self.next_expr)
    }

    /// Allow a path being mutated to be referenced anyway.
    pub fn allow_factoring(&mut self, path_id: PathId) {
        self.factoring_allowlist.insert(path_id);
    }

    /// Withdraw a permission granted by [`allow_factoring`](Self::allow_factoring).
    pub fn revoke_factoring(&mut self, path_id: &PathId) {
        self.factoring_allowlist.remove(path_id);
    }

    /// Check whether a path may be referenced while being mutated.
    pub fn is_factoring_allowed(&self, path_id: &PathId) -> bool {
        self.factoring_allowlist.contains(path_id)
    }
}

/// Context an expression is compiled in.
#[derive(Debug, Clone, Default)]
pub struct CompileScope {
    /// Set that leading-dot paths are resolved against.
    pub partial_path_prefix: Option<IrSet>,
    /// Anchors visible to the expression.
    pub anchors: BTreeMap<String, IrSet>,
    /// Implicit result limit; `Some(0)` disables limiting.
    pub implicit_limit: Option<u64>,
    /// Force the result into its own scope.
    pub force_reassign: bool,
    /// Path of the statement being compiled, if any.
    pub mutating: Option<PathId>,
    /// Source span of the expression.
    pub span: Span,
}

impl CompileScope {
    /// Create an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the partial path prefix.
    pub fn with_prefix(mut self, prefix: IrSet) -> Self {
        self.partial_path_prefix = Some(prefix);
        self
    }

    /// Bind anchors.
    pub fn with_anchors(mut self, anchors: BTreeMap<String, IrSet>) -> Self {
        self.anchors.extend(anchors);
        self
    }

    /// Set the implicit limit.
    pub fn with_implicit_limit(mut self, limit: u64) -> Self {
        self.implicit_limit = Some(limit);
        self
    }

    /// Force the result into its own scope.
    pub fn force_reassign(mut self) -> Self {
        self.force_reassign = true;
        self
    }

    /// Record the path being mutated.
    pub fn mutating(mut self, path_id: PathId) -> Self {
        self.mutating = Some(path_id);
        self
    }

    /// Set the source span.
    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}
