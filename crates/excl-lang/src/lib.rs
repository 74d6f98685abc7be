//! Exclusivity-conflict compiler.
//!
//! Given an insert or update and the schema's exclusive constraints, this
//! crate produces the detached selects a runtime evaluates to find existing
//! objects the write would collide with.
//!
//! # Clauses
//!
//! ```text
//! INSERT User { email := 'a@b.c' } UNLESS CONFLICT
//! INSERT User { email := 'a@b.c' } UNLESS CONFLICT ON .email
//! INSERT User { email := 'a@b.c' } UNLESS CONFLICT ON .email ELSE (SELECT User)
//! ```
//!
//! Every statement is also checked against the statements compiled before
//! it in the same [`CompileSession`]: two inserts into sibling types that
//! share an exclusive constraint through a common ancestor get an explicit
//! check, reported against the earlier statement.
//!
//! # Usage
//!
//! ```rust
//! use excl_core::{PointerDecl, ScalarType, SchemaBuilder, TypeDecl};
//! use excl_lang::{CompileSession, InsertQuery, MutationCompiler, PathCompiler};
//! use excl_proto::Expr;
//!
//! let schema = SchemaBuilder::new(1)
//!     .with_type(
//!         TypeDecl::new("default::User")
//!             .with_pointer(PointerDecl::property("email", ScalarType::Str).exclusive()),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let mut session = CompileSession::new(&schema);
//! let compiler = MutationCompiler::new(&PathCompiler);
//! let insert = InsertQuery::new("default::User")
//!     .set("email", Expr::lit("a@b.c"))
//!     .unless_conflict();
//!
//! let compiled = compiler.compile_insert(&insert, &mut session).unwrap();
//! assert!(compiled.on_conflict.is_some());
//! ```

pub mod compiler;
pub mod config;
pub mod conflicts;
pub mod error;
pub mod session;
pub mod stmt;

pub use compiler::{ExprCompiler, PathCompiler, Volatility};
pub use config::ConflictConfig;
pub use conflicts::{
    compile_conflict_select, compile_inheritance_conflict_checks, compile_unless_conflict,
    compile_unless_conflict_on, ConflictRequest, ConflictSelect,
};
pub use error::{CompileError, CompileErrorKind, ErrorCategory, LangError};
pub use session::{CompileScope, CompileSession};
pub use stmt::{CompiledMutation, InsertQuery, MutationCompiler, UnlessConflict, UpdateQuery};
