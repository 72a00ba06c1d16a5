//! Pure, synchronous core of the schema migration control plane: the
//! schema model, the Differ, the Planner, the Validator, and the DDL
//! Serializer. Nothing in this crate performs I/O — that's left to
//! `migration-db` (persistence) and `migration-engine` (execution).

pub mod diff;
pub mod error;
pub mod planner;
pub mod schema;
pub mod serializer;
pub mod validator;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

pub use error::{Error, ErrorCode};

/// Schema value objects.
pub use schema::{Column, ColumnType, DefaultValue, ForeignKeyAction, GeneratedColumn, Index, Schema, SqlExpr, Table};

/// Typed schema differences and the Differ entry point.
pub use diff::{diff, SchemaDiff};

/// The Planner: statement-ordering and mirror-table rewrite logic.
pub use planner::{plan, RenameMerge};

/// The Validator: static FK checking and probe-query construction.
pub use validator::{
    auto_fix, build_probe_queries, probe_violation, static_validate_fk, ProbeKind, ProbeQuery,
    ValidationError, ValidationErrorKind,
};

/// DDL rendering primitives, re-exported for callers assembling
/// statements outside the Planner (e.g. the Control Store's own
/// bootstrap DDL).
pub use serializer::{
    format_default, quote_ident, render_add_column, render_add_fts, render_create_index,
    render_create_table, render_drop_column, render_drop_fts, render_drop_index,
    render_drop_table, render_rename_column, render_rename_table, render_schema_bootstrap,
};
