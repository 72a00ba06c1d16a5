//! The Validator (C5): static FK-reference checking and the pure,
//! synchronous half of the data-dependent probe. Actually running the
//! probe queries against a live tenant requires I/O and lives in
//! `migration-engine`, which owns the transport plumbing; this crate
//! only builds the query text (spec §4.5).

use crate::diff::SchemaDiff;
use crate::schema::{DefaultValue, Schema};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    FkReference,
    Unique,
    Check,
    FkConstraint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub table: String,
    pub column: String,
    pub message: String,
}

/// Static FK-reference check: every `references = "T.C"` must name a
/// table and column that exist in the target schema. No I/O.
pub fn static_validate_fk(schema: &Schema) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    for table in &schema.tables {
        for column in table.columns.values() {
            let Some(reference) = &column.references else {
                continue;
            };
            match reference.split_once('.') {
                None => errors.push(ValidationError {
                    kind: ValidationErrorKind::FkReference,
                    table: table.name.clone(),
                    column: column.name.clone(),
                    message: format!("reference '{}' is not of the form table.column", reference),
                }),
                Some((ref_table, ref_column)) => match schema.table(ref_table) {
                    None => errors.push(ValidationError {
                        kind: ValidationErrorKind::FkReference,
                        table: table.name.clone(),
                        column: column.name.clone(),
                        message: format!("referenced table '{}' does not exist", ref_table),
                    }),
                    Some(target) => {
                        if !target.columns.contains_key(ref_column) {
                            errors.push(ValidationError {
                                kind: ValidationErrorKind::FkReference,
                                table: table.name.clone(),
                                column: column.name.clone(),
                                message: format!(
                                    "referenced column '{}.{}' does not exist",
                                    ref_table, ref_column
                                ),
                            });
                        }
                    }
                },
            }
        }
    }
    errors
}

/// The kind of data-dependent counting query a `ProbeQuery` represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Unique,
    Check,
    FkOrphan,
}

/// A counting query built from the target schema, ready to be executed
/// against a live tenant by the caller. A non-zero count is a violation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeQuery {
    pub kind: ProbeKind,
    pub table: String,
    pub column: String,
    pub sql: String,
}

/// Build one counting query for each column that gains `UNIQUE`, a
/// `CHECK`, or a `FOREIGN KEY` in the target schema, and that already
/// existed in `old` (so the probe is meaningful against a live, still
/// unmigrated tenant). Diffs without that shape are ignored.
pub fn build_probe_queries(old: &Schema, new: &Schema, diffs: &[SchemaDiff]) -> Vec<ProbeQuery> {
    let mut queries = Vec::new();
    for d in diffs {
        let SchemaDiff::ModifyColumn { table, column } = d else {
            continue;
        };
        let Some(old_table) = old.table(table) else {
            continue;
        };
        if !old_table.columns.contains_key(column) {
            continue;
        }
        let Some(new_col) = new.table(table).and_then(|t| t.columns.get(column)) else {
            continue;
        };
        let old_col = old_table.columns.get(column).expect("checked above");

        if new_col.unique && !old_col.unique {
            queries.push(ProbeQuery {
                kind: ProbeKind::Unique,
                table: table.clone(),
                column: column.clone(),
                sql: format!(
                    "SELECT {col}, COUNT(*) AS n FROM {tbl} GROUP BY {col} HAVING COUNT(*) > 1",
                    col = crate::serializer::quote_ident(column),
                    tbl = crate::serializer::quote_ident(table)
                ),
            });
        }

        if let Some(check) = &new_col.check {
            if old_col.check.as_deref() != Some(check.as_str()) {
                queries.push(ProbeQuery {
                    kind: ProbeKind::Check,
                    table: table.clone(),
                    column: column.clone(),
                    sql: format!(
                        "SELECT COUNT(*) AS n FROM {tbl} WHERE NOT ({expr})",
                        tbl = crate::serializer::quote_ident(table),
                        expr = check
                    ),
                });
            }
        }

        if let (Some(reference), None) = (&new_col.references, &old_col.references) {
            if let Some((ref_table, ref_column)) = reference.split_once('.') {
                queries.push(ProbeQuery {
                    kind: ProbeKind::FkOrphan,
                    table: table.clone(),
                    column: column.clone(),
                    sql: format!(
                        "SELECT COUNT(*) AS n FROM {tbl} LEFT JOIN {ref_tbl} ON {tbl}.{col} = {ref_tbl}.{ref_col} \
                         WHERE {tbl}.{col} IS NOT NULL AND {ref_tbl}.{ref_col} IS NULL",
                        tbl = crate::serializer::quote_ident(table),
                        col = crate::serializer::quote_ident(column),
                        ref_tbl = crate::serializer::quote_ident(ref_table),
                        ref_col = crate::serializer::quote_ident(ref_column)
                    ),
                });
            }
        }
    }
    queries
}

/// Turn a probe's non-zero count into a `ValidationError`. The source
/// reports only the violation count, never a sample of offending rows
/// (a distinct query shape per violation kind would be needed for that).
pub fn probe_violation(query: &ProbeQuery, count: i64) -> ValidationError {
    let kind = match query.kind {
        ProbeKind::Unique => ValidationErrorKind::Unique,
        ProbeKind::Check => ValidationErrorKind::Check,
        ProbeKind::FkOrphan => ValidationErrorKind::FkConstraint,
    };
    let noun = match query.kind {
        ProbeKind::Unique => "duplicate group(s)",
        ProbeKind::Check => "row(s) violating the check",
        ProbeKind::FkOrphan => "orphaned row(s)",
    };
    ValidationError {
        kind,
        table: query.table.clone(),
        column: query.column.clone(),
        message: format!("{} {} found", count, noun),
    }
}

/// Rewrite every `add_column` diff with `notNull=true, default=None` in
/// `schema` to carry the type's zero default, unlocking the plain
/// `ADD COLUMN` path instead of the mirror-table rewrite. Applied only
/// at the caller's discretion (spec §4.5).
pub fn auto_fix(schema: &mut Schema, diffs: &[SchemaDiff]) {
    for d in diffs {
        let SchemaDiff::AddColumn { table, column } = d else {
            continue;
        };
        let Some(t) = schema.tables.iter_mut().find(|t| &t.name == table) else {
            continue;
        };
        let Some(col) = t.columns.get_mut(column) else {
            continue;
        };
        if col.not_null && col.default.is_none() {
            col.default = Some(match col.ty {
                crate::schema::ColumnType::Integer => DefaultValue::Integer(0),
                crate::schema::ColumnType::Real => DefaultValue::Real(0.0),
                crate::schema::ColumnType::Text => DefaultValue::String(String::new()),
                crate::schema::ColumnType::Blob => DefaultValue::String(String::new()),
            });
        }
    }
}
