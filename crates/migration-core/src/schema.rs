//! In-memory schema value objects: Schema, Table, Column, Index.
//!
//! These are plain value objects — freely copied, never shared-mutable.
//! Column storage is a `BTreeMap` so iteration is always name-sorted,
//! which makes the DDL serializer's "lexicographic column order" rule
//! fall out of the data structure instead of an extra sort step.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A column's SQL storage class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    Text,
    Real,
    Blob,
}

impl ColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Text => "TEXT",
            ColumnType::Real => "REAL",
            ColumnType::Blob => "BLOB",
        }
    }

    /// The type-appropriate zero value used to backfill NOT NULL columns
    /// added without a default during a mirror-table rewrite.
    pub fn zero_literal(&self) -> &'static str {
        match self {
            ColumnType::Integer => "0",
            ColumnType::Real => "0",
            ColumnType::Text => "''",
            ColumnType::Blob => "x''",
        }
    }
}

/// A recognized SQL expression usable as a column default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlExpr {
    CurrentTimestamp,
    CurrentDate,
    CurrentTime,
}

impl SqlExpr {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SqlExpr::CurrentTimestamp => "CURRENT_TIMESTAMP",
            SqlExpr::CurrentDate => "CURRENT_DATE",
            SqlExpr::CurrentTime => "CURRENT_TIME",
        }
    }
}

/// A column default: a literal value or a recognized SQL expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DefaultValue {
    Null,
    String(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
    Expr(SqlExpr),
}

impl DefaultValue {
    /// Stringified form used for tolerant equality comparison (spec §4.3:
    /// "default (stringified for tolerance to numeric representation drift)").
    pub fn stringified(&self) -> String {
        match self {
            DefaultValue::Null => "NULL".to_string(),
            DefaultValue::String(s) => s.clone(),
            DefaultValue::Integer(i) => i.to_string(),
            DefaultValue::Real(f) => format!("{}", f),
            DefaultValue::Bool(b) => if *b { "1".to_string() } else { "0".to_string() },
            DefaultValue::Expr(e) => e.as_sql().to_string(),
        }
    }
}

/// A foreign-key referential action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForeignKeyAction {
    Cascade,
    SetNull,
    Restrict,
    NoAction,
}

impl ForeignKeyAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ForeignKeyAction::Cascade => "CASCADE",
            ForeignKeyAction::SetNull => "SET NULL",
            ForeignKeyAction::Restrict => "RESTRICT",
            ForeignKeyAction::NoAction => "NO ACTION",
        }
    }
}

/// A generated (computed) column expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedColumn {
    pub expr: String,
    pub stored: bool,
}

/// A single column within a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub not_null: bool,
    pub unique: bool,
    pub default: Option<DefaultValue>,
    pub collate: Option<String>,
    pub check: Option<String>,
    pub generated: Option<GeneratedColumn>,
    /// `"table.column"` this column references, if any.
    pub references: Option<String>,
    pub on_delete: Option<ForeignKeyAction>,
    pub on_update: Option<ForeignKeyAction>,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            not_null: false,
            unique: false,
            default: None,
            collate: None,
            check: None,
            generated: None,
            references: None,
            on_delete: None,
            on_update: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_references(mut self, references: impl Into<String>) -> Self {
        self.references = Some(references.into());
        self
    }

    /// Whether two columns are equal per spec §4.3's column-equality rule:
    /// type, notNull, unique, default (stringified), collate, check,
    /// references, onDelete, onUpdate, and generated (field-wise).
    pub fn schema_eq(&self, other: &Column) -> bool {
        self.ty == other.ty
            && self.not_null == other.not_null
            && self.unique == other.unique
            && self.default.as_ref().map(DefaultValue::stringified)
                == other.default.as_ref().map(DefaultValue::stringified)
            && self.collate == other.collate
            && self.check == other.check
            && self.references == other.references
            && self.on_delete == other.on_delete
            && self.on_update == other.on_update
            && self.generated == other.generated
    }

    /// Attributes that differ from `other`, restricted to the set SQLite's
    /// ALTER TABLE cannot apply in place (spec §4.4.2). A non-empty result
    /// means a `modify_column` diff against this pair forces the
    /// mirror-table rewrite.
    pub fn restricted_diffs(&self, other: &Column) -> bool {
        self.ty != other.ty
            || self.not_null != other.not_null
            || self.check != other.check
            || self.collate != other.collate
            || self.unique != other.unique
            || self.references != other.references
            || self.on_delete != other.on_delete
            || self.on_update != other.on_update
            || self.generated != other.generated
    }
}

/// An index on one or more columns of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// A table within a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub pk: Vec<String>,
    pub columns: BTreeMap<String, Column>,
    pub indexes: Vec<Index>,
    pub fts_columns: Vec<String>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pk: Vec::new(),
            columns: BTreeMap::new(),
            indexes: Vec::new(),
            fts_columns: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.insert(column.name.clone(), column);
        self
    }

    pub fn with_pk(mut self, pk: Vec<String>) -> Self {
        self.pk = pk;
        self
    }

    pub fn with_index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_fts_columns(mut self, columns: Vec<String>) -> Self {
        self.fts_columns = columns;
        self
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// True iff this table's primary key is a single INTEGER column,
    /// making it the rowid alias (spec §3.1).
    pub fn is_rowid_alias_pk(&self) -> bool {
        self.pk.len() == 1
            && self
                .columns
                .get(&self.pk[0])
                .map(|c| c.ty == ColumnType::Integer)
                .unwrap_or(false)
    }
}

/// An ordered sequence of tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub tables: Vec<Table>,
}

impl Schema {
    pub fn new() -> Self {
        Self { tables: Vec::new() }
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Deterministic content hash used for `TemplateVersion.checksum`
    /// (spec §3.1, §8 round-trip law #3).
    pub fn checksum(&self) -> String {
        use sha2::{Digest, Sha256};
        let bytes = serde_json::to_vec(self).expect("Schema always serializes");
        let digest = Sha256::digest(&bytes);
        hex::encode(digest)
    }

    /// Serialize to the opaque binary payload stored in `TemplateVersion`
    /// (spec §6: "stored as opaque binary payloads").
    pub fn serialize(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("Schema always serializes")
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
