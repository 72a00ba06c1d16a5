//! The Differ (C3): produces an ordered list of typed `SchemaDiff` records
//! between two schemas. Never infers renames — a drop+add pair with
//! compatible shape is left as two diffs for the caller to confirm.

use crate::schema::Schema;
use serde::{Deserialize, Serialize};

/// A single typed schema difference. Tagged union on `kind`, per the
/// Design Notes' call for "a sum type / tagged enum".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchemaDiff {
    AddTable { table: String },
    DropTable { table: String },
    AddColumn { table: String, column: String },
    DropColumn { table: String, column: String },
    ModifyColumn { table: String, column: String },
    ChangePkType { table: String, column: String },
    AddIndex { table: String, index: String },
    DropIndex { table: String, index: String },
    AddFts { table: String },
    DropFts { table: String },
}

impl SchemaDiff {
    pub fn table(&self) -> &str {
        match self {
            SchemaDiff::AddTable { table }
            | SchemaDiff::DropTable { table }
            | SchemaDiff::AddColumn { table, .. }
            | SchemaDiff::DropColumn { table, .. }
            | SchemaDiff::ModifyColumn { table, .. }
            | SchemaDiff::ChangePkType { table, .. }
            | SchemaDiff::AddIndex { table, .. }
            | SchemaDiff::DropIndex { table, .. }
            | SchemaDiff::AddFts { table }
            | SchemaDiff::DropFts { table } => table,
        }
    }

    /// The mirror-image type for a schema diffed in the opposite
    /// direction (spec §8 invariant 4: `add_table <-> drop_table`, etc).
    pub fn mirror_kind(&self) -> &'static str {
        match self {
            SchemaDiff::AddTable { .. } => "drop_table",
            SchemaDiff::DropTable { .. } => "add_table",
            SchemaDiff::AddColumn { .. } => "drop_column",
            SchemaDiff::DropColumn { .. } => "add_column",
            SchemaDiff::ModifyColumn { .. } => "modify_column",
            SchemaDiff::ChangePkType { .. } => "change_pk_type",
            SchemaDiff::AddIndex { .. } => "drop_index",
            SchemaDiff::DropIndex { .. } => "add_index",
            SchemaDiff::AddFts { .. } => "drop_fts",
            SchemaDiff::DropFts { .. } => "add_fts",
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SchemaDiff::AddTable { .. } => "add_table",
            SchemaDiff::DropTable { .. } => "drop_table",
            SchemaDiff::AddColumn { .. } => "add_column",
            SchemaDiff::DropColumn { .. } => "drop_column",
            SchemaDiff::ModifyColumn { .. } => "modify_column",
            SchemaDiff::ChangePkType { .. } => "change_pk_type",
            SchemaDiff::AddIndex { .. } => "add_index",
            SchemaDiff::DropIndex { .. } => "drop_index",
            SchemaDiff::AddFts { .. } => "add_fts",
            SchemaDiff::DropFts { .. } => "drop_fts",
        }
    }
}

/// Diff two schemas. See spec §4.3 for the full trigger table.
pub fn diff(old: &Schema, new: &Schema) -> Vec<SchemaDiff> {
    let mut diffs = Vec::new();

    for table in &new.tables {
        if old.table(&table.name).is_none() {
            diffs.push(SchemaDiff::AddTable {
                table: table.name.clone(),
            });
        }
    }
    for table in &old.tables {
        if new.table(&table.name).is_none() {
            diffs.push(SchemaDiff::DropTable {
                table: table.name.clone(),
            });
        }
    }

    for new_table in &new.tables {
        let Some(old_table) = old.table(&new_table.name) else {
            continue;
        };
        diff_table(old_table, new_table, &mut diffs);
    }

    diffs
}

fn diff_table(
    old_table: &crate::schema::Table,
    new_table: &crate::schema::Table,
    diffs: &mut Vec<SchemaDiff>,
) {
    let table = &new_table.name;

    for (name, _) in new_table.columns.iter() {
        if !old_table.columns.contains_key(name) {
            diffs.push(SchemaDiff::AddColumn {
                table: table.clone(),
                column: name.clone(),
            });
        }
    }
    for (name, _) in old_table.columns.iter() {
        if !new_table.columns.contains_key(name) {
            diffs.push(SchemaDiff::DropColumn {
                table: table.clone(),
                column: name.clone(),
            });
        }
    }
    for (name, new_col) in new_table.columns.iter() {
        let Some(old_col) = old_table.columns.get(name) else {
            continue;
        };
        if !old_col.schema_eq(new_col) {
            diffs.push(SchemaDiff::ModifyColumn {
                table: table.clone(),
                column: name.clone(),
            });
        }
        let is_pk_column = new_table.pk.contains(name) && old_table.pk.contains(name);
        if is_pk_column && old_col.ty != new_col.ty {
            diffs.push(SchemaDiff::ChangePkType {
                table: table.clone(),
                column: name.clone(),
            });
        }
    }

    for index in &new_table.indexes {
        if old_table.index(&index.name).is_none() {
            diffs.push(SchemaDiff::AddIndex {
                table: table.clone(),
                index: index.name.clone(),
            });
        }
    }
    for index in &old_table.indexes {
        if new_table.index(&index.name).is_none() {
            diffs.push(SchemaDiff::DropIndex {
                table: table.clone(),
                index: index.name.clone(),
            });
        }
    }

    let old_fts_enabled = !old_table.fts_columns.is_empty();
    let new_fts_enabled = !new_table.fts_columns.is_empty();
    match (old_fts_enabled, new_fts_enabled) {
        (false, true) => diffs.push(SchemaDiff::AddFts {
            table: table.clone(),
        }),
        (true, false) => diffs.push(SchemaDiff::DropFts {
            table: table.clone(),
        }),
        (true, true) if old_table.fts_columns != new_table.fts_columns => {
            diffs.push(SchemaDiff::DropFts {
                table: table.clone(),
            });
            diffs.push(SchemaDiff::AddFts {
                table: table.clone(),
            });
        }
        _ => {}
    }
}
