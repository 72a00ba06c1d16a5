//! The Planner (C4): consumes a diff list plus user-confirmed rename
//! merges and emits an ordered sequence of DDL statements, invoking the
//! mirror-table rewrite where the dialect forbids in-place ALTER.
//!
//! The Planner treats its inputs as already validated (spec §7): it does
//! not emit errors. Passing a merge pair that doesn't reference a
//! matching drop/add pair is a programming error on the caller's part.

use crate::diff::SchemaDiff;
use crate::schema::{Schema, Table};
use crate::serializer::{
    format_default, quote_ident, render_add_column, render_add_fts, render_create_index,
    render_create_table, render_drop_column, render_drop_fts, render_drop_index,
    render_drop_table, render_rename_column, render_rename_table,
};
use std::collections::HashSet;

/// Confirms that the diffs at `old_index` (a drop) and `new_index` (an
/// add) are in fact one rename, not an unrelated drop+add pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenameMerge {
    pub old_index: usize,
    pub new_index: usize,
}

/// Produce the ordered DDL statement sequence for migrating `old` to
/// `new`, given the Differ's output and the caller's rename
/// confirmations. See spec §4.4.1 for the statement-ordering contract.
pub fn plan(
    old: &Schema,
    new: &Schema,
    diffs: &[SchemaDiff],
    merges: &[RenameMerge],
) -> Vec<String> {
    let mut consumed: HashSet<usize> = HashSet::new();
    let mut table_renames: Vec<(String, String)> = Vec::new();
    let mut column_renames: Vec<(String, String, String)> = Vec::new();

    for merge in merges {
        consumed.insert(merge.old_index);
        consumed.insert(merge.new_index);
        match (&diffs[merge.old_index], &diffs[merge.new_index]) {
            (SchemaDiff::DropTable { table: old_name }, SchemaDiff::AddTable { table: new_name }) => {
                table_renames.push((old_name.clone(), new_name.clone()));
            }
            (
                SchemaDiff::DropColumn { table, column: old_col },
                SchemaDiff::AddColumn { column: new_col, .. },
            ) => {
                column_renames.push((table.clone(), old_col.clone(), new_col.clone()));
            }
            _ => panic!("merge pair does not reference a drop+add diff pair"),
        }
    }

    let mut statements = Vec::new();

    // 1. Renames: tables first, then columns.
    for (old_name, new_name) in &table_renames {
        statements.push(render_rename_table(old_name, new_name));
    }
    for (table, old_col, new_col) in &column_renames {
        statements.push(render_rename_column(table, old_col, new_col));
    }

    // Determine which tables require the mirror-table rewrite, in the
    // order they're first encountered, so the rewrite happens exactly
    // once per table (spec §4.4.2).
    let mut mirror_tables: Vec<String> = Vec::new();
    for (i, d) in diffs.iter().enumerate() {
        if consumed.contains(&i) {
            continue;
        }
        match d {
            SchemaDiff::ModifyColumn { table, .. } | SchemaDiff::ChangePkType { table, .. } => {
                mark_mirror_table(&mut mirror_tables, table);
            }
            SchemaDiff::AddColumn { table, column } => {
                if forces_mirror(new, table, column) {
                    mark_mirror_table(&mut mirror_tables, table);
                }
            }
            _ => {}
        }
    }

    // 2. Adds: tables -> columns -> indexes -> FTS.
    for (i, d) in diffs.iter().enumerate() {
        if consumed.contains(&i) {
            continue;
        }
        if let SchemaDiff::AddTable { table } = d {
            statements.push(render_create_table(new.table(table).expect("add_table target exists")));
        }
    }
    for (i, d) in diffs.iter().enumerate() {
        if consumed.contains(&i) {
            continue;
        }
        if let SchemaDiff::AddColumn { table, column } = d {
            if mirror_tables.contains(table) && forces_mirror(new, table, column) {
                // Folded into this table's mirror rewrite below; no
                // standalone ALTER TABLE ADD COLUMN is possible since
                // the dialect rejects NOT NULL columns with no default.
                continue;
            }
            let col = new
                .table(table)
                .and_then(|t| t.columns.get(column))
                .expect("add_column target exists");
            statements.push(render_add_column(table, col));
        }
    }
    for (i, d) in diffs.iter().enumerate() {
        if consumed.contains(&i) {
            continue;
        }
        if let SchemaDiff::AddIndex { table, index } = d {
            let idx = new
                .table(table)
                .and_then(|t| t.index(index))
                .expect("add_index target exists");
            statements.push(render_create_index(table, idx));
        }
    }
    for (i, d) in diffs.iter().enumerate() {
        if consumed.contains(&i) {
            continue;
        }
        if let SchemaDiff::AddFts { table } = d {
            statements.extend(render_add_fts(new.table(table).expect("add_fts target exists")));
        }
    }

    // 3. Modifies: one mirror-table rewrite per table needing it.
    for table_name in &mirror_tables {
        let old_table = old.table(table_name).expect("mirrored table existed pre-migration");
        let new_table = new.table(table_name).expect("mirrored table still exists post-migration");
        statements.extend(render_mirror_rewrite(old_table, new_table));
    }

    // 4. Drops: FTS -> indexes -> columns -> tables.
    for (i, d) in diffs.iter().enumerate() {
        if consumed.contains(&i) {
            continue;
        }
        if let SchemaDiff::DropFts { table } = d {
            statements.extend(render_drop_fts(table));
        }
    }
    for (i, d) in diffs.iter().enumerate() {
        if consumed.contains(&i) {
            continue;
        }
        if let SchemaDiff::DropIndex { index, .. } = d {
            let idx = old
                .table(d.table())
                .and_then(|t| t.index(index))
                .expect("drop_index target existed pre-migration");
            statements.push(render_drop_index(idx));
        }
    }
    for (i, d) in diffs.iter().enumerate() {
        if consumed.contains(&i) {
            continue;
        }
        if let SchemaDiff::DropColumn { table, column } = d {
            // Folded into the mirror rewrite: the column is simply
            // absent from the new table definition and never copied.
            if mirror_tables.contains(table) {
                continue;
            }
            statements.push(render_drop_column(table, column));
        }
    }
    for (i, d) in diffs.iter().enumerate() {
        if consumed.contains(&i) {
            continue;
        }
        if let SchemaDiff::DropTable { table } = d {
            statements.push(render_drop_table(table));
        }
    }

    statements
}

fn mark_mirror_table(mirror_tables: &mut Vec<String>, table: &str) {
    if !mirror_tables.iter().any(|t| t == table) {
        mirror_tables.push(table.to_string());
    }
}

/// An `add_column` diff forces the mirror-table path iff the target
/// column is NOT NULL with no default (spec's boundary behavior: "Adding
/// a NOT NULL column with no default and no auto-fix enabled ->
/// mirror-table path chosen").
fn forces_mirror(new: &Schema, table: &str, column: &str) -> bool {
    new.table(table)
        .and_then(|t| t.columns.get(column))
        .map(|c| c.not_null && c.default.is_none())
        .unwrap_or(false)
}

/// The four-statement mirror-table rewrite (spec §4.4.2):
/// `CREATE TABLE <t>_new`, `INSERT INTO <t>_new ... SELECT ... FROM <t>`,
/// `DROP TABLE <t>`, `ALTER TABLE <t>_new RENAME TO <t>`.
fn render_mirror_rewrite(old_table: &Table, new_table: &Table) -> Vec<String> {
    let new_name = format!("{}_new", new_table.name);
    let mut shadow = new_table.clone();
    shadow.name = new_name.clone();
    let create = render_create_table(&shadow);

    let mut dest_cols = Vec::new();
    let mut select_exprs = Vec::new();
    for (name, new_col) in new_table.columns.iter() {
        dest_cols.push(quote_ident(name));
        match old_table.columns.get(name) {
            Some(old_col) => {
                let pk_type_changed = new_table.pk.contains(name)
                    && old_table.pk.contains(name)
                    && old_col.ty != new_col.ty;
                if pk_type_changed {
                    select_exprs.push(format!("CAST({} AS {})", quote_ident(name), new_col.ty.as_sql()));
                } else {
                    select_exprs.push(quote_ident(name));
                }
            }
            None => {
                if new_col.not_null && new_col.default.is_none() {
                    select_exprs.push(new_col.ty.zero_literal().to_string());
                } else if let Some(default) = &new_col.default {
                    select_exprs.push(format_default(default));
                } else {
                    select_exprs.push("NULL".to_string());
                }
            }
        }
    }

    let insert = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {}",
        quote_ident(&new_name),
        dest_cols.join(", "),
        select_exprs.join(", "),
        quote_ident(&old_table.name)
    );
    let drop = format!("DROP TABLE {}", quote_ident(&old_table.name));
    let rename = render_rename_table(&new_name, &new_table.name);

    vec![create, insert, drop, rename]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use crate::schema::{Column, ColumnType, DefaultValue, Index};

    #[test]
    fn add_nullable_column_emits_single_alter_statement() {
        let old = Schema::new().with_table(
            Table::new("users")
                .with_column(Column::new("id", ColumnType::Integer))
                .with_column(Column::new("name", ColumnType::Text))
                .with_pk(vec!["id".to_string()]),
        );
        let new = Schema::new().with_table(
            Table::new("users")
                .with_column(Column::new("id", ColumnType::Integer))
                .with_column(Column::new("name", ColumnType::Text))
                .with_column(Column::new("email", ColumnType::Text))
                .with_pk(vec!["id".to_string()]),
        );
        let diffs = diff(&old, &new);
        let stmts = plan(&old, &new, &diffs, &[]);
        assert_eq!(stmts, vec!["ALTER TABLE [users] ADD COLUMN [email]".to_string()]);
    }

    #[test]
    fn confirmed_rename_emits_rename_column_and_nothing_else() {
        let old = Schema::new().with_table(
            Table::new("users").with_column(Column::new("name", ColumnType::Text)),
        );
        let new = Schema::new().with_table(
            Table::new("users").with_column(Column::new("full_name", ColumnType::Text)),
        );
        let diffs = diff(&old, &new);
        // diff() emits the AddColumn before the DropColumn for a single-column
        // table (additions are enumerated before removals); the merge always
        // points old_index at the drop and new_index at the add.
        let merges = vec![RenameMerge { old_index: 1, new_index: 0 }];
        let stmts = plan(&old, &new, &diffs, &merges);
        assert_eq!(
            stmts,
            vec!["ALTER TABLE [users] RENAME COLUMN [name] TO [full_name]".to_string()]
        );
    }

    #[test]
    fn not_null_column_without_default_forces_mirror_rewrite() {
        let old = Schema::new().with_table(
            Table::new("users")
                .with_column(Column::new("id", ColumnType::Integer))
                .with_pk(vec!["id".to_string()]),
        );
        let new = Schema::new().with_table(
            Table::new("users")
                .with_column(Column::new("id", ColumnType::Integer))
                .with_column(Column::new("age", ColumnType::Integer).not_null())
                .with_pk(vec!["id".to_string()]),
        );
        let diffs = diff(&old, &new);
        let stmts = plan(&old, &new, &diffs, &[]);
        assert_eq!(stmts.len(), 4);
        assert!(stmts[0].starts_with("CREATE TABLE [users_new]"));
        assert!(stmts[0].contains("[age] NOT NULL"));
        assert!(stmts[1].starts_with("INSERT INTO [users_new]"));
        assert!(stmts[1].contains('0'));
        assert_eq!(stmts[2], "DROP TABLE [users]");
        assert_eq!(stmts[3], "ALTER TABLE [users_new] RENAME TO [users]");
    }

    #[test]
    fn multiple_restricted_modifications_on_one_table_rewrite_once() {
        let old = Schema::new().with_table(
            Table::new("t")
                .with_column(Column::new("a", ColumnType::Text))
                .with_column(Column::new("b", ColumnType::Text)),
        );
        let new = Schema::new().with_table(
            Table::new("t")
                .with_column(Column::new("a", ColumnType::Text).not_null())
                .with_column(Column::new("b", ColumnType::Text).unique()),
        );
        let diffs = diff(&old, &new);
        let stmts = plan(&old, &new, &diffs, &[]);
        let create_count = stmts.iter().filter(|s| s.starts_with("CREATE TABLE [t_new]")).count();
        assert_eq!(create_count, 1);
        assert_eq!(stmts.len(), 4);
    }

    #[test]
    fn pk_type_change_casts_in_select() {
        let old = Schema::new().with_table(
            Table::new("t")
                .with_column(Column::new("id", ColumnType::Integer))
                .with_pk(vec!["id".to_string()]),
        );
        let new = Schema::new().with_table(
            Table::new("t")
                .with_column(Column::new("id", ColumnType::Text))
                .with_pk(vec!["id".to_string()]),
        );
        let diffs = diff(&old, &new);
        let stmts = plan(&old, &new, &diffs, &[]);
        assert!(stmts[1].contains("CAST([id] AS TEXT)"));
    }

    #[test]
    fn added_column_with_default_copies_via_that_default() {
        let old = Schema::new().with_table(Table::new("t").with_column(Column::new("a", ColumnType::Text).not_null()));
        let new = Schema::new().with_table(
            Table::new("t")
                .with_column(Column::new("a", ColumnType::Text).not_null().unique()) // force a rewrite for `a`
                .with_column(
                    Column::new("b", ColumnType::Integer)
                        .not_null()
                        .with_default(DefaultValue::Integer(7)),
                ),
        );
        let diffs = diff(&old, &new);
        let stmts = plan(&old, &new, &diffs, &[]);
        let insert = stmts.iter().find(|s| s.starts_with("INSERT INTO")).unwrap();
        assert!(insert.contains('7'));
    }

    #[test]
    fn drops_ordered_fts_then_index_then_column() {
        let old = Schema::new().with_table(
            Table::new("t")
                .with_column(Column::new("id", ColumnType::Integer))
                .with_column(Column::new("doc", ColumnType::Text))
                .with_pk(vec!["id".to_string()])
                .with_index(Index { name: "idx_doc".to_string(), columns: vec!["doc".to_string()], unique: false })
                .with_fts_columns(vec!["doc".to_string()]),
        );
        let new = Schema::new().with_table(
            Table::new("t")
                .with_column(Column::new("id", ColumnType::Integer))
                .with_pk(vec!["id".to_string()]),
        );
        let diffs = diff(&old, &new);
        let stmts = plan(&old, &new, &diffs, &[]);
        let fts_pos = stmts.iter().position(|s| s.contains("DROP TRIGGER")).unwrap();
        let idx_pos = stmts.iter().position(|s| s.starts_with("DROP INDEX")).unwrap();
        let col_pos = stmts.iter().position(|s| s == "ALTER TABLE [t] DROP COLUMN [doc]").unwrap();
        assert!(fts_pos < idx_pos);
        assert!(idx_pos < col_pos);
    }
}
