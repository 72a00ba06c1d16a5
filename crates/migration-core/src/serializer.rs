//! DDL Serializer (C9): dialect-specific rendering of table, column,
//! index, and FTS virtual-table definitions. See spec §4.4.3.

use crate::schema::{Column, DefaultValue, Index, Schema, Table};

/// Bracket-quote an identifier.
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name)
}

/// Render a default literal the way spec §4.4.3 requires: strings
/// single-quoted with `'` doubled, booleans as `1`/`0`, `null` as `NULL`,
/// recognized SQL expressions passed through verbatim (unquoted).
pub fn format_default(default: &DefaultValue) -> String {
    match default {
        DefaultValue::Null => "NULL".to_string(),
        DefaultValue::String(s) => format!("'{}'", s.replace('\'', "''")),
        DefaultValue::Integer(i) => i.to_string(),
        DefaultValue::Real(f) => format!("{}", f),
        DefaultValue::Bool(b) => if *b { "1".to_string() } else { "0".to_string() },
        DefaultValue::Expr(e) => e.as_sql().to_string(),
    }
}

/// Render one column's per-column clauses (NOT NULL, UNIQUE, DEFAULT,
/// COLLATE, CHECK, GENERATED), in the fixed order spec §4.4.3 mandates.
/// `type_keyword` is `Some(ty)` when the column should carry a declared
/// type (PK members may; ordinary non-PK columns never do, per the
/// dialect's dynamic typing).
fn render_column_clauses(col: &Column, type_keyword: Option<&str>) -> String {
    let mut parts = vec![quote_ident(&col.name)];
    if let Some(ty) = type_keyword {
        parts.push(ty.to_string());
    }
    if col.not_null {
        parts.push("NOT NULL".to_string());
    }
    if col.unique {
        parts.push("UNIQUE".to_string());
    }
    if let Some(default) = &col.default {
        parts.push(format!("DEFAULT {}", format_default(default)));
    }
    if let Some(collate) = &col.collate {
        parts.push(format!("COLLATE {}", collate));
    }
    if let Some(check) = &col.check {
        parts.push(format!("CHECK ({})", check));
    }
    if let Some(generated) = &col.generated {
        let kind = if generated.stored { "STORED" } else { "VIRTUAL" };
        parts.push(format!("GENERATED ALWAYS AS ({}) {}", generated.expr, kind));
    }
    parts.join(" ")
}

fn render_foreign_key(col: &Column) -> Option<String> {
    let reference = col.references.as_ref()?;
    let (ref_table, ref_column) = reference
        .split_once('.')
        .expect("validated references always contain exactly one '.'");
    let mut clause = format!(
        "FOREIGN KEY({}) REFERENCES {}({})",
        quote_ident(&col.name),
        quote_ident(ref_table),
        quote_ident(ref_column)
    );
    if let Some(action) = col.on_delete {
        clause.push_str(&format!(" ON DELETE {}", action.as_sql()));
    }
    if let Some(action) = col.on_update {
        clause.push_str(&format!(" ON UPDATE {}", action.as_sql()));
    }
    Some(clause)
}

/// Render a full `CREATE TABLE` statement for `table`.
pub fn render_create_table(table: &Table) -> String {
    let rowid_alias = table.is_rowid_alias_pk();
    let mut entries: Vec<String> = Vec::new();

    for (name, col) in table.columns.iter() {
        if rowid_alias && name == &table.pk[0] {
            entries.push(format!("{} INTEGER PRIMARY KEY", quote_ident(name)));
            continue;
        }
        let is_pk_member = table.pk.contains(name);
        let type_keyword = if is_pk_member { Some(col.ty.as_sql()) } else { None };
        entries.push(render_column_clauses(col, type_keyword));
    }

    for col in table.columns.values() {
        if let Some(fk) = render_foreign_key(col) {
            entries.push(fk);
        }
    }

    if !rowid_alias && !table.pk.is_empty() {
        let cols = table
            .pk
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        entries.push(format!("PRIMARY KEY ({})", cols));
    }

    format!(
        "CREATE TABLE {} ({})",
        quote_ident(&table.name),
        entries.join(", ")
    )
}

/// Render a `CREATE INDEX` statement.
pub fn render_create_index(table: &str, index: &Index) -> String {
    let cols = index
        .columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        quote_ident(&index.name),
        quote_ident(table),
        cols
    )
}

pub fn render_drop_index(index: &Index) -> String {
    format!("DROP INDEX IF EXISTS {}", quote_ident(&index.name))
}

pub fn render_drop_table(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(table))
}

pub fn render_add_column(table: &str, col: &Column) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {}",
        quote_ident(table),
        render_column_clauses(col, None)
    )
}

pub fn render_drop_column(table: &str, column: &str) -> String {
    format!(
        "ALTER TABLE {} DROP COLUMN {}",
        quote_ident(table),
        quote_ident(column)
    )
}

pub fn render_rename_table(old_name: &str, new_name: &str) -> String {
    format!(
        "ALTER TABLE {} RENAME TO {}",
        quote_ident(old_name),
        quote_ident(new_name)
    )
}

pub fn render_rename_column(table: &str, old_name: &str, new_name: &str) -> String {
    format!(
        "ALTER TABLE {} RENAME COLUMN {} TO {}",
        quote_ident(table),
        quote_ident(old_name),
        quote_ident(new_name)
    )
}

fn fts_table_name(table: &str) -> String {
    format!("{}_fts", table)
}

fn trigger_name(table: &str, suffix: &str) -> String {
    format!("{}_{}", table, suffix)
}

/// Render the virtual-table declaration and the three synchronization
/// triggers that enable FTS on `table` (spec §4.4.3).
pub fn render_add_fts(table: &Table) -> Vec<String> {
    let fts_name = fts_table_name(&table.name);
    let cols = table.fts_columns.join(", ");
    let new_cols = table
        .fts_columns
        .iter()
        .map(|c| format!("new.{}", c))
        .collect::<Vec<_>>()
        .join(", ");
    let old_cols = table
        .fts_columns
        .iter()
        .map(|c| format!("old.{}", c))
        .collect::<Vec<_>>()
        .join(", ");

    let mut stmts = Vec::new();
    stmts.push(format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS {} USING fts5({}, content='{}', content_rowid='rowid')",
        quote_ident(&fts_name),
        cols,
        table.name
    ));
    stmts.push(format!(
        "CREATE TRIGGER IF NOT EXISTS {} AFTER INSERT ON {} BEGIN INSERT INTO {}(rowid, {}) VALUES (new.rowid, {}); END",
        quote_ident(&trigger_name(&table.name, "ai")),
        quote_ident(&table.name),
        quote_ident(&fts_name),
        cols,
        new_cols
    ));
    stmts.push(format!(
        "CREATE TRIGGER IF NOT EXISTS {} AFTER DELETE ON {} BEGIN INSERT INTO {}({}, rowid, {}) VALUES('delete', old.rowid, {}); END",
        quote_ident(&trigger_name(&table.name, "ad")),
        quote_ident(&table.name),
        quote_ident(&fts_name),
        quote_ident(&fts_name),
        cols,
        old_cols
    ));
    stmts.push(format!(
        "CREATE TRIGGER IF NOT EXISTS {} AFTER UPDATE ON {} BEGIN INSERT INTO {}({}, rowid, {}) VALUES('delete', old.rowid, {}); INSERT INTO {}(rowid, {}) VALUES (new.rowid, {}); END",
        quote_ident(&trigger_name(&table.name, "au")),
        quote_ident(&table.name),
        quote_ident(&fts_name),
        quote_ident(&fts_name),
        cols,
        old_cols,
        quote_ident(&fts_name),
        cols,
        new_cols
    ));
    stmts
}

/// Render the statements that disable FTS on `table_name`: triggers drop
/// before the virtual table (spec §4.4.3).
pub fn render_drop_fts(table_name: &str) -> Vec<String> {
    vec![
        format!("DROP TRIGGER IF EXISTS {}", quote_ident(&trigger_name(table_name, "ai"))),
        format!("DROP TRIGGER IF EXISTS {}", quote_ident(&trigger_name(table_name, "ad"))),
        format!("DROP TRIGGER IF EXISTS {}", quote_ident(&trigger_name(table_name, "au"))),
        format!("DROP TABLE IF EXISTS {}", quote_ident(&fts_table_name(table_name))),
    ]
}

/// Render every statement needed to create `schema` from nothing: one
/// `CREATE TABLE` per table, followed by that table's indexes and FTS
/// triggers. Used to provision a brand-new tenant database, which has
/// no prior migration-ledger history to walk the way a template
/// upgrade does.
pub fn render_schema_bootstrap(schema: &Schema) -> Vec<String> {
    let mut stmts = Vec::new();
    for table in &schema.tables {
        stmts.push(render_create_table(table));
        for index in &table.indexes {
            stmts.push(render_create_index(&table.name, index));
        }
        if !table.fts_columns.is_empty() {
            stmts.extend(render_add_fts(table));
        }
    }
    stmts
}
