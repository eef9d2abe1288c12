use anyhow::{Context, Result};
use rusqlite::Connection;

/// Runs all schema creation and migrations for the renewal database.
pub fn run_all(conn: &Connection) -> Result<()> {
    create_tables(conn)?;
    migrate_tables(conn)?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS renewals (
            id TEXT PRIMARY KEY,
            friendly_name TEXT,
            last_friendly_name TEXT,
            target_options TEXT NOT NULL,
            validation_options TEXT NOT NULL,
            order_options TEXT,
            csr_options TEXT,
            store_options TEXT NOT NULL DEFAULT '[]',
            installation_options TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS renewal_history (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            renewal_id TEXT NOT NULL REFERENCES renewals(id) ON DELETE CASCADE,
            date TEXT NOT NULL,
            success INTEGER,
            result_json TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_renewal_history_renewal
            ON renewal_history (renewal_id, seq);
        "#,
    )?;
    Ok(())
}

fn migrate_tables(conn: &Connection) -> Result<()> {
    ensure_columns(conn, "renewals", &[
        ("csr_options", "ALTER TABLE renewals ADD COLUMN csr_options TEXT"),
        ("last_friendly_name", "ALTER TABLE renewals ADD COLUMN last_friendly_name TEXT"),
    ])?;
    Ok(())
}

fn ensure_columns(conn: &Connection, table: &str, alters: &[(&str, &str)]) -> Result<()> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to introspect table {table}"))?;
    let mut rows = stmt.query([])?;
    let mut existing = Vec::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        existing.push(name);
    }

    for (column, alter_sql) in alters {
        if !existing.iter().any(|c| c == column) {
            conn.execute(alter_sql, [])
                .with_context(|| format!("failed to apply migration for {table}.{column}"))?;
        }
    }

    Ok(())
}
