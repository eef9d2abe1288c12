//! Persistent store of renewals and their append-only history.

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, info};
use rusqlite::{Connection, Row, params};

use super::db::Db;
use crate::core::types::{PluginOptions, RenewResult, Renewal};

/// SQLite-backed renewal store.
///
/// History rows are only ever inserted; the store never rewrites a
/// persisted result.
#[derive(Clone)]
pub struct RenewalStore {
    db: Db,
}

impl RenewalStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// All renewals in creation order, each with its history oldest first.
    pub fn list(&self) -> Result<Vec<Renewal>> {
        let conn = self.db.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, friendly_name, last_friendly_name, target_options, validation_options,
                   order_options, csr_options, store_options, installation_options
            FROM renewals
            ORDER BY created_at, id
            "#,
        )?;
        let mut rows = stmt.query([])?;
        let mut renewals = Vec::new();
        while let Some(row) = rows.next()? {
            renewals.push(Self::row_to_renewal(row)?);
        }
        drop(rows);
        drop(stmt);
        for renewal in &mut renewals {
            renewal.history = Self::load_history(&conn, &renewal.id)?;
        }
        Ok(renewals)
    }

    pub fn find(&self, id: &str) -> Result<Option<Renewal>> {
        Ok(self.list()?.into_iter().find(|r| r.id == id))
    }

    /// Persists new and updated renewals and removes deleted ones.
    ///
    /// Flags are cleared and deleted renewals dropped from `renewals` only
    /// after the transaction commits.
    pub fn save(&self, renewals: &mut Vec<Renewal>) -> Result<()> {
        let mut conn = self.db.lock_conn()?;
        let tx = conn
            .transaction()
            .context("failed to start renewal transaction")?;
        for renewal in renewals.iter() {
            if renewal.deleted {
                tx.execute("DELETE FROM renewals WHERE id = ?1", params![renewal.id])?;
                info!("[renewal-store] deleted renewal {}", renewal.display_name());
            } else if renewal.new || renewal.updated {
                Self::upsert(&tx, renewal)?;
                Self::sync_history(&tx, renewal)?;
                debug!("[renewal-store] saved renewal {}", renewal.display_name());
            }
        }
        tx.commit().context("failed to commit renewals")?;

        renewals.retain(|r| !r.deleted);
        for renewal in renewals.iter_mut() {
            renewal.new = false;
            renewal.updated = false;
        }
        Ok(())
    }

    /// Appends one result to a persisted renewal's history.
    ///
    /// Aborted results describe passes where nothing was due and are not
    /// recorded; returns whether a row was written.
    pub fn append_history(&self, renewal_id: &str, result: &RenewResult) -> Result<bool> {
        if result.abort {
            return Ok(false);
        }
        let conn = self.db.lock_conn()?;
        Self::insert_history(&conn, renewal_id, result)?;
        Ok(true)
    }

    fn upsert(conn: &Connection, renewal: &Renewal) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            r#"
            INSERT INTO renewals (
                id, friendly_name, last_friendly_name, target_options, validation_options,
                order_options, csr_options, store_options, installation_options, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            ON CONFLICT(id) DO UPDATE SET
                friendly_name = excluded.friendly_name,
                last_friendly_name = excluded.last_friendly_name,
                target_options = excluded.target_options,
                validation_options = excluded.validation_options,
                order_options = excluded.order_options,
                csr_options = excluded.csr_options,
                store_options = excluded.store_options,
                installation_options = excluded.installation_options,
                updated_at = excluded.updated_at
            "#,
            params![
                renewal.id,
                renewal.friendly_name,
                renewal.last_friendly_name,
                serde_json::to_string(&renewal.target_plugin_options)?,
                serde_json::to_string(&renewal.validation_plugin_options)?,
                renewal
                    .order_plugin_options
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                renewal
                    .csr_plugin_options
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                serde_json::to_string(&renewal.store_plugin_options)?,
                serde_json::to_string(&renewal.installation_plugin_options)?,
                now,
            ],
        )?;
        Ok(())
    }

    /// Inserts history entries the database does not hold yet.
    fn sync_history(conn: &Connection, renewal: &Renewal) -> Result<()> {
        let stored: i64 = conn.query_row(
            "SELECT COUNT(1) FROM renewal_history WHERE renewal_id = ?1",
            params![renewal.id],
            |row| row.get(0),
        )?;
        let stored = usize::try_from(stored).unwrap_or(0);
        for result in renewal.history.iter().skip(stored) {
            Self::insert_history(conn, &renewal.id, result)?;
        }
        Ok(())
    }

    fn insert_history(conn: &Connection, renewal_id: &str, result: &RenewResult) -> Result<()> {
        conn.execute(
            r#"
            INSERT INTO renewal_history (renewal_id, date, success, result_json)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                renewal_id,
                result.date.to_rfc3339(),
                result.success,
                serde_json::to_string(result).context("failed to serialize renew result")?,
            ],
        )
        .with_context(|| format!("failed to append history for renewal {renewal_id}"))?;
        Ok(())
    }

    fn load_history(conn: &Connection, renewal_id: &str) -> Result<Vec<RenewResult>> {
        let mut stmt = conn.prepare(
            "SELECT result_json FROM renewal_history WHERE renewal_id = ?1 ORDER BY seq",
        )?;
        let mut rows = stmt.query(params![renewal_id])?;
        let mut history = Vec::new();
        while let Some(row) = rows.next()? {
            let raw: String = row.get(0)?;
            history.push(
                serde_json::from_str(&raw).context("failed to deserialize renew result")?,
            );
        }
        Ok(history)
    }

    fn row_to_renewal(row: &Row<'_>) -> Result<Renewal> {
        let id: String = row.get(0)?;
        let parse_options = |raw: String, column: &str| -> Result<PluginOptions> {
            serde_json::from_str(&raw).with_context(|| format!("failed to deserialize {column}"))
        };
        let optional = |raw: Option<String>, column: &str| -> Result<Option<PluginOptions>> {
            raw.map(|raw| parse_options(raw, column)).transpose()
        };
        let store_raw: String = row.get(7)?;
        let installation_raw: String = row.get(8)?;
        Ok(Renewal {
            friendly_name: row.get(1)?,
            last_friendly_name: row.get(2)?,
            target_plugin_options: parse_options(row.get(3)?, "target_options")?,
            validation_plugin_options: parse_options(row.get(4)?, "validation_options")?,
            order_plugin_options: optional(row.get(5)?, "order_options")?,
            csr_plugin_options: optional(row.get(6)?, "csr_options")?,
            store_plugin_options: serde_json::from_str(&store_raw)
                .context("failed to deserialize store_options")?,
            installation_plugin_options: serde_json::from_str(&installation_raw)
                .context("failed to deserialize installation_options")?,
            history: Vec::new(),
            new: false,
            updated: false,
            deleted: false,
            id,
        })
    }
}
