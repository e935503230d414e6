use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::db::ts;
use crate::error::Result;
use crate::models::CastMember;
use crate::store::Store;

fn cast_from_row(row: &Row<'_>) -> rusqlite::Result<CastMember> {
    Ok(CastMember {
        id: row.get("id")?,
        slug: row.get("slug")?,
        full_name: row.get("full_name")?,
        display_name: row.get("display_name")?,
        show: row.get("show")?,
        is_active: row.get("is_active")?,
    })
}

const CAST_COLUMNS: &str = "id, slug, full_name, display_name, show, is_active";

impl Store {
    pub fn insert_cast_member(
        &self,
        slug: &str,
        full_name: &str,
        display_name: Option<&str>,
        show: &str,
        is_active: bool,
    ) -> Result<i64> {
        let conn = self.lock();
        let now = ts(Utc::now());
        conn.execute(
            "INSERT INTO cast_members
             (slug, full_name, display_name, show, is_active, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?6)",
            params![slug, full_name, display_name, show, is_active as i64, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_cast_alias(&self, cast_member_id: i64, alias: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO cast_member_aliases
             (cast_member_id, alias, created_at)
             VALUES (?1,?2,?3)",
            params![cast_member_id, alias, ts(Utc::now())],
        )?;
        Ok(())
    }

    pub fn cast_member_by_id(&self, id: i64) -> Result<Option<CastMember>> {
        let conn = self.lock();
        let member = conn
            .query_row(
                &format!("SELECT {CAST_COLUMNS} FROM cast_members WHERE id = ?1"),
                [id],
                cast_from_row,
            )
            .optional()?;
        Ok(member)
    }

    pub fn active_cast_members(&self) -> Result<Vec<CastMember>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CAST_COLUMNS} FROM cast_members WHERE is_active = 1 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map([], cast_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn aliases_for_cast_member(&self, cast_member_id: i64) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT alias FROM cast_member_aliases WHERE cast_member_id = ?1 ORDER BY alias",
        )?;
        let rows = stmt
            .query_map([cast_member_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
