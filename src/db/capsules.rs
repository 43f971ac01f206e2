use super::*;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::entity::CapsuleEntities;
use crate::types::{
    Capsule, CapsuleMessage, CapsuleType, FollowUp, NewCapsule, PendingFollowUp, STATUS_ACTIVE,
};

const CAPSULE_COLUMNS: &str = "id, title, capsule_type, status, priority, created_at,
     updated_at, entities_json, summary, user_notes";

const FOLLOW_UP_COLUMNS: &str = "f.id, f.title, f.description, f.responsible, f.due_date,
     f.completed, f.created_at, f.completed_at, f.source_message_id";

struct CapsuleRow {
    id: String,
    title: String,
    capsule_type: String,
    status: String,
    priority: i64,
    created_at: String,
    updated_at: String,
    entities_json: String,
    summary: String,
    user_notes: String,
}

impl CapsuleRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            capsule_type: row.get(2)?,
            status: row.get(3)?,
            priority: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            entities_json: row.get(7)?,
            summary: row.get(8)?,
            user_notes: row.get(9)?,
        })
    }
}

struct FollowUpRow {
    id: String,
    title: String,
    description: String,
    responsible: Option<String>,
    due_date: String,
    completed: bool,
    created_at: String,
    completed_at: Option<String>,
    source_message_id: String,
}

impl FollowUpRow {
    /// Reads the `FOLLOW_UP_COLUMNS` starting at `offset`.
    fn read_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(offset)?,
            title: row.get(offset + 1)?,
            description: row.get(offset + 2)?,
            responsible: row.get(offset + 3)?,
            due_date: row.get(offset + 4)?,
            completed: row.get::<_, i64>(offset + 5)? != 0,
            created_at: row.get(offset + 6)?,
            completed_at: row.get(offset + 7)?,
            source_message_id: row.get(offset + 8)?,
        })
    }

    fn decode(self) -> Result<FollowUp, DbError> {
        Ok(FollowUp {
            id: self.id,
            title: self.title,
            description: self.description,
            responsible: self.responsible,
            due_date: parse_ts(&self.due_date)?,
            completed: self.completed,
            created_at: parse_ts(&self.created_at)?,
            completed_at: parse_opt_ts(self.completed_at)?,
            source_message_id: self.source_message_id,
        })
    }
}

impl CapsuleDb {
    // =========================================================================
    // Capsules
    // =========================================================================

    /// Create a capsule with a store-assigned id. The capsule row and its
    /// initial follow-ups are written in one transaction.
    pub fn create_capsule(&self, new: &NewCapsule) -> Result<Capsule, DbError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let entities_json = serde_json::to_string(&new.entities)?;

        self.with_transaction(|db| {
            db.conn.execute(
                "INSERT INTO capsules (
                    id, title, capsule_type, status, priority, created_at, updated_at,
                    entities_json, summary, user_notes
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, ?8, '')",
                params![
                    id,
                    new.title,
                    new.capsule_type.as_str(),
                    STATUS_ACTIVE,
                    i64::from(new.priority),
                    ts(&now),
                    entities_json,
                    new.summary,
                ],
            )?;
            for (position, follow_up) in new.follow_ups.iter().enumerate() {
                db.insert_follow_up(&id, position as i64, follow_up)?;
            }
            Ok(())
        })?;

        Ok(Capsule {
            id,
            title: new.title.clone(),
            capsule_type: new.capsule_type,
            status: STATUS_ACTIVE.to_string(),
            priority: new.priority,
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            entities: new.entities.clone(),
            summary: new.summary.clone(),
            follow_ups: new.follow_ups.clone(),
            user_notes: String::new(),
        })
    }

    pub fn get_capsule(&self, id: &str) -> Result<Option<Capsule>, DbError> {
        let sql = format!("SELECT {CAPSULE_COLUMNS} FROM capsules WHERE id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![id], CapsuleRow::read)
            .optional()?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row)?)),
            None => Ok(None),
        }
    }

    /// Most recently updated first.
    pub fn list_capsules(&self, limit: usize) -> Result<Vec<Capsule>, DbError> {
        let sql = format!(
            "SELECT {CAPSULE_COLUMNS} FROM capsules ORDER BY updated_at DESC, rowid DESC LIMIT ?1"
        );
        let rows = {
            let mut stmt = self.conn.prepare(&sql)?;
            let mapped = stmt.query_map(params![limit as i64], CapsuleRow::read)?;
            let mut items = Vec::new();
            for row in mapped {
                items.push(row?);
            }
            items
        };

        let mut capsules = Vec::with_capacity(rows.len());
        for row in rows {
            capsules.push(self.hydrate(row)?);
        }
        Ok(capsules)
    }

    pub fn update_capsule_summary(&self, id: &str, summary: &str) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE capsules SET summary = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, summary, ts(&Utc::now())],
        )?;
        Ok(changed > 0)
    }

    /// Append follow-ups after the existing ones. No title dedup happens here.
    pub fn append_follow_ups(&self, id: &str, follow_ups: &[FollowUp]) -> Result<(), DbError> {
        if follow_ups.is_empty() {
            return Ok(());
        }
        self.with_transaction(|db| {
            let next: i64 = db.conn.query_row(
                "SELECT COALESCE(MAX(position), -1) + 1 FROM follow_ups WHERE capsule_id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            for (offset, follow_up) in follow_ups.iter().enumerate() {
                db.insert_follow_up(id, next + offset as i64, follow_up)?;
            }
            db.touch_capsule(id)
        })
    }

    /// Append a membership record. Does not check for an existing link.
    pub fn link_message(&self, capsule_id: &str, message_id: &str) -> Result<CapsuleMessage, DbError> {
        let added_at = Utc::now();
        let changed = self.conn.execute(
            "UPDATE capsules SET updated_at = ?2 WHERE id = ?1",
            params![capsule_id, ts(&added_at)],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("capsule {capsule_id}")));
        }
        self.conn.execute(
            "INSERT INTO capsule_messages (capsule_id, message_id, added_at) VALUES (?1, ?2, ?3)",
            params![capsule_id, message_id, ts(&added_at)],
        )?;
        Ok(CapsuleMessage {
            message_id: message_id.to_string(),
            added_at,
        })
    }

    pub fn is_message_linked(&self, message_id: &str) -> Result<bool, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT 1 FROM capsule_messages WHERE message_id = ?1")?;
        Ok(stmt.exists(params![message_id])?)
    }

    /// Capsules the message is a member of, in link order.
    pub fn capsules_for_message(&self, message_id: &str) -> Result<Vec<String>, DbError> {
        self.query_ids(
            "SELECT capsule_id FROM capsule_messages
             WHERE message_id = ?1
             GROUP BY capsule_id ORDER BY MIN(seq)",
            message_id,
        )
    }

    /// Capsules holding any message of the thread, in link order.
    pub fn capsules_for_thread(&self, thread_id: &str) -> Result<Vec<String>, DbError> {
        self.query_ids(
            "SELECT cm.capsule_id FROM capsule_messages cm
             JOIN messages m ON m.id = cm.message_id
             WHERE m.thread_id = ?1
             GROUP BY cm.capsule_id ORDER BY MIN(cm.seq)",
            thread_id,
        )
    }

    /// Capsules whose entities list a property with this name (case-insensitive).
    pub fn capsules_by_property(&self, name: &str) -> Result<Vec<String>, DbError> {
        self.query_ids(
            "SELECT c.id FROM capsules c
             WHERE EXISTS (
                SELECT 1 FROM json_each(c.entities_json, '$.properties') p
                WHERE lower(trim(json_extract(p.value, '$.name'))) = lower(trim(?1))
             )
             ORDER BY c.rowid",
            name,
        )
    }

    // =========================================================================
    // Follow-ups
    // =========================================================================

    /// Mark one follow-up completed, addressed by its stable id.
    /// Returns false when it does not exist or was already completed.
    pub fn complete_follow_up(
        &self,
        capsule_id: &str,
        follow_up_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE follow_ups SET completed = 1, completed_at = ?3
             WHERE capsule_id = ?1 AND id = ?2 AND completed = 0",
            params![capsule_id, follow_up_id, ts(&at)],
        )?;
        if changed > 0 {
            self.touch_capsule(capsule_id)?;
        }
        Ok(changed > 0)
    }

    /// Open follow-ups due on or before `until`, earliest first.
    pub fn pending_follow_ups(&self, until: DateTime<Utc>) -> Result<Vec<PendingFollowUp>, DbError> {
        let sql = format!(
            "SELECT c.id, c.title, {FOLLOW_UP_COLUMNS}
             FROM follow_ups f JOIN capsules c ON c.id = f.capsule_id
             WHERE f.completed = 0 AND f.due_date <= ?1
             ORDER BY f.due_date, c.rowid, f.position"
        );
        let rows = {
            let mut stmt = self.conn.prepare(&sql)?;
            let mapped = stmt.query_map(params![ts(&until)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    FollowUpRow::read_at(row, 2)?,
                ))
            })?;
            let mut items = Vec::new();
            for row in mapped {
                items.push(row?);
            }
            items
        };

        let mut pending = Vec::with_capacity(rows.len());
        for (capsule_id, capsule_title, row) in rows {
            pending.push(PendingFollowUp {
                capsule_id,
                capsule_title,
                follow_up: row.decode()?,
            });
        }
        Ok(pending)
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    fn insert_follow_up(
        &self,
        capsule_id: &str,
        position: i64,
        follow_up: &FollowUp,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO follow_ups (
                id, capsule_id, position, title, description, responsible, due_date,
                completed, created_at, completed_at, source_message_id
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                follow_up.id,
                capsule_id,
                position,
                follow_up.title,
                follow_up.description,
                follow_up.responsible,
                ts(&follow_up.due_date),
                follow_up.completed as i64,
                ts(&follow_up.created_at),
                follow_up.completed_at.as_ref().map(ts),
                follow_up.source_message_id,
            ],
        )?;
        Ok(())
    }

    fn touch_capsule(&self, id: &str) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE capsules SET updated_at = ?2 WHERE id = ?1",
            params![id, ts(&Utc::now())],
        )?;
        Ok(())
    }

    fn hydrate(&self, row: CapsuleRow) -> Result<Capsule, DbError> {
        let messages = {
            let mut stmt = self.conn.prepare(
                "SELECT message_id, added_at FROM capsule_messages
                 WHERE capsule_id = ?1 ORDER BY seq",
            )?;
            let mapped = stmt.query_map(params![row.id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?;
            let mut items = Vec::new();
            for member in mapped {
                let (message_id, added_at) = member?;
                items.push(CapsuleMessage {
                    message_id,
                    added_at: parse_ts(&added_at)?,
                });
            }
            items
        };

        let follow_ups = {
            let sql = format!(
                "SELECT {FOLLOW_UP_COLUMNS} FROM follow_ups f
                 WHERE f.capsule_id = ?1 ORDER BY f.position"
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let mapped = stmt.query_map(params![row.id], |r| FollowUpRow::read_at(r, 0))?;
            let mut items = Vec::new();
            for follow_up in mapped {
                items.push(follow_up?.decode()?);
            }
            items
        };

        let entities: CapsuleEntities = serde_json::from_str(&row.entities_json)?;
        let capsule_type = CapsuleType::parse(&row.capsule_type).unwrap_or(CapsuleType::General);

        Ok(Capsule {
            id: row.id,
            title: row.title,
            capsule_type,
            status: row.status,
            priority: u8::try_from(row.priority).unwrap_or(3),
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
            messages,
            entities,
            summary: row.summary,
            follow_ups,
            user_notes: row.user_notes,
        })
    }

    fn query_ids(&self, sql: &str, arg: &str) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![arg], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for id in rows {
            ids.push(id?);
        }
        Ok(ids)
    }
}
