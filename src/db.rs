// 💾 Persistence - SQLite storage for System Models and Mappings
// Field sets and field mappings are kept as JSON TEXT; every write appends
// an audit event in the same SQLite transaction.

use crate::mapping::{FieldMapping, Mapping};
use crate::schema::{Field, SystemModel};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Audit trail entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub const SYSTEM_MODEL_ENTITY: &str = "system_model";
pub const MAPPING_ENTITY: &str = "mapping";

/// Open (or create) the database file and make sure the tables exist
pub fn open_database(path: &Path, wal: bool) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
    setup_database(&conn, wal)?;
    debug!("Opened database {}", path.display());
    Ok(conn)
}

pub fn setup_database(conn: &Connection, wal: bool) -> Result<()> {
    if wal {
        // Enable WAL mode for crash recovery
        conn.pragma_update(None, "journal_mode", "WAL")?;
    }

    // ==========================================================================
    // System Models
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS system_models (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL,
            version TEXT NOT NULL,
            fields TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Mappings
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS mappings (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL,
            bank_id TEXT NOT NULL,
            system_model_id TEXT NOT NULL,
            system_model_version TEXT NOT NULL,
            system_model_fingerprint TEXT NOT NULL,
            source_fields TEXT NOT NULL,
            mappings TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_mappings_bank ON mappings(bank_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_mappings_model ON mappings(system_model_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// SYSTEM MODELS
// ============================================================================

pub fn upsert_system_model(conn: &Connection, model: &SystemModel, actor: &str) -> Result<()> {
    let fields_json = serde_json::to_string(&model.fields)?;
    let tx = conn.unchecked_transaction()?;

    tx.execute(
        "INSERT INTO system_models (id, name, description, version, fields, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            version = excluded.version,
            fields = excluded.fields,
            updated_at = excluded.updated_at",
        params![
            model.id,
            model.name,
            model.description,
            model.version,
            fields_json,
            model.created_at.to_rfc3339(),
            model.updated_at.to_rfc3339(),
        ],
    )
    .with_context(|| format!("Failed to save system model {}", model.id))?;

    let event = Event::new(
        "system_model_saved",
        SYSTEM_MODEL_ENTITY,
        &model.id,
        serde_json::json!({ "version": model.version, "fingerprint": model.fingerprint() }),
        actor,
    );
    insert_event(&tx, &event)?;
    tx.commit()?;

    debug!(model = %model.id, "Persisted system model");
    Ok(())
}

type ModelRow = (String, String, String, String, String, String, String);

const MODEL_COLUMNS: &str = "id, name, description, version, fields, created_at, updated_at";

fn model_from_row(row: ModelRow) -> Result<SystemModel> {
    let (id, name, description, version, fields_json, created_at, updated_at) = row;
    let fields: Vec<Field> = serde_json::from_str(&fields_json)
        .with_context(|| format!("Corrupt field set for system model {}", id))?;

    Ok(SystemModel {
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        id,
        name,
        description,
        version,
        fields,
    })
}

fn read_model_row(row: &rusqlite::Row) -> rusqlite::Result<ModelRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

pub fn get_system_model(conn: &Connection, id: &str) -> Result<Option<SystemModel>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM system_models WHERE id = ?1", MODEL_COLUMNS),
            params![id],
            read_model_row,
        )
        .optional()?;

    row.map(model_from_row).transpose()
}

pub fn list_system_models(conn: &Connection) -> Result<Vec<SystemModel>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM system_models ORDER BY id",
        MODEL_COLUMNS
    ))?;

    let rows = stmt
        .query_map([], read_model_row)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().map(model_from_row).collect()
}

/// Returns false when no row had that id
pub fn delete_system_model(conn: &Connection, id: &str, actor: &str) -> Result<bool> {
    delete_entity(conn, "system_models", SYSTEM_MODEL_ENTITY, id, actor)
}

// ============================================================================
// MAPPINGS
// ============================================================================

pub fn upsert_mapping(conn: &Connection, mapping: &Mapping, actor: &str) -> Result<()> {
    let source_json = serde_json::to_string(&mapping.source_fields)?;
    let mappings_json = serde_json::to_string(&mapping.mappings)?;
    let tx = conn.unchecked_transaction()?;

    tx.execute(
        "INSERT INTO mappings (
            id, name, description, bank_id, system_model_id,
            system_model_version, system_model_fingerprint,
            source_fields, mappings, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            bank_id = excluded.bank_id,
            system_model_id = excluded.system_model_id,
            system_model_version = excluded.system_model_version,
            system_model_fingerprint = excluded.system_model_fingerprint,
            source_fields = excluded.source_fields,
            mappings = excluded.mappings,
            updated_at = excluded.updated_at",
        params![
            mapping.id,
            mapping.name,
            mapping.description,
            mapping.bank_id,
            mapping.system_model_id,
            mapping.system_model_version,
            mapping.system_model_fingerprint,
            source_json,
            mappings_json,
            mapping.created_at.to_rfc3339(),
            mapping.updated_at.to_rfc3339(),
        ],
    )
    .with_context(|| format!("Failed to save mapping {}", mapping.id))?;

    let event = Event::new(
        "mapping_saved",
        MAPPING_ENTITY,
        &mapping.id,
        serde_json::json!({
            "bank_id": mapping.bank_id,
            "system_model_id": mapping.system_model_id,
            "field_mappings": mapping.mappings.len(),
        }),
        actor,
    );
    insert_event(&tx, &event)?;
    tx.commit()?;

    debug!(mapping = %mapping.id, "Persisted mapping");
    Ok(())
}

const MAPPING_COLUMNS: &str = "id, name, description, bank_id, system_model_id, \
    system_model_version, system_model_fingerprint, source_fields, mappings, \
    created_at, updated_at";

struct MappingRow {
    id: String,
    name: String,
    description: String,
    bank_id: String,
    system_model_id: String,
    system_model_version: String,
    system_model_fingerprint: String,
    source_fields: String,
    mappings: String,
    created_at: String,
    updated_at: String,
}

fn read_mapping_row(row: &rusqlite::Row) -> rusqlite::Result<MappingRow> {
    Ok(MappingRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        bank_id: row.get(3)?,
        system_model_id: row.get(4)?,
        system_model_version: row.get(5)?,
        system_model_fingerprint: row.get(6)?,
        source_fields: row.get(7)?,
        mappings: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn mapping_from_row(row: MappingRow) -> Result<Mapping> {
    let source_fields: Vec<Field> = serde_json::from_str(&row.source_fields)
        .with_context(|| format!("Corrupt source fields for mapping {}", row.id))?;
    let mappings: Vec<FieldMapping> = serde_json::from_str(&row.mappings)
        .with_context(|| format!("Corrupt field mappings for mapping {}", row.id))?;

    Ok(Mapping {
        created_at: parse_timestamp(&row.created_at)?,
        updated_at: parse_timestamp(&row.updated_at)?,
        id: row.id,
        name: row.name,
        description: row.description,
        bank_id: row.bank_id,
        system_model_id: row.system_model_id,
        system_model_version: row.system_model_version,
        system_model_fingerprint: row.system_model_fingerprint,
        source_fields,
        mappings,
    })
}

pub fn get_mapping(conn: &Connection, id: &str) -> Result<Option<Mapping>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM mappings WHERE id = ?1", MAPPING_COLUMNS),
            params![id],
            read_mapping_row,
        )
        .optional()?;

    row.map(mapping_from_row).transpose()
}

pub fn list_mappings(conn: &Connection) -> Result<Vec<Mapping>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM mappings ORDER BY id", MAPPING_COLUMNS))?;

    let rows = stmt
        .query_map([], read_mapping_row)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().map(mapping_from_row).collect()
}

/// Returns false when no row had that id
pub fn delete_mapping(conn: &Connection, id: &str, actor: &str) -> Result<bool> {
    delete_entity(conn, "mappings", MAPPING_ENTITY, id, actor)
}

fn delete_entity(conn: &Connection, table: &str, entity: &str, id: &str, actor: &str) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    let removed = tx
        .execute(&format!("DELETE FROM {} WHERE id = ?1", table), params![id])
        .with_context(|| format!("Failed to delete {} {}", entity, id))?;

    if removed > 0 {
        let event = Event::new(
            &format!("{}_deleted", entity),
            entity,
            id,
            serde_json::Value::Null,
            actor,
        );
        insert_event(&tx, &event)?;
    }
    tx.commit()?;

    Ok(removed > 0)
}

// ============================================================================
// EVENTS
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Events for one entity, oldest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id",
    )?;

    let rows = stmt
        .query_map(params![entity_type, entity_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(event_id, timestamp, event_type, entity_type, entity_id, data, actor)| {
            Ok(Event {
                timestamp: parse_timestamp(&timestamp)?,
                data: serde_json::from_str(&data)
                    .with_context(|| format!("Corrupt event data for {}", event_id))?,
                event_id,
                event_type,
                entity_type,
                entity_id,
                actor,
            })
        })
        .collect()
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid timestamp: {}", raw))?
        .with_timezone(&Utc))
}

// ============================================================================
// TESTS
// ============================================================================
