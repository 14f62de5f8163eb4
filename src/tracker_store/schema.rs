//! SQLite schema definitions for the tracker database.
//!
//! Application rows carry RFC 3339 timestamps. Append-only sample and backup
//! tables store unix milliseconds with an index on the timestamp so retention
//! pruning is a bounded range delete.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP_MS,
};

// =============================================================================
// Version 1 - Applications, status history, samples and backups
// =============================================================================

const APPLICATIONS_TABLE_V1: Table = Table {
    name: "applications",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("job_url", &SqlType::Text, non_null = true),
        sqlite_column!("company", &SqlType::Text, non_null = true),
        sqlite_column!("position", &SqlType::Text, non_null = true),
        sqlite_column!("application_date", &SqlType::Text, non_null = true), // YYYY-MM-DD
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("notes", &SqlType::Text, non_null = true, default_value = Some("''")),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_applications_date", "application_date DESC"),
        ("idx_applications_status", "status"),
    ],
    unique_constraints: &[],
};

const STATUS_HISTORY_TABLE_V1: Table = Table {
    name: "status_history",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "application_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "applications",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Restrict,
            })
        ),
        sqlite_column!("from_status", &SqlType::Text),
        sqlite_column!("to_status", &SqlType::Text, non_null = true),
        sqlite_column!("note", &SqlType::Text),
        sqlite_column!("changed_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_status_history_application", "application_id")],
    unique_constraints: &[],
};

const HEALTH_SAMPLES_TABLE_V1: Table = Table {
    name: "health_samples",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("component", &SqlType::Text, non_null = true),
        sqlite_column!("timestamp", &SqlType::Integer, non_null = true),
        sqlite_column!("passed", &SqlType::Integer, non_null = true),
        sqlite_column!("latency_us", &SqlType::Integer, non_null = true),
        sqlite_column!("detail", &SqlType::Text),
        sqlite_column!("error", &SqlType::Text),
    ],
    indices: &[
        ("idx_health_samples_timestamp", "timestamp"),
        ("idx_health_samples_component", "component, timestamp"),
    ],
    unique_constraints: &[],
};

const PERFORMANCE_SAMPLES_TABLE_V1: Table = Table {
    name: "performance_samples",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("operation", &SqlType::Text, non_null = true),
        sqlite_column!("timestamp", &SqlType::Integer, non_null = true),
        sqlite_column!("duration_us", &SqlType::Integer, non_null = true),
        sqlite_column!("success", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_performance_samples_timestamp", "timestamp"),
        ("idx_performance_samples_operation", "operation, timestamp"),
    ],
    unique_constraints: &[],
};

const BACKUPS_TABLE_V1: Table = Table {
    name: "backups",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("timestamp", &SqlType::Integer, non_null = true),
        sqlite_column!("path", &SqlType::Text, non_null = true),
        sqlite_column!("size_bytes", &SqlType::Integer, non_null = true),
        sqlite_column!("checksum", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_backups_timestamp", "timestamp")],
    unique_constraints: &[&["path"]],
};

// =============================================================================
// Version 2 - Error events
// =============================================================================

const ERROR_EVENTS_TABLE_V2: Table = Table {
    name: "error_events",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("component", &SqlType::Text, non_null = true),
        sqlite_column!("message", &SqlType::Text, non_null = true),
        sqlite_column!("context", &SqlType::Text),
        sqlite_column!(
            "timestamp",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP_MS)
        ),
    ],
    indices: &[("idx_error_events_timestamp", "timestamp")],
    unique_constraints: &[],
};

fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    ERROR_EVENTS_TABLE_V2.create(conn)
}

// =============================================================================
// Version 3 - Host resource samples
// =============================================================================

const SYSTEM_SAMPLES_TABLE_V3: Table = Table {
    name: "system_samples",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("metric", &SqlType::Text, non_null = true),
        sqlite_column!("timestamp", &SqlType::Integer, non_null = true),
        sqlite_column!("value", &SqlType::Real, non_null = true),
    ],
    indices: &[
        ("idx_system_samples_timestamp", "timestamp"),
        ("idx_system_samples_metric", "metric, timestamp"),
    ],
    unique_constraints: &[],
};

fn migrate_v2_to_v3(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    SYSTEM_SAMPLES_TABLE_V3.create(conn)
}

/// Version 1: applications, status history, health/performance samples, backups
/// Version 2: error events
/// Version 3: system samples (cpu, memory, disk)
pub const TRACKER_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[
            APPLICATIONS_TABLE_V1,
            STATUS_HISTORY_TABLE_V1,
            HEALTH_SAMPLES_TABLE_V1,
            PERFORMANCE_SAMPLES_TABLE_V1,
            BACKUPS_TABLE_V1,
        ],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            APPLICATIONS_TABLE_V1,
            STATUS_HISTORY_TABLE_V1,
            HEALTH_SAMPLES_TABLE_V1,
            PERFORMANCE_SAMPLES_TABLE_V1,
            BACKUPS_TABLE_V1,
            ERROR_EVENTS_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
    VersionedSchema {
        version: 3,
        tables: &[
            APPLICATIONS_TABLE_V1,
            STATUS_HISTORY_TABLE_V1,
            HEALTH_SAMPLES_TABLE_V1,
            PERFORMANCE_SAMPLES_TABLE_V1,
            BACKUPS_TABLE_V1,
            ERROR_EVENTS_TABLE_V2,
            SYSTEM_SAMPLES_TABLE_V3,
        ],
        migration: Some(migrate_v2_to_v3),
    },
];
