//! Schema initializer: creates the bot tables when absent and refuses to touch tables
//! whose shape does not match.

use dao_bot_core::SchemaError;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::now_rfc3339;

pub const SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

pub(crate) struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    create_sql: &'static str,
}

/// Tables in creation order; referenced tables come first.
pub(crate) const TABLES: &[TableSpec] = &[
    TableSpec {
        name: "jobs",
        columns: &["job_id", "name", "min_pay", "max_pay", "attributes"],
        create_sql: r"
CREATE TABLE jobs (
  job_id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  min_pay INTEGER NOT NULL CHECK (min_pay >= 0),
  max_pay INTEGER NOT NULL,
  attributes TEXT NOT NULL DEFAULT '{}',
  CHECK (min_pay <= max_pay)
);",
    },
    TableSpec {
        name: "store_items",
        columns: &[
            "item_id",
            "name",
            "price",
            "description",
            "stock",
            "min_rank",
            "rarity",
            "attributes",
        ],
        create_sql: r"
CREATE TABLE store_items (
  item_id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  price INTEGER NOT NULL CHECK (price >= 0),
  description TEXT NOT NULL DEFAULT '',
  stock INTEGER NOT NULL DEFAULT -1 CHECK (stock >= -1),
  min_rank INTEGER NOT NULL DEFAULT 0,
  rarity TEXT NOT NULL DEFAULT 'common',
  attributes TEXT NOT NULL DEFAULT '{}'
);",
    },
    TableSpec {
        name: "users",
        columns: &[
            "user_id",
            "cash",
            "bank",
            "job_id",
            "last_cultivate",
            "last_collect",
            "message_count",
        ],
        create_sql: r"
CREATE TABLE users (
  user_id TEXT PRIMARY KEY,
  cash INTEGER NOT NULL DEFAULT 0 CHECK (cash >= 0),
  bank INTEGER NOT NULL DEFAULT 0 CHECK (bank >= 0),
  job_id TEXT REFERENCES jobs(job_id) ON DELETE SET NULL,
  last_cultivate TEXT,
  last_collect TEXT,
  message_count INTEGER NOT NULL DEFAULT 0
);",
    },
    TableSpec {
        name: "user_meta",
        columns: &["user_id", "meta_key", "meta_value"],
        create_sql: r"
CREATE TABLE user_meta (
  user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
  meta_key TEXT NOT NULL,
  meta_value TEXT NOT NULL,
  PRIMARY KEY (user_id, meta_key)
);",
    },
    TableSpec {
        name: "user_jobs",
        columns: &["user_id", "job_id", "xp", "rank", "last_work"],
        create_sql: r"
CREATE TABLE user_jobs (
  user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
  job_id TEXT NOT NULL REFERENCES jobs(job_id) ON DELETE CASCADE,
  xp INTEGER NOT NULL DEFAULT 0 CHECK (xp >= 0),
  rank TEXT NOT NULL DEFAULT 'apprentice',
  last_work TEXT,
  PRIMARY KEY (user_id, job_id)
);",
    },
    TableSpec {
        name: "inventory",
        columns: &["user_id", "item_id", "quantity", "rarity", "metadata"],
        create_sql: r"
CREATE TABLE inventory (
  user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
  item_id TEXT NOT NULL REFERENCES store_items(item_id),
  quantity INTEGER NOT NULL CHECK (quantity > 0),
  rarity TEXT NOT NULL DEFAULT 'common',
  metadata TEXT NOT NULL DEFAULT '{}',
  PRIMARY KEY (user_id, item_id)
);",
    },
    TableSpec {
        name: "sects",
        columns: &[
            "sect_id",
            "name",
            "leader_id",
            "description",
            "level",
            "wealth",
            "max_members",
            "attributes",
        ],
        create_sql: r"
CREATE TABLE sects (
  sect_id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  leader_id TEXT REFERENCES users(user_id) ON DELETE SET NULL,
  description TEXT NOT NULL DEFAULT '',
  level INTEGER NOT NULL DEFAULT 1,
  wealth INTEGER NOT NULL DEFAULT 0,
  max_members INTEGER NOT NULL DEFAULT 10,
  attributes TEXT NOT NULL DEFAULT '{}'
);",
    },
    TableSpec {
        name: "sect_members",
        columns: &["sect_id", "user_id", "role"],
        create_sql: r"
CREATE TABLE sect_members (
  sect_id TEXT NOT NULL REFERENCES sects(sect_id) ON DELETE CASCADE,
  user_id TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
  role TEXT NOT NULL CHECK (role IN ('leader', 'elder', 'member')),
  PRIMARY KEY (sect_id, user_id)
);",
    },
    TableSpec {
        name: "tournaments",
        columns: &[
            "tournament_id",
            "host_id",
            "title",
            "description",
            "status",
            "winner_id",
            "attributes",
        ],
        create_sql: r"
CREATE TABLE tournaments (
  tournament_id TEXT PRIMARY KEY,
  host_id TEXT REFERENCES users(user_id) ON DELETE SET NULL,
  title TEXT NOT NULL,
  description TEXT NOT NULL DEFAULT '',
  status TEXT NOT NULL DEFAULT 'recruiting' CHECK (status IN ('recruiting', 'active', 'completed')),
  winner_id TEXT REFERENCES users(user_id) ON DELETE SET NULL,
  attributes TEXT NOT NULL DEFAULT '{}'
);",
    },
    TableSpec {
        name: "tournament_participants",
        columns: &["tournament_id", "participant_id", "user_id", "is_bot", "bot_name", "standing"],
        create_sql: r"
CREATE TABLE tournament_participants (
  tournament_id TEXT NOT NULL REFERENCES tournaments(tournament_id) ON DELETE CASCADE,
  participant_id TEXT NOT NULL,
  user_id TEXT REFERENCES users(user_id) ON DELETE CASCADE,
  is_bot INTEGER NOT NULL DEFAULT 0 CHECK (is_bot IN (0, 1)),
  bot_name TEXT,
  standing INTEGER,
  PRIMARY KEY (tournament_id, participant_id),
  CHECK ((is_bot = 1 AND user_id IS NULL) OR (is_bot = 0 AND user_id IS NOT NULL))
);",
    },
    TableSpec {
        name: "migration_runs",
        columns: &["run_id", "started_at", "finished_at", "succeeded", "report_json"],
        create_sql: r"
CREATE TABLE migration_runs (
  run_id TEXT PRIMARY KEY,
  started_at TEXT NOT NULL,
  finished_at TEXT NOT NULL,
  succeeded INTEGER NOT NULL CHECK (succeeded IN (0, 1)),
  report_json TEXT NOT NULL
);",
    },
];

const INDEXES_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_users_job ON users(job_id);
CREATE INDEX IF NOT EXISTS idx_inventory_item ON inventory(item_id);
CREATE INDEX IF NOT EXISTS idx_user_jobs_job ON user_jobs(job_id);
CREATE INDEX IF NOT EXISTS idx_sect_members_user ON sect_members(user_id);
CREATE INDEX IF NOT EXISTS idx_tournament_participants_user ON tournament_participants(user_id);
";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub missing_tables: Vec<String>,
    pub up_to_date: bool,
}

fn storage(context: &'static str) -> impl FnOnce(rusqlite::Error) -> SchemaError {
    move |err| SchemaError::Storage { context, message: err.to_string() }
}

/// Create every absent bot table and index, then record the schema version.
///
/// All existing tables are introspected before anything is created, so a conflicting
/// database is left exactly as it was.
///
/// # Errors
/// Returns [`SchemaError::Conflict`] when an existing table has a different column set,
/// [`SchemaError::UnsupportedVersion`] for a newer database, and [`SchemaError::Storage`]
/// when the connection cannot be read or written.
pub fn ensure_schema(conn: &mut Connection) -> Result<SchemaStatus, SchemaError> {
    let version = current_schema_version(conn)?;
    if version > SCHEMA_VERSION {
        return Err(SchemaError::UnsupportedVersion { found: version, supported: SCHEMA_VERSION });
    }

    let mut absent = Vec::new();
    for table in TABLES {
        let columns = table_columns(conn, table.name)?;
        if columns.is_empty() {
            absent.push(table);
        } else {
            check_columns(table, &columns)?;
        }
    }

    let tx = conn.transaction().map_err(storage("failed to start schema transaction"))?;
    tx.execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
        .map_err(storage("failed to apply schema_migrations table"))?;
    for table in absent {
        tx.execute_batch(table.create_sql).map_err(storage("failed to create table"))?;
    }
    tx.execute_batch(INDEXES_SQL).map_err(storage("failed to create indexes"))?;
    if version < SCHEMA_VERSION {
        let now = now_rfc3339().map_err(|err| SchemaError::Storage {
            context: "failed to format RFC3339 timestamp",
            message: err.to_string(),
        })?;
        tx.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![SCHEMA_VERSION, now],
        )
        .map_err(storage("failed to record schema version"))?;
    }
    tx.commit().map_err(storage("failed to commit schema transaction"))?;

    schema_status(conn)
}

/// Report the recorded schema version and which bot tables are absent.
///
/// # Errors
/// Returns [`SchemaError::Storage`] when schema metadata cannot be read.
pub fn schema_status(conn: &Connection) -> Result<SchemaStatus, SchemaError> {
    let current_version = current_schema_version(conn)?;

    let mut missing_tables = Vec::new();
    for table in TABLES {
        if !table_exists(conn, table.name)? {
            missing_tables.push(table.name.to_string());
        }
    }

    Ok(SchemaStatus {
        current_version,
        target_version: SCHEMA_VERSION,
        up_to_date: current_version == SCHEMA_VERSION && missing_tables.is_empty(),
        missing_tables,
    })
}

fn check_columns(table: &TableSpec, actual: &[String]) -> Result<(), SchemaError> {
    let missing: Vec<String> = table
        .columns
        .iter()
        .filter(|column| !actual.iter().any(|name| name == *column))
        .map(|column| (*column).to_string())
        .collect();
    let unexpected: Vec<String> = actual
        .iter()
        .filter(|name| !table.columns.contains(&name.as_str()))
        .cloned()
        .collect();

    if missing.is_empty() && unexpected.is_empty() {
        Ok(())
    } else {
        Err(SchemaError::Conflict { table: table.name.to_string(), missing, unexpected })
    }
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool, SchemaError> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .map_err(storage("failed to check if table exists"))?;
    Ok(exists == 1)
}

/// Column names of `table`, empty when the table does not exist.
fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, SchemaError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .map_err(storage("failed to inspect table_info"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(storage("failed to inspect table_info"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(storage("failed to read table_info row"))?;
    Ok(names)
}

/// Zero until `schema_migrations` exists.
fn current_schema_version(conn: &Connection) -> Result<i64, SchemaError> {
    if !table_exists(conn, "schema_migrations")? {
        return Ok(0);
    }
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
        row.get::<_, i64>(0)
    })
    .map_err(storage("failed to read current schema version"))
}
