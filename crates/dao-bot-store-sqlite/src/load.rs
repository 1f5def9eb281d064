//! Writes one validated legacy batch inside a single transaction.
//!
//! Every insert is `ON CONFLICT DO NOTHING`, so skip-if-exists holds per row: rows already
//! in the database are never overwritten. Child rows of an existing user, sect, or tournament
//! are still inserted, and a NULL reference on it is filled once the referenced row exists,
//! so a re-run picks up what an earlier run had to drop. A record that adds nothing is
//! reported as skipped.

use dao_bot_core::{
    inventory_key, EntryKind, InventoryItem, Job, LegacyBatch, LoadError, Sect, StoreItem,
    Tournament, User,
};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::{Map, Value};

const ALREADY_PRESENT: &str = "already present";

#[derive(Debug, Default)]
pub(crate) struct LoadOutcome {
    pub migrated: usize,
    pub skipped: usize,
    pub entries: Vec<(String, EntryKind, String)>,
}

impl LoadOutcome {
    fn migrated(&mut self) {
        self.migrated += 1;
    }

    fn skip(&mut self, key: impl Into<String>, reason: impl Into<String>) {
        self.skipped += 1;
        self.entries.push((key.into(), EntryKind::Skipped, reason.into()));
    }

    /// Migrated when the record wrote at least one row, otherwise already present.
    fn settle(&mut self, key: &str, changed: usize) {
        if changed == 0 {
            self.skip(key, ALREADY_PRESENT);
        } else {
            self.migrated();
        }
    }

    fn warn(&mut self, key: impl Into<String>, reason: impl Into<String>) {
        self.entries.push((key.into(), EntryKind::Warning, reason.into()));
    }
}

/// Load every well-formed record of `batch`. Nothing is committed unless all statements succeed.
pub(crate) fn load_batch(
    conn: &mut Connection,
    file_name: &str,
    batch: &LegacyBatch,
) -> Result<LoadOutcome, LoadError> {
    let fail = |err: rusqlite::Error| LoadError {
        file: file_name.to_string(),
        message: err.to_string(),
    };

    let tx = conn.transaction().map_err(fail)?;
    let mut outcome = LoadOutcome::default();

    match batch {
        LegacyBatch::Store(parsed) => {
            for item in &parsed.records {
                load_store_item(&tx, item, &mut outcome).map_err(fail)?;
            }
        }
        LegacyBatch::Jobs(parsed) => {
            for job in &parsed.records {
                load_job(&tx, job, &mut outcome).map_err(fail)?;
            }
        }
        LegacyBatch::Users(parsed) => {
            for user in &parsed.records {
                load_user(&tx, user, &mut outcome).map_err(fail)?;
            }
        }
        LegacyBatch::Inventory(parsed) => {
            for item in &parsed.records {
                load_inventory_item(&tx, item, &mut outcome).map_err(fail)?;
            }
        }
        LegacyBatch::Sects(parsed) => {
            for sect in &parsed.records {
                load_sect(&tx, sect, &mut outcome).map_err(fail)?;
            }
        }
        LegacyBatch::Tournaments(parsed) => {
            for tournament in &parsed.records {
                load_tournament(&tx, tournament, &mut outcome).map_err(fail)?;
            }
        }
    }

    tx.commit().map_err(fail)?;
    Ok(outcome)
}

fn json_text(map: &Map<String, Value>) -> String {
    Value::Object(map.clone()).to_string()
}

fn user_exists(tx: &Transaction<'_>, user_id: &str) -> rusqlite::Result<bool> {
    exists(tx, "SELECT 1 FROM users WHERE user_id = ?1", user_id)
}

fn job_exists(tx: &Transaction<'_>, job_id: &str) -> rusqlite::Result<bool> {
    exists(tx, "SELECT 1 FROM jobs WHERE job_id = ?1", job_id)
}

fn store_item_exists(tx: &Transaction<'_>, item_id: &str) -> rusqlite::Result<bool> {
    exists(tx, "SELECT 1 FROM store_items WHERE item_id = ?1", item_id)
}

fn exists(tx: &Transaction<'_>, sql: &str, id: &str) -> rusqlite::Result<bool> {
    Ok(tx.query_row(sql, params![id], |_| Ok(())).optional()?.is_some())
}

/// Set `column` on an existing row only while it is still NULL.
fn fill_null(
    tx: &Transaction<'_>,
    table: &str,
    key_column: &str,
    column: &str,
    key: &str,
    value: Option<&str>,
) -> rusqlite::Result<usize> {
    let Some(value) = value else { return Ok(0) };
    tx.execute(
        &format!("UPDATE {table} SET {column} = ?2 WHERE {key_column} = ?1 AND {column} IS NULL"),
        params![key, value],
    )
}

/// Resolve an optional user reference, clearing it with a warning when the user is unknown.
fn resolve_user(
    tx: &Transaction<'_>,
    key: &str,
    role: &str,
    user_id: Option<&str>,
    outcome: &mut LoadOutcome,
) -> rusqlite::Result<Option<String>> {
    match user_id {
        Some(user_id) if user_exists(tx, user_id)? => Ok(Some(user_id.to_string())),
        Some(user_id) => {
            outcome.warn(key, format!("{role} `{user_id}` is not a known user; cleared"));
            Ok(None)
        }
        None => Ok(None),
    }
}

fn load_store_item(
    tx: &Transaction<'_>,
    item: &StoreItem,
    outcome: &mut LoadOutcome,
) -> rusqlite::Result<()> {
    let inserted = tx.execute(
        "INSERT INTO store_items(item_id, name, price, description, stock, min_rank, rarity, attributes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(item_id) DO NOTHING",
        params![
            item.item_id,
            item.name,
            item.price,
            item.description,
            item.stock,
            item.min_rank,
            item.rarity,
            json_text(&item.attributes),
        ],
    )?;
    if inserted == 0 {
        outcome.skip(&item.item_id, ALREADY_PRESENT);
    } else {
        outcome.migrated();
    }
    Ok(())
}

fn load_job(tx: &Transaction<'_>, job: &Job, outcome: &mut LoadOutcome) -> rusqlite::Result<()> {
    let inserted = tx.execute(
        "INSERT INTO jobs(job_id, name, min_pay, max_pay, attributes)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(job_id) DO NOTHING",
        params![job.job_id, job.name, job.min_pay, job.max_pay, json_text(&job.attributes)],
    )?;
    if inserted == 0 {
        outcome.skip(&job.job_id, ALREADY_PRESENT);
    } else {
        outcome.migrated();
    }
    Ok(())
}

fn load_user(tx: &Transaction<'_>, user: &User, outcome: &mut LoadOutcome) -> rusqlite::Result<()> {
    let key = user.user_id.as_str();
    let present = user_exists(tx, key)?;

    let job_id = match user.job_id.as_deref() {
        Some(job_id) if job_exists(tx, job_id)? => Some(job_id),
        Some(job_id) => {
            outcome.warn(key, format!("job `{job_id}` is not a known job; cleared"));
            None
        }
        None => None,
    };

    let mut changed = if present {
        fill_null(tx, "users", "user_id", "job_id", key, job_id)?
    } else {
        tx.execute(
            "INSERT INTO users(user_id, cash, bank, job_id, last_cultivate, last_collect, message_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id) DO NOTHING",
            params![
                user.user_id,
                user.cash,
                user.bank,
                job_id,
                user.last_cultivate,
                user.last_collect,
                user.message_count,
            ],
        )?
    };

    for (meta_key, meta_value) in &user.meta {
        changed += tx.execute(
            "INSERT INTO user_meta(user_id, meta_key, meta_value) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, meta_key) DO NOTHING",
            params![user.user_id, meta_key, meta_value.to_string()],
        )?;
    }

    for (item_id, quantity) in &user.inventory {
        if !store_item_exists(tx, item_id)? {
            outcome.warn(key, format!("inventory item `{item_id}` is not in the store; dropped"));
            continue;
        }
        changed += tx.execute(
            "INSERT INTO inventory(user_id, item_id, quantity) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, item_id) DO NOTHING",
            params![user.user_id, item_id, quantity],
        )?;
    }

    for progress in &user.jobs {
        if !job_exists(tx, &progress.job_id)? {
            outcome.warn(
                key,
                format!("progress for job `{}` has no known job; dropped", progress.job_id),
            );
            continue;
        }
        changed += tx.execute(
            "INSERT INTO user_jobs(user_id, job_id, xp, rank, last_work) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, job_id) DO NOTHING",
            params![user.user_id, progress.job_id, progress.xp, progress.rank, progress.last_work],
        )?;
    }

    outcome.settle(key, changed);
    Ok(())
}

fn load_inventory_item(
    tx: &Transaction<'_>,
    item: &InventoryItem,
    outcome: &mut LoadOutcome,
) -> rusqlite::Result<()> {
    let key = inventory_key(&item.user_id, &item.item_id);
    if !user_exists(tx, &item.user_id)? {
        outcome.skip(key, format!("user `{}` not found", item.user_id));
        return Ok(());
    }
    if !store_item_exists(tx, &item.item_id)? {
        outcome.skip(key, format!("item `{}` is not in the store", item.item_id));
        return Ok(());
    }

    let inserted = tx.execute(
        "INSERT INTO inventory(user_id, item_id, quantity, rarity, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(user_id, item_id) DO NOTHING",
        params![item.user_id, item.item_id, item.quantity, item.rarity, json_text(&item.metadata)],
    )?;
    if inserted == 0 {
        outcome.skip(key, ALREADY_PRESENT);
    } else {
        outcome.migrated();
    }
    Ok(())
}

fn load_sect(tx: &Transaction<'_>, sect: &Sect, outcome: &mut LoadOutcome) -> rusqlite::Result<()> {
    let key = sect.sect_id.as_str();
    let present = exists(tx, "SELECT 1 FROM sects WHERE sect_id = ?1", key)?;

    let leader_id = resolve_user(tx, key, "leader", sect.leader_id.as_deref(), outcome)?;
    let mut changed = if present {
        fill_null(tx, "sects", "sect_id", "leader_id", key, leader_id.as_deref())?
    } else {
        tx.execute(
            "INSERT INTO sects(sect_id, name, leader_id, description, level, wealth, max_members, attributes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(sect_id) DO NOTHING",
            params![
                sect.sect_id,
                sect.name,
                leader_id,
                sect.description,
                sect.level,
                sect.wealth,
                sect.max_members,
                json_text(&sect.attributes),
            ],
        )?
    };

    for member in &sect.members {
        if !user_exists(tx, &member.user_id)? {
            outcome.warn(key, format!("member `{}` is not a known user; dropped", member.user_id));
            continue;
        }
        changed += tx.execute(
            "INSERT INTO sect_members(sect_id, user_id, role) VALUES (?1, ?2, ?3)
             ON CONFLICT(sect_id, user_id) DO NOTHING",
            params![member.sect_id, member.user_id, member.role.as_str()],
        )?;
    }

    outcome.settle(key, changed);
    Ok(())
}

fn load_tournament(
    tx: &Transaction<'_>,
    tournament: &Tournament,
    outcome: &mut LoadOutcome,
) -> rusqlite::Result<()> {
    let key = tournament.tournament_id.as_str();
    let present = exists(tx, "SELECT 1 FROM tournaments WHERE tournament_id = ?1", key)?;

    let host_id = resolve_user(tx, key, "host", tournament.host_id.as_deref(), outcome)?;
    let winner_id = resolve_user(tx, key, "winner", tournament.winner_id.as_deref(), outcome)?;
    let mut changed = if present {
        fill_null(tx, "tournaments", "tournament_id", "host_id", key, host_id.as_deref())?
            + fill_null(tx, "tournaments", "tournament_id", "winner_id", key, winner_id.as_deref())?
    } else {
        tx.execute(
            "INSERT INTO tournaments(tournament_id, host_id, title, description, status, winner_id, attributes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(tournament_id) DO NOTHING",
            params![
                tournament.tournament_id,
                host_id,
                tournament.title,
                tournament.description,
                tournament.status.as_str(),
                winner_id,
                json_text(&tournament.attributes),
            ],
        )?
    };

    for participant in &tournament.participants {
        if let Some(user_id) = participant.user_id.as_deref() {
            if !user_exists(tx, user_id)? {
                outcome.warn(key, format!("participant `{user_id}` is not a known user; dropped"));
                continue;
            }
        }
        changed += tx.execute(
            "INSERT INTO tournament_participants(
                tournament_id, participant_id, user_id, is_bot, bot_name, standing
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(tournament_id, participant_id) DO NOTHING",
            params![
                participant.tournament_id,
                participant.participant_id,
                participant.user_id,
                participant.is_bot,
                participant.bot_name,
                participant.standing,
            ],
        )?;
    }

    outcome.settle(key, changed);
    Ok(())
}
