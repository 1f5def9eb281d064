//! `BotStore` over SQL: the calls the bot used to make against its JSON files.

use dao_bot_core::{
    Balance, BotStore, InventoryItem, Job, Sect, SectMember, SectRole, SectUpdate, StoreError,
    StoreItem, StoreResult, Tournament, TournamentParticipant, TournamentStatus, TournamentUpdate,
    User, UserJob, UserUpdate, UNLIMITED_STOCK,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};

use crate::SqliteStore;

#[allow(clippy::needless_pass_by_value)]
fn storage(err: rusqlite::Error) -> StoreError {
    StoreError::Storage(err.to_string())
}

fn parse_object(raw: &str, column: &str) -> StoreResult<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(StoreError::Storage(format!("{column} is not a JSON object"))),
        Err(err) => Err(StoreError::Storage(format!("{column} is not valid JSON: {err}"))),
    }
}

fn ensure_user(conn: &Connection, user_id: &str) -> StoreResult<()> {
    conn.execute("INSERT OR IGNORE INTO users(user_id) VALUES (?1)", params![user_id])
        .map_err(storage)?;
    Ok(())
}

fn require(found: bool, what: impl FnOnce() -> String) -> StoreResult<()> {
    if found {
        Ok(())
    } else {
        Err(StoreError::NotFound(what()))
    }
}

fn row_exists(conn: &Connection, sql: &str, id: &str) -> StoreResult<bool> {
    Ok(conn
        .query_row(sql, params![id], |_| Ok(()))
        .optional()
        .map_err(storage)?
        .is_some())
}

fn check_participant(participant: &TournamentParticipant) -> StoreResult<()> {
    if participant.is_bot == participant.user_id.is_some() {
        return Err(StoreError::Invalid(format!(
            "participant {} must be either a bot or a user",
            participant.participant_id
        )));
    }
    Ok(())
}

fn upsert_participant(conn: &Connection, participant: &TournamentParticipant) -> StoreResult<()> {
    if let Some(user_id) = participant.user_id.as_deref() {
        ensure_user(conn, user_id)?;
    }
    conn.execute(
        "INSERT INTO tournament_participants(
            tournament_id, participant_id, user_id, is_bot, bot_name, standing
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(tournament_id, participant_id) DO UPDATE SET
           bot_name = excluded.bot_name, standing = excluded.standing",
        params![
            participant.tournament_id,
            participant.participant_id,
            participant.user_id,
            participant.is_bot,
            participant.bot_name,
            participant.standing,
        ],
    )
    .map_err(storage)?;
    Ok(())
}

fn upsert_member(conn: &Connection, sect_id: &str, user_id: &str, role: SectRole) -> StoreResult<()> {
    ensure_user(conn, user_id)?;
    conn.execute(
        "INSERT INTO sect_members(sect_id, user_id, role) VALUES (?1, ?2, ?3)
         ON CONFLICT(sect_id, user_id) DO UPDATE SET role = excluded.role",
        params![sect_id, user_id, role.as_str()],
    )
    .map_err(storage)?;
    Ok(())
}

struct RawStoreItem {
    item: StoreItem,
    attributes: String,
}

fn store_item_row(row: &Row<'_>) -> rusqlite::Result<RawStoreItem> {
    Ok(RawStoreItem {
        item: StoreItem {
            item_id: row.get(0)?,
            name: row.get(1)?,
            price: row.get(2)?,
            description: row.get(3)?,
            stock: row.get(4)?,
            min_rank: row.get(5)?,
            rarity: row.get(6)?,
            attributes: Map::new(),
        },
        attributes: row.get(7)?,
    })
}

impl RawStoreItem {
    fn finish(mut self) -> StoreResult<StoreItem> {
        self.item.attributes = parse_object(&self.attributes, "store_items.attributes")?;
        Ok(self.item)
    }
}

const STORE_ITEM_COLUMNS: &str =
    "item_id, name, price, description, stock, min_rank, rarity, attributes";

impl SqliteStore {
    fn update_balance(
        &mut self,
        user_id: &str,
        change: impl FnOnce(Balance) -> Balance,
    ) -> StoreResult<Balance> {
        let tx = self.connection_mut().transaction().map_err(storage)?;
        tx.execute("INSERT OR IGNORE INTO users(user_id) VALUES (?1)", params![user_id])
            .map_err(storage)?;
        let current = tx
            .query_row(
                "SELECT cash, bank FROM users WHERE user_id = ?1",
                params![user_id],
                |row| Ok(Balance { cash: row.get(0)?, bank: row.get(1)? }),
            )
            .map_err(storage)?;

        let next = change(current);
        let next = Balance { cash: next.cash.max(0), bank: next.bank.max(0) };
        tx.execute(
            "UPDATE users SET cash = ?2, bank = ?3 WHERE user_id = ?1",
            params![user_id, next.cash, next.bank],
        )
        .map_err(storage)?;
        tx.commit().map_err(storage)?;
        Ok(next)
    }

    fn load_inventory_row(&self, user_id: &str, item_id: &str) -> StoreResult<Option<InventoryItem>> {
        let raw = self
            .connection()
            .query_row(
                "SELECT quantity, rarity, metadata FROM inventory WHERE user_id = ?1 AND item_id = ?2",
                params![user_id, item_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
            )
            .optional()
            .map_err(storage)?;

        raw.map(|(quantity, rarity, metadata)| {
            Ok(InventoryItem {
                user_id: user_id.to_string(),
                item_id: item_id.to_string(),
                quantity,
                rarity,
                metadata: parse_object(&metadata, "inventory.metadata")?,
            })
        })
        .transpose()
    }
}

impl BotStore for SqliteStore {
    fn get_balance(&self, user_id: &str) -> StoreResult<Balance> {
        let balance = self
            .connection()
            .query_row(
                "SELECT cash, bank FROM users WHERE user_id = ?1",
                params![user_id],
                |row| Ok(Balance { cash: row.get(0)?, bank: row.get(1)? }),
            )
            .optional()
            .map_err(storage)?;
        Ok(balance.unwrap_or_default())
    }

    fn add_cash(&mut self, user_id: &str, amount: i64) -> StoreResult<Balance> {
        self.update_balance(user_id, |b| Balance { cash: b.cash.saturating_add(amount), ..b })
    }

    fn set_cash(&mut self, user_id: &str, amount: i64) -> StoreResult<Balance> {
        self.update_balance(user_id, |b| Balance { cash: amount, ..b })
    }

    fn add_bank(&mut self, user_id: &str, amount: i64) -> StoreResult<Balance> {
        self.update_balance(user_id, |b| Balance { bank: b.bank.saturating_add(amount), ..b })
    }

    fn set_bank(&mut self, user_id: &str, amount: i64) -> StoreResult<Balance> {
        self.update_balance(user_id, |b| Balance { bank: amount, ..b })
    }

    fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        self.connection()
            .query_row(
                "SELECT cash, bank, job_id, last_cultivate, last_collect, message_count
                 FROM users WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(User {
                        cash: row.get(0)?,
                        bank: row.get(1)?,
                        job_id: row.get(2)?,
                        last_cultivate: row.get(3)?,
                        last_collect: row.get(4)?,
                        message_count: row.get(5)?,
                        ..User::new(user_id)
                    })
                },
            )
            .optional()
            .map_err(storage)
    }

    fn update_user(&mut self, user_id: &str, update: &UserUpdate) -> StoreResult<User> {
        if let Some(count) = update.message_count.filter(|count| *count < 0) {
            return Err(StoreError::Invalid(format!("message count must not be negative, got {count}")));
        }
        let tx = self.connection_mut().transaction().map_err(storage)?;
        if let Some(Some(job_id)) = &update.job_id {
            require(row_exists(&tx, "SELECT 1 FROM jobs WHERE job_id = ?1", job_id)?, || {
                format!("job {job_id}")
            })?;
        }
        ensure_user(&tx, user_id)?;
        if let Some(job_id) = &update.job_id {
            tx.execute("UPDATE users SET job_id = ?2 WHERE user_id = ?1", params![user_id, job_id])
                .map_err(storage)?;
        }
        tx.execute(
            "UPDATE users SET
               last_cultivate = COALESCE(?2, last_cultivate),
               last_collect = COALESCE(?3, last_collect),
               message_count = COALESCE(?4, message_count)
             WHERE user_id = ?1",
            params![user_id, update.last_cultivate, update.last_collect, update.message_count],
        )
        .map_err(storage)?;
        tx.commit().map_err(storage)?;

        self.get_user(user_id)?.ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))
    }

    fn get_user_meta(&self, user_id: &str, key: &str) -> StoreResult<Option<Value>> {
        let raw: Option<String> = self
            .connection()
            .query_row(
                "SELECT meta_value FROM user_meta WHERE user_id = ?1 AND meta_key = ?2",
                params![user_id, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)?;

        raw.map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|err| StoreError::Storage(format!("user_meta `{key}` is not JSON: {err}")))
        })
        .transpose()
    }

    fn set_user_meta(&mut self, user_id: &str, key: &str, value: &Value) -> StoreResult<()> {
        let conn = self.connection();
        ensure_user(conn, user_id)?;
        conn.execute(
            "INSERT INTO user_meta(user_id, meta_key, meta_value) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, meta_key) DO UPDATE SET meta_value = excluded.meta_value",
            params![user_id, key, value.to_string()],
        )
        .map_err(storage)?;
        Ok(())
    }

    fn get_inventory(&self, user_id: &str) -> StoreResult<Vec<InventoryItem>> {
        let mut stmt = self
            .connection()
            .prepare(
                "SELECT item_id, quantity, rarity, metadata FROM inventory
                 WHERE user_id = ?1 ORDER BY item_id ASC",
            )
            .map_err(storage)?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(storage)?;

        let mut items = Vec::new();
        for row in rows {
            let (item_id, quantity, rarity, metadata) = row.map_err(storage)?;
            items.push(InventoryItem {
                user_id: user_id.to_string(),
                item_id,
                quantity,
                rarity,
                metadata: parse_object(&metadata, "inventory.metadata")?,
            });
        }
        Ok(items)
    }

    fn add_inventory_item(
        &mut self,
        user_id: &str,
        item_id: &str,
        quantity: i64,
    ) -> StoreResult<InventoryItem> {
        if quantity <= 0 {
            return Err(StoreError::Invalid(format!("quantity must be positive, got {quantity}")));
        }
        let conn = self.connection();
        let rarity: Option<String> = conn
            .query_row(
                "SELECT rarity FROM store_items WHERE item_id = ?1",
                params![item_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)?;
        let Some(rarity) = rarity else {
            return Err(StoreError::NotFound(format!("store item {item_id}")));
        };

        ensure_user(conn, user_id)?;
        conn.execute(
            "INSERT INTO inventory(user_id, item_id, quantity, rarity) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, item_id) DO UPDATE SET quantity = quantity + excluded.quantity",
            params![user_id, item_id, quantity, rarity],
        )
        .map_err(storage)?;

        self.load_inventory_row(user_id, item_id)?
            .ok_or_else(|| StoreError::NotFound(format!("inventory {user_id}/{item_id}")))
    }

    fn remove_inventory_item(
        &mut self,
        user_id: &str,
        item_id: &str,
        quantity: i64,
    ) -> StoreResult<bool> {
        if quantity <= 0 {
            return Err(StoreError::Invalid(format!("quantity must be positive, got {quantity}")));
        }
        let tx = self.connection_mut().transaction().map_err(storage)?;
        let current: Option<i64> = tx
            .query_row(
                "SELECT quantity FROM inventory WHERE user_id = ?1 AND item_id = ?2",
                params![user_id, item_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)?;
        let Some(current) = current else {
            return Ok(false);
        };

        if current <= quantity {
            tx.execute(
                "DELETE FROM inventory WHERE user_id = ?1 AND item_id = ?2",
                params![user_id, item_id],
            )
            .map_err(storage)?;
        } else {
            tx.execute(
                "UPDATE inventory SET quantity = ?3 WHERE user_id = ?1 AND item_id = ?2",
                params![user_id, item_id, current - quantity],
            )
            .map_err(storage)?;
        }
        tx.commit().map_err(storage)?;
        Ok(true)
    }

    fn get_jobs(&self) -> StoreResult<Vec<Job>> {
        let mut stmt = self
            .connection()
            .prepare(
                "SELECT job_id, name, min_pay, max_pay, attributes FROM jobs ORDER BY min_pay, job_id",
            )
            .map_err(storage)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(storage)?;

        let mut jobs = Vec::new();
        for row in rows {
            let (job_id, name, min_pay, max_pay, attributes) = row.map_err(storage)?;
            jobs.push(Job {
                job_id,
                name,
                min_pay,
                max_pay,
                attributes: parse_object(&attributes, "jobs.attributes")?,
            });
        }
        Ok(jobs)
    }

    fn set_job(&mut self, job: &Job) -> StoreResult<()> {
        if job.min_pay < 0 || job.max_pay < job.min_pay {
            return Err(StoreError::Invalid(format!(
                "job {} has an invalid pay range {}..{}",
                job.job_id, job.min_pay, job.max_pay
            )));
        }
        self.connection()
            .execute(
                "INSERT INTO jobs(job_id, name, min_pay, max_pay, attributes) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(job_id) DO UPDATE SET
                   name = excluded.name,
                   min_pay = excluded.min_pay,
                   max_pay = excluded.max_pay,
                   attributes = excluded.attributes",
                params![
                    job.job_id,
                    job.name,
                    job.min_pay,
                    job.max_pay,
                    Value::Object(job.attributes.clone()).to_string()
                ],
            )
            .map_err(storage)?;
        Ok(())
    }

    fn get_user_job(&self, user_id: &str, job_id: &str) -> StoreResult<UserJob> {
        let progress = self
            .connection()
            .query_row(
                "SELECT xp, rank, last_work FROM user_jobs WHERE user_id = ?1 AND job_id = ?2",
                params![user_id, job_id],
                |row| {
                    Ok(UserJob {
                        user_id: user_id.to_string(),
                        job_id: job_id.to_string(),
                        xp: row.get(0)?,
                        rank: row.get(1)?,
                        last_work: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(storage)?;
        Ok(progress.unwrap_or_else(|| UserJob::fresh(user_id, job_id)))
    }

    fn update_user_job(&mut self, progress: &UserJob) -> StoreResult<()> {
        let conn = self.connection();
        require(row_exists(conn, "SELECT 1 FROM jobs WHERE job_id = ?1", &progress.job_id)?, || {
            format!("job {}", progress.job_id)
        })?;
        ensure_user(conn, &progress.user_id)?;
        conn.execute(
            "INSERT INTO user_jobs(user_id, job_id, xp, rank, last_work) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, job_id) DO UPDATE SET
               xp = excluded.xp, rank = excluded.rank, last_work = excluded.last_work",
            params![progress.user_id, progress.job_id, progress.xp, progress.rank, progress.last_work],
        )
        .map_err(storage)?;
        Ok(())
    }

    fn get_sect(&self, sect_id: &str) -> StoreResult<Option<Sect>> {
        let raw = self
            .connection()
            .query_row(
                "SELECT name, leader_id, description, level, wealth, max_members, attributes
                 FROM sects WHERE sect_id = ?1",
                params![sect_id],
                |row| {
                    Ok((
                        Sect {
                            sect_id: sect_id.to_string(),
                            name: row.get(0)?,
                            leader_id: row.get(1)?,
                            description: row.get(2)?,
                            level: row.get(3)?,
                            wealth: row.get(4)?,
                            max_members: row.get(5)?,
                            attributes: Map::new(),
                            members: Vec::new(),
                        },
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()
            .map_err(storage)?;

        let Some((mut sect, attributes)) = raw else {
            return Ok(None);
        };
        sect.attributes = parse_object(&attributes, "sects.attributes")?;
        sect.members = self.sect_members(sect_id)?;
        Ok(Some(sect))
    }

    fn sect_members(&self, sect_id: &str) -> StoreResult<Vec<SectMember>> {
        let mut stmt = self
            .connection()
            .prepare(
                "SELECT user_id, role FROM sect_members WHERE sect_id = ?1
                 ORDER BY CASE role WHEN 'leader' THEN 0 WHEN 'elder' THEN 1 ELSE 2 END, user_id",
            )
            .map_err(storage)?;
        let rows = stmt
            .query_map(params![sect_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(storage)?;

        let mut members = Vec::new();
        for row in rows {
            let (user_id, role) = row.map_err(storage)?;
            let role = SectRole::parse(&role)
                .ok_or_else(|| StoreError::Storage(format!("unknown sect role `{role}`")))?;
            members.push(SectMember { sect_id: sect_id.to_string(), user_id, role });
        }
        Ok(members)
    }

    fn create_sect(&mut self, sect: &Sect) -> StoreResult<()> {
        let tx = self.connection_mut().transaction().map_err(storage)?;
        if row_exists(&tx, "SELECT 1 FROM sects WHERE sect_id = ?1", &sect.sect_id)? {
            return Err(StoreError::Invalid(format!("sect {} already exists", sect.sect_id)));
        }
        if let Some(leader_id) = sect.leader_id.as_deref() {
            ensure_user(&tx, leader_id)?;
        }
        tx.execute(
            "INSERT INTO sects(sect_id, name, leader_id, description, level, wealth, max_members, attributes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                sect.sect_id,
                sect.name,
                sect.leader_id,
                sect.description,
                sect.level,
                sect.wealth,
                sect.max_members,
                Value::Object(sect.attributes.clone()).to_string()
            ],
        )
        .map_err(storage)?;

        let leader = sect.leader_id.iter().map(|user_id| (user_id.as_str(), SectRole::Leader));
        let others = sect
            .members
            .iter()
            .filter(|member| sect.leader_id.as_deref() != Some(member.user_id.as_str()))
            .map(|member| (member.user_id.as_str(), member.role));
        for (user_id, role) in leader.chain(others) {
            upsert_member(&tx, &sect.sect_id, user_id, role)?;
        }
        tx.commit().map_err(storage)
    }

    fn update_sect(&mut self, sect_id: &str, update: &SectUpdate) -> StoreResult<Sect> {
        let tx = self.connection_mut().transaction().map_err(storage)?;
        require(row_exists(&tx, "SELECT 1 FROM sects WHERE sect_id = ?1", sect_id)?, || {
            format!("sect {sect_id}")
        })?;
        if let Some(leader_id) = update.leader_id.as_deref() {
            upsert_member(&tx, sect_id, leader_id, SectRole::Leader)?;
        }
        tx.execute(
            "UPDATE sects SET
               name = COALESCE(?2, name),
               leader_id = COALESCE(?3, leader_id),
               description = COALESCE(?4, description),
               level = COALESCE(?5, level),
               wealth = COALESCE(?6, wealth),
               max_members = COALESCE(?7, max_members)
             WHERE sect_id = ?1",
            params![
                sect_id,
                update.name,
                update.leader_id,
                update.description,
                update.level,
                update.wealth,
                update.max_members
            ],
        )
        .map_err(storage)?;
        tx.commit().map_err(storage)?;

        self.get_sect(sect_id)?.ok_or_else(|| StoreError::NotFound(format!("sect {sect_id}")))
    }

    fn add_sect_member(&mut self, sect_id: &str, user_id: &str, role: SectRole) -> StoreResult<()> {
        let conn = self.connection();
        require(row_exists(conn, "SELECT 1 FROM sects WHERE sect_id = ?1", sect_id)?, || {
            format!("sect {sect_id}")
        })?;
        upsert_member(conn, sect_id, user_id, role)
    }

    fn remove_sect_member(&mut self, sect_id: &str, user_id: &str) -> StoreResult<bool> {
        let removed = self
            .connection()
            .execute(
                "DELETE FROM sect_members WHERE sect_id = ?1 AND user_id = ?2",
                params![sect_id, user_id],
            )
            .map_err(storage)?;
        Ok(removed > 0)
    }

    fn store_items(&self) -> StoreResult<Vec<StoreItem>> {
        let mut stmt = self
            .connection()
            .prepare(&format!("SELECT {STORE_ITEM_COLUMNS} FROM store_items ORDER BY price, item_id"))
            .map_err(storage)?;
        let rows = stmt.query_map([], store_item_row).map_err(storage)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row.map_err(storage)?.finish()?);
        }
        Ok(items)
    }

    fn get_store_item(&self, item_id: &str) -> StoreResult<Option<StoreItem>> {
        self.connection()
            .query_row(
                &format!("SELECT {STORE_ITEM_COLUMNS} FROM store_items WHERE item_id = ?1"),
                params![item_id],
                store_item_row,
            )
            .optional()
            .map_err(storage)?
            .map(RawStoreItem::finish)
            .transpose()
    }

    fn set_store_item(&mut self, item: &StoreItem) -> StoreResult<()> {
        if item.price < 0 || item.stock < UNLIMITED_STOCK {
            return Err(StoreError::Invalid(format!(
                "store item {} has price {} and stock {}",
                item.item_id, item.price, item.stock
            )));
        }
        self.connection()
            .execute(
                &format!(
                    "INSERT INTO store_items({STORE_ITEM_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(item_id) DO UPDATE SET
                       name = excluded.name,
                       price = excluded.price,
                       description = excluded.description,
                       stock = excluded.stock,
                       min_rank = excluded.min_rank,
                       rarity = excluded.rarity,
                       attributes = excluded.attributes"
                ),
                params![
                    item.item_id,
                    item.name,
                    item.price,
                    item.description,
                    item.stock,
                    item.min_rank,
                    item.rarity,
                    Value::Object(item.attributes.clone()).to_string()
                ],
            )
            .map_err(storage)?;
        Ok(())
    }

    fn adjust_store_stock(&mut self, item_id: &str, delta: i64) -> StoreResult<StoreItem> {
        let Some(item) = self.get_store_item(item_id)? else {
            return Err(StoreError::NotFound(format!("store item {item_id}")));
        };
        if item.stock == UNLIMITED_STOCK {
            return Ok(item);
        }

        let stock = item.stock.saturating_add(delta).max(0);
        self.connection()
            .execute(
                "UPDATE store_items SET stock = ?2 WHERE item_id = ?1",
                params![item_id, stock],
            )
            .map_err(storage)?;
        Ok(StoreItem { stock, ..item })
    }

    fn get_tournament(&self, tournament_id: &str) -> StoreResult<Option<Tournament>> {
        let raw = self
            .connection()
            .query_row(
                "SELECT host_id, title, description, status, winner_id, attributes
                 FROM tournaments WHERE tournament_id = ?1",
                params![tournament_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(storage)?;

        let Some((host_id, title, description, status, winner_id, attributes)) = raw else {
            return Ok(None);
        };
        let status = TournamentStatus::parse(&status)
            .ok_or_else(|| StoreError::Storage(format!("unknown tournament status `{status}`")))?;

        Ok(Some(Tournament {
            tournament_id: tournament_id.to_string(),
            host_id,
            title,
            description,
            status,
            winner_id,
            attributes: parse_object(&attributes, "tournaments.attributes")?,
            participants: self.tournament_participants(tournament_id)?,
        }))
    }

    fn create_tournament(&mut self, tournament: &Tournament) -> StoreResult<()> {
        for participant in &tournament.participants {
            check_participant(participant)?;
        }
        let tx = self.connection_mut().transaction().map_err(storage)?;
        let id = tournament.tournament_id.as_str();
        if row_exists(&tx, "SELECT 1 FROM tournaments WHERE tournament_id = ?1", id)? {
            return Err(StoreError::Invalid(format!("tournament {id} already exists")));
        }
        for user_id in [&tournament.host_id, &tournament.winner_id].into_iter().flatten() {
            ensure_user(&tx, user_id)?;
        }
        tx.execute(
            "INSERT INTO tournaments(tournament_id, host_id, title, description, status, winner_id, attributes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                tournament.host_id,
                tournament.title,
                tournament.description,
                tournament.status.as_str(),
                tournament.winner_id,
                Value::Object(tournament.attributes.clone()).to_string()
            ],
        )
        .map_err(storage)?;
        for participant in &tournament.participants {
            upsert_participant(
                &tx,
                &TournamentParticipant { tournament_id: id.to_string(), ..participant.clone() },
            )?;
        }
        tx.commit().map_err(storage)
    }

    fn update_tournament(
        &mut self,
        tournament_id: &str,
        update: &TournamentUpdate,
    ) -> StoreResult<Tournament> {
        let tx = self.connection_mut().transaction().map_err(storage)?;
        let attributes: Option<String> = tx
            .query_row(
                "SELECT attributes FROM tournaments WHERE tournament_id = ?1",
                params![tournament_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)?;
        let Some(attributes) = attributes else {
            return Err(StoreError::NotFound(format!("tournament {tournament_id}")));
        };
        let mut attributes = parse_object(&attributes, "tournaments.attributes")?;
        if let Some(changes) = &update.attributes {
            attributes.extend(changes.clone());
        }
        if let Some(winner_id) = update.winner_id.as_deref() {
            ensure_user(&tx, winner_id)?;
        }
        tx.execute(
            "UPDATE tournaments SET
               title = COALESCE(?2, title),
               description = COALESCE(?3, description),
               status = COALESCE(?4, status),
               winner_id = COALESCE(?5, winner_id),
               attributes = ?6
             WHERE tournament_id = ?1",
            params![
                tournament_id,
                update.title,
                update.description,
                update.status.map(TournamentStatus::as_str),
                update.winner_id,
                Value::Object(attributes).to_string()
            ],
        )
        .map_err(storage)?;
        tx.commit().map_err(storage)?;

        self.get_tournament(tournament_id)?
            .ok_or_else(|| StoreError::NotFound(format!("tournament {tournament_id}")))
    }

    fn tournament_participants(
        &self,
        tournament_id: &str,
    ) -> StoreResult<Vec<TournamentParticipant>> {
        let mut stmt = self
            .connection()
            .prepare(
                "SELECT participant_id, user_id, is_bot, bot_name, standing
                 FROM tournament_participants WHERE tournament_id = ?1
                 ORDER BY standing IS NULL, standing, participant_id",
            )
            .map_err(storage)?;
        let rows = stmt
            .query_map(params![tournament_id], |row| {
                Ok(TournamentParticipant {
                    tournament_id: tournament_id.to_string(),
                    participant_id: row.get(0)?,
                    user_id: row.get(1)?,
                    is_bot: row.get(2)?,
                    bot_name: row.get(3)?,
                    standing: row.get(4)?,
                })
            })
            .map_err(storage)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(storage)
    }

    fn add_tournament_participant(
        &mut self,
        participant: &TournamentParticipant,
    ) -> StoreResult<()> {
        check_participant(participant)?;
        let conn = self.connection();
        require(
            row_exists(
                conn,
                "SELECT 1 FROM tournaments WHERE tournament_id = ?1",
                &participant.tournament_id,
            )?,
            || format!("tournament {}", participant.tournament_id),
        )?;
        upsert_participant(conn, participant)
    }

    fn remove_tournament_participant(
        &mut self,
        tournament_id: &str,
        participant_id: &str,
    ) -> StoreResult<bool> {
        let removed = self
            .connection()
            .execute(
                "DELETE FROM tournament_participants WHERE tournament_id = ?1 AND participant_id = ?2",
                params![tournament_id, participant_id],
            )
            .map_err(storage)?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use anyhow::Result;
    use serde_json::json;

    use super::*;

    fn store() -> Result<SqliteStore> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.ensure_schema()?;
        store.seed_default_jobs()?;
        store.connection().execute_batch(
            "INSERT INTO store_items(item_id, name, price, stock, rarity) VALUES
               ('Herb', 'Herb', 10, -1, 'common'),
               ('Sword', 'Sword', 150, 3, 'rare');",
        )?;
        Ok(store)
    }

    #[test]
    fn balances_are_created_on_touch_and_never_negative() -> Result<()> {
        let mut store = store()?;
        assert_eq!(store.get_balance("1")?, Balance::default());

        assert_eq!(store.add_cash("1", 100)?, Balance { cash: 100, bank: 0 });
        assert_eq!(store.add_cash("1", -250)?, Balance { cash: 0, bank: 0 });
        assert_eq!(store.set_bank("1", -5)?.bank, 0);
        assert_eq!(store.add_bank("1", 40)?, Balance { cash: 0, bank: 40 });
        assert_eq!(store.set_cash("1", 7)?.total(), 47);
        assert_eq!(store.get_balance("1")?, Balance { cash: 7, bank: 40 });
        Ok(())
    }

    #[test]
    fn user_meta_round_trips_structured_values() -> Result<()> {
        let mut store = store()?;
        assert_eq!(store.get_user_meta("1", "last_collects")?, None);
        store.set_user_meta("1", "last_collects", &json!({"role": 1700000000}))?;
        store.set_user_meta("1", "last_collects", &json!({"role": 1700000001}))?;
        assert_eq!(store.get_user_meta("1", "last_collects")?, Some(json!({"role": 1700000001})));
        Ok(())
    }

    #[test]
    fn inventory_stacks_and_drops_at_zero() -> Result<()> {
        let mut store = store()?;
        store.add_inventory_item("1", "Sword", 1)?;
        let stacked = store.add_inventory_item("1", "Sword", 2)?;
        assert_eq!(stacked.quantity, 3);
        assert_eq!(stacked.rarity, "rare");

        assert!(store.remove_inventory_item("1", "Sword", 1)?);
        assert_eq!(store.get_inventory("1")?[0].quantity, 2);
        assert!(store.remove_inventory_item("1", "Sword", 5)?);
        assert!(store.get_inventory("1")?.is_empty());
        assert!(!store.remove_inventory_item("1", "Sword", 1)?);
        Ok(())
    }

    #[test]
    fn inventory_rejects_unknown_items_and_bad_quantities() -> Result<()> {
        let mut store = store()?;
        assert!(matches!(
            store.add_inventory_item("1", "Phoenix Feather", 1),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(store.add_inventory_item("1", "Herb", 0), Err(StoreError::Invalid(_))));
        assert!(matches!(store.remove_inventory_item("1", "Herb", -1), Err(StoreError::Invalid(_))));
        Ok(())
    }

    #[test]
    fn jobs_and_progress() -> Result<()> {
        let mut store = store()?;
        let names: Vec<String> = store.get_jobs()?.into_iter().map(|job| job.job_id).collect();
        assert_eq!(names, vec!["Farmer", "Blacksmith", "Alchemist", "Merchant"]);

        let fresh = store.get_user_job("1", "Farmer")?;
        assert_eq!((fresh.xp, fresh.rank.as_str()), (0, "apprentice"));

        store.update_user_job(&UserJob { xp: 30, rank: "journeyman".to_string(), ..fresh })?;
        assert_eq!(store.get_user_job("1", "Farmer")?.xp, 30);

        let missing = UserJob::fresh("1", "Necromancer");
        assert!(matches!(store.update_user_job(&missing), Err(StoreError::NotFound(_))));

        let bad = Job {
            job_id: "Thief".to_string(),
            name: "Thief".to_string(),
            min_pay: 500,
            max_pay: 100,
            attributes: Map::new(),
        };
        assert!(matches!(store.set_job(&bad), Err(StoreError::Invalid(_))));
        Ok(())
    }

    #[test]
    fn store_stock_floors_at_zero_and_ignores_unlimited() -> Result<()> {
        let mut store = store()?;
        assert_eq!(store.adjust_store_stock("Sword", -2)?.stock, 1);
        assert_eq!(store.adjust_store_stock("Sword", -10)?.stock, 0);
        assert_eq!(store.get_store_item("Sword")?.map(|item| item.stock), Some(0));
        assert!(store.adjust_store_stock("Herb", -10)?.has_unlimited_stock());
        assert!(matches!(store.adjust_store_stock("Ghost", 1), Err(StoreError::NotFound(_))));
        assert_eq!(store.store_items()?.len(), 2);
        Ok(())
    }

    #[test]
    fn sect_membership() -> Result<()> {
        let mut store = store()?;
        assert!(matches!(
            store.add_sect_member("azure", "1", SectRole::Member),
            Err(StoreError::NotFound(_))
        ));
        store
            .connection()
            .execute("INSERT INTO sects(sect_id, name) VALUES ('azure', 'Azure')", [])?;

        store.add_sect_member("azure", "2", SectRole::Member)?;
        store.add_sect_member("azure", "1", SectRole::Leader)?;
        let sect = store.get_sect("azure")?;
        let roles: Vec<(String, SectRole)> = sect
            .map(|sect| sect.members.into_iter().map(|m| (m.user_id, m.role)).collect())
            .unwrap_or_default();
        assert_eq!(
            roles,
            vec![("1".to_string(), SectRole::Leader), ("2".to_string(), SectRole::Member)]
        );

        assert!(store.remove_sect_member("azure", "2")?);
        assert!(!store.remove_sect_member("azure", "2")?);
        assert_eq!(store.get_sect("nowhere")?, None);
        Ok(())
    }

    #[test]
    fn user_profile_updates_only_the_given_fields() -> Result<()> {
        let mut store = store()?;
        assert_eq!(store.get_user("1")?, None);

        let worked = store.update_user(
            "1",
            &UserUpdate {
                job_id: Some(Some("Farmer".to_string())),
                last_cultivate: Some("2024-05-01T10:00:00Z".to_string()),
                message_count: Some(12),
                ..UserUpdate::default()
            },
        )?;
        assert_eq!(worked.job_id.as_deref(), Some("Farmer"));
        assert_eq!(worked.message_count, 12);

        store.add_cash("1", 30)?;
        let collected = store.update_user(
            "1",
            &UserUpdate { last_collect: Some("2024-05-02T08:00:00Z".to_string()), ..UserUpdate::default() },
        )?;
        assert_eq!(collected.last_cultivate.as_deref(), Some("2024-05-01T10:00:00Z"));
        assert_eq!(collected.last_collect.as_deref(), Some("2024-05-02T08:00:00Z"));
        assert_eq!((collected.cash, collected.job_id.as_deref()), (30, Some("Farmer")));

        let quit = store.update_user("1", &UserUpdate { job_id: Some(None), ..UserUpdate::default() })?;
        assert_eq!(quit.job_id, None);

        let unknown_job = UserUpdate { job_id: Some(Some("Necromancer".to_string())), ..UserUpdate::default() };
        assert!(matches!(store.update_user("1", &unknown_job), Err(StoreError::NotFound(_))));
        let negative = UserUpdate { message_count: Some(-1), ..UserUpdate::default() };
        assert!(matches!(store.update_user("1", &negative), Err(StoreError::Invalid(_))));
        Ok(())
    }

    #[test]
    fn sects_are_created_with_their_leader_and_updated_in_place() -> Result<()> {
        let mut store = store()?;
        let sect = Sect {
            sect_id: "azure".to_string(),
            name: "Azure Cloud".to_string(),
            leader_id: Some("1".to_string()),
            description: String::new(),
            level: 1,
            wealth: 0,
            max_members: 10,
            attributes: Map::new(),
            members: vec![SectMember {
                sect_id: "azure".to_string(),
                user_id: "2".to_string(),
                role: SectRole::Elder,
            }],
        };
        store.create_sect(&sect)?;
        assert!(matches!(store.create_sect(&sect), Err(StoreError::Invalid(_))));

        let roles: Vec<(String, SectRole)> =
            store.sect_members("azure")?.into_iter().map(|m| (m.user_id, m.role)).collect();
        assert_eq!(
            roles,
            vec![("1".to_string(), SectRole::Leader), ("2".to_string(), SectRole::Elder)]
        );
        assert_eq!(store.get_balance("2")?, Balance::default());

        let updated = store.update_sect(
            "azure",
            &SectUpdate { wealth: Some(900), leader_id: Some("3".to_string()), ..SectUpdate::default() },
        )?;
        assert_eq!(updated.wealth, 900);
        assert_eq!(updated.name, "Azure Cloud");
        assert_eq!(updated.leader_id.as_deref(), Some("3"));
        assert!(updated.members.iter().any(|m| m.user_id == "3" && m.role == SectRole::Leader));

        assert!(matches!(
            store.update_sect("nowhere", &SectUpdate::default()),
            Err(StoreError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn tournaments_are_created_and_finished() -> Result<()> {
        let mut store = store()?;
        let tournament = Tournament {
            tournament_id: "t9".to_string(),
            host_id: Some("1".to_string()),
            title: "Autumn Cup".to_string(),
            description: String::new(),
            status: TournamentStatus::Recruiting,
            winner_id: None,
            attributes: json!({"add_money": 500}).as_object().cloned().unwrap_or_default(),
            participants: vec![TournamentParticipant::human("t9", "2")],
        };
        store.create_tournament(&tournament)?;
        assert!(matches!(store.create_tournament(&tournament), Err(StoreError::Invalid(_))));

        let finished = store.update_tournament(
            "t9",
            &TournamentUpdate {
                status: Some(TournamentStatus::Completed),
                winner_id: Some("2".to_string()),
                attributes: json!({"add_items": ["Herb"]}).as_object().cloned(),
                ..TournamentUpdate::default()
            },
        )?;
        assert_eq!(finished.status, TournamentStatus::Completed);
        assert_eq!(finished.winner_id.as_deref(), Some("2"));
        assert_eq!(finished.title, "Autumn Cup");
        assert_eq!(finished.attributes.get("add_money"), Some(&json!(500)));
        assert_eq!(finished.attributes.get("add_items"), Some(&json!(["Herb"])));
        assert_eq!(finished.participants.len(), 1);

        let broken = Tournament {
            tournament_id: "t10".to_string(),
            participants: vec![TournamentParticipant { is_bot: true, ..TournamentParticipant::human("t10", "3") }],
            ..tournament
        };
        assert!(matches!(store.create_tournament(&broken), Err(StoreError::Invalid(_))));
        assert_eq!(store.get_tournament("t10")?, None);
        assert!(matches!(
            store.update_tournament("t10", &TournamentUpdate::default()),
            Err(StoreError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn store_items_are_set_and_replaced() -> Result<()> {
        let mut store = store()?;
        let pill = StoreItem {
            item_id: "Pill".to_string(),
            name: "Spirit Pill".to_string(),
            price: 75,
            description: "Restores qi".to_string(),
            stock: 5,
            min_rank: 2,
            rarity: "uncommon".to_string(),
            attributes: Map::new(),
        };
        store.set_store_item(&pill)?;
        store.set_store_item(&StoreItem { price: 90, ..pill.clone() })?;
        assert_eq!(store.get_store_item("Pill")?, Some(StoreItem { price: 90, ..pill.clone() }));

        assert!(matches!(
            store.set_store_item(&StoreItem { stock: -2, ..pill.clone() }),
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(
            store.set_store_item(&StoreItem { price: -1, ..pill }),
            Err(StoreError::Invalid(_))
        ));
        Ok(())
    }

    #[test]
    fn tournament_participants_keep_bots_apart() -> Result<()> {
        let mut store = store()?;
        store.connection().execute(
            "INSERT INTO tournaments(tournament_id, title, status, attributes)
             VALUES ('t1', 'Spring Cup', 'active', '{\"add_money\": 500}')",
            [],
        )?;

        store.add_tournament_participant(&TournamentParticipant::human("t1", "1"))?;
        store.add_tournament_participant(&TournamentParticipant {
            tournament_id: "t1".to_string(),
            participant_id: "-1".to_string(),
            user_id: None,
            is_bot: true,
            bot_name: Some("Dummy".to_string()),
            standing: None,
        })?;

        let invalid = TournamentParticipant { is_bot: true, ..TournamentParticipant::human("t1", "2") };
        assert!(matches!(store.add_tournament_participant(&invalid), Err(StoreError::Invalid(_))));

        let Some(tournament) = store.get_tournament("t1")? else {
            panic!("tournament should exist");
        };
        assert_eq!(tournament.status, TournamentStatus::Active);
        assert_eq!(tournament.attributes.get("add_money"), Some(&json!(500)));
        assert_eq!(tournament.participants.len(), 2);
        assert_eq!(store.get_balance("1")?, Balance::default());

        assert!(store.remove_tournament_participant("t1", "-1")?);
        assert_eq!(store.tournament_participants("t1")?.len(), 1);
        Ok(())
    }
}
