//! Legacy JSON files and the record schemas they are validated against.
//!
//! Every file is either a mapping `id -> record` or an array of records carrying their id.
//! Records are converted into typed rows here; anything that does not fit becomes a
//! [`RejectedRecord`] instead of a silently coerced value.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ParseError, RecordError};
use crate::records::{
    InventoryItem, Job, SectMember, SectRole, Sect, StoreItem, Tournament, TournamentParticipant,
    TournamentStatus, User, UserJob, DEFAULT_JOB_RANK, DEFAULT_RARITY, UNLIMITED_STOCK,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LegacyFile {
    Store,
    Jobs,
    Users,
    Inventory,
    Sects,
    Tournaments,
}

impl LegacyFile {
    /// Referenced tables load before the tables that point at them.
    pub const LOAD_ORDER: [Self; 6] =
        [Self::Store, Self::Jobs, Self::Users, Self::Inventory, Self::Sects, Self::Tournaments];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Jobs => "jobs",
            Self::Users => "users",
            Self::Inventory => "inventory",
            Self::Sects => "sects",
            Self::Tournaments => "tournaments",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "store" => Some(Self::Store),
            "jobs" => Some(Self::Jobs),
            "users" => Some(Self::Users),
            "inventory" => Some(Self::Inventory),
            "sects" => Some(Self::Sects),
            "tournaments" => Some(Self::Tournaments),
            _ => None,
        }
    }

    /// File names accepted for this domain, preferred name first.
    #[must_use]
    pub fn file_names(self) -> &'static [&'static str] {
        match self {
            Self::Store => &["store.json"],
            Self::Jobs => &["jobs.json"],
            Self::Users => &["users.json", "economy.json"],
            Self::Inventory => &["inventory.json"],
            Self::Sects => &["sects.json"],
            Self::Tournaments => &["tournaments.json"],
        }
    }

    #[must_use]
    pub fn primary_file_name(self) -> &'static str {
        match self {
            Self::Store => "store.json",
            Self::Jobs => "jobs.json",
            Self::Users => "users.json",
            Self::Inventory => "inventory.json",
            Self::Sects => "sects.json",
            Self::Tournaments => "tournaments.json",
        }
    }

    /// Tables written when this file is loaded.
    #[must_use]
    pub fn tables(self) -> &'static [&'static str] {
        match self {
            Self::Store => &["store_items"],
            Self::Jobs => &["jobs"],
            Self::Users => &["users", "user_meta", "inventory", "user_jobs"],
            Self::Inventory => &["inventory"],
            Self::Sects => &["sects", "sect_members"],
            Self::Tournaments => &["tournaments", "tournament_participants"],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    pub key: String,
    pub error: RecordError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFile<T> {
    pub records: Vec<T>,
    pub rejected: Vec<RejectedRecord>,
}

impl<T> Default for ParsedFile<T> {
    fn default() -> Self {
        Self { records: Vec::new(), rejected: Vec::new() }
    }
}

impl<T> ParsedFile<T> {
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.records.len() + self.rejected.len()
    }

    fn accept(&mut self, key: String, parsed: Result<T, RecordError>) {
        match parsed {
            Ok(record) => self.records.push(record),
            Err(error) => self.rejected.push(RejectedRecord { key, error }),
        }
    }
}

/// The typed contents of one legacy file.
#[derive(Debug, Clone, PartialEq)]
pub enum LegacyBatch {
    Store(ParsedFile<StoreItem>),
    Jobs(ParsedFile<Job>),
    Users(ParsedFile<User>),
    Inventory(ParsedFile<InventoryItem>),
    Sects(ParsedFile<Sect>),
    Tournaments(ParsedFile<Tournament>),
}

impl LegacyBatch {
    #[must_use]
    pub fn file(&self) -> LegacyFile {
        match self {
            Self::Store(_) => LegacyFile::Store,
            Self::Jobs(_) => LegacyFile::Jobs,
            Self::Users(_) => LegacyFile::Users,
            Self::Inventory(_) => LegacyFile::Inventory,
            Self::Sects(_) => LegacyFile::Sects,
            Self::Tournaments(_) => LegacyFile::Tournaments,
        }
    }

    #[must_use]
    pub fn attempted(&self) -> usize {
        match self {
            Self::Store(parsed) => parsed.attempted(),
            Self::Jobs(parsed) => parsed.attempted(),
            Self::Users(parsed) => parsed.attempted(),
            Self::Inventory(parsed) => parsed.attempted(),
            Self::Sects(parsed) => parsed.attempted(),
            Self::Tournaments(parsed) => parsed.attempted(),
        }
    }

    #[must_use]
    pub fn rejected(&self) -> &[RejectedRecord] {
        match self {
            Self::Store(parsed) => &parsed.rejected,
            Self::Jobs(parsed) => &parsed.rejected,
            Self::Users(parsed) => &parsed.rejected,
            Self::Inventory(parsed) => &parsed.rejected,
            Self::Sects(parsed) => &parsed.rejected,
            Self::Tournaments(parsed) => &parsed.rejected,
        }
    }

    /// Keys of the well-formed records, in file order.
    #[must_use]
    pub fn record_keys(&self) -> Vec<String> {
        match self {
            Self::Store(parsed) => parsed.records.iter().map(|r| r.item_id.clone()).collect(),
            Self::Jobs(parsed) => parsed.records.iter().map(|r| r.job_id.clone()).collect(),
            Self::Users(parsed) => parsed.records.iter().map(|r| r.user_id.clone()).collect(),
            Self::Inventory(parsed) => {
                parsed.records.iter().map(|r| inventory_key(&r.user_id, &r.item_id)).collect()
            }
            Self::Sects(parsed) => parsed.records.iter().map(|r| r.sect_id.clone()).collect(),
            Self::Tournaments(parsed) => {
                parsed.records.iter().map(|r| r.tournament_id.clone()).collect()
            }
        }
    }
}

#[must_use]
pub fn inventory_key(user_id: &str, item_id: &str) -> String {
    format!("{user_id}/{item_id}")
}

/// Parse and validate the raw bytes of one legacy file.
///
/// A whitespace-only file holds no records.
///
/// # Errors
/// Returns [`ParseError`] when the bytes are not JSON or the top level is neither an
/// object nor an array. Problems with individual records are reported in the batch.
pub fn parse_legacy_file(
    file: LegacyFile,
    file_name: &str,
    bytes: &[u8],
) -> Result<LegacyBatch, ParseError> {
    let top = if bytes.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Map::new())
    } else {
        serde_json::from_slice::<Value>(bytes).map_err(|err| ParseError {
            file: file_name.to_string(),
            message: format!("invalid JSON: {err}"),
        })?
    };

    if !matches!(top, Value::Object(_) | Value::Array(_)) {
        return Err(ParseError {
            file: file_name.to_string(),
            message: format!("expected a JSON object or array at the top level, found {}", kind(&top)),
        });
    }

    Ok(match file {
        LegacyFile::Store => {
            LegacyBatch::Store(collect(top, &["item_id", "item_name", "name"], parse_store_item))
        }
        LegacyFile::Jobs => LegacyBatch::Jobs(collect(top, &["job_id", "name"], parse_job)),
        LegacyFile::Users => LegacyBatch::Users(collect(top, &["user_id"], parse_user)),
        LegacyFile::Inventory => LegacyBatch::Inventory(parse_inventory(top)),
        LegacyFile::Sects => LegacyBatch::Sects(collect(top, &["sect_id"], parse_sect)),
        LegacyFile::Tournaments => {
            LegacyBatch::Tournaments(collect(top, &["tournament_id"], parse_tournament))
        }
    })
}

fn collect<T>(
    top: Value,
    id_fields: &'static [&'static str],
    mut parse: impl FnMut(String, Value) -> Result<T, RecordError>,
) -> ParsedFile<T> {
    let primary = id_fields.first().copied().unwrap_or("id");
    let mut parsed = ParsedFile::default();

    let entries: Vec<(Option<String>, Value)> = match top {
        Value::Object(map) => map.into_iter().map(|(key, body)| (Some(key), body)).collect(),
        Value::Array(items) => items
            .into_iter()
            .map(|body| (first_id(&body, id_fields), body))
            .collect(),
        _ => Vec::new(),
    };

    for (index, (key, body)) in entries.into_iter().enumerate() {
        let Some(key) = key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()) else {
            parsed.rejected.push(RejectedRecord {
                key: format!("#{index}"),
                error: RecordError::MissingKey(primary),
            });
            continue;
        };
        let result = parse(key.clone(), body);
        parsed.accept(key, result);
    }

    parsed
}

const USER_FIELDS: &[&str] = &[
    "user_id",
    "cash",
    "bank",
    "job",
    "last_cultivate",
    "last_collect",
    "message_count",
    "inventory",
    "jobs",
    // derived by the bot on read, never authoritative
    "balance",
];

fn parse_user(user_id: String, body: Value) -> Result<User, RecordError> {
    let Value::Object(obj) = body else {
        return Err(RecordError::NotAnObject);
    };

    let mut user = User::new(user_id);
    user.cash = int_field(&obj, "cash", Some(0), 0)?;
    user.bank = int_field(&obj, "bank", Some(0), 0)?;
    user.job_id = id_field(&obj, "job")?;
    user.last_cultivate = text_field(&obj, "last_cultivate")?;
    user.last_collect = text_field(&obj, "last_collect")?;
    user.message_count = int_field(&obj, "message_count", Some(0), 0)?;
    user.inventory = inline_inventory(&obj)?;
    user.jobs = inline_job_progress(&user.user_id, &obj)?;
    user.meta = extras(&obj, USER_FIELDS).into_iter().collect();
    Ok(user)
}

fn inline_inventory(obj: &Map<String, Value>) -> Result<Vec<(String, i64)>, RecordError> {
    let mut counts: BTreeMap<String, i64> = BTreeMap::new();
    match obj.get("inventory") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for (index, item) in items.iter().enumerate() {
                let item_id = id_value(item).ok_or_else(|| {
                    RecordError::invalid("inventory", format!("entry {index} is not an item id"))
                })?;
                *counts.entry(item_id).or_insert(0) += 1;
            }
        }
        Some(other) => {
            return Err(RecordError::invalid(
                "inventory",
                format!("expected an array, found {}", kind(other)),
            ));
        }
    }
    Ok(counts.into_iter().collect())
}

fn inline_job_progress(
    user_id: &str,
    obj: &Map<String, Value>,
) -> Result<Vec<UserJob>, RecordError> {
    let progress = object_field(obj, "jobs")?;
    let mut jobs = Vec::with_capacity(progress.len());
    for (job_id, body) in progress {
        let Value::Object(entry) = body else {
            return Err(RecordError::invalid(
                "jobs",
                format!("progress for `{job_id}` is not an object"),
            ));
        };
        jobs.push(UserJob {
            user_id: user_id.to_string(),
            job_id,
            xp: int_field(&entry, "xp", Some(0), 0)?,
            rank: text_field(&entry, "rank")?.unwrap_or_else(|| DEFAULT_JOB_RANK.to_string()),
            last_work: text_field(&entry, "last_work")?,
        });
    }
    Ok(jobs)
}

const JOB_FIELDS: &[&str] = &["job_id", "name", "min_pay", "max_pay"];

fn parse_job(job_id: String, body: Value) -> Result<Job, RecordError> {
    let (name, min_pay, max_pay, attributes) = match body {
        // {"Farmer": [200, 400]}
        Value::Array(range) => {
            let (Some(min), Some(max)) = (range.first(), range.get(1)) else {
                return Err(RecordError::invalid("pay_range", "expected [min_pay, max_pay]"));
            };
            let min_pay = coerce_int(min).map_err(|reason| RecordError::invalid("min_pay", reason))?;
            let max_pay = coerce_int(max).map_err(|reason| RecordError::invalid("max_pay", reason))?;
            (job_id.clone(), min_pay, max_pay, Map::new())
        }
        Value::Object(obj) => (
            text_field(&obj, "name")?.unwrap_or_else(|| job_id.clone()),
            int_field(&obj, "min_pay", None, 0)?,
            int_field(&obj, "max_pay", None, 0)?,
            extras(&obj, JOB_FIELDS),
        ),
        _ => return Err(RecordError::NotAnObject),
    };

    if min_pay < 0 {
        return Err(RecordError::invalid("min_pay", format!("must be >= 0, found {min_pay}")));
    }
    if max_pay < min_pay {
        return Err(RecordError::invalid(
            "max_pay",
            format!("{max_pay} is below min_pay {min_pay}"),
        ));
    }

    Ok(Job { job_id, name, min_pay, max_pay, attributes })
}

const STORE_FIELDS: &[&str] =
    &["item_id", "item_name", "name", "price", "description", "stock", "min_rank", "rarity"];

fn parse_store_item(item_id: String, body: Value) -> Result<StoreItem, RecordError> {
    match body {
        // {"Spirit Herb": 150}
        Value::Number(_) | Value::String(_) => {
            let price = coerce_int(&body).map_err(|reason| RecordError::invalid("price", reason))?;
            if price < 0 {
                return Err(RecordError::invalid("price", format!("must be >= 0, found {price}")));
            }
            Ok(StoreItem {
                name: item_id.clone(),
                item_id,
                price,
                description: String::new(),
                stock: UNLIMITED_STOCK,
                min_rank: 0,
                rarity: DEFAULT_RARITY.to_string(),
                attributes: Map::new(),
            })
        }
        Value::Object(obj) => Ok(StoreItem {
            name: text_field(&obj, "name")?.unwrap_or_else(|| item_id.clone()),
            price: int_field(&obj, "price", None, 0)?,
            description: text_field(&obj, "description")?.unwrap_or_default(),
            stock: int_field(&obj, "stock", Some(UNLIMITED_STOCK), UNLIMITED_STOCK)?,
            min_rank: int_field(&obj, "min_rank", Some(0), 0)?,
            rarity: text_field(&obj, "rarity")?.unwrap_or_else(|| DEFAULT_RARITY.to_string()),
            attributes: extras(&obj, STORE_FIELDS),
            item_id,
        }),
        _ => Err(RecordError::NotAnObject),
    }
}

const INVENTORY_ITEM_FIELDS: &[&str] = &["item_id", "item", "item_name"];

fn parse_inventory(top: Value) -> ParsedFile<InventoryItem> {
    let mut parsed = ParsedFile::default();

    match top {
        // [{"user_id": "1", "item_id": "Sword", "quantity": 2}]
        Value::Array(entries) => {
            for (index, entry) in entries.into_iter().enumerate() {
                let user_id = first_id(&entry, &["user_id"]);
                let item_id = first_id(&entry, INVENTORY_ITEM_FIELDS);
                let key = match (&user_id, &item_id) {
                    (Some(user), Some(item)) => inventory_key(user, item),
                    (Some(user), None) => format!("{user}#{index}"),
                    _ => format!("#{index}"),
                };
                let result = inventory_entry(user_id, item_id, &entry);
                parsed.accept(key, result);
            }
        }
        Value::Object(by_user) => {
            for (user_id, items) in by_user {
                match items {
                    // {"1": [{"item_id": "Sword", "quantity": 2}]}
                    Value::Array(entries) => {
                        for (index, entry) in entries.into_iter().enumerate() {
                            let item_id = first_id(&entry, INVENTORY_ITEM_FIELDS);
                            let key = item_id.as_deref().map_or_else(
                                || format!("{user_id}#{index}"),
                                |item| inventory_key(&user_id, item),
                            );
                            let result = inventory_entry(Some(user_id.clone()), item_id, &entry);
                            parsed.accept(key, result);
                        }
                    }
                    // {"1": {"Sword": 2, "Herb": {"quantity": 3, "rarity": "rare"}}}
                    Value::Object(by_item) => {
                        for (item_id, entry) in by_item {
                            let key = inventory_key(&user_id, &item_id);
                            let result =
                                inventory_entry(Some(user_id.clone()), Some(item_id), &entry);
                            parsed.accept(key, result);
                        }
                    }
                    _ => parsed.rejected.push(RejectedRecord {
                        key: user_id,
                        error: RecordError::NotAnObject,
                    }),
                }
            }
        }
        _ => {}
    }

    parsed
}

fn inventory_entry(
    user_id: Option<String>,
    item_id: Option<String>,
    entry: &Value,
) -> Result<InventoryItem, RecordError> {
    let user_id = user_id.ok_or(RecordError::MissingKey("user_id"))?;
    let item_id = item_id.ok_or(RecordError::MissingKey("item_id"))?;

    match entry {
        Value::Object(obj) => Ok(InventoryItem {
            quantity: int_field(obj, "quantity", None, 1)?,
            rarity: text_field(obj, "rarity")?.unwrap_or_else(|| DEFAULT_RARITY.to_string()),
            metadata: object_field(obj, "metadata")?,
            user_id,
            item_id,
        }),
        Value::Number(_) | Value::String(_) => {
            let quantity =
                coerce_int(entry).map_err(|reason| RecordError::invalid("quantity", reason))?;
            if quantity < 1 {
                return Err(RecordError::invalid(
                    "quantity",
                    format!("must be >= 1, found {quantity}"),
                ));
            }
            Ok(InventoryItem {
                user_id,
                item_id,
                quantity,
                rarity: DEFAULT_RARITY.to_string(),
                metadata: Map::new(),
            })
        }
        _ => Err(RecordError::NotAnObject),
    }
}

const SECT_FIELDS: &[&str] = &[
    "sect_id",
    "name",
    "leader",
    "leader_id",
    "description",
    "level",
    "wealth",
    "max_members",
    "members",
    "elders",
];

fn parse_sect(sect_id: String, body: Value) -> Result<Sect, RecordError> {
    let Value::Object(obj) = body else {
        return Err(RecordError::NotAnObject);
    };

    let leader_id = match id_field(&obj, "leader")? {
        Some(leader) => Some(leader),
        None => id_field(&obj, "leader_id")?,
    };

    let mut members: Vec<SectMember> = Vec::new();
    let ranked = leader_id
        .iter()
        .cloned()
        .map(|user| (user, SectRole::Leader))
        .chain(id_list(&obj, "elders")?.into_iter().map(|user| (user, SectRole::Elder)))
        .chain(id_list(&obj, "members")?.into_iter().map(|user| (user, SectRole::Member)));
    for (user_id, role) in ranked {
        if members.iter().any(|member| member.user_id == user_id) {
            continue;
        }
        members.push(SectMember { sect_id: sect_id.clone(), user_id, role });
    }

    Ok(Sect {
        name: text_field(&obj, "name")?.unwrap_or_else(|| format!("Sect {sect_id}")),
        description: text_field(&obj, "description")?.unwrap_or_default(),
        level: int_field(&obj, "level", Some(1), 0)?,
        wealth: int_field(&obj, "wealth", Some(0), 0)?,
        max_members: int_field(&obj, "max_members", Some(10), 0)?,
        attributes: extras(&obj, SECT_FIELDS),
        leader_id,
        members,
        sect_id,
    })
}

const TOURNAMENT_FIELDS: &[&str] = &[
    "tournament_id",
    "host",
    "host_id",
    "title",
    "description",
    "status",
    "winner",
    "winner_id",
    "participants",
    "bot_names",
    "standings",
];

fn parse_tournament(tournament_id: String, body: Value) -> Result<Tournament, RecordError> {
    let Value::Object(obj) = body else {
        return Err(RecordError::NotAnObject);
    };

    let status = match text_field(&obj, "status")? {
        None => TournamentStatus::Recruiting,
        Some(raw) => TournamentStatus::parse(raw.trim()).ok_or_else(|| {
            RecordError::invalid("status", format!("unknown tournament status `{raw}`"))
        })?,
    };
    let host_id = match id_field(&obj, "host")? {
        Some(host) => Some(host),
        None => id_field(&obj, "host_id")?,
    };
    let winner_id = match id_field(&obj, "winner")? {
        Some(winner) => Some(winner),
        None => id_field(&obj, "winner_id")?,
    };

    let bot_names = object_field(&obj, "bot_names")?;
    let mut standings: BTreeMap<String, i64> = BTreeMap::new();
    for (participant_id, value) in object_field(&obj, "standings")? {
        let standing =
            coerce_int(&value).map_err(|reason| RecordError::invalid("standings", reason))?;
        standings.insert(participant_id, standing);
    }

    let mut participants: Vec<TournamentParticipant> = Vec::new();
    let raw_participants = match obj.get("participants") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(other) => {
            return Err(RecordError::invalid(
                "participants",
                format!("expected an array, found {}", kind(other)),
            ));
        }
    };
    for (index, raw) in raw_participants.iter().enumerate() {
        let participant_id = id_value(raw).ok_or_else(|| {
            RecordError::invalid("participants", format!("entry {index} is not an id"))
        })?;
        if participants.iter().any(|p| p.participant_id == participant_id) {
            continue;
        }
        let is_bot = participant_id.parse::<i64>().is_ok_and(|id| id < 0);
        let bot_name = if is_bot {
            bot_names.get(&participant_id).and_then(Value::as_str).map(str::to_string)
        } else {
            None
        };
        let standing = standings.get(&participant_id).copied().or_else(|| {
            (standings.is_empty() && winner_id.as_deref() == Some(participant_id.as_str()))
                .then_some(1)
        });
        participants.push(TournamentParticipant {
            tournament_id: tournament_id.clone(),
            user_id: (!is_bot).then(|| participant_id.clone()),
            participant_id,
            is_bot,
            bot_name,
            standing,
        });
    }

    Ok(Tournament {
        title: text_field(&obj, "title")?.unwrap_or_else(|| format!("Tournament {tournament_id}")),
        description: text_field(&obj, "description")?.unwrap_or_default(),
        attributes: extras(&obj, TOURNAMENT_FIELDS),
        host_id,
        status,
        winner_id,
        participants,
        tournament_id,
    })
}

/// Accepts JSON integers, integral floats, and integer strings (`"100"`).
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn coerce_int(value: &Value) -> Result<i64, String> {
    // 2^63; every f64 below it converts to i64 without saturating.
    const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

    match value {
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                return Ok(int);
            }
            match number.as_f64() {
                Some(float) if float.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(&float) => {
                    Ok(float as i64)
                }
                _ => Err(format!("expected an integer, found {number}")),
            }
        }
        Value::String(raw) => raw
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("expected an integer, found string {raw:?}")),
        other => Err(format!("expected an integer, found {}", kind(other))),
    }
}

fn int_field(
    obj: &Map<String, Value>,
    field: &'static str,
    default: Option<i64>,
    min: i64,
) -> Result<i64, RecordError> {
    match obj.get(field) {
        None | Some(Value::Null) => default.ok_or(RecordError::MissingField(field)),
        Some(value) => {
            let int = coerce_int(value).map_err(|reason| RecordError::invalid(field, reason))?;
            if int < min {
                return Err(RecordError::invalid(field, format!("must be >= {min}, found {int}")));
            }
            Ok(int)
        }
    }
}

fn text_field(obj: &Map<String, Value>, field: &'static str) -> Result<Option<String>, RecordError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(value @ (Value::Number(_) | Value::Bool(_))) => Ok(Some(value.to_string())),
        Some(other) => {
            Err(RecordError::invalid(field, format!("expected text, found {}", kind(other))))
        }
    }
}

fn id_value(value: &Value) -> Option<String> {
    match value {
        Value::String(raw) => {
            let trimmed = raw.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(number) => number.as_i64().map(|id| id.to_string()),
        _ => None,
    }
}

fn id_field(obj: &Map<String, Value>, field: &'static str) -> Result<Option<String>, RecordError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) if raw.trim().is_empty() => Ok(None),
        Some(value) => id_value(value)
            .map(Some)
            .ok_or_else(|| RecordError::invalid(field, "expected a string or integer id")),
    }
}

fn id_list(obj: &Map<String, Value>, field: &'static str) -> Result<Vec<String>, RecordError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                id_value(item).ok_or_else(|| {
                    RecordError::invalid(field, format!("entry {index} is not an id"))
                })
            })
            .collect(),
        Some(other) => {
            Err(RecordError::invalid(field, format!("expected an array, found {}", kind(other))))
        }
    }
}

fn object_field(
    obj: &Map<String, Value>,
    field: &'static str,
) -> Result<Map<String, Value>, RecordError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(inner)) => Ok(inner.clone()),
        Some(other) => {
            Err(RecordError::invalid(field, format!("expected an object, found {}", kind(other))))
        }
    }
}

fn first_id(body: &Value, fields: &[&str]) -> Option<String> {
    let Value::Object(obj) = body else {
        return None;
    };
    fields.iter().find_map(|field| obj.get(*field).and_then(id_value))
}

fn extras(obj: &Map<String, Value>, known: &[&str]) -> Map<String, Value> {
    obj.iter()
        .filter(|(key, _)| !known.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn parse(file: LegacyFile, value: &Value) -> LegacyBatch {
        let bytes = serde_json::to_vec(value).unwrap_or_else(|err| panic!("fixture: {err}"));
        parse_legacy_file(file, file.primary_file_name(), &bytes)
            .unwrap_or_else(|err| panic!("fixture should parse: {err}"))
    }

    #[test]
    fn users_map_applies_defaults_and_keeps_extra_fields_as_meta() {
        let batch = parse(
            LegacyFile::Users,
            &json!({
                "1": {"cash": 100, "bank": 50},
                "2": {
                    "cash": "25",
                    "job": "Farmer",
                    "inventory": ["Herb", "Herb", "Sword"],
                    "jobs": {"Farmer": {"xp": 12, "rank": "journeyman"}},
                    "last_collects": {"role": 123},
                    "balance": 999
                }
            }),
        );
        let LegacyBatch::Users(parsed) = batch else { panic!("expected users batch") };
        assert!(parsed.rejected.is_empty());
        assert_eq!(parsed.records.len(), 2);

        let first = &parsed.records[0];
        assert_eq!((first.user_id.as_str(), first.cash, first.bank), ("1", 100, 50));
        assert_eq!(first.job_id, None);
        assert_eq!(first.message_count, 0);

        let second = &parsed.records[1];
        assert_eq!(second.cash, 25);
        assert_eq!(second.job_id.as_deref(), Some("Farmer"));
        assert_eq!(second.inventory, vec![("Herb".to_string(), 2), ("Sword".to_string(), 1)]);
        assert_eq!(second.jobs.len(), 1);
        assert_eq!(second.jobs[0].xp, 12);
        assert_eq!(second.jobs[0].rank, "journeyman");
        assert_eq!(second.meta.get("last_collects"), Some(&json!({"role": 123})));
        assert!(!second.meta.contains_key("balance"));
    }

    #[test]
    fn user_with_negative_or_mistyped_balance_is_rejected_with_reason() {
        let batch = parse(
            LegacyFile::Users,
            &json!({"1": {"cash": -5}, "2": {"bank": [1]}, "3": "not a user", "4": {}}),
        );
        let LegacyBatch::Users(parsed) = batch else { panic!("expected users batch") };
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.rejected.len(), 3);
        assert_eq!(parsed.rejected[0].key, "1");
        assert!(matches!(parsed.rejected[0].error, RecordError::InvalidField { field: "cash", .. }));
        assert!(matches!(parsed.rejected[1].error, RecordError::InvalidField { field: "bank", .. }));
        assert_eq!(parsed.rejected[2].error, RecordError::NotAnObject);
    }

    #[test]
    fn array_form_takes_keys_from_id_fields() {
        let batch = parse(
            LegacyFile::Users,
            &json!([{"user_id": 42, "cash": 1}, {"cash": 2}]),
        );
        let LegacyBatch::Users(parsed) = batch else { panic!("expected users batch") };
        assert_eq!(parsed.records[0].user_id, "42");
        assert_eq!(parsed.rejected[0].key, "#1");
        assert_eq!(parsed.rejected[0].error, RecordError::MissingKey("user_id"));
    }

    #[test]
    fn inventory_record_without_quantity_is_rejected_and_others_survive() {
        let batch = parse(
            LegacyFile::Inventory,
            &json!([
                {"user_id": "1", "item_id": "Sword", "quantity": 1},
                {"user_id": "1", "item": "Herb"},
                {"user_id": "2", "item_name": "Pill", "quantity": 3, "rarity": "rare"}
            ]),
        );
        assert_eq!(batch.attempted(), 3);
        let LegacyBatch::Inventory(parsed) = batch else { panic!("expected inventory batch") };
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.rejected.len(), 1);
        assert_eq!(parsed.rejected[0].key, "1/Herb");
        assert_eq!(parsed.rejected[0].error, RecordError::MissingField("quantity"));
        assert_eq!(parsed.records[1].rarity, "rare");
    }

    #[test]
    fn inventory_mapping_forms_expand_per_item() {
        let batch = parse(
            LegacyFile::Inventory,
            &json!({
                "1": {"Sword": 2, "Herb": {"quantity": 3, "rarity": "rare"}},
                "2": [{"item_id": "Pill", "quantity": 1}],
                "3": 7
            }),
        );
        assert_eq!(
            batch.record_keys(),
            vec!["1/Sword".to_string(), "1/Herb".to_string(), "2/Pill".to_string()]
        );
        assert_eq!(batch.rejected().len(), 1);
        assert_eq!(batch.rejected()[0].key, "3");
    }

    #[test]
    fn jobs_accept_pay_range_arrays_and_objects() {
        let batch = parse(
            LegacyFile::Jobs,
            &json!({
                "Farmer": [200, 400],
                "Alchemist": {"min_pay": 400, "max_pay": 600, "tier": 2},
                "Broken": [500, 100],
                "Short": [1]
            }),
        );
        let LegacyBatch::Jobs(parsed) = batch else { panic!("expected jobs batch") };
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].name, "Farmer");
        assert_eq!((parsed.records[0].min_pay, parsed.records[0].max_pay), (200, 400));
        assert_eq!(parsed.records[1].attributes.get("tier"), Some(&json!(2)));
        assert_eq!(parsed.rejected.len(), 2);
    }

    #[test]
    fn store_items_require_a_price() {
        let batch = parse(
            LegacyFile::Store,
            &json!({
                "Herb": {"price": 10, "stock": 5, "effect": "heal"},
                "Sword": 150,
                "Mystery": {"description": "no price"}
            }),
        );
        let LegacyBatch::Store(parsed) = batch else { panic!("expected store batch") };
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].stock, 5);
        assert_eq!(parsed.records[0].attributes.get("effect"), Some(&json!("heal")));
        assert!(parsed.records[1].has_unlimited_stock());
        assert_eq!(parsed.rejected[0].error, RecordError::MissingField("price"));
    }

    #[test]
    fn sect_members_get_roles_without_duplicates() -> Result<(), RecordError> {
        let sect = parse_sect(
            "s1".to_string(),
            json!({"name": "Azure", "leader": 1, "elders": ["2"], "members": [1, "2", "3"]}),
        )?;
        let roles: Vec<(&str, SectRole)> =
            sect.members.iter().map(|m| (m.user_id.as_str(), m.role)).collect();
        assert_eq!(
            roles,
            vec![("1", SectRole::Leader), ("2", SectRole::Elder), ("3", SectRole::Member)]
        );
        assert_eq!(sect.leader_id.as_deref(), Some("1"));
        assert_eq!(sect.level, 1);
        Ok(())
    }

    #[test]
    fn tournaments_split_bots_from_users_and_keep_rewards() -> Result<(), RecordError> {
        let tournament = parse_tournament(
            "t1".to_string(),
            json!({
                "host": "10",
                "status": "completed",
                "winner": "11",
                "participants": ["11", 12, -1],
                "bot_names": {"-1": "Training Dummy"},
                "add_money": 500,
                "reward_title": "Champion"
            }),
        )?;
        assert_eq!(tournament.status, TournamentStatus::Completed);
        assert_eq!(tournament.participants.len(), 3);
        assert_eq!(tournament.participants[0].standing, Some(1));
        assert_eq!(tournament.participants[1].user_id.as_deref(), Some("12"));
        let bot = &tournament.participants[2];
        assert!(bot.is_bot);
        assert_eq!(bot.user_id, None);
        assert_eq!(bot.bot_name.as_deref(), Some("Training Dummy"));
        assert_eq!(tournament.attributes.get("add_money"), Some(&json!(500)));
        assert_eq!(tournament.attributes.get("reward_title"), Some(&json!("Champion")));
        Ok(())
    }

    #[test]
    fn unknown_tournament_status_is_a_record_error() {
        let result = parse_tournament("t1".to_string(), json!({"status": "paused"}));
        assert!(matches!(result, Err(RecordError::InvalidField { field: "status", .. })));
    }

    #[test]
    fn top_level_scalars_and_invalid_json_fail_the_file() {
        let scalar = parse_legacy_file(LegacyFile::Sects, "sects.json", b"42");
        assert!(scalar.is_err());
        let garbage = parse_legacy_file(LegacyFile::Sects, "sects.json", b"{not json");
        let Err(err) = garbage else { panic!("garbage should not parse") };
        assert_eq!(err.file, "sects.json");
    }

    #[test]
    fn whitespace_only_file_has_no_records() -> Result<(), ParseError> {
        let batch = parse_legacy_file(LegacyFile::Store, "store.json", b" \n")?;
        assert_eq!(batch.attempted(), 0);
        Ok(())
    }

    proptest! {
        #[test]
        fn integers_coerce_from_numbers_and_strings(value in any::<i64>()) {
            prop_assert_eq!(coerce_int(&json!(value)), Ok(value));
            prop_assert_eq!(coerce_int(&json!(value.to_string())), Ok(value));
        }

        #[test]
        fn fractional_numbers_never_coerce(whole in -1_000_000_i64..1_000_000, frac in 0.01_f64..0.99) {
            #[allow(clippy::cast_precision_loss)]
            let value = whole as f64 + frac;
            prop_assert!(coerce_int(&json!(value)).is_err());
        }

        #[test]
        fn negative_balances_are_rejected(cash in i64::MIN..0) {
            let result = parse_user("1".to_string(), json!({"cash": cash}));
            let rejected = matches!(result, Err(RecordError::InvalidField { field: "cash", .. }));
            prop_assert!(rejected);
        }
    }
}
