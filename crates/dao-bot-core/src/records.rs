use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_RARITY: &str = "common";
pub const DEFAULT_JOB_RANK: &str = "apprentice";
/// Store stock value meaning "never runs out".
pub const UNLIMITED_STOCK: i64 = -1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SectRole {
    Leader,
    Elder,
    Member,
}

impl SectRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Leader => "leader",
            Self::Elder => "elder",
            Self::Member => "member",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "leader" => Some(Self::Leader),
            "elder" => Some(Self::Elder),
            "member" => Some(Self::Member),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    Recruiting,
    Active,
    Completed,
}

impl TournamentStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recruiting => "recruiting",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "recruiting" => Some(Self::Recruiting),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct Balance {
    pub cash: i64,
    pub bank: i64,
}

impl Balance {
    #[must_use]
    pub fn total(self) -> i64 {
        self.cash.saturating_add(self.bank)
    }
}

/// One player, plus the per-user data the legacy economy file kept inline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub user_id: String,
    pub cash: i64,
    pub bank: i64,
    pub job_id: Option<String>,
    pub last_cultivate: Option<String>,
    pub last_collect: Option<String>,
    pub message_count: i64,
    /// Legacy fields without a column of their own, stored as `user_meta` rows.
    #[serde(default)]
    pub meta: BTreeMap<String, Value>,
    /// Inline inventory as `(item_id, quantity)`, duplicates already folded.
    #[serde(default)]
    pub inventory: Vec<(String, i64)>,
    #[serde(default)]
    pub jobs: Vec<UserJob>,
}

impl User {
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            cash: 0,
            bank: 0,
            job_id: None,
            last_cultivate: None,
            last_collect: None,
            message_count: 0,
            meta: BTreeMap::new(),
            inventory: Vec::new(),
            jobs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryItem {
    pub user_id: String,
    pub item_id: String,
    pub quantity: i64,
    pub rarity: String,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub job_id: String,
    pub name: String,
    pub min_pay: i64,
    pub max_pay: i64,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// Progress of one user in one job.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct UserJob {
    pub user_id: String,
    pub job_id: String,
    pub xp: i64,
    pub rank: String,
    pub last_work: Option<String>,
}

impl UserJob {
    #[must_use]
    pub fn fresh(user_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            job_id: job_id.into(),
            xp: 0,
            rank: DEFAULT_JOB_RANK.to_string(),
            last_work: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreItem {
    pub item_id: String,
    pub name: String,
    pub price: i64,
    pub description: String,
    pub stock: i64,
    pub min_rank: i64,
    pub rarity: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl StoreItem {
    #[must_use]
    pub fn has_unlimited_stock(&self) -> bool {
        self.stock == UNLIMITED_STOCK
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sect {
    pub sect_id: String,
    pub name: String,
    pub leader_id: Option<String>,
    pub description: String,
    pub level: i64,
    pub wealth: i64,
    pub max_members: i64,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub members: Vec<SectMember>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SectMember {
    pub sect_id: String,
    pub user_id: String,
    pub role: SectRole,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tournament {
    pub tournament_id: String,
    pub host_id: Option<String>,
    pub title: String,
    pub description: String,
    pub status: TournamentStatus,
    pub winner_id: Option<String>,
    /// Reward settings and any other legacy fields without a column.
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub participants: Vec<TournamentParticipant>,
}

/// A tournament entrant. Bot entrants have negative ids and no `user_id`.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TournamentParticipant {
    pub tournament_id: String,
    pub participant_id: String,
    pub user_id: Option<String>,
    pub is_bot: bool,
    pub bot_name: Option<String>,
    pub standing: Option<i64>,
}

impl TournamentParticipant {
    #[must_use]
    pub fn human(tournament_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            tournament_id: tournament_id.into(),
            participant_id: user_id.clone(),
            user_id: Some(user_id),
            is_bot: false,
            bot_name: None,
            standing: None,
        }
    }
}

/// Changes to a user profile. `None` leaves the column as it is.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct UserUpdate {
    /// `Some(None)` clears the job.
    pub job_id: Option<Option<String>>,
    pub last_cultivate: Option<String>,
    pub last_collect: Option<String>,
    pub message_count: Option<i64>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct SectUpdate {
    pub name: Option<String>,
    pub leader_id: Option<String>,
    pub description: Option<String>,
    pub level: Option<i64>,
    pub wealth: Option<i64>,
    pub max_members: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TournamentUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TournamentStatus>,
    pub winner_id: Option<String>,
    /// Merged key by key into the stored attributes.
    pub attributes: Option<Map<String, Value>>,
}
