use serde_json::Value;

use crate::error::StoreError;
use crate::records::{
    Balance, InventoryItem, Job, Sect, SectMember, SectRole, SectUpdate, StoreItem, Tournament,
    TournamentParticipant, TournamentUpdate, User, UserJob, UserUpdate,
};

pub type StoreResult<T> = Result<T, StoreError>;

/// The persistence surface the bot's command handlers call.
///
/// Balances never go below zero: a subtraction that would overdraw clamps at 0.
/// Users are created on first touch by any balance or meta write.
pub trait BotStore {
    /// Balance of a user; an unknown user has a zero balance.
    ///
    /// # Errors
    /// Returns [`StoreError::Storage`] when the read fails.
    fn get_balance(&self, user_id: &str) -> StoreResult<Balance>;

    /// Adds `amount` (possibly negative) to cash and returns the new balance.
    ///
    /// # Errors
    /// Returns [`StoreError::Storage`] when the write fails.
    fn add_cash(&mut self, user_id: &str, amount: i64) -> StoreResult<Balance>;

    /// # Errors
    /// Returns [`StoreError::Storage`] when the write fails.
    fn set_cash(&mut self, user_id: &str, amount: i64) -> StoreResult<Balance>;

    /// # Errors
    /// Returns [`StoreError::Storage`] when the write fails.
    fn add_bank(&mut self, user_id: &str, amount: i64) -> StoreResult<Balance>;

    /// # Errors
    /// Returns [`StoreError::Storage`] when the write fails.
    fn set_bank(&mut self, user_id: &str, amount: i64) -> StoreResult<Balance>;

    /// Profile columns of a user. Meta, inventory, and job progress have their own calls.
    ///
    /// # Errors
    /// Returns [`StoreError::Storage`] when the read fails.
    fn get_user(&self, user_id: &str) -> StoreResult<Option<User>>;

    /// Apply `update` to the user, creating them first if needed, and return the profile.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] for an unknown job and [`StoreError::Invalid`] for a
    /// negative message count.
    fn update_user(&mut self, user_id: &str, update: &UserUpdate) -> StoreResult<User>;

    /// # Errors
    /// Returns [`StoreError::Storage`] when the read fails or the stored value is not JSON.
    fn get_user_meta(&self, user_id: &str, key: &str) -> StoreResult<Option<Value>>;

    /// Insert or replace one meta value.
    ///
    /// # Errors
    /// Returns [`StoreError::Storage`] when the write fails.
    fn set_user_meta(&mut self, user_id: &str, key: &str, value: &Value) -> StoreResult<()>;

    /// # Errors
    /// Returns [`StoreError::Storage`] when the read fails.
    fn get_inventory(&self, user_id: &str) -> StoreResult<Vec<InventoryItem>>;

    /// Adds `quantity` to the user's stack of `item_id`.
    ///
    /// # Errors
    /// Returns [`StoreError::Invalid`] for a non-positive quantity and
    /// [`StoreError::NotFound`] when the item is not in the store.
    fn add_inventory_item(
        &mut self,
        user_id: &str,
        item_id: &str,
        quantity: i64,
    ) -> StoreResult<InventoryItem>;

    /// Removes up to `quantity`; the row disappears at zero. Returns whether anything was removed.
    ///
    /// # Errors
    /// Returns [`StoreError::Invalid`] for a non-positive quantity.
    fn remove_inventory_item(
        &mut self,
        user_id: &str,
        item_id: &str,
        quantity: i64,
    ) -> StoreResult<bool>;

    /// # Errors
    /// Returns [`StoreError::Storage`] when the read fails.
    fn get_jobs(&self) -> StoreResult<Vec<Job>>;

    /// Insert or replace a job definition.
    ///
    /// # Errors
    /// Returns [`StoreError::Invalid`] when `min_pay > max_pay` or either is negative.
    fn set_job(&mut self, job: &Job) -> StoreResult<()>;

    /// Progress of a user in a job, or fresh apprentice progress when none is stored.
    ///
    /// # Errors
    /// Returns [`StoreError::Storage`] when the read fails.
    fn get_user_job(&self, user_id: &str, job_id: &str) -> StoreResult<UserJob>;

    /// # Errors
    /// Returns [`StoreError::NotFound`] when the job does not exist.
    fn update_user_job(&mut self, progress: &UserJob) -> StoreResult<()>;

    /// # Errors
    /// Returns [`StoreError::Storage`] when the read fails.
    fn get_sect(&self, sect_id: &str) -> StoreResult<Option<Sect>>;

    /// # Errors
    /// Returns [`StoreError::Storage`] when the read fails.
    fn sect_members(&self, sect_id: &str) -> StoreResult<Vec<SectMember>>;

    /// Create a sect with its listed members. The leader joins with the leader role.
    ///
    /// # Errors
    /// Returns [`StoreError::Invalid`] when the sect already exists.
    fn create_sect(&mut self, sect: &Sect) -> StoreResult<()>;

    /// A new leader is created on first touch and joins with the leader role.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] when the sect does not exist.
    fn update_sect(&mut self, sect_id: &str, update: &SectUpdate) -> StoreResult<Sect>;

    /// Insert or change the role of a member.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] when the sect does not exist.
    fn add_sect_member(&mut self, sect_id: &str, user_id: &str, role: SectRole) -> StoreResult<()>;

    /// # Errors
    /// Returns [`StoreError::Storage`] when the write fails.
    fn remove_sect_member(&mut self, sect_id: &str, user_id: &str) -> StoreResult<bool>;

    /// # Errors
    /// Returns [`StoreError::Storage`] when the read fails.
    fn store_items(&self) -> StoreResult<Vec<StoreItem>>;

    /// # Errors
    /// Returns [`StoreError::Storage`] when the read fails.
    fn get_store_item(&self, item_id: &str) -> StoreResult<Option<StoreItem>>;

    /// Insert or replace a store item.
    ///
    /// # Errors
    /// Returns [`StoreError::Invalid`] for a negative price or a stock below `-1`.
    fn set_store_item(&mut self, item: &StoreItem) -> StoreResult<()>;

    /// Changes stock by `delta`, flooring at zero. Unlimited stock is left alone.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] when the item does not exist.
    fn adjust_store_stock(&mut self, item_id: &str, delta: i64) -> StoreResult<StoreItem>;

    /// # Errors
    /// Returns [`StoreError::Storage`] when the read fails.
    fn get_tournament(&self, tournament_id: &str) -> StoreResult<Option<Tournament>>;

    /// Create a tournament together with its participants, all in one transaction.
    ///
    /// # Errors
    /// Returns [`StoreError::Invalid`] when the tournament already exists or a participant
    /// is neither a bot nor a user.
    fn create_tournament(&mut self, tournament: &Tournament) -> StoreResult<()>;

    /// Change status, winner, or reward settings of a tournament.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] when the tournament does not exist.
    fn update_tournament(
        &mut self,
        tournament_id: &str,
        update: &TournamentUpdate,
    ) -> StoreResult<Tournament>;

    /// # Errors
    /// Returns [`StoreError::Storage`] when the read fails.
    fn tournament_participants(&self, tournament_id: &str)
        -> StoreResult<Vec<TournamentParticipant>>;

    /// # Errors
    /// Returns [`StoreError::NotFound`] when the tournament does not exist.
    fn add_tournament_participant(&mut self, participant: &TournamentParticipant)
        -> StoreResult<()>;

    /// # Errors
    /// Returns [`StoreError::Storage`] when the write fails.
    fn remove_tournament_participant(
        &mut self,
        tournament_id: &str,
        participant_id: &str,
    ) -> StoreResult<bool>;
}
