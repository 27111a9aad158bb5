//! Coin-for-chapter unlocks.

use crate::models::{UnlockChapter, UnlockReceipt, UnlockRecord};
use crate::services::clock::Clock;
use crate::services::metrics::{outcome, UNLOCKS_TOTAL};
use crate::services::store::EntitlementStore;
use crate::services::AccessError;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Clone)]
pub struct UnlockHandler {
    store: Arc<dyn EntitlementStore>,
    clock: Arc<dyn Clock>,
}

impl UnlockHandler {
    pub fn new(store: Arc<dyn EntitlementStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Spend coins to unlock a paid chapter permanently.
    ///
    /// Free chapters and chapters the user already owns are rejected with
    /// `AlreadyUnlocked`. The debit, the unlock record, and the ledger entry
    /// are written together or not at all.
    #[instrument(skip(self))]
    pub async fn unlock_chapter(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> Result<UnlockReceipt, AccessError> {
        let result = self.try_unlock(user_id, chapter_id).await;

        UNLOCKS_TOTAL.with_label_values(&[outcome(&result)]).inc();
        match &result {
            Ok(receipt) => info!(
                price = -receipt.transaction.amount,
                balance = receipt.balance,
                "Chapter unlocked"
            ),
            Err(e) => warn!(error = %e, "Chapter unlock rejected"),
        }

        result
    }

    async fn try_unlock(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> Result<UnlockReceipt, AccessError> {
        let chapter = self
            .store
            .get_chapter(chapter_id)
            .await?
            .ok_or(AccessError::NotFound("Chapter"))?;

        if chapter.is_free {
            return Err(AccessError::AlreadyUnlocked);
        }

        let input = UnlockChapter {
            user_id: user_id.to_string(),
            chapter_id: chapter.chapter_id.clone(),
            chapter_number: chapter.number,
            price: chapter.unlock_cost(),
            now: self.clock.now(),
        };

        self.store.unlock_chapter(&input).await
    }

    #[instrument(skip(self))]
    pub async fn list_unlocked_chapters(
        &self,
        user_id: &str,
    ) -> Result<Vec<UnlockRecord>, AccessError> {
        self.store.list_unlocks(user_id).await
    }
}
