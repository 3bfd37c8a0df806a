// Draft coordination core.
//
// Serves many concurrent player requests against the shared pool: rolls
// candidate cards per color, commits a pick through the store's conditional
// reserve, and resets the pool. The coordinator never caches pool state
// across calls; every operation reads through the store adapter.

use std::future::Future;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{info, warn};

use crate::config::RetryConfig;
use crate::draft::card::{normalize_user, CardRecord, CardStatus, Color};
use crate::draft::sample::{sample_candidates, PickRng};
use crate::store::{CardStore, ReserveOutcome, ResetReport, StoreError};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DraftError {
    #[error("invalid color `{0}`; valid colors are white, blue, black, red, green")]
    InvalidColor(String),

    #[error("a non-empty user name is required")]
    InvalidUser,

    #[error("a non-empty card name is required")]
    InvalidCardName,

    #[error("card `{name}` ({color}) not found in the pool")]
    CardNotFound { name: String, color: Color },

    #[error("card `{name}` is already reserved{}", .reserved_by.as_deref().map(|u| format!(" by {u}")).unwrap_or_default())]
    AlreadyReserved {
        name: String,
        reserved_by: Option<String>,
    },

    #[error("you already hold a {color} card: `{held}`")]
    ColorAlreadyDrafted { color: Color, held: String },

    #[error("the card pool is temporarily unavailable, please try again")]
    StoreUnavailable,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct DraftCoordinator {
    store: Arc<dyn CardStore>,
    retry: RetryConfig,
    rng: Mutex<PickRng>,
}

impl DraftCoordinator {
    pub fn new(store: Arc<dyn CardStore>, retry: RetryConfig) -> Self {
        Self::with_rng(store, retry, PickRng::from_entropy())
    }

    /// Like [`DraftCoordinator::new`] but with a caller-supplied random
    /// source, so tests can pin the candidate sample.
    pub fn with_rng(store: Arc<dyn CardStore>, retry: RetryConfig, rng: PickRng) -> Self {
        Self {
            store,
            retry,
            rng: Mutex::new(rng),
        }
    }

    /// Roll up to three candidate cards of `color` for `user`.
    ///
    /// If the user already holds a reserved card of that color, the roll is
    /// an idempotent re-fetch: it returns exactly that card so a client can
    /// resume a half-finished draft without re-rolling. Otherwise it samples
    /// from the Available rows; fewer than three left means the whole
    /// remainder is offered, and none left yields an empty list (an exhausted
    /// pool is a normal outcome, not an error). Read-only in all paths.
    pub async fn list_candidates(
        &self,
        color: &str,
        user: &str,
    ) -> Result<Vec<CardRecord>, DraftError> {
        let color = parse_color(color)?;
        let user = require_user(user)?;

        let cards = self
            .with_retry(|| self.store.fetch_by_color(color))
            .await?;

        if let Some(held) = cards.iter().find(|c| c.is_reserved_by(&user)) {
            info!(%color, user, card = %held.name, "returning existing reservation");
            return Ok(vec![held.clone()]);
        }

        let available: Vec<CardRecord> =
            cards.into_iter().filter(|c| c.is_available()).collect();
        if available.is_empty() {
            info!(%color, user, "pool exhausted for color");
            return Ok(Vec::new());
        }

        let picks = {
            let mut rng = self.rng.lock().expect("rng lock poisoned");
            sample_candidates(&mut rng, &available)
        };
        info!(%color, user, count = picks.len(), "rolled candidates");
        Ok(picks)
    }

    /// Commit `user`'s pick of the named card.
    ///
    /// At most one logical row mutation: the availability check is re-run by
    /// the store at write time, so of two concurrent picks for the same card
    /// exactly one wins and the other gets `AlreadyReserved`. Re-selecting a
    /// card the user already holds succeeds idempotently, which also resolves
    /// writes whose first response was lost to a timeout.
    pub async fn select_card(
        &self,
        user: &str,
        card_name: &str,
        color: &str,
    ) -> Result<CardRecord, DraftError> {
        let color = parse_color(color)?;
        let user = require_user(user)?;
        let name = card_name.trim();
        if name.is_empty() {
            return Err(DraftError::InvalidCardName);
        }

        // One read of the color's rows covers the not-found check, the
        // idempotent-retry path, and the one-card-per-color invariant.
        let cards = self
            .with_retry(|| self.store.fetch_by_color(color))
            .await?;

        let Some(target) = cards.iter().find(|c| c.name == name) else {
            warn!(%color, user, card = name, "pick of unknown card");
            return Err(DraftError::CardNotFound {
                name: name.to_string(),
                color,
            });
        };

        if target.is_reserved_by(&user) {
            info!(%color, user, card = name, "pick already committed, treating as success");
            return Ok(target.clone());
        }

        if !target.is_available() {
            warn!(%color, user, card = name, "pick of reserved card");
            return Err(DraftError::AlreadyReserved {
                name: name.to_string(),
                reserved_by: target.reserved_by.clone(),
            });
        }

        if let Some(held) = cards.iter().find(|c| c.is_reserved_by(&user)) {
            warn!(%color, user, held = %held.name, "duplicate color pick rejected");
            return Err(DraftError::ColorAlreadyDrafted {
                color,
                held: held.name.clone(),
            });
        }

        match self
            .with_retry(|| self.store.conditional_reserve(name, color, &user))
            .await?
        {
            ReserveOutcome::Reserved(card) => {
                info!(%color, user, card = name, "reservation committed");
                Ok(card)
            }
            ReserveOutcome::Conflict { reserved_by } => {
                // A write whose first response was lost can surface here as a
                // conflict with ourselves; that is the earlier write landing.
                if reserved_by
                    .as_deref()
                    .is_some_and(|owner| owner.eq_ignore_ascii_case(&user))
                {
                    info!(%color, user, card = name, "earlier write landed, treating as success");
                    return Ok(CardRecord {
                        name: name.to_string(),
                        color,
                        status: CardStatus::Reserved,
                        reserved_by: Some(user),
                    });
                }
                warn!(%color, user, card = name, ?reserved_by, "lost reservation race");
                Err(DraftError::AlreadyReserved {
                    name: name.to_string(),
                    reserved_by,
                })
            }
            ReserveOutcome::NotFound => Err(DraftError::CardNotFound {
                name: name.to_string(),
                color,
            }),
        }
    }

    /// Clear every row of the pool back to Available.
    ///
    /// Idempotent and safe to re-run. A reservation committed mid-reset may
    /// be swept back to Available; that race is accepted rather than guarded
    /// against, since reset is an out-of-band admin action.
    pub async fn reset_pool(&self) -> Result<ResetReport, DraftError> {
        let report = self.with_retry(|| self.store.reset_all()).await?;
        if report.failures.is_empty() {
            info!(cleared = report.cleared, "pool reset");
        } else {
            warn!(
                cleared = report.cleared,
                failed = report.failures.len(),
                "pool reset left rows uncleared"
            );
        }
        Ok(report)
    }

    /// Run a store call, retrying transient failures a bounded number of
    /// times with doubling backoff. Data errors and conflicts are never
    /// retried; the former will not heal and the latter are terminal for the
    /// calling request.
    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T, DraftError>
    where
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 1;
        let mut delay = self.retry.backoff();
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(StoreError::Data(msg)) => {
                    warn!("pool data error: {msg}");
                    return Err(DraftError::StoreUnavailable);
                }
                Err(StoreError::Unavailable(msg)) => {
                    if attempt >= self.retry.attempts {
                        warn!("store unavailable after {attempt} attempts: {msg}");
                        return Err(DraftError::StoreUnavailable);
                    }
                    warn!("store attempt {attempt} failed, retrying in {delay:?}: {msg}");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

fn parse_color(raw: &str) -> Result<Color, DraftError> {
    raw.parse()
        .map_err(|_| DraftError::InvalidColor(raw.trim().to_string()))
}

fn require_user(raw: &str) -> Result<String, DraftError> {
    let user = normalize_user(raw);
    if user.is_empty() {
        return Err(DraftError::InvalidUser);
    }
    Ok(user)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    fn test_retry() -> RetryConfig {
        RetryConfig {
            attempts: 3,
            backoff_ms: 1,
        }
    }

    fn white_pool(n: usize) -> Vec<CardRecord> {
        (0..n)
            .map(|i| CardRecord::available(format!("White {i}"), Color::White))
            .collect()
    }

    /// Helper: coordinator over a fresh in-memory pool, with the store handle
    /// kept around for direct inspection.
    fn coordinator(rows: Vec<CardRecord>) -> (Arc<MemoryStore>, DraftCoordinator) {
        let store = Arc::new(MemoryStore::new(rows));
        let coordinator =
            DraftCoordinator::with_rng(store.clone(), test_retry(), PickRng::from_seed(42));
        (store, coordinator)
    }

    /// Store wrapper that fails its first `failures` calls with a transient
    /// error, then delegates to an inner memory store.
    struct FlakyStore {
        inner: MemoryStore,
        failures: AtomicU32,
    }

    impl FlakyStore {
        fn new(rows: Vec<CardRecord>, failures: u32) -> Self {
            Self {
                inner: MemoryStore::new(rows),
                failures: AtomicU32::new(failures),
            }
        }

        fn trip(&self) -> Result<(), StoreError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("injected outage".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CardStore for FlakyStore {
        async fn fetch_by_color(&self, color: Color) -> Result<Vec<CardRecord>, StoreError> {
            self.trip()?;
            self.inner.fetch_by_color(color).await
        }

        async fn fetch_card(
            &self,
            name: &str,
            color: Color,
        ) -> Result<Option<CardRecord>, StoreError> {
            self.trip()?;
            self.inner.fetch_card(name, color).await
        }

        async fn conditional_reserve(
            &self,
            name: &str,
            color: Color,
            new_owner: &str,
        ) -> Result<ReserveOutcome, StoreError> {
            self.trip()?;
            self.inner.conditional_reserve(name, color, new_owner).await
        }

        async fn reset_all(&self) -> Result<ResetReport, StoreError> {
            self.trip()?;
            self.inner.reset_all().await
        }
    }

    // --- validation ---

    #[tokio::test]
    async fn rejects_invalid_color() {
        let (_, coordinator) = coordinator(vec![]);
        let err = coordinator.list_candidates("colorless", "alice").await.unwrap_err();
        assert!(matches!(err, DraftError::InvalidColor(c) if c == "colorless"));
    }

    #[tokio::test]
    async fn rejects_blank_user() {
        let (_, coordinator) = coordinator(white_pool(5));
        let err = coordinator.list_candidates("white", "   ").await.unwrap_err();
        assert!(matches!(err, DraftError::InvalidUser));

        let err = coordinator.select_card("", "White 0", "white").await.unwrap_err();
        assert!(matches!(err, DraftError::InvalidUser));
    }

    #[tokio::test]
    async fn rejects_blank_card_name() {
        let (_, coordinator) = coordinator(white_pool(5));
        let err = coordinator.select_card("alice", "  ", "white").await.unwrap_err();
        assert!(matches!(err, DraftError::InvalidCardName));
    }

    // --- candidate rolls ---

    #[tokio::test]
    async fn rolls_three_distinct_available_cards() {
        let (_, coordinator) = coordinator(white_pool(5));

        let picks = coordinator.list_candidates("White", "alice").await.unwrap();
        assert_eq!(picks.len(), 3);
        assert!(picks.iter().all(|c| c.color == Color::White && c.is_available()));

        let mut names: Vec<&str> = picks.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 3);
    }

    #[tokio::test]
    async fn degraded_pool_returns_the_whole_remainder() {
        let (_, coordinator) =
            coordinator(vec![CardRecord::available("Lone Blue", Color::Blue)]);

        let picks = coordinator.list_candidates("blue", "carol").await.unwrap();
        assert_eq!(picks.len(), 1);
        assert_eq!(picks[0].name, "Lone Blue");
    }

    #[tokio::test]
    async fn exhausted_pool_returns_empty_list_without_error() {
        let mut rows = vec![CardRecord::available("Shadow", Color::Black)];
        rows[0].status = CardStatus::Reserved;
        rows[0].reserved_by = Some("erin".into());
        let (_, coordinator) = coordinator(rows);

        let picks = coordinator.list_candidates("black", "dave").await.unwrap();
        assert!(picks.is_empty());
    }

    #[tokio::test]
    async fn roll_after_reservation_returns_only_the_held_card() {
        let (_, coordinator) = coordinator(white_pool(5));

        coordinator.select_card("alice", "White 2", "white").await.unwrap();

        let picks = coordinator.list_candidates("white", "Alice").await.unwrap();
        assert_eq!(picks.len(), 1);
        assert_eq!(picks[0].name, "White 2");
        assert!(picks[0].is_reserved_by("alice"));
    }

    #[tokio::test]
    async fn roll_does_not_mutate_the_pool() {
        let (store, coordinator) = coordinator(white_pool(5));

        coordinator.list_candidates("white", "alice").await.unwrap();
        coordinator.list_candidates("white", "bob").await.unwrap();

        assert!(store.rows().iter().all(|c| c.is_available()));
    }

    // --- picks ---

    #[tokio::test]
    async fn pick_reserves_the_card_for_the_user() {
        let (store, coordinator) = coordinator(white_pool(5));

        let card = coordinator.select_card(" Alice ", "White 1", "White").await.unwrap();
        assert_eq!(card.status, CardStatus::Reserved);
        assert_eq!(card.reserved_by.as_deref(), Some("alice"));

        let row = store.fetch_card("White 1", Color::White).await.unwrap().unwrap();
        assert_eq!(row.reserved_by.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn repeated_pick_is_idempotent() {
        let (_, coordinator) = coordinator(white_pool(5));

        let first = coordinator.select_card("alice", "White 1", "white").await.unwrap();
        let second = coordinator.select_card("alice", "White 1", "white").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn pick_of_anothers_card_conflicts() {
        let (_, coordinator) = coordinator(white_pool(5));

        coordinator.select_card("alice", "White 1", "white").await.unwrap();
        let err = coordinator.select_card("bob", "White 1", "white").await.unwrap_err();
        match err {
            DraftError::AlreadyReserved { name, reserved_by } => {
                assert_eq!(name, "White 1");
                assert_eq!(reserved_by.as_deref(), Some("alice"));
            }
            other => panic!("expected AlreadyReserved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_card_of_same_color_is_rejected() {
        let (_, coordinator) = coordinator(white_pool(5));

        coordinator.select_card("alice", "White 1", "white").await.unwrap();
        let err = coordinator.select_card("alice", "White 2", "white").await.unwrap_err();
        match err {
            DraftError::ColorAlreadyDrafted { color, held } => {
                assert_eq!(color, Color::White);
                assert_eq!(held, "White 1");
            }
            other => panic!("expected ColorAlreadyDrafted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn one_card_per_color_allows_a_full_five_color_draft() {
        let rows = vec![
            CardRecord::available("W", Color::White),
            CardRecord::available("U", Color::Blue),
            CardRecord::available("B", Color::Black),
            CardRecord::available("R", Color::Red),
            CardRecord::available("G", Color::Green),
        ];
        let (store, coordinator) = coordinator(rows);

        for color in Color::ALL {
            let name = match color {
                Color::White => "W",
                Color::Blue => "U",
                Color::Black => "B",
                Color::Red => "R",
                Color::Green => "G",
            };
            coordinator.select_card("alice", name, color.as_str()).await.unwrap();
        }

        assert!(store.rows().iter().all(|c| c.is_reserved_by("alice")));
    }

    #[tokio::test]
    async fn unknown_card_and_wrong_color_are_not_found() {
        let (_, coordinator) = coordinator(white_pool(5));

        let err = coordinator.select_card("alice", "Nope", "white").await.unwrap_err();
        assert!(matches!(err, DraftError::CardNotFound { .. }));

        // Right name, wrong color: names are only unique within a color.
        let err = coordinator.select_card("alice", "White 1", "blue").await.unwrap_err();
        assert!(matches!(err, DraftError::CardNotFound { .. }));
    }

    #[tokio::test]
    async fn concurrent_picks_of_the_same_card_have_one_winner() {
        let (_, coordinator) = coordinator(white_pool(5));
        let coordinator = Arc::new(coordinator);

        let a = {
            let c = coordinator.clone();
            tokio::spawn(async move { c.select_card("alice", "White 0", "white").await })
        };
        let b = {
            let c = coordinator.clone();
            tokio::spawn(async move { c.select_card("bob", "White 0", "white").await })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "exactly one pick must win: {a:?} / {b:?}");
        let loser = if a.is_err() { a } else { b };
        assert!(matches!(
            loser.unwrap_err(),
            DraftError::AlreadyReserved { .. }
        ));
    }

    // --- reset ---

    #[tokio::test]
    async fn reset_makes_every_card_available_again() {
        let (store, coordinator) = coordinator(white_pool(5));

        coordinator.select_card("alice", "White 0", "white").await.unwrap();
        coordinator.select_card("bob", "White 1", "white").await.unwrap();

        let report = coordinator.reset_pool().await.unwrap();
        assert_eq!(report.cleared, 2);
        assert!(report.failures.is_empty());
        assert!(store
            .rows()
            .iter()
            .all(|c| c.is_available() && c.reserved_by.is_none()));

        // Re-running is harmless.
        let again = coordinator.reset_pool().await.unwrap();
        assert_eq!(again.cleared, 0);
    }

    // --- retry behavior ---

    #[tokio::test]
    async fn transient_store_failures_are_retried() {
        let store = Arc::new(FlakyStore::new(white_pool(5), 2));
        let coordinator =
            DraftCoordinator::with_rng(store, test_retry(), PickRng::from_seed(1));

        let picks = coordinator.list_candidates("white", "alice").await.unwrap();
        assert_eq!(picks.len(), 3);
    }

    #[tokio::test]
    async fn persistent_store_failure_surfaces_after_bounded_attempts() {
        let store = Arc::new(FlakyStore::new(white_pool(5), u32::MAX));
        let coordinator =
            DraftCoordinator::with_rng(store.clone(), test_retry(), PickRng::from_seed(1));

        let err = coordinator.list_candidates("white", "alice").await.unwrap_err();
        assert!(matches!(err, DraftError::StoreUnavailable));

        // attempts = 3 means exactly three calls before giving up.
        let consumed = u32::MAX - store.failures.load(Ordering::SeqCst);
        assert_eq!(consumed, 3);
    }

    #[tokio::test]
    async fn ambiguous_write_resolves_idempotently_on_retry() {
        // Simulate a pick whose write landed but whose response was lost:
        // the reservation already exists when the client retries.
        let (store, coordinator) = coordinator(white_pool(5));
        store
            .conditional_reserve("White 0", Color::White, "alice")
            .await
            .unwrap();

        // The retry sees its own reservation and reports success.
        let card = coordinator.select_card("alice", "White 0", "white").await.unwrap();
        assert_eq!(card.reserved_by.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn validation_errors_do_not_touch_the_store() {
        let store = Arc::new(FlakyStore::new(white_pool(5), u32::MAX));
        let coordinator =
            DraftCoordinator::with_rng(store.clone(), test_retry(), PickRng::from_seed(1));

        let before = store.failures.load(Ordering::SeqCst);
        let _ = coordinator.list_candidates("notacolor", "alice").await;
        let _ = coordinator.select_card("", "White 0", "white").await;
        let _ = coordinator.select_card("alice", "", "white").await;
        assert_eq!(store.failures.load(Ordering::SeqCst), before);
    }
}
