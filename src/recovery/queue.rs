//! Recovery queue reconciler
//!
//! Keeps a de-duplicated, stable-ordered view of queued recovery payloads
//! for the recovered wallet. Each refresh fetches a snapshot from the
//! manager and merges it into what is already held:
//!
//! - held payloads keep their position and take the fetched fields
//! - newly seen payloads are appended in fetch order
//! - held payloads missing from the fetch are retained
//!
//! Every refresh is tagged with a monotonic token. A response is dropped
//! when a refresh with an overlapping scope was issued after it (a full
//! refresh overlaps every chain), when it was issued before the last
//! `reset`, or when the queue now belongs to another wallet.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::manager::RecoveryManager;
use super::types::{ChainId, RecoveryPayload, WalletAddress};

/// Merge a fetched snapshot into the held sequence
///
/// Output is `held` with each entry replaced by the fetched payload of the
/// same id (if any), followed by fetched payloads with unseen ids in fetch
/// order. Never yields two entries with the same id.
pub fn merge_payloads(held: &[RecoveryPayload], fetched: &[RecoveryPayload]) -> Vec<RecoveryPayload> {
    let mut by_id: HashMap<&str, &RecoveryPayload> = HashMap::with_capacity(fetched.len());
    for payload in fetched {
        // First occurrence wins
        by_id.entry(payload.id.as_str()).or_insert(payload);
    }

    let mut seen: HashSet<&str> = HashSet::with_capacity(held.len() + fetched.len());
    let mut merged = Vec::with_capacity(held.len() + fetched.len());

    for payload in held {
        if !seen.insert(payload.id.as_str()) {
            continue;
        }
        let current = by_id.get(payload.id.as_str()).copied().unwrap_or(payload);
        merged.push(current.clone());
    }

    for payload in fetched {
        if seen.insert(payload.id.as_str()) {
            merged.push(payload.clone());
        }
    }

    merged
}

/// Read-only view of the queue
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueSnapshot {
    pub items: Vec<RecoveryPayload>,
    pub loading: bool,
    pub error: Option<String>,
    /// Time of the last successfully applied refresh
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl QueueSnapshot {
    /// Same payloads and error, ignoring loading state and timestamps
    pub fn same_content(&self, other: &QueueSnapshot) -> bool {
        self.items == other.items && self.error == other.error
    }
}

#[derive(Debug, Default)]
struct QueueState {
    items: Vec<RecoveryPayload>,
    /// Refreshes currently awaiting the manager
    in_flight: usize,
    error: Option<String>,
    refreshed_at: Option<DateTime<Utc>>,
    /// Wallet the held items belong to
    wallet: Option<WalletAddress>,
    /// Tokens at or below this were issued before the last reset
    reset_floor: u64,
}

/// Refresh scope used for stale-response detection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RefreshKey {
    wallet: WalletAddress,
    chain_id: Option<ChainId>,
}

impl RefreshKey {
    /// Whether a response for `self` and one for `other` touch the same payloads
    fn overlaps(&self, other: &RefreshKey) -> bool {
        self.wallet == other.wallet
            && match (self.chain_id, other.chain_id) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    }
}

/// Outcome of a single refresh, for logging and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Snapshot merged; number of payloads now held
    Applied(usize),
    /// Fetch failed; error recorded, items untouched
    Failed,
    /// A newer overlapping refresh (or a reset) was issued meanwhile
    Stale,
    /// The queue belongs to another wallet now; nothing was applied
    Detached,
}

/// Reconciler owning the queue state
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct RecoveryQueue {
    manager: Arc<dyn RecoveryManager>,
    state: Arc<RwLock<QueueState>>,
    /// Latest token issued per scope
    tokens: Arc<DashMap<RefreshKey, u64>>,
    next_token: Arc<AtomicU64>,
    fetch_timeout: Option<Duration>,
}

impl RecoveryQueue {
    pub fn new(manager: Arc<dyn RecoveryManager>) -> Self {
        Self {
            manager,
            state: Arc::new(RwLock::new(QueueState::default())),
            tokens: Arc::new(DashMap::new()),
            next_token: Arc::new(AtomicU64::new(0)),
            fetch_timeout: None,
        }
    }

    /// Fail fetches that take longer than `timeout`
    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Attach the queue to `wallet`, clearing it if it held another wallet's payloads
    pub async fn bind(&self, wallet: &WalletAddress) {
        let mut state = self.state.write().await;
        if state.wallet.as_ref() == Some(wallet) {
            return;
        }
        if state.wallet.is_some() {
            self.clear(&mut state);
        }
        info!(wallet = %wallet, "Recovery queue bound to wallet");
        state.wallet = Some(wallet.clone());
    }

    /// Wallet the queue currently belongs to
    pub async fn wallet(&self) -> Option<WalletAddress> {
        self.state.read().await.wallet.clone()
    }

    fn is_other_wallet(state: &QueueState, wallet: &WalletAddress) -> bool {
        state.wallet.as_ref().is_some_and(|bound| bound != wallet)
    }

    /// Newest token issued after `token` for a scope overlapping `key`
    fn superseded_by(&self, key: &RefreshKey, token: u64) -> Option<u64> {
        self.tokens
            .iter()
            .filter(|entry| entry.key().overlaps(key))
            .map(|entry| *entry.value())
            .filter(|&latest| latest > token)
            .max()
    }

    /// Fetch and merge the queue for `wallet`, optionally one chain only
    ///
    /// Never returns an error: failures are recorded in the snapshot. An
    /// unbound queue binds to the first wallet it is refreshed for.
    pub async fn refresh(&self, wallet: &WalletAddress, chain_id: Option<ChainId>) -> RefreshOutcome {
        let key = RefreshKey {
            wallet: wallet.clone(),
            chain_id,
        };

        let token = {
            let mut state = self.state.write().await;
            if Self::is_other_wallet(&state, wallet) {
                debug!(wallet = %wallet, "Queue bound to another wallet, skipping refresh");
                return RefreshOutcome::Detached;
            }
            let token = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
            self.tokens.insert(key.clone(), token);
            state.in_flight += 1;
            token
        };

        debug!(wallet = %wallet, chain_id = ?chain_id, token, "Refreshing recovery queue");

        let fetched = self.fetch(wallet, chain_id).await;

        let mut state = self.state.write().await;
        state.in_flight = state.in_flight.saturating_sub(1);

        if Self::is_other_wallet(&state, wallet) {
            debug!(wallet = %wallet, token, "Dropping response for a wallet the queue no longer holds");
            return RefreshOutcome::Detached;
        }

        let latest = if token <= state.reset_floor {
            Some(state.reset_floor)
        } else {
            self.superseded_by(&key, token)
        };
        if let Some(latest) = latest {
            let stale = Error::StaleResponse { token, latest };
            debug!(wallet = %wallet, chain_id = ?chain_id, "{}", stale);
            return RefreshOutcome::Stale;
        }

        if state.wallet.is_none() {
            state.wallet = Some(wallet.clone());
        }

        match fetched {
            Ok(payloads) => {
                let before = state.items.len();
                state.items = merge_payloads(&state.items, &payloads);
                state.error = None;
                state.refreshed_at = Some(Utc::now());

                let added = state.items.len() - before;
                if added > 0 {
                    info!(wallet = %wallet, chain_id = ?chain_id, added, "New recovery payloads queued");
                }
                RefreshOutcome::Applied(state.items.len())
            }
            Err(e) => {
                warn!(wallet = %wallet, chain_id = ?chain_id, error = %e, "Recovery queue refresh failed");
                state.error = Some(e.to_string());
                RefreshOutcome::Failed
            }
        }
    }

    async fn fetch(&self, wallet: &WalletAddress, chain_id: Option<ChainId>) -> Result<Vec<RecoveryPayload>> {
        let request = self.manager.fetch_queued_payloads(wallet, chain_id);

        match self.fetch_timeout {
            Some(timeout) => tokio::time::timeout(timeout, request).await.map_err(|_| {
                Error::Fetch(format!("timed out after {}ms", timeout.as_millis()))
            })?,
            None => request.await,
        }
    }

    /// Refresh one chain; does nothing without a chain id
    pub async fn refresh_by_chain(&self, wallet: &WalletAddress, chain_id: Option<ChainId>) -> Option<RefreshOutcome> {
        match chain_id {
            Some(chain_id) => Some(self.refresh(wallet, Some(chain_id)).await),
            None => None,
        }
    }

    /// Payloads for `chain_id`, only when not loading and no error is set
    pub async fn by_chain(&self, chain_id: ChainId) -> Option<Vec<RecoveryPayload>> {
        let state = self.state.read().await;
        if state.in_flight > 0 || state.error.is_some() {
            return None;
        }

        Some(
            state
                .items
                .iter()
                .filter(|p| p.chain_id == chain_id)
                .cloned()
                .collect(),
        )
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.read().await;
        QueueSnapshot {
            items: state.items.clone(),
            loading: state.in_flight > 0,
            error: state.error.clone(),
            refreshed_at: state.refreshed_at,
        }
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.in_flight > 0
    }

    /// Forget everything held, including the bound wallet
    ///
    /// Refreshes still in flight become stale.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        self.clear(&mut state);
        state.wallet = None;
    }

    fn clear(&self, state: &mut QueueState) {
        state.reset_floor = self.next_token.load(Ordering::SeqCst);
        self.tokens.clear();
        state.items.clear();
        state.error = None;
        state.refreshed_at = None;
        info!(floor = state.reset_floor, "Recovery queue reset");
    }

    /// Refresh on a fixed interval until `cancel` fires
    ///
    /// The first refresh runs immediately. Refreshes from one poller never
    /// overlap. The poller stops by itself once the queue is bound to
    /// another wallet.
    pub fn spawn_poller(
        &self,
        wallet: WalletAddress,
        chain_id: Option<ChainId>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let queue = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            info!(wallet = %wallet, chain_id = ?chain_id, interval_ms = interval.as_millis() as u64, "Recovery queue poller started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if queue.refresh(&wallet, chain_id).await == RefreshOutcome::Detached {
                            break;
                        }
                    }
                }
            }

            info!(wallet = %wallet, "Recovery queue poller stopped");
        })
    }
}
