//! Credit metering and balance debits.
//!
//! The orchestrator meters every generated assistant message: it prices the
//! message through a [`PricingTable`] lookup and asks a [`BalanceStore`] to
//! debit the user. Insufficient balance is a first-class outcome
//! ([`DebitOutcome::InsufficientFunds`]), never an error. The workflow
//! decides what to do with it (it stops the run rather than let an agent
//! speak for free).
//!
//! Token volume is an approximation (four characters per token, bucketed per
//! 1k); the estimator sits behind named functions so it can be swapped for
//! exact token counts later.

use crate::model::Provider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// One pricing row, keyed by `(provider, model)`.
#[derive(Clone, Debug)]
pub struct PricingRow {
    pub provider: Provider,
    pub model: String,
    /// Flat credits charged per generated message.
    pub cost_per_message: f64,
    /// Credits charged per full-or-partial 1000-token bucket.
    pub cost_per_1k_tokens: f64,
    /// Marks the provider's fallback row for unknown models.
    pub is_default_model: bool,
    pub is_active: bool,
}

impl PricingRow {
    pub fn new(
        provider: Provider,
        model: impl Into<String>,
        cost_per_message: f64,
        cost_per_1k_tokens: f64,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            cost_per_message,
            cost_per_1k_tokens,
            is_default_model: false,
            is_active: true,
        }
    }

    /// Mark this row as the provider's default (builder pattern).
    pub fn default_model(mut self) -> Self {
        self.is_default_model = true;
        self
    }

    /// Deactivate this row; inactive rows are invisible to lookup.
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// The price resolved for a specific model, relabeled when the provider's
/// default row was used.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelPrice {
    pub model: String,
    pub cost_per_message: f64,
    pub cost_per_1k_tokens: f64,
}

/// In-memory pricing lookup. Loaded by the embedding system; the engine only
/// reads it.
#[derive(Clone, Debug, Default)]
pub struct PricingTable {
    rows: Vec<PricingRow>,
}

impl PricingTable {
    pub fn new(rows: Vec<PricingRow>) -> Self {
        Self { rows }
    }

    /// Resolve pricing for `(provider, model)`: exact active match first,
    /// then the provider's active default row relabeled with the requested
    /// model name.
    pub fn lookup(&self, provider: Provider, model: &str) -> Option<ModelPrice> {
        let active = || self.rows.iter().filter(|r| r.is_active && r.provider == provider);

        if let Some(row) = active().find(|r| r.model == model) {
            return Some(ModelPrice {
                model: row.model.clone(),
                cost_per_message: row.cost_per_message,
                cost_per_1k_tokens: row.cost_per_1k_tokens,
            });
        }

        active().find(|r| r.is_default_model).map(|row| ModelPrice {
            model: model.to_string(),
            cost_per_message: row.cost_per_message,
            cost_per_1k_tokens: row.cost_per_1k_tokens,
        })
    }
}

/// Approximate input length charged per multi-agent turn when the true prompt
/// size is not tracked mid-loop. A placeholder estimate, deliberately named
/// so callers can see what they are paying for.
pub const APPROX_INPUT_CHARS: usize = 100;

/// Character-count token estimator: one token per four characters, rounded up.
pub fn estimate_tokens(char_length: usize) -> usize {
    (char_length + 3) / 4
}

/// Prices message volume against a [`PricingTable`].
#[derive(Clone, Debug, Default)]
pub struct CostMeter {
    table: PricingTable,
}

impl CostMeter {
    pub fn new(table: PricingTable) -> Self {
        Self { table }
    }

    /// Credit cost of `message_count` messages and `token_count` tokens for
    /// the given model, or `None` when no pricing row resolves.
    ///
    /// `cost = ceil(message_cost + token_cost)`, with the token cost charged
    /// per full or partial 1000-token bucket.
    pub fn price_of(
        &self,
        provider: Provider,
        model: &str,
        message_count: usize,
        token_count: usize,
    ) -> Option<u64> {
        let price = self.table.lookup(provider, model)?;
        let buckets = (token_count + 999) / 1000;
        let cost = message_count as f64 * price.cost_per_message
            + buckets as f64 * price.cost_per_1k_tokens;
        Some(cost.ceil() as u64)
    }

    /// Cost of one generated assistant turn: one message plus the estimated
    /// tokens of the reply and the approximate input context.
    pub fn turn_cost(&self, provider: Provider, model: &str, reply_chars: usize) -> Option<u64> {
        let tokens = estimate_tokens(APPROX_INPUT_CHARS + reply_chars);
        self.price_of(provider, model, 1, tokens)
    }
}

/// Context recorded alongside a debit.
#[derive(Clone, Debug)]
pub struct DebitMetadata {
    pub conversation_id: String,
    pub agent_id: Option<String>,
    pub model: String,
}

/// A recorded balance movement. `amount` is negative for usage.
#[derive(Clone, Debug)]
pub struct CreditTransaction {
    pub user_id: String,
    pub amount: i64,
    pub reason: String,
    pub metadata: DebitMetadata,
    pub balance_after: i64,
    pub timestamp: DateTime<Utc>,
}

/// Result of a debit request.
#[derive(Clone, Debug)]
pub enum DebitOutcome {
    /// The debit was applied atomically; the transaction records the new balance.
    Applied(CreditTransaction),
    /// The balance could not cover the amount. Nothing was written.
    InsufficientFunds { balance: i64 },
}

/// Balance storage consumed by the workflow.
///
/// Implementations must make `debit` atomic with respect to the
/// read-check-write of a single user's balance (concurrent conversations for
/// one user must not race past each other and overspend), and must never let
/// a balance go negative.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Current balance for `user_id`; unknown users have a zero balance.
    async fn balance(&self, user_id: &str) -> i64;

    /// Atomically deduct `amount` credits, recording a transaction.
    async fn debit(
        &self,
        user_id: &str,
        amount: u64,
        reason: &str,
        metadata: DebitMetadata,
    ) -> DebitOutcome;
}

#[derive(Default)]
struct MemoryBalances {
    balances: HashMap<String, i64>,
    transactions: Vec<CreditTransaction>,
}

/// In-memory [`BalanceStore`] for tests and embedders without a database.
/// A single async mutex serializes all debits, which makes the
/// read-check-write atomic.
#[derive(Default)]
pub struct MemoryBalanceStore {
    inner: Mutex<MemoryBalances>,
}

impl MemoryBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit a user's balance (e.g. to fund an account in a test).
    pub async fn deposit(&self, user_id: &str, amount: u64) {
        let mut inner = self.inner.lock().await;
        *inner.balances.entry(user_id.to_string()).or_insert(0) += amount as i64;
    }

    /// All transactions recorded so far, oldest first.
    pub async fn transactions(&self) -> Vec<CreditTransaction> {
        self.inner.lock().await.transactions.clone()
    }
}

#[async_trait]
impl BalanceStore for MemoryBalanceStore {
    async fn balance(&self, user_id: &str) -> i64 {
        *self.inner.lock().await.balances.get(user_id).unwrap_or(&0)
    }

    async fn debit(
        &self,
        user_id: &str,
        amount: u64,
        reason: &str,
        metadata: DebitMetadata,
    ) -> DebitOutcome {
        let mut inner = self.inner.lock().await;
        let balance = *inner.balances.get(user_id).unwrap_or(&0);
        let amount = amount as i64;
        if balance < amount {
            return DebitOutcome::InsufficientFunds { balance };
        }

        let balance_after = balance - amount;
        inner.balances.insert(user_id.to_string(), balance_after);
        let transaction = CreditTransaction {
            user_id: user_id.to_string(),
            amount: -amount,
            reason: reason.to_string(),
            metadata,
            balance_after,
            timestamp: Utc::now(),
        };
        inner.transactions.push(transaction.clone());
        DebitOutcome::Applied(transaction)
    }
}
