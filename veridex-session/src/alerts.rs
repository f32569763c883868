//! Spending-threshold alerts and high-value approvals.
//!
//! The bus tracks, per session, which fractions of the daily cap have
//! already fired an alert. Each threshold latches after firing so a
//! crossing alerts exactly once; the only re-arm path is the hysteresis
//! reset when spending falls back below 10% of the cap (e.g. after a
//! window rollover). Delivery to subscribers is synchronous best-effort.

use alloy_primitives::B256;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use veridex::clock::Clock;
use veridex::timestamp::UnixTimestamp;
use veridex::usd::Usd;

/// Default alert thresholds, as fractions of the daily cap.
pub const DEFAULT_THRESHOLDS: [f64; 4] = [0.5, 0.8, 0.9, 1.0];

/// Thresholds at or above this fraction fire as critical.
const CRITICAL_FRACTION_BPS: u32 = 9_000;

/// Spending below this fraction of the cap re-arms all thresholds.
const HYSTERESIS_RESET_BPS: u32 = 1_000;

/// Default high-value threshold.
pub const DEFAULT_HIGH_VALUE_THRESHOLD: Usd = Usd::from_dollars(1_000);

/// Seconds a pending approval stays actionable.
pub const APPROVAL_WINDOW_SECS: u64 = 5 * 60;

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Informational: spending is approaching the cap.
    Warning,
    /// Action needed: the cap is (nearly) reached or a high-value
    /// transaction wants approval.
    Critical,
}

/// A spending alert delivered to subscribers.
#[derive(Debug, Clone)]
pub struct Alert {
    /// Severity of the alert.
    pub severity: Severity,
    /// Human-readable reason.
    pub reason: String,
    /// Session the alert concerns.
    pub session_key_hash: B256,
    /// Spending inside the current daily window.
    pub daily_spent: Usd,
    /// The session's daily cap.
    pub daily_cap: Usd,
    /// When the alert fired.
    pub timestamp: UnixTimestamp,
}

/// A pending or decided high-value approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    /// The transaction awaiting approval.
    pub transaction_id: String,
    /// Amount of the transaction.
    pub amount: Usd,
    /// When the approval was requested.
    pub requested_at: UnixTimestamp,
    /// When the request lapses.
    pub expires_at: UnixTimestamp,
    /// Whether the transaction was approved.
    pub approved: bool,
    /// Who approved it, when decided.
    pub approved_by: Option<String>,
}

/// Read-only approval status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalStatus {
    /// Whether the transaction was approved in time.
    pub approved: bool,
    /// Whether the approval window has lapsed.
    pub expired: bool,
}

type Subscriber = Box<dyn Fn(&Alert) + Send + Sync>;

/// Threshold tracking, approvals, and subscriber fan-out.
pub struct AlertBus {
    thresholds_bps: Vec<u32>,
    high_value_threshold: Usd,
    latches: DashMap<B256, BTreeSet<u32>>,
    approvals: DashMap<String, Approval>,
    subscribers: RwLock<Vec<Subscriber>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AlertBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertBus")
            .field("thresholds_bps", &self.thresholds_bps)
            .field("high_value_threshold", &self.high_value_threshold)
            .finish_non_exhaustive()
    }
}

impl AlertBus {
    /// Creates a bus with the default thresholds.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            thresholds_bps: DEFAULT_THRESHOLDS
                .iter()
                .map(|t| fraction_to_bps(*t))
                .collect(),
            high_value_threshold: DEFAULT_HIGH_VALUE_THRESHOLD,
            latches: DashMap::new(),
            approvals: DashMap::new(),
            subscribers: RwLock::new(Vec::new()),
            clock,
        }
    }

    /// Replaces the alert thresholds (fractions of the daily cap).
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: &[f64]) -> Self {
        let mut bps: Vec<u32> = thresholds.iter().map(|t| fraction_to_bps(*t)).collect();
        bps.sort_unstable();
        self.thresholds_bps = bps;
        self
    }

    /// Replaces the high-value threshold.
    #[must_use]
    pub const fn with_high_value_threshold(mut self, threshold: Usd) -> Self {
        self.high_value_threshold = threshold;
        self
    }

    /// Registers a subscriber. Delivery is synchronous best-effort.
    pub fn subscribe<F: Fn(&Alert) + Send + Sync + 'static>(&self, subscriber: F) {
        self.subscribers
            .write()
            .expect("subscriber lock poisoned")
            .push(Box::new(subscriber));
    }

    /// Feeds a spending update for a session.
    ///
    /// Fires one alert per threshold newly crossed, latching each. When
    /// spending falls below 10% of the cap, all latches clear — the only
    /// re-arm path.
    pub fn on_spending(&self, session_key_hash: B256, daily_spent: Usd, daily_cap: Usd) {
        if !daily_cap.is_positive() {
            return;
        }
        let ratio_bps = spend_ratio_bps(daily_spent, daily_cap);

        // The whole read-check-latch sequence runs under the entry lock.
        let mut latched = self.latches.entry(session_key_hash).or_default();
        if ratio_bps < HYSTERESIS_RESET_BPS {
            latched.clear();
            return;
        }
        let mut fired = Vec::new();
        for &threshold in &self.thresholds_bps {
            if ratio_bps >= threshold && latched.insert(threshold) {
                fired.push(threshold);
            }
        }
        drop(latched);

        for threshold in fired {
            let severity = if threshold >= CRITICAL_FRACTION_BPS {
                Severity::Critical
            } else {
                Severity::Warning
            };
            self.emit(Alert {
                severity,
                reason: format!(
                    "daily spending crossed {}% of cap",
                    threshold / 100
                ),
                session_key_hash,
                daily_spent,
                daily_cap,
                timestamp: self.clock.now(),
            });
        }
    }

    /// Returns whether `amount` is high-value and needs approval.
    #[must_use]
    pub fn is_high_value(&self, amount: Usd) -> bool {
        amount >= self.high_value_threshold
    }

    /// Records a pending approval for a high-value transaction.
    ///
    /// The request lapses after five minutes and a critical alert is
    /// emitted immediately.
    pub fn request_approval(
        &self,
        transaction_id: &str,
        amount: Usd,
        session_key_hash: B256,
    ) -> Approval {
        let now = self.clock.now();
        let approval = Approval {
            transaction_id: transaction_id.to_owned(),
            amount,
            requested_at: now,
            expires_at: now + APPROVAL_WINDOW_SECS,
            approved: false,
            approved_by: None,
        };
        self.approvals
            .insert(transaction_id.to_owned(), approval.clone());
        self.emit(Alert {
            severity: Severity::Critical,
            reason: format!("high-value transaction {transaction_id} awaits approval"),
            session_key_hash,
            daily_spent: amount,
            daily_cap: self.high_value_threshold,
            timestamp: now,
        });
        approval
    }

    /// Approves a pending transaction.
    ///
    /// Succeeds only while the approval window is open; stale requests
    /// are evicted. Returns whether approval took effect.
    pub fn approve(&self, transaction_id: &str, approver_key: &str) -> bool {
        let now = self.clock.now();
        match self.approvals.get_mut(transaction_id) {
            Some(mut approval) if now < approval.expires_at => {
                approval.approved = true;
                approval.approved_by = Some(approver_key.to_owned());
                true
            }
            Some(_) => {
                drop(self.approvals.remove(transaction_id));
                false
            }
            None => false,
        }
    }

    /// Reads an approval's status, evicting it when lapsed.
    #[must_use]
    pub fn check_approval(&self, transaction_id: &str) -> ApprovalStatus {
        let now = self.clock.now();
        match self.approvals.get(transaction_id) {
            Some(approval) if now < approval.expires_at => ApprovalStatus {
                approved: approval.approved,
                expired: false,
            },
            Some(_) => {
                drop(self.approvals.remove(transaction_id));
                ApprovalStatus {
                    approved: false,
                    expired: true,
                }
            }
            None => ApprovalStatus {
                approved: false,
                expired: true,
            },
        }
    }

    /// Evicts every lapsed approval. Returns the number removed.
    pub fn sweep_expired_approvals(&self) -> usize {
        let now = self.clock.now();
        let before = self.approvals.len();
        self.approvals.retain(|_, approval| now < approval.expires_at);
        before - self.approvals.len()
    }

    fn emit(&self, alert: Alert) {
        let subscribers = self.subscribers.read().expect("subscriber lock poisoned");
        for subscriber in subscribers.iter() {
            subscriber(&alert);
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn fraction_to_bps(fraction: f64) -> u32 {
    (fraction * 10_000.0).round() as u32
}

/// Integer spend ratio in basis points; saturates at `u32::MAX`.
fn spend_ratio_bps(daily_spent: Usd, daily_cap: Usd) -> u32 {
    let spent = i128::from(daily_spent.as_micros()).max(0);
    let cap = i128::from(daily_cap.as_micros());
    u32::try_from(spent.saturating_mul(10_000) / cap).unwrap_or(u32::MAX)
}
