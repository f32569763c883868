//! Pure spend-limit arithmetic.
//!
//! These functions are value-level: they take ledger state and a policy,
//! mutate nothing outside the state they are handed, and perform no I/O.
//! The [`manager`](crate::manager) owns committing updated state back to
//! the store under the session's lock.
//!
//! All amounts are integer microdollars; no floating point appears in any
//! limit decision.

use veridex::timestamp::{DAY_SECS, UnixTimestamp};
use veridex::usd::Usd;

use crate::session::{LedgerState, SessionPolicy};

/// The outcome of a limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The spend is allowed.
    Allow {
        /// USD remaining in the daily window after this spend.
        remaining: Usd,
    },
    /// The spend is refused.
    Deny {
        /// Why the spend was refused.
        reason: DenyReason,
        /// USD remaining in the daily window (unchanged by the refusal).
        remaining: Usd,
    },
}

impl Decision {
    /// Returns `true` for [`Decision::Allow`].
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

/// Why a spend was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The session has passed its expiry.
    Expired,
    /// The amount exceeds the per-transaction cap.
    PerTransactionLimit,
    /// The rolling daily cap would be exceeded.
    DailyLimit,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Expired => write!(f, "expired"),
            Self::PerTransactionLimit => write!(f, "per-transaction limit"),
            Self::DailyLimit => write!(f, "daily limit"),
        }
    }
}

/// Error from [`record`] when its pre-condition does not hold.
#[derive(Debug, Clone, thiserror::Error)]
#[error("record refused: {reason}")]
pub struct RecordError {
    /// The refusal that would have come from [`check`].
    pub reason: DenyReason,
    /// USD remaining in the daily window.
    pub remaining: Usd,
}

/// Advances the daily window if `now` has reached the reset instant.
///
/// Every read of the ledger goes through this first, so a decision is
/// never made against a stale window. A freshly created session expires
/// no later than its first reset instant, so the rollover is observed on
/// sessions restored from storage with a window opened in an earlier
/// run, and on expired-session reads, where the window still advances
/// before the expiry refusal.
pub fn advance_window(state: &mut LedgerState, now: UnixTimestamp) {
    if now >= state.daily_reset_at {
        state.daily_spent = Usd::ZERO;
        state.daily_reset_at = now + DAY_SECS;
    }
}

/// Checks whether `amount` may be spent at `now`.
///
/// Advances the daily window first, then applies the checks in a fixed
/// order: expiry, per-transaction cap, daily cap.
pub fn check(
    policy: &SessionPolicy,
    state: &mut LedgerState,
    amount: Usd,
    now: UnixTimestamp,
) -> Decision {
    advance_window(state, now);
    let remaining = policy.daily_cap.saturating_sub(state.daily_spent);
    if now >= policy.expires_at {
        return Decision::Deny {
            reason: DenyReason::Expired,
            remaining: Usd::ZERO,
        };
    }
    if amount > policy.per_tx_cap {
        return Decision::Deny {
            reason: DenyReason::PerTransactionLimit,
            remaining,
        };
    }
    let Some(new_daily) = state.daily_spent.checked_add(amount) else {
        return Decision::Deny {
            reason: DenyReason::DailyLimit,
            remaining,
        };
    };
    if new_daily > policy.daily_cap {
        return Decision::Deny {
            reason: DenyReason::DailyLimit,
            remaining,
        };
    }
    Decision::Allow {
        remaining: remaining.saturating_sub(amount),
    }
}

/// Records a spend of `amount` at `now`.
///
/// Pre-condition: the same `(state, amount, now)` would produce
/// [`Decision::Allow`] under [`check`]. The pre-condition is re-verified
/// here and the update is refused — never partially applied — when it
/// does not hold.
///
/// # Errors
///
/// Returns [`RecordError`] carrying the refusal when the pre-condition
/// fails.
pub fn record(
    policy: &SessionPolicy,
    state: &mut LedgerState,
    amount: Usd,
    now: UnixTimestamp,
) -> Result<(), RecordError> {
    match check(policy, state, amount, now) {
        Decision::Deny { reason, remaining } => Err(RecordError { reason, remaining }),
        Decision::Allow { .. } => {
            state.daily_spent = state
                .daily_spent
                .checked_add(amount)
                .ok_or(RecordError {
                    reason: DenyReason::DailyLimit,
                    remaining: Usd::ZERO,
                })?;
            state.total_spent = state.total_spent.checked_add(amount).ok_or(RecordError {
                reason: DenyReason::DailyLimit,
                remaining: Usd::ZERO,
            })?;
            state.transaction_count += 1;
            state.last_used_at = now;
            Ok(())
        }
    }
}
