//! Append-only payment record log.
//!
//! Every payment attempt that reaches the ledger leaves a record here.
//! Records are assigned a monotonically increasing id, persisted durably,
//! and never mutated or deleted. Failure to append is logged by callers
//! but never aborts a payment's happy path — the payment already
//! happened; a lost audit entry is a degraded-mode condition, not a
//! rollback trigger.

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use veridex::networks::ChainRef;
use veridex::timestamp::UnixTimestamp;
use veridex::usd::Usd;

use crate::store::StoreError;

/// Settlement status of a recorded payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Signed and sent; settlement unknown.
    Pending,
    /// Settled on-chain.
    Confirmed,
    /// Rejected or failed after signing.
    Failed,
}

/// Protocol a payment flowed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProtocol {
    /// HTTP 402 negotiation.
    X402,
    /// UCP handoff.
    Ucp,
    /// Agent-initiated direct authorization.
    Direct,
}

/// A payment attempt, as persisted in the audit log.
///
/// Bigint-valued fields (`amount`) are decimal strings so the JSON
/// export never loses precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    /// Unique, monotonically increasing record id.
    pub id: u64,
    /// When the record was appended.
    pub timestamp: UnixTimestamp,
    /// Session that made the payment.
    pub session_key_hash: B256,
    /// Recipient address.
    pub recipient: String,
    /// Amount in the token's smallest unit, as a decimal string.
    pub amount: String,
    /// Amount in USD as charged against the ledger.
    #[serde(rename = "amountUSD")]
    pub amount_usd: Usd,
    /// Token symbol or contract address.
    pub token: String,
    /// Internal chain id the payment targeted.
    pub chain_id: ChainRef,
    /// Settlement status.
    pub status: PaymentStatus,
    /// On-chain transaction hash, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Protocol the payment flowed through.
    pub protocol: PaymentProtocol,
}

/// A record as submitted by callers, before id and timestamp assignment.
#[derive(Debug, Clone)]
pub struct NewPaymentRecord {
    /// Session that made the payment.
    pub session_key_hash: B256,
    /// Recipient address.
    pub recipient: String,
    /// Amount in the token's smallest unit, as a decimal string.
    pub amount: String,
    /// Amount in USD as charged against the ledger.
    pub amount_usd: Usd,
    /// Token symbol or contract address.
    pub token: String,
    /// Internal chain id the payment targeted.
    pub chain_id: ChainRef,
    /// Settlement status.
    pub status: PaymentStatus,
    /// On-chain transaction hash, when known.
    pub tx_hash: Option<String>,
    /// Protocol the payment flowed through.
    pub protocol: PaymentProtocol,
}

/// Filter for [`AuditLog::query`].
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Only records on this chain.
    pub chain_id: Option<ChainRef>,
    /// Only records at or after this instant.
    pub start_time: Option<UnixTimestamp>,
    /// Only records at or before this instant.
    pub end_time: Option<UnixTimestamp>,
    /// Only records for this session.
    pub session_key_hash: Option<B256>,
    /// Maximum records returned. Defaults to 50.
    pub limit: Option<usize>,
    /// Records skipped from the newest end. Defaults to 0.
    pub offset: Option<usize>,
}

/// Default query limit.
pub const DEFAULT_QUERY_LIMIT: usize = 50;

/// Sled-backed append-only audit log.
///
/// Records are keyed by big-endian id so iteration order is append order.
#[derive(Debug)]
pub struct AuditLog {
    tree: sled::Tree,
    next_id: AtomicU64,
}

impl AuditLog {
    /// Opens or creates the log at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the database cannot be opened.
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(StoreError::storage)?;
        Self::from_db(&db)
    }

    /// Opens a throwaway log backed by a temporary database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the database cannot be created.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(StoreError::storage)?;
        Self::from_db(&db)
    }

    fn from_db(db: &sled::Db) -> Result<Self, StoreError> {
        let tree = db
            .open_tree("payments")
            .map_err(StoreError::storage)?;
        let next_id = tree
            .last()
            .map_err(StoreError::storage)?
            .map_or(0, |(key, _)| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&key);
                u64::from_be_bytes(bytes) + 1
            });
        Ok(Self {
            tree,
            next_id: AtomicU64::new(next_id),
        })
    }

    /// Appends a record, assigning its id and timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails. Callers log this
    /// and continue; an audit append never aborts a payment.
    pub async fn log(
        &self,
        record: NewPaymentRecord,
        now: UnixTimestamp,
    ) -> Result<PaymentRecord, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = PaymentRecord {
            id,
            timestamp: now,
            session_key_hash: record.session_key_hash,
            recipient: record.recipient,
            amount: record.amount,
            amount_usd: record.amount_usd,
            token: record.token,
            chain_id: record.chain_id,
            status: record.status,
            tx_hash: record.tx_hash,
            protocol: record.protocol,
        };
        let value = serde_json::to_vec(&record)
            .map_err(StoreError::storage)?;
        self.tree
            .insert(id.to_be_bytes(), value)
            .map_err(StoreError::storage)?;
        self.tree
            .flush_async()
            .await
            .map_err(StoreError::storage)?;
        Ok(record)
    }

    /// Returns matching records, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying scan fails.
    pub fn query(&self, filter: &AuditFilter) -> Result<Vec<PaymentRecord>, StoreError> {
        let limit = filter.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
        let offset = filter.offset.unwrap_or(0);
        let mut matched = Vec::new();
        // Newest first: ids are big-endian, so reverse iteration is
        // descending by timestamp assignment order.
        for entry in self.tree.iter().rev() {
            let (_, bytes) = entry
                .map_err(StoreError::storage)?;
            let record: PaymentRecord = serde_json::from_slice(&bytes)
                .map_err(StoreError::storage)?;
            if let Some(chain_id) = filter.chain_id
                && record.chain_id != chain_id
            {
                continue;
            }
            if let Some(start) = filter.start_time
                && record.timestamp < start
            {
                continue;
            }
            if let Some(end) = filter.end_time
                && record.timestamp > end
            {
                continue;
            }
            if let Some(session) = filter.session_key_hash
                && record.session_key_hash != session
            {
                continue;
            }
            matched.push(record);
            if matched.len() >= offset + limit {
                break;
            }
        }
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    /// Returns the number of records in the log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Returns whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

/// Exports records as a JSON array.
///
/// Bigint-valued fields are already decimal strings in the record shape,
/// so precision survives any JSON consumer.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn export_json(records: &[PaymentRecord]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(records)
}

/// Exports records as CSV with a header row.
///
/// Values containing commas or quotes are quoted.
#[must_use]
pub fn export_csv(records: &[PaymentRecord]) -> String {
    let mut out = String::from(
        "id,timestamp,sessionKeyHash,recipient,amount,amountUSD,token,chainId,status,txHash,protocol\n",
    );
    for record in records {
        let status = match record.status {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Failed => "failed",
        };
        let protocol = match record.protocol {
            PaymentProtocol::X402 => "x402",
            PaymentProtocol::Ucp => "ucp",
            PaymentProtocol::Direct => "direct",
        };
        let fields = [
            record.id.to_string(),
            record.timestamp.to_string(),
            record.session_key_hash.to_string(),
            csv_quote(&record.recipient),
            csv_quote(&record.amount),
            record.amount_usd.as_micros().to_string(),
            csv_quote(&record.token),
            record.chain_id.to_string(),
            status.to_owned(),
            record.tx_hash.as_deref().map(csv_quote).unwrap_or_default(),
            protocol.to_owned(),
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

fn csv_quote(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(session_byte: u8, chain_id: ChainRef) -> NewPaymentRecord {
        NewPaymentRecord {
            session_key_hash: B256::repeat_byte(session_byte),
            recipient: "0x0000000000000000000000000000000000000001".into(),
            amount: "1000000".into(),
            amount_usd: Usd::from_dollars(1),
            token: "USDC".into(),
            chain_id,
            status: PaymentStatus::Confirmed,
            tx_hash: Some("0xabc".into()),
            protocol: PaymentProtocol::X402,
        }
    }

    fn at(secs: u64) -> UnixTimestamp {
        UnixTimestamp::from_secs(secs)
    }

    #[tokio::test]
    async fn test_log_assigns_sequential_ids() {
        let log = AuditLog::temporary().unwrap();
        let a = log.log(sample(0x01, 30), at(100)).await.unwrap();
        let b = log.log(sample(0x01, 30), at(101)).await.unwrap();
        assert_eq!(a.id, 0);
        assert_eq!(b.id, 1);
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn test_query_newest_first_with_limit_offset() {
        let log = AuditLog::temporary().unwrap();
        for i in 0..5 {
            log.log(sample(0x01, 30), at(100 + i)).await.unwrap();
        }
        let filter = AuditFilter {
            limit: Some(2),
            offset: Some(1),
            ..AuditFilter::default()
        };
        let records = log.query(&filter).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp, at(103));
        assert_eq!(records[1].timestamp, at(102));
    }

    #[tokio::test]
    async fn test_query_filters() {
        let log = AuditLog::temporary().unwrap();
        log.log(sample(0x01, 30), at(100)).await.unwrap();
        log.log(sample(0x02, 30), at(200)).await.unwrap();
        log.log(sample(0x01, 1), at(300)).await.unwrap();

        let by_chain = log
            .query(&AuditFilter {
                chain_id: Some(30),
                ..AuditFilter::default()
            })
            .unwrap();
        assert_eq!(by_chain.len(), 2);

        let by_session = log
            .query(&AuditFilter {
                session_key_hash: Some(B256::repeat_byte(0x01)),
                ..AuditFilter::default()
            })
            .unwrap();
        assert_eq!(by_session.len(), 2);

        let by_window = log
            .query(&AuditFilter {
                start_time: Some(at(150)),
                end_time: Some(at(250)),
                ..AuditFilter::default()
            })
            .unwrap();
        assert_eq!(by_window.len(), 1);
        assert_eq!(by_window[0].timestamp, at(200));
    }

    #[tokio::test]
    async fn test_ids_resume_after_reopen() {
        let dir = std::env::temp_dir().join(format!("veridex-audit-{}", std::process::id()));
        {
            let log = AuditLog::open(&dir).unwrap();
            log.log(sample(0x01, 30), at(100)).await.unwrap();
        }
        {
            let log = AuditLog::open(&dir).unwrap();
            let record = log.log(sample(0x01, 30), at(101)).await.unwrap();
            assert_eq!(record.id, 1);
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_export_json_preserves_amount_strings() {
        let log = AuditLog::temporary().unwrap();
        let mut record = sample(0x01, 30);
        // A value past 2^53, unrepresentable as a JS number.
        record.amount = "123456789012345678901234567890".into();
        log.log(record, at(100)).await.unwrap();

        let records = log.query(&AuditFilter::default()).unwrap();
        let json = export_json(&records).unwrap();
        assert!(json.contains("\"123456789012345678901234567890\""));
    }

    #[tokio::test]
    async fn test_export_csv_quotes_commas() {
        let log = AuditLog::temporary().unwrap();
        let mut record = sample(0x01, 30);
        record.recipient = "acme, inc".into();
        log.log(record, at(100)).await.unwrap();

        let records = log.query(&AuditFilter::default()).unwrap();
        let csv = export_csv(&records);
        assert!(csv.contains("\"acme, inc\""));
        let header = csv.lines().next().unwrap();
        assert!(header.starts_with("id,timestamp,"));
    }
}
