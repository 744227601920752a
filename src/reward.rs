use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// A payout the game asks for after a perfect round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewardClaim {
    pub address: String,
    pub amount: u64,
    pub token: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardReceipt {
    pub tx_hash: String,
    pub amount: u64,
    pub token: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RewardError {
    #[error("invalid reward params")]
    InvalidParams,
    #[error("ledger i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger entry could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("reward request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("reward rejected: {0}")]
    Rejected(String),
}

pub trait RewardService {
    fn reward(
        &self,
        claim: &RewardClaim,
    ) -> impl Future<Output = Result<RewardReceipt, RewardError>> + Send;
}

/// Base58 alphabet of classic ledger addresses. No `0`, `O`, `I` or `l`.
const ADDRESS_ALPHABET: &str = "rpshnaf39wBUDNEGHJKLM4PQRST7VWXYZ2bcdeCg65jkm8oFqi1tuvAxyz";

/// Classic ledger address shape: `r` followed by base58 characters,
/// 25 to 35 in total.
pub fn is_valid_address(address: &str) -> bool {
    address.starts_with('r')
        && (25..=35).contains(&address.len())
        && address.chars().all(|c| ADDRESS_ALPHABET.contains(c))
}

fn validate(claim: &RewardClaim) -> Result<(), RewardError> {
    if claim.address.trim().is_empty() || claim.amount == 0 {
        return Err(RewardError::InvalidParams);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub to: String,
    pub amount: u64,
    pub token: String,
    #[serde(default)]
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Pretend ledger: every payout is appended to a JSON-lines file.
pub struct MockLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl MockLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn entries(&self) -> Result<Vec<LedgerEntry>, RewardError> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    debug!("Skipping malformed ledger line: {}", err);
                    None
                }
            })
            .collect())
    }

    pub async fn balance(&self, address: &str, token: &str) -> Result<u64, RewardError> {
        Ok(self
            .entries()
            .await?
            .iter()
            .filter(|e| e.to == address && e.token == token)
            .map(|e| e.amount)
            .sum())
    }

    /// Most recent first.
    pub async fn history(&self, address: &str, token: &str, limit: usize) -> Result<Vec<LedgerEntry>, RewardError> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .rev()
            .filter(|e| e.to == address && e.token == token)
            .take(limit)
            .collect())
    }
}

impl RewardService for MockLedger {
    async fn reward(&self, claim: &RewardClaim) -> Result<RewardReceipt, RewardError> {
        validate(claim)?;
        let entry = LedgerEntry {
            kind: "reward".to_string(),
            to: claim.address.clone(),
            amount: claim.amount,
            token: claim.token.clone(),
            reason: claim.reason.clone(),
            timestamp: Utc::now(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        {
            let _guard = self.write_lock.lock().await;
            if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir).await?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
        }

        let tx_hash = format!("mock-{}", entry.timestamp.timestamp_millis());
        info!("Mock reward {} {} to {} ({})", entry.amount, entry.token, entry.to, tx_hash);
        Ok(RewardReceipt {
            tx_hash,
            amount: entry.amount,
            token: entry.token,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RewardResponse {
    #[serde(default)]
    ok: bool,
    tx_hash: Option<String>,
    error: Option<String>,
}

/// Posts claims to a reward endpoint that answers `{ok, tx_hash, error}`.
pub struct HttpRewards {
    client: reqwest::Client,
    url: String,
}

impl HttpRewards {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: url.into(),
        }
    }
}

impl RewardService for HttpRewards {
    async fn reward(&self, claim: &RewardClaim) -> Result<RewardReceipt, RewardError> {
        validate(claim)?;
        let response = self
            .client
            .post(&self.url)
            .json(claim)
            .send()
            .await?;
        let status = response.status();
        let body: Option<RewardResponse> = response.json().await.ok();
        match body {
            Some(RewardResponse {
                ok: true, tx_hash, ..
            }) if status.is_success() => Ok(RewardReceipt {
                tx_hash: tx_hash.unwrap_or_default(),
                amount: claim.amount,
                token: claim.token.clone(),
            }),
            Some(RewardResponse { error: Some(error), .. }) => Err(RewardError::Rejected(error)),
            _ => Err(RewardError::Rejected(format!("status {}", status))),
        }
    }
}

/// The configured reward backend.
pub enum RewardBackend {
    Mock(MockLedger),
    Http(HttpRewards),
}

impl RewardBackend {
    pub fn ledger(&self) -> Option<&MockLedger> {
        match self {
            RewardBackend::Mock(ledger) => Some(ledger),
            RewardBackend::Http(_) => None,
        }
    }
}

impl RewardService for RewardBackend {
    async fn reward(&self, claim: &RewardClaim) -> Result<RewardReceipt, RewardError> {
        match self {
            RewardBackend::Mock(ledger) => ledger.reward(claim).await,
            RewardBackend::Http(http) => http.reward(claim).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "rPEPPER7kfTD9w2To4CQk6UCfuHM9c6GDY";
    const BOB: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";

    fn ledger_path(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        std::env::temp_dir().join(format!("ledger-{}-{}-{}.jsonl", name, std::process::id(), nanos))
    }

    fn claim(address: &str, amount: u64, token: &str) -> RewardClaim {
        RewardClaim {
            address: address.to_string(),
            amount,
            token: token.to_string(),
            reason: "perfect round at level 1".to_string(),
        }
    }

    #[test]
    fn address_shape_is_checked() {
        assert!(is_valid_address(ALICE));
        assert!(is_valid_address(BOB));
        assert!(!is_valid_address("xHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh"));
        assert!(!is_valid_address("rShort"));
        assert!(!is_valid_address("rHb9CJAWyB4rj91VRWn96Dkuk G4bwdtyT"));
        assert!(!is_valid_address(""));
        // Characters outside the base58 alphabet.
        assert!(!is_valid_address("rHb9CJAWyB4rj91VRWn96Dkuk0G4bwdtyTh"));
        assert!(!is_valid_address("rHb9CJAWyB4rj91VRWn96DkukOG4bwdtyTh"));
        assert!(!is_valid_address("rHb9CJAWyB4rj91VRWn96DkukIG4bwdtyTh"));
        assert!(!is_valid_address("rHb9CJAWyB4rj91VRWn96DkuklG4bwdtyTh"));
    }

    #[tokio::test]
    async fn mock_reward_appends_and_returns_a_synthetic_hash() {
        let path = ledger_path("append");
        let ledger = MockLedger::new(&path);
        let receipt = ledger.reward(&claim(ALICE, 5, "HUGS")).await.unwrap();
        assert!(receipt.tx_hash.starts_with("mock-"));
        assert_eq!(receipt.amount, 5);

        let history = ledger.history(ALICE, "HUGS", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, "reward");
        assert_eq!(history[0].reason, "perfect round at level 1");
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn balance_counts_only_matching_address_and_token() {
        let path = ledger_path("balance");
        let ledger = MockLedger::new(&path);
        ledger.reward(&claim(ALICE, 5, "HUGS")).await.unwrap();
        ledger.reward(&claim(ALICE, 5, "HUGS")).await.unwrap();
        ledger.reward(&claim(BOB, 5, "HUGS")).await.unwrap();
        ledger.reward(&claim(ALICE, 7, "XRP")).await.unwrap();

        assert_eq!(ledger.balance(ALICE, "HUGS").await.unwrap(), 10);
        assert_eq!(ledger.balance(BOB, "HUGS").await.unwrap(), 5);
        assert_eq!(ledger.history(ALICE, "HUGS", 1).await.unwrap().len(), 1);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let path = ledger_path("malformed");
        let ledger = MockLedger::new(&path);
        ledger.reward(&claim(ALICE, 5, "HUGS")).await.unwrap();
        let mut text = std::fs::read_to_string(&path).unwrap();
        text.push_str("{\"to\": \"half a line\n\n");
        std::fs::write(&path, text).unwrap();
        ledger.reward(&claim(ALICE, 5, "HUGS")).await.unwrap();

        assert_eq!(ledger.balance(ALICE, "HUGS").await.unwrap(), 10);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn missing_ledger_means_zero_balance() {
        let ledger = MockLedger::new(ledger_path("missing"));
        assert_eq!(ledger.balance(ALICE, "HUGS").await.unwrap(), 0);
        assert!(ledger.history(ALICE, "HUGS", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_claims_are_refused() {
        let ledger = MockLedger::new(ledger_path("invalid"));
        assert!(matches!(
            ledger.reward(&claim("  ", 5, "HUGS")).await,
            Err(RewardError::InvalidParams)
        ));
        assert!(matches!(
            ledger.reward(&claim(ALICE, 0, "HUGS")).await,
            Err(RewardError::InvalidParams)
        ));
    }
}
