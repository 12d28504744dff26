use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use log::info;
use rand::Rng;

use super::error::{TallyResult, WorkError};
use super::messages::Keyed;

/// One row handed to a sink.
pub type Record = BTreeMap<String, String>;

/// A vote to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    /// Unix epoch milliseconds
    pub timestamp: u64,
    pub voter_id: u64,
    pub howler: String,
}

impl Vote {
    pub fn new(timestamp: u64, voter_id: u64, howler: impl Into<String>) -> Self {
        Vote {
            timestamp,
            voter_id,
            howler: howler.into(),
        }
    }

    /// A vote cast right now.
    pub fn now(voter_id: u64, howler: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Vote::new(timestamp, voter_id, howler)
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("timestamp".to_string(), self.timestamp.to_string());
        record.insert("voteId".to_string(), self.voter_id.to_string());
        record.insert("howler".to_string(), self.howler.clone());
        record
    }
}

impl Keyed for Vote {
    fn key(&self) -> &str {
        &self.howler
    }
}

/// Somewhere records end up. Implementations may fail any call.
#[cfg_attr(test, mockall::automock)]
pub trait Sink: Send + Sync {
    fn insert(&self, records: &[Record]) -> TallyResult<()>;
}

/// In-memory sink that rejects a write with probability `failure_rate`,
/// whatever is being written.
#[derive(Debug)]
pub struct UnreliableSink {
    url: String,
    failure_rate: f64,
    records: Mutex<Vec<Record>>,
}

impl UnreliableSink {
    pub fn new(url: impl Into<String>, failure_rate: f64) -> Self {
        UnreliableSink {
            url: url.into(),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Everything written so far.
    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl Sink for UnreliableSink {
    fn insert(&self, records: &[Record]) -> TallyResult<()> {
        if rand::thread_rng().gen_bool(self.failure_rate) {
            return Err(WorkError::Sink {
                reason: format!("{} IO Error", self.url),
            });
        }
        let mut stored = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        stored.extend(records.iter().cloned());
        info!(sink = self.url.as_str(); "Stored {} record(s)", records.len());
        Ok(())
    }
}
