//! In-memory transfer ledger.

use std::collections::BTreeMap;

use async_trait::async_trait;
use courier_core::error::TransportError;
use courier_core::traits::{LedgerService, TransferLookup};
use courier_core::transfer::{
    AcceptSubmission, CancelSubmission, LegReceipt, SendReceipt, SendSubmission, TransferRecord,
};
use parking_lot::Mutex;

/// Timestamp of the first ledger write; each write advances it a minute.
pub const LEDGER_EPOCH: u64 = 1_700_000_000;

struct State {
    records: BTreeMap<String, TransferRecord>,
    issued: u64,
    clock: u64,
    failing_sends: u32,
    failing_legs: u32,
}

impl State {
    fn tick(&mut self) -> u64 {
        self.clock += 60;
        self.clock
    }

    fn find(&mut self, lookup: &TransferLookup) -> Option<&mut TransferRecord> {
        match lookup {
            TransferLookup::TransferId(id) => self.records.get_mut(id),
            TransferLookup::ReceivingId(id) => self
                .records
                .values_mut()
                .find(|r| r.receiving_id.as_deref() == Some(id.as_str())),
        }
    }

    fn take_leg_failure(&mut self) -> Result<(), TransportError> {
        if self.failing_legs > 0 {
            self.failing_legs -= 1;
            return Err(TransportError::Status {
                status: 503,
                body: "ledger unavailable".into(),
            });
        }
        Ok(())
    }
}

fn conflict(id: &str) -> TransportError {
    TransportError::Status {
        status: 409,
        body: format!("transfer {id} already settled"),
    }
}

pub struct MemoryLedger {
    state: Mutex<State>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                records: BTreeMap::new(),
                issued: 0,
                clock: LEDGER_EPOCH - 60,
                failing_sends: 0,
                failing_legs: 0,
            }),
        }
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` send notifications.
    pub fn fail_next_sends(&self, n: u32) {
        self.state.lock().failing_sends = n;
    }

    /// Reject the next `n` accept or cancel notifications.
    pub fn fail_next_legs(&self, n: u32) {
        self.state.lock().failing_legs = n;
    }

    pub fn record(&self, transfer_id: &str) -> Option<TransferRecord> {
        self.state.lock().records.get(transfer_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LedgerService for MemoryLedger {
    async fn submit_send(&self, submission: &SendSubmission) -> Result<SendReceipt, TransportError> {
        let mut state = self.state.lock();
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(TransportError::Status {
                status: 503,
                body: "ledger unavailable".into(),
            });
        }
        state.issued += 1;
        let transfer_id = format!("t-{}", state.issued);
        let receiving_id = format!("r-{}", state.issued);
        let send_timestamp = state.tick();
        state.records.insert(
            transfer_id.clone(),
            TransferRecord {
                transfer_id: transfer_id.clone(),
                receiving_id: Some(receiving_id.clone()),
                sender: submission.sender.clone(),
                destination: submission.destination.clone(),
                transfer_amount: submission.transfer_amount.clone(),
                crypto_type: submission.crypto_type.clone(),
                send_tx_hashes: submission.send_tx_hashes.clone(),
                receive_tx_hash: None,
                cancel_tx_hash: None,
                send_timestamp: Some(send_timestamp),
                receive_timestamp: None,
                cancel_timestamp: None,
                send_tx_state: Some("pending".into()),
                receive_tx_state: None,
                cancel_tx_state: None,
                encrypted_escrow: submission.encrypted_escrow.clone(),
                password: None,
            },
        );
        Ok(SendReceipt {
            transfer_id,
            receiving_id: Some(receiving_id),
            send_timestamp,
        })
    }

    async fn submit_accept(&self, submission: &AcceptSubmission) -> Result<LegReceipt, TransportError> {
        let mut state = self.state.lock();
        state.take_leg_failure()?;
        let timestamp = state.tick();
        let lookup = TransferLookup::ReceivingId(submission.receiving_id.clone());
        let record = state
            .find(&lookup)
            .ok_or_else(|| TransportError::NotFound(submission.receiving_id.clone()))?;
        if record.receive_tx_hash.is_some() || record.cancel_tx_hash.is_some() {
            return Err(conflict(&record.transfer_id));
        }
        record.receive_tx_hash = Some(submission.receive_tx_hash.clone());
        record.receive_timestamp = Some(timestamp);
        record.receive_tx_state = Some("pending".into());
        Ok(LegReceipt {
            transfer_id: record.transfer_id.clone(),
            tx_hash: submission.receive_tx_hash.clone(),
            timestamp,
        })
    }

    async fn submit_cancel(&self, submission: &CancelSubmission) -> Result<LegReceipt, TransportError> {
        let mut state = self.state.lock();
        state.take_leg_failure()?;
        let timestamp = state.tick();
        let lookup = TransferLookup::TransferId(submission.transfer_id.clone());
        let record = state
            .find(&lookup)
            .ok_or_else(|| TransportError::NotFound(submission.transfer_id.clone()))?;
        if record.receive_tx_hash.is_some() || record.cancel_tx_hash.is_some() {
            return Err(conflict(&record.transfer_id));
        }
        record.cancel_tx_hash = Some(submission.cancel_tx_hash.clone());
        record.cancel_timestamp = Some(timestamp);
        record.cancel_tx_state = Some("pending".into());
        Ok(LegReceipt {
            transfer_id: record.transfer_id.clone(),
            tx_hash: submission.cancel_tx_hash.clone(),
            timestamp,
        })
    }

    async fn get_transfer(&self, lookup: &TransferLookup) -> Result<TransferRecord, TransportError> {
        let mut state = self.state.lock();
        state.find(lookup).map(|r| r.clone()).ok_or_else(|| {
            TransportError::NotFound(match lookup {
                TransferLookup::TransferId(id) | TransferLookup::ReceivingId(id) => id.clone(),
            })
        })
    }
}
