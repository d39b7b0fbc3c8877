//! Scripted in-process leader for integration tests.

use replication_applier::error::Result;
use replication_applier::leader::{
    BoxFuture, LeaderConnection, LeaderState, OpenTransactions, TailBatch, TailParams,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A leader that replays a script of tail batches.
///
/// Once the script is exhausted it reports an idle log: an empty batch
/// whose head equals the configured head tick. Requests are recorded for
/// assertions.
pub struct MockLeader {
    server_id: String,
    head: Mutex<u64>,
    state_failures: Mutex<u32>,
    open_transactions: Mutex<OpenTransactions>,
    batches: Mutex<VecDeque<Result<TailBatch>>>,
    tail_requests: Mutex<Vec<TailParams>>,
}

impl MockLeader {
    pub fn new(server_id: &str) -> Arc<Self> {
        Arc::new(Self {
            server_id: server_id.to_string(),
            head: Mutex::new(0),
            state_failures: Mutex::new(0),
            open_transactions: Mutex::new(OpenTransactions {
                transactions: Vec::new(),
                last_tick: 0,
                from_present: true,
            }),
            batches: Mutex::new(VecDeque::new()),
            tail_requests: Mutex::new(Vec::new()),
        })
    }

    /// Set the leader's reported log head.
    pub fn set_head(&self, tick: u64) {
        *self.head.lock().unwrap() = tick;
    }

    /// Make the next `n` leader-state requests fail with a transport
    /// error.
    pub fn fail_state_requests(&self, n: u32) {
        *self.state_failures.lock().unwrap() = n;
    }

    /// Configure the open-transactions response.
    pub fn set_open_transactions(&self, ids: &[u64], last_tick: u64, from_present: bool) {
        *self.open_transactions.lock().unwrap() = OpenTransactions {
            transactions: ids.to_vec(),
            last_tick,
            from_present,
        };
    }

    /// Queue a tail batch; the head advances to cover it.
    pub fn push_batch(&self, batch: TailBatch) {
        {
            let mut head = self.head.lock().unwrap();
            if batch.last_tick > *head {
                *head = batch.last_tick;
            }
        }
        self.batches.lock().unwrap().push_back(Ok(batch));
    }

    /// Queue a tail failure.
    pub fn push_error(&self, err: replication_applier::ApplierError) {
        self.batches.lock().unwrap().push_back(Err(err));
    }

    /// Every tail request seen so far.
    pub fn tail_requests(&self) -> Vec<TailParams> {
        self.tail_requests.lock().unwrap().clone()
    }

    fn idle_batch(&self) -> TailBatch {
        let head = *self.head.lock().unwrap();
        TailBatch {
            entries: Vec::new(),
            check_more: false,
            from_present: true,
            last_included_tick: 0,
            last_scanned_tick: Some(head),
            last_tick: head,
        }
    }
}

impl LeaderConnection for MockLeader {
    fn get_state(&self) -> BoxFuture<'_, LeaderState> {
        let result = {
            let mut failures = self.state_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                Err(replication_applier::ApplierError::no_response(
                    "leader-state",
                    "connection refused",
                ))
            } else {
                Ok(LeaderState {
                    server_id: self.server_id.clone(),
                    last_log_tick: *self.head.lock().unwrap(),
                })
            }
        };
        Box::pin(async move { result })
    }

    fn fetch_tail(&self, params: TailParams) -> BoxFuture<'_, TailBatch> {
        self.tail_requests.lock().unwrap().push(params);
        let next = self
            .batches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.idle_batch()));
        Box::pin(async move { next })
    }

    fn fetch_open_transactions(&self, _from: u64, _to: u64) -> BoxFuture<'_, OpenTransactions> {
        let response = self.open_transactions.lock().unwrap().clone();
        Box::pin(async move { Ok(response) })
    }
}
