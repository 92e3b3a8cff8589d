use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, warn};

use crate::capability;
use crate::config::Config;
use crate::keyvault::{KeyVault, SigningContext};
use crate::lock::LockMode;
use crate::manager::SharedState;
use crate::{Capability, Result, RowID, TransactionID};

/// One queued unit of work. Waiting callers attach a bounded reply
/// channel; fire-and-forget jobs carry none and their outcome is only
/// logged.
pub(crate) enum Job {
    Shared {
        transaction_id: TransactionID,
        row_id: RowID,
        reply: Option<Sender<Result<Capability>>>,
    },
    Exclusive {
        transaction_id: TransactionID,
        row_id: RowID,
        reply: Option<Sender<Result<Capability>>>,
    },
    Unlock {
        transaction_id: TransactionID,
        row_id: RowID,
        reply: Option<Sender<Result<()>>>,
    },
    Register {
        transaction_id: TransactionID,
        lock_budget: u32,
        reply: Sender<Result<()>>,
    },
    Quit,
}

/// Fixed pool of worker threads, each draining its own channel. Row jobs
/// are routed by `route`; the registration worker only ever sees
/// `Register` (and `Quit`) jobs.
pub(crate) struct WorkerPool {
    senders: Vec<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
    tx_thread_id: usize,
    num_threads: usize,
    bucket_count: usize,
}

impl WorkerPool {
    pub fn start(config: &Config, state: Arc<SharedState>, vault: &KeyVault) -> WorkerPool {
        let mut senders = Vec::with_capacity(config.num_threads);
        let mut handles = Vec::with_capacity(config.num_threads);
        for worker_id in 0..config.num_threads {
            let (sender, receiver) = crossbeam_channel::unbounded();
            let state = state.clone();
            let context = vault.signing_context();
            let registration = worker_id == config.tx_thread_id;
            let handle = thread::Builder::new()
                .name(format!("lock worker {}", worker_id))
                .spawn(move || worker_main(worker_id, registration, receiver, state, context))
                .unwrap();
            senders.push(sender);
            handles.push(handle);
        }
        WorkerPool {
            senders,
            handles,
            tx_thread_id: config.tx_thread_id,
            num_threads: config.num_threads,
            bucket_count: config.lock_table_size,
        }
    }

    /// The worker owning `row_id`'s bucket slice.
    pub fn route(&self, row_id: RowID) -> usize {
        route_row(
            row_id,
            self.bucket_count,
            self.num_threads,
            self.tx_thread_id,
        )
    }

    pub fn submit(&self, worker_id: usize, job: Job) {
        if self.senders[worker_id].send(job).is_err() {
            warn!("worker {} is gone, dropping job", worker_id);
        }
    }

    pub fn submit_registration(&self, job: Job) {
        self.submit(self.tx_thread_id, job);
    }

    /// Broadcasts `Quit` and joins every worker. Idempotent.
    pub fn shutdown(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        debug!("sending QUIT to all workers");
        for sender in &self.senders {
            let _ = sender.send(Job::Quit);
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Maps a row to a worker by its lock-table bucket. The float division
/// can round the last bucket onto the reserved registration worker, so
/// the result is clamped to the row workers; the candidate index is then
/// shifted around the reserved slot.
fn route_row(row_id: RowID, bucket_count: usize, num_threads: usize, tx_thread_id: usize) -> usize {
    let slice = bucket_count as f32 / (num_threads - 1) as f32;
    let candidate = ((row_id as usize % bucket_count) as f32 / slice) as usize;
    let candidate = candidate.min(num_threads - 2);
    if candidate >= tx_thread_id {
        candidate + 1
    } else {
        candidate
    }
}

fn worker_main(
    worker_id: usize,
    registration: bool,
    receiver: Receiver<Job>,
    state: Arc<SharedState>,
    context: SigningContext,
) {
    debug!("worker {} waiting for jobs", worker_id);
    while let Ok(job) = receiver.recv() {
        match job {
            Job::Quit => break,
            Job::Shared {
                transaction_id,
                row_id,
                reply,
            } => {
                if misrouted(worker_id, registration, false) {
                    continue;
                }
                debug!("(SHARED) TXID: {}, RID: {}", transaction_id, row_id);
                handle_lock(
                    &state,
                    &context,
                    transaction_id,
                    row_id,
                    LockMode::Shared,
                    reply,
                );
            }
            Job::Exclusive {
                transaction_id,
                row_id,
                reply,
            } => {
                if misrouted(worker_id, registration, false) {
                    continue;
                }
                debug!("(EXCLUSIVE) TXID: {}, RID: {}", transaction_id, row_id);
                handle_lock(
                    &state,
                    &context,
                    transaction_id,
                    row_id,
                    LockMode::Exclusive,
                    reply,
                );
            }
            Job::Unlock {
                transaction_id,
                row_id,
                reply,
            } => {
                if misrouted(worker_id, registration, false) {
                    continue;
                }
                debug!("(UNLOCK) TXID: {}, RID: {}", transaction_id, row_id);
                state.release(transaction_id, row_id);
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
            }
            Job::Register {
                transaction_id,
                lock_budget,
                reply,
            } => {
                if misrouted(worker_id, registration, true) {
                    continue;
                }
                debug!(
                    "registering transaction {} with budget {}",
                    transaction_id, lock_budget
                );
                let _ = reply.send(state.register(transaction_id, lock_budget));
            }
        }
    }
    debug!("worker {} quitting", worker_id);
}

/// A job on the wrong worker is dropped without a reply; the routing
/// layer never produces one.
fn misrouted(worker_id: usize, registration: bool, wants_registration: bool) -> bool {
    if registration != wants_registration {
        error!("worker {} received a misrouted job", worker_id);
        return true;
    }
    false
}

fn handle_lock(
    state: &SharedState,
    context: &SigningContext,
    transaction_id: TransactionID,
    row_id: RowID,
    mode: LockMode,
    reply: Option<Sender<Result<Capability>>>,
) {
    let result = state.acquire(transaction_id, row_id, mode).and_then(|granted| {
        let plaintext =
            capability::descriptor(transaction_id, row_id, granted, capability::block_timeout());
        let parts = context.sign(plaintext.as_bytes())?;
        Ok(capability::encode(&parts))
    });
    match reply {
        Some(reply) => {
            let _ = reply.send(result);
        }
        None => {
            if let Err(e) = result {
                debug!("detached lock request failed: {}", e);
            }
        }
    }
}
