//! Scan dispatch
//!
//! Scan events are partitioned by identifier over a fixed set of worker
//! loops. Events for one identifier are always handled by the same worker, in
//! arrival order; different identifiers proceed in parallel. Partition queues
//! are unbounded so a stalled worker never holds up the dispatch loop.

use parkgate_api::Lane;
use parkgate_host_api::ScanEvent;
use std::hash::{DefaultHasher, Hash, Hasher};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::{EntryRecorder, EntryRequest, ExitOrchestrator, ExitRequest, SessionMatcher};

/// Worker index for a raw token.
///
/// Hashes the normalized form so that "abc123" and "ABC123 " land on the
/// same worker. Malformed tokens hash like any other text and are rejected by
/// the worker.
pub fn partition_for(raw_token: &str, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    SessionMatcher::normalize(raw_token).hash(&mut hasher);
    (hasher.finish() % partitions.max(1) as u64) as usize
}

/// Fans scan events out to per-partition worker loops
pub struct ScanDispatcher {
    entry: EntryRecorder,
    exit: ExitOrchestrator,
    partitions: usize,
}

impl ScanDispatcher {
    pub fn new(entry: EntryRecorder, exit: ExitOrchestrator, partitions: usize) -> Self {
        Self {
            entry,
            exit,
            partitions: partitions.max(1),
        }
    }

    /// Consume `scans` until it closes or `shutdown` flips to true, then let
    /// workers drain their queues.
    pub async fn run(
        self,
        mut scans: mpsc::UnboundedReceiver<ScanEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut workers = JoinSet::new();
        let mut queues = Vec::with_capacity(self.partitions);

        for index in 0..self.partitions {
            let (tx, rx) = mpsc::unbounded_channel();
            queues.push(tx);
            workers.spawn(worker_loop(index, rx, self.entry.clone(), self.exit.clone()));
        }

        info!(partitions = self.partitions, "Scan dispatcher started");

        loop {
            tokio::select! {
                scan = scans.recv() => {
                    let Some(scan) = scan else {
                        debug!("Scan source closed");
                        break;
                    };
                    let index = partition_for(&scan.raw_token, self.partitions);
                    if queues[index].send(scan).is_err() {
                        warn!(partition = index, "Scan worker gone, dropping scan");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        drop(queues);
        while workers.join_next().await.is_some() {}
        info!("Scan dispatcher stopped");
    }
}

async fn worker_loop(
    index: usize,
    mut rx: mpsc::UnboundedReceiver<ScanEvent>,
    entry: EntryRecorder,
    exit: ExitOrchestrator,
) {
    debug!(partition = index, "Scan worker started");

    while let Some(scan) = rx.recv().await {
        match scan.lane {
            Lane::Entry => {
                let request = EntryRequest {
                    raw_token: scan.raw_token,
                    vehicle_type_id: scan.vehicle_type_id,
                    caller: scan.caller,
                };
                // Failures are already logged and audited by the recorder
                let _ = entry.record_entry(request).await;
            }
            Lane::Exit => {
                let request = ExitRequest {
                    raw_token: scan.raw_token,
                    payment_method_id: scan.payment_method_id,
                    caller: scan.caller,
                };
                let _ = exit.process_exit(request).await;
            }
        }
    }

    debug!(partition = index, "Scan worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_is_stable_and_in_range() {
        for token in ["ABC123", "51F-12345", "x", "", "  weird token  "] {
            let p = partition_for(token, 8);
            assert!(p < 8);
            assert_eq!(p, partition_for(token, 8));
        }
    }

    #[test]
    fn partition_uses_normalized_token() {
        assert_eq!(partition_for("abc123", 16), partition_for("  ABC123\n", 16));
    }

    #[test]
    fn single_partition() {
        assert_eq!(partition_for("ANY", 1), 0);
        assert_eq!(partition_for("ANY", 0), 0);
    }
}
