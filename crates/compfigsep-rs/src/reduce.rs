//! Gathering per-worker prediction stores onto the coordinating worker.
//!
//! Every worker accumulates predictions privately. At evaluation time a
//! single collective [`Communicator::gather`] moves all stores to rank 0,
//! which folds them with [`merge`]. Other ranks get `None` back and stop.

use std::sync::{Arc, Barrier};

use crossbeam_channel::{Receiver, Sender};
use tracing::debug;

use crate::error::{Error, Result};
use crate::predictions::PredictionStore;

/// Rank of the coordinating worker.
pub const COORDINATOR: usize = 0;

/// A worker's view of the collective used at evaluation time.
pub trait Communicator: Send {
    fn rank(&self) -> usize;

    fn world_size(&self) -> usize;

    fn is_coordinator(&self) -> bool {
        self.rank() == COORDINATOR
    }

    /// Blocking gather of every worker's store. The coordinator receives all
    /// stores ordered by rank; every other worker receives `None`.
    fn gather(&self, local: PredictionStore) -> Result<Option<Vec<PredictionStore>>>;
}

/// Single-process communicator: the only worker is the coordinator.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCommunicator;

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        COORDINATOR
    }

    fn world_size(&self) -> usize {
        1
    }

    fn gather(&self, local: PredictionStore) -> Result<Option<Vec<PredictionStore>>> {
        Ok(Some(vec![local]))
    }
}

/// Communicator backed by a shared channel, for workers running as threads.
pub struct ChannelCommunicator {
    rank: usize,
    world_size: usize,
    sender: Sender<(usize, PredictionStore)>,
    /// Only the coordinator holds the receiving end.
    receiver: Option<Receiver<(usize, PredictionStore)>>,
    barrier: Arc<Barrier>,
}

impl ChannelCommunicator {
    /// Create one communicator per rank, `world_size` in total.
    pub fn group(world_size: usize) -> Vec<ChannelCommunicator> {
        let world_size = world_size.max(1);
        let (sender, receiver) = crossbeam_channel::unbounded();
        let barrier = Arc::new(Barrier::new(world_size));
        (0..world_size)
            .map(|rank| ChannelCommunicator {
                rank,
                world_size,
                sender: sender.clone(),
                receiver: (rank == COORDINATOR).then(|| receiver.clone()),
                barrier: Arc::clone(&barrier),
            })
            .collect()
    }
}

impl Communicator for ChannelCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn gather(&self, local: PredictionStore) -> Result<Option<Vec<PredictionStore>>> {
        debug!(
            rank = self.rank,
            images = local.len(),
            "sending predictions to coordinator"
        );
        self.sender
            .send((self.rank, local))
            .map_err(|e| Error::Gather(e.to_string()))?;

        // Nobody proceeds until every rank has sent.
        self.barrier.wait();

        let receiver = match &self.receiver {
            Some(r) => r,
            None => return Ok(None),
        };

        let mut per_rank: Vec<Option<PredictionStore>> = vec![None; self.world_size];
        for _ in 0..self.world_size {
            let (rank, store) = receiver
                .recv()
                .map_err(|e| Error::Gather(e.to_string()))?;
            match per_rank.get_mut(rank) {
                Some(slot) => *slot = Some(store),
                None => return Err(Error::Gather(format!("unexpected rank {}", rank))),
            }
        }
        Ok(Some(per_rank.into_iter().flatten().collect()))
    }
}

/// Fold gathered stores into one. Later stores overwrite earlier ones entry
/// by entry; there is no further deduplication across ranks.
pub fn merge(stores: Vec<PredictionStore>) -> PredictionStore {
    let mut merged = PredictionStore::new();
    for store in stores {
        for (image_id, output) in store {
            merged.insert(image_id, output);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::predictions::{Detection, ModelOutput};

    fn store_with(image_id: u64, score: f64) -> PredictionStore {
        let mut store = PredictionStore::new();
        store.insert(
            image_id,
            ModelOutput {
                panels: vec![Detection {
                    bbox: [0.0, 0.0, 1.0, 1.0],
                    class_id: 0,
                    score,
                }],
                labels: vec![],
            },
        );
        store
    }

    #[test]
    fn test_local_gather() {
        let gathered = LocalCommunicator.gather(store_with(1, 0.5)).unwrap().unwrap();
        assert_eq!(gathered.len(), 1);
        assert!(LocalCommunicator.is_coordinator());
    }

    #[test]
    fn test_merge_last_writer_wins() {
        let merged = merge(vec![store_with(1, 0.1), store_with(2, 0.2), store_with(1, 0.9)]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get(1).unwrap().panels[0].score, 0.9);
        assert_eq!(merged.get(2).unwrap().panels[0].score, 0.2);
    }

    #[test]
    fn test_merge_empty() {
        assert!(merge(vec![]).is_empty());
        assert!(merge(vec![PredictionStore::new(), PredictionStore::new()]).is_empty());
    }

    #[test]
    fn test_channel_gather_across_threads() {
        let comms = ChannelCommunicator::group(4);
        let results: Vec<(usize, Option<Vec<PredictionStore>>)> = thread::scope(|s| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    s.spawn(move || {
                        let rank = comm.rank();
                        let local = store_with(rank as u64 * 10, rank as f64);
                        (rank, comm.gather(local).unwrap())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for (rank, gathered) in results {
            if rank == COORDINATOR {
                let stores = gathered.unwrap();
                assert_eq!(stores.len(), 4);
                // Ordered by rank.
                for (r, store) in stores.iter().enumerate() {
                    assert!(store.get(r as u64 * 10).is_some());
                }
                assert_eq!(merge(stores).len(), 4);
            } else {
                assert!(gathered.is_none());
            }
        }
    }

    #[test]
    fn test_group_of_one_is_local() {
        let comms = ChannelCommunicator::group(0);
        assert_eq!(comms.len(), 1);
        let gathered = comms[0].gather(store_with(7, 0.3)).unwrap().unwrap();
        assert_eq!(gathered.len(), 1);
    }
}
