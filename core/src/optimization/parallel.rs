//! Chunked parallel execution
//!
//! A fixed-size rayon pool runs one job per chunk of a batch. Workers get
//! an immutable chunk plus whatever shared read-only state the closure
//! borrows, and send their result back over a crossbeam channel tagged
//! with the chunk index. The calling thread collects results as they
//! become ready, polling with a bounded timeout, so partial results can be
//! reported while later chunks are still running. Results are returned in
//! chunk order regardless of completion order.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::time::{Duration, Instant};

use crossbeam_channel::{self, RecvTimeoutError};
use log::{debug, trace};
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::PoolError;

/// Fixed-size worker pool with wait-any-ready collection
pub struct ChunkPool {
    pool: ThreadPool,
    workers: usize,
    poll_interval: Duration,
}

impl std::fmt::Debug for ChunkPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkPool")
            .field("workers", &self.workers)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl ChunkPool {
    pub fn new(workers: usize, poll_interval: Duration) -> Result<Self, PoolError> {
        if workers == 0 {
            return Err(PoolError::Build("worker count must be positive".into()));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("mosaic-worker-{}", i))
            .build()
            .map_err(|e| PoolError::Build(e.to_string()))?;
        Ok(Self {
            pool,
            workers,
            poll_interval,
        })
    }

    /// Pool sized to the available CPUs
    pub fn with_available_cpus(poll_interval: Duration) -> Result<Self, PoolError> {
        Self::new(num_cpus::get().max(1), poll_interval)
    }

    #[inline]
    pub fn workers(&self) -> usize {
        self.workers
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Applies `work` to every chunk of `items`, results in chunk order
    pub fn map_chunks<T, R, F>(
        &self,
        label: &str,
        items: &[T],
        chunk_size: usize,
        work: F,
    ) -> Result<Vec<R>, PoolError>
    where
        T: Sync,
        R: Send,
        F: Fn(&[T]) -> R + Sync,
    {
        self.map_chunks_with_progress(label, items, chunk_size, work, |_, _| {})
    }

    /// Like [`Self::map_chunks`], calling `on_ready(chunk, &result)` on the
    /// calling thread as each chunk completes
    pub fn map_chunks_with_progress<T, R, F, P>(
        &self,
        label: &str,
        items: &[T],
        chunk_size: usize,
        work: F,
        mut on_ready: P,
    ) -> Result<Vec<R>, PoolError>
    where
        T: Sync,
        R: Send,
        F: Fn(&[T]) -> R + Sync,
        P: FnMut(usize, &R),
    {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let chunks: Vec<&[T]> = items.chunks(chunk_size.max(1)).collect();
        let expected = chunks.len();
        let mut results: Vec<Option<R>> = (0..expected).map(|_| None).collect();
        let (tx, rx) = crossbeam_channel::unbounded::<(usize, R)>();
        let work = &work;
        let started = Instant::now();

        self.pool.in_place_scope(|scope| {
            for (index, chunk) in chunks.into_iter().enumerate() {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    // The receiver outlives every job in this scope.
                    let _ = tx.send((index, work(chunk)));
                });
            }
            drop(tx);

            let mut received = 0;
            while received < expected {
                match rx.recv_timeout(self.poll_interval) {
                    Ok((index, result)) => {
                        received += 1;
                        debug!("{}: chunk {} ready ({}/{})", label, index, received, expected);
                        on_ready(index, &result);
                        results[index] = Some(result);
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        trace!(
                            "{}: {}/{} chunks after {:.1?}, still waiting",
                            label,
                            received,
                            expected,
                            started.elapsed()
                        );
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(PoolError::Disconnected {
                            label: label.to_string(),
                            received,
                            expected,
                        });
                    }
                }
            }
            Ok(())
        })?;

        let received = results.iter().filter(|r| r.is_some()).count();
        results
            .into_iter()
            .collect::<Option<Vec<R>>>()
            .ok_or_else(|| PoolError::Disconnected {
                label: label.to_string(),
                received,
                expected,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_results_come_back_in_chunk_order() {
        let pool = ChunkPool::new(4, Duration::from_millis(5)).unwrap();
        let items: Vec<u64> = (0..1000).collect();

        let sums = pool
            .map_chunks("sum", &items, 64, |chunk| {
                // Early chunks finish last.
                if chunk[0] < 128 {
                    thread::sleep(Duration::from_millis(20));
                }
                chunk.iter().sum::<u64>()
            })
            .unwrap();

        assert_eq!(sums.len(), 16);
        assert_eq!(sums[0], (0..64).sum::<u64>());
        assert_eq!(sums.iter().sum::<u64>(), (0..1000).sum::<u64>());
    }

    #[test]
    fn test_progress_sees_every_chunk() {
        let pool = ChunkPool::new(2, Duration::from_millis(1)).unwrap();
        let items = vec![1u32; 10];
        let mut seen = Vec::new();

        let lens = pool
            .map_chunks_with_progress("count", &items, 3, |chunk| chunk.len(), |index, len| {
                seen.push((index, *len))
            })
            .unwrap();

        seen.sort_unstable();
        assert_eq!(lens, vec![3, 3, 3, 1]);
        assert_eq!(seen, vec![(0, 3), (1, 3), (2, 3), (3, 1)]);
    }

    #[test]
    fn test_shared_state_is_read_only() {
        let pool = ChunkPool::new(3, Duration::from_millis(1)).unwrap();
        let calls = AtomicUsize::new(0);
        let lookup: Vec<usize> = (0..50).map(|i| i * 2).collect();
        let items: Vec<usize> = (0..50).collect();

        let doubled = pool
            .map_chunks("lookup", &items, 7, |chunk| {
                calls.fetch_add(1, Ordering::SeqCst);
                chunk.iter().map(|&i| lookup[i]).collect::<Vec<_>>()
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 8);
        assert_eq!(doubled.concat(), lookup);
    }

    #[test]
    fn test_empty_batch_and_zero_workers() {
        let pool = ChunkPool::new(1, Duration::from_millis(1)).unwrap();
        let none: Vec<u8> = pool.map_chunks("empty", &[] as &[u8], 4, |c| c.len() as u8).unwrap();
        assert!(none.is_empty());
        assert!(matches!(ChunkPool::new(0, Duration::from_millis(1)), Err(PoolError::Build(_))));
    }
}
