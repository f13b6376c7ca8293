// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crossbeam_channel::{Receiver, Sender};
use std::ops::Range;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Counts outstanding jobs; [`WaitGroup::wait`] blocks until it reaches zero.
#[derive(Debug, Clone, Default)]
pub struct WaitGroup {
    inner: Arc<(Mutex<usize>, Condvar)>,
}

impl WaitGroup {
    /// An empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `n` outstanding jobs.
    pub fn add(&self, n: usize) {
        let (lock, _) = &*self.inner;
        if let Ok(mut count) = lock.lock() {
            *count += n;
        }
    }

    /// Marks one job as finished.
    pub fn done(&self) {
        let (lock, cvar) = &*self.inner;
        if let Ok(mut count) = lock.lock() {
            *count = count.saturating_sub(1);
            if *count == 0 {
                cvar.notify_all();
            }
        }
    }

    /// Blocks until every added job is done.
    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let Ok(mut count) = lock.lock() else {
            return;
        };
        while *count > 0 {
            match cvar.wait(count) {
                Ok(guard) => count = guard,
                Err(_) => return,
            }
        }
    }
}

/// A fixed set of worker threads fed through a channel.
///
/// Dropping the pool closes the channel and joins the workers.
#[derive(Debug)]
pub struct TaskPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskPool {
    /// Starts `threads` workers, one per logical core when zero.
    pub fn new(threads: usize) -> Self {
        let threads = if threads == 0 {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            threads
        };
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let workers = (0..threads)
            .filter_map(|index| {
                let receiver: Receiver<Job> = receiver.clone();
                thread::Builder::new()
                    .name(format!("photon-worker-{index}"))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            job();
                        }
                    })
                    .map_err(|e| log::error!("TaskPool: failed to spawn worker {index}: {e}"))
                    .ok()
            })
            .collect::<Vec<_>>();
        log::debug!("TaskPool: started {} workers", workers.len());
        Self {
            sender: Some(sender),
            workers,
        }
    }

    /// Number of worker threads.
    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    /// Queues `job`. Jobs run in submission order per worker.
    ///
    /// Runs the job on the calling thread if the pool has no workers.
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        let job: Job = Box::new(job);
        match &self.sender {
            Some(sender) if !self.workers.is_empty() => {
                if let Err(rejected) = sender.send(job) {
                    (rejected.0)();
                }
            }
            _ => job(),
        }
    }

    /// Runs `f` over `0..len` split into chunks, and blocks until all chunks finish.
    pub fn parallel_for(&self, len: usize, f: Arc<dyn Fn(Range<usize>) + Send + Sync>) {
        if len == 0 {
            return;
        }
        let threads = self.num_threads().max(1);
        let chunk = len.div_ceil(threads * 4).max(1);
        let group = WaitGroup::new();
        let mut start = 0;
        while start < len {
            let end = (start + chunk).min(len);
            group.add(1);
            let f = f.clone();
            let group = group.clone();
            self.spawn(move || {
                f(start..end);
                group.done();
            });
            start = end;
        }
        group.wait();
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::warn!("TaskPool: a worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn parallel_for_covers_every_index_once() {
        let pool = TaskPool::new(4);
        let hits: Arc<Vec<AtomicUsize>> = Arc::new((0..1000).map(|_| AtomicUsize::new(0)).collect());
        let h = hits.clone();
        pool.parallel_for(
            1000,
            Arc::new(move |range| {
                for i in range {
                    h[i].fetch_add(1, Ordering::Relaxed);
                }
            }),
        );
        assert!(hits.iter().all(|c| c.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn wait_group_waits_for_spawned_jobs() {
        let pool = TaskPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let group = WaitGroup::new();
        for _ in 0..16 {
            group.add(1);
            let counter = counter.clone();
            let group = group.clone();
            pool.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                group.done();
            });
        }
        group.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }
}
