//! Collective operations between training replicas.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{NeuralSegError, Result};

/// Sum-reduction and synchronization across every replica of a run.
///
/// Every replica must issue the same sequence of calls with buffers of the
/// same length; the call blocks until all replicas have arrived.
pub trait Collective: Send + Sync + fmt::Debug {
    /// Number of participating replicas.
    fn world_size(&self) -> usize;

    /// Replace `buffer` with the element-wise sum over all replicas.
    ///
    /// Every replica receives the same result.
    fn all_reduce_sum(&self, buffer: &mut [f64]) -> Result<()>;

    /// Block until every replica reaches this point.
    fn barrier(&self) -> Result<()> {
        self.all_reduce_sum(&mut [])
    }
}

/// The only replica: reductions are the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Collective for SingleProcess {
    fn world_size(&self) -> usize {
        1
    }

    fn all_reduce_sum(&self, _buffer: &mut [f64]) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Rendezvous {
    arrived: usize,
    generation: u64,
    ready_generation: u64,
    buffer: Vec<f64>,
    result: Vec<f64>,
    error: Option<String>,
}

#[derive(Debug)]
struct Shared {
    world_size: usize,
    timeout: Duration,
    state: Mutex<Rendezvous>,
    ready: Condvar,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, Rendezvous>> {
        self.state
            .lock()
            .map_err(|_| NeuralSegError::distributed("rendezvous lock poisoned"))
    }
}

/// In-process replicas running on threads, synchronized by a shared
/// rendezvous.
///
/// A replica that waits longer than the timeout for its peers fails the
/// collective for everyone still waiting.
#[derive(Debug, Clone)]
pub struct ThreadGroup {
    shared: Arc<Shared>,
}

impl ThreadGroup {
    /// Group of `world_size` replicas.
    pub fn new(world_size: usize, timeout: Duration) -> Result<Self> {
        if world_size == 0 {
            return Err(NeuralSegError::config("world size must be positive"));
        }
        Ok(Self {
            shared: Arc::new(Shared {
                world_size,
                timeout,
                state: Mutex::new(Rendezvous::default()),
                ready: Condvar::new(),
            }),
        })
    }

    /// One collective handle per rank.
    pub fn members(&self) -> Vec<Arc<dyn Collective>> {
        (0..self.shared.world_size)
            .map(|rank| {
                Arc::new(ThreadMember {
                    shared: Arc::clone(&self.shared),
                    rank,
                }) as Arc<dyn Collective>
            })
            .collect()
    }
}

/// Handle of one rank in a [`ThreadGroup`].
pub struct ThreadMember {
    shared: Arc<Shared>,
    rank: usize,
}

impl fmt::Debug for ThreadMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadMember")
            .field("rank", &self.rank)
            .field("world_size", &self.shared.world_size)
            .finish()
    }
}

impl Collective for ThreadMember {
    fn world_size(&self) -> usize {
        self.shared.world_size
    }

    fn all_reduce_sum(&self, buffer: &mut [f64]) -> Result<()> {
        let shared = &self.shared;
        let mut state = shared.lock()?;

        if state.arrived == 0 {
            state.generation = state.generation.wrapping_add(1);
            state.buffer.clear();
            state.buffer.resize(buffer.len(), 0.0);
            state.error = None;
        } else if state.buffer.len() != buffer.len() {
            let message = format!(
                "rank {} reduces {} values, peers reduce {}",
                self.rank,
                buffer.len(),
                state.buffer.len()
            );
            state.arrived = 0;
            state.ready_generation = state.generation;
            state.error = Some(message.clone());
            shared.ready.notify_all();
            return Err(NeuralSegError::distributed(message));
        }

        for (dst, v) in state.buffer.iter_mut().zip(buffer.iter()) {
            *dst += *v;
        }
        state.arrived += 1;
        let generation = state.generation;

        if state.arrived == shared.world_size {
            state.result = std::mem::take(&mut state.buffer);
            state.arrived = 0;
            state.ready_generation = generation;
            shared.ready.notify_all();
        } else {
            let (guard, wait) = shared
                .ready
                .wait_timeout_while(state, shared.timeout, |s| s.ready_generation != generation)
                .map_err(|_| NeuralSegError::distributed("rendezvous lock poisoned"))?;
            state = guard;
            if wait.timed_out() {
                let message = format!(
                    "rank {} timed out after {:?} waiting for {} of {} peers",
                    self.rank,
                    shared.timeout,
                    shared.world_size - state.arrived,
                    shared.world_size
                );
                state.arrived = 0;
                state.ready_generation = generation;
                state.error = Some(message.clone());
                shared.ready.notify_all();
                return Err(NeuralSegError::distributed(message));
            }
        }

        if let Some(message) = state.error.clone() {
            return Err(NeuralSegError::distributed(message));
        }
        buffer.copy_from_slice(&state.result);
        Ok(())
    }
}
