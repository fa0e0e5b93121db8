//! # Gradient synchronization
//!
//! PPO workers average their gradients before every optimizer step and start
//! from the same parameters. The model only needs two collectives for that,
//! expressed by the [`Communicator`] trait:
//!
//! - `all_reduce_sum`: element-wise sum of a buffer across the group
//! - `broadcast`: copy the root's buffer to every member
//!
//! [`SingleProcess`] is the trivial group of one. [`ThreadGroup`] connects
//! workers running on threads of the same process through shared memory.

use std::sync::{Arc, Barrier};

use parking_lot::Mutex;

use crate::error::{PolicyError, Result};

/// Collective operations over a fixed group of workers.
///
/// Every member must call the same collectives in the same order with
/// buffers of the same length. That holds on failure too: a member that hits
/// a local error still has to join the pending collective, otherwise the
/// others wait for it forever.
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Replace `buf` with the element-wise sum over all members
    fn all_reduce_sum(&self, buf: &mut [f32]) -> Result<()>;

    /// Overwrite `buf` with the contents of `root`'s buffer
    fn broadcast(&self, buf: &mut [f32], root: usize) -> Result<()>;
}

/// A group with a single member. Collectives are no-ops.
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_reduce_sum(&self, _buf: &mut [f32]) -> Result<()> {
        Ok(())
    }

    fn broadcast(&self, _buf: &mut [f32], root: usize) -> Result<()> {
        check_root(root, 1)
    }
}

struct Shared {
    slots: Mutex<Vec<Vec<f32>>>,
    barrier: Barrier,
}

/// One member of an in-process group. Create the whole group with
/// [`ThreadGroup::new`] and move each handle to its worker thread.
#[derive(Clone)]
pub struct ThreadGroup {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

impl ThreadGroup {
    pub fn new(size: usize) -> Result<Vec<ThreadGroup>> {
        if size == 0 {
            return Err(PolicyError::invalid_parameter("size", "thread group needs at least one member"));
        }
        let shared = Arc::new(Shared {
            slots: Mutex::new(vec![Vec::new(); size]),
            barrier: Barrier::new(size),
        });
        Ok((0..size)
            .map(|rank| ThreadGroup {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect())
    }

    fn publish(&self, buf: &[f32]) {
        let mut slots = self.shared.slots.lock();
        slots[self.rank].clear();
        slots[self.rank].extend_from_slice(buf);
    }
}

impl std::fmt::Debug for ThreadGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadGroup")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl Communicator for ThreadGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_reduce_sum(&self, buf: &mut [f32]) -> Result<()> {
        self.publish(buf);
        self.shared.barrier.wait();

        let result = {
            let slots = self.shared.slots.lock();
            match slots.iter().find(|s| s.len() != buf.len()) {
                Some(bad) => Err(PolicyError::width_mismatch("all-reduce buffer", buf.len(), bad.len())),
                None => {
                    for (i, value) in buf.iter_mut().enumerate() {
                        *value = slots.iter().map(|s| s[i]).sum();
                    }
                    Ok(())
                }
            }
        };

        // Nobody may publish the next buffer before everyone has read this one
        self.shared.barrier.wait();
        result
    }

    fn broadcast(&self, buf: &mut [f32], root: usize) -> Result<()> {
        check_root(root, self.size)?;
        if self.rank == root {
            self.publish(buf);
        }
        self.shared.barrier.wait();

        let result = if self.rank == root {
            Ok(())
        } else {
            let slots = self.shared.slots.lock();
            if slots[root].len() == buf.len() {
                buf.copy_from_slice(&slots[root]);
                Ok(())
            } else {
                Err(PolicyError::width_mismatch("broadcast buffer", slots[root].len(), buf.len()))
            }
        };

        self.shared.barrier.wait();
        result
    }
}

fn check_root(root: usize, size: usize) -> Result<()> {
    if root >= size {
        return Err(PolicyError::invalid_parameter(
            "root",
            format!("rank {} outside a group of {}", root, size),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_single_process_is_identity() {
        let comm = SingleProcess;
        let mut buf = [1.0, 2.0];
        comm.all_reduce_sum(&mut buf).unwrap();
        comm.broadcast(&mut buf, 0).unwrap();
        assert_eq!(buf, [1.0, 2.0]);
        assert!(comm.broadcast(&mut buf, 1).is_err());
    }

    #[test]
    fn test_thread_group_all_reduce() {
        let group = ThreadGroup::new(3).unwrap();
        let results: Vec<Vec<f32>> = thread::scope(|s| {
            let handles: Vec<_> = group
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let r = comm.rank() as f32;
                        let mut buf = vec![r, 10.0 * r];
                        comm.all_reduce_sum(&mut buf).unwrap();
                        // a second round reuses the slots
                        let mut again = vec![1.0];
                        comm.all_reduce_sum(&mut again).unwrap();
                        buf.push(again[0]);
                        buf
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for buf in results {
            assert_eq!(buf, vec![3.0, 30.0, 3.0]);
        }
    }

    #[test]
    fn test_thread_group_broadcast() {
        let group = ThreadGroup::new(2).unwrap();
        let results: Vec<Vec<f32>> = thread::scope(|s| {
            let handles: Vec<_> = group
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let mut buf = vec![comm.rank() as f32 + 5.0; 3];
                        comm.broadcast(&mut buf, 1).unwrap();
                        buf
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results, vec![vec![6.0; 3], vec![6.0; 3]]);
    }

    #[test]
    fn test_mismatched_lengths_fail_on_every_rank() {
        let group = ThreadGroup::new(2).unwrap();
        let failures = thread::scope(|s| {
            let handles: Vec<_> = group
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let mut buf = vec![0.0; comm.rank() + 1];
                        comm.all_reduce_sum(&mut buf).is_err()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).filter(|&failed| failed).count()
        });
        assert_eq!(failures, 2);
    }

    #[test]
    fn test_empty_group_rejected() {
        assert!(ThreadGroup::new(0).is_err());
    }
}
