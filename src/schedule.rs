//! System scheduler with dependency-graph execution.
//!
//! Holds two system collections: an ordered list of anonymous systems and a
//! named dependency graph. Anonymous systems run sequentially or fan out to
//! the thread pool; the graph runs as Kahn-layered batches where each batch
//! is internally parallel and batches are topologically ordered.

use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::pool::{Latch, ThreadPool};

/// A schedulable system: an untyped callable sharable with the pool.
pub type SystemFn = Arc<dyn Fn() + Send + Sync + 'static>;

struct SystemNode {
    func: SystemFn,
    dependencies: Vec<String>,
    dependents: Vec<String>,
}

/// Manages and executes systems.
pub struct SystemScheduler {
    systems: Vec<SystemFn>,
    graph: FxHashMap<String, SystemNode>,
    batches: Vec<Vec<String>>,
    graph_dirty: bool,
    pool: ThreadPool,
}

impl SystemScheduler {
    /// Scheduler backed by a pool sized to the machine's parallelism.
    pub fn new() -> Self {
        Self::with_pool(ThreadPool::with_default_threads())
    }

    /// Scheduler backed by a pool with `threads` workers.
    pub fn with_threads(threads: usize) -> Self {
        Self::with_pool(ThreadPool::new(threads))
    }

    fn with_pool(pool: ThreadPool) -> Self {
        SystemScheduler {
            systems: Vec::new(),
            graph: FxHashMap::default(),
            batches: Vec::new(),
            graph_dirty: true,
            pool,
        }
    }

    /// The scheduler's thread pool, usable for ad-hoc fan-out.
    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    /// Add an anonymous system, kept in insertion order.
    pub fn add(&mut self, system: impl Fn() + Send + Sync + 'static) {
        self.systems.push(Arc::new(system));
    }

    /// Add a named system with dependencies on other named systems.
    ///
    /// Edges are kept bidirectionally: listed dependencies gain this system
    /// as a dependent, and systems that already declared `name` as a
    /// dependency get their edge realized now. Dependencies naming systems
    /// that are never added leave the node unreachable, which
    /// [`run_graph`](Self::run_graph) reports as a cycle error.
    pub fn add_named(
        &mut self,
        name: &str,
        system: impl Fn() + Send + Sync + 'static,
        dependencies: &[&str],
    ) {
        let name = name.to_string();
        let dependencies: Vec<String> =
            dependencies.iter().map(|dep| dep.to_string()).collect();

        let dependents: Vec<String> = self
            .graph
            .iter()
            .filter(|(other, node)| {
                **other != name && node.dependencies.iter().any(|dep| *dep == name)
            })
            .map(|(other, _)| other.clone())
            .collect();

        for dep in &dependencies {
            if let Some(node) = self.graph.get_mut(dep) {
                node.dependents.push(name.clone());
            }
        }

        self.graph.insert(
            name,
            SystemNode {
                func: Arc::new(system),
                dependencies,
                dependents,
            },
        );
        self.graph_dirty = true;
    }

    /// Run the anonymous systems in insertion order on the calling thread.
    pub fn run_sequential(&self) {
        for system in &self.systems {
            (**system)();
        }
    }

    /// Run every anonymous system on the pool and wait for all of them.
    pub fn run_parallel(&self) {
        if self.systems.is_empty() {
            return;
        }

        let latch = Arc::new(Latch::new(self.systems.len()));
        for system in &self.systems {
            let system = Arc::clone(system);
            let latch = Arc::clone(&latch);
            self.pool.submit(move || {
                (*system)();
                latch.count_down();
            });
        }
        latch.wait();
    }

    /// Run the named systems honoring their dependency edges.
    ///
    /// Batches execute in topological order; order within a batch is
    /// unspecified. A single-node batch runs inline on the calling thread,
    /// larger batches fan out to the pool behind a latch.
    pub fn run_graph(&mut self) -> Result<()> {
        if self.graph.is_empty() {
            return Ok(());
        }
        if self.graph_dirty {
            self.rebuild_graph()?;
        }

        for batch in &self.batches {
            if batch.len() == 1 {
                (*self.graph[batch[0].as_str()].func)();
            } else {
                let latch = Arc::new(Latch::new(batch.len()));
                for name in batch {
                    let func = Arc::clone(&self.graph[name.as_str()].func);
                    let latch = Arc::clone(&latch);
                    self.pool.submit(move || {
                        (*func)();
                        latch.count_down();
                    });
                }
                latch.wait();
            }
        }
        Ok(())
    }

    /// Rebuild the layered batches with Kahn's algorithm.
    ///
    /// Called automatically by [`run_graph`](Self::run_graph) when the graph
    /// changed. Fails if the batches cannot cover every node.
    pub fn rebuild_graph(&mut self) -> Result<()> {
        let mut in_degree: FxHashMap<&str, usize> = FxHashMap::default();
        let mut current: Vec<String> = Vec::new();
        for (name, node) in &self.graph {
            in_degree.insert(name.as_str(), node.dependencies.len());
            if node.dependencies.is_empty() {
                current.push(name.clone());
            }
        }

        let mut batches: Vec<Vec<String>> = Vec::new();
        while !current.is_empty() {
            let mut next = Vec::new();
            for name in &current {
                for dependent in &self.graph[name.as_str()].dependents {
                    if let Some(remaining) = in_degree.get_mut(dependent.as_str()) {
                        *remaining -= 1;
                        if *remaining == 0 {
                            next.push(dependent.clone());
                        }
                    }
                }
            }
            batches.push(std::mem::replace(&mut current, next));
        }

        let scheduled: usize = batches.iter().map(|batch| batch.len()).sum();
        if scheduled < self.graph.len() {
            return Err(Error::DependencyCycle(format!(
                "{} of {} systems unreachable (cycle or missing dependency)",
                self.graph.len() - scheduled,
                self.graph.len()
            )));
        }

        tracing::debug!(
            batches = batches.len(),
            systems = self.graph.len(),
            "system graph rebuilt"
        );
        self.batches = batches;
        self.graph_dirty = false;
        Ok(())
    }

    /// One-shot frame: run the given tasks on the pool and wait. Does not
    /// touch the system collections.
    pub fn frame<I>(&self, systems: I)
    where
        I: IntoIterator,
        I::Item: FnOnce() + Send + 'static,
    {
        let systems: Vec<_> = systems.into_iter().collect();
        if systems.is_empty() {
            return;
        }

        let latch = Arc::new(Latch::new(systems.len()));
        for system in systems {
            let latch = Arc::clone(&latch);
            self.pool.submit(move || {
                system();
                latch.count_down();
            });
        }
        latch.wait();
    }
}

impl Default for SystemScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_sequential_order() {
        let mut scheduler = SystemScheduler::with_threads(2);
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let log = Arc::clone(&log);
            scheduler.add(move || log.lock().push(i));
        }

        scheduler.run_sequential();
        assert_eq!(*log.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_parallel_runs_everything() {
        let mut scheduler = SystemScheduler::with_threads(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            scheduler.add(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }

        scheduler.run_parallel();
        assert_eq!(counter.load(Ordering::Relaxed), 16);
    }

    #[test]
    fn test_graph_chain_order() {
        let mut scheduler = SystemScheduler::with_threads(2);
        let log = Arc::new(Mutex::new(Vec::new()));

        for (name, deps) in [("c", vec!["b"]), ("a", vec![]), ("b", vec!["a"])] {
            let log = Arc::clone(&log);
            scheduler.add_named(name, move || log.lock().push(name), &deps);
        }

        scheduler.run_graph().unwrap();
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_graph_cycle_detected() {
        let mut scheduler = SystemScheduler::with_threads(2);
        let ran = Arc::new(AtomicUsize::new(0));
        for (name, dep) in [("a", "b"), ("b", "a")] {
            let ran = Arc::clone(&ran);
            scheduler.add_named(
                name,
                move || {
                    ran.fetch_add(1, Ordering::Relaxed);
                },
                &[dep],
            );
        }

        let err = scheduler.run_graph().unwrap_err();
        assert!(matches!(err, Error::DependencyCycle(_)));
        // No partial execution.
        assert_eq!(ran.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_graph_missing_dependency_is_cycle_error() {
        let mut scheduler = SystemScheduler::with_threads(2);
        scheduler.add_named("orphan", || {}, &["ghost"]);
        assert!(matches!(
            scheduler.run_graph(),
            Err(Error::DependencyCycle(_))
        ));
    }

    #[test]
    fn test_edges_realized_for_late_dependencies() {
        // "late" is added before the dependency it names exists; the edge
        // must be realized when "early" arrives.
        let mut scheduler = SystemScheduler::with_threads(2);
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = Arc::clone(&log);
        scheduler.add_named("late", move || l.lock().push("late"), &["early"]);
        let l = Arc::clone(&log);
        scheduler.add_named("early", move || l.lock().push("early"), &[]);

        scheduler.run_graph().unwrap();
        assert_eq!(*log.lock(), vec!["early", "late"]);
    }

    #[test]
    fn test_frame_runs_all_tasks() {
        let scheduler = SystemScheduler::with_threads(2);
        let counter = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            })
            .collect();

        scheduler.frame(tasks);
        assert_eq!(counter.load(Ordering::Relaxed), 8);
    }

    #[test]
    fn test_rerun_after_rebuild() {
        let mut scheduler = SystemScheduler::with_threads(2);
        let counter = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&counter);
        scheduler.add_named("only", move || {
            c.fetch_add(1, Ordering::Relaxed);
        }, &[]);
        scheduler.run_graph().unwrap();
        scheduler.run_graph().unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }
}
