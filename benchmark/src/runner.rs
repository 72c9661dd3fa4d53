//! Benchmark harness: partitions a key space over worker threads, preloads
//! part of it, then drives a randomized insert/remove/lookup mix against a
//! shared structure and records wall-clock runtimes per thread count.

use std::time::Instant;

use collections::{ConcurrentMap, ConcurrentSet};
use crossbeam_utils::thread;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::affinity;

/// Fixed base seed; thread `i` seeds with `SEED * i`, so runs repeat.
const SEED: u64 = 117;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalingMode {
    /// Total workload stays constant as threads are added.
    Problem,
    /// Per-thread workload stays constant, so total work grows.
    Memory,
}

impl ScalingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ScalingMode::Problem => "problem",
            ScalingMode::Memory => "memory",
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunnerParams {
    pub n: usize,
    pub inserts: f32,
    pub removals: f32,
    pub lookups: f32,
    pub scaling: ScalingMode,
    pub with_affinity: bool,
    pub preload: f32,
    pub min_threads: usize,
    pub max_threads: usize,
    pub map_loadfactor: f64,
}

#[derive(Clone, Debug)]
pub struct RunnerResults {
    pub name: String,
    pub run_times: Vec<f64>,
}

impl RunnerResults {
    fn new(name: &str) -> Self {
        RunnerResults {
            name: name.to_string(),
            run_times: Vec::new(),
        }
    }
}

/// One thread's slice of the key space for a given thread count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkParams {
    pub start: usize,
    pub start_next: usize,
    pub chunk: usize,
    pub n_preload: usize,
}

/// The operations a worker drives; lists and maps differ only here.
trait Workload {
    fn insert(&self, key: u64, unique: bool);
    fn remove(&self, key: u64);
    fn lookup(&self, key: u64);
}

struct ListWorkload<'a, L>(&'a L);

impl<L: ConcurrentSet<u64>> Workload for ListWorkload<'_, L> {
    /// Lists alternate between the two insert paths by coin flip so both
    /// get exercised.
    fn insert(&self, key: u64, unique: bool) {
        if unique {
            self.0.insert_unique(key);
        } else {
            self.0.insert(key);
        }
    }

    fn remove(&self, key: u64) {
        self.0.remove(&key);
    }

    fn lookup(&self, key: u64) {
        self.0.contains(&key);
    }
}

struct MapWorkload<'a, M>(&'a M);

impl<M: ConcurrentMap<u64, u64>> Workload for MapWorkload<'_, M> {
    fn insert(&self, key: u64, _unique: bool) {
        self.0.insert(key, key);
    }

    fn remove(&self, key: u64) {
        self.0.remove(&key);
    }

    fn lookup(&self, key: u64) {
        self.0.has(&key);
    }
}

pub struct BenchmarkRunner {
    params: RunnerParams,
    numbers: Vec<u64>,
}

impl BenchmarkRunner {
    /// Prepares the key space: `0..n` under problem scaling, `0..n *
    /// max_threads` under memory scaling, so inserted keys stay unique
    /// across the whole run.
    pub fn new(params: RunnerParams) -> Self {
        let mut n = params.n;
        if params.scaling == ScalingMode::Memory {
            n *= params.max_threads;
        }
        let numbers = (0..n as u64).collect();
        BenchmarkRunner { params, numbers }
    }

    pub fn run_list<L>(&self, name: &str) -> RunnerResults
    where
        L: ConcurrentSet<u64> + Default + Sync,
    {
        info!("benchmarking {}", name);
        let mut results = RunnerResults::new(name);
        for count in self.params.min_threads..=self.params.max_threads {
            let list = L::default();
            let mut buffers = self.preload(|num| {
                list.insert(num);
            }, count);
            let elapsed = self.measure(&ListWorkload(&list), count, &mut buffers);
            info!("{}: {} threads took {:.5}s", name, count, elapsed);
            results.run_times.push(elapsed);
        }
        results
    }

    /// Single-threaded path for structures that cannot be shared, like the
    /// sequential baseline.
    pub fn run_list_single<L>(&self, name: &str) -> RunnerResults
    where
        L: ConcurrentSet<u64> + Default,
    {
        info!("benchmarking {} single-threaded", name);
        let mut results = RunnerResults::new(name);
        let list = L::default();
        let mut buffers = self.preload(|num| {
            list.insert(num);
        }, 1);
        let start = Instant::now();
        self.run_worker(0, 1, &ListWorkload(&list), &mut buffers[0]);
        let elapsed = start.elapsed().as_secs_f64();
        info!("{}: 1 thread took {:.5}s", name, elapsed);
        results.run_times.push(elapsed);
        results
    }

    pub fn run_map<M>(&self, name: &str) -> RunnerResults
    where
        M: ConcurrentMap<u64, u64> + Sync,
    {
        info!("benchmarking {}", name);
        let buckets = self.map_buckets();
        let mut results = RunnerResults::new(name);
        for count in self.params.min_threads..=self.params.max_threads {
            let map = M::with_buckets(buckets);
            let mut buffers = self.preload(|num| {
                map.insert(num, num);
            }, count);
            let elapsed = self.measure(&MapWorkload(&map), count, &mut buffers);
            info!("{}: {} threads took {:.5}s", name, count, elapsed);
            results.run_times.push(elapsed);
        }
        results
    }

    pub fn run_map_single<M>(&self, name: &str) -> RunnerResults
    where
        M: ConcurrentMap<u64, u64>,
    {
        info!("benchmarking {} single-threaded", name);
        let mut results = RunnerResults::new(name);
        let map = M::with_buckets(self.map_buckets());
        let mut buffers = self.preload(|num| {
            map.insert(num, num);
        }, 1);
        let start = Instant::now();
        self.run_worker(0, 1, &MapWorkload(&map), &mut buffers[0]);
        let elapsed = start.elapsed().as_secs_f64();
        info!("{}: 1 thread took {:.5}s", name, elapsed);
        results.run_times.push(elapsed);
        results
    }

    /// Reads the load-factor hint as target entries per bucket.
    fn map_buckets(&self) -> usize {
        let buckets = (self.numbers.len() as f64 / self.params.map_loadfactor).ceil();
        (buckets as usize).max(1)
    }

    /// Splits the key space for `n_threads`. Problem scaling hands the
    /// first `len % n_threads` threads one extra key; memory scaling gives
    /// thread `i` the range `[i*n, (i+1)*n)` directly.
    pub fn chunk_params(&self, thread_id: usize, n_threads: usize) -> ChunkParams {
        let (start, start_next) = match self.params.scaling {
            ScalingMode::Memory => {
                let start = thread_id * self.params.n;
                (start, start + self.params.n)
            }
            ScalingMode::Problem => {
                let base = self.numbers.len() / n_threads;
                let extra = self.numbers.len() % n_threads;
                let offset = |id: usize| {
                    if id < extra {
                        id * (base + 1)
                    } else {
                        id * base + extra
                    }
                };
                (offset(thread_id), offset(thread_id + 1))
            }
        };
        let chunk = start_next - start;
        let n_preload = (self.params.preload as f64 * chunk as f64) as usize;
        ChunkParams {
            start,
            start_next,
            chunk,
            n_preload,
        }
    }

    /// Single-threaded preload: inserts the first `n_preload` keys of every
    /// thread's range and records them in that thread's working buffer.
    fn preload(&self, mut insert: impl FnMut(u64), n_threads: usize) -> Vec<Vec<u64>> {
        let mut buffers = Vec::with_capacity(n_threads);
        for t in 0..n_threads {
            let cp = self.chunk_params(t, n_threads);
            let mut buf = vec![0u64; cp.chunk];
            let last = cp.start_next.min(cp.start + cp.n_preload);
            for (slot, j) in (cp.start..last).enumerate() {
                let num = self.numbers[j];
                insert(num);
                buf[slot] = num;
            }
            buffers.push(buf);
        }
        buffers
    }

    /// Spawns `n_threads - 1` workers, runs thread 0 inline, and returns
    /// the elapsed wall-clock seconds.
    fn measure<W: Workload + Sync>(
        &self,
        workload: &W,
        n_threads: usize,
        buffers: &mut [Vec<u64>],
    ) -> f64 {
        let start = Instant::now();
        thread::scope(|scope| {
            let (first, rest) = buffers.split_first_mut().unwrap();
            for (t, buf) in rest.iter_mut().enumerate() {
                scope.spawn(move |_| self.run_worker(t + 1, n_threads, workload, buf));
            }
            self.run_worker(0, n_threads, workload, first);
        })
        .unwrap();
        start.elapsed().as_secs_f64()
    }

    /// The measured loop. Draws an operation per iteration until the chunk
    /// is spent, breaking early once the range is exhausted and the
    /// working buffer is empty so a remove-heavy mix cannot livelock.
    fn run_worker<W: Workload>(
        &self,
        thread_id: usize,
        n_threads: usize,
        workload: &W,
        buf: &mut [u64],
    ) {
        if self.params.with_affinity {
            affinity::pin_current_thread_to_core(thread_id);
        }
        let cp = self.chunk_params(thread_id, n_threads);
        let remove_threshold = self.params.inserts + self.params.removals;
        let mut rng = StdRng::seed_from_u64(SEED * thread_id as u64);
        let mut live = cp.n_preload;
        let mut next = cp.start + cp.n_preload;
        let mut ops = 0;
        while ops < cp.chunk {
            let r: f32 = rng.gen_range(0.0..1.0);
            if r < self.params.inserts && next < cp.start_next {
                let num = self.numbers[next];
                next += 1;
                buf[live] = num;
                live += 1;
                ops += 1;
                workload.insert(num, rng.gen_bool(0.5));
            } else if r < remove_threshold {
                if live > 0 {
                    let index = rng.gen_range(0..live);
                    workload.remove(buf[index]);
                    buf[index] = buf[live - 1];
                    live -= 1;
                    ops += 1;
                }
            } else if live > 0 {
                let index = rng.gen_range(0..live);
                workload.lookup(buf[index]);
                ops += 1;
            }
            if next >= cp.start_next && live == 0 && ops < cp.chunk {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use collections::{CoarseList, LockFreeList};

    use super::*;

    fn params(n: usize, scaling: ScalingMode) -> RunnerParams {
        RunnerParams {
            n,
            inserts: 0.8,
            removals: 0.1,
            lookups: 0.1,
            scaling,
            with_affinity: false,
            preload: 0.5,
            min_threads: 1,
            max_threads: 2,
            map_loadfactor: 1.0,
        }
    }

    #[test]
    fn test_problem_chunks_cover_key_space() {
        let runner = BenchmarkRunner::new(params(103, ScalingMode::Problem));
        for n_threads in 1..=7 {
            let mut covered = 0;
            let mut expected_start = 0;
            for t in 0..n_threads {
                let cp = runner.chunk_params(t, n_threads);
                assert_eq!(cp.start, expected_start);
                assert_eq!(cp.chunk, cp.start_next - cp.start);
                assert_eq!(cp.n_preload, (0.5 * cp.chunk as f64) as usize);
                covered += cp.chunk;
                expected_start = cp.start_next;
            }
            assert_eq!(covered, 103);
        }
    }

    #[test]
    fn test_problem_chunks_split_evenly() {
        let runner = BenchmarkRunner::new(params(10, ScalingMode::Problem));
        // 10 keys over 3 threads: 4, 3, 3.
        let chunks: Vec<usize> = (0..3).map(|t| runner.chunk_params(t, 3).chunk).collect();
        assert_eq!(chunks, vec![4, 3, 3]);
    }

    #[test]
    fn test_memory_chunks_are_fixed_ranges() {
        let runner = BenchmarkRunner::new(params(100, ScalingMode::Memory));
        assert_eq!(runner.numbers.len(), 200);
        for t in 0..2 {
            let cp = runner.chunk_params(t, 2);
            assert_eq!(cp.start, t * 100);
            assert_eq!(cp.start_next, (t + 1) * 100);
            assert_eq!(cp.chunk, 100);
        }
    }

    #[test]
    fn test_single_thread_run_completes() {
        // Determinism scenario: n=1000, i/r/l = .8/.1/.1, preload .5.
        let mut p = params(1000, ScalingMode::Problem);
        p.max_threads = 1;
        let runner = BenchmarkRunner::new(p);
        let results = runner.run_list::<CoarseList<u64>>("CoarseList");
        assert_eq!(results.name, "CoarseList");
        assert_eq!(results.run_times.len(), 1);
        assert!(results.run_times[0] >= 0.0);
    }

    #[test]
    fn test_identical_runs_build_identical_lists() {
        let mut p = params(500, ScalingMode::Problem);
        p.max_threads = 1;
        let runner = BenchmarkRunner::new(p);

        let a = CoarseList::default();
        let mut bufs = runner.preload(|num| {
            a.insert(num);
        }, 1);
        runner.run_worker(0, 1, &ListWorkload(&a), &mut bufs[0]);

        let b = CoarseList::default();
        let mut bufs = runner.preload(|num| {
            b.insert(num);
        }, 1);
        runner.run_worker(0, 1, &ListWorkload(&b), &mut bufs[0]);

        assert_eq!(a, b);
    }

    #[test]
    fn test_multithreaded_list_run() {
        let runner = BenchmarkRunner::new(params(400, ScalingMode::Problem));
        let results = runner.run_list::<LockFreeList<u64>>("LockFreeList");
        assert_eq!(results.run_times.len(), 2);
        assert!(results.run_times.iter().all(|t| *t >= 0.0));
    }

    #[test]
    fn test_map_run_over_lockfree_buckets() {
        use collections::{BucketMap, Entry};

        type Map = BucketMap<u64, u64, LockFreeList<Entry<u64, u64>>>;
        let runner = BenchmarkRunner::new(params(400, ScalingMode::Problem));
        let results = runner.run_map::<Map>("LockFreeListMap");
        assert_eq!(results.run_times.len(), 2);
    }

    #[test]
    fn test_map_buckets_follow_loadfactor() {
        let mut p = params(1000, ScalingMode::Problem);
        p.map_loadfactor = 4.0;
        let runner = BenchmarkRunner::new(p);
        assert_eq!(runner.map_buckets(), 250);
        let mut p = params(10, ScalingMode::Problem);
        p.map_loadfactor = 100.0;
        let runner = BenchmarkRunner::new(p);
        assert_eq!(runner.map_buckets(), 1);
    }
}
