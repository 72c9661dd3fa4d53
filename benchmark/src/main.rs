mod affinity;
mod report;
mod runner;

use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, ValueEnum};
use collections::{
    BucketMap, CHashMapTable, CoarseList, DashMapTable, Entry, FineList, LockFreeList, RwSpinList,
    SeqList,
};
use log::info;

use crate::runner::{BenchmarkRunner, RunnerParams, RunnerResults, ScalingMode};

type SeqListMap = BucketMap<u64, u64, SeqList<Entry<u64, u64>>>;
type CoarseListMap = BucketMap<u64, u64, CoarseList<Entry<u64, u64>>>;
type FineListMap = BucketMap<u64, u64, FineList<Entry<u64, u64>>>;
type RwSpinListMap = BucketMap<u64, u64, RwSpinList<Entry<u64, u64>>>;
type LockFreeListMap = BucketMap<u64, u64, LockFreeList<Entry<u64, u64>>>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Scaling {
    Problem,
    Memory,
}

impl From<Scaling> for ScalingMode {
    fn from(scaling: Scaling) -> Self {
        match scaling {
            Scaling::Problem => ScalingMode::Problem,
            Scaling::Memory => ScalingMode::Memory,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Datastruct {
    List,
    Map,
    Both,
}

impl Datastruct {
    fn as_str(self) -> &'static str {
        match self {
            Datastruct::List => "list",
            Datastruct::Map => "map",
            Datastruct::Both => "both",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Structure {
    /// Sequential baseline, runs on one thread only.
    Single,
    Coarsegrain,
    Finegrain,
    Spinning,
    Lockfree,
    /// Third-party sharded-lock table; map runs only.
    Dashmap,
    /// Third-party bucket-locked table; map runs only.
    Chashmap,
}

impl Structure {
    const ALL: [Structure; 7] = [
        Structure::Single,
        Structure::Coarsegrain,
        Structure::Finegrain,
        Structure::Spinning,
        Structure::Lockfree,
        Structure::Dashmap,
        Structure::Chashmap,
    ];
}

/// Benchmarks concurrent lists and hash maps under a mixed workload.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Total operation count; per thread under memory scaling.
    #[arg(long)]
    numbers: usize,

    /// Fraction of operations that insert, in [0, 1].
    #[arg(long)]
    inserts: f32,

    /// Fraction of operations that remove, in [0, 1].
    #[arg(long)]
    removals: f32,

    /// Fraction of operations that look up, in [0, 1].
    #[arg(long)]
    lookups: f32,

    #[arg(long, value_enum, default_value_t = Scaling::Problem)]
    scaling: Scaling,

    /// Pin each worker thread to a core.
    #[arg(long)]
    affinity: bool,

    /// Fraction of each thread's range inserted before timing starts.
    #[arg(long, default_value_t = 0.0)]
    preload: f32,

    #[arg(long, default_value_t = 1)]
    min_threads: usize,

    /// Defaults to the hardware core count.
    #[arg(long)]
    max_threads: Option<usize>,

    /// Target entries per bucket for the map experiments.
    #[arg(long, default_value_t = 1.0)]
    map_loadfactor: f64,

    /// Structures to benchmark; all of them when omitted.
    #[arg(long, value_enum, value_delimiter = ',')]
    types: Vec<Structure>,

    #[arg(long, value_enum, default_value_t = Datastruct::Both)]
    datastruct: Datastruct,

    /// Write results to a file in this directory instead of stdout.
    #[arg(long)]
    outdir: Option<PathBuf>,

    /// Human-readable output instead of CSV.
    #[arg(long)]
    pretty: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    let ncores = num_cpus::get();
    let params = RunnerParams {
        n: args.numbers,
        inserts: args.inserts,
        removals: args.removals,
        lookups: args.lookups,
        scaling: args.scaling.into(),
        with_affinity: args.affinity,
        preload: args.preload,
        min_threads: args.min_threads,
        max_threads: args.max_threads.unwrap_or(ncores),
        map_loadfactor: args.map_loadfactor,
    };
    check_params(&params)?;

    info!(
        "list-bench v{} on {} cores",
        env!("CARGO_PKG_VERSION"),
        ncores
    );

    let kinds: Vec<Structure> = if args.types.is_empty() {
        Structure::ALL.to_vec()
    } else {
        // Keep a canonical order and drop duplicates.
        Structure::ALL
            .into_iter()
            .filter(|kind| args.types.contains(kind))
            .collect()
    };
    let (run_lists, run_maps) = match args.datastruct {
        Datastruct::List => (true, false),
        Datastruct::Map => (false, true),
        Datastruct::Both => (true, true),
    };

    let runner = BenchmarkRunner::new(params.clone());
    let mut results: Vec<RunnerResults> = Vec::new();

    if run_lists {
        for kind in &kinds {
            match kind {
                Structure::Single => {
                    results.push(runner.run_list_single::<SeqList<u64>>("SeqList"))
                }
                Structure::Coarsegrain => {
                    results.push(runner.run_list::<CoarseList<u64>>("CoarseList"))
                }
                Structure::Finegrain => results.push(runner.run_list::<FineList<u64>>("FineList")),
                Structure::Spinning => {
                    results.push(runner.run_list::<RwSpinList<u64>>("RwSpinList"))
                }
                Structure::Lockfree => {
                    results.push(runner.run_list::<LockFreeList<u64>>("LockFreeList"))
                }
                // The external tables have no list form.
                Structure::Dashmap | Structure::Chashmap => {}
            }
        }
    }

    if run_maps {
        for kind in &kinds {
            match kind {
                Structure::Single => {
                    results.push(runner.run_map_single::<SeqListMap>("SeqListMap"))
                }
                Structure::Coarsegrain => {
                    results.push(runner.run_map::<CoarseListMap>("CoarseListMap"))
                }
                Structure::Finegrain => results.push(runner.run_map::<FineListMap>("FineListMap")),
                Structure::Spinning => {
                    results.push(runner.run_map::<RwSpinListMap>("RwSpinListMap"))
                }
                Structure::Lockfree => {
                    results.push(runner.run_map::<LockFreeListMap>("LockFreeListMap"))
                }
                Structure::Dashmap => {
                    results.push(runner.run_map::<DashMapTable<u64, u64>>("DashMapTable"))
                }
                Structure::Chashmap => {
                    results.push(runner.run_map::<CHashMapTable<u64, u64>>("CHashMapTable"))
                }
            }
        }
    }

    report::emit(
        &results,
        &params,
        ncores,
        args.datastruct.as_str(),
        args.outdir.as_deref(),
        args.pretty,
    )
}

/// Startup validation; violations exit non-zero before anything runs.
fn check_params(params: &RunnerParams) -> anyhow::Result<()> {
    if params.n == 0 {
        bail!("--numbers must be positive");
    }
    for (name, fraction) in [
        ("inserts", params.inserts),
        ("removals", params.removals),
        ("lookups", params.lookups),
        ("preload", params.preload),
    ] {
        if !(0.0..=1.0).contains(&fraction) {
            bail!("--{} must be within [0, 1], got {}", name, fraction);
        }
    }
    let total = params.inserts + params.removals + params.lookups;
    if (1.0 - total).abs() > 0.01 {
        bail!(
            "inserts + removals + lookups must be within 0.01 of 1, got {}",
            total
        );
    }
    if params.min_threads < 1 {
        bail!("--min-threads must be at least 1");
    }
    if params.min_threads > params.max_threads {
        bail!(
            "--min-threads ({}) exceeds --max-threads ({})",
            params.min_threads,
            params.max_threads
        );
    }
    if params.map_loadfactor <= 0.0 {
        bail!("--map-loadfactor must be positive");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn params() -> RunnerParams {
        RunnerParams {
            n: 1000,
            inserts: 0.4,
            removals: 0.3,
            lookups: 0.3,
            scaling: ScalingMode::Problem,
            with_affinity: false,
            preload: 0.0,
            min_threads: 1,
            max_threads: 4,
            map_loadfactor: 1.0,
        }
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_valid_params_pass() {
        assert!(check_params(&params()).is_ok());
    }

    #[test]
    fn test_fraction_sum_tolerance() {
        let mut p = params();
        p.inserts = 0.405;
        assert!(check_params(&p).is_ok());
        p.inserts = 0.6;
        assert!(check_params(&p).is_err());
    }

    #[test]
    fn test_out_of_range_fraction_fails() {
        let mut p = params();
        p.removals = 1.2;
        assert!(check_params(&p).is_err());
        let mut p = params();
        p.preload = -0.1;
        assert!(check_params(&p).is_err());
    }

    #[test]
    fn test_thread_bounds() {
        let mut p = params();
        p.min_threads = 5;
        assert!(check_params(&p).is_err());
        let mut p = params();
        p.min_threads = 0;
        assert!(check_params(&p).is_err());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result = Args::try_parse_from([
            "benchmark",
            "--numbers",
            "10",
            "--inserts",
            "1",
            "--removals",
            "0",
            "--lookups",
            "0",
            "--types",
            "nosuchlist",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_types_parse_as_comma_list() {
        let args = Args::try_parse_from([
            "benchmark",
            "--numbers",
            "10",
            "--inserts",
            "1",
            "--removals",
            "0",
            "--lookups",
            "0",
            "--types",
            "lockfree,coarsegrain",
        ])
        .unwrap();
        assert_eq!(
            args.types,
            vec![Structure::Lockfree, Structure::Coarsegrain]
        );
    }
}
