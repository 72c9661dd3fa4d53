//! Result serialization: a CSV table or a human-readable summary, written
//! to stdout or to a file whose name encodes the run configuration.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::Context;
use csv::WriterBuilder;

use crate::runner::{RunnerParams, RunnerResults};

pub fn emit(
    results: &[RunnerResults],
    params: &RunnerParams,
    ncores: usize,
    datastruct: &str,
    outdir: Option<&Path>,
    pretty: bool,
) -> anyhow::Result<()> {
    match outdir {
        Some(dir) => {
            // Already-existing directories are fine; any other failure is not.
            fs::create_dir_all(dir)
                .with_context(|| format!("creating output directory {}", dir.display()))?;
            let path = dir.join(file_name(params, datastruct));
            let file = fs::File::create(&path)
                .with_context(|| format!("creating result file {}", path.display()))?;
            write_report(results, params, ncores, file, pretty)
        }
        None => write_report(results, params, ncores, io::stdout().lock(), pretty),
    }
}

/// Encodes the configuration in the file name, e.g.
/// `n1000_i0.80_r0.10_l0.10_u1.00_both`.
fn file_name(params: &RunnerParams, datastruct: &str) -> String {
    format!(
        "n{}_i{:.2}_r{:.2}_l{:.2}_u{:.2}_{}",
        params.n, params.inserts, params.removals, params.lookups, params.map_loadfactor, datastruct
    )
}

fn write_report<W: Write>(
    results: &[RunnerResults],
    params: &RunnerParams,
    ncores: usize,
    out: W,
    pretty: bool,
) -> anyhow::Result<()> {
    if pretty {
        write_pretty(results, params, ncores, out)
    } else {
        write_csv(results, params, ncores, out)
    }
}

fn write_csv<W: Write>(
    results: &[RunnerResults],
    params: &RunnerParams,
    ncores: usize,
    out: W,
) -> anyhow::Result<()> {
    // Rows carry one runtime column per measured thread count, so the
    // writer must accept varying widths.
    let mut writer = WriterBuilder::new().flexible(true).from_writer(out);
    writer.write_record([
        "name",
        "cores",
        "minThreads",
        "maxThreads",
        "n",
        "inserts",
        "removals",
        "lookups",
        "scalingMode",
        "withAffinity",
        "preload",
        "runtimes...",
    ])?;
    for result in results {
        let mut record = vec![
            result.name.clone(),
            ncores.to_string(),
            params.min_threads.to_string(),
            params.max_threads.to_string(),
            params.n.to_string(),
            params.inserts.to_string(),
            params.removals.to_string(),
            params.lookups.to_string(),
            params.scaling.as_str().to_string(),
            params.with_affinity.to_string(),
            params.preload.to_string(),
        ];
        record.extend(result.run_times.iter().map(|t| t.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_pretty<W: Write>(
    results: &[RunnerResults],
    params: &RunnerParams,
    ncores: usize,
    mut out: W,
) -> anyhow::Result<()> {
    writeln!(out, "Concurrency stats:")?;
    writeln!(out, "\tcores={}", ncores)?;
    writeln!(out, "\tminThreads={}", params.min_threads)?;
    writeln!(out, "\tmaxThreads={}", params.max_threads)?;
    writeln!(out, "\taffinity={}", params.with_affinity)?;
    writeln!(out, "Use-profile stats:")?;
    writeln!(out, "\tn={}", params.n)?;
    writeln!(out, "\tinserts={:.2}", params.inserts)?;
    writeln!(out, "\tremovals={:.2}", params.removals)?;
    writeln!(out, "\tlookups={:.2}", params.lookups)?;
    writeln!(out, "\tpreload={:.2}", params.preload)?;
    for result in results {
        writeln!(out, "{}", result.name)?;
        for (k, seconds) in result.run_times.iter().enumerate() {
            writeln!(
                out,
                "\t{} threads - {:.5} seconds",
                params.min_threads + k,
                seconds
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::runner::ScalingMode;

    use super::*;

    fn params() -> RunnerParams {
        RunnerParams {
            n: 1000,
            inserts: 0.8,
            removals: 0.1,
            lookups: 0.1,
            scaling: ScalingMode::Problem,
            with_affinity: false,
            preload: 0.5,
            min_threads: 1,
            max_threads: 2,
            map_loadfactor: 1.0,
        }
    }

    fn results() -> Vec<RunnerResults> {
        vec![RunnerResults {
            name: "CoarseList".to_string(),
            run_times: vec![0.5, 0.25],
        }]
    }

    #[test]
    fn test_file_name_encodes_configuration() {
        assert_eq!(
            file_name(&params(), "both"),
            "n1000_i0.80_r0.10_l0.10_u1.00_both"
        );
    }

    #[test]
    fn test_csv_has_header_and_runtime_columns() {
        let mut out = Vec::new();
        write_csv(&results(), &params(), 8, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "name,cores,minThreads,maxThreads,n,inserts,removals,lookups,\
             scalingMode,withAffinity,preload,runtimes..."
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("CoarseList,8,1,2,1000,0.8,0.1,0.1,problem,false,0.5,"));
        assert_eq!(row.split(',').count(), 13);
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_pretty_lists_every_thread_count() {
        let mut out = Vec::new();
        write_pretty(&results(), &params(), 8, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("cores=8"));
        assert!(text.contains("CoarseList"));
        assert!(text.contains("1 threads - 0.50000 seconds"));
        assert!(text.contains("2 threads - 0.25000 seconds"));
    }

    #[test]
    fn test_emit_creates_directory_and_file() {
        let dir = std::env::temp_dir().join("listbench-report-test");
        let _ = fs::remove_dir_all(&dir);
        emit(&results(), &params(), 8, "list", Some(&dir), false).unwrap();
        // Second emit into the existing directory must not fail.
        emit(&results(), &params(), 8, "list", Some(&dir), false).unwrap();
        let path = dir.join("n1000_i0.80_r0.10_l0.10_u1.00_list");
        assert!(path.exists());
        let _ = fs::remove_dir_all(&dir);
    }
}
