use migrant::prelude::*;
use migrant::harness::num_elements;
use migrant::{check_value, run_trials, Benchmark};

use parking_lot::Mutex;
use std::sync::Arc;

struct GlobalStream {
    a: PartitionedArray<i64>,
    b: PartitionedArray<i64>,
    c: PartitionedArray<i64>,
    grain: usize,
}

impl Benchmark for GlobalStream {
    fn name(&self) -> &str {
        "global_stream"
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        self.c.fill(0, Strategy::RecursiveRemoteSpawn)?;
        Ok(())
    }

    fn run(&mut self, strategy: Strategy) -> anyhow::Result<()> {
        let (a, b, c) = (self.a.clone(), self.b.clone(), self.c.clone());
        self.c.apply(self.grain, strategy, move |ctx, range| {
            ctx.migrate(c.index(range.start)?);
            for i in range {
                c.store(i, a.load(i)? + b.load(i)?)?;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn validate(&self) -> Result<(), RuntimeError> {
        let c = self.c.clone();
        let first_error = Arc::new(Mutex::new(None));
        let err = first_error.clone();
        self.c.apply(self.grain, Strategy::RecursiveRemoteSpawn, move |_ctx, range| {
            for i in range {
                if let Err(e) = check_value(i, c.load(i)?, 3) {
                    tracing::error!("VALIDATION ERROR: {}", e);
                    err.lock().get_or_insert(e);
                    break;
                }
            }
            Ok(())
        })?;
        let res = match first_error.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        };
        res
    }

    fn work_items(&self) -> usize {
        self.c.len()
    }
}

fn main() {
    tracing_subscriber::fmt::init();
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 6 {
        eprintln!(
            "Usage: {} strategy layout log2_num_elements num_threads num_trials",
            args[0]
        );
        std::process::exit(1);
    }
    if let Err(e) = run(&args[1..]) {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(args: &[String]) -> anyhow::Result<()> {
    let strategy: Strategy = args[0].parse()?;
    let layout: Layout = args[1].parse()?;
    let log2_num_elements: u32 = args[2].parse()?;
    let num_threads: usize = args[3].parse()?;
    let num_trials: usize = args[4].parse()?;
    if log2_num_elements == 0 {
        anyhow::bail!("log2_num_elements must be > 0");
    }
    if num_trials == 0 {
        anyhow::bail!("num_trials must be > 0");
    }

    let world = WorldBuilder::new().build()?;
    let n = num_elements(log2_num_elements, std::mem::size_of::<i64>())?;
    let mbytes = n * std::mem::size_of::<i64>() / (1024 * 1024);
    println!(
        "Initializing arrays with {} elements each ({} MiB total, {} MiB per partition)",
        n,
        3 * mbytes,
        3 * mbytes / world.num_partitions()
    );
    let mut bench = GlobalStream {
        a: PartitionedArray::new(&world, n, layout)?,
        b: PartitionedArray::new(&world, n, layout)?,
        c: PartitionedArray::new(&world, n, layout)?,
        grain: grain_for_threads(n, num_threads)?,
    };
    bench.a.fill(1, Strategy::RecursiveRemoteSpawn)?;
    bench.b.fill(2, Strategy::RecursiveRemoteSpawn)?;

    println!("Doing vector addition using {}", strategy);
    for report in run_trials(&mut bench, strategy, num_trials)? {
        // two loads and one store per element
        let bytes_per_second = report.items_per_second * 3.0 * std::mem::size_of::<i64>() as f64;
        println!("{:3.2} MB/s", bytes_per_second / 1e6);
    }
    println!("{:?}", world.stats());
    Ok(())
}
