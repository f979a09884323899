use migrant::prelude::*;
use migrant::harness::num_elements;
use migrant::{check_value, run_trials, Benchmark};

use std::str::FromStr;

#[derive(Clone, Copy, Debug)]
enum Mode {
    // a plain loop on the calling thread
    Serial,
    // every task adds its partial sum to a single cell
    PerThreadRemote,
    // every task adds its partial sum to the cell of its partition, cells are combined at the end
    PerNodeletRemote,
}

impl FromStr for Mode {
    type Err = RuntimeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "serial" => Ok(Mode::Serial),
            "per_thread_remote" => Ok(Mode::PerThreadRemote),
            "per_nodelet_remote" => Ok(Mode::PerNodeletRemote),
            _ => Err(RuntimeError::InvalidArgument(format!(
                "Mode {} not implemented!",
                s
            ))),
        }
    }
}

struct GlobalReduce {
    world: World,
    mode: Mode,
    array: PartitionedArray<i64>,
    grain: usize,
    sum: i64,
}

impl Benchmark for GlobalReduce {
    fn name(&self) -> &str {
        "global_reduce"
    }

    fn run(&mut self, strategy: Strategy) -> anyhow::Result<()> {
        self.sum = match self.mode {
            Mode::Serial => {
                let mut sum = 0;
                for i in 0..self.array.len() {
                    sum += self.array.load(i)?;
                }
                sum
            }
            Mode::PerThreadRemote => {
                let (array, total) = (self.array.clone(), Accumulator::<i64>::sum(&self.world));
                let t = total.clone();
                self.array.apply(self.grain, strategy, move |_ctx, range| {
                    let mut local_sum = 0;
                    for i in range {
                        local_sum += array.load(i)?;
                    }
                    t.local_update(0, ReduceOp::Add, local_sum)?;
                    Ok(())
                })?;
                total.combine()
            }
            Mode::PerNodeletRemote => self.array.sum(strategy)?,
        };
        Ok(())
    }

    fn validate(&self) -> Result<(), RuntimeError> {
        check_value(0, self.sum, self.array.len() as i64)
    }

    fn work_items(&self) -> usize {
        self.array.len()
    }
}

fn main() {
    tracing_subscriber::fmt::init();
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 6 {
        eprintln!(
            "Usage: {} mode strategy log2_num_elements num_threads num_trials",
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
    let mode: Mode = args[0].parse()?;
    let strategy: Strategy = args[1].parse()?;
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
        mbytes,
        mbytes / world.num_partitions()
    );
    let array = PartitionedArray::<i64>::new(&world, n, Layout::Chunked)?;
    array.fill(1, Strategy::RecursiveRemoteSpawn)?;

    let mut bench = GlobalReduce {
        world: world.clone(),
        mode,
        array,
        grain: grain_for_threads(n, num_threads)?,
        sum: 0,
    };
    println!("Doing reduction using {:?} with {}", mode, strategy);
    for report in run_trials(&mut bench, strategy, num_trials)? {
        let bytes_per_second = report.items_per_second * std::mem::size_of::<i64>() as f64;
        println!("{:3.2} MB/s", bytes_per_second / 1e6);
    }
    bench.array.deallocate();
    Ok(())
}
