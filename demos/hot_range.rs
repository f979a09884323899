use migrant::prelude::*;
use migrant::harness::num_elements;
use migrant::{check_value, run_trials, Benchmark};

use parking_lot::Mutex;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OpMode {
    AtomicAdd,
    RemoteWrite,
}

impl FromStr for OpMode {
    type Err = RuntimeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "atomic_add" | "remote_add" => Ok(OpMode::AtomicAdd),
            "remote_write" => Ok(OpMode::RemoteWrite),
            _ => Err(RuntimeError::InvalidArgument(format!(
                "Mode {} not implemented!",
                s
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Params {
    n: usize,
    op_mode: OpMode,
    offset: usize,
    length: usize,
}

// Every index i of the input updates array[(offset + i % length) % n],
// so a 'length' sized range starting 'offset' elements into the array takes every update.
struct HotRange {
    params: ReplicatedValue<Params>,
    array: PartitionedArray<i64>,
    indices: PartitionedArray<usize>,
    grain: usize,
}

impl HotRange {
    fn new(world: &World, params: Params, num_threads: usize) -> anyhow::Result<HotRange> {
        let bench = HotRange {
            params: ReplicatedValue::new(world, params),
            array: PartitionedArray::new(world, params.n, Layout::Chunked)?,
            indices: PartitionedArray::new(world, params.n, Layout::Chunked)?,
            grain: grain_for_threads(params.n, num_threads)?,
        };
        let (indices, replicated) = (bench.indices.clone(), bench.params.clone());
        bench.indices.apply(
            grain_for_threads_min(params.n, num_threads, 128)?,
            Strategy::RecursiveRemoteSpawn,
            move |ctx, range| {
                let p = replicated.read_local(ctx);
                for i in range {
                    indices.store(i, (p.offset + (i % p.length)) % p.n)?;
                }
                Ok(())
            },
        )?;
        Ok(bench)
    }

    fn expected(p: &Params, i: usize) -> i64 {
        let pos = (i + p.n - p.offset % p.n) % p.n;
        if pos >= p.length {
            0
        } else if p.op_mode == OpMode::RemoteWrite {
            1
        } else {
            (p.n / p.length + usize::from(pos < p.n % p.length)) as i64
        }
    }
}

impl Benchmark for HotRange {
    fn name(&self) -> &str {
        "hot_range"
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        self.array.fill(0, Strategy::RecursiveRemoteSpawn)?;
        Ok(())
    }

    fn run(&mut self, strategy: Strategy) -> anyhow::Result<()> {
        let (array, indices, params) = (self.array.clone(), self.indices.clone(), self.params.clone());
        self.array.apply(self.grain, strategy, move |ctx, range| {
            let op_mode = params.read_local(ctx).op_mode;
            for i in range {
                let target = indices.load(i)?;
                match op_mode {
                    OpMode::AtomicAdd => {
                        array.fetch_add(target, 1)?;
                    }
                    OpMode::RemoteWrite => array.store(target, 1)?,
                }
            }
            Ok(())
        })?;
        Ok(())
    }

    fn validate(&self) -> Result<(), RuntimeError> {
        let (array, params) = (self.array.clone(), self.params.clone());
        let first_error = Arc::new(Mutex::new(None));
        let err = first_error.clone();
        self.array.apply(self.grain, Strategy::RecursiveRemoteSpawn, move |ctx, range| {
            let p = params.read_local(ctx);
            for i in range {
                if let Err(e) = check_value(i, array.load(i)?, HotRange::expected(&p, i)) {
                    tracing::error!("Error in validation, {}", e);
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
        self.array.len()
    }
}

fn main() {
    tracing_subscriber::fmt::init();
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 8 {
        eprintln!(
            "Usage: {} op_mode strategy log2_num_elements offset length num_threads num_trials",
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
    let op_mode: OpMode = args[0].parse()?;
    let strategy: Strategy = args[1].parse()?;
    let log2_num_elements: u32 = args[2].parse()?;
    let offset: usize = args[3].parse()?;
    let length: usize = args[4].parse()?;
    let num_threads: usize = args[5].parse()?;
    let num_trials: usize = args[6].parse()?;
    if log2_num_elements == 0 {
        anyhow::bail!("log2_num_elements must be > 0");
    }
    let n = num_elements(log2_num_elements, std::mem::size_of::<i64>())?;
    if length == 0 || length > n {
        anyhow::bail!("length must be in [1, {}]", n);
    }
    if num_trials == 0 {
        anyhow::bail!("num_trials must be > 0");
    }

    let world = WorldBuilder::new().build()?;
    let params = Params {
        n,
        op_mode,
        offset,
        length,
    };
    println!("Initializing arrays with {} elements, hot range [{}, {})", n, offset, offset + length);
    let mut bench = HotRange::new(&world, params, num_threads)?;
    println!("Updating hot range with {:?} using {}", op_mode, strategy);
    for report in run_trials(&mut bench, strategy, num_trials)? {
        println!("{:3.2} MUpdates/s", report.items_per_second / 1e6);
    }
    Ok(())
}
