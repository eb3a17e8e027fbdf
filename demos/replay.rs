//! Replays a small malloc-lab trace and prints how well the heap was used.

use memalloc::{
    AllocatorConfig, MemAlloc, VecArena,
    trace::{Trace, replay},
};
use tracing_subscriber::EnvFilter;

const TRACE: &str = "\
20000
6
13
1
a 0 2040
a 1 2040
f 1
a 2 48
a 3 4072
f 3
a 4 4072
f 0
f 2
a 5 4072
r 4 6000
f 4
f 5
";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let trace = match Trace::parse(TRACE) {
        Ok(trace) => trace,
        Err(err) => {
            eprintln!("bad trace: {err}");
            return;
        }
    };

    let mut allocator = MemAlloc::new(VecArena::default(), AllocatorConfig::default());

    match replay(&mut allocator, &trace) {
        Ok(stats) => println!(
            "{} ops, peak payload {} bytes, arena {} bytes, utilization {:.1}%",
            stats.ops,
            stats.peak_payload,
            stats.arena_size,
            stats.utilization * 100.0
        ),
        Err(err) => eprintln!("replay failed: {err}"),
    }
}
