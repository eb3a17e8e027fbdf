//! Replay of malloc-lab style traces.
//!
//! A trace file starts with four integers (suggested heap size, number of ids, number
//! of operations and a weight) followed by one operation per line:
//!
//! ```text
//! a <id> <bytes>    allocate `bytes` and call the block `id`
//! r <id> <bytes>    resize block `id` to `bytes`
//! f <id>            free block `id`
//! ```
//!
//! [`replay`] runs a trace against an allocator and double checks it along the way.

use std::{collections::HashMap, str::FromStr};

use thiserror::Error;
use tracing::{debug, info};

use crate::{Address, MemAlloc, arena::Arena, error::AllocError};

/// Errors found while parsing or replaying a trace.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TraceError {
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("op {op}: allocator returned nothing for {size} bytes")]
    OutOfMemory { op: usize, size: usize },

    #[error("op {op}: id {id} is not live")]
    UnknownId { op: usize, id: usize },

    #[error("op {op}: payload of id {id} was overwritten")]
    PayloadClobbered { op: usize, id: usize },

    #[error("op {op}: payload of id {id} overlaps id {other}")]
    Overlap { op: usize, id: usize, other: usize },

    #[error("op {op}: {source}")]
    Heap {
        op: usize,
        #[source]
        source: AllocError,
    },
}

/// One trace operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Alloc { id: usize, size: usize },
    Realloc { id: usize, size: usize },
    Free { id: usize },
}

/// A parsed trace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trace {
    pub suggested_heap_size: usize,
    pub num_ids: usize,
    pub weight: usize,
    pub ops: Vec<Op>,
}

impl Trace {
    pub fn parse(text: &str) -> Result<Self, TraceError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'));

        let mut header = [0usize; 4];
        for slot in header.iter_mut() {
            let (line, text) = lines.next().ok_or_else(|| TraceError::Parse {
                line: 0,
                reason: "truncated header".to_string(),
            })?;
            *slot = number(line, text)?;
        }
        let [suggested_heap_size, num_ids, num_ops, weight] = header;

        let ops = lines.map(|(line, text)| op(line, text)).collect::<Result<Vec<_>, _>>()?;

        if ops.len() != num_ops {
            return Err(TraceError::Parse {
                line: 0,
                reason: format!("header announces {num_ops} ops, found {}", ops.len()),
            });
        }

        if let Some(id) = ops.iter().map(Op::id).find(|&id| id >= num_ids) {
            return Err(TraceError::Parse {
                line: 0,
                reason: format!("id {id} out of range, trace has {num_ids} ids"),
            });
        }

        Ok(Self { suggested_heap_size, num_ids, weight, ops })
    }
}

impl FromStr for Trace {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Op {
    pub fn id(&self) -> usize {
        match *self {
            Op::Alloc { id, .. } | Op::Realloc { id, .. } | Op::Free { id } => id,
        }
    }
}

fn number(line: usize, text: &str) -> Result<usize, TraceError> {
    text.parse().map_err(|_| TraceError::Parse {
        line,
        reason: format!("expected a number, found {text:?}"),
    })
}

fn op(line: usize, text: &str) -> Result<Op, TraceError> {
    let fields: Vec<&str> = text.split_whitespace().collect();

    match fields.as_slice() {
        ["a", id, size] => Ok(Op::Alloc { id: number(line, id)?, size: number(line, size)? }),
        ["r", id, size] => Ok(Op::Realloc { id: number(line, id)?, size: number(line, size)? }),
        ["f", id] => Ok(Op::Free { id: number(line, id)? }),
        _ => Err(TraceError::Parse { line, reason: format!("bad operation {text:?}") }),
    }
}

/// Outcome of a successful [`replay`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReplayStats {
    pub ops: usize,
    /// Highest number of payload bytes live at the same time.
    pub peak_payload: usize,
    /// Arena size at the end of the trace.
    pub arena_size: usize,
    /// `peak_payload / arena_size`.
    pub utilization: f64,
}

/// A block the trace currently holds.
#[derive(Clone, Copy)]
struct Live {
    addr: Address,
    size: usize,
}

/// Byte pattern every payload of `id` is filled with.
fn pattern(id: usize) -> u8 {
    (id % 251) as u8 + 1
}

/// Runs `trace` on `alloc`, which is re-initialized first.
///
/// Every payload is filled with a pattern derived from its id. The pattern is checked
/// again whenever the block is resized or freed, live payloads are checked for overlap
/// after each allocation, and the heap checker runs after every operation.
pub fn replay<A: Arena>(alloc: &mut MemAlloc<A>, trace: &Trace) -> Result<ReplayStats, TraceError> {
    alloc.init().map_err(|source| TraceError::Heap { op: 0, source })?;

    let mut live: HashMap<usize, Live> = HashMap::with_capacity(trace.num_ids);
    let mut payload = 0usize;
    let mut peak_payload = 0usize;

    for (op, &step) in trace.ops.iter().enumerate() {
        match step {
            Op::Alloc { id, size } => {
                let addr = alloc.allocate(size).ok_or(TraceError::OutOfMemory { op, size })?;

                alloc.payload_mut(addr)[..size].fill(pattern(id));
                check_overlap(&live, op, id, addr, size)?;

                live.insert(id, Live { addr, size });
                payload += size;
            }
            Op::Realloc { id, size } => {
                let old = *live.get(&id).ok_or(TraceError::UnknownId { op, id })?;
                check_pattern(alloc, op, id, old)?;

                let addr = alloc
                    .resize(old.addr, size)
                    .ok_or(TraceError::OutOfMemory { op, size })?;

                let kept = old.size.min(size);
                if alloc.payload(addr)[..kept].iter().any(|&b| b != pattern(id)) {
                    return Err(TraceError::PayloadClobbered { op, id });
                }
                alloc.payload_mut(addr)[..size].fill(pattern(id));

                live.remove(&id);
                check_overlap(&live, op, id, addr, size)?;
                live.insert(id, Live { addr, size });

                payload = payload - old.size + size;
            }
            Op::Free { id } => {
                let old = live.remove(&id).ok_or(TraceError::UnknownId { op, id })?;
                check_pattern(alloc, op, id, old)?;

                alloc.free(old.addr);
                payload -= old.size;
            }
        }

        peak_payload = peak_payload.max(payload);
        alloc.check_heap().map_err(|source| TraceError::Heap { op, source })?;
        debug!(op, ?step, payload, "trace op replayed");
    }

    let arena_size = alloc.arena().len();
    let stats = ReplayStats {
        ops: trace.ops.len(),
        peak_payload,
        arena_size,
        utilization: peak_payload as f64 / arena_size as f64,
    };

    info!(
        ops = stats.ops,
        peak_payload,
        arena_size,
        utilization = stats.utilization,
        "trace replayed"
    );

    Ok(stats)
}

fn check_pattern<A: Arena>(
    alloc: &MemAlloc<A>,
    op: usize,
    id: usize,
    block: Live,
) -> Result<(), TraceError> {
    if alloc.payload(block.addr)[..block.size].iter().any(|&b| b != pattern(id)) {
        return Err(TraceError::PayloadClobbered { op, id });
    }

    Ok(())
}

fn check_overlap(
    live: &HashMap<usize, Live>,
    op: usize,
    id: usize,
    addr: Address,
    size: usize,
) -> Result<(), TraceError> {
    let (start, end) = (addr.offset(), addr.offset() + size);

    for (&other, block) in live {
        let (other_start, other_end) = (block.addr.offset(), block.addr.offset() + block.size);

        if start < other_end && other_start < end {
            return Err(TraceError::Overlap { op, id, other });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AllocatorConfig, VecArena};

    const SHORT: &str = "\
        20000
        3
        8
        1
        a 0 512
        a 1 128
        r 0 640
        a 2 4000
        f 1
        r 2 40
        f 0
        f 2
    ";

    fn allocator() -> MemAlloc {
        MemAlloc::new(VecArena::with_limit(1 << 20), AllocatorConfig::default())
    }

    #[test]
    fn parses_header_and_ops() {
        let trace: Trace = SHORT.parse().unwrap();

        assert_eq!(trace.suggested_heap_size, 20000);
        assert_eq!(trace.num_ids, 3);
        assert_eq!(trace.weight, 1);
        assert_eq!(trace.ops.len(), 8);
        assert_eq!(trace.ops[2], Op::Realloc { id: 0, size: 640 });
        assert_eq!(trace.ops[4], Op::Free { id: 1 });
    }

    #[test]
    fn rejects_bad_lines() {
        let err = Trace::parse("10\n1\n1\n1\nx 0 12\n").unwrap_err();
        assert_eq!(
            err,
            TraceError::Parse { line: 5, reason: "bad operation \"x 0 12\"".to_string() }
        );

        let err = Trace::parse("10\n1\n2\n1\na 0 12\n").unwrap_err();
        assert!(matches!(err, TraceError::Parse { line: 0, .. }));

        let err = Trace::parse("10\n1\n1\n1\na 3 12\n").unwrap_err();
        assert!(matches!(err, TraceError::Parse { line: 0, .. }));

        assert!(Trace::parse("10\n1\n").is_err());
    }

    #[test]
    fn replays_short_trace() {
        let trace = Trace::parse(SHORT).unwrap();
        let mut alloc = allocator();

        let stats = replay(&mut alloc, &trace).unwrap();

        assert_eq!(stats.ops, 8);
        assert_eq!(stats.peak_payload, 640 + 128 + 4000);
        assert!(stats.utilization > 0.0 && stats.utilization <= 1.0);
        assert_eq!(alloc.check_heap().unwrap().allocated_blocks, 0);
    }

    #[test]
    fn replays_realloc_heavy_trace() {
        let mut text = String::from("0\n1\n201\n1\na 0 8\n");
        for step in 1..=200 {
            text.push_str(&format!("r 0 {}\n", 8 + step * 24));
        }

        let trace = Trace::parse(&text).unwrap();
        let stats = replay(&mut allocator(), &trace).unwrap();

        assert_eq!(stats.peak_payload, 8 + 200 * 24);
    }

    #[test]
    fn replays_interleaved_trace() {
        let ids = 64;
        let mut ops = Vec::new();
        for id in 0..ids {
            ops.push(format!("a {id} {}", 1 + (id * 53) % 700));
        }
        for id in (0..ids).step_by(2) {
            ops.push(format!("f {id}"));
        }
        for id in (1..ids).step_by(2) {
            ops.push(format!("r {id} {}", 1 + (id * 97) % 1500));
        }
        for id in (1..ids).step_by(2) {
            ops.push(format!("f {id}"));
        }

        let text = format!("0\n{ids}\n{}\n1\n{}\n", ops.len(), ops.join("\n"));
        let trace = Trace::parse(&text).unwrap();

        let stats = replay(&mut allocator(), &trace).unwrap();
        assert_eq!(stats.ops, ops.len());
    }

    #[test]
    fn out_of_memory_is_reported() {
        let trace = Trace::parse("0\n1\n1\n1\na 0 100000\n").unwrap();
        let mut alloc = MemAlloc::new(VecArena::with_limit(8192), AllocatorConfig::default());

        assert_eq!(
            replay(&mut alloc, &trace),
            Err(TraceError::OutOfMemory { op: 0, size: 100000 })
        );
    }

    #[test]
    fn unknown_id_is_reported() {
        let trace = Trace::parse("0\n2\n1\n1\nf 1\n").unwrap();

        assert_eq!(replay(&mut allocator(), &trace), Err(TraceError::UnknownId { op: 0, id: 1 }));
    }
}
