use memalloc::{AllocatorConfig, MemAlloc};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut allocator = match MemAlloc::mmap(1 << 20, AllocatorConfig::debug()) {
        Ok(allocator) => allocator,
        Err(err) => {
            eprintln!("could not reserve the arena: {err}");
            return;
        }
    };

    let Some(block1) = allocator.allocate(4) else { return };
    println!("{:?} at {:?}", block1, allocator.as_ptr(block1));
    let Some(block2) = allocator.allocate(4) else { return };
    println!("{:?} at {:?}", block2, allocator.as_ptr(block2));

    println!("Deallocating block1");
    allocator.free(block1);

    let block3 = allocator.allocate(4);
    println!("Should be first addr {:?}", block3);

    // The arena refuses to grow past its reservation; the heap stays usable.
    println!("Huge request: {:?}", allocator.allocate(1 << 24));
    println!("Small request after that: {:?}", allocator.allocate(64));
}
