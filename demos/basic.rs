use memalloc::{Address, MemAlloc};
use tracing_subscriber::EnvFilter;

fn log_alloc(addr: Option<Address>, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut allocator = MemAlloc::default();

    let addr1 = allocator.allocate(8);
    log_alloc(addr1, 8);

    let addr2 = allocator.allocate(100);
    log_alloc(addr2, 100);

    let addr3 = allocator.allocate(16);
    log_alloc(addr3, 16);

    let (Some(addr1), Some(addr2), Some(addr3)) = (addr1, addr2, addr3) else {
        eprintln!("allocation failed");
        return;
    };

    allocator.payload_mut(addr2)[..12].copy_from_slice(b"Heap Testing");

    // Merge example: freeing `addr1` leaves a hole that is too small for 100 bytes,
    // freeing `addr2` next to it makes one big enough.
    allocator.free(addr1);
    allocator.free(addr2);

    let addr4 = allocator.allocate(110);
    if addr4 == Some(addr1) {
        println!("Correctly reused at {addr1:?}");
    } else {
        println!("Not correctly reused. 1 was at {addr1:?} and 4 is at {addr4:?}");
    }

    // Growing in place over the free space that follows.
    let grown = allocator.resize(addr3, 2000);
    println!("Resized {addr3:?} to 2000 bytes: {grown:?}");

    println!("{:#?}", allocator.stats());
}
