//! Demo driver: exercises the dispatcher the way a typical embedder would
//! and prints the statistics snapshot, both line-oriented and as JSON.

use std::mem::size_of;

use anyhow::Result;
use tessera::SegregatedAllocator;

fn main() -> Result<()> {
    let mut allocator = SegregatedAllocator::new();
    allocator.init();

    let pi = allocator.alloc(size_of::<i32>());
    let pd = allocator.alloc(size_of::<f64>());
    let pa = allocator.alloc(10 * size_of::<i32>());
    let a = allocator.alloc(256 * size_of::<i32>());

    allocator.dump_stat();
    for block in allocator.dump_blocks() {
        println!("size - {}, ptr - {:p}", block.size, block.ptr);
    }
    println!("{}", serde_json::to_string_pretty(&allocator.stats())?);

    allocator.free(a);
    allocator.free(pa);
    allocator.free(pd);
    allocator.free(pi);

    allocator.destroy();
    Ok(())
}
