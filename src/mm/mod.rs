//! 内存管理模块

pub use addr::{pg_round_down, pg_round_up, PhysAddr};
pub use kalloc::{KallocError, Kmem};

mod addr;
pub mod kalloc;
mod list;
