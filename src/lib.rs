//! xv6 内核的块缓存与物理页分配器
//!
//! - [`fs::Bcache`]：按哈希分桶的块缓存，桶内 LRU，本桶无空闲块时向其他桶借用；
//! - [`mm::Kmem`]：每个处理器一条空闲链表的物理页分配器，本地为空时窃取。
//!
//! 两者都在内核启动时构造一次，以引用的形式交给其他子系统。
//! 处理器编号、睡眠/唤醒与磁盘读写由内核通过 [`process`] 与 [`driver`] 中的 trait 注入。

#![cfg_attr(not(test), no_std)]
#![warn(rust_2018_idioms)]

pub mod consts;
pub mod driver;
pub mod fs;
pub mod mm;
pub mod process;
pub mod sleeplock;
pub mod spinlock;
