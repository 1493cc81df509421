//! 文件系统模块
//!
//! 这里只包含块缓存层，上层的日志、inode 与文件层通过
//! [`Bcache::bread`] / [`Buf::bwrite`] 以及 `Buf` 的析构访问磁盘块。

mod bio;

pub use bio::{Bcache, BlockId, Buf, BufData};
