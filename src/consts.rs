//! 内核常量

/// 最大处理器（硬件线程）数量
pub const NCPU: usize = 8;

/// 页大小（字节）
pub const PGSIZE: usize = 4096;

/// 页释放时填充的调试字节，便于发现释放后使用
pub const FREE_JUNK: u8 = 1;

/// 页分配时填充的调试字节，便于发现未初始化使用
pub const ALLOC_JUNK: u8 = 5;

pub mod fs {
    /// 块大小（字节）
    pub const BSIZE: usize = 1024;

    /// 块缓存中缓冲块的总数
    pub const NBUF: usize = 30;

    /// 块缓存的哈希桶数量，取质数以减少冲突
    pub const NBUCKETS: usize = 13;
}
