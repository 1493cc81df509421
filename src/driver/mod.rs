//! 设备驱动接口，块缓存通过它访问磁盘

use crate::fs::BufData;

#[cfg(test)]
pub(crate) mod ramdisk;

/// 同步块设备。
///
/// 每次调用读写恰好一个 `BSIZE` 大小的块，返回时操作已经完成。
/// 块缓存只会在持有该缓冲块睡眠锁、且不持有任何自旋锁时调用这些方法，
/// 因此实现可以在其中睡眠等待设备中断。
pub trait BlockDevice: Sync {
    /// 把设备 `dev` 上第 `blockno` 块的内容读入 `data`。
    fn read(&self, dev: u32, blockno: u32, data: &mut BufData);

    /// 把 `data` 写入设备 `dev` 上第 `blockno` 块。
    fn write(&self, dev: u32, blockno: u32, data: &BufData);
}
