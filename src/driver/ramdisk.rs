//! 测试用内存磁盘，记录读写次数

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::BlockDevice;
use crate::consts::fs::BSIZE;
use crate::fs::BufData;

pub(crate) struct RamDisk {
    blocks: Mutex<HashMap<(u32, u32), [u8; BSIZE]>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl RamDisk {
    pub(crate) fn new() -> Self {
        Self {
            blocks: Mutex::new(HashMap::new()),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub(crate) fn block(&self, dev: u32, blockno: u32) -> [u8; BSIZE] {
        self.blocks
            .lock()
            .unwrap()
            .get(&(dev, blockno))
            .copied()
            .unwrap_or_else(|| pattern(dev, blockno))
    }
}

/// 未写过的块内容由块号决定，便于校验读到的是哪一块
pub(crate) fn pattern(dev: u32, blockno: u32) -> [u8; BSIZE] {
    let mut data = [0u8; BSIZE];
    for (i, b) in data.iter_mut().enumerate() {
        *b = (dev as usize * 31 + blockno as usize * 7 + i) as u8;
    }
    data
}

impl BlockDevice for RamDisk {
    fn read(&self, dev: u32, blockno: u32, data: &mut BufData) {
        self.reads.fetch_add(1, Ordering::SeqCst);
        data.copy_from_slice(&self.block(dev, blockno));
    }

    fn write(&self, dev: u32, blockno: u32, data: &BufData) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut copy = [0u8; BSIZE];
        copy.copy_from_slice(&data[..]);
        self.blocks.lock().unwrap().insert((dev, blockno), copy);
    }
}
