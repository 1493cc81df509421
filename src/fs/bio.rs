//! 缓存层

use array_macro::array;

use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::consts::fs::{BSIZE, NBUCKETS, NBUF};
use crate::driver::BlockDevice;
use crate::process::Scheduler;
use crate::sleeplock::{SleepLock, SleepLockGuard};
use crate::spinlock::SpinLock;

/// 缓冲块所映射的磁盘位置。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockId {
    pub dev: u32,
    pub blockno: u32,
}

impl BlockId {
    pub const fn new(dev: u32, blockno: u32) -> Self {
        Self { dev, blockno }
    }

    /// 该块所属的哈希桶
    #[inline]
    fn bucket(&self) -> usize {
        (self.dev ^ self.blockno) as usize % NBUCKETS
    }
}

/// 缓冲区缓存（Buffer Cache），用于块设备的读写缓存。
///
/// `Bcache` 提供了一个固定大小的内存缓冲区池，用于缓存磁盘块数据，
/// 以减少重复的磁盘访问并提升 I/O 性能。缓冲块按 `(dev, blockno)` 的哈希
/// 分布到 `NBUCKETS` 个桶中，每个桶有自己的自旋锁和 LRU 链表，
/// 不同桶上的查找互不阻塞。
///
/// 该结构在内核初始化阶段构造一次，以引用的形式交给文件系统使用，
/// 贯穿操作系统运行期间，不会被销毁。
pub struct Bcache<D: BlockDevice, S: Scheduler> {
    /// 哈希桶。
    ///
    /// 每个桶的自旋锁保护桶内 LRU 链表结构，以及桶内所有缓冲块的
    /// 设备号、块号与引用计数。
    buckets: [SpinLock<BufLru>; NBUCKETS],

    /// 缓冲块数组，长度为固定值 `NBUF`。
    ///
    /// 每个缓冲块包含块数据和一个睡眠锁（`SleepLock`），
    /// 以支持对缓冲区数据的细粒度同步访问。
    bufs: [BufInner; NBUF],

    disk: D,

    sched: S,
}

impl<D: BlockDevice, S: Scheduler> Bcache<D, S> {
    /// 构造并初始化缓冲区缓存。
    ///
    /// # 功能说明
    /// 把 `NBUF` 个缓冲块按下标轮流挂到各个哈希桶的链表上（第 `i` 块进入
    /// 第 `i % NBUCKETS` 个桶）。此时缓冲块都没有绑定磁盘块，引用计数为 0，
    /// 第一次未命中时即被回收使用。
    ///
    /// # 参数
    /// - `disk`：实际执行块读写的磁盘驱动；
    /// - `sched`：睡眠锁使用的调度器。
    pub fn new(disk: D, sched: S) -> Self {
        let bcache = Self {
            buckets: array![_ => SpinLock::new(BufLru::new(), "bcache.bucket"); NBUCKETS],
            bufs: array![_ => BufInner::new(); NBUF],
            disk,
            sched,
        };

        for index in 0..NBUF {
            bcache.buckets[index % NBUCKETS].lock().push_head(index);
        }

        log::info!("bcache: {} buffers of {} bytes in {} buckets", NBUF, BSIZE, NBUCKETS);
        bcache
    }

    /// 获取指定设备与块号对应的缓冲块，返回时已持有其睡眠锁。
    ///
    /// # 功能说明
    /// 若缓存命中，则返回已存在的缓冲块；否则回收一个未被引用的块并分配给新请求。
    /// 该函数不涉及实际磁盘读写，数据是否有效由 [`Bcache::bread`] 处理。
    ///
    /// # 流程解释
    /// - 锁住 `(dev, blockno)` 所在的桶，查找是否已缓存，命中则引用计数加一；
    /// - 未命中时从该桶 LRU 尾部回收引用计数为 0 的块；
    /// - 本桶没有空闲块时，释放本桶锁，依次扫描其他桶，从其尾部借一个空闲块：
    ///   在借出桶的锁下把它摘下，释放借出桶的锁，再锁住目标桶并插入。
    ///   任意时刻最多持有一个桶锁，因此不会死锁；
    /// - 以上所有步骤都在释放桶锁之后才获取睡眠锁。
    ///
    /// # 可能的错误
    /// - 所有缓冲块都处于被引用状态时触发 panic（`"bget: no buffers"`），
    ///   缓冲块总数是固定的，这表示调用方同时持有的块超过了上限。
    pub fn bget(&self, dev: u32, blockno: u32) -> Buf<'_, D, S> {
        let id = BlockId::new(dev, blockno);
        let h = id.bucket();
        let mut bucket = self.buckets[h].lock();

        // 块是否已缓存？
        if let Some(index) = bucket.find_cached(id) {
            drop(bucket);
            return self.locked(index, id);
        }

        // 未缓存，回收本桶中最近最少使用的空闲缓冲区
        if let Some(index) = bucket.recycle(id) {
            self.bufs[index].valid.store(false, Ordering::Relaxed);
            drop(bucket);
            return self.locked(index, id);
        }
        drop(bucket);

        // 从其他桶借用
        for i in (0..NBUCKETS).filter(|&i| i != h) {
            let stolen = self.buckets[i].lock().steal();
            if let Some(index) = stolen {
                log::debug!("bcache: borrow buf {} from bucket {} into bucket {}", index, i, h);
                return self.adopt(h, index, id);
            }
        }

        panic!("bget: no buffers");
    }

    /// 把借来的缓冲块插入目标桶。
    ///
    /// 调用时 `index` 已不在任何桶的链表中，其他执行流找不到它。
    /// 在不持有目标桶锁的这段时间里，别的执行流可能已经把 `id` 缓存进了目标桶，
    /// 此时改用已缓存的块，借来的块以空闲状态挂到目标桶的 LRU 尾部。
    fn adopt(&self, h: usize, index: usize, id: BlockId) -> Buf<'_, D, S> {
        let mut bucket = self.buckets[h].lock();
        match bucket.find_cached(id) {
            Some(cached) => {
                bucket.park(index);
                drop(bucket);
                self.locked(cached, id)
            }
            None => {
                bucket.insert(index, id);
                self.bufs[index].valid.store(false, Ordering::Relaxed);
                drop(bucket);
                self.locked(index, id)
            }
        }
    }

    /// 获取睡眠锁，可能在这里挂起
    fn locked(&self, index: usize, id: BlockId) -> Buf<'_, D, S> {
        Buf {
            index,
            id,
            cache: self,
            data: Some(self.bufs[index].data.lock(&self.sched)),
        }
    }

    /// 从缓冲区缓存中读取指定设备与块号对应的数据。
    ///
    /// # 功能说明
    /// 调用 `bget` 获取缓冲块，若该块的 `valid` 标志为 false（从未加载或刚被回收），
    /// 则同步地从磁盘读取一次并置位 `valid`。这是块缓存中唯一发生磁盘读的地方。
    ///
    /// # 返回值
    /// - 持有睡眠锁、数据有效的 `Buf`。
    pub fn bread(&self, dev: u32, blockno: u32) -> Buf<'_, D, S> {
        let mut b = self.bget(dev, blockno);
        if !self.bufs[b.index].valid.load(Ordering::Relaxed) {
            self.disk.read(dev, blockno, b.data_mut());
            self.bufs[b.index].valid.store(true, Ordering::Relaxed);
        }
        b
    }

    /// 释放一次引用，引用计数归零时移到 LRU 头部。
    fn brelse(&self, index: usize, id: BlockId) {
        self.buckets[id.bucket()].lock().move_if_no_ref(index);
    }
}

/// 缓冲块数据的包装结构，表示一个已分配的磁盘块缓存实体。
///
/// `Buf` 代表一个特定 `(dev, blockno)` 的缓冲区块，
/// 持有对其数据的独占访问权限（由 `SleepLockGuard` 保护），
/// 在生命周期结束时先释放睡眠锁，再减少引用计数并更新 LRU 状态。
pub struct Buf<'a, D: BlockDevice, S: Scheduler> {
    /// 缓冲块在缓冲数组中的索引位置。
    index: usize,

    id: BlockId,

    cache: &'a Bcache<D, S>,

    /// 缓冲数据的睡眠锁保护访问器。
    ///
    /// 在 `Buf` 生命周期内始终为 `Some`，析构时先取出以释放锁。
    data: Option<SleepLockGuard<'a, BufData>>,
}

impl<'a, D: BlockDevice, S: Scheduler> Buf<'a, D, S> {
    pub fn read_blockno(&self) -> u32 {
        self.id.blockno
    }

    pub fn read_dev(&self) -> u32 {
        self.id.dev
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn data(&self) -> &BufData {
        match self.data.as_ref() {
            Some(guard) => &**guard,
            None => panic!("buf: not locked"),
        }
    }

    pub fn data_mut(&mut self) -> &mut BufData {
        match self.data.as_mut() {
            Some(guard) => &mut **guard,
            None => panic!("buf: not locked"),
        }
    }

    /// 把缓冲块内容同步写回磁盘（直写，没有脏位延迟）。
    pub fn bwrite(&mut self) {
        let data = match self.data.as_ref() {
            Some(guard) => &**guard,
            None => panic!("bwrite: not locked"),
        };
        self.cache.disk.write(self.id.dev, self.id.blockno, data);
    }

    /// 将当前缓冲块的引用计数加一，表示“钉住”该块，防止其被回收。
    ///
    /// # 功能说明
    /// 日志层在事务提交前需要让块一直留在缓存里，即使 `Buf` 已经释放。
    /// 需与 `unpin` 配对使用，不影响睡眠锁。
    pub fn pin(&self) {
        self.cache.buckets[self.id.bucket()].lock().pin(self.index);
    }

    /// 将当前缓冲块的引用计数减一，释放“钉住”状态。
    ///
    /// # 可能的错误
    /// - 调用方自身持有一次引用，若减一后引用计数不大于 0，
    ///   说明 `pin`/`unpin` 不配对，触发 panic。
    pub fn unpin(&self) {
        self.cache.buckets[self.id.bucket()].lock().unpin(self.index);
    }
}

impl<'a, D: BlockDevice, S: Scheduler> Drop for Buf<'a, D, S> {
    fn drop(&mut self) {
        match self.data.take() {
            Some(guard) => drop(guard),
            None => panic!("brelse: not locked"),
        }
        self.cache.brelse(self.index, self.id);
    }
}

/// 单个哈希桶内的 LRU（最近最少使用）链表。
///
/// 链表节点以缓冲块下标链接，`inner[i]` 只在缓冲块 `i` 当前属于本桶时有意义。
/// 缓冲块在桶之间转移时，元信息随之从借出桶转到目标桶。
struct BufLru {
    /// 缓冲控制块数组，按缓冲块下标索引。
    inner: [BufCtrl; NBUF],

    /// 最近使用的块。
    head: Option<usize>,

    /// 最久未使用的块，回收从这里开始向前查找。
    tail: Option<usize>,
}

impl BufLru {
    fn new() -> Self {
        Self {
            inner: array![_ => BufCtrl::new(); NBUF],
            head: None,
            tail: None,
        }
    }

    /// 从头部开始查找 `id`，命中则引用计数加一。
    fn find_cached(&mut self, id: BlockId) -> Option<usize> {
        let mut b = self.head;
        while let Some(index) = b {
            let ctrl = &mut self.inner[index];
            if ctrl.id == Some(id) {
                ctrl.refcnt += 1;
                return Some(index);
            }
            b = ctrl.next;
        }
        None
    }

    /// 从尾部向前查找引用计数为 0 的块，就地改绑到 `id`。
    fn recycle(&mut self, id: BlockId) -> Option<usize> {
        let index = self.lru_unused()?;
        let ctrl = &mut self.inner[index];
        ctrl.id = Some(id);
        ctrl.refcnt = 1;
        Some(index)
    }

    /// 从尾部向前查找引用计数为 0 的块，把它从本桶摘下。
    fn steal(&mut self) -> Option<usize> {
        let index = self.lru_unused()?;
        self.unlink(index);
        self.inner[index].id = None;
        Some(index)
    }

    fn lru_unused(&self) -> Option<usize> {
        let mut b = self.tail;
        while let Some(index) = b {
            let ctrl = &self.inner[index];
            if ctrl.refcnt == 0 {
                return Some(index);
            }
            b = ctrl.prev;
        }
        None
    }

    /// 接收借来的块，绑定到 `id` 并作为最近使用的块插入头部。
    fn insert(&mut self, index: usize, id: BlockId) {
        let ctrl = &mut self.inner[index];
        ctrl.id = Some(id);
        ctrl.refcnt = 1;
        self.push_head(index);
    }

    /// 接收借来但用不上的块，作为空闲块挂到尾部。
    fn park(&mut self, index: usize) {
        let ctrl = &mut self.inner[index];
        ctrl.id = None;
        ctrl.refcnt = 0;
        self.push_tail(index);
    }

    /// 引用计数减一，归零时移到头部。
    fn move_if_no_ref(&mut self, index: usize) {
        let b = &mut self.inner[index];
        if !b.linked || b.refcnt == 0 {
            panic!("brelse: buf {} not referenced", index);
        }
        b.refcnt -= 1;
        if b.refcnt == 0 && self.head != Some(index) {
            self.unlink(index);
            self.push_head(index);
        }
    }

    fn pin(&mut self, index: usize) {
        let b = &mut self.inner[index];
        if !b.linked || b.refcnt == 0 {
            panic!("pin: buf {} not referenced", index);
        }
        b.refcnt += 1;
    }

    fn unpin(&mut self, index: usize) {
        let b = &mut self.inner[index];
        if b.refcnt <= 1 {
            panic!("unpin: buf {} not pinned", index);
        }
        b.refcnt -= 1;
    }

    fn push_head(&mut self, index: usize) {
        debug_assert!(!self.inner[index].linked);
        let old_head = self.head;
        {
            let b = &mut self.inner[index];
            b.prev = None;
            b.next = old_head;
            b.linked = true;
        }
        match old_head {
            Some(h) => self.inner[h].prev = Some(index),
            None => self.tail = Some(index),
        }
        self.head = Some(index);
    }

    fn push_tail(&mut self, index: usize) {
        debug_assert!(!self.inner[index].linked);
        let old_tail = self.tail;
        {
            let b = &mut self.inner[index];
            b.prev = old_tail;
            b.next = None;
            b.linked = true;
        }
        match old_tail {
            Some(t) => self.inner[t].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
    }

    fn unlink(&mut self, index: usize) {
        let (prev, next) = {
            let b = &mut self.inner[index];
            debug_assert!(b.linked);
            b.linked = false;
            (b.prev.take(), b.next.take())
        };
        match prev {
            Some(p) => self.inner[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.inner[n].prev = prev,
            None => self.tail = prev,
        }
    }
}

/// 缓冲块控制信息：所映射的磁盘块、引用计数以及在桶内链表中的前后节点。
#[derive(Clone, Copy)]
struct BufCtrl {
    /// 从未使用过或刚被借出的块没有绑定磁盘块
    id: Option<BlockId>,
    prev: Option<usize>,
    next: Option<usize>,
    /// 为 0 时可被回收
    refcnt: usize,
    linked: bool,
}

impl BufCtrl {
    const fn new() -> Self {
        Self {
            id: None,
            prev: None,
            next: None,
            refcnt: 0,
            linked: false,
        }
    }
}

/// 缓冲块的数据部分，包含实际的磁盘块内容及其有效性标志。
struct BufInner {
    /// 标志该缓冲块的数据是否已从磁盘加载。
    ///
    /// 在持有桶自旋锁且引用计数刚被当前执行流置为 1 时清除，
    /// 在持有 data 睡眠锁时读取和置位。
    valid: AtomicBool,

    /// 缓冲块的实际数据，受睡眠锁保护。
    data: SleepLock<BufData>,
}

impl BufInner {
    fn new() -> Self {
        Self {
            valid: AtomicBool::new(false),
            data: SleepLock::new(BufData::new(), "buffer"),
        }
    }
}

/// BufData 的对齐方式应足以满足可能由此结构体转换而来的其他结构体的需求。
#[repr(C, align(8))]
pub struct BufData([u8; BSIZE]);

impl BufData {
    const fn new() -> Self {
        Self([0; BSIZE])
    }
}

impl Deref for BufData {
    type Target = [u8; BSIZE];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for BufData {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
