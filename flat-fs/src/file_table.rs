//! # 打开文件表
//!
//! 登记当前所有打开的文件，并依照 inode 的状态仲裁并发的打开与关闭：
//!
//! - 只读打开：inode 正在被写则阻塞，待删除则失败，否则立即进入；
//! - 其它模式：inode 空闲才能进入，正在被读或写则阻塞，待删除则失败。
//!
//! 阻塞的打开者挂在按 inode 编号区分的等待队列上，
//! 关闭或删除该 inode 时按先来后到的顺序唤醒，醒来后从头重新仲裁。

use std::collections::{BTreeSet, VecDeque};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, Thread};

use enumflags2::{BitFlags, bitflags};
use spin::Mutex;

use crate::layout::{Inode, InodeArea, InodeStatus};
use crate::{FsError, Result};

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read = 0b01,
    Write = 0b10,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// `"r"`
    ReadOnly,
    /// `"w"`，打开时截断文件
    WriteOnly,
    /// `"w+"`
    ReadWrite,
    /// `"a"`，打开时定位到文件末尾
    Append,
}

impl OpenMode {
    pub fn access(self) -> BitFlags<Access> {
        match self {
            Self::ReadOnly => Access::Read.into(),
            Self::WriteOnly | Self::Append => Access::Write.into(),
            Self::ReadWrite => Access::Read | Access::Write,
        }
    }

    #[inline]
    pub fn readable(self) -> bool {
        self.access().contains(Access::Read)
    }

    #[inline]
    pub fn writable(self) -> bool {
        self.access().contains(Access::Write)
    }
}

impl FromStr for OpenMode {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "r" => Ok(Self::ReadOnly),
            "w" => Ok(Self::WriteOnly),
            "w+" => Ok(Self::ReadWrite),
            "a" => Ok(Self::Append),
            _ => Err(FsError::InvalidArgument),
        }
    }
}

/// 一次打开的会话状态，由 `open` 交给调用者，`close` 时收回
#[derive(Debug)]
pub struct FileHandle {
    id: u64,
    inumber: u16,
    /// 会话内缓存的 inode，读写前会从磁盘刷新
    pub(crate) inode: Inode,
    mode: OpenMode,
    pub(crate) seek: u32,
}

impl FileHandle {
    #[inline]
    pub fn inumber(&self) -> u16 {
        self.inumber
    }

    #[inline]
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// 读写指针
    #[inline]
    pub fn position(&self) -> u64 {
        self.seek as u64
    }
}

/// 打开文件表的表项
#[derive(Debug)]
struct Entry {
    id: u64,
    inumber: u16,
    mode: OpenMode,
}

/// 受表锁保护的全部状态
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<Entry>,
    next_id: u64,
    wait_queue: WaitQueue,
    /// 删除时仍被打开的 inode，最后一个引用关闭前不能分配给新文件名
    pending_delete: BTreeSet<u16>,
}

impl Registry {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn is_pending_delete(&self, inumber: u16) -> bool {
        self.pending_delete.contains(&inumber)
    }

    #[inline]
    pub fn mark_pending_delete(&mut self, inumber: u16) {
        self.pending_delete.insert(inumber);
    }

    /// 唤醒等待 `inumber` 的全部打开者
    #[inline]
    pub fn wake(&mut self, inumber: u16) {
        self.wait_queue.wake_all(inumber);
    }
}

#[derive(Debug, Default)]
pub struct OpenFileTable {
    registry: Mutex<Registry>,
}

impl OpenFileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 打开文件。
    ///
    /// `resolve` 在表锁内把文件名解析为 inode 编号（必要时新建），
    /// 每次被唤醒都会重新调用，因为等待期间文件可能已被删除。
    pub fn open(
        &self,
        mode: OpenMode,
        inodes: &InodeArea,
        mut resolve: impl FnMut(&Registry) -> Result<u16>,
    ) -> Result<FileHandle> {
        loop {
            let mut registry = self.registry.lock();
            let inumber = resolve(&*registry)?;

            let mut inode = inodes.load(inumber)?;
            // 新建的文件名指向未使用的 inode
            if inode.status == InodeStatus::Unused {
                inode.status = inode.status.transition(InodeStatus::Used)?;
            }

            let Some(next) = admit(mode, inode.status)? else {
                log::debug!("open inode {inumber} as {mode:?} blocked by {:?}", inode.status);
                let waiter = registry.wait_queue.push(inumber);
                drop(registry);
                waiter.wait();
                continue;
            };

            inode.status = inode.status.transition(next)?;
            inode.open_count += 1;
            inodes.store(inumber, &inode);

            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push(Entry { id, inumber, mode });
            log::debug!(
                "open inode {inumber} as {mode:?}, {} holder(s)",
                inode.open_count
            );

            return Ok(FileHandle {
                id,
                inumber,
                inode,
                mode,
                seek: 0,
            });
        }
    }

    /// 关闭文件：减少 inode 的引用计数，最后一个引用离开时恢复 inode 状态，
    /// 然后唤醒等待该 inode 的打开者。
    pub fn close(&self, handle: FileHandle, inodes: &InodeArea) -> Result<()> {
        let mut registry = self.registry.lock();
        let Some(pos) = registry.entries.iter().position(|e| e.id == handle.id) else {
            return Err(FsError::InvalidState);
        };

        let mut inode = inodes.load(handle.inumber)?;
        inode.open_count = inode.open_count.saturating_sub(1);
        let next = match inode.status {
            InodeStatus::PendingDelete if inode.open_count == 0 => InodeStatus::Unused,
            InodeStatus::Reading if inode.open_count > 0 => InodeStatus::Reading,
            InodeStatus::Reading | InodeStatus::Writing => InodeStatus::Used,
            other => other,
        };
        if next != inode.status {
            inode.status = inode.status.transition(next)?;
        }
        inodes.store(handle.inumber, &inode);

        if inode.status == InodeStatus::Unused {
            registry.pending_delete.remove(&handle.inumber);
        }
        let entry = registry.entries.remove(pos);
        registry.wake(entry.inumber);
        log::debug!(
            "close inode {} ({:?}), {} holder(s) left",
            entry.inumber,
            entry.mode,
            inode.open_count
        );

        Ok(())
    }

    /// 持表锁执行 `f`，格式化与删除用它与打开、关闭互斥
    pub fn exclusive<V>(&self, f: impl FnOnce(&mut Registry) -> V) -> V {
        f(&mut *self.registry.lock())
    }
}

/// 准入规则：返回进入后的状态，`None` 表示需要等待
fn admit(mode: OpenMode, status: InodeStatus) -> Result<Option<InodeStatus>> {
    use InodeStatus::*;

    match (mode, status) {
        (_, PendingDelete) => Err(FsError::InvalidState),
        (OpenMode::ReadOnly, Writing) => Ok(None),
        (OpenMode::ReadOnly, _) => Ok(Some(Reading)),
        (_, Unused | Used) => Ok(Some(Writing)),
        (_, Reading | Writing) => Ok(None),
    }
}

/// 阻塞在某个 inode 上的打开者
#[derive(Debug)]
struct Waiter {
    thread: Thread,
    woken: AtomicBool,
}

impl Waiter {
    fn wait(&self) {
        // park 可能无故返回，以标志为准
        while !self.woken.load(Ordering::Acquire) {
            thread::park();
        }
    }

    fn wake(&self) {
        self.woken.store(true, Ordering::Release);
        self.thread.unpark();
    }
}

/// 先进先出的等待队列
#[derive(Debug, Default)]
struct WaitQueue {
    queue: VecDeque<(u16, Arc<Waiter>)>,
}

impl WaitQueue {
    fn push(&mut self, inumber: u16) -> Arc<Waiter> {
        let waiter = Arc::new(Waiter {
            thread: thread::current(),
            woken: AtomicBool::new(false),
        });
        self.queue.push_back((inumber, waiter.clone()));
        waiter
    }

    fn wake_all(&mut self, inumber: u16) {
        self.queue.retain(|(waiting_on, waiter)| {
            if *waiting_on == inumber {
                waiter.wake();
                false
            } else {
                true
            }
        });
    }
}
