//! # 文件系统层
//!
//! 把超级块、inode、目录与打开文件表组合成按字节流读写的文件操作。
//!
//! 锁的顺序：打开文件表 → inode 条带锁 → 目录 → 超级块 → inode 区域，
//! 任何时候至多持有一把条带锁。

use std::sync::Arc;

use block_dev::BlockDevice;
use spin::Mutex;

use crate::DataBlock;
use crate::config::{BLOCK_SIZE, DIRECT_COUNT, NIL, ROOT_INODE, ROOT_NAME};
use crate::directory::{Directory, validate_name};
use crate::file_table::{FileHandle, OpenFileTable, OpenMode, Registry};
use crate::layout::{
    IndirectSlot, Inode, InodeArea, InodeStatus, SuperBlock, fits, inode_area_blocks,
};
use crate::{FsError, Result};

/// 条带锁个数，inode 编号取模映射到条带
const STRIPES: usize = 16;

/// `seek` 的基准位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// 文件开头
    Set,
    /// 当前读写指针
    Cur,
    /// 文件末尾
    End,
}

impl TryFrom<i32> for Whence {
    type Error = FsError;

    fn try_from(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(Self::Set),
            1 => Ok(Self::Cur),
            2 => Ok(Self::End),
            _ => Err(FsError::InvalidArgument),
        }
    }
}

/// 目录中一个文件的元信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub name: String,
    pub inode: u16,
    pub size: u64,
    /// 占用的块数，含间接索引块
    pub blocks: usize,
}

/// 卷的统计信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStat {
    pub total_blocks: u32,
    pub total_inodes: u32,
    /// inode 区域占用的块数
    pub inode_blocks: u32,
    pub free_blocks: u32,
    /// 不含根目录的文件数
    pub files: u32,
}

pub struct FileSystem {
    block_device: Arc<dyn BlockDevice>,
    super_block: Mutex<SuperBlock>,
    directory: Mutex<Directory>,
    inodes: InodeArea,
    file_table: OpenFileTable,
    /// 读写、截断与删除在遍历块索引期间持有对应 inode 的条带锁
    stripes: [Mutex<()>; STRIPES],
}

impl FileSystem {
    /// 挂载块设备上的卷。
    ///
    /// 超级块记录无效时以默认参数重新格式化；
    /// 上次未正常关闭而残留的打开状态会被清除。
    pub fn mount(block_device: Arc<dyn BlockDevice>, total_blocks: u32) -> Result<Self> {
        // 块编号只有16位，且 0xFFFF 是空值
        if total_blocks > NIL as u32 {
            return Err(FsError::InvalidArgument);
        }

        let super_block = SuperBlock::open(block_device.clone(), total_blocks)?;
        let total_inodes = super_block.total_inodes;

        let fs = Self {
            block_device: block_device.clone(),
            super_block: Mutex::new(super_block),
            directory: Mutex::new(Directory::new(total_inodes as usize)),
            inodes: InodeArea::new(block_device),
            file_table: OpenFileTable::new(),
            stripes: core::array::from_fn(|_| Mutex::new(())),
        };
        fs.recover(total_inodes)?;
        fs.load_directory()?;

        log::info!("mounted: {total_blocks} blocks, {total_inodes} inodes");
        Ok(fs)
    }

    /// 格式化为最多容纳 `max_files` 个文件（含根目录）的卷。
    /// 仍有打开的文件时拒绝执行。
    pub fn format(&self, max_files: u32) -> Result<()> {
        let total_blocks = self.super_block.lock().total_blocks;
        check_capacity(total_blocks, max_files)?;

        self.file_table.exclusive(|registry| {
            if !registry.is_empty() {
                return Err(FsError::InvalidState);
            }

            self.super_block.lock().format(max_files)?;
            *self.directory.lock() = Directory::new(max_files as usize);
            self.inodes.store(ROOT_INODE, &Inode::new());
            self.persist_directory()
        })
    }

    /// 打开文件；除只读模式外，文件不存在时新建。
    ///
    /// 只读、读写模式从文件开头开始，追加模式从文件末尾开始，
    /// 只写模式会先截断文件。
    pub fn open(&self, name: &str, mode: OpenMode) -> Result<FileHandle> {
        validate_name(name)?;
        if name == ROOT_NAME && mode != OpenMode::ReadOnly {
            return Err(FsError::InvalidArgument);
        }

        let mut handle = self.file_table.open(mode, &self.inodes, |registry| {
            self.resolve(name, mode, registry)
        })?;

        match mode {
            OpenMode::Append => handle.seek = handle.inode.length,
            OpenMode::WriteOnly => {
                if let Err(e) = self.truncate(&mut handle) {
                    self.file_table.close(handle, &self.inodes)?;
                    return Err(e);
                }
            }
            OpenMode::ReadOnly | OpenMode::ReadWrite => handle.seek = 0,
        }

        Ok(handle)
    }

    /// 从读写指针处读出至多 `buf.len()` 字节，返回读到的字节数，文件末尾返回 0
    pub fn read(&self, handle: &mut FileHandle, buf: &mut [u8]) -> Result<usize> {
        if !handle.mode().readable() || buf.is_empty() {
            return Err(FsError::InvalidArgument);
        }

        let _stripe = self.stripe(handle.inumber()).lock();
        self.refresh(handle)?;

        let read_size = handle
            .inode
            .read_at(handle.seek as usize, buf, &self.block_device);
        handle.seek += read_size as u32;
        Ok(read_size)
    }

    /// 从读写指针处写入 `buf`，按需分配新块。
    ///
    /// 空闲块耗尽或文件达到上限时写入在该处截止，返回已写入的字节数；
    /// 一个字节也没写进去则报 [`FsError::NoSpace`]。
    pub fn write(&self, handle: &mut FileHandle, buf: &[u8]) -> Result<usize> {
        if !handle.mode().writable() {
            return Err(FsError::InvalidArgument);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let _stripe = self.stripe(handle.inumber()).lock();
        self.refresh(handle)?;

        let written = self.write_at(&mut handle.inode, handle.seek as usize, buf);
        handle.seek += written as u32;
        self.commit(handle.inumber(), &handle.inode)?;

        if written == 0 {
            return Err(FsError::NoSpace);
        }
        Ok(written)
    }

    /// 移动读写指针，结果被限制在 `[0, 文件长度]` 之内
    pub fn seek(&self, handle: &mut FileHandle, offset: i64, whence: Whence) -> u64 {
        let length = handle.inode.length as i64;
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => handle.seek as i64,
            Whence::End => length,
        };

        let position = base.saturating_add(offset).clamp(0, length);
        handle.seek = position as u32;
        position as u64
    }

    pub fn close(&self, handle: FileHandle) -> Result<()> {
        self.file_table.close(handle, &self.inodes)
    }

    /// 删除文件：立即归还它的全部块并移除文件名。
    ///
    /// 文件仍被打开时 inode 进入待删除状态，剩下的句柄再读写会失败，
    /// 直到最后一个句柄关闭，inode 编号才能再分配。
    pub fn delete(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        if name == ROOT_NAME {
            return Err(FsError::InvalidArgument);
        }

        self.file_table.exclusive(|registry| {
            let inumber = self.directory.lock().lookup(name).ok_or(FsError::NotFound)?;

            let status = {
                let _stripe = self.stripe(inumber).lock();
                let mut inode = self.load_inode(inumber)?;

                let next = if inode.open_count > 0 {
                    InodeStatus::PendingDelete
                } else {
                    InodeStatus::Unused
                };
                if next != inode.status {
                    inode.status = inode.status.transition(next)?;
                }

                let blocks = inode.release(&self.block_device);
                self.reclaim(&blocks);
                self.inodes.store(inumber, &inode);
                inode.status
            };

            if status == InodeStatus::PendingDelete {
                registry.mark_pending_delete(inumber);
            }
            self.directory.lock().free_name(inumber);
            self.persist_directory()?;
            registry.wake(inumber);

            log::debug!("delete {name:?} (inode {inumber}, {status:?})");
            Ok(())
        })
    }

    /// 会话内缓存的文件长度
    #[inline]
    pub fn file_size(&self, handle: &FileHandle) -> u64 {
        handle.inode.length as u64
    }

    /// 把目录与超级块记录写回磁盘
    pub fn sync(&self) -> Result<()> {
        self.persist_directory()?;
        self.super_block.lock().sync();
        Ok(())
    }

    /// 列出目录中除根目录以外的全部文件
    pub fn list(&self) -> Result<Vec<Stat>> {
        let entries: Vec<(u16, String)> = self
            .directory
            .lock()
            .entries()
            .filter(|&(inumber, _)| inumber != ROOT_INODE)
            .map(|(inumber, name)| (inumber, name.to_owned()))
            .collect();

        entries
            .into_iter()
            .map(|(inode, name)| {
                let _stripe = self.stripe(inode).lock();
                let disk_inode = self.load_inode(inode)?;
                Ok(Stat {
                    name,
                    inode,
                    size: disk_inode.length as u64,
                    blocks: disk_inode.owned_blocks(&self.block_device).len(),
                })
            })
            .collect()
    }

    pub fn stat_fs(&self) -> FsStat {
        let files = self.directory.lock().entries().count() as u32 - 1;
        let super_block = self.super_block.lock();

        FsStat {
            total_blocks: super_block.total_blocks,
            total_inodes: super_block.total_inodes,
            inode_blocks: inode_area_blocks(super_block.total_inodes) as u32,
            free_blocks: super_block.free_blocks().len() as u32,
            files,
        }
    }
}

impl FileSystem {
    #[inline]
    fn stripe(&self, inumber: u16) -> &Mutex<()> {
        &self.stripes[inumber as usize % STRIPES]
    }

    /// 在表锁内解析文件名，必要时新建文件名并写回目录
    fn resolve(&self, name: &str, mode: OpenMode, registry: &Registry) -> Result<u16> {
        let mut directory = self.directory.lock();
        if let Some(inumber) = directory.lookup(name) {
            return Ok(inumber);
        }
        if mode == OpenMode::ReadOnly {
            return Err(FsError::NotFound);
        }

        let inumber = directory
            .alloc_name(name, |inumber| registry.is_pending_delete(inumber))
            .ok_or(FsError::NoSpace)?;
        drop(directory);

        if let Err(e) = self.persist_directory() {
            self.directory.lock().free_name(inumber);
            return Err(e);
        }

        log::debug!("create {name:?} as inode {inumber}");
        Ok(inumber)
    }

    /// 块索引越出数据区的 inode 视为损坏
    fn pointers_valid(&self, inumber: u16, inode: &Inode) -> bool {
        let data_area = self.super_block.lock().data_area();
        if inode.pointers_within(&data_area, &self.block_device) {
            return true;
        }
        log::error!("inode {inumber} has block pointers outside {data_area:?}");
        false
    }

    /// 读出 inode 并检查块索引，之后才能沿索引访问块
    fn load_inode(&self, inumber: u16) -> Result<Inode> {
        let inode = self.inodes.load(inumber)?;
        if !self.pointers_valid(inumber, &inode) {
            return Err(FsError::InvalidState);
        }
        Ok(inode)
    }

    /// 从磁盘刷新句柄缓存的 inode；文件已被删除则报错
    fn refresh(&self, handle: &mut FileHandle) -> Result<()> {
        let inode = self.load_inode(handle.inumber())?;
        if inode.status == InodeStatus::PendingDelete {
            return Err(FsError::InvalidState);
        }
        handle.inode = inode;
        Ok(())
    }

    /// 归还文件的全部块，长度归零
    fn truncate(&self, handle: &mut FileHandle) -> Result<()> {
        let _stripe = self.stripe(handle.inumber()).lock();
        self.refresh(handle)?;

        let blocks = handle.inode.release(&self.block_device);
        self.reclaim(&blocks);
        self.commit(handle.inumber(), &handle.inode)?;
        handle.seek = 0;
        Ok(())
    }

    /// 把长度与块索引合并进磁盘上的 inode，状态与引用计数以磁盘为准
    fn commit(&self, inumber: u16, inode: &Inode) -> Result<()> {
        self.inodes.update(inumber, |disk_inode| {
            disk_inode.length = inode.length;
            disk_inode.direct = inode.direct;
            disk_inode.indirect = inode.indirect;
        })
    }

    fn reclaim(&self, blocks: &[u16]) {
        let mut super_block = self.super_block.lock();
        for &block_id in blocks {
            super_block.free_block(block_id);
        }
    }

    /// 从 `offset` 开始写入 `buf`，返回写入的字节数并更新长度。
    /// 调用者负责把 inode 写回磁盘。
    fn write_at(&self, inode: &mut Inode, offset: usize, buf: &[u8]) -> usize {
        let mut pos = offset;
        let mut written = 0;
        let mut data: DataBlock = [0; BLOCK_SIZE];

        while written < buf.len() {
            let (block_id, fresh) = match inode.resolve_block(pos, &self.block_device) {
                Some(block_id) => (block_id, false),
                None => match self.attach_block(inode) {
                    Some(block_id) => (block_id, true),
                    None => break,
                },
            };

            let block_offset = pos % BLOCK_SIZE;
            let block_write_size = (BLOCK_SIZE - block_offset).min(buf.len() - written);
            if fresh {
                // 新块里还留着空闲链表的指针
                data.fill(0);
            } else if block_write_size < BLOCK_SIZE {
                self.block_device.read_block(block_id as usize, &mut data);
            }

            data[block_offset..block_offset + block_write_size]
                .copy_from_slice(&buf[written..written + block_write_size]);
            self.block_device.write_block(block_id as usize, &data);

            written += block_write_size;
            pos += block_write_size;
        }

        inode.length = inode.length.max(pos as u32);
        written
    }

    /// 给文件末尾接上一个新块：先用直接索引，用尽后经由间接索引块
    fn attach_block(&self, inode: &mut Inode) -> Option<u16> {
        let mut super_block = self.super_block.lock();
        let block_id = super_block.alloc_block()?;

        if inode.claim_direct_slot(block_id).is_some() {
            return Some(block_id);
        }

        if inode.indirect == NIL {
            let Some(indirect) = super_block.alloc_block() else {
                super_block.free_block(block_id);
                return None;
            };
            if inode.ensure_indirect_block(indirect, &self.block_device) != IndirectSlot::Installed {
                super_block.free_block(indirect);
            }
        }

        if inode.append_indirect_pointer(block_id, &self.block_device) {
            Some(block_id)
        } else {
            log::debug!("file is full: {DIRECT_COUNT} direct blocks and a full indirect block");
            super_block.free_block(block_id);
            None
        }
    }

    /// 把内存中的目录写进 0 号 inode 的文件内容
    fn persist_directory(&self) -> Result<()> {
        let _stripe = self.stripe(ROOT_INODE).lock();
        let bytes = self.directory.lock().serialize();

        let mut root = self.load_inode(ROOT_INODE)?;
        let written = self.write_at(&mut root, 0, &bytes);
        self.commit(ROOT_INODE, &root)?;

        if written < bytes.len() {
            log::error!("directory truncated: {written} of {} bytes", bytes.len());
            return Err(FsError::NoSpace);
        }
        Ok(())
    }

    /// 读出 0 号 inode 中的目录；内容不合法时从空目录开始
    fn load_directory(&self) -> Result<()> {
        let root = self.load_inode(ROOT_INODE)?;
        if root.length == 0 {
            return Ok(());
        }

        let mut bytes = vec![0; root.length as usize];
        root.read_at(0, &mut bytes, &self.block_device);

        let mut directory = self.directory.lock();
        if directory.deserialize(&bytes).is_err() {
            log::warn!(
                "malformed directory ({} bytes, expected {}), starting empty",
                bytes.len(),
                directory.byte_len()
            );
        }
        Ok(())
    }

    /// 清除上次未正常关闭时残留的打开状态，并确保根目录可用
    fn recover(&self, total_inodes: u32) -> Result<()> {
        for inumber in 0..total_inodes as u16 {
            let mut inode = self.inodes.load(inumber)?;
            let stale = inode.clone();

            match inode.status {
                InodeStatus::Reading | InodeStatus::Writing => {
                    inode.status = inode.status.transition(InodeStatus::Used)?;
                }
                InodeStatus::PendingDelete => {
                    if self.pointers_valid(inumber, &inode) {
                        let blocks = inode.release(&self.block_device);
                        self.reclaim(&blocks);
                    } else {
                        // 坏指针指向的块不能归还，只清空索引
                        inode.length = 0;
                        inode.direct = [NIL; DIRECT_COUNT];
                        inode.indirect = NIL;
                    }
                    inode.status = inode.status.transition(InodeStatus::Unused)?;
                }
                InodeStatus::Unused | InodeStatus::Used => {}
            }
            inode.open_count = 0;

            if inode != stale {
                log::warn!(
                    "inode {inumber} was left {:?} with {} holder(s), reset to {:?}",
                    stale.status,
                    stale.open_count,
                    inode.status
                );
                self.inodes.store(inumber, &inode);
            }
        }

        let root = self.inodes.load(ROOT_INODE)?;
        if root.status == InodeStatus::Unused {
            log::info!("initializing root directory");
            let mut root = Inode::unused();
            root.status = root.status.transition(InodeStatus::Used)?;
            self.inodes.store(ROOT_INODE, &root);
            self.persist_directory()?;
        }

        Ok(())
    }
}

/// 格式化参数须让 inode 区域与目录内容都放得下
fn check_capacity(total_blocks: u32, max_files: u32) -> Result<()> {
    if fits(total_blocks, max_files) {
        Ok(())
    } else {
        Err(FsError::InvalidArgument)
    }
}
