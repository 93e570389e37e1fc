//! 磁盘上的 inode 记录
//!
//! 每个 inode 固定 32 字节，描述一个文件：
//!
//! | 偏移 | 字段 |
//! |---|---|
//! | 0 | `length: u32` 文件字节数 |
//! | 4 | `open_count: u16` 引用它的打开文件表项个数 |
//! | 6 | `status: u16` 状态 |
//! | 8..30 | `direct: [u16; 11]` 直接索引 |
//! | 30 | `indirect: u16` 一级间接索引 |
//!
//! 间接索引块：整个块连续存储 `u16` 块编号，每个编号都指向一个**数据块**，
//! 空位为 [`NIL`]。直接索引用完之后才启用间接索引块。

use std::ops::Range;
use std::sync::Arc;

use block_dev::BlockDevice;

use super::inode_pos;
use crate::codec;
use crate::config::{BLOCK_SIZE, DIRECT_COUNT, INDIRECT_COUNT, INODE_SIZE, NIL};
use crate::{DataBlock, FsError, Result};

/// 间接索引块
type IndirectBlock = [u16; INDIRECT_COUNT];

const LENGTH_OFFSET: usize = 0;
const COUNT_OFFSET: usize = 4;
const STATUS_OFFSET: usize = 6;
const DIRECT_OFFSET: usize = 8;
const INDIRECT_OFFSET: usize = DIRECT_OFFSET + DIRECT_COUNT * 2;

/// inode 的状态
///
/// 未使用 → 已使用（创建）→ 读/写（打开）→ 已使用（关闭）
/// → 待删除（仍被引用时删除）→ 未使用（最后一个引用关闭）
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum InodeStatus {
    #[default]
    Unused = 0,
    Used = 1,
    Reading = 2,
    Writing = 3,
    PendingDelete = 4,
}

impl InodeStatus {
    pub const fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(Self::Unused),
            1 => Some(Self::Used),
            2 => Some(Self::Reading),
            3 => Some(Self::Writing),
            4 => Some(Self::PendingDelete),
            _ => None,
        }
    }

    /// 检查状态迁移，不在状态机上的迁移一律拒绝
    pub fn transition(self, to: Self) -> Result<Self> {
        use InodeStatus::*;

        match (self, to) {
            (Unused, Used)
            | (Used, Reading | Writing | Unused | PendingDelete)
            | (Reading, Reading | Used | PendingDelete)
            | (Writing, Used | PendingDelete)
            | (PendingDelete, Unused) => Ok(to),
            _ => {
                log::warn!("rejected inode status transition {self:?} -> {to:?}");
                Err(FsError::InvalidState)
            }
        }
    }
}

/// [`Inode::ensure_indirect_block`] 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndirectSlot {
    /// 传入的块成为了新的间接索引块
    Installed,
    /// 间接索引块早已存在，传入的块未被使用
    Present,
    /// 直接索引尚有空位，传入的块未被使用
    NotNeeded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub length: u32,
    pub open_count: u16,
    pub status: InodeStatus,
    pub direct: [u16; DIRECT_COUNT],
    pub indirect: u16,
}

impl Default for Inode {
    fn default() -> Self {
        Self::new()
    }
}

impl Inode {
    /// 新建文件的 inode：没有任何块，状态为已使用
    pub const fn new() -> Self {
        Self {
            length: 0,
            open_count: 0,
            status: InodeStatus::Used,
            direct: [NIL; DIRECT_COUNT],
            indirect: NIL,
        }
    }

    pub const fn unused() -> Self {
        Self {
            status: InodeStatus::Unused,
            ..Self::new()
        }
    }

    pub fn from_disk(inumber: u16, block_device: &Arc<dyn BlockDevice>) -> Result<Self> {
        let (block_id, offset) = inode_pos(inumber);
        let mut data: DataBlock = [0; BLOCK_SIZE];
        block_device.read_block(block_id, &mut data);
        Self::decode(&data[offset..offset + INODE_SIZE])
    }

    /// 读出 inode 所在块，只覆盖自己的 32 字节后写回，不动同块的其它 inode
    pub fn to_disk(&self, inumber: u16, block_device: &Arc<dyn BlockDevice>) {
        let (block_id, offset) = inode_pos(inumber);
        let mut data: DataBlock = [0; BLOCK_SIZE];
        block_device.read_block(block_id, &mut data);
        self.encode(&mut data[offset..offset + INODE_SIZE]);
        block_device.write_block(block_id, &data);
    }

    pub fn encode(&self, buf: &mut [u8]) {
        codec::write_u32(buf, LENGTH_OFFSET, self.length);
        codec::write_u16(buf, COUNT_OFFSET, self.open_count);
        codec::write_u16(buf, STATUS_OFFSET, self.status as u16);
        for (i, &block) in self.direct.iter().enumerate() {
            codec::write_u16(buf, DIRECT_OFFSET + i * 2, block);
        }
        codec::write_u16(buf, INDIRECT_OFFSET, self.indirect);
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let raw_status = codec::read_u16(buf, STATUS_OFFSET);
        let status = InodeStatus::from_raw(raw_status).ok_or_else(|| {
            log::error!("corrupted inode status word {raw_status}");
            FsError::InvalidState
        })?;

        Ok(Self {
            length: codec::read_u32(buf, LENGTH_OFFSET),
            open_count: codec::read_u16(buf, COUNT_OFFSET),
            status,
            direct: core::array::from_fn(|i| codec::read_u16(buf, DIRECT_OFFSET + i * 2)),
            indirect: codec::read_u16(buf, INDIRECT_OFFSET),
        })
    }

    /// 文件内字节偏移所在的数据块。
    /// 该位置尚未分配块，或超出了间接索引块的容量，则返回空。
    pub fn resolve_block(&self, offset: usize, block_device: &Arc<dyn BlockDevice>) -> Option<u16> {
        let block_index = offset / BLOCK_SIZE;

        if block_index < DIRECT_COUNT {
            return non_nil(self.direct[block_index]);
        }

        // 剔去直接索引的部分
        let index = block_index - DIRECT_COUNT;
        if self.indirect == NIL || index >= INDIRECT_COUNT {
            return None;
        }

        non_nil(read_indirect(self.indirect, block_device)[index])
    }

    /// 把块挂到第一个空的直接索引上，返回索引位置
    pub fn claim_direct_slot(&mut self, block_id: u16) -> Option<usize> {
        let slot = self.direct.iter().position(|&block| block == NIL)?;
        self.direct[slot] = block_id;
        Some(slot)
    }

    /// 直接索引用尽且尚无间接索引块时，把 `block_id` 初始化为间接索引块
    pub fn ensure_indirect_block(
        &mut self,
        block_id: u16,
        block_device: &Arc<dyn BlockDevice>,
    ) -> IndirectSlot {
        if self.direct.contains(&NIL) {
            return IndirectSlot::NotNeeded;
        }
        if self.indirect != NIL {
            return IndirectSlot::Present;
        }

        write_indirect(block_id, &[NIL; INDIRECT_COUNT], block_device);
        self.indirect = block_id;
        IndirectSlot::Installed
    }

    /// 把块挂到间接索引块的第一个空位上。
    /// 没有间接索引块或其已满（即文件达到上限）时什么也不做，返回 `false`。
    pub fn append_indirect_pointer(
        &self,
        block_id: u16,
        block_device: &Arc<dyn BlockDevice>,
    ) -> bool {
        if self.indirect == NIL {
            return false;
        }

        let mut indirect = read_indirect(self.indirect, block_device);
        let Some(slot) = indirect.iter().position(|&block| block == NIL) else {
            return false;
        };
        indirect[slot] = block_id;
        write_indirect(self.indirect, &indirect, block_device);
        true
    }

    /// 全部非空块编号（含间接索引块及其表项）是否都落在 `data_area` 内。
    /// 磁盘上的坏指针须在遍历块之前挡住，否则会越过设备末尾。
    pub fn pointers_within(
        &self,
        data_area: &Range<u32>,
        block_device: &Arc<dyn BlockDevice>,
    ) -> bool {
        let inside = |block_id: u16| block_id == NIL || data_area.contains(&(block_id as u32));

        if !self.direct.iter().all(|&block_id| inside(block_id)) {
            return false;
        }
        if self.indirect == NIL {
            return true;
        }
        inside(self.indirect) && read_indirect(self.indirect, block_device).into_iter().all(inside)
    }

    /// 该 inode 独占的全部块：数据块以及间接索引块本身
    pub fn owned_blocks(&self, block_device: &Arc<dyn BlockDevice>) -> Vec<u16> {
        let mut blocks: Vec<u16> = self.direct.iter().copied().filter(|&b| b != NIL).collect();

        if self.indirect != NIL {
            blocks.extend(
                read_indirect(self.indirect, block_device)
                    .into_iter()
                    .filter(|&b| b != NIL),
            );
            blocks.push(self.indirect);
        }

        blocks
    }

    /// 清空所有索引与长度，返回原先占有的块，由调用者归还给超级块
    pub fn release(&mut self, block_device: &Arc<dyn BlockDevice>) -> Vec<u16> {
        let blocks = self.owned_blocks(block_device);
        self.length = 0;
        self.direct.fill(NIL);
        self.indirect = NIL;
        blocks
    }

    /// 从指定位置(字节偏移)读出数据填充`buf`，返回读到的字节数
    pub fn read_at(
        &self,
        offset: usize,
        buf: &mut [u8],
        block_device: &Arc<dyn BlockDevice>,
    ) -> usize {
        let mut start = offset;
        let end = (start + buf.len()).min(self.length as usize);

        if start >= end {
            return 0;
        }

        let mut read_size = 0;
        let mut data: DataBlock = [0; BLOCK_SIZE];
        while start < end {
            let block_index = start / BLOCK_SIZE;
            // 当前块的末地址(字节)
            let current_block_end = ((block_index + 1) * BLOCK_SIZE).min(end);
            let block_read_size = current_block_end - start;

            let Some(block_id) = self.resolve_block(start, block_device) else {
                log::error!("file hole at byte {start}, length {}", self.length);
                break;
            };
            block_device.read_block(block_id as usize, &mut data);

            // 绝对地址 % 块大小 = 块内偏移
            let src = &data[start % BLOCK_SIZE..start % BLOCK_SIZE + block_read_size];
            buf[read_size..read_size + block_read_size].copy_from_slice(src);

            read_size += block_read_size;
            start = current_block_end;
        }

        read_size
    }
}

#[inline]
fn non_nil(block_id: u16) -> Option<u16> {
    (block_id != NIL).then_some(block_id)
}

fn read_indirect(block_id: u16, block_device: &Arc<dyn BlockDevice>) -> IndirectBlock {
    let mut data: DataBlock = [0; BLOCK_SIZE];
    block_device.read_block(block_id as usize, &mut data);
    core::array::from_fn(|i| codec::read_u16(&data, i * 2))
}

fn write_indirect(block_id: u16, indirect: &IndirectBlock, block_device: &Arc<dyn BlockDevice>) {
    let mut data: DataBlock = [0; BLOCK_SIZE];
    for (i, &block) in indirect.iter().enumerate() {
        codec::write_u16(&mut data, i * 2, block);
    }
    block_device.write_block(block_id as usize, &data);
}
