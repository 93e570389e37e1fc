//! # 目录
//!
//! 卷上只有一个扁平的根目录，按 inode 编号索引的定长槽位数组：
//! 每个槽位记录文件名长度（0 表示空槽）和定宽的文件名缓冲区。
//! 槽位下标即该文件的 inode 编号，0 号槽位恒为根目录 `"/"`。
//!
//! 目录本身就是 0 号 inode 的文件内容，序列化格式为：
//! 先按槽位顺序排列所有长度字段（各4字节），再按槽位顺序排列所有文件名缓冲区。

use crate::codec;
use crate::config::{DIR_SLOT_SIZE, NAME_FIELD_SIZE, NAME_MAX_LEN, ROOT_INODE, ROOT_NAME};
use crate::{FsError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    /// 文件名的字节数，0 表示空槽
    sizes: Vec<u32>,
    names: Vec<[u8; NAME_FIELD_SIZE]>,
}

impl Directory {
    /// 容量为 `capacity` 个槽位的空目录，只含根目录自身
    pub fn new(capacity: usize) -> Self {
        let mut dir = Self {
            sizes: vec![0; capacity],
            names: vec![[0; NAME_FIELD_SIZE]; capacity],
        };
        dir.fill_slot(ROOT_INODE as usize, ROOT_NAME);
        dir
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.sizes.len()
    }

    /// 序列化后的字节数
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.capacity() * DIR_SLOT_SIZE
    }

    /// 给文件名分配第一个空槽，跳过 `busy` 判定为仍被占用的 inode，
    /// 返回其 inode 编号；没有可用槽位则返回空
    pub fn alloc_name(&mut self, name: &str, busy: impl Fn(u16) -> bool) -> Option<u16> {
        let slot = (0..self.capacity()).find(|&slot| self.sizes[slot] == 0 && !busy(slot as u16))?;
        self.fill_slot(slot, name);
        Some(slot as u16)
    }

    /// 清空槽位；槽位本就空闲则什么也不做
    pub fn free_name(&mut self, inumber: u16) -> bool {
        let slot = inumber as usize;
        if slot >= self.capacity() || self.sizes[slot] == 0 {
            return false;
        }

        self.sizes[slot] = 0;
        self.names[slot].fill(0);
        true
    }

    /// 按文件名查找 inode 编号
    pub fn lookup(&self, name: &str) -> Option<u16> {
        if name == ROOT_NAME {
            return Some(ROOT_INODE);
        }

        let bytes = name.as_bytes();
        (0..self.capacity())
            .find(|&slot| {
                // 长度不同就不必比较内容
                self.sizes[slot] as usize == bytes.len()
                    && &self.names[slot][..bytes.len()] == bytes
            })
            .map(|slot| slot as u16)
    }

    /// 槽位上的文件名
    pub fn name(&self, inumber: u16) -> Option<&str> {
        let slot = inumber as usize;
        let len = *self.sizes.get(slot)? as usize;
        if len == 0 {
            return None;
        }
        core::str::from_utf8(&self.names[slot][..len]).ok()
    }

    /// 全部已占用的槽位：`(inode 编号, 文件名)`
    pub fn entries(&self) -> impl Iterator<Item = (u16, &str)> + '_ {
        (0..self.capacity() as u16).filter_map(|inumber| Some((inumber, self.name(inumber)?)))
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0; self.byte_len()];

        let names_start = self.capacity() * 4;
        for (slot, &size) in self.sizes.iter().enumerate() {
            codec::write_u32(&mut buf, slot * 4, size);
        }
        for (slot, name) in self.names.iter().enumerate() {
            let offset = names_start + slot * NAME_FIELD_SIZE;
            buf[offset..offset + NAME_FIELD_SIZE].copy_from_slice(name);
        }

        buf
    }

    /// 用磁盘上读出的字节覆盖整个目录，容量保持不变。
    /// 字节数不符、长度字段越界或根目录槽位不对时报错，目录保持原样。
    pub fn deserialize(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.byte_len() {
            return Err(FsError::InvalidArgument);
        }

        let capacity = self.capacity();
        let names_start = capacity * 4;
        let mut sizes = Vec::with_capacity(capacity);
        let mut names = Vec::with_capacity(capacity);
        for slot in 0..capacity {
            let size = codec::read_u32(bytes, slot * 4);
            if size as usize > NAME_FIELD_SIZE {
                return Err(FsError::InvalidArgument);
            }
            sizes.push(size);

            let offset = names_start + slot * NAME_FIELD_SIZE;
            let mut name = [0; NAME_FIELD_SIZE];
            name.copy_from_slice(&bytes[offset..offset + NAME_FIELD_SIZE]);
            names.push(name);
        }

        let loaded = Self { sizes, names };
        if loaded.name(ROOT_INODE) != Some(ROOT_NAME) {
            return Err(FsError::InvalidArgument);
        }

        *self = loaded;
        Ok(())
    }
}

impl Directory {
    fn fill_slot(&mut self, slot: usize, name: &str) {
        let bytes = name.as_bytes();
        self.sizes[slot] = bytes.len() as u32;
        self.names[slot].fill(0);
        self.names[slot][..bytes.len()].copy_from_slice(bytes);
    }
}

/// 文件名须非空，至多 [`NAME_MAX_LEN`] 个字符且能放进文件名缓冲区
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().count() > NAME_MAX_LEN || name.len() > NAME_FIELD_SIZE {
        Err(FsError::InvalidArgument)
    } else {
        Ok(())
    }
}
