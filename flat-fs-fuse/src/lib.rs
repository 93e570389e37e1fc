
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::io::{Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use block_dev::{BLOCK_SIZE, BlockDevice};

/// 宿主机上的镜像文件，按块读写
pub struct BlockFile(pub Mutex<File>);

impl BlockFile {
    /// 创建（已存在则截断）一个 `total_blocks` 块大小、内容全零的镜像
    pub fn create(path: impl AsRef<Path>, total_blocks: u32) -> io::Result<Self> {
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        fd.set_len(total_blocks as u64 * BLOCK_SIZE as u64)?;

        Ok(Self(Mutex::new(fd)))
    }

    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let fd = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self(Mutex::new(fd)))
    }

    /// 镜像包含的完整块数，不足一块的尾部不计
    pub fn total_blocks(&self) -> io::Result<u32> {
        let len = self.0.lock().unwrap().metadata()?.len();
        u32::try_from(len / BLOCK_SIZE as u64)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "image too large"))
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        assert_eq!(buf.len(), BLOCK_SIZE, "not a complete block!");
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .expect("seeking error");
        file.read_exact(buf).expect("not a complete block!");
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        assert_eq!(buf.len(), BLOCK_SIZE, "not a complete block!");
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .expect("seeking error");
        file.write_all(buf).expect("not a complete block!");
    }
}
