use std::sync::Arc;

use block_dev::{BlockDevice, RamDisk};
use flat_fs::{FileSystem, FileHandle, OpenMode};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 在全新的内存盘上挂载并格式化
pub fn fresh(total_blocks: u32, max_files: u32) -> (Arc<dyn BlockDevice>, FileSystem) {
    init_logger();
    let dev: Arc<dyn BlockDevice> = Arc::new(RamDisk::new(total_blocks as usize));
    let fs = FileSystem::mount(dev.clone(), total_blocks).unwrap();
    fs.format(max_files).unwrap();
    (dev, fs)
}

pub fn write_file(fs: &FileSystem, name: &str, data: &[u8]) {
    let mut handle = fs.open(name, OpenMode::WriteOnly).unwrap();
    assert_eq!(fs.write(&mut handle, data), Ok(data.len()));
    fs.close(handle).unwrap();
}

/// 从读写指针读到文件末尾
pub fn read_to_end(fs: &FileSystem, handle: &mut FileHandle) -> Vec<u8> {
    let mut content = Vec::new();
    let mut buf = [0u8; 700];
    loop {
        let n = fs.read(handle, &mut buf).unwrap();
        if n == 0 {
            break content;
        }
        content.extend_from_slice(&buf[..n]);
    }
}
