mod common;

use std::sync::Arc;

use block_dev::{BlockDevice, RamDisk};
use flat_fs::config::{BLOCK_SIZE, DIR_SLOT_SIZE};
use flat_fs::{FileSystem, FsError, OpenMode, Whence};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use common::{fresh, read_to_end, write_file};

#[test]
fn write_then_read_back_600_bytes() {
    let (_, fs) = fresh(64, 10);
    let data: Vec<u8> = (0..600).map(|i| (i * 7 % 256) as u8).collect();

    let mut handle = fs.open("/test", OpenMode::WriteOnly).unwrap();
    assert_eq!(fs.write(&mut handle, &data), Ok(600));
    assert_eq!(fs.file_size(&handle), 600);
    fs.close(handle).unwrap();

    let mut handle = fs.open("/test", OpenMode::ReadOnly).unwrap();
    let mut buf = [0u8; 600];
    assert_eq!(fs.read(&mut handle, &mut buf), Ok(600));
    assert_eq!(buf[..], data[..]);
    fs.close(handle).unwrap();

    let stat = &fs.list().unwrap()[0];
    assert_eq!(stat.name, "/test");
    assert_eq!(stat.blocks, 2);
}

#[test]
fn round_trip_across_block_boundaries() {
    let (_, fs) = fresh(128, 16);
    let mut rng = StdRng::seed_from_u64(42);

    for size in [0, 1, BLOCK_SIZE, 11 * BLOCK_SIZE, 11 * BLOCK_SIZE + 1] {
        let name = format!("f{size}");
        let mut data = vec![0u8; size];
        rng.fill(&mut data[..]);

        let mut handle = fs.open(&name, OpenMode::WriteOnly).unwrap();
        assert_eq!(fs.write(&mut handle, &data), Ok(size));
        assert_eq!(fs.file_size(&handle), size as u64);
        fs.close(handle).unwrap();

        let mut handle = fs.open(&name, OpenMode::ReadOnly).unwrap();
        assert_eq!(read_to_end(&fs, &mut handle), data, "size {size}");
        fs.close(handle).unwrap();
    }
}

#[test]
fn seek_is_clamped_to_file() {
    let (_, fs) = fresh(64, 10);
    write_file(&fs, "s", &[9u8; 100]);

    let mut handle = fs.open("s", OpenMode::ReadOnly).unwrap();
    assert_eq!(fs.seek(&mut handle, -5, Whence::Set), 0);
    assert_eq!(fs.seek(&mut handle, 1000, Whence::Set), 100);
    assert_eq!(fs.seek(&mut handle, -10, Whence::End), 90);
    assert_eq!(fs.seek(&mut handle, 5, Whence::Cur), 95);
    assert_eq!(fs.seek(&mut handle, 10, Whence::End), 100);
    assert_eq!(fs.seek(&mut handle, i64::MAX, Whence::Cur), 100);
    assert_eq!(fs.seek(&mut handle, i64::MIN, Whence::End), 0);
    assert_eq!(handle.position(), 0);

    fs.seek(&mut handle, 95, Whence::Set);
    let mut buf = [0u8; 10];
    assert_eq!(fs.read(&mut handle, &mut buf), Ok(5));
    assert_eq!(fs.read(&mut handle, &mut buf), Ok(0));
    fs.close(handle).unwrap();
}

#[test]
fn append_continues_after_previous_writer() {
    let (_, fs) = fresh(64, 10);
    write_file(&fs, "log", b"hello");

    let mut handle = fs.open("log", OpenMode::Append).unwrap();
    assert_eq!(handle.position(), 5);
    assert_eq!(fs.write(&mut handle, b", world"), Ok(7));
    fs.close(handle).unwrap();

    let mut handle = fs.open("log", OpenMode::ReadOnly).unwrap();
    assert_eq!(read_to_end(&fs, &mut handle), b"hello, world");
    fs.close(handle).unwrap();
}

#[test]
fn read_write_mode_overwrites_in_place() {
    let (_, fs) = fresh(64, 10);
    write_file(&fs, "rw", &[b'a'; 1000]);

    let mut handle = fs.open("rw", OpenMode::ReadWrite).unwrap();
    assert_eq!(fs.file_size(&handle), 1000);
    assert_eq!(fs.seek(&mut handle, 510, Whence::Set), 510);
    assert_eq!(fs.write(&mut handle, b"0123456789"), Ok(10));
    assert_eq!(fs.file_size(&handle), 1000);

    fs.seek(&mut handle, 0, Whence::Set);
    let content = read_to_end(&fs, &mut handle);
    assert_eq!(content.len(), 1000);
    assert_eq!(&content[510..520], b"0123456789");
    assert!(content[..510].iter().chain(&content[520..]).all(|&b| b == b'a'));
    fs.close(handle).unwrap();
}

#[test]
fn write_only_open_truncates() {
    let (_, fs) = fresh(64, 10);
    write_file(&fs, "t", &[1u8; 2000]);
    write_file(&fs, "t", b"short");

    let mut handle = fs.open("t", OpenMode::ReadOnly).unwrap();
    assert_eq!(read_to_end(&fs, &mut handle), b"short");
    fs.close(handle).unwrap();
}

#[test]
fn delete_returns_blocks_and_name() {
    let (_, fs) = fresh(64, 10);
    let free_before = fs.stat_fs().free_blocks;

    write_file(&fs, "gone", &[5u8; 3 * BLOCK_SIZE + 1]);
    assert_eq!(fs.stat_fs().free_blocks, free_before - 4);
    assert_eq!(fs.stat_fs().files, 1);

    fs.delete("gone").unwrap();
    assert_eq!(fs.stat_fs().free_blocks, free_before);
    assert_eq!(fs.stat_fs().files, 0);
    assert!(fs.list().unwrap().is_empty());

    assert_eq!(fs.open("gone", OpenMode::ReadOnly).err(), Some(FsError::NotFound));
    assert_eq!(fs.delete("gone"), Err(FsError::NotFound));
}

#[test]
fn bad_arguments_are_rejected() {
    let (_, fs) = fresh(64, 10);

    assert_eq!(fs.open("missing", OpenMode::ReadOnly).err(), Some(FsError::NotFound));
    assert_eq!(fs.open("", OpenMode::WriteOnly).err(), Some(FsError::InvalidArgument));
    assert_eq!(
        fs.open(&"n".repeat(31), OpenMode::WriteOnly).err(),
        Some(FsError::InvalidArgument)
    );
    assert_eq!(fs.open("/", OpenMode::WriteOnly).err(), Some(FsError::InvalidArgument));
    assert_eq!(fs.open("/", OpenMode::Append).err(), Some(FsError::InvalidArgument));
    assert_eq!(fs.delete("/"), Err(FsError::InvalidArgument));

    let mut writer = fs.open("x", OpenMode::WriteOnly).unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(fs.read(&mut writer, &mut buf), Err(FsError::InvalidArgument));
    assert_eq!(fs.write(&mut writer, &[]), Ok(0));
    fs.close(writer).unwrap();

    let mut reader = fs.open("x", OpenMode::ReadOnly).unwrap();
    assert_eq!(fs.write(&mut reader, b"no"), Err(FsError::InvalidArgument));
    assert_eq!(fs.read(&mut reader, &mut []), Err(FsError::InvalidArgument));
    fs.close(reader).unwrap();
}

#[test]
fn root_directory_is_readable() {
    let (_, fs) = fresh(64, 10);
    write_file(&fs, "a", b"1");

    let mut root = fs.open("/", OpenMode::ReadOnly).unwrap();
    let bytes = read_to_end(&fs, &mut root);
    assert_eq!(bytes.len(), 10 * DIR_SLOT_SIZE);
    // 前两个长度字段："/" 与 "a"
    assert_eq!(bytes[..8], [0, 0, 0, 1, 0, 0, 0, 1]);
    fs.close(root).unwrap();
}

#[test]
fn directory_fills_up() {
    let (_, fs) = fresh(64, 3);
    write_file(&fs, "one", b"1");
    write_file(&fs, "two", b"2");
    assert_eq!(fs.open("three", OpenMode::WriteOnly).err(), Some(FsError::NoSpace));

    fs.delete("one").unwrap();
    write_file(&fs, "three", b"3");
    assert_eq!(fs.stat_fs().files, 2);
}

#[test]
fn format_requires_no_open_files() {
    let (_, fs) = fresh(64, 10);
    write_file(&fs, "old", b"data");

    let handle = fs.open("old", OpenMode::ReadOnly).unwrap();
    assert_eq!(fs.format(10), Err(FsError::InvalidState));
    fs.close(handle).unwrap();

    fs.format(20).unwrap();
    assert!(fs.list().unwrap().is_empty());
    assert_eq!(fs.stat_fs().total_inodes, 20);
    assert_eq!(fs.open("old", OpenMode::ReadOnly).err(), Some(FsError::NotFound));
}

#[test]
fn files_survive_remount() {
    let (dev, fs) = fresh(256, 32);
    let mut rng = StdRng::seed_from_u64(7);

    let mut expected = Vec::new();
    for n in 0..8 {
        let mut data = vec![0u8; rng.gen_range(0..4 * BLOCK_SIZE)];
        rng.fill(&mut data[..]);
        let name = format!("file-{n}");
        write_file(&fs, &name, &data);
        expected.push((name, data));
    }
    fs.delete("file-3").unwrap();
    expected.remove(3);
    let stat_before = fs.stat_fs();
    drop(fs);

    let fs = FileSystem::mount(dev, 256).unwrap();
    assert_eq!(fs.stat_fs(), stat_before);
    let names: Vec<String> = fs.list().unwrap().into_iter().map(|s| s.name).collect();
    assert_eq!(names.len(), expected.len());

    for (name, data) in &expected {
        assert!(names.contains(name));
        let mut handle = fs.open(name, OpenMode::ReadOnly).unwrap();
        assert_eq!(&read_to_end(&fs, &mut handle), data);
        fs.close(handle).unwrap();
    }
}

#[test]
fn small_blank_device_stays_mountable() {
    common::init_logger();
    let dev: Arc<dyn BlockDevice> = Arc::new(RamDisk::new(12));
    let fs = FileSystem::mount(dev.clone(), 12).unwrap();
    // 56 个 inode 占 4 块，目录占 7 块，没有剩余数据块
    let stat = fs.stat_fs();
    assert_eq!(stat.total_inodes, 56);
    assert_eq!(stat.free_blocks, 0);

    let mut handle = fs.open("a", OpenMode::WriteOnly).unwrap();
    assert_eq!(fs.write(&mut handle, b"x"), Err(FsError::NoSpace));
    fs.close(handle).unwrap();
    drop(fs);

    let fs = FileSystem::mount(dev, 12).unwrap();
    assert_eq!(fs.stat_fs().total_inodes, 56);
    assert_eq!(fs.list().unwrap()[0].name, "a");
}

#[test]
fn handles_outlive_deleted_names() {
    let (_, fs) = fresh(64, 10);
    write_file(&fs, "doomed", b"contents");

    let mut reader = fs.open("doomed", OpenMode::ReadOnly).unwrap();
    fs.delete("doomed").unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(fs.read(&mut reader, &mut buf), Err(FsError::InvalidState));
    assert_eq!(fs.open("doomed", OpenMode::ReadOnly).err(), Some(FsError::NotFound));
    fs.close(reader).unwrap();

    // 同名新文件与旧文件无关
    write_file(&fs, "doomed", b"new");
    let mut reader = fs.open("doomed", OpenMode::ReadOnly).unwrap();
    assert_eq!(read_to_end(&fs, &mut reader), b"new");
    fs.close(reader).unwrap();
}

#[test]
fn foreign_handle_cannot_be_closed() {
    let (_, fs) = fresh(64, 10);
    let dev: Arc<dyn BlockDevice> = Arc::new(RamDisk::new(64));
    let other = FileSystem::mount(dev, 64).unwrap();

    let handle = fs.open("mine", OpenMode::WriteOnly).unwrap();
    assert_eq!(other.close(handle), Err(FsError::InvalidState));
}
