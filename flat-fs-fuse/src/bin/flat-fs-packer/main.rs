mod cli;

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use block_dev::BlockDevice;
use clap::Parser;
use cli::{Cli, Command};
use flat_fs::{FileSystem, FsError, OpenMode};
use flat_fs_fuse::BlockFile;

fn main() -> io::Result<()> {
    env_logger::init();

    match Cli::parse().command {
        Command::Pack {
            source,
            image,
            blocks,
            inodes,
        } => pack(&source, &image, blocks, inodes),
        Command::Ls { image } => ls(&image),
        Command::Cat { image, name } => cat(&image, &name),
    }
}

fn pack(source: &Path, image: &Path, blocks: u32, inodes: u32) -> io::Result<()> {
    let block_file: Arc<dyn BlockDevice> = Arc::new(BlockFile::create(image, blocks)?);
    let fs = FileSystem::mount(block_file, blocks).map_err(io::Error::other)?;
    fs.format(inodes).map_err(io::Error::other)?;

    let mut files = fs::read_dir(source)?
        .filter_map(|entry| match entry {
            Ok(entry) if entry.file_type().is_ok_and(|t| t.is_file()) => Some(Ok(entry.path())),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        })
        .collect::<Result<Vec<_>, _>>()?;
    files.sort();

    for path in files {
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            log::warn!("skip {path:?}: file name is not UTF-8");
            continue;
        };

        let data = fs::read(&path)?;
        log::info!("pack {name:?}, {} bytes", data.len());

        let mut handle = fs.open(name, OpenMode::WriteOnly).map_err(io::Error::other)?;
        let mut written = 0;
        while written < data.len() {
            match fs.write(&mut handle, &data[written..]) {
                Ok(n) => written += n,
                Err(e) => {
                    fs.close(handle).map_err(io::Error::other)?;
                    return Err(io::Error::other(format!("{name}: {e}")));
                }
            }
        }
        fs.close(handle).map_err(io::Error::other)?;
    }

    fs.sync().map_err(io::Error::other)
}

fn mount_image(image: &Path) -> io::Result<FileSystem> {
    let block_file = BlockFile::open(image)?;
    let total_blocks = block_file.total_blocks()?;
    FileSystem::mount(Arc::new(block_file), total_blocks).map_err(io::Error::other)
}

fn ls(image: &Path) -> io::Result<()> {
    let fs = mount_image(image)?;
    let mut stdout = io::stdout().lock();

    for stat in fs.list().map_err(io::Error::other)? {
        writeln!(
            stdout,
            "{:>5} {:>10} {:>5} {}",
            stat.inode, stat.size, stat.blocks, stat.name
        )?;
    }

    let stat = fs.stat_fs();
    writeln!(
        stdout,
        "{} files, {}/{} inodes in use, {} of {} blocks free",
        stat.files,
        stat.files + 1,
        stat.total_inodes,
        stat.free_blocks,
        stat.total_blocks
    )
}

fn cat(image: &Path, name: &str) -> io::Result<()> {
    let fs = mount_image(image)?;
    let mut handle = fs.open(name, OpenMode::ReadOnly).map_err(|e| match e {
        FsError::NotFound => io::Error::new(io::ErrorKind::NotFound, format!("{name}: {e}")),
        e => io::Error::other(e),
    })?;

    let mut stdout = io::stdout().lock();
    let mut buf = [0u8; 4096];
    loop {
        let n = fs.read(&mut handle, &mut buf).map_err(io::Error::other)?;
        if n == 0 {
            break;
        }
        stdout.write_all(&buf[..n])?;
    }

    fs.close(handle).map_err(io::Error::other)
}
