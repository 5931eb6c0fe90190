mod cli;

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use block_dev::BlockDevice;
use clap::Parser;
use dfs::{Dfs, FsOptions};
use dfs_fuse::{BlockFile, PackError};
use typed_bytesize::ByteSizeIec;
use vfs::FileSystem;

use self::cli::{Cli, Command};

fn main() -> Result<(), PackError> {
    env_logger::init();

    let cli = Cli::parse();
    let options = FsOptions::parse(&cli.options)?.with_clock(unix_now);
    println!("image={:?}", cli.image);

    match cli.command {
        Command::Format { size } => {
            create_image(&cli.image, size, &options)?;
        }
        Command::Pack { source, size } => {
            let dev = create_image(&cli.image, size, &options)?;
            let fs = Dfs::mount(dev, &options)?;
            dfs_fuse::pack_dir(&fs, &source, "/")?;
            fs.unmount()?;
        }
        Command::Ls { path } => {
            let fs = Dfs::mount(open_image(&cli.image)?, &options)?;
            for name in dfs_fuse::list_dir(&fs, &dfs_fuse::image_path(&path)?)? {
                println!("{name}");
            }
            fs.unmount()?;
        }
        Command::Cat { path } => {
            let fs = Dfs::mount(open_image(&cli.image)?, &options)?;
            let data = dfs_fuse::read_all(&fs, &dfs_fuse::image_path(&path)?)?;
            io::stdout().write_all(&data)?;
            fs.unmount()?;
        }
        Command::Statfs => {
            let fs = Dfs::mount(open_image(&cli.image)?, &options)?;
            let st = fs.statfs()?;
            println!(
                "block size: {}\nblocks: {} ({} free)\ninodes: {} ({} free)\nfree space: {} MiB",
                st.block_size,
                st.blocks,
                st.free_blocks,
                st.inodes,
                st.free_inodes,
                st.free_blocks * st.block_size / ByteSizeIec::mib(1).0,
            );
            fs.unmount()?;
        }
    }

    Ok(())
}

fn create_image(
    path: &Path,
    size_mib: u64,
    options: &FsOptions,
) -> Result<Arc<dyn BlockDevice>, PackError> {
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    fd.set_len(ByteSizeIec::mib(size_mib).0)?;

    let dev: Arc<dyn BlockDevice> = Arc::new(BlockFile::new(fd)?);
    Dfs::format(dev.clone(), options)?;
    log::info!("formatted {path:?}, {size_mib} MiB");
    Ok(dev)
}

fn open_image(path: &Path) -> io::Result<Arc<dyn BlockDevice>> {
    let fd = OpenOptions::new().read(true).write(true).open(path)?;
    Ok(Arc::new(BlockFile::new(fd)?))
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as u32)
}
