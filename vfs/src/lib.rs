#![no_std]

extern crate alloc;

mod dirent;
mod error;
mod flags;
mod fs;
mod path;
mod stat;

pub use self::{
    dirent::{DirEntry, DirEntryType},
    error::{Error, Result},
    flags::OpenFlag,
    fs::{FileSystem, SeekFrom, UTime},
    path::Path,
    stat::{Stat, StatFs},
};
