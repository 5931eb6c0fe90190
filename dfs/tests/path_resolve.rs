mod common;

use dfs::ROOT_INODE;
use vfs::{Error, FileSystem, OpenFlag};

use common::MIB;

#[test]
fn nested_lookup() {
    let (_disk, fs) = common::mount(4 * MIB, &common::options(1024));
    fs.mkdir("/usr").unwrap();
    fs.mkdir("/usr/lib").unwrap();
    common::write_file(&fs, "/usr/lib/libc.so", b"elf");

    let engine = fs.engine();
    let lib = engine.lookup_name(ROOT_INODE, "/usr/lib").unwrap();
    let libc = engine.lookup_name(ROOT_INODE, "/usr/lib/libc.so").unwrap();
    assert_eq!(engine.lookup_name(lib, "libc.so").unwrap(), libc);

    // 多余的分隔符与`.`被忽略
    assert_eq!(
        engine.lookup_name(ROOT_INODE, "//usr/./lib//libc.so/").unwrap(),
        libc
    );
    assert_eq!(engine.lookup_name(ROOT_INODE, "/").unwrap(), ROOT_INODE);
    assert_eq!(engine.lookup_name(lib, "").unwrap(), lib);

    assert_eq!(
        engine.lookup_name(ROOT_INODE, "/usr/bin"),
        Err(Error::NotFound)
    );
    assert_eq!(
        engine.lookup_name(ROOT_INODE, "/usr/lib/libc.so/x"),
        Err(Error::NotADirectory)
    );
    // `..`只是一个普通的名字
    assert_eq!(
        engine.lookup_name(ROOT_INODE, "/usr/.."),
        Err(Error::NotFound)
    );
}

#[test]
fn parse_name_returns_parent() {
    let (_disk, fs) = common::mount(4 * MIB, &common::options(1024));
    fs.mkdir("/etc").unwrap();

    let engine = fs.engine();
    let etc = engine.lookup_name(ROOT_INODE, "/etc").unwrap();
    let (parent, name) = engine.parse_name("/etc/passwd").unwrap();
    assert_eq!(parent.ino(), etc);
    assert_eq!(name, b"passwd");

    let (parent, name) = engine.parse_name("top").unwrap();
    assert_eq!(parent.ino(), ROOT_INODE);
    assert_eq!(name, b"top");

    assert_eq!(engine.parse_name("/").err(), Some(Error::InvalidInput));
    assert_eq!(
        engine.parse_name("/nope/passwd").err(),
        Some(Error::NotFound)
    );
}

#[test]
fn depth_limit() {
    let (_disk, fs) = common::mount(4 * MIB, &common::options(1024));

    let mut path = String::new();
    for name in ["a", "b", "c", "d", "e", "f"] {
        path.push('/');
        path.push_str(name);
        fs.mkdir(&path).unwrap();
    }

    // 6 层目录之下还能再放一个文件
    let file = format!("{path}/g");
    common::write_file(&fs, &file, b"deep");
    assert_eq!(common::read_file(&fs, &file), b"deep");

    let deeper = format!("{path}/g/h");
    assert_eq!(
        fs.open(&deeper, OpenFlag::CREATE | OpenFlag::WRONLY).err(),
        Some(Error::NameTooLong)
    );
    assert_eq!(
        fs.engine().lookup_name(ROOT_INODE, &deeper),
        Err(Error::NameTooLong)
    );
}

#[test]
fn long_component() {
    let (_disk, fs) = common::mount(4 * MIB, &common::options(1024));
    let name = "n".repeat(256);

    assert_eq!(
        fs.open(&format!("/{name}"), OpenFlag::CREATE | OpenFlag::WRONLY)
            .err(),
        Some(Error::NameTooLong)
    );
    assert_eq!(
        fs.engine().lookup_name(ROOT_INODE, &format!("/{name}/x")),
        Err(Error::NameTooLong)
    );

    common::write_file(&fs, &format!("/{}", &name[..255]), b"ok");
}
