use sakulinfs::io::FileVolumeBuilder;
use sakulinfs::{FileSystem, Role, Session};

pub fn main() -> sakulinfs::Result<()> {
    let tmp = tempfile::tempfile()?;
    let dev = FileVolumeBuilder::from(tmp).with_size(64 * 1024).build()?;

    // Format a fresh volume and act as the superuser.
    let mut fs = FileSystem::format(dev, 64 * 1024, "abc123")?;
    let mut session = Session::new();
    fs.change_role(&mut session, Role::Admin, "abc123")?;

    fs.create_dir(&session, "/docs", None)?;
    fs.create_file(&session, "/docs/hello.txt", b"hello, world", None)?;
    for entry in fs.list_dir(&session, "/docs")? {
        println!("{} {} {}", entry.permission, entry.size, entry.name);
    }
    println!("{}", String::from_utf8_lossy(&fs.read_file(&session, "/docs/hello.txt")?));
    Ok(())
}
