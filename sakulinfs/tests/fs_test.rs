use sakulinfs::io::{FileVolume, FileVolumeBuilder, VolumeStorage};
use sakulinfs::{FileSystem, FileType, FsError, INode, Node, Permission, Role, Session, Volume};
use tempfile::NamedTempFile;

fn admin_session(fs: &FileSystem<FileVolume>) -> Session {
    let mut session = Session::new();
    fs.change_role(&mut session, Role::Admin, "abc123").unwrap();
    session
}

fn free_spans(fs: &mut FileSystem<FileVolume>) -> Vec<(u64, u64)> {
    fs.dump()
        .unwrap()
        .into_iter()
        .filter_map(|(pos, node)| match node {
            Node::Empty(e) => Some((pos, e.empty_size)),
            _ => None,
        })
        .collect()
}

#[test]
fn end_to_end_on_64k_volume() {
    let tf = NamedTempFile::new().unwrap();
    let dev = FileVolumeBuilder::from(tf.reopen().unwrap())
        .with_size(64 * 1024)
        .build()
        .unwrap();
    let mut fs = FileSystem::format(dev, 64 * 1024, "abc123").unwrap();
    let session = admin_session(&fs);

    fs.create_dir(&session, "/docs", None).unwrap();
    let free_before = free_spans(&mut fs);
    let pos = fs.create_file(&session, "/docs/a.txt", &[b'x'; 10], None).unwrap();

    let entries = fs.list_dir(&session, "/docs").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "a.txt");
    assert_eq!(entries[0].size, 10);
    assert_eq!(entries[0].kind, FileType::UserFile);

    fs.remove_file(&session, "/docs/a.txt").unwrap();
    assert!(fs.list_dir(&session, "/docs").unwrap().is_empty());
    assert_eq!(free_spans(&mut fs), free_before);

    // A file needing the same span lands in the reclaimed slot.
    let again = fs.create_file(&session, "/docs/b.txt", &[b'y'; 10], None).unwrap();
    assert_eq!(again, pos);
    fs.verify().unwrap();
}

#[test]
fn tree_survives_reopen() {
    let tf = NamedTempFile::new().unwrap();
    let dev = FileVolumeBuilder::from(tf.reopen().unwrap())
        .with_size(64 * 1024)
        .build()
        .unwrap();
    let mut fs = FileSystem::format(dev, 64 * 1024, "abc123").unwrap();
    let mut session = admin_session(&fs);
    fs.create_dir(&session, "/docs", None).unwrap();
    fs.create_file(&session, "/docs/a.txt", b"persisted", None).unwrap();
    fs.register_user(&session, "alice", "pw").unwrap();
    fs.sync().unwrap();
    drop(fs);

    let dev = FileVolumeBuilder::from(tf.reopen().unwrap())
        .clear_medium(false)
        .build()
        .unwrap();
    let mut fs = FileSystem::open(dev).unwrap();
    session.logout();
    fs.login(&mut session, "alice", "pw").unwrap();
    assert_eq!(fs.read_file(&session, "/docs/a.txt").unwrap(), b"persisted");
    fs.verify().unwrap();
}

#[test]
fn open_volume_creates_backing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("disk.img");

    let dev = FileVolume::open_volume(&path).unwrap();
    let fs = FileSystem::format(dev, 8 * 1024, "abc123").unwrap();
    drop(fs);

    let dev = FileVolume::open_volume(&path).unwrap();
    let vol = Volume::open(dev).unwrap();
    assert_eq!(vol.size(), 8 * 1024);
}

#[test]
fn unformatted_volume_is_rejected() {
    let tf = NamedTempFile::new().unwrap();
    let dev = FileVolumeBuilder::from(tf.reopen().unwrap())
        .with_size(4096)
        .build()
        .unwrap();

    match FileSystem::open(dev) {
        Err(FsError::Format { .. }) => (),
        Err(e) => panic!("unexpected error {:?}", e),
        Ok(_) => panic!("opened a volume full of zeros"),
    }
}

#[test]
fn one_megabyte_volume_fills_and_drains() {
    let size = 1024 * 1024;
    let dev = FileVolumeBuilder::from(tempfile::tempfile().unwrap())
        .with_size(size)
        .build()
        .unwrap();
    let mut vol = Volume::format(dev, size, "abc123").unwrap();
    let inode = INode::new("blob", FileType::UserFile, 0, Permission::OPEN);

    let mut placed = Vec::new();
    while let Some(pos) = vol.add_file(&inode, &[0xAB; 4000]).unwrap() {
        let file = vol.file_at(pos).unwrap();
        assert_eq!(file.data.len(), 4000);
        placed.push(pos);
    }
    assert!(placed.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(placed.len() as u64, (size - 64) / (20 + 27 + 8 + 4000));
    vol.verify().unwrap();

    // Drain every other node first so each case of coalescing is hit.
    for pos in placed.iter().step_by(2) {
        vol.remove_file_at(*pos).unwrap();
    }
    vol.verify().unwrap();
    for pos in placed.iter().skip(1).step_by(2) {
        vol.remove_file_at(*pos).unwrap();
    }
    vol.verify().unwrap();
    assert_eq!(vol.free_list().unwrap(), vec![64]);
    assert_eq!(vol.empty_at(64).unwrap().empty_size, size - 64);
}

#[test]
fn lock_is_visible_to_every_session() {
    let dev = FileVolumeBuilder::from(tempfile::tempfile().unwrap())
        .with_size(64 * 1024)
        .build()
        .unwrap();
    let mut fs = FileSystem::format(dev, 64 * 1024, "abc123").unwrap();
    let admin = admin_session(&fs);
    fs.create_file(&admin, "/shared", b"v1", None).unwrap();
    fs.register_user(&admin, "bob", "pw").unwrap();
    let mut bob = Session::new();
    fs.login(&mut bob, "bob", "pw").unwrap();

    let edit = fs.edit_file(&admin, "/shared").unwrap();
    assert!(matches!(fs.edit_file(&bob, "/shared"), Err(FsError::Locked { .. })));
    assert!(fs.list_dir(&bob, "/").unwrap().iter().any(|e| e.name == "shared" && e.locked));

    fs.commit_edit(&admin, edit, b"v2").unwrap();
    let edit = fs.edit_file(&bob, "/shared").unwrap();
    assert_eq!(edit.data(), b"v2");
    fs.commit_edit(&bob, edit, b"v3").unwrap();
    assert_eq!(fs.read_file(&admin, "/shared").unwrap(), b"v3");
}
