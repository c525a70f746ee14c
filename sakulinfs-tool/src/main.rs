mod cli;

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use log::debug;
use sakulinfs::io::{FileVolume, FileVolumeBuilder, VolumeStorage};
use sakulinfs::{FileSystem, FileType, Node, Role, Session};

use cli::{Cli, Command};

fn open(image: &Path) -> Result<FileSystem<FileVolume>> {
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .open(image)
        .with_context(|| format!("cannot open image {}", image.display()))?;
    let dev = FileVolumeBuilder::from(fd).clear_medium(false).build()?;
    let fs = FileSystem::open(dev).with_context(|| format!("{} is not a volume", image.display()))?;
    debug!("opened {}", image.display());
    Ok(fs)
}

/// Builds the session the global credential flags ask for.
fn login(fs: &mut FileSystem<FileVolume>, cli: &Cli) -> Result<Session> {
    let mut session = Session::new();
    match (&cli.admin, &cli.user, &cli.password) {
        (Some(admin), _, _) => fs.change_role(&mut session, Role::Admin, admin)?,
        (None, Some(user), Some(password)) => fs.login(&mut session, user, password)?,
        _ => bail!("this command needs --admin <PW> or --user <NAME> --password <PW>"),
    }
    Ok(session)
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Command::Format { image, size } => {
            let password = cli
                .password
                .as_deref()
                .ok_or_else(|| anyhow!("format needs --password for the superuser"))?;
            let dev = FileVolume::open_volume(image)
                .with_context(|| format!("cannot create image {}", image.display()))?;
            FileSystem::format(dev, *size, password)?;
            println!("formatted {} ({} bytes)", image.display(), size);
        }
        Command::Ls { image, path } => {
            let mut fs = open(image)?;
            let session = login(&mut fs, &cli)?;
            for entry in fs.list_dir(&session, path)? {
                println!(
                    "{}{} {} {:>10} {}",
                    if entry.kind == FileType::Folder { 'd' } else { '-' },
                    if entry.locked { '*' } else { ' ' },
                    entry.permission,
                    entry.size,
                    entry.name
                );
            }
        }
        Command::Mkdir { image, path } => {
            let mut fs = open(image)?;
            let session = login(&mut fs, &cli)?;
            fs.create_dir(&session, path, None)?;
            fs.sync()?;
        }
        Command::Put {
            image,
            host_file,
            path,
        } => {
            let data = fs::read(host_file)
                .with_context(|| format!("cannot read {}", host_file.display()))?;
            let mut fs = open(image)?;
            let session = login(&mut fs, &cli)?;
            fs.create_file(&session, path, &data, None)?;
            fs.sync()?;
        }
        Command::Cat { image, path } => {
            let mut fs = open(image)?;
            let session = login(&mut fs, &cli)?;
            let data = fs.read_file(&session, path)?;
            io::stdout().write_all(&data)?;
        }
        Command::Rm { image, path } => {
            let mut fs = open(image)?;
            let session = login(&mut fs, &cli)?;
            fs.remove_file(&session, path)?;
            fs.sync()?;
        }
        Command::Rmdir { image, path } => {
            let mut fs = open(image)?;
            let session = login(&mut fs, &cli)?;
            fs.remove_dir(&session, path)?;
            fs.sync()?;
        }
        Command::Chmod { image, path, bits } => {
            let mut fs = open(image)?;
            let session = login(&mut fs, &cli)?;
            fs.set_permission(&session, path, *bits)?;
            fs.sync()?;
        }
        Command::Useradd {
            image,
            name,
            new_password,
        } => {
            let mut fs = open(image)?;
            let session = login(&mut fs, &cli)?;
            fs.register_user(&session, name, new_password)?;
            fs.sync()?;
        }
        Command::Unlock { image, path } => {
            let mut fs = open(image)?;
            let session = login(&mut fs, &cli)?;
            fs.release_write_lock(&session, path)?;
            fs.sync()?;
        }
        Command::Dump { image } => {
            let mut fs = open(image)?;
            for (pos, node) in fs.dump()? {
                match &node {
                    Node::File(file) => println!(
                        "{:>10} FILE span {:>8} prev {:>10} next {:>10} {:?}",
                        pos,
                        node.span(),
                        file.last_node,
                        file.next_node,
                        file.inode.name
                    ),
                    Node::Empty(empty) => println!(
                        "{:>10} EMPT span {:>8} prev {:>10} next {:>10} free {} <-> {}",
                        pos,
                        node.span(),
                        empty.last_node,
                        empty.next_node,
                        empty.last_empty,
                        empty.next_empty
                    ),
                }
            }
        }
        Command::Fsck { image } => {
            let mut fs = open(image)?;
            fs.verify()
                .with_context(|| format!("{} is inconsistent", image.display()))?;
            println!("{}: clean", image.display());
        }
    }
    Ok(())
}
