use clap::{Parser, Subcommand};
use sakulinfs::Permission;
use std::path::PathBuf;

/// Operate on a SakulinFS image, one command per invocation.
#[derive(Parser)]
#[command(name = "sfs", version)]
pub struct Cli {
    /// Act as the superuser, authenticated by this password
    #[arg(long, global = true, conflicts_with = "user")]
    pub admin: Option<String>,

    /// Log in as a registered user
    #[arg(long, global = true, requires = "password")]
    pub user: Option<String>,

    /// Password for --user, or the new superuser password for `format`
    #[arg(long, global = true)]
    pub password: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create or overwrite an image and lay out an empty volume
    Format {
        image: PathBuf,
        /// Volume size, e.g. 65536, 64K or 1MB
        #[arg(long, value_parser = parse_size)]
        size: u64,
    },
    /// List a directory
    Ls {
        image: PathBuf,
        #[arg(default_value = "/")]
        path: String,
    },
    Mkdir {
        image: PathBuf,
        path: String,
    },
    /// Copy a host file into the volume
    Put {
        image: PathBuf,
        host_file: PathBuf,
        path: String,
    },
    Cat {
        image: PathBuf,
        path: String,
    },
    Rm {
        image: PathBuf,
        path: String,
    },
    /// Remove a directory and everything below it
    Rmdir {
        image: PathBuf,
        path: String,
    },
    /// Set permission bits, two octal digits: admin then user
    Chmod {
        image: PathBuf,
        path: String,
        bits: Permission,
    },
    /// Register a user (admin only)
    Useradd {
        image: PathBuf,
        name: String,
        #[arg(value_name = "PW")]
        new_password: String,
    },
    /// Clear a write lock left by an edit that never finished
    Unlock {
        image: PathBuf,
        path: String,
    },
    /// Print every node of the chain
    Dump { image: PathBuf },
    /// Check allocator consistency
    Fsck { image: PathBuf },
}

/// Parses a byte count with an optional `B`, `K`/`KB`, `M`/`MB` or `G`/`GB`
/// suffix. Suffixes are binary multiples and case insensitive.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or_else(|| s.len());
    let (digits, suffix) = s.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("{:?} does not start with a number", s))?;
    let unit: u64 = match suffix.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" => 1 << 10,
        "M" | "MB" => 1 << 20,
        "G" | "GB" => 1 << 30,
        other => return Err(format!("unknown size suffix {:?}", other)),
    };
    value
        .checked_mul(unit)
        .ok_or_else(|| format!("{:?} overflows", s))
}
