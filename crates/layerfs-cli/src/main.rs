//! layerfs command-line tool.
//!
//! Operates on an archive laid out in a local directory, with the writable
//! layer kept in SQLite (or in memory with `--memory`).
//!
//! Usage:
//!   layerfs --archive ./public ls /Users/Public
//!   layerfs --archive ./public write /Users/Public/note.txt "hello" --overwrite
//!   RUST_LOG=layerfs_core=debug layerfs --archive ./public mv /a.txt /b.txt

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt};

use layerfs_core::{AsyncFs, DirFetcher, FsConfig, ProcessExit, StorageMode};

/// Browse and modify a layered archive filesystem.
#[derive(Parser, Debug)]
#[command(name = "layerfs")]
#[command(about = "Browse and modify a layered archive filesystem")]
struct Args {
    /// Directory holding the archive and its index
    #[arg(short, long)]
    archive: PathBuf,

    /// RON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep the writable layer in memory for this run only
    #[arg(long)]
    memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Print a file to stdout
    Cat { path: String },
    /// Show file attributes
    Stat {
        path: String,
        /// Do not follow a final symlink
        #[arg(long)]
        no_follow: bool,
    },
    /// Write text to a file
    Write {
        path: String,
        contents: String,
        #[arg(long)]
        overwrite: bool,
    },
    /// Create a directory
    Mkdir {
        path: String,
        #[arg(long)]
        overwrite: bool,
    },
    /// Remove a file
    Rm { path: String },
    /// Remove an empty directory
    Rmdir { path: String },
    /// Rename a file or directory
    Mv { from: String, to: String },
    /// Exit 0 if the path exists, 1 otherwise
    Exists { path: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => FsConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => FsConfig::default(),
    };
    if args.memory {
        config.storage = StorageMode::Memory;
    }

    let fetcher = DirFetcher::new(&args.archive, config.index_file.clone());
    let fs = AsyncFs::builder(fetcher)
        .config(config)
        .restart(ProcessExit::default())
        .build();

    run(&fs, args.command).await
}

async fn run(fs: &AsyncFs, command: Command) -> Result<()> {
    match command {
        Command::Ls { path } => {
            for name in fs.readdir(&path).await? {
                println!("{name}");
            }
        }
        Command::Cat { path } => {
            let data = fs.read_file(&path).await?;
            std::io::stdout().write_all(&data)?;
        }
        Command::Stat { path, no_follow } => {
            let attr = if no_follow {
                fs.lstat(&path).await?
            } else {
                fs.stat(&path).await?
            };
            println!("kind:  {:?}", attr.kind);
            println!("size:  {}", attr.size);
            println!("mode:  {:o}", attr.mode);
            println!("mtime: {:?}", attr.mtime);
        }
        Command::Write {
            path,
            contents,
            overwrite,
        } => {
            fs.write_file(&path, contents, overwrite).await?;
        }
        Command::Mkdir { path, overwrite } => {
            fs.mkdir(&path, overwrite).await?;
        }
        Command::Rm { path } => {
            if !fs.unlink(&path).await? {
                tracing::warn!(path = %path, "nothing to remove");
            }
        }
        Command::Rmdir { path } => {
            fs.rmdir(&path).await?;
        }
        Command::Mv { from, to } => {
            let outcome = fs.rename(&from, &to).await?;
            if !outcome.is_moved() {
                anyhow::bail!("rename {from} -> {to} did not happen");
            }
        }
        Command::Exists { path } => {
            if !fs.exists(&path).await {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
