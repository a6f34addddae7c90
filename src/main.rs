use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use log::debug;
use minitar::archive::{extract_to, list_members, list_names, ReadOptions};
use minitar::{
    append_files_to_archive, create_archive, update_files_in_archive, FileList, Member, TarError,
};

#[derive(Parser)]
#[command(name = "minitar", version, about = "A minimal ustar archiver")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new archive from the given files
    #[command(visible_alias = "c")]
    Create {
        #[arg(short = 'f', long = "file")]
        archive: PathBuf,
        #[arg(required = true, num_args = 1..)]
        files: Vec<String>,
    },
    /// Append files to the end of an existing archive
    #[command(visible_alias = "a")]
    Append {
        #[arg(short = 'f', long = "file")]
        archive: PathBuf,
        #[arg(required = true, num_args = 1..)]
        files: Vec<String>,
    },
    /// List archive members
    #[command(visible_alias = "t")]
    List {
        #[arg(short = 'f', long = "file")]
        archive: PathBuf,
        /// Show mode, owner, size and modification time
        #[arg(short, long)]
        verbose: bool,
        /// Print members as JSON
        #[arg(long, conflicts_with = "verbose")]
        json: bool,
        /// Do not verify header checksums
        #[arg(long)]
        no_verify: bool,
    },
    /// Append newer copies of files that are already members
    #[command(visible_alias = "u")]
    Update {
        #[arg(short = 'f', long = "file")]
        archive: PathBuf,
        #[arg(required = true, num_args = 1..)]
        files: Vec<String>,
    },
    /// Extract every member
    #[command(visible_alias = "x")]
    Extract {
        #[arg(short = 'f', long = "file")]
        archive: PathBuf,
        #[arg(short = 'C', long = "directory", default_value = ".")]
        directory: PathBuf,
        /// Do not verify header checksums
        #[arg(long)]
        no_verify: bool,
    },
}

impl Commands {
    fn archive(&self) -> &Path {
        match self {
            Commands::Create { archive, .. }
            | Commands::Append { archive, .. }
            | Commands::List { archive, .. }
            | Commands::Update { archive, .. }
            | Commands::Extract { archive, .. } => archive,
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let command = Cli::parse().command;
    let archive = command.archive().to_owned();
    match run(command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("minitar: {}: {e}", archive.display());
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<(), Box<dyn Error>> {
    match command {
        // ── Create ───────────────────────────────────────────────────────────
        Commands::Create { archive, files } => {
            create_archive(&archive, &files.into_iter().collect())?;
        }

        // ── Append ───────────────────────────────────────────────────────────
        Commands::Append { archive, files } => {
            append_files_to_archive(&archive, &files.into_iter().collect())?;
        }

        // ── Update ───────────────────────────────────────────────────────────
        Commands::Update { archive, files } => {
            let files: FileList = files.into_iter().collect();
            match update_files_in_archive(&archive, &files) {
                Err(TarError::NotInArchive(name)) => {
                    return Err(format!(
                        "one or more of the specified files is not already present in the archive ({name})"
                    )
                    .into());
                }
                other => other?,
            }
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { archive, verbose, json, no_verify } => {
            let opts = ReadOptions { verify_checksums: !no_verify };
            if verbose || json {
                let members = list_members(&archive, &opts)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&members)?);
                } else {
                    for m in &members {
                        println!("{}", long_listing(m));
                    }
                }
            } else {
                let mut names = FileList::new();
                list_names(&archive, &opts, &mut names)?;
                for name in &names {
                    println!("{name}");
                }
            }
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { archive, directory, no_verify } => {
            debug!("extracting {} into {}", archive.display(), directory.display());
            let opts = ReadOptions { verify_checksums: !no_verify };
            extract_to(&archive, &directory, &opts)?;
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

/// One line in the style of `tar -tv`.
fn long_listing(m: &Member) -> String {
    let mtime = i64::try_from(m.mtime)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "?".into());
    format!(
        "{}{} {}/{} {:>10} {} {}",
        type_char(m.typeflag),
        mode_string(m.mode),
        m.uname,
        m.gname,
        m.size,
        mtime,
        m.name
    )
}

fn type_char(flag: char) -> char {
    match flag {
        '0' | '\0' => '-',
        '5' => 'd',
        '2' => 'l',
        _ => '?',
    }
}

fn mode_string(mode: u32) -> String {
    const RWX: [(u32, char); 9] = [
        (0o400, 'r'), (0o200, 'w'), (0o100, 'x'),
        (0o040, 'r'), (0o020, 'w'), (0o010, 'x'),
        (0o004, 'r'), (0o002, 'w'), (0o001, 'x'),
    ];
    RWX.iter()
        .map(|&(bit, c)| if mode & bit != 0 { c } else { '-' })
        .collect()
}
