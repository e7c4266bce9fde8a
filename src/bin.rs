use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::info;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tarstream::{ArchiveReader, ArchiveWriter, Entry, EntryType, IsTypeTrait, TarConfig};

#[derive(Parser, Debug)]
#[command(name = "tarstream", version, about = "List, read and create tar archives")]
struct Cli {
    /// TOML file with block size, record size and long name settings.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Records per block, overrides the config file.
    #[arg(short = 'b', long, global = true)]
    blocking_factor: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the entries of an archive.
    List {
        archive: PathBuf,
        /// Show type, mode, owner and size.
        #[arg(short, long)]
        long: bool,
    },
    /// Write the content of one member to stdout.
    Cat { archive: PathBuf, member: String },
    /// Create an archive from files and directories.
    Create {
        archive: PathBuf,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

fn load_config(cli: &Cli) -> Result<TarConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            toml::from_str::<TarConfig>(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => TarConfig::default(),
    };
    if let Some(factor) = cli.blocking_factor {
        config = config.with_blocking_factor(factor);
    }
    config.validate()?;
    Ok(config)
}

fn open_archive(path: &Path, config: TarConfig) -> Result<ArchiveReader<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(ArchiveReader::seekable(BufReader::new(file), config)?)
}

fn type_char(entry_type: EntryType) -> char {
    match entry_type {
        EntryType::Normal | EntryType::Contiguous => '-',
        EntryType::Link => 'h',
        EntryType::Symlink => 'l',
        EntryType::CharDevice => 'c',
        EntryType::BlockDevice => 'b',
        EntryType::Directory => 'd',
        EntryType::Fifo => 'p',
        EntryType::GnuLongName | EntryType::GnuLongLink => '?',
    }
}

fn list(path: &Path, long: bool, config: TarConfig) -> Result<()> {
    let mut reader = open_archive(path, config)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for entry in reader.entries() {
        let entry = entry?;
        if long {
            write!(
                out,
                "{}{:04o} {}/{} {:>10} {}",
                type_char(entry.entry_type),
                entry.mode & 0o7777,
                entry.uid,
                entry.gid,
                entry.size,
                entry.name
            )?;
            if !entry.link_name.is_empty() {
                write!(out, " -> {}", entry.link_name)?;
            }
            writeln!(out)?;
        } else {
            writeln!(out, "{}", entry.name)?;
        }
    }
    Ok(())
}

fn cat(path: &Path, member: &str, config: TarConfig) -> Result<()> {
    let mut reader = open_archive(path, config)?;
    while let Some(entry) = reader.next_entry()? {
        if entry.name == member {
            if !entry.carries_data() {
                bail!("{} is not a regular file", member);
            }
            let stdout = io::stdout();
            io::copy(&mut reader, &mut stdout.lock())?;
            return Ok(());
        }
    }
    bail!("{} not found in {}", member, path.display())
}

fn entry_for(path: &Path, name: String) -> Result<Entry> {
    let meta = fs::symlink_metadata(path).with_context(|| format!("reading {}", path.display()))?;
    let mut entry = if meta.file_type().is_symlink() {
        let target = fs::read_link(path)?;
        Entry::symlink(name, target.to_string_lossy())
    } else if meta.is_dir() {
        Entry::directory(name)
    } else if meta.is_file() {
        Entry::file(name, meta.len())
    } else {
        bail!("{} is not a file, directory or symlink", path.display());
    };
    if let Ok(modified) = meta.modified() {
        entry.mtime = modified.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        entry = entry.with_mode(meta.mode() & 0o7777).with_owner(meta.uid(), meta.gid());
    }
    Ok(entry)
}

fn add_path<W: Write>(writer: &mut ArchiveWriter<W>, path: &Path, name: String) -> Result<()> {
    let entry = entry_for(path, name)?;
    info!("adding {}", entry.name);
    writer.put_next_entry(&entry)?;
    match entry.entry_type {
        EntryType::Normal => {
            let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
            let copied = io::copy(&mut file, writer)?;
            if copied != entry.size {
                bail!("{} changed size while archiving", path.display());
            }
            writer.close_entry()?;
        }
        EntryType::Directory => {
            writer.close_entry()?;
            let mut children = fs::read_dir(path)?
                .map(|child| child.map(|c| c.path()))
                .collect::<io::Result<Vec<PathBuf>>>()?;
            children.sort();
            for child in children {
                let Some(file_name) = child.file_name() else {
                    continue;
                };
                let mut child_name = format!("{}{}", entry.name, file_name.to_string_lossy());
                if fs::symlink_metadata(&child)?.is_dir() {
                    child_name.push('/');
                }
                add_path(writer, &child, child_name)?;
            }
        }
        _ => writer.close_entry()?,
    }
    Ok(())
}

fn create(path: &Path, paths: &[PathBuf], config: TarConfig) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArchiveWriter::with_config(BufWriter::new(file), config)?;
    for source in paths {
        let mut name = source.to_string_lossy().trim_start_matches('/').to_string();
        if source.is_dir() && !name.ends_with('/') {
            name.push('/');
        }
        add_path(&mut writer, source, name)?;
    }
    writer.close()?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    match &cli.command {
        Commands::List { archive, long } => list(archive, *long, config),
        Commands::Cat { archive, member } => cat(archive, member, config),
        Commands::Create { archive, paths } => create(archive, paths, config),
    }
}
