use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use scribblefs::archive::{ArchiveState, AssetKind};
use scribblefs::config::{self, SecretStoreKind};
use scribblefs::watcher::{ChangeStatus, ChangeWatcher};
use scribblefs::{codec, metadata, ScribbleArchive};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// scribblefs - Encrypted Scribble archives backed by the platform secret store
#[derive(Parser)]
#[command(name = "scribblefs")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "scribblefs.json")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a configuration file
    Init {
        /// Secret-store namespace tag
        #[arg(short, long, default_value = config::DEFAULT_NAMESPACE)]
        namespace: String,

        /// Directory for decrypted working copies (defaults to the OS temp dir)
        #[arg(short, long)]
        scratch_dir: Option<String>,

        /// Author recorded in new archives
        #[arg(short, long, default_value = "")]
        author: String,

        /// Keep keys in process memory only (testing)
        #[arg(long)]
        memory_store: bool,
    },

    /// Create a new archive
    Create {
        /// Archive directory (must not exist)
        path: PathBuf,

        /// Project name (defaults to the directory name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Print the decrypted metadata document
    Show {
        path: PathBuf,

        /// Indent the output
        #[arg(short, long)]
        pretty: bool,
    },

    /// Mark or unmark an archive as favorite
    Favorite {
        path: PathBuf,

        /// Clear the flag instead of setting it
        #[arg(long)]
        off: bool,
    },

    /// Encrypt a file into an archive asset
    Write {
        path: PathBuf,

        /// Input file to encrypt
        input: PathBuf,

        /// Asset kind: txt or vec
        #[arg(short, long, default_value = "txt")]
        kind: AssetKind,

        /// Asset name (defaults to the input filename)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Decrypt an archive asset
    Read {
        path: PathBuf,

        /// Asset name
        name: String,

        #[arg(short, long, default_value = "txt")]
        kind: AssetKind,

        /// Output file path (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List assets in an archive
    List {
        path: PathBuf,

        /// Only list one kind
        #[arg(short, long)]
        kind: Option<AssetKind>,
    },

    /// Delete an archive and its key material, or a single asset
    Delete {
        path: PathBuf,

        /// Delete only this asset
        #[arg(long)]
        asset: Option<String>,

        #[arg(short, long, default_value = "txt")]
        kind: AssetKind,

        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Show archive state and statistics
    Status { path: PathBuf },

    /// Report changes inside an archive until interrupted
    Watch { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls the level, e.g. RUST_LOG=info,scribblefs=debug
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();
    info!(command = ?cli.command, "scribblefs starting");

    match cli.command {
        Commands::Init {
            namespace,
            scratch_dir,
            author,
            memory_store,
        } => cmd_init(&cli.config, namespace, scratch_dir, author, memory_store).await,

        Commands::Create { path, name } => cmd_create(&cli.config, &path, name).await,

        Commands::Show { path, pretty } => cmd_show(&cli.config, &path, pretty).await,

        Commands::Favorite { path, off } => cmd_favorite(&cli.config, &path, !off).await,

        Commands::Write {
            path,
            input,
            kind,
            name,
        } => cmd_write(&cli.config, &path, &input, kind, name.as_deref()).await,

        Commands::Read {
            path,
            name,
            kind,
            output,
        } => cmd_read(&cli.config, &path, &name, kind, output.as_ref()).await,

        Commands::List { path, kind } => cmd_list(&cli.config, &path, kind).await,

        Commands::Delete {
            path,
            asset,
            kind,
            yes,
        } => cmd_delete(&cli.config, &path, asset.as_deref(), kind, yes).await,

        Commands::Status { path } => cmd_status(&cli.config, &path).await,

        Commands::Watch { path } => cmd_watch(&path).await,
    }
}

fn load_archive(config_path: &str) -> Result<(config::Config, ScribbleArchive)> {
    let cfg = config::Config::load_with_env(Some(config_path))?;
    let archive = cfg.archive();
    Ok((cfg, archive))
}

/// Create a styled progress bar for file operations
fn create_progress_bar(total: u64, message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_message(message.to_string());
    Ok(pb)
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    Ok(pb)
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N]: ", prompt);
    io::stdout().flush()?;

    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(response.trim().eq_ignore_ascii_case("y"))
}

async fn cmd_init(
    config_path: &str,
    namespace: String,
    scratch_dir: Option<String>,
    author: String,
    memory_store: bool,
) -> Result<()> {
    if fs::try_exists(config_path).await.unwrap_or(false) {
        anyhow::bail!(
            "Configuration file '{}' already exists. Remove it first or use a different path.",
            config_path
        );
    }

    let store = if memory_store {
        SecretStoreKind::Memory
    } else {
        SecretStoreKind::Keyring
    };
    let mut cfg = config::Config::new(namespace, store);
    cfg.scratch_dir = scratch_dir;
    cfg.author = author;
    cfg.validate()?;

    if let Some(dir) = &cfg.scratch_dir {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating scratch directory '{}'", dir))?;
    }

    let config_json = serde_json::to_string_pretty(&cfg)?;
    fs::write(config_path, config_json)
        .await
        .with_context(|| format!("writing config to '{}'", config_path))?;

    println!("Initialization complete!");
    println!("Config:     {}", config_path);
    println!("Namespace:  {}", cfg.namespace);
    println!("Scratch:    {}", cfg.scratch_dir().display());
    println!("Key store:  {:?}", cfg.secret_store);
    Ok(())
}

async fn cmd_create(config_path: &str, path: &Path, name: Option<String>) -> Result<()> {
    let (cfg, archive) = load_archive(config_path)?;

    let name = match name {
        Some(name) => name,
        None => path
            .file_stem()
            .context("archive path has no file name")?
            .to_string_lossy()
            .to_string(),
    };

    let spinner = create_spinner(&format!("Creating {}...", path.display()))?;
    let created = archive.create(path, &cfg.metadata_defaults(name)).await;
    spinner.finish_and_clear();
    created.with_context(|| format!("creating archive {}", path.display()))?;

    let label = archive.secret_label(path).await?;
    println!("Created {}", path.display());
    println!("  Key label: {}", label);
    println!();
    println!("IMPORTANT: the key lives in the secret store, not the archive.");
    println!("Without it, this archive cannot be recovered.");
    Ok(())
}

async fn cmd_show(config_path: &str, path: &Path, pretty: bool) -> Result<()> {
    let (_cfg, archive) = load_archive(config_path)?;

    let session = archive.open(path).await?;
    let document = session.read_metadata().await;
    session.close().await?;
    let document = document?;

    if pretty {
        println!("{}", codec::encode_pretty(&document));
    } else {
        println!("{}", codec::encode(&document));
    }
    Ok(())
}

async fn cmd_favorite(config_path: &str, path: &Path, favorite: bool) -> Result<()> {
    let (_cfg, archive) = load_archive(config_path)?;

    let session = archive.open(path).await?;
    if let Err(e) = session.set_favorite(favorite).await {
        // dropping the session discards the working copy
        drop(session);
        return Err(e.into());
    }
    session.close().await?;

    println!(
        "{} {}",
        if favorite { "Marked favorite:" } else { "Unmarked:" },
        path.display()
    );
    Ok(())
}

async fn cmd_write(
    config_path: &str,
    path: &Path,
    input: &Path,
    kind: AssetKind,
    name: Option<&str>,
) -> Result<()> {
    let (_cfg, archive) = load_archive(config_path)?;

    let name = match name {
        Some(name) => name.to_string(),
        None => input
            .file_name()
            .context("input file has no filename")?
            .to_string_lossy()
            .to_string(),
    };

    let input_size = fs::metadata(input)
        .await
        .with_context(|| format!("reading metadata for {:?}", input))?
        .len();
    let pb = create_progress_bar(input_size, "Encrypting")?;

    let mut file = fs::File::open(input)
        .await
        .with_context(|| format!("opening {:?}", input))?;
    let bytes = archive
        .write_asset_stream(path, kind, &name, &mut file)
        .await?;

    pb.set_position(bytes);
    pb.finish_with_message(format!("Encrypted {} bytes", bytes));
    println!("  {} -> {}/{}", input.display(), kind.dir_name(), name);
    Ok(())
}

async fn cmd_read(
    config_path: &str,
    path: &Path,
    name: &str,
    kind: AssetKind,
    output: Option<&PathBuf>,
) -> Result<()> {
    let (_cfg, archive) = load_archive(config_path)?;

    // decrypted size is unknown until the padding is checked
    let spinner = create_spinner(&format!("Decrypting {}...", name))?;

    match output {
        Some(output_path) => {
            let bytes = archive
                .export_asset(path, kind, name, output_path)
                .await
                .with_context(|| format!("decrypting {} into {:?}", name, output_path))?;
            spinner.finish_with_message(format!("Decrypted {} bytes -> {:?}", bytes, output_path));
        }
        None => {
            spinner.finish_and_clear();
            let mut stdout = tokio::io::stdout();
            let bytes = archive.read_asset_stream(path, kind, name, &mut stdout).await?;
            eprintln!("Decrypted {} bytes to stdout", bytes);
        }
    }
    Ok(())
}

async fn cmd_list(config_path: &str, path: &Path, kind: Option<AssetKind>) -> Result<()> {
    let (_cfg, archive) = load_archive(config_path)?;

    let kinds = match kind {
        Some(kind) => vec![kind],
        None => vec![AssetKind::Text, AssetKind::Vector],
    };

    for kind in kinds {
        let assets = archive.list_assets(path, kind).await?;
        println!("{}/ ({} assets)", kind.dir_name(), assets.len());
        for (name, size) in assets {
            println!("  {:<40} {:>12} bytes", name, size);
        }
    }
    Ok(())
}

async fn cmd_delete(
    config_path: &str,
    path: &Path,
    asset: Option<&str>,
    kind: AssetKind,
    yes: bool,
) -> Result<()> {
    let (_cfg, archive) = load_archive(config_path)?;

    if archive.inspect(path).await == ArchiveState::Absent {
        anyhow::bail!("Archive '{}' not found", path.display());
    }

    let what = match asset {
        Some(name) => format!("asset '{}/{}' in {}", kind.dir_name(), name, path.display()),
        None => format!("archive '{}' and its key material", path.display()),
    };
    if !yes && !confirm(&format!("Delete {}? This cannot be undone.", what))? {
        println!("Cancelled.");
        return Ok(());
    }

    match asset {
        Some(name) => archive.delete_asset(path, kind, name).await?,
        None => archive.delete(path).await?,
    }
    println!("Deleted {}", what);
    Ok(())
}

async fn cmd_status(config_path: &str, path: &Path) -> Result<()> {
    let (cfg, archive) = load_archive(config_path)?;

    println!("scribblefs Status");
    println!();
    println!("Configuration:");
    println!("  Config file:   {}", config_path);
    println!("  Namespace:     {}", cfg.namespace);
    println!("  Scratch dir:   {}", cfg.scratch_dir().display());
    println!("  Key store:     {:?}", cfg.secret_store);
    println!();

    let state = archive.inspect(path).await;
    println!("Archive:         {}", path.display());
    println!("  State:         {:?}", state);
    if state != ArchiveState::Closed {
        return Ok(());
    }

    let label = archive.secret_label(path).await?;
    println!("  Key label:     {}", label);

    let session = archive.open(path).await?;
    let document = session.read_metadata().await;
    session.close().await?;
    let document = document?;
    println!(
        "  Project:       {}",
        metadata::project_name(&document).unwrap_or("<unnamed>")
    );
    println!(
        "  Favorite:      {}",
        if metadata::is_favorite(&document).unwrap_or(false) { "yes" } else { "no" }
    );
    println!();

    println!("Assets:");
    for kind in [AssetKind::Text, AssetKind::Vector] {
        let assets = archive.list_assets(path, kind).await?;
        let total: u64 = assets.iter().map(|(_, size)| size).sum();
        println!("  {:<8} {:>5} files {:>12} bytes", kind.dir_name(), assets.len(), total);
    }
    Ok(())
}

async fn cmd_watch(path: &Path) -> Result<()> {
    let (watcher, mut reports) = ChangeWatcher::start(path)?;
    println!("Watching {} (Ctrl-C to stop)", path.display());

    loop {
        tokio::select! {
            report = reports.recv() => match report {
                Some(report) => {
                    let marker = match report.status {
                        ChangeStatus::Changed => "changed",
                        ChangeStatus::Unchanged => "unchanged",
                    };
                    println!("{:<10} {}", marker, report.path.display());
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let entries = watcher.stop().await;
    println!("Stopped. {} path(s) tracked.", entries.len());
    Ok(())
}
