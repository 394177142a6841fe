//! msync: manifest-driven file synchronization
//!
//! Publishes a directory as a versioned bundle described by `manifest.json`,
//! and brings local installations up to date by fetching only the files
//! whose size, mode or checksum prefix differ from the manifest.

mod debug_log;
mod progress;

use std::path::{Path, PathBuf};

use clap::builder::styling::{AnsiColor, Effects};
use clap::{Args, Parser, Subcommand, builder::Styles};
use color_eyre::Result;
use color_eyre::eyre::eyre;
use tracing::{error, info};

use msync_core::diff::restrict;
use msync_core::generate::load_base;
use msync_core::{
    FileEntry, GenerateOptions, MANIFEST_BASENAME, Manifest, MsyncConfig, PathRules, Refresh, clean_dir,
    diff, generate, refresh_entry,
};
use msync_transport::{
    BatchOptions, ClientConfig, DownloadOptions, Downloader, FetchOutcome, HttpClient, list_tags, prepare,
    select_source,
};

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser)]
#[command(name = "msync")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Manifest-driven file synchronization")]
#[command(long_about = r#"
msync publishes directories as tagged bundles and keeps installations in
step with them.

Each bundle version carries a manifest.json recording, for every file, its
size, mode, a checksum of its leading bytes and the tag in which it last
changed. Downloads fetch only the files that differ locally.

Examples:
  msync generate ./bundle -t V2024.1 -n ocssw > manifest.json
  msync download -d /opt/ocssw -t V2024.1 -n ocssw
  msync clean /opt/ocssw --dry-run
  msync list-tags
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write a detailed trace log to the temp directory
    #[arg(long, global = true)]
    debug_log: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Include/exclude prefixes, added to those from `.msync.toml`
#[derive(Args, Debug, Clone, Default)]
struct RuleArgs {
    /// Relative path prefixes to ignore ("." ignores everything)
    #[arg(short, long, num_args = 1..)]
    exclude: Vec<String>,

    /// Relative path prefixes to keep even when excluded
    #[arg(short, long, num_args = 1..)]
    include: Vec<String>,
}

impl RuleArgs {
    fn rules(&self, config: &MsyncConfig) -> PathRules {
        PathRules::from_lists(
            config.exclude.iter().chain(&self.exclude),
            config.include.iter().chain(&self.include),
        )
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a manifest for a directory
    Generate {
        /// Directory to describe
        directory: PathBuf,

        /// Tag of the version being authored
        #[arg(short, long)]
        tag: String,

        /// Base manifest (defaults to DIRECTORY/manifest.json if present)
        #[arg(short, long)]
        base_manifest: Option<PathBuf>,

        /// Bytes of each file to checksum
        #[arg(short, long, default_value_t = msync_core::manifest::DEFAULT_CHECKSUM_BYTES)]
        checksum_bytes: u64,

        /// Bundle name
        #[arg(short, long)]
        name: Option<String>,

        /// Write the manifest here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        rules: RuleArgs,
    },

    /// Download the files that differ from a bundle's manifest
    Download {
        /// Destination directory
        #[arg(short, long, default_value = ".")]
        dest_dir: PathBuf,

        /// Tag to download (defaults to the last tag of the local manifest)
        #[arg(short, long)]
        tag: Option<String>,

        /// Bundle name (defaults to the name in the local manifest)
        #[arg(short, long)]
        name: Option<String>,

        /// Base URL of the tag tree
        #[arg(short, long)]
        base_url: Option<String>,

        /// Mirror the downloaded bundle into this directory
        #[arg(short, long)]
        save_dir: Option<PathBuf>,

        /// Copy from a local mirror instead of the network
        #[arg(short, long)]
        local_dir: Option<PathBuf>,

        /// Parallel transfers
        #[arg(short = 'j', long)]
        jobs: Option<usize>,

        /// Stop starting new transfers after the first failure
        #[arg(long)]
        fail_fast: bool,

        /// Streaming buffer size in bytes
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Decompress .Z, .gz and .bz2 files after download
        #[arg(short, long)]
        uncompress: bool,

        /// Only consider these paths
        files: Vec<String>,
    },

    /// List the paths a download would update
    Diff {
        /// Directory to check
        #[arg(short, long, default_value = ".")]
        dest_dir: PathBuf,

        /// Manifest to check against (defaults to DEST_DIR/manifest.json)
        #[arg(short, long)]
        manifest: Option<PathBuf>,

        /// Only consider these paths
        files: Vec<String>,
    },

    /// Remove files not declared in a directory's manifest
    Clean {
        /// Directory to clean (must contain manifest.json)
        #[arg(default_value = ".")]
        directory: PathBuf,

        /// Only report what would be removed
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        rules: RuleArgs,
    },

    /// List the files of a manifest
    List {
        /// Manifest file, or a directory containing one
        #[arg(default_value = ".")]
        manifest: PathBuf,

        /// Include tag, size and checksum
        #[arg(long)]
        info: bool,

        /// Only files last changed in this tag
        #[arg(short, long)]
        tag: Option<String>,
    },

    /// Print a value by colon-separated key path, e.g. files:bin/tool:size
    GetValue {
        #[arg(short, long, default_value = MANIFEST_BASENAME)]
        manifest: PathBuf,

        xpath: String,
    },

    /// Print the oldest tag of a manifest
    GetFirstTag {
        #[arg(short, long, default_value = MANIFEST_BASENAME)]
        manifest: PathBuf,
    },

    /// Print a manifest with a tag appended
    AddTag {
        #[arg(short, long, default_value = MANIFEST_BASENAME)]
        manifest: PathBuf,

        tag: String,
    },

    /// Print a manifest in canonical form
    Reprint {
        #[arg(default_value = MANIFEST_BASENAME)]
        manifest: PathBuf,
    },

    /// Print a manifest with one path refreshed from disk
    UpdateFile {
        #[arg(short, long, default_value = MANIFEST_BASENAME)]
        manifest: PathBuf,

        /// Path relative to the manifest's directory
        path: String,
    },

    /// List the tags published at the base URL
    ListTags {
        /// Base URL of the tag tree
        #[arg(short, long)]
        base_url: Option<String>,
    },

    /// Show version and build info
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let _session = if cli.debug_log {
        let session = debug_log::init(cli.verbose);
        eprintln!("Debug log: {}", session.log_path.display());
        Some(session)
    } else {
        debug_log::init_console(cli.verbose);
        None
    };

    let config = MsyncConfig::load(Path::new("."))?;

    match cli.command {
        Commands::Version => {
            eprintln!("msync {}", env!("CARGO_PKG_VERSION"));
            eprintln!("Built with Rust {}", env!("CARGO_PKG_RUST_VERSION"));
        }
        Commands::Generate {
            directory,
            tag,
            base_manifest,
            checksum_bytes,
            name,
            output,
            rules,
        } => {
            let options = GenerateOptions {
                tag,
                rules: rules.rules(&config),
                checksum_bytes,
                name,
            };
            generate_command(&directory, base_manifest.as_deref(), &options, output.as_deref())?;
        }
        Commands::Download {
            dest_dir,
            tag,
            name,
            base_url,
            save_dir,
            local_dir,
            jobs,
            fail_fast,
            chunk_size,
            uncompress,
            files,
        } => {
            let mut client_config = ClientConfig::from(&config);
            if let Some(chunk_size) = chunk_size {
                client_config.chunk_size = chunk_size;
            }
            let client = HttpClient::new(client_config)?;
            let base_url = base_url.unwrap_or_else(|| config.base_url.clone());
            let source = select_source(client, &base_url, local_dir.as_deref(), save_dir.as_deref())?;

            let options = DownloadOptions {
                dest_dir,
                tag,
                name,
                files,
                save_dir,
                batch: BatchOptions {
                    concurrency: jobs.unwrap_or(config.concurrency),
                    fail_fast,
                    uncompress,
                },
            };
            download_command(&Downloader::new(source), &options).await?;
        }
        Commands::Diff {
            dest_dir,
            manifest,
            files,
        } => {
            let manifest_path = manifest.unwrap_or_else(|| dest_dir.join(MANIFEST_BASENAME));
            let manifest = Manifest::load(&Manifest::resolve_path(&manifest_path))?;
            for path in restrict(diff(&dest_dir, &manifest)?, &files).keys() {
                println!("{path}");
            }
        }
        Commands::Clean {
            directory,
            dry_run,
            rules,
        } => {
            for path in clean_dir(&directory, &rules.rules(&config), dry_run)? {
                println!("{path}");
            }
        }
        Commands::List {
            manifest,
            info,
            tag,
        } => {
            let manifest = Manifest::load(&Manifest::resolve_path(&manifest))?;
            for line in list_lines(&manifest, info, tag.as_deref()) {
                println!("{line}");
            }
        }
        Commands::GetValue { manifest, xpath } => {
            let manifest = Manifest::load(&manifest)?;
            println!("{}", manifest.get_value(&xpath)?);
        }
        Commands::GetFirstTag { manifest } => {
            let path = manifest;
            let manifest = Manifest::load(&path)?;
            let tag = manifest
                .first_tag()
                .ok_or_else(|| eyre!("{} lists no tags", path.display()))?;
            println!("{tag}");
        }
        Commands::AddTag { manifest, tag } => {
            let mut manifest = Manifest::load(&manifest)?;
            if !manifest.add_tag(tag.as_str()) {
                eprintln!("{tag} is already in the tags attribute");
            }
            println!("{}", manifest.to_json_pretty()?);
        }
        Commands::Reprint { manifest } => {
            println!("{}", Manifest::load(&manifest)?.to_json_pretty()?);
        }
        Commands::UpdateFile { manifest, path } => {
            let updated = update_file(&manifest, &path)?;
            println!("{}", updated.to_json_pretty()?);
        }
        Commands::ListTags { base_url } => {
            let client = HttpClient::new(ClientConfig::from(&config))?;
            let base_url = base_url.unwrap_or_else(|| config.base_url.clone());
            for tag in list_tags(&client, &base_url).await? {
                println!("{tag}");
            }
        }
    }

    Ok(())
}

fn generate_command(
    directory: &Path,
    base_manifest: Option<&Path>,
    options: &GenerateOptions,
    output: Option<&Path>,
) -> Result<()> {
    info!("Generating manifest for {}...", directory.display());

    let base = load_base(directory, base_manifest)?;
    let manifest = generate(directory, base, options)?;

    match output {
        Some(path) => {
            manifest.save(path)?;
            info!("Wrote {} entries to {}", manifest.len(), path.display());
        }
        None => println!("{}", manifest.to_json_pretty()?),
    }
    Ok(())
}

async fn download_command(downloader: &Downloader, options: &DownloadOptions) -> Result<()> {
    let progress = progress::DownloadProgress::new();

    let plan = prepare(downloader, options).await?;
    progress.checking(plan.manifest.len(), &plan.tag, &plan.name);

    let bar = progress.file_bar(plan.changes.len() as u64);
    let report = plan
        .run(downloader, options, &|path, _ok| {
            bar.set_prefix(path.to_string());
            bar.inc(1);
        })
        .await?;
    bar.finish_and_clear();

    let bytes = report
        .batch
        .results
        .iter()
        .filter_map(|(_, result)| match result {
            Ok(FetchOutcome::Downloaded { bytes }) => Some(*bytes),
            _ => None,
        })
        .sum();
    progress.finish(report.batch.written(), bytes, report.batch.failed());

    for (path, err) in report.batch.failures() {
        error!("{path}: {err}");
    }
    match report.batch.summary_error() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Lines printed by `list`
fn list_lines(manifest: &Manifest, info: bool, tag: Option<&str>) -> Vec<String> {
    manifest
        .files
        .iter()
        .filter(|(_, entry)| tag.is_none_or(|tag| entry.tag() == tag))
        .map(|(path, entry)| {
            if info {
                entry.describe(path)
            } else {
                path.clone()
            }
        })
        .collect()
}

/// Refresh one path of the manifest at `manifest_path`, tagging changes with its current tag
fn update_file(manifest_path: &Path, path: &str) -> Result<Manifest> {
    let mut manifest = Manifest::load(manifest_path)?;
    let tag = manifest
        .current_tag()
        .ok_or_else(|| eyre!("{} lists no tags", manifest_path.display()))?
        .to_string();
    let directory = manifest_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    match refresh_entry(&mut manifest, directory, path, &tag)? {
        Refresh::Unchanged => info!("{path} is unchanged"),
        refresh => info!("{path}: {refresh:?}"),
    }
    if let Some(FileEntry::Regular { size, .. }) = manifest.get(path) {
        info!(
            "{path} is {}",
            humansize::format_size(*size, humansize::BINARY)
        );
    }
    Ok(manifest)
}
