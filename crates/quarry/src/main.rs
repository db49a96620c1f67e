use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use quarry_core::manifest::FILENAME_ROOT;
use quarry_core::{
    DiskStore, FsMirror, HttpMirror, Mirror, MirrorLocation, RepoConfig, Repository,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "quarry", about = "Component package manager client")]
struct Cli {
    /// Mirror location: a directory or an http(s) base URL
    #[arg(long, env = "QUARRY_MIRROR")]
    mirror: String,

    /// Directory holding the trusted manifests
    #[arg(long, env = "QUARRY_STORE", default_value = ".quarry/manifests")]
    store_dir: PathBuf,

    /// Platform to resolve component versions for (defaults to this host)
    #[arg(long)]
    platform: Option<String>,

    /// Allow resolving components the index marks yanked
    #[arg(long)]
    allow_yanked: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Seed the trust anchor from a shipped root manifest
    Init {
        /// Path to the trusted root.json
        root: PathBuf,
    },
    /// Bring role manifests up to date with the mirror
    Sync,
    /// List components registered in the trusted index
    List,
    /// Print a component manifest
    Show {
        /// Component id
        id: String,
    },
    /// Download and verify a component artifact
    Fetch {
        /// Component id, optionally `id:version`
        spec: String,

        /// Directory the artifact is written into
        #[arg(long, default_value = ".")]
        dest: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let store = DiskStore::new(&cli.store_dir)
        .with_context(|| format!("opening store at {}", cli.store_dir.display()))?;

    if let Command::Init { root } = &cli.command {
        return init(&store, root);
    }

    let mirror = open_mirror(&cli.mirror)?;
    let mut config = RepoConfig {
        allow_yanked: cli.allow_yanked,
        ..RepoConfig::default()
    };
    if let Some(platform) = &cli.platform {
        config.platform = platform.clone();
    }
    let repo = Repository::new(mirror, store, config);

    match cli.command {
        Command::Init { .. } => unreachable!("handled above"),
        Command::Sync => sync(&repo),
        Command::List => list(&repo),
        Command::Show { id } => show(&repo, &id),
        Command::Fetch { spec, dest } => fetch(&repo, &spec, &dest),
    }
}

type Repo = Repository<Box<dyn Mirror>, DiskStore>;

fn open_mirror(value: &str) -> Result<Box<dyn Mirror>> {
    Ok(match MirrorLocation::from_value(value)? {
        MirrorLocation::File(path) => Box::new(FsMirror::new(path)),
        MirrorLocation::Remote(url) => Box::new(HttpMirror::new(url)?),
    })
}

fn init(store: &DiskStore, root: &PathBuf) -> Result<()> {
    use quarry_core::ManifestStore;

    let bytes = fs::read(root).with_context(|| format!("reading {}", root.display()))?;
    if store.load(FILENAME_ROOT)?.is_some() {
        bail!("store already holds a trust anchor; refusing to replace it");
    }
    store.save(FILENAME_ROOT, &bytes)?;
    println!("trust anchor installed in {}", store.root().display());
    Ok(())
}

fn sync(repo: &Repo) -> Result<()> {
    let changed = repo.ensure_manifests().context("sync failed")?;
    if changed {
        println!("manifests updated");
    } else {
        println!("already up to date");
    }
    Ok(())
}

fn list(repo: &Repo) -> Result<()> {
    let Some(index) = repo.trusted_index()? else {
        bail!("no trusted index; run `quarry sync` first");
    };
    for (id, item) in &index.components {
        let mut flags = Vec::new();
        if index.default_components.iter().any(|d| d == id) {
            flags.push("default");
        }
        if item.yanked {
            flags.push("yanked");
        }
        let suffix = if flags.is_empty() {
            String::new()
        } else {
            format!(" ({})", flags.join(", "))
        };
        println!("{id}\towner: {}{suffix}", item.owner);
    }
    Ok(())
}

fn show(repo: &Repo, id: &str) -> Result<()> {
    let component = repo.update_component_manifest(id)?;
    println!("{}", serde_json::to_string_pretty(&component)?);
    Ok(())
}

fn fetch(repo: &Repo, spec: &str, dest: &PathBuf) -> Result<()> {
    let (id, requested) = match spec.split_once(':') {
        Some((id, version)) => (id, version),
        None => (spec, ""),
    };
    let (version, item) = repo.select_component(id, requested)?;

    let filename = item
        .url
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .with_context(|| format!("artifact URL `{}` has no file name", item.url))?;
    fs::create_dir_all(dest).with_context(|| format!("creating {}", dest.display()))?;
    let target = dest.join(filename);

    let stream = repo.download_component(&item)?;
    let mut file =
        fs::File::create(&target).with_context(|| format!("creating {}", target.display()))?;
    let written = match stream.copy_to(&mut file) {
        Ok(n) => n,
        Err(err) => {
            // Partial content is poisoned.
            drop(file);
            let _ = fs::remove_file(&target);
            return Err(err).with_context(|| format!("downloading {id} {version}"));
        }
    };
    println!("fetched {id} {version} -> {} ({written} bytes)", target.display());
    Ok(())
}
