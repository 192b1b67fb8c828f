use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::*;
use structopt::*;

use zipgrab::fetch::{github_archive_url, Fetcher};
use zipgrab::ZipArchive;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "grab",
    about = "Downloads a .zip of a GitHub branch (or any URL), unpacks it, and prints one file from it"
)]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// Download this archive instead of a GitHub branch
    #[structopt(long)]
    url: Option<String>,

    #[structopt(long, default_value = "joaobcandido")]
    owner: String,

    #[structopt(long, default_value = "posto-de-gasolina")]
    repo: String,

    #[structopt(long, default_value = "main")]
    branch: String,

    /// The file to print, relative to the archive's root directory
    #[structopt(short, long, default_value = "README.md")]
    file: PathBuf,

    /// Directory inside the archive that --file is relative to.
    /// Defaults to <repo>-<branch> for GitHub archives and to the top level for --url.
    #[structopt(long)]
    root: Option<PathBuf>,

    /// Unpack here and keep the result, instead of in a temporary directory
    #[structopt(short, long)]
    output: Option<PathBuf>,

    /// Lists the archive's entries instead of unpacking them.
    #[structopt(short = "n", long)]
    list: bool,

    /// HTTP timeout, in seconds
    #[structopt(long, default_value = "60")]
    timeout: u64,
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    let url = match &args.url {
        Some(url) => url.clone(),
        None => github_archive_url(&args.owner, &args.repo, &args.branch),
    };

    // Removed when dropped, including on the error paths below.
    let tempdir = tempfile::Builder::new()
        .prefix("repo-zip-")
        .tempdir()
        .context("Couldn't create a temporary directory")?;
    let zip_path = tempdir.path().join("repo.zip");

    let fetcher = Fetcher::with_timeout(Duration::from_secs(args.timeout))?;
    fetcher
        .download(&url, &zip_path)
        .with_context(|| format!("Couldn't download {}", url))?;

    if args.list {
        return list(&zip_path);
    }

    let unzip_dir = args
        .output
        .clone()
        .unwrap_or_else(|| tempdir.path().join("unzipped"));
    let summary = zipgrab::extract(&zip_path, &unzip_dir)?;
    info!(
        "Unpacked {} files and {} directories into {}",
        summary.files,
        summary.directories,
        unzip_dir.display()
    );

    let root = match (&args.root, &args.url) {
        (Some(root), _) => unzip_dir.join(root),
        (None, None) => unzip_dir.join(format!("{}-{}", args.repo, args.branch)),
        (None, Some(_)) => unzip_dir,
    };
    print_file(&root.join(&args.file))
}

fn list(zip_path: &Path) -> Result<()> {
    let bytes = fs::read(zip_path).context("Couldn't read downloaded archive")?;
    let (archive, _) = ZipArchive::with_prepended_data(&bytes).context("Couldn't load archive")?;
    for entry in archive.entries() {
        let modified = entry
            .last_modified
            .map(|t| t.to_string())
            .unwrap_or_else(|| String::from("-"));
        println!("{:>10}  {:19}  {}", entry.size, modified, entry.path);
    }
    Ok(())
}

/// Prints the file, or says it isn't there.
/// A missing file isn't an error; the archive just didn't have one.
fn print_file(path: &Path) -> Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match fs::read(path) {
        Ok(data) => {
            println!("Contents of {}:", name);
            println!("{}", String::from_utf8_lossy(&data));
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            println!("{} not found: {}", name, e);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Couldn't read {}", path.display()));
        }
    }
    Ok(())
}
