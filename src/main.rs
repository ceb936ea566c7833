use std::{
    error::Error,
    io::SeekFrom,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    process,
    time::Duration,
};

use clap::{command, Parser, ValueHint};
use exponential_backoff::Backoff;
use log::{debug, error, info, warn, LevelFilter};
use tokio::{
    fs::{self, File},
    io::{AsyncSeekExt, AsyncWriteExt},
    sync::watch,
};
use tokio_util::sync::CancellationToken;

use deezdl::{
    catalog::{AlbumId, Link},
    chunk::CHUNK_SIZE,
    config::{Config, Secrets},
    download::Downloader,
    error::{self as dz, ErrorKind, TransportFailure},
    fetch::FetchMode,
    locator::LocatorKind,
    pipeline::Progress,
    protocol::media::{AudioQuality, Format},
    track::{Track, TrackId},
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

const MIN_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Tracks to download
    ///
    /// Track IDs, or links to tracks or albums on deezer.com. With
    /// `--search`, queries to download the best match of.
    #[arg(required = true, value_name = "TRACK|URL")]
    inputs: Vec<String>,

    /// Secrets file
    ///
    /// Ensure that the this file is kept secure and not shared publicly, as it
    /// contains sensitive information that can grant access to your Deezer
    /// account.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("secrets.toml"))]
    secrets_file: String,

    /// Audio quality
    ///
    /// One of basic, standard, high or lossless. Lower qualities are tried
    /// when the requested one is unavailable.
    #[arg(long, default_value_t = AudioQuality::Standard)]
    quality: AudioQuality,

    /// Output directory
    #[arg(short, long, value_name = "DIR", value_hint = ValueHint::DirPath, default_value = ".")]
    output_dir: PathBuf,

    /// Parallel requests per track
    ///
    /// Set to 1 to stream each track over a single connection.
    #[arg(short, long, default_value_t = NonZeroUsize::new(4).unwrap_or(NonZeroUsize::MIN))]
    workers: NonZeroUsize,

    /// How stream URLs are obtained
    ///
    /// "legacy" requires `url_secret` in the secrets file.
    #[arg(long, default_value_t = LocatorKind::Media)]
    locator: LocatorKind,

    /// Treat inputs as search queries
    #[arg(long, default_value_t = false)]
    search: bool,

    /// Download the best matching album instead of the best matching track
    #[arg(long, default_value_t = false, requires = "search")]
    album: bool,

    /// Save tracks without metadata, cover art and lyrics
    #[arg(long, default_value_t = false)]
    no_tags: bool,

    /// Retries of an interrupted transfer
    ///
    /// Transfers resume from the last chunk received.
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module("deezdl", level);
    }

    logger.init();
}

/// Loads the secrets from a file.
fn load_secrets(secrets_file: &str) -> dz::Result<Secrets> {
    let secrets = Secrets::from_file(secrets_file);

    if let Err(ref e) = secrets {
        if e.kind == ErrorKind::NotFound {
            info!("read the documentation on how to set up your secrets in {secrets_file}");
        }
    }

    secrets
}

/// Replaces characters that are not allowed in file names.
fn file_name(artist: &str, title: &str, extension: &str) -> String {
    let name = format!("{artist} - {title}");
    let name: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    format!("{}.{extension}", name.trim().trim_start_matches('.'))
}

/// Finds the best match of a search query.
async fn search(downloader: &Downloader, query: &str, album: bool) -> dz::Result<Option<Link>> {
    let found = downloader.catalog().search_all(query, 1, 1).await?;

    if album {
        let Some(album) = found.albums.first() else {
            return Ok(None);
        };
        info!(
            "found album \"{} - {}\" for \"{query}\"",
            album.artist.name, album.title
        );
        return AlbumId::new(album.id).map(|id| Some(Link::Album(id)));
    }

    Ok(found.tracks.first().map(|track| {
        info!(
            "found \"{} - {}\" for \"{query}\"",
            track.artist.name, track.title
        );
        Link::Track(track.id)
    }))
}

/// Expands the command line inputs into track IDs.
async fn track_ids(downloader: &Downloader, args: &Args) -> dz::Result<Vec<TrackId>> {
    let mut track_ids = Vec::new();

    for input in &args.inputs {
        let link = if args.search {
            let Some(link) = search(downloader, input, args.album).await? else {
                warn!("nothing found for \"{input}\"");
                continue;
            };
            link
        } else {
            input.parse::<Link>()?
        };

        let found = downloader.track_ids(link).await?;
        if let Link::Album(_) = link {
            info!("{link} has {} tracks", found.len());
        }
        track_ids.extend(found);
    }

    Ok(track_ids)
}

/// Logs the progress of a download at every quarter.
async fn report_progress(track_id: TrackId, mut updates: watch::Receiver<Progress>) {
    let mut reported = 0;
    while updates.changed().await.is_ok() {
        let Some(percent) = updates.borrow_and_update().percent() else {
            continue;
        };
        if percent >= reported + 25 {
            reported = percent - percent % 25;
            debug!("track {track_id}: {percent}%");
        }
    }
}

/// Moves a completed download to `path`, tagged unless disabled.
///
/// A download that cannot be tagged is saved untagged.
async fn save(
    downloader: &Downloader,
    track: &Track,
    format: Format,
    partial: &Path,
    path: &Path,
    tag: bool,
) -> dz::Result<()> {
    if tag {
        let audio = fs::read(partial).await?;
        match downloader.tag(track, format, &audio).await {
            Ok(tagged) => {
                fs::write(path, tagged).await?;
                fs::remove_file(partial).await?;
                return Ok(());
            }
            Err(e) => warn!("saving track {track} without tags: {e}"),
        }
    }

    fs::rename(partial, path).await?;
    Ok(())
}

/// Downloads one track into the output directory, resuming interrupted
/// transfers from the last chunk received.
async fn download(
    downloader: &Downloader,
    track_id: TrackId,
    args: &Args,
    cancel: &CancellationToken,
) -> dz::Result<PathBuf> {
    let mut selection = downloader.select(track_id, args.quality).await?;

    let partial = args.output_dir.join(format!("{track_id}.part"));
    let mut file = File::create(&partial).await?;

    let backoff = Backoff::new(
        args.retries.saturating_add(1),
        MIN_RETRY_DELAY,
        MAX_RETRY_DELAY,
    );
    let mut from_index = 0;
    let mut completed = None;

    let (progress, updates) = watch::channel(Progress::default());
    let reporter = tokio::spawn(report_progress(track_id, updates));

    for delay in &backoff {
        let e = match downloader
            .fetch_to(&mut selection, from_index, &mut file, cancel, &progress)
            .await
        {
            Ok(download) => {
                completed = Some((download.format, download.bytes));
                break;
            }
            Err(e) => e,
        };

        let resume_index = e.transport().map(TransportFailure::resume_index);
        let (Some(resume_index), Some(delay)) = (resume_index, delay) else {
            drop(file);
            let _ = fs::remove_file(&partial).await;
            return Err(e);
        };

        warn!(
            "{e}; resuming from chunk {resume_index} in {:.1}s",
            delay.as_secs_f32()
        );

        // Drop anything past the last chunk received.
        let offset = resume_index * CHUNK_SIZE as u64;
        file.flush().await?;
        file.set_len(offset).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        from_index = resume_index;

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                drop(file);
                let _ = fs::remove_file(&partial).await;
                return Err(dz::Error::incomplete(from_index, offset));
            }
            () = tokio::time::sleep(delay) => {}
        }
    }

    // Ends the reporter.
    drop(progress);
    let _ = reporter.await;

    let Some((format, bytes)) = completed else {
        drop(file);
        let _ = fs::remove_file(&partial).await;
        return Err(dz::Error::unavailable(format!(
            "track {track_id} failed after {} retries",
            args.retries
        )));
    };

    file.flush().await?;
    drop(file);

    let track = selection.track();
    let path = args
        .output_dir
        .join(file_name(track.artist(), track.title(), format.extension()));
    save(downloader, track, format, &partial, &path, !args.no_tags).await?;

    info!("saved {} ({bytes} bytes) to {}", track, path.display());
    Ok(path)
}

/// Main application loop.
///
/// # Errors
///
/// This function returns an error when the secrets cannot be loaded, the
/// session credential is rejected, or any track failed to download.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let secrets = load_secrets(&args.secrets_file)?;

    let mut config = Config::new(secrets)?;
    config.locator = args.locator;
    config.fetch.mode = match args.workers.get() {
        1 => FetchMode::Sequential,
        _ => FetchMode::concurrent(args.workers),
    };

    fs::create_dir_all(&args.output_dir).await?;

    let downloader = Downloader::new(&config)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutting down gracefully");
                cancel.cancel();
            }
        });
    }

    let track_ids = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(()),
        track_ids = track_ids(&downloader, &args) => track_ids?,
    };

    let mut failed = 0;
    for track_id in track_ids {
        match download(&downloader, track_id, &args, &cancel).await {
            Ok(_) => {}
            Err(e) if e.kind == ErrorKind::Cancelled => {
                warn!("{e}");
                break;
            }
            Err(e) if e.is_authentication_rejected() => return Err(e.into()),
            Err(e) => {
                error!("track {track_id}: {e}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(format!("{failed} tracks failed to download").into());
    }

    Ok(())
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and starts the downloads.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();
    let lang = String::from("en");

    info!("starting {name}/{version}; {BUILD_PROFILE}; {lang}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
