use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;

use anyhow::{bail, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wallpaper_contracts::activity::{Activity, ActivityLog};
use wallpaper_contracts::gallery::{GalleryEvent, GalleryStore, MemorySlot};
use wallpaper_contracts::Artifact;
use wallpaper_engine::export::{export_artifact, read_image_file, write_image_file};
use wallpaper_engine::suggest::suggest_prompt;
use wallpaper_engine::{
    Acceptance, GenerationClient, GenerationError, SaveOutcome, StudioConfig, StudioSession,
    TransientImage,
};

const NO_IMAGE_EXIT_CODE: i32 = 2;
const LIST_PROMPT_MAX_CHARS: usize = 60;

#[derive(Debug, Parser)]
#[command(name = "wallpaper", version, about = "Generate, refine and keep AI phone wallpapers")]
struct Cli {
    /// Where the gallery and activity log live.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Keep the gallery in memory for this invocation only.
    #[arg(long, global = true)]
    ephemeral: bool,
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a new portrait wallpaper from a prompt.
    Generate(GenerateArgs),
    /// Change an image according to an instruction.
    Edit(EditArgs),
    /// Ask the model for a sharper, higher resolution rendition.
    Upscale(UpscaleArgs),
    /// List saved wallpapers, newest first.
    List,
    Show(IdArgs),
    /// Write a saved wallpaper to an image file.
    Export(ExportArgs),
    Remove(IdArgs),
    /// Delete every saved wallpaper.
    Clear,
    /// Print a random prompt idea.
    Suggest,
}

impl Command {
    fn uses_image_service(&self) -> bool {
        matches!(self, Self::Generate(_) | Self::Edit(_) | Self::Upscale(_))
    }
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    negative_prompt: Option<String>,
    #[command(flatten)]
    keep: KeepArgs,
}

#[derive(Debug, Args)]
struct EditArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[arg(long)]
    instruction: String,
    #[command(flatten)]
    keep: KeepArgs,
}

#[derive(Debug, Args)]
struct UpscaleArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[command(flatten)]
    keep: KeepArgs,
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    /// A saved wallpaper (full id or the short id from `list`).
    #[arg(long)]
    id: Option<String>,
    /// An image file on disk.
    #[arg(long)]
    image: Option<PathBuf>,
}

/// A result is kept only when asked for.
#[derive(Debug, Args)]
#[group(required = true, multiple = true)]
struct KeepArgs {
    /// Add the result to the gallery.
    #[arg(long)]
    save: bool,
    /// Also write the result to this file.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct IdArgs {
    id: String,
}

#[derive(Debug, Args)]
struct ExportArgs {
    id: String,
    #[arg(long)]
    out: PathBuf,
}

struct Studio {
    gallery: GalleryStore,
    gallery_events: Receiver<GalleryEvent>,
    session: StudioSession,
    activity: Option<ActivityLog>,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("wallpaper error: {err:#}");
            if let Some(hint) = err.downcast_ref::<GenerationError>().and_then(retry_hint) {
                eprintln!("{hint}");
            }
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose {
        "wallpaper=debug"
    } else {
        "wallpaper=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<i32> {
    if let Command::Suggest = cli.command {
        println!("{}", suggest_prompt());
        return Ok(0);
    }

    let mut config = StudioConfig::from_env();
    if let Some(data_dir) = cli.data_dir.as_ref() {
        config = config.with_data_dir(data_dir);
    }
    tracing::debug!(?config, "loaded configuration");
    let mut studio = open_studio(&config, cli.ephemeral, cli.command.uses_image_service());

    let code = match cli.command {
        Command::Generate(args) => run_generate(&mut studio, args)?,
        Command::Edit(args) => run_edit(&mut studio, args)?,
        Command::Upscale(args) => run_upscale(&mut studio, args)?,
        Command::List => run_list(&studio),
        Command::Show(args) => run_show(&studio, &args.id)?,
        Command::Export(args) => run_export(&studio, args)?,
        Command::Remove(args) => run_remove(&mut studio, &args.id)?,
        Command::Clear => run_clear(&mut studio),
        Command::Suggest => 0,
    };
    report_gallery_events(&studio.gallery_events);
    Ok(code)
}

/// Gallery commands get an unconnected client, so a missing key only matters when an
/// image call is actually made.
fn open_studio(config: &StudioConfig, ephemeral: bool, remote: bool) -> Studio {
    let (mut gallery, activity) = if ephemeral {
        (GalleryStore::open(MemorySlot::new()), None)
    } else {
        (
            GalleryStore::open(config.gallery_slot()),
            Some(ActivityLog::new(config.activity_path())),
        )
    };
    gallery = gallery.with_capacity_limit(config.gallery_cap);
    let gallery_events = gallery.subscribe();

    let client = if remote {
        GenerationClient::from_config(config)
    } else {
        GenerationClient::uninitialized()
    };
    let mut session = StudioSession::new(client);
    if let Some(activity) = activity.clone() {
        session = session.with_activity_log(activity);
    }
    Studio {
        gallery,
        gallery_events,
        session,
        activity,
    }
}

fn run_generate(studio: &mut Studio, args: GenerateArgs) -> Result<i32> {
    let acceptance = studio
        .session
        .generate(&args.prompt, args.negative_prompt.as_deref())?;
    finish(studio, acceptance, &args.keep)
}

fn run_edit(studio: &mut Studio, args: EditArgs) -> Result<i32> {
    let source = load_source(studio, &args.source, &args.instruction)?;
    studio.session.open(source);
    let acceptance = studio.session.edit_current(&args.instruction)?;
    finish(studio, acceptance, &args.keep)
}

fn run_upscale(studio: &mut Studio, args: UpscaleArgs) -> Result<i32> {
    let fallback_prompt = match args.source.image.as_deref() {
        Some(path) => format!("upscale of {}", file_label(path)),
        None => String::new(),
    };
    let source = load_source(studio, &args.source, &fallback_prompt)?;
    studio.session.open(source);
    let acceptance = studio.session.upscale_current()?;
    finish(studio, acceptance, &args.keep)
}

/// Gallery sources keep their own prompt; files are labelled with `file_prompt`.
fn load_source(studio: &Studio, source: &SourceArgs, file_prompt: &str) -> Result<TransientImage> {
    if let Some(id) = source.id.as_deref() {
        let artifact = studio.gallery.find(id)?;
        return Ok(TransientImage::from_artifact(artifact));
    }
    let Some(path) = source.image.as_deref() else {
        bail!("pass --id or --image");
    };
    let image_data = read_image_file(path)?;
    Ok(TransientImage::new(image_data, file_prompt.to_string(), None))
}

fn finish(studio: &mut Studio, acceptance: Acceptance, keep: &KeepArgs) -> Result<i32> {
    match acceptance {
        Acceptance::Installed => {}
        Acceptance::NoImage => {
            eprintln!("The model did not return an image. Try rephrasing your request.");
            return Ok(NO_IMAGE_EXIT_CODE);
        }
        Acceptance::Discarded => bail!("result arrived after the request was abandoned"),
    }
    let Some(current) = studio.session.current().cloned() else {
        bail!("no image is loaded");
    };

    if let Some(out) = keep.out.as_deref() {
        write_image_file(&current.image_data, out)?;
        println!("wrote {}", out.display());
    }
    if keep.save {
        match studio.session.save_current(&mut studio.gallery)? {
            SaveOutcome::Saved(artifact) => println!("saved {}", artifact.short_id()),
            SaveOutcome::AlreadySaved(id) => println!("already saved as {id}"),
            SaveOutcome::NothingToSave => println!("nothing to save"),
        }
    }
    Ok(0)
}

fn run_list(studio: &Studio) -> i32 {
    let artifacts = studio.gallery.list_artifacts();
    if artifacts.is_empty() {
        println!("No saved wallpapers yet.");
        return 0;
    }
    for artifact in artifacts {
        println!("{}", list_line(artifact));
    }
    0
}

fn run_show(studio: &Studio, id: &str) -> Result<i32> {
    let artifact = studio.gallery.find(id)?;
    println!("id:       {}", artifact.id);
    println!("created:  {}", artifact.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("prompt:   {}", artifact.prompt);
    if let Some(negative) = artifact.negative_prompt.as_deref() {
        println!("negative: {negative}");
    }
    println!("size:     {}", image_size_label(&artifact.image_data));
    Ok(0)
}

fn run_export(studio: &Studio, args: ExportArgs) -> Result<i32> {
    let artifact = studio.gallery.find(&args.id)?;
    let path = export_artifact(artifact, &args.out)?;
    println!("wrote {}", path.display());
    Ok(0)
}

fn run_remove(studio: &mut Studio, id: &str) -> Result<i32> {
    let id = studio.gallery.find(id)?.id.clone();
    if studio.gallery.remove_artifact(&id).is_some() {
        note(studio, Activity::ArtifactRemoved {
            artifact_id: id.clone(),
        });
        println!("removed {id}");
    }
    Ok(0)
}

fn run_clear(studio: &mut Studio) -> i32 {
    let count = studio.gallery.len();
    studio.gallery.clear();
    note(studio, Activity::GalleryCleared { count });
    println!("cleared {count} wallpaper(s)");
    0
}

fn note(studio: &Studio, activity: Activity) {
    if let Some(log) = studio.activity.as_ref() {
        log.note(activity);
    }
}

fn report_gallery_events(events: &Receiver<GalleryEvent>) {
    for event in events.try_iter() {
        match event {
            GalleryEvent::PersistenceDegraded { reason } => {
                eprintln!("warning: gallery changes were not written to disk ({reason})");
            }
            GalleryEvent::Evicted(ids) => {
                tracing::info!(count = ids.len(), "oldest wallpapers dropped to stay under the cap");
            }
            GalleryEvent::Added(artifact) => {
                tracing::debug!(id = %artifact.id, "gallery gained an artifact");
            }
            other => tracing::debug!(?other, "gallery event"),
        }
    }
}

fn retry_hint(err: &GenerationError) -> Option<&'static str> {
    err.is_retryable()
        .then_some("The service is busy right now; retry in a little while.")
}

fn list_line(artifact: &Artifact) -> String {
    let mut prompt: String = artifact.prompt.chars().take(LIST_PROMPT_MAX_CHARS).collect();
    if artifact.prompt.chars().count() > LIST_PROMPT_MAX_CHARS {
        prompt.push_str("...");
    }
    format!(
        "{}  {}  {}",
        artifact.short_id(),
        artifact.created_at.format("%Y-%m-%d %H:%M"),
        prompt
    )
}

fn image_size_label(image_data: &str) -> String {
    match BASE64.decode(image_data.trim().as_bytes()) {
        Ok(bytes) => format!("{} KiB", bytes.len().div_ceil(1024)),
        Err(_) => "unreadable".to_string(),
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
