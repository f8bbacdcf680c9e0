mod output;
mod repl;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use restyle_contracts::events::EventWriter;
use restyle_contracts::results::{ItemResult, Scheme};
use restyle_contracts::summary::write_summary;
use restyle_contracts::themes::ThemeCatalog;
use restyle_engine::{BatchReport, GenerationConfig, Session, StoreSnapshot};
use serde_json::json;

use crate::output::{load_image, save_results, write_json_value};

#[derive(Debug, Parser)]
#[command(name = "restyle", version, about = "Portrait restyling generation engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List themes with their categories, and camera angles.
    Themes,
    /// Restyle one photo across a theme's categories.
    Batch(BatchArgs),
    /// Generate variations of one free-text prompt.
    Custom(CustomArgs),
    /// Expand a scene idea into proposals without rendering them.
    Ideas(IdeasArgs),
    /// Expand a scene idea and render the selected proposals.
    Scenes(ScenesArgs),
    /// Apply a free-text instruction to an existing image.
    Edit(EditArgs),
    /// Interactive session.
    Session(SessionArgs),
}

#[derive(Debug, Args)]
struct SessionArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    image_model: Option<String>,
    #[arg(long)]
    text_model: Option<String>,
    #[arg(long)]
    pacing_ms: Option<u64>,
}

#[derive(Debug, Parser)]
struct BatchArgs {
    #[command(flatten)]
    session: SessionArgs,
    #[arg(long = "image", required = true)]
    images: Vec<PathBuf>,
    #[arg(long)]
    theme: Option<String>,
    #[arg(long)]
    angle: Option<String>,
    /// Categories to render; defaults to every category of the theme.
    #[arg(long = "category")]
    categories: Vec<String>,
    /// Pick a random theme other than the default.
    #[arg(long, conflicts_with = "theme")]
    shuffle: bool,
}

#[derive(Debug, Parser)]
struct CustomArgs {
    #[command(flatten)]
    session: SessionArgs,
    #[arg(long = "image", required = true)]
    images: Vec<PathBuf>,
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value_t = 1)]
    count: usize,
}

#[derive(Debug, Parser)]
struct IdeasArgs {
    #[command(flatten)]
    session: SessionArgs,
    #[arg(long = "image", required = true)]
    images: Vec<PathBuf>,
    #[arg(long)]
    idea: String,
}

#[derive(Debug, Parser)]
struct ScenesArgs {
    #[command(flatten)]
    session: SessionArgs,
    #[arg(long = "image", required = true)]
    images: Vec<PathBuf>,
    #[arg(long)]
    idea: String,
    /// 1-based proposal numbers to render; defaults to all of them.
    #[arg(long = "select")]
    select: Vec<usize>,
}

#[derive(Debug, Parser)]
struct EditArgs {
    #[command(flatten)]
    session: SessionArgs,
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = "edit")]
    caption: String,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("restyle error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Themes => {
            print_catalog(&ThemeCatalog::bundled()?);
            Ok(0)
        }
        Command::Batch(args) => run_batch(args),
        Command::Custom(args) => run_custom(args),
        Command::Ideas(args) => run_ideas(args),
        Command::Scenes(args) => run_scenes(args),
        Command::Edit(args) => run_edit(args),
        Command::Session(args) => {
            let session = open_session(&args)?;
            println!("Restyle session started. Type /help for commands.");
            let saved = repl::run(&session, &args.out)?;
            finish_session(&session, &args.out, saved)?;
            Ok(0)
        }
    }
}

fn run_batch(args: BatchArgs) -> Result<i32> {
    let session = open_session(&args.session)?;
    upload_all(&session, &args.images)?;
    if args.shuffle {
        let theme = session.shuffle_theme()?;
        println!("Shuffled to theme {theme}");
    } else if let Some(theme) = &args.theme {
        session.set_theme(theme)?;
    }
    if let Some(angle) = &args.angle {
        session.set_camera_angle(angle)?;
    }
    let categories = if args.categories.is_empty() {
        session.theme_categories()?
    } else {
        args.categories.clone()
    };

    let report = session.generate_batch(&categories)?;
    print_snapshot(&session.snapshot(), Some(Scheme::Batch));
    println!("{}", describe_report(&report));
    finish_session(&session, &args.session.out, Vec::new())?;
    Ok(exit_code(&report))
}

fn run_custom(args: CustomArgs) -> Result<i32> {
    let session = open_session(&args.session)?;
    session.check_custom_count(args.count)?;
    upload_all(&session, &args.images)?;
    let report = session.generate_custom_images(&args.prompt, args.count)?;
    print_snapshot(&session.snapshot(), Some(Scheme::Custom));
    println!("{}", describe_report(&report));
    finish_session(&session, &args.session.out, Vec::new())?;
    Ok(exit_code(&report))
}

fn run_ideas(args: IdeasArgs) -> Result<i32> {
    let session = open_session(&args.session)?;
    upload_all(&session, &args.images)?;
    let scenes = session.request_scene_ideas(&args.idea)?;
    for (index, scene) in scenes.iter().enumerate() {
        println!("{:>2}. {}: {}", index + 1, scene.title, scene.prompt);
    }
    let scenes_path = args.session.out.join("scenes.json");
    write_json_value(&scenes_path, &serde_json::to_value(&scenes)?)?;
    finish_session(
        &session,
        &args.session.out,
        vec![scenes_path.to_string_lossy().to_string()],
    )?;
    Ok(0)
}

fn run_scenes(args: ScenesArgs) -> Result<i32> {
    let session = open_session(&args.session)?;
    upload_all(&session, &args.images)?;
    let scenes = session.request_scene_ideas(&args.idea)?;
    let picks: Vec<usize> = if args.select.is_empty() {
        (1..=scenes.len()).collect()
    } else {
        args.select.clone()
    };
    for number in picks {
        if number == 0 {
            bail!("scene numbers start at 1");
        }
        let (title, selected) = session.toggle_scene_at(number - 1)?;
        if selected {
            println!("Selected {title}");
        }
    }

    let report = session.generate_scene_images();
    print_snapshot(&session.snapshot(), Some(Scheme::Scene));
    println!("{}", describe_report(&report));
    finish_session(&session, &args.session.out, Vec::new())?;
    Ok(exit_code(&report))
}

fn run_edit(args: EditArgs) -> Result<i32> {
    let session = open_session(&args.session)?;
    let image = load_image(&args.image)?;
    let outcome = session.edit_image(&image.to_string(), &args.caption, &args.prompt);
    let failed = matches!(outcome.result, ItemResult::Error { .. });
    if let Some(message) = outcome.result.error_message() {
        println!("Edit failed: {message}");
    } else {
        println!("Edit done");
    }
    finish_session(&session, &args.session.out, Vec::new())?;
    Ok(if failed { 2 } else { 0 })
}

fn open_session(args: &SessionArgs) -> Result<Session> {
    fs::create_dir_all(&args.out)?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));

    let mut config = GenerationConfig::from_env();
    if let Some(model) = &args.image_model {
        config.image_model = model.clone();
    }
    if let Some(model) = &args.text_model {
        config.text_model = model.clone();
    }
    if let Some(pacing_ms) = args.pacing_ms {
        config.pacing_ms = pacing_ms;
    }

    let session_id = format!("restyle-{}", compact_timestamp());
    Session::builder(config)
        .session_id(session_id.clone())
        .events(EventWriter::new(events_path, session_id))
        .build()
}

fn upload_all(session: &Session, paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        session.add_image(load_image(path)?)?;
    }
    Ok(())
}

/// Saves finished images, writes `summary.json` and logs `session_finished`.
fn finish_session(session: &Session, out: &Path, mut saved: Vec<String>) -> Result<()> {
    saved.extend(save_results(&session.snapshot(), out)?);
    saved.sort();
    saved.dedup();
    let saved_count = saved.len();
    let summary = session.summary(saved);
    write_summary(&out.join("summary.json"), &summary, None)?;
    session.emit("session_finished", json!({ "summary": summary }));
    println!("Saved {saved_count} file(s) to {}", out.display());
    Ok(())
}

fn exit_code(report: &BatchReport) -> i32 {
    if report.error > 0 {
        2
    } else {
        0
    }
}

pub(crate) fn scheme_label(scheme: Scheme) -> &'static str {
    match scheme {
        Scheme::Batch => "batch",
        Scheme::Scene => "scene",
        Scheme::Custom => "custom",
    }
}

pub(crate) fn describe_report(report: &BatchReport) -> String {
    if report.total() == 0 {
        return format!("{} run skipped: nothing to generate", scheme_label(report.scheme));
    }
    let mut line = format!(
        "{} finished: {} done, {} failed",
        scheme_label(report.scheme),
        report.done,
        report.error
    );
    if report.skipped > 0 {
        line.push_str(&format!(", {} skipped", report.skipped));
    }
    line
}

pub(crate) fn print_catalog(catalog: &ThemeCatalog) {
    println!("Themes:");
    for theme in catalog.themes() {
        println!("  {} ({}): {}", theme.key, theme.title, theme.categories.join(", "));
    }
    println!("Camera angles:");
    for angle in catalog.camera_angles() {
        println!("  {}: {}", angle.key, angle.description);
    }
}

fn slot_line(caption: &str, result: &ItemResult) -> String {
    match result {
        ItemResult::Pending => format!("  {caption}: pending"),
        ItemResult::Done { image_url } => {
            format!("  {caption}: done ({})", image_url.mime_type())
        }
        ItemResult::Error { error } => format!("  {caption}: error: {error}"),
    }
}

/// Prints slot states, limited to one scheme when `only` is set.
pub(crate) fn print_snapshot(snapshot: &StoreSnapshot, only: Option<Scheme>) {
    let wants = |scheme: Scheme| only.map_or(true, |only| only == scheme);
    if wants(Scheme::Batch) && !snapshot.batch.is_empty() {
        println!("Batch:");
        for (category, result) in &snapshot.batch {
            println!("{}", slot_line(category, result));
        }
    }
    if wants(Scheme::Scene) && !snapshot.scenes.is_empty() {
        println!("Scenes:");
        for (title, result) in &snapshot.scenes {
            println!("{}", slot_line(title, result));
        }
    }
    if wants(Scheme::Custom) && !snapshot.custom.is_empty() {
        match &snapshot.custom_prompt {
            Some(prompt) => println!("Custom ({prompt}):"),
            None => println!("Custom:"),
        }
        for (index, result) in snapshot.custom.iter().enumerate() {
            println!("{}", slot_line(&format!("custom-{index}"), result));
        }
    }
    if only.is_none() {
        if let Some(edit) = &snapshot.edit {
            println!("Edit:");
            println!("{}", slot_line(&edit.identity, &edit.result));
        }
    }
}

fn compact_timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
