use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use anyhow::{bail, Context, Result};
use restyle_contracts::chat::{parse_intent, Intent, SESSION_HELP_COMMANDS};
use restyle_contracts::results::{PromptVariant, Scheme, SlotKey};
use restyle_engine::{BatchReport, Session};
use serde_json::Value;

use crate::output::{load_image, save_results, write_album};
use crate::{describe_report, print_catalog, print_snapshot};

const REGEN_USAGE: &str = "usage: /regen <batch|scene|custom> <key> [original|fallback]";

enum Flow {
    Continue,
    Quit,
}

/// Generation runs started from the prompt. Each one drives its own clone
/// of the session so the prompt stays responsive.
#[derive(Default)]
struct Workers {
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    fn spawn<F>(&mut self, label: &str, session: &Session, job: F)
    where
        F: FnOnce(&Session) -> Result<BatchReport> + Send + 'static,
    {
        let worker = session.clone();
        let label = label.to_string();
        self.handles.push(thread::spawn(move || match job(&worker) {
            Ok(report) => println!("\n{}", describe_report(&report)),
            Err(err) => println!("\n{label} failed: {err:#}"),
        }));
    }

    fn busy(&mut self) -> usize {
        self.handles.retain(|handle| !handle.is_finished());
        self.handles.len()
    }

    fn join_all(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

struct Repl<'a> {
    session: &'a Session,
    out_dir: &'a Path,
    workers: Workers,
    saved: Vec<String>,
}

/// Reads slash commands until `/quit` or end of input, then waits for
/// running generations. Returns the files written by `/save` and `/album`.
pub(crate) fn run(session: &Session, out_dir: &Path) -> Result<Vec<String>> {
    let mut repl = Repl {
        session,
        out_dir,
        workers: Workers::default(),
        saved: Vec::new(),
    };
    let stdin = io::stdin();
    let mut line = String::new();

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        if intent.action == "noop" {
            continue;
        }
        match repl.handle(&intent) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(err) => println!("Error: {err:#}"),
        }
    }

    let running = repl.workers.busy();
    if running > 0 {
        println!("Waiting for {running} running generation(s)...");
    }
    repl.workers.join_all();
    Ok(repl.saved)
}

impl Repl<'_> {
    fn handle(&mut self, intent: &Intent) -> Result<Flow> {
        let args = &intent.command_args;
        match intent.action.as_str() {
            "help" => println!("Commands: {}", SESSION_HELP_COMMANDS.join(" ")),
            "quit" => return Ok(Flow::Quit),
            "upload" => {
                let paths = value_as_string_list(args.get("words"));
                if paths.is_empty() {
                    bail!("/upload requires at least one path");
                }
                for path in paths {
                    let count = self.session.add_image(load_image(&PathBuf::from(&path))?)?;
                    println!(
                        "Added {path} ({count}/{})",
                        self.session.config().max_images
                    );
                }
            }
            "remove_image" => {
                let position = value_as_string_list(args.get("words"))
                    .first()
                    .and_then(|raw| raw.parse::<usize>().ok())
                    .filter(|position| *position > 0)
                    .context("/remove requires an image number starting at 1")?;
                self.session.remove_image(position - 1)?;
                println!("Removed image {position}");
            }
            "list_themes" => {
                print_catalog(self.session.catalog());
                println!(
                    "Current: {} / {}",
                    self.session.theme(),
                    self.session.camera_angle()
                );
            }
            "set_theme" => {
                let key = value_as_non_empty_string(args.get("value"))
                    .context("/theme requires a theme key")?;
                self.session.set_theme(&key)?;
                println!("Theme set to {key}");
            }
            "set_camera_angle" => {
                let key = value_as_non_empty_string(args.get("value"))
                    .context("/angle requires a camera angle")?;
                self.session.set_camera_angle(&key)?;
                println!("Camera angle set to {key}");
            }
            "batch" => {
                self.require_images()?;
                let mut categories = value_as_string_list(args.get("words"));
                if categories.is_empty() {
                    categories = self.session.theme_categories()?;
                }
                println!(
                    "Generating {} image(s) for theme {}",
                    categories.len(),
                    self.session.theme()
                );
                self.workers.spawn("batch", self.session, move |session| {
                    session.generate_batch(&categories)
                });
            }
            "shuffle" => {
                self.require_images()?;
                let theme = self.session.shuffle_theme()?;
                let categories = self.session.theme_categories()?;
                println!("Shuffled to theme {theme}");
                self.workers.spawn("batch", self.session, move |session| {
                    session.generate_batch(&categories)
                });
            }
            "custom" => {
                self.require_images()?;
                let prompt = intent
                    .prompt
                    .clone()
                    .context("/custom requires a prompt")?;
                let count = args
                    .get("count")
                    .and_then(Value::as_u64)
                    .map(|count| usize::try_from(count).unwrap_or(usize::MAX))
                    .unwrap_or(1);
                self.session.check_custom_count(count)?;
                println!("Generating {count} custom image(s)");
                self.workers.spawn("custom", self.session, move |session| {
                    session.generate_custom_images(&prompt, count)
                });
            }
            "scene_ideas" => {
                let idea = value_as_non_empty_string(args.get("value"))
                    .context("/ideas requires a scene idea")?;
                let scenes = self.session.request_scene_ideas(&idea)?;
                for (index, scene) in scenes.iter().enumerate() {
                    println!("{:>2}. {}: {}", index + 1, scene.title, scene.prompt);
                }
                println!("Pick scenes with /select, then run /scenes");
            }
            "toggle_scenes" => {
                let numbers = value_as_string_list(args.get("words"));
                if numbers.is_empty() {
                    bail!("/select requires scene numbers");
                }
                for raw in numbers {
                    let number = raw
                        .parse::<usize>()
                        .ok()
                        .filter(|number| *number > 0)
                        .with_context(|| format!("'{raw}' is not a scene number"))?;
                    let (title, selected) = self.session.toggle_scene_at(number - 1)?;
                    let mark = if selected { "x" } else { " " };
                    println!("[{mark}] {title}");
                }
            }
            "generate_scenes" => {
                self.require_images()?;
                let selected = self.session.scene_board().selected_scenes().len();
                if selected == 0 {
                    bail!("no scenes selected; use /select first");
                }
                println!("Generating {selected} scene image(s)");
                self.workers.spawn("scenes", self.session, |session| {
                    Ok(session.generate_scene_images())
                });
            }
            "regenerate" => {
                let (key, variant) = parse_slot_key(&value_as_string_list(args.get("words")))?;
                let outcome = self.session.regenerate(&key, variant)?;
                if !outcome.applied {
                    println!("{key}: superseded by a newer request");
                } else if let Some(message) = outcome.result.error_message() {
                    println!("{key}: error: {message}");
                } else {
                    println!("{key}: done");
                }
            }
            "edit" => {
                let identity = value_as_non_empty_string(args.get("identity"))
                    .context("/edit requires a caption")?;
                let prompt = intent
                    .prompt
                    .clone()
                    .context("/edit requires an instruction")?;
                let source = self.finished_image(&identity)?;
                let outcome = self.session.edit_image(&source, &identity, &prompt);
                match outcome.result.error_message() {
                    Some(message) => println!("Edit of {identity} failed: {message}"),
                    None => println!("Edit of {identity} done"),
                }
            }
            "status" => {
                let busy = self.workers.busy();
                println!(
                    "Theme {} / {}, {} image(s) uploaded, {busy} generation(s) running",
                    self.session.theme(),
                    self.session.camera_angle(),
                    self.session.images().len()
                );
                let snapshot = self.session.snapshot();
                println!("Phase: {:?}", snapshot.phase);
                print_snapshot(&snapshot, None);
            }
            "save" => {
                let dir = value_as_non_empty_string(args.get("path"))
                    .map(PathBuf::from)
                    .unwrap_or_else(|| self.out_dir.to_path_buf());
                let written = save_results(&self.session.snapshot(), &dir)?;
                println!("Saved {} image(s) to {}", written.len(), dir.display());
                self.saved.extend(written);
            }
            "album" => {
                let path = value_as_non_empty_string(args.get("path"))
                    .map(PathBuf::from)
                    .unwrap_or_else(|| self.out_dir.join("album.jpg"));
                let album = self.session.compose_album()?;
                let manifest_path = write_album(&album, &path)?;
                if !album.manifest.omitted.is_empty() {
                    println!(
                        "Album is full; left out: {}",
                        album.manifest.omitted.join(", ")
                    );
                }
                println!("Album written to {}", path.display());
                self.saved.push(path.to_string_lossy().to_string());
                self.saved
                    .push(manifest_path.to_string_lossy().to_string());
            }
            "reset" => {
                self.session.reset();
                println!("Session reset");
            }
            "unknown" => {
                let command = value_as_non_empty_string(args.get("command")).unwrap_or_default();
                println!("Unknown command /{command}. Type /help for commands.");
            }
            other => println!("Unsupported action {other}"),
        }
        Ok(Flow::Continue)
    }

    fn require_images(&self) -> Result<()> {
        if self.session.images().is_empty() {
            bail!("upload an image first with /upload");
        }
        Ok(())
    }

    /// Data URL of the finished image shown under `identity`: a result
    /// slot, or the last edit.
    fn finished_image(&self, identity: &str) -> Result<String> {
        let store = self.session.store();
        if let Some(image) = store
            .resolve_identity(identity)
            .and_then(|key| store.get(&key))
            .and_then(|result| result.image_url().cloned())
        {
            return Ok(image.to_string());
        }
        store
            .edit_target()
            .filter(|edit| edit.identity == identity)
            .and_then(|edit| edit.result.image_url().cloned())
            .map(|image| image.to_string())
            .with_context(|| format!("no finished image captioned '{identity}'"))
    }
}

/// `scene "Neon Alley" fallback` → the scene slot and the fallback prompt.
/// Custom keys accept `3` or `custom-3`.
pub(crate) fn parse_slot_key(words: &[String]) -> Result<(SlotKey, PromptVariant)> {
    let Some((scheme_word, rest)) = words.split_first() else {
        bail!(REGEN_USAGE);
    };
    let scheme = Scheme::parse(scheme_word)
        .with_context(|| format!("unknown result group '{scheme_word}'; {REGEN_USAGE}"))?;
    let mut rest = rest.to_vec();
    let variant = match rest.last().and_then(|word| PromptVariant::parse(word)) {
        Some(variant) if rest.len() > 1 => {
            rest.pop();
            variant
        }
        _ => PromptVariant::Original,
    };
    let key_text = rest.join(" ");
    if key_text.trim().is_empty() {
        bail!(REGEN_USAGE);
    }

    let key = match scheme {
        Scheme::Batch => SlotKey::Batch(key_text),
        Scheme::Scene => SlotKey::Scene(key_text),
        Scheme::Custom => {
            let index = key_text
                .trim()
                .trim_start_matches("custom-")
                .parse::<usize>()
                .with_context(|| format!("'{key_text}' is not a custom image number"))?;
            SlotKey::Custom(index)
        }
    };
    Ok((key, variant))
}

fn value_as_non_empty_string(value: Option<&Value>) -> Option<String> {
    let raw = value
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

fn value_as_string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use restyle_contracts::chat::parse_intent;
    use restyle_contracts::results::{PromptVariant, SlotKey};
    use restyle_engine::{GenerationConfig, Session};
    use serde_json::json;

    use super::{parse_slot_key, value_as_string_list, Flow, Repl, Workers};

    fn words(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    fn dryrun_session() -> anyhow::Result<Session> {
        let config = GenerationConfig {
            image_model: "dryrun-image-1".to_string(),
            text_model: "dryrun-text-1".to_string(),
            pacing_ms: 0,
            ..GenerationConfig::default()
        };
        Session::builder(config).session_id("repl-test").build()
    }

    #[test]
    fn slot_keys_parse_with_optional_variant() -> anyhow::Result<()> {
        assert_eq!(
            parse_slot_key(&words(&["scene", "Neon Alley", "fallback"]))?,
            (SlotKey::Scene("Neon Alley".to_string()), PromptVariant::Fallback)
        );
        assert_eq!(
            parse_slot_key(&words(&["batch", "Rock", "Star"]))?,
            (SlotKey::Batch("Rock Star".to_string()), PromptVariant::Original)
        );
        assert_eq!(
            parse_slot_key(&words(&["custom", "custom-2"]))?,
            (SlotKey::Custom(2), PromptVariant::Original)
        );
        // A lone variant word is the key, not the variant.
        assert_eq!(
            parse_slot_key(&words(&["batch", "Original"]))?,
            (SlotKey::Batch("Original".to_string()), PromptVariant::Original)
        );
        assert!(parse_slot_key(&words(&["custom", "three"])).is_err());
        assert!(parse_slot_key(&words(&["gallery", "x"])).is_err());
        assert!(parse_slot_key(&[]).is_err());
        Ok(())
    }

    #[test]
    fn string_lists_skip_blank_and_non_string_items() {
        let value = json!(["a", " ", 3, " b "]);
        assert_eq!(value_as_string_list(Some(&value)), vec!["a", "b"]);
        assert!(value_as_string_list(None).is_empty());
    }

    #[test]
    fn custom_command_runs_in_background_and_saves() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let session = dryrun_session()?;
        let photo = temp.path().join("me.png");
        std::fs::write(&photo, b"not really a png")?;
        let mut repl = Repl {
            session: &session,
            out_dir: temp.path(),
            workers: Workers::default(),
            saved: Vec::new(),
        };

        let upload = format!("/upload {}", photo.display());
        assert!(matches!(repl.handle(&parse_intent(&upload))?, Flow::Continue));
        repl.handle(&parse_intent("/custom 2 a 1920s jazz club"))?;
        repl.workers.join_all();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.custom.len(), 2);
        assert!(snapshot.custom.iter().all(|result| result.image_url().is_some()));

        repl.handle(&parse_intent("/save"))?;
        assert_eq!(repl.saved.len(), 2);
        assert!(temp.path().join("custom-0.png").exists());
        assert!(matches!(repl.handle(&parse_intent("/quit"))?, Flow::Quit));
        Ok(())
    }

    #[test]
    fn generation_commands_need_an_upload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let session = dryrun_session()?;
        let mut repl = Repl {
            session: &session,
            out_dir: temp.path(),
            workers: Workers::default(),
            saved: Vec::new(),
        };

        assert!(repl.handle(&parse_intent("/batch")).is_err());
        assert!(repl.handle(&parse_intent("/edit custom-0 make it sepia")).is_err());
        assert!(repl.handle(&parse_intent("/theme no-such-theme")).is_err());
        assert_eq!(repl.workers.busy(), 0);
        Ok(())
    }

    #[test]
    fn custom_count_out_of_range_is_rejected_up_front() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let session = dryrun_session()?;
        let photo = temp.path().join("me.png");
        std::fs::write(&photo, b"not really a png")?;
        let mut repl = Repl {
            session: &session,
            out_dir: temp.path(),
            workers: Workers::default(),
            saved: Vec::new(),
        };

        repl.handle(&parse_intent(&format!("/upload {}", photo.display())))?;
        assert!(repl.handle(&parse_intent("/custom 0 a 1920s jazz club")).is_err());
        assert!(repl.handle(&parse_intent("/custom 9 a 1920s jazz club")).is_err());
        assert!(repl
            .handle(&parse_intent("/custom 18446744073709551615 a 1920s jazz club"))
            .is_err());
        assert_eq!(repl.workers.busy(), 0);
        assert!(session.snapshot().custom.is_empty());
        Ok(())
    }
}
