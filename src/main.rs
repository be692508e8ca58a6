use clap::Parser;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use polychat::core::client::{present_image_result, ImageAttachment, ImagePrompt};
use polychat::core::config::{ConfigStore, ModelKind};
use polychat::core::session::{SessionError, SessionStore};
use polychat::core::stream_router::StreamEvent;
use polychat::utils::logging::LoggingState;

/// Line-oriented front-end for the polychat session engine. Stands in
/// for the web UI: one logged-in user, one active model tab, streamed
/// replies rendered incrementally.
#[derive(Parser)]
#[command(name = "polychat")]
struct Args {
    /// Model definitions file (JSON array, order = tab order)
    #[arg(long, default_value = "model_config.json")]
    models: PathBuf,

    /// Credentials and preset catalogs file
    #[arg(long, default_value = "user_config.json")]
    users: PathBuf,

    /// Username to log in as
    #[arg(long)]
    username: String,

    /// Password for the username
    #[arg(long)]
    password: String,

    /// Directory for assistant output files
    #[arg(long)]
    downloads_dir: Option<PathBuf>,

    /// Append the chat transcript to this file
    #[arg(long)]
    log: Option<String>,

    /// Token budget per reply
    #[arg(long, default_value_t = 300)]
    max_tokens: u32,
}

fn default_downloads_dir() -> PathBuf {
    directories::ProjectDirs::from("org", "polychat", "polychat")
        .map(|dirs| dirs.data_dir().join("downloads"))
        .unwrap_or_else(|| PathBuf::from("downloads"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    // Config load failures are fatal: without model definitions and
    // credentials there is nothing to serve.
    let config = match ConfigStore::load(&args.models, &args.users) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    let downloads_dir = args
        .downloads_dir
        .clone()
        .unwrap_or_else(default_downloads_dir);
    let store = SessionStore::new(config, downloads_dir.clone());

    if !store.authenticate(&args.username, &args.password) {
        eprintln!("invalid credentials for '{}'", args.username);
        std::process::exit(1);
    }

    let logging = LoggingState::new(args.log.clone());
    run_repl(store, args, logging, downloads_dir).await
}

async fn run_repl(
    store: SessionStore,
    args: Args,
    logging: LoggingState,
    downloads_dir: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let username = args.username.clone();
    let mut max_tokens = args.max_tokens;
    let mut current_model = match store.config().models().first() {
        Some(model) => model.model_name.clone(),
        None => {
            eprintln!("no models configured");
            std::process::exit(1);
        }
    };
    let mut system_message = {
        let session = store.get_or_create(&username).await;
        let session = session.lock().await;
        session.catalog.default_text().to_string()
    };
    let mut attachments: Vec<ImageAttachment> = Vec::new();
    let mut staged_file: Option<PathBuf> = None;
    let mut backing_model: Option<String> = None;

    println!("Welcome {username}. /help lists commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{current_model}> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix('/') {
            let (command, argument) = match rest.split_once(' ') {
                Some((command, argument)) => (command, argument.trim()),
                None => (rest, ""),
            };
            match command {
                "quit" => break,
                "help" => print_help(),
                "models" => {
                    for model in store.config().models() {
                        println!(
                            "  {}: {} ({})",
                            model.model_name, model.model_info, model.deployment_info
                        );
                    }
                }
                "model" => {
                    if store.config().model(argument).is_some() {
                        current_model = argument.to_string();
                    } else {
                        println!("no configured model named '{argument}'");
                    }
                }
                "presets" => {
                    let session = store.get_or_create(&username).await;
                    let session = session.lock().await;
                    for name in session.catalog.names() {
                        println!("  {name}");
                    }
                }
                "system" => {
                    // A known preset name selects its text; anything else
                    // becomes the system message verbatim.
                    let session = store.get_or_create(&username).await;
                    let session = session.lock().await;
                    system_message = session
                        .catalog
                        .get(argument)
                        .map(str::to_string)
                        .unwrap_or_else(|| argument.to_string());
                    println!("system message set");
                }
                "save" => match store.save_preset(&username, argument, &system_message).await {
                    Ok(()) => println!("saved preset '{argument}'"),
                    Err(err) => println!("{err}"),
                },
                "delete" => match store.delete_preset(&username, argument).await {
                    Ok(()) => println!("deleted preset '{argument}'"),
                    Err(err) => println!("{err}"),
                },
                "max-tokens" => match argument.parse::<u32>() {
                    Ok(value) if value > 0 => max_tokens = value,
                    _ => println!("usage: /max-tokens <positive integer>"),
                },
                "attach" => match ImageAttachment::read(std::path::Path::new(argument)).await {
                    Ok(attachment) => {
                        attachments.push(attachment);
                        println!("attached {argument}");
                    }
                    Err(err) => println!("cannot read {argument}: {err}"),
                },
                "upload" => {
                    staged_file = Some(PathBuf::from(argument));
                    println!("staged {argument} for the next assistant run");
                }
                "backing" => {
                    backing_model = Some(argument.to_string());
                    println!("assistant will run against '{argument}'");
                }
                "reset" => match store.reset(&username, &current_model).await {
                    Ok(()) => println!("conversation reset"),
                    Err(err) => println!("{err}"),
                },
                "image" => {
                    generate_image(&store, &username, argument, &downloads_dir).await;
                }
                "file" => match store.take_download(&username).await {
                    Some(path) => println!("download ready: {}", path.display()),
                    None => println!("No files were found to be downloaded"),
                },
                other => println!("unknown command '/{other}'"),
            }
            continue;
        }

        let kind = store
            .config()
            .model(&current_model)
            .map(|model| model.kind())
            .unwrap_or(ModelKind::Chat);
        match kind {
            ModelKind::Image => {
                generate_image(&store, &username, &line, &downloads_dir).await;
            }
            ModelKind::Assistant => {
                let _ = logging.log_turn(&username, &line);
                match store
                    .submit_assistant(
                        &username,
                        &line,
                        staged_file.take(),
                        system_message.clone(),
                        backing_model.clone(),
                    )
                    .await
                {
                    Ok(mut events) => {
                        let mut transcript = String::new();
                        while let Some(event) = events.recv().await {
                            render_assistant_event(&event, &mut transcript);
                        }
                        println!();
                        let _ = logging.log_turn("assistant", &transcript);
                    }
                    Err(err) => println!("{err}"),
                }
            }
            ModelKind::Chat | ModelKind::Vision => {
                let _ = logging.log_turn(&username, &line);
                match store
                    .submit_chat(
                        &username,
                        &current_model,
                        &line,
                        Some(system_message.clone()),
                        std::mem::take(&mut attachments),
                        max_tokens,
                    )
                    .await
                {
                    Ok(mut snapshots) => {
                        // Each snapshot is the full answer so far; print
                        // only what the previous one lacked.
                        let mut printed = 0;
                        while let Some(snapshot) = snapshots.next().await {
                            print!("{}", &snapshot[printed..]);
                            std::io::stdout().flush()?;
                            printed = snapshot.len();
                        }
                        println!();
                        let _ = logging.log_turn("assistant", snapshots.text());
                    }
                    Err(err) => println!("{err}"),
                }
            }
        }
    }

    Ok(())
}

async fn generate_image(
    store: &SessionStore,
    username: &str,
    prompt_text: &str,
    downloads_dir: &std::path::Path,
) {
    if prompt_text.is_empty() {
        println!("usage: /image <prompt>");
        return;
    }
    let prompt = ImagePrompt::new(prompt_text);
    let outcome = match store.generate_image(username, &prompt).await {
        Ok(image) => Ok(image),
        Err(SessionError::Transport(err)) => Err(err),
        Err(other) => {
            println!("{other}");
            return;
        }
    };
    let (revised_prompt, image) = present_image_result(outcome);
    println!("revised prompt: {revised_prompt}");
    match image {
        Some(image) => {
            let name = format!("dalle-{}.png", chrono::Utc::now().timestamp());
            let path = downloads_dir.join(name);
            if let Err(err) = tokio::fs::create_dir_all(downloads_dir).await {
                println!("cannot create {}: {err}", downloads_dir.display());
                return;
            }
            match tokio::fs::write(&path, &image.bytes).await {
                Ok(()) => println!("image saved to {}", path.display()),
                Err(err) => println!("cannot write image: {err}"),
            }
        }
        None => println!("no image"),
    }
}

fn render_assistant_event(event: &StreamEvent, transcript: &mut String) {
    match event {
        StreamEvent::ToolCallOutputReady { file_id, kind } => {
            println!("\n[file ready: {file_id} ({kind}), /file to download]");
        }
        StreamEvent::Error(diagnostic) => {
            // Fail-soft: the diagnostic joins the transcript inline.
            print!("{diagnostic}");
            transcript.push_str(diagnostic);
        }
        other => {
            if let Some(text) = other.transcript_text() {
                print!("{text}");
                transcript.push_str(text);
            }
        }
    }
    let _ = std::io::stdout().flush();
}

fn print_help() {
    for line in [
        "/models              list configured models",
        "/model <name>        switch the active model tab",
        "/presets             list system-message presets",
        "/system <name|text>  activate a preset or a literal system message",
        "/save <name>         save the active system message as a preset",
        "/delete <name>       delete a preset",
        "/max-tokens <n>      set the reply token budget",
        "/attach <path>       attach an image to the next question",
        "/upload <path>       stage a file for the next assistant run",
        "/backing <name>      pick the assistant's backing deployment",
        "/reset               clear the active conversation",
        "/image <prompt>      generate an image",
        "/file                take the oldest pending download",
        "/quit                exit",
    ] {
        println!("  {line}");
    }
}
