use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod app;
mod citations;
mod config;
mod handler;
mod store;
mod tui;
mod ui;

use api::ApiClient;
use app::App;
use config::Config;

#[derive(Parser)]
#[command(name = "nibras")]
#[command(about = "Ask questions about your documents from the terminal")]
#[command(version)]
struct Cli {
    /// Backend base URL (overrides the config file)
    #[arg(long, global = true)]
    api: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload text files to the backend
    Upload {
        /// Paths of .txt files to upload
        files: Vec<PathBuf>,
    },
    /// Ask a single question and print the answer with its sources
    Ask {
        /// The question to ask
        question: String,
    },
    /// List the uploaded documents
    Documents,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load().unwrap_or_else(|_| Config::new());
    let base_url = cli
        .api
        .clone()
        .or(config.api_base_url.clone())
        .unwrap_or_else(|| config::DEFAULT_API_BASE.to_string());

    // An explicit --api becomes the saved default for later runs
    if let Some(api_override) = cli.api.clone() {
        if config.api_base_url.as_deref() != Some(api_override.as_str()) {
            let updated = Config {
                api_base_url: Some(api_override),
            };
            if let Err(e) = updated.save() {
                eprintln!("{}", format!("Could not save config: {e:#}").yellow());
            }
        }
    }

    let api = ApiClient::new(&base_url);

    match cli.command {
        Some(Commands::Upload { files }) => upload_files(&api, files).await,
        Some(Commands::Ask { question }) => ask(&api, &question).await,
        Some(Commands::Documents) => list_documents(&api).await,
        None => run_tui(api).await,
    }
}

/// The interactive TUI. Logs go to a file so they never corrupt the screen.
async fn run_tui(api: ApiClient) -> Result<()> {
    let app_dir = config::app_dir()?;
    std::fs::create_dir_all(&app_dir)?;
    init_logging(&app_dir)?;
    info!("starting nibras");

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = tui::EventHandler::new();

    let mut app = App::new(api, app_dir.join("conversations")).await;

    while !app.should_quit {
        terminal.draw(|frame| ui::render(&mut app, frame))?;

        if let Some(event) = events.next().await {
            handler::handle_event(&mut app, event).await?;
        } else {
            break;
        }
    }

    tui::restore()?;
    Ok(())
}

fn init_logging(app_dir: &std::path::Path) -> Result<()> {
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(app_dir.join("nibras.log"))
        .context("could not open log file")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Arc::new(log_file))
        .with_ansi(false)
        .init();

    Ok(())
}

/// `nibras upload a.txt b.txt`: sequential uploads, one line of output each.
async fn upload_files(api: &ApiClient, files: Vec<PathBuf>) -> Result<()> {
    if files.is_empty() {
        println!("{}", "No files given.".yellow());
        return Ok(());
    }

    for path in files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        if !api::accepted_upload(&name) {
            println!(
                "{} {} {}",
                "Skipping".yellow(),
                name.bold(),
                format!("(only {} files can be uploaded)", api::ACCEPTED_EXTENSION).yellow()
            );
            continue;
        }

        print!("Uploading {}... ", name.bold());
        std::io::stdout().flush().ok();
        match api.upload(&path).await {
            Ok(receipt) => {
                println!("{}", format!("done ({} chunks)", receipt.total_chunks).green());
            }
            Err(e) => {
                tracing::error!("upload of {name} failed: {e:#}");
                println!("{}", "failed".red());
                println!("{}", "Something went wrong while uploading the file.".red());
            }
        }
    }

    Ok(())
}

/// `nibras ask "..."`: one-shot question, answer plus its cited sources.
async fn ask(api: &ApiClient, question: &str) -> Result<()> {
    let question = question.trim();
    if question.is_empty() {
        println!("{}", "Nothing to ask.".yellow());
        return Ok(());
    }

    match api.query(question).await {
        Ok(reply) => {
            println!("{}", reply.answer);

            let sources = citations::cited_sources(&reply.answer, &reply.context);
            if !sources.is_empty() {
                println!();
                println!("{}", format!("Sources used ({})", sources.len()).magenta().bold());
                for source in sources {
                    println!("{}", source.label().magenta());
                    println!("{}", format!("{}...", source.preview.replace('\n', " ")).dimmed());
                }
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!("query failed: {e:#}");
            println!("{}", app::QUERY_FAILED_MESSAGE.red());
            println!("{}", "Make sure the backend is running.".dimmed());
            Ok(())
        }
    }
}

/// `nibras documents`: the library view, one document per pair of lines.
async fn list_documents(api: &ApiClient) -> Result<()> {
    match api.documents().await {
        Ok(infos) => {
            if infos.is_empty() {
                println!("{}", "No documents uploaded yet.".yellow());
                return Ok(());
            }

            let now = chrono::Utc::now();
            for info in infos {
                let doc = app::Document::from_info(info);
                println!("{}", doc.name.bold());
                println!(
                    "  {}",
                    format!(
                        "{} chunks • {}",
                        doc.chunk_count,
                        ui::relative_upload_date(doc.uploaded_at, now)
                    )
                    .dimmed()
                );
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!("document list failed: {e:#}");
            println!("{}", "Could not load the document list.".red());
            println!("{}", "Make sure the backend is running.".dimmed());
            Ok(())
        }
    }
}
