use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use relay_core::agent::{ResponseExtractor, RunController, RunResult, ToolRegistry};
use relay_core::traits::ArtifactStore;
use relay_core::{config::Config, providers::AssistantsClient, tools};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "relay - drive hosted assistant runs with local tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a conversation and print its id
    New,
    /// Run a single turn
    Run {
        #[arg(short, long)]
        conversation: Option<String>,
        #[arg(short, long)]
        message: String,
        /// Turn timeout in seconds, overrides the config
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Interactive session, one turn per line
    Chat {
        #[arg(short, long)]
        conversation: Option<String>,
    },
    /// Download a file produced by the assistant
    Fetch {
        file_id: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// List the locally registered tools
    Tools,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relay=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load_or_init()?;
    tracing::debug!(workspace = %config.workspace_dir.display(), "Loaded configuration");

    if let Commands::Tools = cli.command {
        print_tools(&build_registry(&config)?);
        return Ok(ExitCode::SUCCESS);
    }

    let client = match config.validate() {
        Ok(()) => Arc::new(AssistantsClient::from_config(&config)),
        Err(e) => {
            eprintln!("❌ {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    match cli.command {
        Commands::Tools => print_tools(&build_registry(&config)?),
        Commands::New => {
            let id = client.create_conversation().await?;
            println!("{}", id);
        }
        Commands::Run {
            conversation,
            message,
            timeout,
        } => {
            let controller = controller(&config, client.clone())?;
            let conversation = match conversation {
                Some(id) => id,
                None => new_conversation(&client).await?,
            };
            let timeout = timeout
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.turn_timeout());

            eprintln!("\n🤔 Processing...\n");
            let result = turn(&controller, &conversation, &message, timeout).await?;
            print_result(&result);
            if !result.status.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Chat { conversation } => {
            let controller = controller(&config, client.clone())?;
            let conversation = match conversation {
                Some(id) => id,
                None => new_conversation(&client).await?,
            };
            chat(&controller, &conversation, config.turn_timeout()).await?;
        }
        Commands::Fetch { file_id, output } => {
            let bytes = client.fetch_artifact(&file_id).await?;
            tokio::fs::write(&output, &bytes)
                .await
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!(
                "✅ Saved {} ({} bytes) to {}",
                file_id,
                bytes.len(),
                output.display()
            );
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn build_registry(config: &Config) -> Result<ToolRegistry> {
    if !config.workspace_dir.exists() {
        std::fs::create_dir_all(&config.workspace_dir).with_context(|| {
            format!(
                "Could not create workspace at {}",
                config.workspace_dir.display()
            )
        })?;
    }

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(tools::FileReadTool::new(&config.workspace_dir)));
    registry.register(Arc::new(tools::FileWriteTool::new(&config.workspace_dir)));
    registry.register(Arc::new(tools::CreateFolderTool::new(&config.workspace_dir)));
    registry.register(Arc::new(tools::CurrentTimeTool));

    if let Some(dir) = &config.mailbox_dir {
        let mailbox: Arc<dyn tools::Mailbox> = Arc::new(tools::DirMailbox::new(dir));
        registry.register(Arc::new(
            tools::SendEmailTool::new(mailbox.clone()).with_workspace(&config.workspace_dir),
        ));
        registry.register(Arc::new(tools::ReadEmailsTool::new(mailbox)));
    }

    if let Some(path) = &config.calendar_file {
        let calendar: Arc<dyn tools::Calendar> = Arc::new(tools::FileCalendar::new(path));
        registry.register(Arc::new(tools::ListEventsTool::new(calendar.clone())));
        registry.register(Arc::new(tools::CreateEventTool::new(calendar.clone())));
        registry.register(Arc::new(tools::UpdateEventTool::new(calendar.clone())));
        registry.register(Arc::new(tools::DeleteEventTool::new(calendar)));
    }

    Ok(registry)
}

fn controller(config: &Config, client: Arc<AssistantsClient>) -> Result<RunController> {
    let registry = Arc::new(build_registry(config)?);
    Ok(RunController::from_config(client, registry, config))
}

async fn new_conversation(client: &AssistantsClient) -> Result<String> {
    let id = client.create_conversation().await?;
    eprintln!("🧵 Conversation {}", style(&id).dim());
    Ok(id)
}

/// Cancels the returned token when Ctrl-C arrives. Abort the handle once the
/// turn is over.
fn cancel_on_ctrl_c() -> (CancellationToken, JoinHandle<()>) {
    let token = CancellationToken::new();
    let watcher = {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n⏹  Cancelling...");
                token.cancel();
            }
        })
    };
    (token, watcher)
}

async fn turn(
    controller: &RunController,
    conversation: &str,
    message: &str,
    timeout: Duration,
) -> Result<RunResult> {
    let (cancel, watcher) = cancel_on_ctrl_c();
    let result = controller
        .execute_turn_with_cancel(conversation, message, timeout, cancel)
        .await;
    watcher.abort();
    Ok(result?)
}

async fn chat(controller: &RunController, conversation: &str, timeout: Duration) -> Result<()> {
    println!("🛰  Relay");
    println!("Type your message (Ctrl+D to exit):\n");

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let mut input = String::new();
        match stdin.lock().read_line(&mut input) {
            Ok(0) | Err(_) => {
                println!("\n👋 Goodbye!");
                break;
            }
            Ok(_) => {
                let input = input.trim();
                if input.is_empty() {
                    continue;
                }

                println!("\n🤔 Processing...\n");
                match turn(controller, conversation, input, timeout).await {
                    Ok(result) => print_result(&result),
                    Err(e) => eprintln!("❌ Error: {:#}", e),
                }
                println!();
            }
        }
    }

    Ok(())
}

fn print_result(result: &RunResult) {
    let text = result.text();
    if !text.is_empty() {
        println!("{}", text);
    }

    if !result.references.is_empty() {
        println!("\n{}", style("References").bold());
        print!("{}", ResponseExtractor::format_references(result));
    }

    let artifacts = result.artifact_ids();
    if !artifacts.is_empty() {
        println!("\n{}", style("Files").bold());
        for id in artifacts {
            println!("  📎 {}  (relay fetch {} --output <path>)", id, id);
        }
    }

    for fault in &result.tool_faults {
        eprintln!(
            "{} {} ({}): {}",
            style("⚠").yellow(),
            fault.tool,
            fault.call_id,
            fault.message
        );
    }

    if let Some(error) = &result.error {
        eprintln!("❌ {}: {}", result.status, error);
    }
}

fn print_tools(registry: &ToolRegistry) {
    for spec in registry.get_specs() {
        println!("{}  {}", style(&spec.name).bold(), spec.description);
        match serde_json::to_string_pretty(&spec.parameters_schema) {
            Ok(schema) => println!("{}\n", style(schema).dim()),
            Err(e) => eprintln!("❌ Could not render schema: {}", e),
        }
    }
}
