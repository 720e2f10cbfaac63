//! docchat CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use docchat::{
    chat::ChatService,
    commands::{
        cmd_ask, cmd_create, cmd_delete, cmd_history, cmd_init, cmd_list, cmd_status,
        print_answer, print_conversation_completions, print_conversations, print_create,
        print_delete, print_history, print_init, print_status, render_error, AskOptions,
    },
    config::Config,
    error::{Error, Result},
    progress::{hide_progress, LogWriterFactory},
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docchat")]
#[command(version, about = "Chat with your PDF documents", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Act as this user (defaults to `default_user` from the config)
    #[arg(short, long, global = true, env = "DOCCHAT_USER")]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize docchat configuration and database
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Start a conversation over PDF files and ingest them
    Create {
        /// Conversation title
        title: String,

        /// PDF files or directories containing PDFs
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Show conversation and document status
    Status {
        /// Conversation ID
        conversation_id: String,
    },

    /// List conversations
    List {
        /// Output conversation IDs with titles for shell completions
        #[arg(long, value_enum, hide = true)]
        completion: Option<Shell>,
    },

    /// Ask a question about a conversation's documents
    Ask {
        /// Conversation ID
        conversation_id: String,

        /// The question
        question: String,

        /// Number of previous messages to send as context
        #[arg(long)]
        context: Option<usize>,

        /// Only search these document IDs (repeatable)
        #[arg(long = "document")]
        documents: Vec<String>,
    },

    /// Show message history
    History {
        /// Conversation ID
        conversation_id: String,

        /// Only the latest N messages
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Delete a conversation
    Delete {
        /// Conversation ID
        conversation_id: String,

        /// Also delete the vector collection and stored files
        #[arg(long)]
        purge: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);
    let json = cli.json;

    if let Err(e) = run(cli).await {
        debug!(kind = ?e.kind(), error = %e, "Command failed");
        report_error(&e, json);
        std::process::exit(1);
    }
}

/// JSON errors go to stdout next to other JSON output; text errors to stderr
fn report_error(err: &Error, json: bool) {
    let rendered = render_error(err, json);
    if json {
        println!("{}", rendered);
    } else {
        eprintln!("{}", rendered);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if cli.json {
        hide_progress();
    }

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "docchat", &mut std::io::stdout());
        print_completion_extras(shell);
        return Ok(());
    }

    if let Commands::Init { force } = cli.command {
        let (base_dir, config_path) = init_paths(cli.config);
        let report = cmd_init(base_dir, config_path, force).await?;
        if cli.json {
            emit_json(&report)?;
        } else {
            print_init(&report);
        }
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    let user = cli
        .user
        .clone()
        .unwrap_or_else(|| config.default_user.clone());
    let service = ChatService::open(config).await?;

    match cli.command {
        Commands::Create { title, paths } => {
            let report = cmd_create(&service, &user, &title, &paths, !cli.json).await?;
            if cli.json {
                emit_json(&report)?;
            } else {
                print_create(&report);
            }
        }

        Commands::Status { conversation_id } => {
            let details = cmd_status(&service, &user, &conversation_id).await?;
            if cli.json {
                emit_json(&details)?;
            } else {
                print_status(&details);
            }
        }

        Commands::List { completion } => {
            let conversations = cmd_list(&service, &user).await?;
            if let Some(shell) = completion {
                print_conversation_completions(&conversations, shell);
            } else if cli.json {
                emit_json(&conversations)?;
            } else {
                print_conversations(&conversations);
            }
        }

        Commands::Ask {
            conversation_id,
            question,
            context,
            documents,
        } => {
            let options = AskOptions {
                context_size: context,
                document_ids: documents,
            };
            let answer = cmd_ask(&service, &user, &conversation_id, &question, options).await?;
            if cli.json {
                emit_json(&answer)?;
            } else {
                print_answer(&answer);
            }
        }

        Commands::History {
            conversation_id,
            limit,
        } => {
            let messages = cmd_history(&service, &user, &conversation_id, limit).await?;
            if cli.json {
                emit_json(&messages)?;
            } else {
                print_history(&messages);
            }
        }

        Commands::Delete {
            conversation_id,
            purge,
        } => {
            let report = cmd_delete(&service, &user, &conversation_id, purge).await?;
            if cli.json {
                emit_json(&report)?;
            } else {
                print_delete(&report);
            }
        }

        Commands::Init { .. } | Commands::Completions { .. } => {
            return Err(Error::Other("command already handled".to_string()));
        }
    }

    Ok(())
}

fn init_logging(cli: &Cli) {
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if cli.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(LogWriterFactory))
            .with(filter)
            .init();
    }
}

fn emit_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Base directory and config file for `init`
fn init_paths(config: Option<PathBuf>) -> (PathBuf, PathBuf) {
    match config {
        Some(path) if path.extension().is_some_and(|e| e == "toml") => {
            let base = path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_base_dir);
            (base, path)
        }
        Some(dir) => {
            let config_path = dir.join("config.toml");
            (dir, config_path)
        }
        None => (Config::default_base_dir(), Config::default_config_path()),
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_config_path);

    if !config_path.exists() {
        return Err(Error::Config(format!(
            "Config file not found: {}. Run 'docchat init' first.",
            config_path.display()
        )));
    }

    Config::load(&config_path)
}

fn print_completion_extras(shell: Shell) {
    const SUBCOMMANDS: &str = "status ask history delete";
    match shell {
        Shell::Bash => {
            println!();
            println!("# Dynamic completion of conversation ids");
            println!("_docchat_dynamic() {{");
            println!("    local cur=\"${{COMP_WORDS[COMP_CWORD]}}\"");
            println!("    local prev=\"${{COMP_WORDS[COMP_CWORD-1]}}\"");
            println!("    case \"$prev\" in");
            println!("        {})", SUBCOMMANDS.replace(' ', "|"));
            println!(
                "            COMPREPLY=( $(compgen -W \"$(docchat list --completion bash 2>/dev/null)\" -- \"$cur\") )"
            );
            println!("            return 0 ;;");
            println!("    esac");
            println!("    _docchat \"$@\"");
            println!("}}");
            println!("complete -F _docchat_dynamic -o bashdefault -o default docchat");
        }
        Shell::Zsh => {
            println!();
            println!("# Dynamic completion of conversation ids");
            println!("_docchat_conversations() {{");
            println!("    local -a entries");
            println!(
                "    entries=(\"${{(@f)$(docchat list --completion zsh 2>/dev/null)}}\")"
            );
            println!("    _describe -t conversations 'conversations' entries");
            println!("}}");
            for sub in SUBCOMMANDS.split(' ') {
                println!("compdef _docchat_conversations 'docchat {}'", sub);
            }
        }
        Shell::Fish => {
            println!();
            println!("# Dynamic completion of conversation ids");
            println!(
                "complete -c docchat -n '__fish_seen_subcommand_from {}' -a '(docchat list --completion fish 2>/dev/null)'",
                SUBCOMMANDS
            );
        }
        _ => {}
    }
}
