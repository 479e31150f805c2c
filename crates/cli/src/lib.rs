pub mod commands;
pub mod logging;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use routewise_core::domain::execution::Strategy;

use crate::commands::{load_session, SessionOptions};

#[derive(Debug, Parser)]
#[command(
    name = "routewise",
    about = "Routewise operator CLI",
    long_about = "Resolve merchants, classify intents, structure analytic questions, and run routed conversations against an entity registry.",
    after_help = "Examples:\n  routewise resolve 海底捞最近怎么样\n  routewise classify 他有什么风险\n  routewise structure 最近30天蜀大侠火锅营业额走势\n  echo 喜茶怎么样 | routewise chat --force skills\n  routewise --registry merchants.json config"
)]
pub struct Cli {
    #[arg(long, global = true, help = "JSON entity fixture (the built-in demo registry otherwise)")]
    registry: Option<PathBuf>,
    #[arg(long, global = true, help = "Config file path (routewise.toml or config/routewise.toml otherwise)")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Resolve the entity a message refers to")]
    Resolve {
        text: String,
        #[arg(long, help = "Active conversation entity id to inherit for short follow-ups")]
        context_entity: Option<String>,
    },
    #[command(about = "Classify a message into an intent with its rule trace")]
    Classify { text: String },
    #[command(about = "Turn an analytic question into a structured query")]
    Structure { text: String },
    #[command(about = "Route stdin lines as one conversation, one JSON envelope per turn")]
    Chat {
        #[arg(long, help = "Conversation id (a fresh id otherwise)")]
        conversation: Option<String>,
        #[arg(long, help = "Force a strategy: skills|llm|hybrid")]
        force: Option<Strategy>,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = SessionOptions { config_path: cli.config, registry_path: cli.registry };
    let command_name = cli.command.name();

    let result = match load_session(command_name, &options) {
        Ok(session) => {
            logging::init(&session.config);
            match cli.command {
                Command::Resolve { text, context_entity } => {
                    commands::resolve::run(&session, &text, context_entity.as_deref())
                }
                Command::Classify { text } => commands::classify::run(&session, &text),
                Command::Structure { text } => commands::structure::run(&session, &text),
                Command::Chat { conversation, force } => {
                    let stdin = io::stdin();
                    let mut stdout = io::stdout();
                    commands::chat::run(&session, conversation, force, stdin.lock(), &mut stdout)
                }
                Command::Config => commands::config::run(&session),
            }
        }
        Err(failure) => failure,
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Resolve { .. } => "resolve",
            Self::Classify { .. } => "classify",
            Self::Structure { .. } => "structure",
            Self::Chat { .. } => "chat",
            Self::Config => "config",
        }
    }
}
