use clap::{Parser, Subcommand};
use persona_chat::api::models::PersonaInput;
use persona_chat::api::refresh::SessionState;
use persona_chat::cache::{Message, Sender};
use persona_chat::{AppConfig, Session};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "persona-chat", about = "Chat with AI personas from the terminal")]
struct Cli {
    /// Server URL, overrides the configured one
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and store the session tokens
    Login { email: String, password: String },
    /// Forget the stored session
    Logout,
    /// Create an account
    Signup {
        email: String,
        username: String,
        password: String,
        #[arg(long, default_value = "")]
        country: String,
    },
    /// List personas you can talk to
    Contacts {
        /// Include soft-deleted custom personas
        #[arg(long)]
        all: bool,
    },
    /// Open a conversation and chat line by line
    Chat { contact: String },
    #[command(subcommand)]
    Persona(PersonaCommand),
    /// Write the effective configuration to disk
    SaveConfig,
}

#[derive(Subcommand)]
enum PersonaCommand {
    Create {
        name: String,
        system_prompt: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        avatar_url: Option<String>,
    },
    Delete { id: i64 },
    Activate { id: i64 },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = AppConfig::load();
    if let Some(server) = cli.server {
        config.base_url = server;
    }

    if let Err(e) = run(cli.command, config).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Command, config: AppConfig) -> persona_chat::Result<()> {
    if let Command::SaveConfig = command {
        config.save()?;
        println!("Saved configuration for {}", config.base_url);
        return Ok(());
    }

    let mut session = Session::open(&config)?;
    match command {
        Command::Login { email, password } => {
            session.log_in(&email, &password).await?;
            println!("Logged in.");
        }
        Command::Logout => {
            session.log_out();
            println!("Logged out.");
        }
        Command::Signup { email, username, password, country } => {
            let user = session.api().sign_up(&email, &username, &password, &country).await?;
            println!(
                "Created account {} ({}). Log in to start chatting.",
                user.username, user.email
            );
        }
        Command::Contacts { all } => {
            require_login(&session)?;
            if let Err(e) = session.refresh_contacts().await {
                log::warn!("Custom personas unavailable: {}", e);
            }
            let contacts: Vec<_> = if all {
                session.contacts().all().iter().collect()
            } else {
                session.contacts().listing().collect()
            };
            for c in contacts {
                let kind = if c.is_custom() { "custom" } else { "default" };
                let state = if c.is_active() { "" } else { " (deleted)" };
                println!("{:<14} {:<24} {}{}", c.id, c.display_name, kind, state);
            }
        }
        Command::Chat { contact } => {
            require_login(&session)?;
            if let Err(e) = session.refresh_contacts().await {
                log::warn!("Custom personas unavailable: {}", e);
            }
            chat_loop(&session, &contact).await?;
        }
        Command::Persona(cmd) => {
            require_login(&session)?;
            persona_command(&session, cmd).await?;
        }
        Command::SaveConfig => {}
    }
    Ok(())
}

fn require_login<T>(session: &Session<T>) -> persona_chat::Result<()>
where
    T: persona_chat::api::transport::Transport,
{
    match session.state() {
        SessionState::Authenticated => Ok(()),
        SessionState::LoggedOut => Err(persona_chat::ClientError::SessionExpired),
    }
}

async fn persona_command(
    session: &Session<persona_chat::api::transport::HttpTransport>,
    cmd: PersonaCommand,
) -> persona_chat::Result<()> {
    match cmd {
        PersonaCommand::Create { name, system_prompt, description, avatar_url } => {
            let input = PersonaInput {
                name,
                system_prompt,
                description,
                avatar_url,
                example_messages: Vec::new(),
            };
            let rec = session.api().create_persona(&input).await?;
            println!("Created persona {} ({})", rec.name, rec.id);
        }
        PersonaCommand::Delete { id } => {
            let done = session.api().delete_persona(id).await?;
            println!("{} ({})", done.message, done.deleted_persona_id);
        }
        PersonaCommand::Activate { id } => {
            let rec = session.api().activate_persona(id).await?;
            println!("Activated persona {} ({})", rec.name, rec.id);
        }
    }
    Ok(())
}

async fn chat_loop(
    session: &Session<persona_chat::api::transport::HttpTransport>,
    key: &str,
) -> persona_chat::Result<()> {
    let contact = session.contacts().find(key).cloned().ok_or_else(|| {
        persona_chat::ClientError::Validation(format!("unknown contact '{}'", key))
    })?;
    let state = session.subscribe();
    let chat = session.chat();

    for m in chat.select(&contact).await {
        print_message(&contact.display_name, &m);
    }
    println!("-- chatting with {} (empty line to quit) --", contact.display_name);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            break;
        }
        if let Some(reply) = chat.send(&contact, &line).await {
            print_message(&contact.display_name, &reply);
        }
        if *state.borrow() == SessionState::LoggedOut {
            println!("Session expired. Please log in again.");
            break;
        }
    }
    Ok(())
}

fn print_message(name: &str, m: &Message) {
    let who = match &m.sender {
        Sender::Me => "You",
        Sender::System => "!",
        Sender::Contact(_) => name,
    };
    println!("[{}] {}: {}", m.timestamp.format("%H:%M"), who, m.text);
}
