//! ClinAI terminal client
//!
//! Chat with the clinic agent by typing, or press `/mic` and speak: the recording ends by
//! itself after a few seconds of silence. Agent replies are spoken through the default
//! output device.

use anyhow::Context;
use chrono::NaiveDate;
use clinai_core::{ClientConfig, HttpTurnDispatcher, Role, SessionStateMachine, StartSessionRequest};
use clinai_voice::{CpalMicrophone, RodioOutput, VoiceClient};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Client = VoiceClient<HttpTurnDispatcher, CpalMicrophone, RodioOutput>;
type Input = Lines<BufReader<Stdin>>;

const HELP: &str = "Commands: /mic (start/stop recording), /voice on|off, /reset (new chat), /help, /quit";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Text(String),
    Mic,
    Voice(bool),
    Reset,
    Help,
    Quit,
    Unknown(String),
    Empty,
}

impl Command {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }
        if !line.starts_with('/') {
            return Command::Text(line.to_string());
        }
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("/mic"), None) => Command::Mic,
            (Some("/voice"), Some("on")) => Command::Voice(true),
            (Some("/voice"), Some("off")) => Command::Voice(false),
            (Some("/reset"), None) => Command::Reset,
            (Some("/help"), None) => Command::Help,
            (Some("/quit"), None) | (Some("/exit"), None) => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[clinai] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ClientConfig::load().context("load client config")?;
    let dispatcher =
        Arc::new(HttpTurnDispatcher::from_config(&config).context("build agent HTTP client")?);
    let session = Arc::new(SessionStateMachine::new(dispatcher));
    let client: Client = VoiceClient::new(
        session,
        CpalMicrophone::from_config(&config),
        RodioOutput::new(),
        &config,
    )
    .context("build voice client")?;

    tracing::info!(
        api_base_url = %config.api_base_url,
        agent_voice = config.agent_voice_enabled,
        "ClinAI client started"
    );

    println!("🩺 ClinAI clinic assistant");
    println!("{}", HELP);

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let Some(request) = intake(&mut input).await? else {
        return Ok(());
    };
    client.start_session(&request).await;
    let mut printed = print_new_messages(&client, 0);

    loop {
        tokio::select! {
            line = input.next_line() => {
                let Some(line) = line? else { break };
                match Command::parse(&line) {
                    Command::Quit => break,
                    Command::Empty => {}
                    Command::Text(text) => client.send_text(&text).await,
                    Command::Mic => {
                        client.toggle_microphone().await;
                        if client.capture().is_recording() {
                            println!("🎙️  Listening... (stops after silence, or /mic)");
                        }
                    }
                    Command::Voice(on) => {
                        client.set_agent_voice(on);
                        println!("🔊 Agent voice {}", if on { "on" } else { "off" });
                    }
                    Command::Reset => {
                        client.reset().await;
                        printed = 0;
                        println!("🔄 New chat");
                        match intake(&mut input).await? {
                            Some(request) => client.start_session(&request).await,
                            None => break,
                        }
                    }
                    Command::Help => println!("{}", HELP),
                    Command::Unknown(cmd) => println!("Unknown command {:?}. {}", cmd, HELP),
                }
            }
            outcome = client.next_capture_outcome() => {
                match outcome {
                    Some(outcome) => client.handle_capture_outcome(outcome).await,
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("CTRL-C received; shutting down");
                break;
            }
        }
        printed = print_new_messages(&client, printed);
    }

    client.reset().await;
    Ok(())
}

/// Print messages appended since `printed`; returns the new count.
fn print_new_messages(client: &Client, printed: usize) -> usize {
    let messages = client.session().messages();
    let start = if printed > messages.len() { 0 } else { printed };
    for message in &messages[start..] {
        let label = match message.role {
            Role::User => "you  ›",
            Role::Agent => "agent›",
            Role::SystemNotice => "  ⚠️ ",
        };
        println!("{} {}", label, message.content);
    }
    messages.len()
}

async fn prompt(input: &mut Input, label: &str) -> anyhow::Result<Option<String>> {
    print!("{}: ", label);
    std::io::stdout().flush()?;
    Ok(input.next_line().await?.map(|l| l.trim().to_string()))
}

/// Prompt until a non-empty answer. `None` on end of input.
async fn prompt_required(input: &mut Input, label: &str) -> anyhow::Result<Option<String>> {
    loop {
        match prompt(input, label).await? {
            None => return Ok(None),
            Some(answer) if !answer.is_empty() => return Ok(Some(answer)),
            Some(_) => continue,
        }
    }
}

/// Collect patient identity. `None` when stdin closes mid-way.
async fn intake(input: &mut Input) -> anyhow::Result<Option<StartSessionRequest>> {
    let Some(phone) = prompt_required(input, "Phone number").await? else {
        return Ok(None);
    };
    let Some(returning) = prompt_required(input, "Returning patient? [y/n]").await? else {
        return Ok(None);
    };
    if returning.to_ascii_lowercase().starts_with('y') {
        return Ok(Some(StartSessionRequest::returning(phone)));
    }

    let Some(first_name) = prompt_required(input, "First name").await? else {
        return Ok(None);
    };
    let Some(last_name) = prompt_required(input, "Last name").await? else {
        return Ok(None);
    };
    let dob = loop {
        let Some(dob) = prompt_required(input, "Date of birth (YYYY-MM-DD)").await? else {
            return Ok(None);
        };
        match NaiveDate::parse_from_str(&dob, "%Y-%m-%d") {
            Ok(date) => break date.format("%Y-%m-%d").to_string(),
            Err(_) => println!("Please use the YYYY-MM-DD format."),
        }
    };
    Ok(Some(StartSessionRequest::new_patient(
        first_name, last_name, phone, dob,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("/mic"), Command::Mic);
        assert_eq!(Command::parse(" /voice off "), Command::Voice(false));
        assert_eq!(Command::parse("/voice on"), Command::Voice(true));
        assert_eq!(Command::parse("/reset"), Command::Reset);
        assert_eq!(Command::parse("/quit"), Command::Quit);
        assert_eq!(Command::parse("   "), Command::Empty);
    }

    #[test]
    fn plain_text_is_a_turn() {
        assert_eq!(
            Command::parse("I need to refill my prescription"),
            Command::Text("I need to refill my prescription".into())
        );
    }

    #[test]
    fn malformed_commands_are_unknown() {
        assert!(matches!(Command::parse("/voice loud"), Command::Unknown(_)));
        assert!(matches!(Command::parse("/mic now"), Command::Unknown(_)));
    }
}
