use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use colored::Colorize;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

use galaxy::cli::{Cli, Command};
use galaxy::config::{self, Config};
use galaxy::diagnostics::{DiagnosticScanner, Suggestion};
use galaxy::providers::ollama::OllamaProvider;
use galaxy::providers::{self, ChatModel, Message};
use galaxy::relay::SessionEvent;
use galaxy::session::{SessionManager, SessionState, ShellKind};

/// Ctrl-Q ends the terminal bridge.
const QUIT_BYTE: u8 = 0x11;

fn init_tracing() {
    let filter = EnvFilter::try_from_env("GALAXY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "galaxy", &mut io::stdout());
        return Ok(());
    }

    let mut config = Config::load();
    config.apply_env_overrides();

    match cli.command.unwrap_or(Command::Open { path: None }) {
        Command::Open { path } => run_open(config, path).await,
        Command::Chat {
            prompt,
            context_file,
            no_stream,
        } => run_chat(config, prompt, context_file, no_stream).await,
        Command::Predict => run_predict(config).await,
        Command::Config { init } => {
            if init {
                config::print_default_config();
            } else if let Some(path) = Config::config_path() {
                println!("{}", path.display());
            }
            Ok(())
        }
    }
}

// ============================================================================
// Terminal bridge
// ============================================================================

async fn run_open(config: Config, path: Option<PathBuf>) -> Result<()> {
    let dir = match path {
        Some(p) => p,
        None => std::env::current_dir().context("cannot determine current directory")?,
    };
    let dir = dir.canonicalize().unwrap_or(dir);
    if !dir.is_dir() {
        bail!("not a directory: {}", dir.display());
    }

    let manager = SessionManager::new(config);
    let mut events = manager.subscribe();

    let (suggestion_tx, mut suggestions) = mpsc::unbounded_channel();
    spawn_scanner(manager.subscribe(), suggestion_tx);

    let (input_tx, mut input) = mpsc::unbounded_channel::<Vec<u8>>();
    spawn_stdin_reader(input_tx);

    let (shutdown_tx, mut shutdown) = mpsc::unbounded_channel::<()>();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .context("failed to install interrupt handler")?;

    if manager.rebind(&dir).await != SessionState::Live {
        bail!("could not start a shell in {}", dir.display());
    }

    println!(
        "{}",
        format!("galaxy - {} - ctrl-q quits", dir.display()).dimmed()
    );
    crossterm::terminal::enable_raw_mode().context("failed to enter raw mode")?;
    let echo_input = manager.shell_kind() == ShellKind::Posix;

    let result = bridge_loop(
        &manager,
        &mut events,
        &mut suggestions,
        &mut input,
        &mut shutdown,
        echo_input,
    )
    .await;

    let _ = crossterm::terminal::disable_raw_mode();
    manager.kill().await;
    println!();
    result
}

/// Pump session events, suggestions, and keyboard input until the session
/// ends or the user quits.
async fn bridge_loop(
    manager: &SessionManager,
    events: &mut broadcast::Receiver<SessionEvent>,
    suggestions: &mut mpsc::UnboundedReceiver<Suggestion>,
    input: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    shutdown: &mut mpsc::UnboundedReceiver<()>,
    echo_input: bool,
) -> Result<()> {
    let mut stdout = io::stdout();
    // At most one suggestion is on screen; a newer one replaces it, and an
    // identical one is only repainted after the display TTL has passed.
    let mut last_shown: Option<(String, Instant)> = None;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::Output(chunk)) => {
                    stdout.write_all(normalize_newlines(&chunk.text).as_bytes())?;
                    stdout.flush()?;
                }
                Ok(SessionEvent::EnvironmentDiscovered { bin_path }) => {
                    let line = format!("Environment configured: {}", bin_path.display());
                    print_banner(&line.green().to_string())?;
                }
                Ok(SessionEvent::DirectorySynchronized { path }) => {
                    let line = format!("Project directory synchronized: {}", path.display());
                    print_banner(&line.cyan().to_string())?;
                }
                Ok(SessionEvent::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            Some(suggestion) = suggestions.recv() => {
                let repaint = match &last_shown {
                    Some((title, at)) => {
                        *title != suggestion.error_title
                            || at.elapsed() >= Suggestion::DISPLAY_TTL
                    }
                    None => true,
                };
                if repaint {
                    print_suggestion(&suggestion)?;
                    last_shown = Some((suggestion.error_title.clone(), Instant::now()));
                }
            }
            Some(bytes) = input.recv() => {
                if bytes.contains(&QUIT_BYTE) {
                    break;
                }
                if echo_input {
                    echo_bytes(&mut stdout, &bytes)?;
                }
                manager.write(&bytes).await;
            }
            Some(()) = shutdown.recv() => break,
        }
    }
    Ok(())
}

/// Forward diagnostic scanning onto its own subscriber so a slow terminal
/// cannot delay detection, and vice versa.
fn spawn_scanner(
    mut rx: broadcast::Receiver<SessionEvent>,
    tx: mpsc::UnboundedSender<Suggestion>,
) {
    tokio::spawn(async move {
        let scanner = DiagnosticScanner::new();
        loop {
            match rx.recv().await {
                Ok(SessionEvent::Output(chunk)) => {
                    for suggestion in scanner.scan(&chunk.text) {
                        if tx.send(suggestion).is_err() {
                            return;
                        }
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}

/// Raw keyboard bytes off stdin, forwarded as they arrive.
fn spawn_stdin_reader(tx: mpsc::UnboundedSender<Vec<u8>>) {
    std::thread::spawn(move || {
        let mut stdin = io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Convert pipe-style line endings to the CRLF a raw-mode terminal needs.
fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "\r\n")
}

/// Local echo for shells that do not echo piped input themselves.
fn echo_bytes(stdout: &mut io::Stdout, bytes: &[u8]) -> io::Result<()> {
    for &b in bytes {
        match b {
            b'\r' | b'\n' => stdout.write_all(b"\r\n")?,
            0x08 | 0x7f => stdout.write_all(b"\x08 \x08")?,
            b if b.is_ascii_control() => {}
            _ => stdout.write_all(&[b])?,
        }
    }
    stdout.flush()
}

fn print_banner(text: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "\r\n{text}\r\n")?;
    stdout.flush()
}

fn print_suggestion(suggestion: &Suggestion) -> io::Result<()> {
    let mut stdout = io::stdout();
    write!(
        stdout,
        "\r\n{} {}\r\n",
        "●".red(),
        suggestion.error_title.bold()
    )?;
    for line in textwrap::wrap(&suggestion.fix_description, 76) {
        write!(stdout, "  {line}\r\n")?;
    }
    write!(
        stdout,
        "{} {} {}\r\n",
        "▸".green(),
        "Fix:".green().bold(),
        suggestion.remediation_command
    )?;
    stdout.flush()
}

// ============================================================================
// Chat
// ============================================================================

async fn run_chat(
    config: Config,
    prompt: Vec<String>,
    context_file: Option<PathBuf>,
    no_stream: bool,
) -> Result<()> {
    let provider: Box<dyn ChatModel> = Box::new(OllamaProvider::from_config(&config.ai));

    if !provider.is_available().await {
        println!(
            "{} model server is offline - start Ollama and try again",
            "!".yellow().bold()
        );
    }
    let info = provider.model_info().await;
    println!("{}", format!("Model: {}", info.name).dimmed());

    let context = match &context_file {
        Some(path) => Some(std::fs::read_to_string(path).with_context(|| {
            format!("failed to read context file: {}", path.display())
        })?),
        None => None,
    };

    let mut history: Vec<Message> = Vec::new();

    if !prompt.is_empty() {
        history.push(Message::user(prompt.join(" ")));
        let reply = send_chat(provider.as_ref(), &history, context.as_deref(), no_stream).await?;
        report_file_action(&reply);
        return Ok(());
    }

    // REPL: keep the conversation until EOF or an exit command.
    loop {
        let Some(line) = read_line("you> ").await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        history.push(Message::user(line));
        match send_chat(provider.as_ref(), &history, context.as_deref(), no_stream).await {
            Ok(reply) => {
                report_file_action(&reply);
                history.push(reply);
            }
            Err(err) => {
                println!("{} {}", "Error:".red().bold(), err);
                history.pop();
            }
        }
    }
    Ok(())
}

/// Send one completion and print the reply, streaming tokens unless asked
/// not to. Returns the full assistant message.
async fn send_chat(
    provider: &dyn ChatModel,
    history: &[Message],
    context: Option<&str>,
    no_stream: bool,
) -> Result<Message> {
    if no_stream {
        let reply = provider.chat(history, context).await?;
        println!("{}", reply.content);
        Ok(reply)
    } else {
        let reply = provider
            .chat_streaming(
                history,
                context,
                Box::new(|token: &str| {
                    print!("{token}");
                    io::stdout().flush()?;
                    Ok(true)
                }),
            )
            .await?;
        println!();
        Ok(reply)
    }
}

/// Surface a structured file-creation instruction without executing it.
fn report_file_action(reply: &Message) {
    if let Some(action) = providers::parse_file_action(&reply.content) {
        println!();
        println!(
            "{} {}",
            "▸".blue(),
            "File creation proposed".blue().bold()
        );
        println!("  path: {}", action.path);
        println!(
            "  {} bytes of content (not written - apply it from the editor)",
            action.content.len()
        );
    }
}

async fn read_line(prompt_text: &str) -> Result<Option<String>> {
    print!("{prompt_text}");
    io::stdout().flush()?;
    let line = tokio::task::spawn_blocking(|| {
        let mut buf = String::new();
        match io::stdin().read_line(&mut buf) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(buf),
        }
    })
    .await?;
    Ok(line)
}

// ============================================================================
// Inline completion
// ============================================================================

async fn run_predict(config: Config) -> Result<()> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context("failed to read stdin")?;
    if input.trim().is_empty() {
        bail!("nothing to complete - pipe a code fragment on stdin");
    }

    let provider = OllamaProvider::from_config(&config.ai);
    let completion = provider.predict(&input).await?;
    println!("{}", completion.trim_end());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_newlines_produces_crlf() {
        assert_eq!(normalize_newlines("a\nb"), "a\r\nb");
        assert_eq!(normalize_newlines("a\r\nb"), "a\r\nb");
        assert_eq!(normalize_newlines("a\r\nb\nc"), "a\r\nb\r\nc");
    }

    #[test]
    fn quit_byte_is_ctrl_q() {
        assert_eq!(QUIT_BYTE, 0x11);
    }
}
