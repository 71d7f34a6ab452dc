use clap::ArgMatches;
use log::{info, warn};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::modbus::client::ModbusClientTrait;
use crate::modbus::session::{ConnectionSession, SessionEvent};
use crate::output::{formatter_for, EventFormatter};
use crate::utils::error::ModbusError;

/// One line typed at the interactive console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Connect {
        host: Option<String>,
        port: Option<String>,
    },
    Disconnect,
    Read {
        address: Option<String>,
        data_type: Option<String>,
    },
    Status,
    Clear,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return ConsoleCommand::Empty;
        };
        let mut arg = || words.next().map(str::to_string);
        match head.to_ascii_lowercase().as_str() {
            "connect" | "c" => ConsoleCommand::Connect {
                host: arg(),
                port: arg(),
            },
            "disconnect" | "d" => ConsoleCommand::Disconnect,
            "read" | "r" => ConsoleCommand::Read {
                address: arg(),
                data_type: arg(),
            },
            "status" | "s" => ConsoleCommand::Status,
            "clear" => ConsoleCommand::Clear,
            "help" | "h" | "?" => ConsoleCommand::Help,
            "quit" | "exit" | "q" => ConsoleCommand::Quit,
            other => ConsoleCommand::Unknown(other.to_string()),
        }
    }
}

pub const CONSOLE_HELP: &str = "\
Commands:
  connect [host] [port]   open the connection (defaults from config)
  read [address] [type]   read bool|short|int|float|double|string
  disconnect              close the connection
  status                  show connection state and counters
  clear                   reset the received counter on screen
  help                    show this text
  quit                    disconnect and exit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleAction {
    Continue,
    Exit,
}

/// Executes one console command against `client`.
///
/// Command errors are returned; the caller decides whether to keep going.
pub async fn run_console_command(
    command: ConsoleCommand,
    client: &dyn ModbusClientTrait,
    config: &Config,
    display_offset: &mut u64,
) -> Result<ConsoleAction, ModbusError> {
    match command {
        ConsoleCommand::Empty => {}
        ConsoleCommand::Connect { host, port } => {
            let host = host.unwrap_or_else(|| config.connection.host.clone());
            let port = match port {
                Some(p) => p
                    .parse::<u32>()
                    .map_err(|_| ModbusError::ConfigError(format!("invalid port '{}'", p)))?,
                None => config.connection.port,
            };
            *display_offset = 0;
            client.connect(&host, port).await?;
        }
        ConsoleCommand::Disconnect => client.disconnect().await?,
        ConsoleCommand::Read { address, data_type } => {
            let address = address.unwrap_or_else(|| config.request.address.clone());
            let data_type = data_type.unwrap_or_else(|| config.request.data_type.to_string());
            client.read_register(&address, &data_type).await?;
        }
        ConsoleCommand::Status => {
            println!(
                "state: {}, received: {}",
                client.connection_state(),
                client.received_count().saturating_sub(*display_offset)
            );
        }
        ConsoleCommand::Clear => {
            *display_offset = client.received_count();
            println!("received counter cleared");
        }
        ConsoleCommand::Help => println!("{}", CONSOLE_HELP),
        ConsoleCommand::Quit => {
            client.disconnect().await?;
            return Ok(ConsoleAction::Exit);
        }
        ConsoleCommand::Unknown(word) => {
            println!("unknown command '{}', type 'help'", word);
        }
    }
    Ok(ConsoleAction::Continue)
}

/// Prints events until the channel closes.
pub fn spawn_event_printer(
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    formatter: Box<dyn EventFormatter>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(text) = formatter.format_event(&event) {
                println!("{}", text);
            }
        }
    })
}

pub async fn run_console(config: &Config) -> Result<(), ModbusError> {
    let (session, events) = ConnectionSession::new(config.session_options());
    info!("🆔 Console session {}", session.session_id());
    let formatter = formatter_for(&config.display);
    print!("{}", formatter.format_header());
    println!("{}", CONSOLE_HELP);
    let printer = spawn_event_printer(events, formatter);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut display_offset = 0u64;

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Interrupted, closing session");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };

        let command = ConsoleCommand::parse(&line);
        match run_console_command(command, &session, config, &mut display_offset).await {
            Ok(ConsoleAction::Exit) => break,
            Ok(ConsoleAction::Continue) => {}
            Err(e) if e.is_configuration_error() => println!("⚠️  {}", e),
            Err(e) => println!("❌ {}", e),
        }
    }

    session.disconnect().await;
    drop(session);
    if let Err(e) = printer.await {
        warn!("event printer stopped abnormally: {}", e);
    }
    Ok(())
}

/// Connects, issues one read and prints what comes back.
pub async fn run_single_read(
    config: &Config,
    address: &str,
    data_type: &str,
    wait: Duration,
) -> Result<bool, ModbusError> {
    let (session, mut events) = ConnectionSession::new(config.session_options());
    let formatter = formatter_for(&config.display);

    session
        .connect(&config.connection.host, config.connection.port)
        .await?;
    let sent = session.read_text(address, data_type).await;
    if let Err(e) = sent {
        session.disconnect().await;
        return Err(e);
    }

    let mut answered = false;
    let deadline = tokio::time::sleep(wait);
    tokio::pin!(deadline);
    loop {
        let event = tokio::select! {
            _ = &mut deadline => {
                warn!("⏰ No answer within {:?}", wait);
                break;
            }
            event = events.recv() => event,
        };
        let Some(event) = event else {
            break;
        };
        if let Some(text) = formatter.format_event(&event) {
            println!("{}", text);
        }
        match event {
            SessionEvent::DataReceived(_) => {
                answered = true;
                break;
            }
            SessionEvent::ResponseTimeout { .. } | SessionEvent::ReceiveFailed(_) => break,
            _ => {}
        }
    }

    session.disconnect().await;
    while let Ok(event) = events.try_recv() {
        if let Some(text) = formatter.format_event(&event) {
            println!("{}", text);
        }
    }
    Ok(answered)
}

/// Runs the selected subcommand. Returns `false` when none matched.
pub async fn handle_subcommands(
    matches: &ArgMatches,
    config: &Config,
) -> Result<bool, ModbusError> {
    if let Some(matches) = matches.subcommand_matches("read") {
        let address = matches
            .get_one::<String>("address")
            .cloned()
            .unwrap_or_else(|| config.request.address.clone());
        let data_type = matches
            .get_one::<String>("type")
            .cloned()
            .unwrap_or_else(|| config.request.data_type.to_string());
        let wait_ms = matches.get_one::<u64>("wait-ms").copied().unwrap_or(3000);

        info!("🔍 Reading {} as {}", address, data_type);
        let answered =
            run_single_read(config, &address, &data_type, Duration::from_millis(wait_ms)).await?;
        if !answered {
            return Err(ModbusError::Timeout);
        }
        return Ok(true);
    }

    if let Some(matches) = matches.subcommand_matches("init-config") {
        let path = matches
            .get_one::<String>("file")
            .cloned()
            .unwrap_or_else(|| "plc_link.toml".to_string());
        config.save_to_file(&path)?;
        println!("✅ Configuration written to {}", path);
        return Ok(true);
    }

    if matches.subcommand_matches("console").is_some() {
        run_console(config).await?;
        return Ok(true);
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::session::{ConnectionState, SessionOptions};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_console_commands() {
        assert_eq!(ConsoleCommand::parse("   "), ConsoleCommand::Empty);
        assert_eq!(
            ConsoleCommand::parse("connect 10.0.0.2 1502"),
            ConsoleCommand::Connect {
                host: Some("10.0.0.2".into()),
                port: Some("1502".into())
            }
        );
        assert_eq!(
            ConsoleCommand::parse("READ 100"),
            ConsoleCommand::Read {
                address: Some("100".into()),
                data_type: None
            }
        );
        assert_eq!(ConsoleCommand::parse("q"), ConsoleCommand::Quit);
        assert_eq!(
            ConsoleCommand::parse("write 1 2"),
            ConsoleCommand::Unknown("write".into())
        );
    }

    #[tokio::test]
    async fn test_read_before_connect_is_an_error() {
        let (session, _events) = ConnectionSession::new(SessionOptions::default());
        let config = Config::default();
        let mut offset = 0;
        let result = run_console_command(
            ConsoleCommand::Read {
                address: None,
                data_type: None,
            },
            &session,
            &config,
            &mut offset,
        )
        .await;
        assert!(matches!(result, Err(ModbusError::NotConnected)));
    }

    #[tokio::test]
    async fn test_bad_port_text_is_rejected() {
        let (session, _events) = ConnectionSession::new(SessionOptions::default());
        let config = Config::default();
        let mut offset = 0;
        let result = run_console_command(
            ConsoleCommand::Connect {
                host: None,
                port: Some("http".into()),
            },
            &session,
            &config,
            &mut offset,
        )
        .await;
        assert!(matches!(result, Err(ModbusError::ConfigError(_))));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_console_connect_read_quit() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 12];
            socket.read_exact(&mut request).await.unwrap();
            let mut rest = Vec::new();
            let _ = socket.read_to_end(&mut rest).await;
            request
        });

        let (session, _events) = ConnectionSession::new(SessionOptions::default());
        let config = Config::default();
        let mut offset = 0;

        let connect = ConsoleCommand::parse(&format!("connect 127.0.0.1 {}", port));
        let action = run_console_command(connect, &session, &config, &mut offset)
            .await
            .unwrap();
        assert_eq!(action, ConsoleAction::Continue);
        assert_eq!(session.state(), ConnectionState::Connected);

        let read = ConsoleCommand::parse("read 7 short");
        run_console_command(read, &session, &config, &mut offset)
            .await
            .unwrap();

        let action = run_console_command(ConsoleCommand::Quit, &session, &config, &mut offset)
            .await
            .unwrap();
        assert_eq!(action, ConsoleAction::Exit);
        assert_eq!(session.state(), ConnectionState::Disconnected);

        let request = server.await.unwrap();
        assert_eq!(&request[7..12], &[0x03, 0x00, 0x07, 0x00, 0x01]);
    }
}
