use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use env_logger::Env;
use log::{debug, info};

use plc_link::cli::commands::{handle_subcommands, run_console};
use plc_link::config::Config;
use plc_link::modbus::DataType;
use plc_link::VERSION;

fn build_cli() -> Command {
    let type_help = format!(
        "Data type to read ({})",
        DataType::ALL
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join("|")
    );

    Command::new("plc_link")
        .version(VERSION)
        .about("Modbus TCP client for reading single PLC values")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file")
                .global(true),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("PLC host name or IP address")
                .global(true),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("PLC TCP port")
                .global(true),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_name("FORMAT")
                .help("Output format (console|json)")
                .global(true),
        )
        .arg(
            Arg::new("hex")
                .long("hex")
                .help("Show received frames as hex instead of decoded values")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("read")
                .about("Connect, read one value and exit")
                .arg(
                    Arg::new("address")
                        .value_name("ADDRESS")
                        .help("Register or coil address (0-65535)"),
                )
                .arg(
                    Arg::new("type")
                        .short('t')
                        .long("type")
                        .value_name("TYPE")
                        .help(type_help),
                )
                .arg(
                    Arg::new("wait-ms")
                        .long("wait-ms")
                        .value_name("MS")
                        .help("How long to wait for the answer")
                        .value_parser(value_parser!(u64))
                        .default_value("3000"),
                ),
        )
        .subcommand(Command::new("console").about("Interactive console (default)"))
        .subcommand(
            Command::new("init-config")
                .about("Write a configuration file with default values")
                .arg(
                    Arg::new("file")
                        .value_name("FILE")
                        .help("Destination path")
                        .default_value("plc_link.toml"),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path))?,
        None => Config::default(),
    };
    config
        .apply_matches(&matches)
        .context("invalid command line options")?;

    env_logger::Builder::from_env(Env::default().default_filter_or(config.log_level.as_str()))
        .init();

    info!("🚀 plc_link {} starting", VERSION);
    debug!("Target {}:{}", config.connection.host, config.connection.port);

    if !handle_subcommands(&matches, &config).await? {
        run_console(&config).await?;
    }

    info!("👋 Bye");
    Ok(())
}
