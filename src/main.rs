//! Purpose: `pdsview` CLI entry point.
//! Role: Binary crate root; parses args, runs the read server or its helper commands.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::io::{self, IsTerminal};
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{
    Args, CommandFactory, Parser, Subcommand, ValueEnum, ValueHint,
    error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};

mod serve;
mod serve_init;

use pdsview::api::{DEFAULT_PAGE_LIMIT, Error, ErrorKind, MAX_PAGE_LIMIT, to_exit_code};

const DEFAULT_OVERLAY_WINDOW_SECS: u64 = 600;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse_from(std::env::args_os()) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Internal)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::InvalidRequest)
                        .with_message(clap_error_summary(&err))
                        .with_hint("Try `pdsview --help`."),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    dispatch_command(cli.command).map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "pdsview",
    version,
    about = "Paginated, block-aware read views for a personal data server",
    long_about = None,
    after_help = r#"EXAMPLES
  $ pdsview serve --data ./fixture.json
  $ pdsview serve init --key-file ./signing.key
  $ pdsview serve --aggregator-url https://appview.example.com \
      --aggregator-did did:web:appview.example.com \
      --signing-key-file ./signing.key --proxy-reads
  $ curl 'http://127.0.0.1:2584/xrpc/app.bsky.graph.getFollows?actor=alice.test&limit=2'"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Serve the XRPC read endpoints",
        long_about = r#"Serve getProfile, getAuthorFeed, getFollows and getListMutes over HTTP.

Reads are answered from the local index, or proxied to an aggregator with
the requester's own unindexed records overlaid."#,
        after_help = r#"EXAMPLES
  $ pdsview serve --data ./fixture.json
  $ pdsview serve --bind 127.0.0.1:2584 --max-limit 50 --default-limit 25
  $ pdsview serve --data ./fixture.json check

NOTES
  - Loopback binds only unless --allow-non-loopback is set
  - Set RUST_LOG=debug for per-request read path logging"#
    )]
    Serve {
        #[command(subcommand)]
        subcommand: Option<ServeSubcommand>,
        #[command(flatten)]
        run: ServeRunArgs,
    },
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completion scripts",
        after_help = r#"EXAMPLES
  $ pdsview completion bash > ~/.local/share/bash-completion/completions/pdsview
  $ pdsview completion zsh > ~/.zfunc/_pdsview"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ServeSubcommand {
    #[command(
        about = "Generate the service signing key for proxied reads",
        after_help = r#"EXAMPLES
  $ pdsview serve init
  $ pdsview serve init --key-file ./keys/signing.key --force

NOTES
  - Key material is written to disk and never printed
  - Refuses to overwrite an existing key unless --force is set"#
    )]
    Init(ServeInitArgs),
    #[command(
        about = "Validate serve config and print the effective settings without starting",
        after_help = r#"EXAMPLES
  $ pdsview serve check
  $ pdsview serve --data ./fixture.json check --json

NOTES
  - Exits non-zero when config is invalid
  - Does not bind sockets"#
    )]
    Check {
        #[arg(long, help = "Emit JSON instead of human-readable output")]
        json: bool,
    },
}

#[derive(Args)]
struct ServeInitArgs {
    #[arg(
        long,
        default_value = "signing.key",
        value_name = "PATH",
        help = "Signing key output path",
        value_hint = ValueHint::FilePath
    )]
    key_file: PathBuf,
    #[arg(
        long,
        default_value = "https://appview.example.com",
        help = "Aggregator URL used in printed next commands"
    )]
    aggregator_url: String,
    #[arg(
        long,
        default_value = "did:web:appview.example.com",
        help = "Aggregator DID used in printed next commands"
    )]
    aggregator_did: String,
    #[arg(long, help = "Overwrite an existing key file")]
    force: bool,
}

#[derive(Args)]
struct ServeRunArgs {
    #[arg(
        long,
        default_value = "127.0.0.1:2584",
        help = "Bind address",
        help_heading = "Connection"
    )]
    bind: String,
    #[arg(
        long,
        value_name = "PATH",
        help = "JSON index fixture (actors, follows, posts, blocks, mutes, lists, sessions)",
        value_hint = ValueHint::FilePath,
        help_heading = "Data"
    )]
    data: Option<PathBuf>,
    #[arg(
        long,
        default_value = "did:web:localhost",
        help = "DID this server presents as on proxied calls",
        help_heading = "Data"
    )]
    service_did: String,
    #[arg(
        long,
        value_name = "URL",
        help = "Aggregator base URL",
        help_heading = "Aggregator"
    )]
    aggregator_url: Option<String>,
    #[arg(
        long,
        value_name = "DID",
        help = "Aggregator service DID (audience of minted tokens)",
        help_heading = "Aggregator"
    )]
    aggregator_did: Option<String>,
    #[arg(long, value_name = "PATH", help = "Trust this CA (PEM) for the aggregator", value_hint = ValueHint::FilePath, help_heading = "Aggregator")]
    aggregator_ca_file: Option<PathBuf>,
    #[arg(
        long,
        help = "Answer reads by proxying to the aggregator",
        help_heading = "Aggregator"
    )]
    proxy_reads: bool,
    #[arg(long, value_name = "PATH", help = "Hex signing key for service tokens", value_hint = ValueHint::FilePath, help_heading = "Authentication")]
    signing_key_file: Option<PathBuf>,
    #[arg(
        long,
        help = "Bearer token granting role credentials (dev-only; prefer --admin-token-file)",
        help_heading = "Authentication"
    )]
    admin_token: Option<String>,
    #[arg(long, value_name = "PATH", help = "Read the admin token from file", value_hint = ValueHint::FilePath, help_heading = "Authentication")]
    admin_token_file: Option<PathBuf>,
    #[arg(
        long,
        default_value_t = DEFAULT_PAGE_LIMIT,
        help = "Page size when a request omits limit",
        help_heading = "Paging"
    )]
    default_limit: usize,
    #[arg(
        long,
        default_value_t = MAX_PAGE_LIMIT,
        help = "Largest page size; bigger requests are clamped",
        help_heading = "Paging"
    )]
    max_limit: usize,
    #[arg(
        long,
        default_value_t = DEFAULT_OVERLAY_WINDOW_SECS,
        help = "How far back local records may still be unindexed upstream",
        help_heading = "Paging"
    )]
    overlay_window_secs: u64,
    #[arg(
        long,
        default_value_t = DEFAULT_REQUEST_TIMEOUT_MS,
        help = "Per-request deadline in milliseconds",
        help_heading = "Safety"
    )]
    request_timeout_ms: u64,
    #[arg(long, help = "Allow non-loopback binds", help_heading = "Safety")]
    allow_non_loopback: bool,
}

fn dispatch_command(command: Command) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "pdsview", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Serve { subcommand, run } => match subcommand {
            Some(ServeSubcommand::Init(args)) => {
                let result = serve_init::init(serve_init::ServeInitConfig {
                    key_file: args.key_file,
                    aggregator_url: args.aggregator_url,
                    aggregator_did: args.aggregator_did,
                    force: args.force,
                })?;
                if io::stdout().is_terminal() {
                    let headline = if result.overwrote_existing {
                        "Signing key rotated."
                    } else {
                        "Signing key created."
                    };
                    println!("{headline}");
                    println!("  {}", result.key_file);
                    println!();
                    println!("Next:");
                    for command in &result.server_commands {
                        println!("  $ {command}");
                    }
                } else {
                    emit_json(json!({
                        "init": {
                            "key_file": result.key_file,
                            "overwrote_existing": result.overwrote_existing,
                            "server_commands": result.server_commands,
                        }
                    }));
                }
                Ok(RunOutcome::ok())
            }
            Some(ServeSubcommand::Check { json }) => {
                let config = serve_config_from_run_args(run)?;
                let report = serve::check(&config)?;
                if json {
                    emit_json(report);
                } else {
                    emit_serve_check_human(&report);
                }
                Ok(RunOutcome::ok())
            }
            None => {
                let config = serve_config_from_run_args(run)?;
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()
                    .map_err(|err| {
                        Error::new(ErrorKind::Internal)
                            .with_message("failed to start runtime")
                            .with_source(err)
                    })?;
                runtime.block_on(serve::serve(config))?;
                Ok(RunOutcome::ok())
            }
        },
    }
}

fn serve_config_from_run_args(run: ServeRunArgs) -> Result<serve::ServeConfig, Error> {
    let bind: SocketAddr = run.bind.parse().map_err(|_| {
        Error::new(ErrorKind::InvalidRequest)
            .with_message("invalid bind address")
            .with_hint("Use a host:port value like 127.0.0.1:2584.")
    })?;
    if run.admin_token.is_some() && run.admin_token_file.is_some() {
        return Err(Error::new(ErrorKind::InvalidRequest)
            .with_message("--admin-token and --admin-token-file are mutually exclusive")
            .with_hint("Pass only one of them."));
    }
    let admin_token = match run.admin_token_file {
        Some(path) => Some(read_token_file(&path)?),
        None => run.admin_token,
    };
    Ok(serve::ServeConfig {
        bind,
        data: run.data,
        aggregator_url: run.aggregator_url,
        aggregator_did: run.aggregator_did,
        aggregator_ca_file: run.aggregator_ca_file,
        proxy_reads: run.proxy_reads,
        service_did: run.service_did,
        signing_key_file: run.signing_key_file,
        admin_token,
        default_limit: run.default_limit,
        max_limit: run.max_limit,
        overlay_window_secs: run.overlay_window_secs,
        request_timeout_ms: run.request_timeout_ms,
        allow_non_loopback: run.allow_non_loopback,
    })
}

fn read_token_file(path: &std::path::Path) -> Result<String, Error> {
    let text = std::fs::read_to_string(path).map_err(|err| {
        Error::new(ErrorKind::InvalidRequest)
            .with_message(format!("failed to read token file {}", path.display()))
            .with_source(err)
    })?;
    let token = text.trim();
    if token.is_empty() {
        return Err(Error::new(ErrorKind::InvalidRequest)
            .with_message(format!("token file {} is empty", path.display())));
    }
    Ok(token.to_string())
}

fn emit_serve_check_human(report: &Value) {
    let check = &report["check"];
    println!("Config OK.");
    for key in [
        "bind",
        "service_did",
        "proxy_reads",
        "aggregator_url",
        "aggregator_did",
        "default_limit",
        "max_limit",
        "overlay_window_secs",
        "request_timeout_ms",
    ] {
        let value = match &check[key] {
            Value::Null => "-".to_string(),
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        println!("  {key}: {value}");
    }
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    match err.message() {
        Some(message) => message.to_string(),
        None => err.kind().reason().to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(actor) = err.actor() {
        inner.insert("actor".to_string(), json!(actor));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = vec![format!(
        "{} {}",
        colorize_label("error:", use_color, "31"),
        error_message(err)
    )];
    if let Some(hint) = err.hint() {
        lines.push(format!("{} {hint}", colorize_label("hint:", use_color, "33")));
    }
    for cause in error_causes(err) {
        lines.push(format!("  caused by: {cause}"));
    }
    lines.join("\n")
}

fn colorize_label(label: &str, enabled: bool, ansi: &str) -> String {
    if !enabled {
        return label.to_string();
    }
    format!("\x1b[1;{ansi}m{label}\x1b[0m")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command, ServeSubcommand, error_json, serve_config_from_run_args};
    use clap::Parser;
    use pdsview::api::{Error, ErrorKind};

    #[test]
    fn serve_defaults_map_into_config() {
        let cli = Cli::try_parse_from(["pdsview", "serve"]).expect("parse");
        let Command::Serve { subcommand, run } = cli.command else {
            panic!("expected serve");
        };
        assert!(subcommand.is_none());
        let config = serve_config_from_run_args(run).expect("config");
        assert_eq!(config.bind.to_string(), "127.0.0.1:2584");
        assert_eq!(config.default_limit, 50);
        assert_eq!(config.max_limit, 100);
        assert_eq!(config.overlay_window_secs, 600);
        assert!(!config.proxy_reads);
    }

    #[test]
    fn serve_check_parses_after_run_args() {
        let cli = Cli::try_parse_from(["pdsview", "serve", "--max-limit", "20", "check", "--json"])
            .expect("parse");
        let Command::Serve { subcommand, run } = cli.command else {
            panic!("expected serve");
        };
        assert!(matches!(subcommand, Some(ServeSubcommand::Check { json: true })));
        assert_eq!(run.max_limit, 20);
    }

    #[test]
    fn bad_bind_is_invalid_request() {
        let cli = Cli::try_parse_from(["pdsview", "serve", "--bind", "nope"]).expect("parse");
        let Command::Serve { run, .. } = cli.command else {
            panic!("expected serve");
        };
        let err = serve_config_from_run_args(run).err().expect("bind error");
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn error_json_carries_kind_hint_and_actor() {
        let err = Error::new(ErrorKind::BlockedActor)
            .with_message("Requester has blocked actor")
            .with_hint("Unblock to view")
            .with_actor("did:ex:bob");
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], "BlockedActor");
        assert_eq!(value["error"]["hint"], "Unblock to view");
        assert_eq!(value["error"]["actor"], "did:ex:bob");
        assert!(value["error"].get("causes").is_none());
    }
}
