//! Motif Studio CLI entrypoint.

use clap::error::ErrorKind;
use clap::Parser;
use motifstudio::cli::commands::{
    Cli, Commands, HostCommands, MotifSource, ProviderCommands, QueryCommands, ServeArgs,
    UploadCommands,
};
use motifstudio::cli::output::{output, output_error, output_rows, CliResponse, OutputFormat};
use motifstudio::core::config::ServerConfig;
use motifstudio::core::context::AppContext;
use motifstudio::core::error::{ExitCode, MotifStudioError, Result};
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a `tracing` filter directive.
const LOG_ENV_VAR: &str = "MOTIFSTUDIO_LOG";

fn parse_format_from_args(args: &[OsString]) -> OutputFormat {
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        let s = arg.to_string_lossy();

        if s == "-f" || s == "--format" {
            if let Some(value) = iter.next() {
                return parse_format_value(&value.to_string_lossy());
            }
        }

        if let Some(value) = s.strip_prefix("--format=") {
            return parse_format_value(value);
        }
    }

    OutputFormat::Table
}

fn parse_format_value(value: &str) -> OutputFormat {
    let v = value.to_lowercase();
    if v == "json" {
        OutputFormat::Json
    } else if v == "yaml" || v == "yml" {
        OutputFormat::Yaml
    } else {
        OutputFormat::Table
    }
}

fn print_enveloped(value: &serde_json::Value, format: OutputFormat) {
    let response = CliResponse::success(value);
    match format {
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string_pretty(&response) {
                println!("{json}");
            }
        }
        OutputFormat::Yaml => {
            if let Ok(yaml) = serde_yaml::to_string(&response) {
                print!("{yaml}");
            }
        }
        OutputFormat::Table => {}
    }
}

fn output_help(help: &str, format: OutputFormat) {
    match format {
        OutputFormat::Table => print!("{help}"),
        _ => print_enveloped(&serde_json::json!({ "help": help }), format),
    }
}

fn output_version(format: OutputFormat) {
    let version = env!("CARGO_PKG_VERSION");
    match format {
        OutputFormat::Table => println!("motifstudio {version}"),
        _ => print_enveloped(
            &serde_json::json!({ "name": "motifstudio", "version": version }),
            format,
        ),
    }
}

fn handle_clap_error(err: &clap::Error, format: OutputFormat) -> ExitCode {
    match err.kind() {
        ErrorKind::DisplayHelp => {
            let rendered = err.render().to_string();
            output_help(&rendered, format);
            ExitCode::Success
        }
        ErrorKind::DisplayVersion => {
            output_version(format);
            ExitCode::Success
        }
        _ => {
            eprintln!("{}", err.render());
            ExitCode::Error
        }
    }
}

/// Installs the stderr log subscriber. One-shot commands only surface
/// warnings unless `-v` or `MOTIFSTUDIO_LOG` asks for more.
fn init_logging(cli: &Cli) {
    let default_level = if cli.verbose {
        "debug"
    } else if matches!(cli.command, Some(Commands::Serve(_))) {
        "info"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let is_broken_pipe = info
            .payload()
            .downcast_ref::<&str>()
            .is_some_and(|s| s.contains("Broken pipe"))
            || info
                .payload()
                .downcast_ref::<String>()
                .is_some_and(|s| s.contains("Broken pipe"));

        if is_broken_pipe {
            return;
        }

        default_hook(info);
    }));

    let args: Vec<OsString> = std::env::args_os().collect();
    let format = parse_format_from_args(&args);

    let result = std::panic::catch_unwind(|| Cli::try_parse_from(&args).map(run));

    match result {
        Ok(Ok(exit_code)) => process::exit(i32::from(exit_code)),
        Ok(Err(e)) => process::exit(i32::from(handle_clap_error(&e, format))),
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("panic");

            if msg.contains("Broken pipe") {
                process::exit(0);
            }

            std::panic::resume_unwind(payload);
        }
    }
}

fn run(cli: Cli) -> ExitCode {
    init_logging(&cli);
    let format = cli.format;

    let Some(command) = cli.command else {
        println!("motifstudio {}", env!("CARGO_PKG_VERSION"));
        println!("Use --help for usage information.");
        return ExitCode::Success;
    };
    if matches!(command, Commands::Version) {
        output_version(format);
        return ExitCode::Success;
    }

    let context = match load_context(&cli.config) {
        Ok(context) => context,
        Err(e) => return output_error(&e, format),
    };

    match command {
        Commands::Version => ExitCode::Success,
        Commands::Serve(args) => handle_serve(args, context, format),
        Commands::Providers(cmd) => handle_providers(&cmd, &context, format),
        Commands::Hosts(cmd) => handle_hosts(&cmd, &context, format),
        Commands::Query(cmd) => handle_query(cmd, &context, format),
        Commands::Upload(cmd) => handle_upload(cmd, &context, format),
    }
}

fn load_context(path: &Path) -> Result<Arc<AppContext>> {
    let config = ServerConfig::load(path)?;
    AppContext::from_config(&config)
}

fn handle_serve(args: ServeArgs, context: Arc<AppContext>, format: OutputFormat) -> ExitCode {
    if format != OutputFormat::Table {
        eprintln!("Warning: 'serve' always logs to stderr; output format is ignored.");
    }

    let config = motifstudio::server::ServeConfig {
        bind: args.bind,
        port: args.port,
    };

    match motifstudio::server::serve(&config, context) {
        Ok(()) => ExitCode::Success,
        Err(e) => output_error(&e, format),
    }
}

fn render<T: Serialize>(value: &T, format: OutputFormat, what: &str) -> ExitCode {
    match output(value, format) {
        Ok(()) => ExitCode::Success,
        Err(err) => {
            eprintln!("Failed to render {what}: {err}");
            ExitCode::Error
        }
    }
}

fn render_rows<T: Serialize + motifstudio::cli::output::TableRow>(
    rows: &[T],
    headers: &[&str],
    format: OutputFormat,
    what: &str,
) -> ExitCode {
    match output_rows(rows, headers, format) {
        Ok(()) => ExitCode::Success,
        Err(err) => {
            eprintln!("Failed to render {what}: {err}");
            ExitCode::Error
        }
    }
}

fn handle_providers(cmd: &ProviderCommands, context: &AppContext, format: OutputFormat) -> ExitCode {
    match cmd {
        ProviderCommands::List => render_rows(
            &context.list_providers(),
            &["ID", "TYPE"],
            format,
            "providers",
        ),
    }
}

fn handle_hosts(cmd: &HostCommands, context: &AppContext, format: OutputFormat) -> ExitCode {
    match cmd {
        HostCommands::List => render_rows(&context.list_hosts(), &["ID", "NAME"], format, "hosts"),
        HostCommands::Validate => {
            let report = context.validate_hosts();
            let code = render_rows(&report, &["ID", "URI", "PROVIDER", "STATUS"], format, "hosts");
            if report.iter().all(|h| h.valid) {
                code
            } else {
                ExitCode::Error
            }
        }
    }
}

fn read_motif(source: &MotifSource) -> Result<String> {
    match (&source.query, &source.query_file) {
        (Some(query), _) => Ok(query.clone()),
        (None, Some(path)) => fs::read_to_string(path).map_err(|e| {
            MotifStudioError::user(
                "motif_file_unreadable",
                format!("Cannot read motif file {}: {e}", path.display()),
                "cli:query",
            )
        }),
        (None, None) => Err(MotifStudioError::user(
            "motif_required",
            "Pass --query or --query-file",
            "cli:query",
        )),
    }
}

/// Prints a query response. A response carrying an error still prints, but
/// the command exits non-zero.
fn finish_query<T: Serialize>(
    result: Result<T>,
    error_of: impl Fn(&T) -> Option<&String>,
    format: OutputFormat,
) -> ExitCode {
    match result {
        Ok(response) => {
            let code = render(&response, format, "query response");
            match error_of(&response) {
                Some(message) => {
                    if format == OutputFormat::Table {
                        eprintln!("Query failed: {message}");
                    }
                    ExitCode::Error
                }
                None => code,
            }
        }
        Err(e) => output_error(&e, format),
    }
}

fn handle_query(cmd: QueryCommands, context: &AppContext, format: OutputFormat) -> ExitCode {
    match cmd {
        QueryCommands::VertexCount(args) => {
            finish_query(context.vertex_count(&args.host_id), |r| r.error.as_ref(), format)
        }
        QueryCommands::EdgeCount(args) => {
            finish_query(context.edge_count(&args.host_id), |r| r.error.as_ref(), format)
        }
        QueryCommands::VertexAttributes(args) => finish_query(
            context.vertex_attributes(&args.host_id),
            |r| r.error.as_ref(),
            format,
        ),
        QueryCommands::EdgeAttributes(args) => finish_query(
            context.edge_attributes(&args.host_id),
            |r| r.error.as_ref(),
            format,
        ),
        QueryCommands::MotifParse(args) => finish_query(
            read_motif(&args.source)
                .map(|query| context.motif_parse("", &query, args.query_type)),
            |r| r.error.as_ref(),
            format,
        ),
        QueryCommands::MotifCount(args) => finish_query(
            read_motif(&args.source).and_then(|query| {
                context.motif_count(&args.host_id, &query, args.query_type)
            }),
            |r| r.error.as_ref(),
            format,
        ),
        QueryCommands::Motifs(args) => finish_query(
            read_motif(&args.source).and_then(|query| {
                context.motif_search(
                    &args.host_id,
                    &query,
                    args.query_type,
                    args.aggregation.as_deref(),
                )
            }),
            |r| r.error.as_ref(),
            format,
        ),
        QueryCommands::Download(args) => {
            let result = context.download_graph(&args.host_id, &args.export_format);
            match (&args.output, result) {
                (Some(path), Ok(response)) if response.error.is_none() => {
                    if let Err(e) = fs::write(path, &response.graph) {
                        return output_error(&MotifStudioError::from(e), format);
                    }
                    render(
                        &serde_json::json!({
                            "host_id": args.host_id,
                            "format": response.format,
                            "path": path,
                            "bytes": response.graph.len(),
                        }),
                        format,
                        "download",
                    )
                }
                (_, result) => finish_query(result, |r| r.error.as_ref(), format),
            }
        }
    }
}

fn handle_upload(cmd: UploadCommands, context: &AppContext, format: OutputFormat) -> ExitCode {
    match cmd {
        UploadCommands::Add(args) => {
            let content = match fs::read(&args.path) {
                Ok(content) => content,
                Err(e) => {
                    let err = MotifStudioError::user(
                        "upload_file_unreadable",
                        format!("Cannot read {}: {e}", args.path.display()),
                        "cli:upload",
                    );
                    return output_error(&err, format);
                }
            };
            let filename = args
                .path
                .file_name()
                .map_or_else(|| "upload.graphml".to_string(), |n| n.to_string_lossy().into_owned());
            match context.upload_graph(&content, &filename, args.name.as_deref()) {
                Ok(response) => render(&response, format, "upload"),
                Err(e) => output_error(&e, format),
            }
        }
        UploadCommands::List => match context.list_uploads() {
            Ok(uploads) => render_rows(
                &uploads,
                &["ID", "NAME", "BYTES", "EXPIRES"],
                format,
                "uploads",
            ),
            Err(e) => output_error(&e, format),
        },
        UploadCommands::Info(args) => match context.upload_info(&args.temp_id) {
            Ok(info) => render(&info, format, "upload"),
            Err(e) => output_error(&e, format),
        },
        UploadCommands::Remove(args) => match context.cleanup_upload(&args.temp_id) {
            Ok(response) => render(&response, format, "upload"),
            Err(e) => output_error(&e, format),
        },
    }
}
