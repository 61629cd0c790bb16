//! CLI output formatting (JSON, YAML, table).
//!
//! JSON and YAML wrap data in the same `{success, data, error}` envelope the
//! HTTP API uses.

use crate::core::context::HostValidation;
use crate::core::error::{ExitCode, MotifStudioError};
use crate::core::models::{HostProviderPublicListing, HostSummary, TemporaryHostListing};
use comfy_table::{Cell, Table};
use serde::Serialize;

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// Machine-readable JSON format.
    Json,
    /// YAML output format.
    Yaml,
}

/// Structured CLI response.
#[derive(Debug, Serialize)]
pub struct CliResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorOutput>,
}

/// Structured error output.
#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub category: String,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl From<&MotifStudioError> for ErrorOutput {
    fn from(err: &MotifStudioError) -> Self {
        Self {
            category: err.category.to_string(),
            code: err.code.clone(),
            message: err.message.clone(),
            hint: err.recovery_hint.clone(),
        }
    }
}

impl<T: Serialize> CliResponse<T> {
    /// Creates a successful response with data.
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Creates an error response.
    pub fn error(err: &MotifStudioError) -> CliResponse<()> {
        CliResponse {
            success: false,
            data: None,
            error: Some(ErrorOutput::from(err)),
        }
    }
}

/// Outputs data in the specified format. Table format falls back to pretty
/// JSON for records without a table rendering.
pub fn output<T: Serialize>(data: T, format: OutputFormat) -> std::io::Result<()> {
    match format {
        OutputFormat::Json => {
            let response = CliResponse::success(data);
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Table => {
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        OutputFormat::Yaml => {
            let response = CliResponse::success(data);
            if let Ok(yaml) = serde_yaml::to_string(&response) {
                print!("{yaml}");
            }
        }
    }
    Ok(())
}

/// Prints rows as a table, or the rows themselves in JSON/YAML.
pub fn output_rows<T: Serialize + TableRow>(
    rows: &[T],
    headers: &[&str],
    format: OutputFormat,
) -> std::io::Result<()> {
    if format != OutputFormat::Table {
        return output(rows, format);
    }
    let mut table = create_table(headers);
    for row in rows {
        table.add_row(row.to_row());
    }
    println!("{table}");
    Ok(())
}

/// Outputs an error in the specified format.
pub fn output_error(err: &MotifStudioError, format: OutputFormat) -> ExitCode {
    match format {
        OutputFormat::Json => {
            let response = CliResponse::<()>::error(err);
            if let Ok(json) = serde_json::to_string_pretty(&response) {
                eprintln!("{json}");
            }
        }
        OutputFormat::Yaml => {
            let response = CliResponse::<()>::error(err);
            if let Ok(yaml) = serde_yaml::to_string(&response) {
                eprint!("{yaml}");
            }
        }
        OutputFormat::Table => {
            eprintln!("Error: {err}");
            if let Some(hint) = &err.recovery_hint {
                eprintln!("Hint: {hint}");
            }
        }
    }
    error_to_exit_code(err)
}

/// Maps error codes to exit codes.
fn error_to_exit_code(err: &MotifStudioError) -> ExitCode {
    match err.code.as_str() {
        c if c.ends_with("not_found") => ExitCode::NotFound,
        c if c.starts_with("duplicate") => ExitCode::Conflict,
        _ => ExitCode::Error,
    }
}

/// Helper to create a table with headers.
#[must_use]
pub fn create_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_header(headers.iter().map(|h| Cell::new(*h)));
    table
}

/// Trait for types that can be displayed as a table row.
pub trait TableRow {
    fn to_row(&self) -> Vec<String>;
}

impl TableRow for HostSummary {
    fn to_row(&self) -> Vec<String> {
        vec![self.id.clone(), self.name.clone()]
    }
}

impl TableRow for HostProviderPublicListing {
    fn to_row(&self) -> Vec<String> {
        vec![self.id.clone(), self.provider_type.clone()]
    }
}

impl TableRow for HostValidation {
    fn to_row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.uri.clone(),
            self.provider_id.clone().unwrap_or_else(|| "-".to_string()),
            if self.valid { "ok" } else { "unroutable" }.to_string(),
        ]
    }
}

impl TableRow for TemporaryHostListing {
    fn to_row(&self) -> Vec<String> {
        vec![
            self.temp_id.clone(),
            self.name.clone(),
            self.file_size.to_string(),
            self.expires_at.format("%Y-%m-%d %H:%M").to_string(),
        ]
    }
}
