//! CLI commands and argument parsing.
//!
//! Built on [`clap`](https://docs.rs/clap). Every command loads the
//! configuration named by `--config` (or `MOTIFSTUDIO_CONFIG`), builds an
//! [`AppContext`](crate::core::context::AppContext), and runs one operation.
//!
//! # Output Formats
//!
//! Commands support multiple output formats via the `-f`/`--format` flag:
//!
//! - `table` - Human-readable tables (default)
//! - `json` - Machine-readable JSON
//! - `yaml` - YAML
//!
//! # Example
//!
//! ```bash,no_run
//! motifstudio --config config.json hosts list
//! motifstudio query motif-count H1 -q "A -> B; B -> C"
//! motifstudio query motifs H1 -q "A -> B" -a 'sample|{"limit": 5}' -f json
//! motifstudio serve --port 5000
//! ```

pub mod commands;
pub mod output;
