//! Command execution for the `librovore` CLI.
//!
//! A thin caller of the query orchestrator: parse arguments, build options,
//! run the engine, render the typed result. Errors are reified into
//! `ErrorResponse` at this boundary and mapped onto the documented exit
//! codes: 0 success, 1 processor availability or compatibility, 2 usage,
//! 3 network and I/O.

/// Argument definitions
pub mod cli;
/// Rendering results to the terminal
pub mod output;

use std::collections::BTreeMap;
use std::process::ExitCode;

use clap::Parser;
use colored::control as color_control;
use librovore_core::query::{ContentQueryOptions, InventoryQueryOptions};
use librovore_core::{Config, ErrorResponse, Librovore};
use tracing::Level;

use cli::{Cli, Commands, TransportArg};
use output::{emit_error, emit_result};

/// Parse arguments, execute, and map the outcome to an exit code.
pub async fn run() -> ExitCode {
    let cli = Cli::parse();
    initialize_logging(&cli);
    apply_color_preference(&cli);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            emit_error(&ErrorResponse::from(&e), cli.format, cli.reveal_internals);
            return ExitCode::from(2);
        },
    };

    if let Commands::Serve { transport, port } = &cli.command {
        return serve(config, *transport, *port).await;
    }

    let engine = match Librovore::new(config).await {
        Ok(engine) => engine,
        Err(e) => {
            let response = ErrorResponse::from(&e);
            emit_error(&response, cli.format, cli.reveal_internals);
            return exit_code_for(&response.error_type);
        },
    };

    match execute(&engine, &cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let response = ErrorResponse::from(&e);
            emit_error(&response, cli.format, cli.reveal_internals);
            exit_code_for(&response.error_type)
        },
    }
}

async fn execute(engine: &Librovore, cli: &Cli) -> librovore_core::Result<()> {
    match cli.command.clone() {
        Commands::QueryInventory {
            source,
            term,
            filters,
            match_mode,
            fuzzy_threshold,
            results_max,
            summarize,
            group_by,
        } => {
            let options = InventoryQueryOptions {
                filters: to_map(filters),
                match_mode: match_mode.into(),
                fuzzy_threshold,
                results_max,
                summarize,
                group_by,
            };
            let result = engine
                .with_query_timeout(engine.query_inventory(&source, &term, options))
                .await?;
            emit_result(&result, cli.format, cli.reveal_internals);
            Ok(())
        },
        Commands::QueryContent {
            source,
            term,
            filters,
            match_mode,
            fuzzy_threshold,
            results_max,
            include_snippets: _,
            no_include_snippets,
        } => {
            let options = ContentQueryOptions {
                filters: to_map(filters),
                match_mode: match_mode.into(),
                fuzzy_threshold,
                results_max,
                include_snippets: !no_include_snippets,
            };
            let result = engine
                .with_query_timeout(engine.query_content(&source, &term, options))
                .await?;
            emit_result(&result, cli.format, cli.reveal_internals);
            Ok(())
        },
        Commands::Detect { source, genus } => {
            let result = engine.detect(&source, genus.map(Into::into)).await?;
            emit_result(&result, cli.format, cli.reveal_internals);
            Ok(())
        },
        Commands::SurveyProcessors => {
            let result = engine.survey_processors();
            emit_result(&result, cli.format, cli.reveal_internals);
            Ok(())
        },
        Commands::Serve { .. } => unreachable!("serve handled before engine setup"),
    }
}

async fn serve(config: Config, transport: TransportArg, _port: Option<u16>) -> ExitCode {
    if transport != TransportArg::Stdio {
        eprintln!("transport not yet supported; use --transport stdio");
        return ExitCode::from(2);
    }
    let server = match librovore_mcp::McpServer::new(config).await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("failed to start MCP server: {e}");
            return ExitCode::from(1);
        },
    };
    match server.serve_stdio().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("MCP server failed: {e}");
            ExitCode::from(3)
        },
    }
}

fn load_config(cli: &Cli) -> librovore_core::Result<Config> {
    match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn to_map(filters: Vec<(String, String)>) -> BTreeMap<String, String> {
    filters.into_iter().collect()
}

/// Exit code per documented contract.
fn exit_code_for(error_type: &str) -> ExitCode {
    ExitCode::from(exit_status_for(error_type))
}

const fn exit_status_for(error_type: &str) -> u8 {
    match error_type.as_bytes() {
        b"processor_unavailable"
        | b"processor_incompatible"
        | b"structure_incompatible"
        | b"content_extract_failure" => 1,
        b"source_invalid" | b"filter_unsupported" | b"match_mode_invalid" | b"config" => 2,
        b"io" | b"network_failure" | b"http_request_failure" | b"access_disallowed"
        | b"content_type_invalid" | b"timeout" => 3,
        _ => 1,
    }
}

fn initialize_logging(cli: &Cli) {
    let level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::WARN
    };
    // Logs go to stderr so JSON output stays machine-readable.
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();
}

fn apply_color_preference(cli: &Cli) {
    if cli.no_color || std::env::var_os("NO_COLOR").is_some() {
        color_control::set_override(false);
    } else if cli.color {
        color_control::set_override(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_match_contract() {
        assert_eq!(exit_status_for("processor_unavailable"), 1);
        assert_eq!(exit_status_for("processor_incompatible"), 1);
        assert_eq!(exit_status_for("filter_unsupported"), 2);
        assert_eq!(exit_status_for("source_invalid"), 2);
        assert_eq!(exit_status_for("network_failure"), 3);
        assert_eq!(exit_status_for("access_disallowed"), 3);
        assert_eq!(exit_status_for("serialization"), 1);
    }

    #[test]
    fn test_filters_collect_into_map() {
        let map = to_map(vec![
            ("domain".to_string(), "py".to_string()),
            ("role".to_string(), "function".to_string()),
        ]);
        assert_eq!(map.len(), 2);
        assert_eq!(map["domain"], "py");
    }
}
