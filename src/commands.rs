//! Command execution.

use crate::Commands;
use colored::Colorize;
use retsio_client::{Client, ClientError, Event, MetadataSource};
use retsio_protocol::{MetadataOptions, Operation, SearchOptions, Shape};
use serde_json::Value;
use std::io::Write;

/// Whether the command already ended the session.
pub enum Flow {
    Continue,
    LoggedOut,
}

/// Executes a command against a logged-in client.
pub async fn execute(client: &Client, cmd: Commands) -> Result<Flow, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Login => {
            let mut settings: Vec<_> = client.settings().into_values().collect();
            settings.sort_by(|a, b| a.name.cmp(&b.name));

            println!("{} to {}", "Logged in".green(), client.config().server_url);
            for token in settings {
                match token.kind {
                    Some(kind) => {
                        println!("  {} ({}) = {}", token.name.cyan(), kind.dimmed(), token.value)
                    }
                    None => println!("  {} = {}", token.name.cyan(), token.value),
                }
            }
            Ok(Flow::Continue)
        }

        Commands::Capabilities => {
            for (operation, path) in client.capabilities() {
                let marker = if operation.is_implemented() {
                    "".normal()
                } else {
                    " (not implemented)".dimmed()
                };
                println!("{:<16} {}{}", operation.as_str().cyan(), path, marker);
            }
            Ok(Flow::Continue)
        }

        Commands::Search {
            search_type,
            class,
            query,
            query_type,
            select,
            limit,
            offset,
            format,
            output,
            no_headers,
            no_count,
        } => {
            let mut options = SearchOptions::new()
                .with_resource(search_type, class)
                .with_query(query)
                .with_query_type(query_type)
                .with_format(format)
                .with_count(!no_count)
                .with_shape(Shape {
                    format: output,
                    object_mode: false,
                    headers: !no_headers,
                });
            if let Some(select) = select {
                options = options.with_select(select);
            }
            if let Some(limit) = limit {
                options = options.with_limit(limit);
            }
            if let Some(offset) = offset {
                options = options.with_offset(offset);
            }

            run_search(client, options).await?;
            Ok(Flow::Continue)
        }

        Commands::Metadata {
            metadata_type,
            id,
            format,
        } => {
            let options = MetadataOptions {
                metadata_type,
                id,
                format,
            };
            let metadata = client.get_metadata(&options).await?;
            let source = match metadata.source {
                MetadataSource::Cache => "cache".yellow(),
                MetadataSource::Network => "network".green(),
            };
            eprintln!("{} from {}", "Metadata".bold(), source);
            println!("{}", format_json(&metadata.payload));
            Ok(Flow::Continue)
        }

        Commands::Logout => {
            client.logout().await?;
            println!("{}", "Logged out".green());
            Ok(Flow::LoggedOut)
        }
    }
}

async fn run_search(client: &Client, options: SearchOptions) -> Result<(), ClientError> {
    let mut stream = client.search(options)?;
    let mut out = std::io::stdout();
    let mut rows = 0u64;

    while let Some(event) = stream.recv().await {
        match event {
            Event::Line(line) => {
                rows += 1;
                if !write_line(&mut out, &line) {
                    return Ok(());
                }
            }
            Event::Document(document) => {
                if !write_line(&mut out, &format_json(&document)) {
                    return Ok(());
                }
            }
            Event::Count(count) => eprintln!("{} {}", "Records:".bold(), count),
            Event::MaxRows => eprintln!("{}", "Server truncated the result set".yellow()),
            Event::Finish => {
                let _ = out.flush();
                tracing::debug!("Printed {} lines", rows);
                return Ok(());
            }
            Event::Error(e) => return Err(e),
            _ => {}
        }
    }
    Err(ClientError::StreamClosed)
}

/// Writes one output line. Returns false once downstream has closed
/// (e.g. piped into head).
fn write_line(out: &mut impl Write, line: &str) -> bool {
    match writeln!(out, "{}", line) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("Output closed: {}", e);
            false
        }
    }
}

/// Logs out if the server advertised Logout, ignoring failures.
pub async fn logout_quietly(client: &Client) {
    if client.capability(Operation::Logout).is_none() {
        return;
    }
    if let Err(e) = client.logout().await {
        tracing::warn!("Logout failed: {}", e);
    }
}

fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io;

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_line() {
        let mut out = Vec::new();
        assert!(write_line(&mut out, "{\"ListingID\":\"1001\"}"));
        assert!(write_line(&mut out, &format_json(&json!({"SYSTEM": "DEMO"}))));
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("{\"ListingID\":\"1001\"}\n"));
        assert!(text.ends_with("}\n"));
    }

    #[test]
    fn test_write_line_closed_pipe() {
        assert!(!write_line(&mut ClosedPipe, "row"));
    }
}
