use std::io::Write;
use std::str::FromStr;

use futures::TryStreamExt;
use serde::Serialize;

use crate::catalog::CatalogError;
use crate::context::RowscopeContext;
use crate::data_types::ColumnDescriptor;
use crate::query::pagination::PageRequest;
use crate::query::params::QueryRequest;
use crate::query::QueryError;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("{0:?} is not a valid command; expected one of: tables <schema>, describe <schema> <table>, browse <schema> <table> [page], export <schema> <table>")]
    Unrecognised(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Error serializing output: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Error writing output: {0}")]
    Io(#[from] std::io::Error),
}

/// Commands the binary can run once and exit
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    ListTables(String),
    Describe(String, String),
    Browse(String, String, Option<u64>),
    Export(String, String),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let words = s.split_whitespace().collect::<Vec<_>>();
        let (schema, table) = (
            words.get(1).map(|w| w.to_string()),
            words.get(2).map(|w| w.to_string()),
        );

        Ok(match (words.as_slice(), schema, table) {
            (["tables", _], Some(schema), _) => Self::ListTables(schema),
            (["describe", _, _], Some(schema), Some(table)) => Self::Describe(schema, table),
            (["browse", _, _], Some(schema), Some(table)) => Self::Browse(schema, table, None),
            (["browse", _, _, page], Some(schema), Some(table)) => Self::Browse(
                schema,
                table,
                Some(
                    page.parse()
                        .map_err(|_| CommandError::Unrecognised(s.to_string()))?,
                ),
            ),
            (["export", _, _], Some(schema), Some(table)) => Self::Export(schema, table),
            _ => return Err(CommandError::Unrecognised(s.to_string())),
        })
    }
}

#[derive(Serialize)]
struct ColumnLine<'a> {
    #[serde(flatten)]
    column: &'a ColumnDescriptor,
    identity: bool,
}

// Run a one-off command and write its results to a writer: line-delimited
// JSON, or CSV for exports
pub async fn run_one_off_command<W>(
    context: &RowscopeContext,
    command: &str,
    mut output: W,
) -> Result<(), CommandError>
where
    W: Write,
{
    match command.parse::<Command>()? {
        Command::ListTables(schema) => {
            for stats in context.list_tables(&schema).await?.iter() {
                serde_json::to_writer(&mut output, stats)?;
                writeln!(output)?;
            }
        }
        Command::Describe(schema, table) => {
            let entity = context.get_entity(&schema, &table).await?;
            for column in &entity.columns {
                let line = ColumnLine {
                    column,
                    identity: entity.identity.contains(&column.name),
                };
                serde_json::to_writer(&mut output, &line)?;
                writeln!(output)?;
            }
        }
        Command::Browse(schema, table, page) => {
            let request = QueryRequest {
                page: PageRequest {
                    page,
                    ..Default::default()
                },
                ..Default::default()
            };
            let result = context.query(&schema, &table, &request).await?;
            serde_json::to_writer(&mut output, &result)?;
            writeln!(output)?;
        }
        Command::Export(schema, table) => {
            let mut export = context
                .stream_export(&schema, &table, &QueryRequest::default())
                .await?;
            while let Some(line) = export.lines.try_next().await? {
                output.write_all(line.as_bytes())?;
            }
        }
    }

    output.flush()?;
    Ok(())
}
