//! `configsync file put | get | list | delete`
//!
//! Talks to the entry store directly; no daemon is needed.

use std::future::Future;
use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context as _, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::{Args, Subcommand};
use serde_json::{json, Value};
use tabled::{builder::Builder, settings::Style};

use configsync_core::{EntryPath, SortSpec};
use configsync_store::{open_backend, EntryStore, ListRequest};

use super::{print_json, Context};

#[derive(Subcommand, Debug)]
pub enum FileCommand {
    /// Store a file. Content comes from one of the flags, or stdin.
    Put(PutArgs),
    /// Print a stored file.
    Get(GetArgs),
    /// List stored files.
    List(ListArgs),
    /// Delete a stored file.
    Delete {
        /// Relative path, e.g. `app/config.yml`.
        path: String,
    },
}

#[derive(Args, Debug)]
pub struct PutArgs {
    /// Relative path, e.g. `app/config.yml`.
    pub path: String,

    #[arg(long, conflicts_with_all = ["from_file", "base64"])]
    pub content: Option<String>,

    /// Read content from a local file.
    #[arg(long, value_name = "FILE", conflicts_with = "base64")]
    pub from_file: Option<PathBuf>,

    /// Base64-encoded content.
    #[arg(long, value_name = "B64")]
    pub base64: Option<String>,
}

#[derive(Args, Debug)]
pub struct GetArgs {
    pub path: String,

    /// Print the stored document as JSON instead of raw content.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Offset of the first item.
    #[arg(long, default_value_t = 0)]
    pub from: usize,

    /// Page size.
    #[arg(long, default_value_t = 10)]
    pub size: usize,

    /// Comma-separated fields to include, e.g. `path,@timestamp`.
    #[arg(long, value_delimiter = ',')]
    pub fields: Vec<String>,

    /// `field[:asc|desc]`.
    #[arg(long, default_value = "path:asc")]
    pub sort: SortSpec,

    /// Render as a table instead of JSON.
    #[arg(long)]
    pub table: bool,
}

pub fn run(ctx: &Context, command: FileCommand) -> Result<()> {
    let store = EntryStore::new(open_backend(&ctx.settings), &ctx.settings)
        .context("failed to open entry store")?;
    let runtime = ctx.runtime()?;

    match command {
        FileCommand::Put(args) => {
            let path = parse_path(&args.path)?;
            let content = args.read_content()?;
            let stored = runtime
                .block_on(settled(&store, store.put(&path, content)))
                .with_context(|| format!("failed to store {path}"))?;
            let mut payload = serde_json::to_value(&stored)?;
            payload["acknowledged"] = json!(true);
            print_json(&payload)
        }
        FileCommand::Get(args) => {
            let path = parse_path(&args.path)?;
            let Some(entry) = runtime
                .block_on(settled(&store, store.get(&path)))
                .with_context(|| format!("failed to read {path}"))?
            else {
                bail!("{path} is not found.");
            };
            if args.json {
                let mut payload = serde_json::to_value(&entry)?;
                payload["acknowledged"] = json!(true);
                return print_json(&payload);
            }
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&entry.content)?;
            stdout.flush()?;
            Ok(())
        }
        FileCommand::List(args) => {
            let request = ListRequest {
                from: args.from,
                size: args.size,
                fields: args
                    .fields
                    .iter()
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect(),
                sort: args.sort.clone(),
            };
            let items = runtime
                .block_on(settled(&store, store.list(&request)))
                .context("failed to list entries")?;
            if args.table {
                print_table(&request.fields, &items);
                return Ok(());
            }
            let key = if request.fields.is_empty() { "path" } else { "file" };
            print_json(&json!({ "acknowledged": true, key: items }))
        }
        FileCommand::Delete { path } => {
            let path = parse_path(&path)?;
            let outcome = runtime
                .block_on(settled(&store, store.delete(&path)))
                .with_context(|| format!("failed to delete {path}"))?;
            print_json(&json!({ "acknowledged": true, "result": outcome }))
        }
    }
}

/// Run `op`, then let any legacy copy it started finish: the runtime is
/// dropped as soon as the command returns, and a collection that already
/// exists is never migrated again.
async fn settled<T>(store: &EntryStore, op: impl Future<Output = T>) -> T {
    let out = op.await;
    store.wait_for_migration().await;
    out
}

impl PutArgs {
    fn read_content(&self) -> Result<Vec<u8>> {
        if let Some(text) = &self.content {
            return Ok(text.clone().into_bytes());
        }
        if let Some(file) = &self.from_file {
            return std::fs::read(file).with_context(|| format!("cannot read {}", file.display()));
        }
        if let Some(encoded) = &self.base64 {
            return STANDARD
                .decode(encoded.trim())
                .context("--base64 is not valid base64");
        }
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("failed to read content from stdin")?;
        Ok(buf)
    }
}

fn parse_path(raw: &str) -> Result<EntryPath> {
    EntryPath::parse(raw).with_context(|| format!("invalid path '{raw}'"))
}

fn print_table(fields: &[String], items: &[Value]) {
    let columns: Vec<String> = if fields.is_empty() {
        vec!["path".to_string()]
    } else {
        fields.to_vec()
    };

    let mut builder = Builder::default();
    builder.push_record(columns.clone());
    for item in items {
        let row: Vec<String> = if fields.is_empty() {
            vec![cell(item)]
        } else {
            columns.iter().map(|c| cell(&item[c.as_str()])).collect()
        };
        builder.push_record(row);
    }

    let mut table = builder.build();
    table.with(Style::rounded());
    println!("{table}");
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
