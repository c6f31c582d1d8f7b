use std::io::Read;

use anyhow::Context;
use colored::Colorize;
use serde::Serialize;
use strata_server::{
    BackendConfig, CreateEntityRequest, DeleteEntityRequest, EntityHistoryRequest,
    EntityListRequest, EntityServer, EntityStoreService, ReadEntityRequest, ServerConfig,
    ServerError, UpdateEntityRequest, UpdateStatus,
};
use strata_types::{Action, Entity};

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    if let Command::Init(args) = &cli.command {
        return cmd_init(&cli, args, format);
    }

    let config = load_config(&cli)?;
    let server = EntityServer::open(config).context("failed to open the entity store")?;
    match cli.command {
        Command::Init(_) => Ok(()),
        Command::Create(args) => cmd_create(&server, args, format).await,
        Command::Get(args) => cmd_get(&server, args, format).await,
        Command::Update(args) => cmd_update(&server, args, format).await,
        Command::Delete(args) => cmd_delete(&server, args, format).await,
        Command::List(args) => cmd_list(&server, args, format).await,
        Command::History(args) => cmd_history(&server, args, format).await,
        Command::Stats(_) => cmd_stats(&server, format).await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ServerConfig> {
    if cli.config.exists() {
        ServerConfig::load(&cli.config)
            .with_context(|| format!("failed to load {}", cli.config.display()))
    } else {
        tracing::debug!(path = %cli.config.display(), "no config file, using defaults");
        Ok(ServerConfig::default())
    }
}

fn cmd_init(cli: &Cli, args: &InitArgs, format: OutputFormat) -> anyhow::Result<()> {
    if cli.config.exists() && !args.force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            cli.config.display()
        );
    }
    let config = ServerConfig {
        backend: BackendConfig::Sqlite {
            path: args.db.clone(),
        },
        ..Default::default()
    };
    std::fs::write(&cli.config, config.to_toml()?)
        .with_context(|| format!("failed to write {}", cli.config.display()))?;
    EntityServer::open(config.clone()).context("failed to create the database")?;

    if format == OutputFormat::Json {
        return print_json(&config);
    }
    println!(
        "{} Initialized Strata store in {}",
        "✓".green().bold(),
        args.db.display().to_string().bold()
    );
    println!("  Config: {}", cli.config.display().to_string().cyan());
    Ok(())
}

async fn cmd_create<S: EntityStoreService>(
    server: &S,
    args: CreateArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let mut entity = read_entity(&args.file)?;
    if entity.created_by.is_empty() {
        if let Some(by) = args.created_by {
            entity.created_by = by;
        }
    }
    let resp = server
        .create(CreateEntityRequest::new(entity))
        .await
        .map_err(failure)?;
    if format == OutputFormat::Json {
        return print_json(&resp);
    }
    if let Some(e) = &resp.entity {
        println!("{} Created {}", "✓".green().bold(), e.key.bold());
        print_revision_line(e);
    }
    Ok(())
}

async fn cmd_get<S: EntityStoreService>(
    server: &S,
    args: GetArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let mut request = ReadEntityRequest::new(args.key);
    request.resource_version = args.version;
    request.with_body = !args.no_body;
    request.with_status = !args.no_status;
    let entity = server.read(request).await.map_err(failure)?;
    if format == OutputFormat::Json {
        return print_json(&entity);
    }
    print_entity(&entity);
    Ok(())
}

async fn cmd_update<S: EntityStoreService>(
    server: &S,
    args: UpdateArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let mut entity = read_entity(&args.file)?;
    if entity.updated_by.is_empty() {
        if let Some(by) = args.updated_by {
            entity.updated_by = by;
        }
    }
    let mut request = UpdateEntityRequest::new(entity);
    request.expected_version = args.expected_version;
    let resp = server.update(request).await.map_err(failure)?;
    if format == OutputFormat::Json {
        return print_json(&resp);
    }
    if let Some(e) = &resp.entity {
        match resp.status {
            UpdateStatus::Unchanged => {
                println!("{} {} unchanged", "=".dimmed(), e.key.bold());
            }
            _ => println!("{} Updated {}", "✓".green().bold(), e.key.bold()),
        }
        print_revision_line(e);
    }
    Ok(())
}

async fn cmd_delete<S: EntityStoreService>(
    server: &S,
    args: DeleteArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let mut request = DeleteEntityRequest::new(args.key);
    request.expected_version = args.expected_version;
    if let Some(by) = args.by {
        request = request.by(by);
    }
    let resp = server.delete(request).await.map_err(failure)?;
    if format == OutputFormat::Json {
        return print_json(&resp);
    }
    if let Some(e) = &resp.entity {
        println!("{} Deleted {}", "✓".green().bold(), e.key.bold());
        print_revision_line(e);
    }
    Ok(())
}

async fn cmd_list<S: EntityStoreService>(
    server: &S,
    args: ListArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let request = EntityListRequest {
        key_prefixes: args.prefixes,
        labels: args.labels.into_iter().collect(),
        limit: args.limit,
        next_page_token: args.page_token.unwrap_or_default(),
        with_body: format == OutputFormat::Json,
        with_status: format == OutputFormat::Json,
    };
    let resp = server.list(request).await.map_err(failure)?;
    if format == OutputFormat::Json {
        return print_json(&resp);
    }
    if resp.results.is_empty() {
        println!("No entities.");
    }
    for e in &resp.results {
        println!(
            "{}  {}  {}",
            format!("v{}", e.resource_version).yellow(),
            e.etag.short_hex().dimmed(),
            e.key
        );
    }
    print_page_token(&resp.next_page_token);
    Ok(())
}

async fn cmd_history<S: EntityStoreService>(
    server: &S,
    args: HistoryArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let mut request = EntityHistoryRequest::new(args.key).with_limit(args.limit);
    if let Some(token) = args.page_token {
        request = request.with_page_token(token);
    }
    let resp = server.history(request).await.map_err(failure)?;
    if format == OutputFormat::Json {
        return print_json(&resp);
    }
    if resp.versions.is_empty() {
        println!("No history for {}.", resp.key.bold());
    }
    for e in &resp.versions {
        print_revision_line(e);
    }
    print_page_token(&resp.next_page_token);
    Ok(())
}

async fn cmd_stats<S: EntityStoreService>(server: &S, format: OutputFormat) -> anyhow::Result<()> {
    let stats = server.stats().await.map_err(failure)?;
    if format == OutputFormat::Json {
        return print_json(&stats);
    }
    println!("Current entities: {}", stats.current_rows.to_string().bold());
    println!("History records:  {}", stats.history_rows.to_string().bold());
    println!("Label rows:       {}", stats.label_rows);
    println!("Known keys:       {}", stats.version_counters);
    Ok(())
}

fn read_entity(file: &str) -> anyhow::Result<Entity> {
    let text = if file == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read standard input")?;
        text
    } else {
        std::fs::read_to_string(file).with_context(|| format!("failed to read {file}"))?
    };
    serde_json::from_str(&text).with_context(|| format!("{file} is not a valid entity document"))
}

/// Attach the status code and a retry hint to a server error.
fn failure(err: ServerError) -> anyhow::Error {
    let hint = if err.is_retryable() {
        " (retryable)"
    } else {
        ""
    };
    anyhow::anyhow!("[{}] {err}{hint}", err.code())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_revision_line(e: &Entity) {
    let action = match e.action {
        Action::Created => e.action.as_str().green(),
        Action::Updated => e.action.as_str().cyan(),
        Action::Deleted => e.action.as_str().red(),
    };
    println!(
        "  {}  {:<8} {}  by {}",
        format!("v{}", e.resource_version).yellow().bold(),
        action,
        e.etag.short_hex().dimmed(),
        e.updated_by
    );
}

fn print_entity(e: &Entity) {
    println!("{}", e.key.bold());
    println!("  Version: {}", e.resource_version.to_string().yellow());
    println!("  GUID:    {}", e.guid.as_str());
    println!("  ETag:    {}", e.etag.to_hex().dimmed());
    println!("  Created: {} by {}", e.created_at, e.created_by);
    println!("  Updated: {} by {}", e.updated_at, e.updated_by);
    if !e.title.is_empty() {
        println!("  Title:   {}", e.title);
    }
    for (name, value) in &e.labels {
        println!("  Label:   {}={}", name.cyan(), value);
    }
    if !e.body.is_empty() {
        println!("  Body:    {}", String::from_utf8_lossy(&e.body));
    }
    if !e.status.is_empty() {
        println!("  Status:  {}", String::from_utf8_lossy(&e.status));
    }
}

fn print_page_token(token: &str) {
    if !token.is_empty() {
        println!("{} --page-token {}", "more:".dimmed(), token);
    }
}
