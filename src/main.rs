//! Command-line entry point for the localization store.
//!
//! Usage:
//!   localehub create-project <name> --base <lang> [--targets a,b,c]
//!                            [--private] [--owner <id>] [--description <text>]
//!   localehub import <project-id> <strings.xml> --actor <id>
//!   localehub translate <project-id> --actor <id> [--langs a,b,c]
//!   localehub show <project-id>
//!
//! Environment:
//! - DATABASE_PATH (defaults to data/localehub.db)
//! - ENGINE_API_KEY (required for translate)
//! - ENGINE_API_URL, ENGINE_MODEL, ENGINE_TIMEOUT_SECS, ENGINE_MAX_TOKENS,
//!   TRANSLATE_BATCH_SIZE (optional)

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use localehub::access;
use localehub::android_xml;
use localehub::config::Config;
use localehub::db::{Database, Project, Visibility};
use localehub::engine::TranslationEngine;
use localehub::importer;
use localehub::translator;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("localehub=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1) else {
        print_usage();
        bail!("No command given");
    };

    match command.as_str() {
        "create-project" => cmd_create_project(&args[2..]),
        "import" => cmd_import(&args[2..]),
        "translate" => cmd_translate(&args[2..]).await,
        "show" => cmd_show(&args[2..]),
        other => {
            print_usage();
            bail!("Unknown command: {}", other);
        }
    }
}

fn print_usage() {
    eprintln!(
        "Usage:\n  \
         localehub create-project <name> --base <lang> [--targets a,b,c] [--private] [--owner <id>] [--description <text>]\n  \
         localehub import <project-id> <strings.xml> --actor <id>\n  \
         localehub translate <project-id> --actor <id> [--langs a,b,c]\n  \
         localehub show <project-id>"
    );
}

fn open_database() -> Result<Database> {
    let path =
        std::env::var("DATABASE_PATH").unwrap_or_else(|_| "data/localehub.db".to_string());
    Database::new(&path)
}

/// Pull the value following a `--flag` out of the argument list
fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn split_languages(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Fetch the project and enforce the mutation gate for `actor`
fn mutable_project(db: &Database, project_id: &str, actor: &str) -> Result<Project> {
    if actor.trim().is_empty() {
        bail!("--actor must not be blank");
    }
    let project = db
        .get_project(project_id)?
        .with_context(|| format!("Project not found: {}", project_id))?;
    if !access::can_mutate(&project, Some(actor)) {
        bail!("Forbidden: only the owner can modify a private project");
    }
    Ok(project)
}

fn cmd_create_project(args: &[String]) -> Result<()> {
    let Some(name) = args.first() else {
        bail!("create-project requires a name");
    };
    let base = flag_value(args, "--base").context("--base <lang> is required")?;
    let targets = flag_value(args, "--targets")
        .map(split_languages)
        .unwrap_or_default();
    let visibility = if args.iter().any(|a| a == "--private") {
        Visibility::Private
    } else {
        Visibility::Public
    };
    let owner = flag_value(args, "--owner");
    let description = flag_value(args, "--description");

    if targets.iter().any(|t| t == base) {
        warn!(
            "Base language {} is also listed as a target language; it will never need translation",
            base
        );
    }

    let db = open_database()?;
    let project = db.create_project(name, description, base, &targets, visibility, owner)?;

    info!("Created project {}", project.id);
    println!("{}", serde_json::to_string_pretty(&project)?);
    Ok(())
}

fn cmd_import(args: &[String]) -> Result<()> {
    let (Some(project_id), Some(file)) = (args.first(), args.get(1)) else {
        bail!("import requires a project id and a strings.xml path");
    };
    let actor = flag_value(args, "--actor").context("--actor <id> is required")?;

    let db = open_database()?;
    let project = mutable_project(&db, project_id, actor)?;

    let document = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file))?;
    let pairs = android_xml::parse(&document)?;
    info!("Parsed {} strings from {}", pairs.len(), file);

    let outcome = importer::reconcile(&db, &project, &pairs, actor)?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn cmd_translate(args: &[String]) -> Result<()> {
    let Some(project_id) = args.first() else {
        bail!("translate requires a project id");
    };
    let actor = flag_value(args, "--actor").context("--actor <id> is required")?;

    let config = Config::from_env()?;
    let db = Database::new(&config.database_path)?;
    let project = mutable_project(&db, project_id, actor)?;

    // Explicit --langs override the project's configured target languages
    let target_languages = flag_value(args, "--langs")
        .map(split_languages)
        .unwrap_or_else(|| project.target_languages.clone());

    let engine = TranslationEngine::new(&config)?;
    let results = translator::translate_missing(
        &db,
        &engine,
        &project,
        &target_languages,
        actor,
        config.batch_size,
    )
    .await?;

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn cmd_show(args: &[String]) -> Result<()> {
    let Some(project_id) = args.first() else {
        bail!("show requires a project id");
    };

    let db = open_database()?;
    let project = db
        .get_project(project_id)?
        .with_context(|| format!("Project not found: {}", project_id))?;
    let keys = db.list_keys(project_id)?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "project": project,
            "keys": keys,
        }))?
    );
    Ok(())
}
