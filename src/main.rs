use anyhow::bail;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod app;
mod cli;
mod config;
mod context;
mod errors;
mod items;
mod semantic;
mod storage;
#[cfg(test)]
mod tests;
mod web;

use app::AppFactory;

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match args.command {
        cli::Command::Serve { listen } => {
            let app = AppFactory::create_app(false)?;
            let listen = listen.unwrap_or_else(|| app.config.server.listen.clone());
            web::start_daemon(app, listen)
        }

        cli::Command::Add {
            id,
            description,
            category,
        } => {
            let app = AppFactory::create_app(false)?;
            if !app.config.store.backend.is_durable() {
                bail!(
                    "store.backend is {:?}, an added item would be lost on exit",
                    app.config.store.backend
                );
            }
            let added = app.service.add_item(&id, &description, &category)?;
            app.service.save_snapshot()?;

            println!("{}", serde_json::to_string_pretty(&added)?);
            Ok(())
        }

        cli::Command::Search {
            text,
            category,
            limit,
        } => {
            let app = AppFactory::create_app(false)?;
            let retrieval = &app.config.retrieval;
            let limit = limit.unwrap_or(retrieval.default_limit);
            if limit > retrieval.max_limit {
                bail!("limit {limit} exceeds retrieval.max_limit ({})", retrieval.max_limit);
            }

            let matches = app.service.search(&text, category.as_deref(), limit)?;
            let inferred_context = category
                .as_deref()
                .map(|category| app.context.related(category))
                .unwrap_or_default();

            let output = serde_json::json!({
                "matches": matches
                    .iter()
                    .map(|m| serde_json::json!({
                        "id": m.id,
                        "description": m.description,
                        "category": m.category,
                        "score": m.score,
                        "reason": m.score_breakdown.reason(),
                    }))
                    .collect::<Vec<_>>(),
                "total_matches": matches.len(),
                "inferred_context": inferred_context,
            });

            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }

        cli::Command::Reindex {} => {
            let app = AppFactory::create_app(true)?;
            println!("{} items reindexed", app.service.len());
            Ok(())
        }
    }
}
