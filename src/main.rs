//! pdfcore-inspect
//!
//! Opens a fixture document through the session layer and prints a JSON
//! report: metadata, outline, and per-page sizes, links, text and matches.

use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pdfcore_session::engine::FixtureEngine;
use pdfcore_session::{
    Bookmark, CoreConfig, CoreError, DocumentMeta, DocumentSource, Link, PageSize, PdfCore, Rect,
    SearchQuery, SessionService,
};

#[derive(Parser, Debug)]
#[command(name = "pdfcore-inspect")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Fixture document (JSON)
    #[arg(required = true)]
    file: PathBuf,

    /// Document password
    #[arg(short = 'P', long)]
    password: Option<String>,

    /// Search every page for this text
    #[arg(short = 's', long)]
    search: Option<String>,

    #[arg(long = "match-case", action = ArgAction::SetTrue)]
    match_case: bool,

    #[arg(long = "whole-word", action = ArgAction::SetTrue)]
    whole_word: bool,

    /// Include the text layer of each page
    #[arg(short = 't', long, action = ArgAction::SetTrue)]
    text: bool,

    /// Override PDFCORE_DPI
    #[arg(long)]
    dpi: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PageReport {
    index: usize,
    size: PageSize,
    links: Vec<Link>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    matches: Option<Vec<Rect>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    file: PathBuf,
    dpi: u32,
    page_count: usize,
    metadata: DocumentMeta,
    outline: Vec<Bookmark>,
    pages: Vec<PageReport>,
}

/// Pages without a text layer are reported without text instead of failing
fn without_text_layer<T>(result: pdfcore_session::Result<T>) -> anyhow::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(CoreError::NoText(index)) => {
            tracing::debug!(index, "Page has no text layer");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pdfcore_session=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut config = CoreConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        CoreConfig::default()
    });
    if let Some(dpi) = args.dpi {
        config.dpi = dpi;
    }

    let core = PdfCore::with_config(FixtureEngine::new(), config);
    let source = DocumentSource::from_path(&args.file)
        .with_context(|| format!("Failed to open {}", args.file.display()))?;
    let session = core
        .open(source, args.password.as_deref())
        .with_context(|| format!("Failed to load {}", args.file.display()))?;
    let service = SessionService::new(session);

    let page_count = service.page_count().await?;
    tracing::info!(pages = page_count, "Inspecting {}", args.file.display());

    let query = args.search.as_ref().map(|pattern| {
        SearchQuery::new(pattern.as_str())
            .match_case(args.match_case)
            .match_whole_word(args.whole_word)
    });

    let mut pages = Vec::with_capacity(page_count);
    for index in 0..page_count {
        let size = service.run(move |s| s.page_size(index)).await?;
        let links = service.page_links(index).await?;
        let text = if args.text {
            without_text_layer(service.page_text(index).await)?
        } else {
            None
        };
        let matches = match &query {
            Some(query) => without_text_layer(service.search_page(index, query.clone()).await)?,
            None => None,
        };
        pages.push(PageReport {
            index,
            size,
            links,
            text,
            matches,
        });
    }

    let report = Report {
        file: args.file.clone(),
        dpi: core.dpi(),
        page_count,
        metadata: service.metadata().await?,
        outline: service.table_of_contents().await?,
        pages,
    };
    service.close().await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
