use std::sync::Arc;

use crate::{
    app::AppFactory,
    cli::{
        errors::{CliError, CliResult},
        Command,
    },
    search::{ImageSearchRequest, QueryResult, RecommendRequest, SearchRequest},
    semantic::{VectorStorage, VectorStore},
    view::{FilterState, ResultsView},
    web,
};

/// Split a comma separated category list, dropping blanks.
pub fn parse_categories(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect()
}

pub fn run(command: Command) -> CliResult<()> {
    match command {
        #[cfg(feature = "markdown-docs")]
        Command::MarkdownDocs {} => {
            clap_markdown::print_help_markdown::<super::Args>();
            Ok(())
        }

        Command::Serve {} => {
            let context = AppFactory::create_context(false)?;
            let server = context.config().server.clone();
            web::start_server(Arc::new(context), server)?;
            Ok(())
        }

        Command::Index { rebuild } => index(rebuild),

        Command::Search {
            query,
            category,
            top_k,
            max_decoration,
            min_plain,
            pool,
            json,
            page_size,
        } => {
            let filters = FilterState {
                query,
                categories: category.as_deref().map(parse_categories).unwrap_or_default(),
                top_k,
                max_decoration_score: max_decoration,
                min_plain_score: min_plain,
                semantic_top_k: pool,
            };
            if filters.is_empty() {
                return Err(CliError::invalid_input("query must not be empty"));
            }
            let request = SearchRequest::from(&filters);
            let context = AppFactory::create_context(true)?;
            let outcome = context.service().search(&request)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
                return Ok(());
            }

            if outcome.enhanced_query != outcome.query {
                println!("searching for: {}", outcome.enhanced_query);
            }
            if !outcome.negations.is_empty() {
                println!("excluding: {}", outcome.negations.join(", "));
            }
            page_results(ResultsView::new(outcome.results, page_size))
        }

        Command::Recommend {
            id,
            top_k,
            same_category,
        } => {
            let context = AppFactory::create_context(true)?;
            let outcome = context.service().recommend(&RecommendRequest {
                item_id: id,
                top_k,
                same_category,
            })?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }

        Command::Image {
            path,
            text,
            category,
            top_k,
            no_ocr,
        } => {
            let image = std::fs::read(&path)?;
            let context = AppFactory::create_context(true)?;
            let outcome = context.service().search_by_image(&ImageSearchRequest {
                image,
                query: text,
                categories: category.as_deref().map(parse_categories),
                top_k,
                semantic_top_k: None,
                ocr: !no_ocr,
            })?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }

        Command::Categories {} => categories(),
    }
}

fn index(rebuild: bool) -> CliResult<()> {
    let paths = AppFactory::get_paths()?;
    let config = AppFactory::create_config(&paths)?;

    if rebuild {
        VectorStorage::new(paths.vectors_path.clone())
            .delete()
            .map_err(|e| CliError::internal(e.to_string()))?;
        log::info!("removed {}", paths.vectors_path.display());
    }

    let embedder = AppFactory::create_embedder(&config, &paths)?;
    let catalog = AppFactory::create_catalog(&config)?;
    let (index, result) =
        AppFactory::build_index(embedder.as_ref(), &catalog, &config, &paths, true)?;

    println!(
        "{} images indexed ({} reused, {} embedded, {} failed, {} removed)",
        index.len(),
        result.reused,
        result.embedded,
        result.failed,
        result.removed
    );
    Ok(())
}

fn categories() -> CliResult<()> {
    let paths = AppFactory::get_paths()?;
    let config = AppFactory::create_config(&paths)?;
    let catalog = AppFactory::create_catalog(&config)?;

    for (category, count) in catalog.category_counts() {
        println!("{category:<12} {count}");
    }
    println!("{:<12} {}", "total", catalog.len());
    Ok(())
}

fn print_result(result: &QueryResult) {
    println!(
        "{:>6}  {:.3}  {:<10} {}",
        result.id, result.similarity_score, result.category, result.image_path
    );
}

fn page_results(mut view: ResultsView) -> CliResult<()> {
    if view.total() == 0 {
        println!("no results");
        return Ok(());
    }

    view.visible().iter().for_each(print_result);

    while view.has_more() {
        let remaining = view.total() - view.displayed();
        match inquire::prompt_confirmation(format!("Show more? ({remaining} left)")) {
            Ok(true) => view.reveal_more().iter().for_each(print_result),
            Ok(false) => break,
            Err(inquire::InquireError::NotTTY) => break,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}
