use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use glossbook_rs::{
    Category, CategoryId, DictionaryEntryRef, EngineConfig, FavoriteRow, FavoritesWorkspace,
    JsonFileSelectionStore, MemoryFavoritesService, StaticSession, ToggleAction, ToggleOptions,
    ToggleOutcome, build_key,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "glossbook-rs", about = "Manage favorite dictionary entries", version)]
pub struct Cli {
    /// Emit JSON instead of human-readable tables.
    #[arg(long, global = true)]
    json: bool,

    /// JSON file holding favorites, categories, and sessions.
    #[arg(long, global = true, default_value = "glossbook-state.json")]
    state: PathBuf,

    /// JSON file remembering each user's selected category.
    #[arg(long, global = true, default_value = "glossbook-selection.json")]
    selection: PathBuf,

    /// User whose favorites are managed.
    #[arg(long, global = true, default_value = "local")]
    user: String,

    /// Language tag stored with every gloss.
    #[arg(long, global = true, default_value = "en")]
    gloss_lang: String,

    /// Log filter used when RUST_LOG is unset [default: warn, info for serve].
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect and toggle favorite entries.
    #[command(subcommand)]
    Favorites(FavoritesCommand),
    /// Manage favorite categories.
    #[command(subcommand)]
    Categories(CategoriesCommand),
    /// Choose the category new favorites land in; omit the id to show everything.
    Select {
        id: Option<CategoryId>,
    },
    /// Serve the favorites API over HTTP.
    #[cfg(feature = "web")]
    Serve {
        /// Address to bind.
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: std::net::SocketAddr,
    },
}

#[derive(Subcommand, Debug)]
enum FavoritesCommand {
    /// List favorites in the selected category.
    List,
    /// Add an entry to favorites, or remove it if it is already there.
    Toggle {
        headword: String,
        pos: String,
        /// Gloss for each sense, in order. Repeat for several senses.
        #[arg(long = "sense", value_name = "GLOSS")]
        senses: Vec<String>,
        /// Category to write to instead of the selected one.
        #[arg(long)]
        category: Option<CategoryId>,
        /// Force the direction of the toggle.
        #[arg(long, value_enum)]
        action: Option<ActionArg>,
    },
    /// Show whether an entry is a favorite.
    Status { headword: String, pos: String },
}

#[derive(Subcommand, Debug)]
enum CategoriesCommand {
    /// List active categories in display order.
    List,
    Create {
        name: String,
    },
    Rename {
        id: CategoryId,
        name: String,
    },
    /// Reorder categories; every active id must be listed exactly once.
    Reorder {
        #[arg(required = true)]
        ids: Vec<CategoryId>,
    },
    Archive {
        id: CategoryId,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ActionArg {
    Add,
    Remove,
}

impl From<ActionArg> for ToggleAction {
    fn from(value: ActionArg) -> Self {
        match value {
            ActionArg::Add => ToggleAction::Add,
            ActionArg::Remove => ToggleAction::Remove,
        }
    }
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| default_log_level(&cli.command).to_string());
    init_tracing(&level);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(dispatch(cli))
}

fn default_log_level(command: &Command) -> &'static str {
    match command {
        #[cfg(feature = "web")]
        Command::Serve { .. } => "info",
        _ => "warn",
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn engine_config(cli: &Cli) -> EngineConfig {
    EngineConfig {
        gloss_lang: cli.gloss_lang.clone(),
        ..EngineConfig::default()
    }
}

async fn dispatch(cli: Cli) -> Result<(), Box<dyn Error>> {
    #[cfg(feature = "web")]
    if let Command::Serve { addr } = &cli.command {
        let config = glossbook_rs::web::WebConfig {
            addr: *addr,
            state_path: Some(cli.state.clone()),
            selection_path: Some(cli.selection.clone()),
            engine: engine_config(&cli),
        };
        glossbook_rs::web::serve(config).await?;
        return Ok(());
    }

    let workspace = open_workspace(&cli).await?;
    match cli.command {
        Command::Favorites(FavoritesCommand::List) => handle_list(&workspace, cli.json),
        Command::Favorites(FavoritesCommand::Toggle {
            headword,
            pos,
            senses,
            category,
            action,
        }) => {
            let entry = DictionaryEntryRef::new(&headword, &pos).with_senses(senses);
            let options = ToggleOptions {
                category_id: category,
                action: action.map(ToggleAction::from),
            };
            handle_toggle(&workspace, &entry, options, cli.json).await
        }
        Command::Favorites(FavoritesCommand::Status { headword, pos }) => {
            handle_status(&workspace, &DictionaryEntryRef::new(&headword, &pos), cli.json)
        }
        Command::Categories(CategoriesCommand::List) => {
            print_categories(&workspace, cli.json)
        }
        Command::Categories(CategoriesCommand::Create { name }) => {
            let category = workspace.categories.create(&name).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&category)?);
            } else {
                println!("Created category {} ({})", category.name, category.id);
            }
            Ok(())
        }
        Command::Categories(CategoriesCommand::Rename { id, name }) => {
            workspace.categories.rename(id, &name).await?;
            print_categories(&workspace, cli.json)
        }
        Command::Categories(CategoriesCommand::Reorder { ids }) => {
            workspace.categories.reorder(&ids).await?;
            print_categories(&workspace, cli.json)
        }
        Command::Categories(CategoriesCommand::Archive { id }) => {
            workspace.categories.archive(id).await?;
            print_categories(&workspace, cli.json)
        }
        Command::Select { id } => {
            if let Some(id) = id {
                if !workspace.categories.categories().iter().any(|c| c.id == id) {
                    return Err(format!("Unknown category id {id}").into());
                }
            }
            workspace.favorites.select_category(id).await?;
            handle_list(&workspace, cli.json)
        }
        #[cfg(feature = "web")]
        Command::Serve { .. } => Ok(()),
    }
}

async fn open_workspace(cli: &Cli) -> Result<FavoritesWorkspace, Box<dyn Error>> {
    let user = cli.user.trim();
    if user.is_empty() {
        return Err("--user cannot be empty".into());
    }
    let service = Arc::new(MemoryFavoritesService::open(&cli.state)?);
    let session = service.issue_session(user);
    let workspace = FavoritesWorkspace::new(
        service,
        Arc::new(StaticSession::new(Some(session))),
        Arc::new(JsonFileSelectionStore::open(&cli.selection)),
        engine_config(cli),
    );
    workspace.load().await?;
    Ok(workspace)
}

fn handle_list(workspace: &FavoritesWorkspace, as_json: bool) -> Result<(), Box<dyn Error>> {
    let selected = workspace.favorites.selected_category();
    let rows = workspace.favorites.favorites();
    if as_json {
        let payload = json!({
            "selected_category": selected,
            "items": rows,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        let label = selected
            .and_then(|id| {
                workspace
                    .categories
                    .categories()
                    .into_iter()
                    .find(|category| category.id == id)
            })
            .map(|category| category.name)
            .unwrap_or_else(|| "all categories".to_string());
        print_favorites_table(&label, &rows);
    }
    Ok(())
}

async fn handle_toggle(
    workspace: &FavoritesWorkspace,
    entry: &DictionaryEntryRef,
    options: ToggleOptions,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let outcome = workspace.favorites.toggle_favorite(entry, options).await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }
    match outcome {
        ToggleOutcome::Added { senses } => println!(
            "Added '{}' ({}) with {senses} sense(s).",
            entry.headword, entry.canonical_pos
        ),
        ToggleOutcome::Removed => {
            println!("Removed '{}' ({}).", entry.headword, entry.canonical_pos)
        }
        ToggleOutcome::Dropped => println!("Another change to this word is still in flight."),
        ToggleOutcome::Anonymous => println!("Not signed in; nothing changed."),
        ToggleOutcome::Ignored => println!("Headword is empty; nothing changed."),
    }
    Ok(())
}

fn handle_status(
    workspace: &FavoritesWorkspace,
    entry: &DictionaryEntryRef,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let key = build_key(entry);
    let favorited = workspace.favorites.is_favorited(entry);
    if as_json {
        let payload = json!({
            "key": key,
            "favorited": favorited,
            "pending": workspace.favorites.is_pending(entry),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else if favorited {
        println!("{key}: favorite");
    } else {
        println!("{key}: not a favorite");
    }
    Ok(())
}

fn print_categories(workspace: &FavoritesWorkspace, as_json: bool) -> Result<(), Box<dyn Error>> {
    let categories = workspace.categories.categories();
    if as_json {
        println!("{}", serde_json::to_string_pretty(&categories)?);
    } else {
        print_categories_table(&categories, workspace.favorites.selected_category());
    }
    Ok(())
}

fn print_favorites_table(label: &str, rows: &[FavoriteRow]) {
    if rows.is_empty() {
        println!("No favorites in {label}.");
        return;
    }
    println!("Favorites in {label}:");
    let word_width = rows
        .iter()
        .map(|row| row.headword.len())
        .max()
        .unwrap_or(4)
        .max("Word".len());
    let pos_width = rows
        .iter()
        .map(|row| row.canonical_pos.len())
        .max()
        .unwrap_or(3)
        .max("POS".len());
    println!(
        "{:<word_width$}  {:<pos_width$}  {:>5}  Gloss",
        "Word",
        "POS",
        "Sense",
        word_width = word_width,
        pos_width = pos_width
    );
    for row in rows {
        println!(
            "{:<word_width$}  {:<pos_width$}  {:>5}  {}",
            row.headword,
            row.canonical_pos,
            row.sense_index,
            row.gloss,
            word_width = word_width,
            pos_width = pos_width
        );
    }
}

fn print_categories_table(categories: &[Category], selected: Option<CategoryId>) {
    if categories.is_empty() {
        println!("No categories yet.");
        return;
    }
    let name_width = categories
        .iter()
        .map(|category| category.name.len())
        .max()
        .unwrap_or(4)
        .max("Name".len());
    println!("   {:>4}  {:<name_width$}", "ID", "Name", name_width = name_width);
    for category in categories {
        let marker = if selected == Some(category.id) { "*" } else { " " };
        println!(
            " {marker} {:>4}  {:<name_width$}",
            category.id,
            category.name,
            name_width = name_width
        );
    }
}
