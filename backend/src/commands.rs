use std::{fmt::Write, sync::Arc};

use bank::{DocumentId, Item, Recipe};
use clap::{Args, Subcommand};
use pantry::{
    Config, PantryError, PantryView, Session,
    identity::{FileStorage, IdentityStore},
    search::{filter_by_name, missing_ingredients},
};
use tracing::info;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create, join or leave a pantry group
    #[command(subcommand)]
    Group(GroupCommand),

    /// Manage pantry items
    #[command(subcommand)]
    Item(ItemCommand),

    /// Manage recipes
    #[command(subcommand)]
    Recipe(RecipeCommand),

    /// Follow the pantry live until Ctrl+C
    Watch(SearchArgs),
}

#[derive(Subcommand, Debug)]
pub enum GroupCommand {
    Create,
    Join { key: String },
    Leave,
    Show,
}

#[derive(Subcommand, Debug)]
pub enum ItemCommand {
    Add {
        name: String,
        #[arg(allow_negative_numbers = true)]
        quantity: i64,
    },
    Set {
        id: String,
        #[arg(allow_negative_numbers = true)]
        quantity: i64,
    },
    Remove {
        id: String,
    },
    List(SearchArgs),
}

#[derive(Subcommand, Debug)]
pub enum RecipeCommand {
    /// Ingredients are comma separated: "carrot, onion, salt"
    Add { name: String, ingredients: String },
    Edit {
        id: String,
        name: String,
        ingredients: String,
    },
    Remove {
        id: String,
    },
    List(SearchArgs),
}

#[derive(Args, Debug, Default)]
pub struct SearchArgs {
    /// Only show names containing this text
    #[arg(short, long, default_value = "")]
    pub search: String,
}

pub async fn run(command: Command) -> Result<(), PantryError> {
    let config = Config::load()?;

    match command {
        Command::Group(command) => group(&config, command).await,
        Command::Item(command) => {
            let mut session = Session::connect(&config).await?;
            session.restore();
            item(&session, command).await
        }
        Command::Recipe(command) => {
            let mut session = Session::connect(&config).await?;
            session.restore();
            recipe(&session, command).await
        }
        Command::Watch(args) => {
            let mut session = Session::connect(&config).await?;
            session.start().await?;

            let result = watch(&session, &args.search).await;
            session.shutdown();

            result
        }
    }
}

/// Show and leave only touch local storage, they work while the store is down.
async fn group(config: &Config, command: GroupCommand) -> Result<(), PantryError> {
    match command {
        GroupCommand::Create => {
            let mut session = Session::connect(config).await?;
            let key = session.create_group().await?;
            session.shutdown();
            println!("Created group {key}, share this key to invite others.");
        }
        GroupCommand::Join { key } => {
            let mut session = Session::connect(config).await?;
            let key = session.join_group(&key).await?;
            session.shutdown();
            println!("Joined group {key}.");
        }
        GroupCommand::Leave => {
            leave_group(&local_identity(config));
            println!("Left the group.");
        }
        GroupCommand::Show => println!("{}", describe_group(&local_identity(config))),
    }

    Ok(())
}

fn local_identity(config: &Config) -> IdentityStore {
    IdentityStore::new(Arc::new(FileStorage::new(config.storage_dir.clone())))
}

fn describe_group(identity: &IdentityStore) -> String {
    match identity.load() {
        Some(key) => key.to_string(),
        None => "Not in a group.".to_string(),
    }
}

fn leave_group(identity: &IdentityStore) {
    if let Some(key) = identity.load() {
        info!("Left group {key}");
    }

    identity.clear();
}

async fn item(session: &Session, command: ItemCommand) -> Result<(), PantryError> {
    match command {
        ItemCommand::Add { name, quantity } => {
            let id = session.add_item(&name, quantity).await?;
            println!("{id}");
        }
        ItemCommand::Set { id, quantity } => {
            session
                .set_item_quantity(&DocumentId::parse(&id)?, quantity)
                .await?;
        }
        ItemCommand::Remove { id } => {
            session.remove_item(&DocumentId::parse(&id)?).await?;
        }
        ItemCommand::List(args) => {
            let items = session.fetch_items().await?;
            print!("{}", render_items(&items, &args.search));
        }
    }

    Ok(())
}

async fn recipe(session: &Session, command: RecipeCommand) -> Result<(), PantryError> {
    match command {
        RecipeCommand::Add { name, ingredients } => {
            let id = session.add_recipe(&name, &ingredients).await?;
            println!("{id}");
        }
        RecipeCommand::Edit {
            id,
            name,
            ingredients,
        } => {
            session
                .update_recipe(&DocumentId::parse(&id)?, &name, &ingredients)
                .await?;
        }
        RecipeCommand::Remove { id } => {
            session.remove_recipe(&DocumentId::parse(&id)?).await?;
        }
        RecipeCommand::List(args) => {
            let recipes = session.fetch_recipes().await?;
            let items = session.fetch_items().await?;
            print!("{}", render_recipes(&recipes, &items, &args.search));
        }
    }

    Ok(())
}

async fn watch(session: &Session, search: &str) -> Result<(), PantryError> {
    session.context().require()?;

    let mut view = session.watch();
    let shutdown = pantry::shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        {
            let current = view.borrow_and_update();
            if current.is_loaded() {
                print!("{}", render_view(&current, search));
            }
        }

        tokio::select! {
            _ = &mut shutdown => break,
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!("Stopped watching");

    Ok(())
}

pub fn render_items(items: &[Item], search: &str) -> String {
    let mut out = String::new();

    for item in filter_by_name(items, search) {
        let _ = writeln!(out, "{}  {} x{}", item.id, item.name, item.quantity);
    }

    out
}

pub fn render_recipes(recipes: &[Recipe], items: &[Item], search: &str) -> String {
    let mut out = String::new();

    for recipe in filter_by_name(recipes, search) {
        let _ = write!(
            out,
            "{}  {}: {}",
            recipe.id,
            recipe.name,
            recipe.ingredients.join(", ")
        );

        let missing = missing_ingredients(recipe, items);
        if !missing.is_empty() {
            let _ = write!(out, " (missing: {})", missing.join(", "));
        }

        out.push('\n');
    }

    out
}

pub fn render_view(view: &PantryView, search: &str) -> String {
    let group = view
        .group
        .as_ref()
        .map(|group| group.to_string())
        .unwrap_or_default();

    format!(
        "== {group} ==\nItems\n{}Recipes\n{}\n",
        render_items(&view.items, search),
        render_recipes(&view.recipes, &view.items, search)
    )
}
