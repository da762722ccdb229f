use std::sync::Arc;

use clap::Parser;
use qabot::{
    ChatbotDb,
    ChatbotLifecycle,
    ChatbotStore,
    Config,
    DataDir,
    DatasetDb,
    HashingEmbedder,
    IndexDb,
    config::{self, Overrides},
    error::{self, Error},
    server::{self, AppState},
    text_util,
};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod cli;

use cli::{Cli, Command, ConfigAction, DatasetAction};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("QABOT_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

/// Everything a command may need, opened once from the data directory.
struct App {
    data_dir: DataDir,
    config: Config,
    chatbots: Arc<ChatbotDb>,
    datasets: Arc<DatasetDb>,
    indexes: Arc<IndexDb>,
}

impl App {
    fn open(cli: &Cli) -> error::Result<Self> {
        let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
        let chatbots = Arc::new(ChatbotDb::open(&data_dir.chatbots_db())?);
        let datasets = Arc::new(DatasetDb::open(&data_dir.datasets_db())?);
        let indexes = Arc::new(IndexDb::open(&data_dir.indexes_db())?);

        let overrides = Overrides {
            dimension: cli.dimension,
            base_url: match &cli.command {
                Command::Deploy { base_url, .. } => base_url.clone(),
                _ => None,
            },
            bind: match &cli.command {
                Command::Serve { bind } => bind.clone(),
                _ => None,
            },
        };
        let config = Config::resolve(&overrides, &chatbots)?;

        Ok(Self {
            data_dir,
            config,
            chatbots,
            datasets,
            indexes,
        })
    }

    fn lifecycle(&self) -> error::Result<ChatbotLifecycle> {
        let embedder = HashingEmbedder::new(self.config.dimension)?;
        Ok(ChatbotLifecycle::new(
            self.chatbots.clone(),
            self.datasets.clone(),
            Arc::new(embedder),
        )
        .with_index_db(self.indexes.clone())
        .with_min_similarity(self.config.min_similarity))
    }
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let app = App::open(&cli)?;

    match cli.command {
        Command::Create(args) => {
            let chatbot = app.lifecycle()?.create(
                args.name.as_deref().unwrap_or(qabot::chatbot::DEFAULT_NAME),
                args.description
                    .as_deref()
                    .unwrap_or(qabot::chatbot::DEFAULT_DESCRIPTION),
            )?;
            println!("{}", chatbot.id);
        }
        Command::List { json } => {
            cmd_list(&app, json)?;
        }
        Command::Show { id } => {
            let id = parse_chatbot_id(&id)?;
            let chatbot = app
                .chatbots
                .get(&id)?
                .ok_or_else(|| Error::NotFound {
                    kind: "chatbot",
                    name: id.to_string(),
                })?;
            println!("{}", serde_json::to_string_pretty(&chatbot)?);
        }
        Command::Train { id, meta_id } => {
            let id = parse_chatbot_id(&id)?;
            let outcome = app.lifecycle()?.train(&id, &meta_id)?;
            println!(
                "Trained {} on {} examples from '{meta_id}'",
                outcome.chatbot.id, outcome.examples
            );
        }
        Command::Deploy { id, .. } => {
            let id = parse_chatbot_id(&id)?;
            let base_url = app.config.base_url.clone().unwrap_or_else(|| {
                format!("http://{}", app.config.bind)
            });
            let chatbot = app.lifecycle()?.deploy(&id, &base_url)?;
            println!("{}", chatbot.deployment_url);
        }
        Command::Ask(args) => {
            cmd_ask(&app, &args)?;
        }
        Command::Dataset { action } => match action {
            DatasetAction::Import { file, id } => {
                let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
                let count = app.datasets.import_file(&id, &file)?;
                println!("Imported {count} examples as '{id}'");
            }
            DatasetAction::List { json } => {
                cmd_dataset_list(&app, json)?;
            }
            DatasetAction::Remove { id } => {
                if app.datasets.remove_dataset(&id)? {
                    println!("Removed dataset '{id}'");
                } else {
                    return Err(Error::NotFound {
                        kind: "dataset",
                        name: id,
                    });
                }
            }
        },
        Command::Config { action } => {
            cmd_config(&app, action)?;
        }
        Command::Serve { .. } => {
            let state = AppState {
                lifecycle: Arc::new(app.lifecycle()?),
                datasets: app.datasets.clone(),
                base_url: app.config.base_url.clone(),
                top_k: app.config.top_k,
            };
            server::run_server(state, &app.config.bind)?;
        }
        Command::Status(args) => {
            cmd_status(&app, args.json)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn parse_chatbot_id(raw: &str) -> error::Result<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| {
        Error::InvalidInput(format!("'{raw}' is not a valid chatbot id"))
    })
}

fn display_text(text: &str) -> String {
    text_util::truncate_chars(&text_util::squash_whitespace(text), 60)
}

fn cmd_list(app: &App, json: bool) -> error::Result<()> {
    let chatbots = app.chatbots.list()?;

    if json {
        println!("{}", serde_json::to_string(&chatbots)?);
    } else if chatbots.is_empty() {
        println!("No chatbots created.");
    } else {
        for bot in &chatbots {
            println!("{}\t{}\t{}", bot.id, bot.status, display_text(&bot.name));
        }
    }
    Ok(())
}

fn cmd_ask(app: &App, args: &cli::AskArgs) -> error::Result<()> {
    let id = parse_chatbot_id(&args.id)?;
    let k = args.k.unwrap_or(app.config.top_k);
    let lifecycle = app.lifecycle()?;

    if args.explain {
        let engine = lifecycle.engine_for(&id)?;
        let hits = engine.respond_detailed(&args.query, k)?;
        if hits.is_empty() {
            println!("{}", qabot::engine::NO_RELEVANT_ANSWER);
        }
        for hit in &hits {
            println!(
                "{:.4}\t#{}\t{}",
                hit.similarity,
                hit.source_index,
                display_text(&hit.payload)
            );
        }
    } else {
        println!("{}", lifecycle.respond(&id, &args.query, k)?);
    }
    Ok(())
}

fn cmd_dataset_list(app: &App, json: bool) -> error::Result<()> {
    let datasets = app.datasets.list_datasets()?;

    if json {
        println!("{}", serde_json::to_string(&datasets)?);
    } else if datasets.is_empty() {
        println!("No datasets imported.");
    } else {
        for info in &datasets {
            println!("{}\t{}", info.id, info.examples);
        }
    }
    Ok(())
}

fn cmd_config(app: &App, action: ConfigAction) -> error::Result<()> {
    match action {
        ConfigAction::Get { key } => match app.chatbots.get_setting(&key)? {
            Some(value) => println!("{value}"),
            None => {
                return Err(Error::NotFound {
                    kind: "setting",
                    name: key,
                });
            }
        },
        ConfigAction::Set { key, value } => {
            config::validate_setting(&key, &value)?;
            app.chatbots.set_setting(&key, &value)?;
            println!("{key} = {value}");
        }
        ConfigAction::Unset { key } => {
            if !app.chatbots.remove_setting(&key)? {
                tracing::warn!(key, "setting was not set");
            }
        }
        ConfigAction::List => {
            for (key, value) in app.chatbots.list_settings()? {
                println!("{key} = {value}");
            }
        }
    }
    Ok(())
}

fn cmd_status(app: &App, json: bool) -> error::Result<()> {
    let chatbots = app.chatbots.list()?;
    let datasets = app.datasets.list_datasets()?;
    let indexes = app.indexes.list_ids()?.len();
    let count = |status: qabot::ChatbotStatus| {
        chatbots.iter().filter(|c| c.status == status).count()
    };

    let status = serde_json::json!({
        "data_dir": app.data_dir.root().display().to_string(),
        "model": qabot::embedding::HASHING_MODEL_NAME,
        "dimension": app.config.dimension,
        "chatbots": chatbots.len(),
        "inactive": count(qabot::ChatbotStatus::Inactive),
        "trained": count(qabot::ChatbotStatus::Trained),
        "active": count(qabot::ChatbotStatus::Active),
        "datasets": datasets.len(),
        "indexes": indexes,
    });

    if json {
        println!("{status}");
    } else {
        println!("Data directory: {}", app.data_dir.root().display());
        println!(
            "Model: {} ({} dimensions)",
            qabot::embedding::HASHING_MODEL_NAME,
            app.config.dimension
        );
        println!(
            "Chatbots: {} ({} inactive, {} trained, {} active)",
            chatbots.len(),
            count(qabot::ChatbotStatus::Inactive),
            count(qabot::ChatbotStatus::Trained),
            count(qabot::ChatbotStatus::Active)
        );
        println!("Datasets: {}", datasets.len());
        println!("Stored indexes: {indexes}");
    }
    Ok(())
}
