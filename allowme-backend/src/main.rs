use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::sync::Arc;

mod characters;
mod config;
mod controllers;
mod db;
mod env_sync;
mod error;
mod models;
mod profile_hooks;

use characters::{CharacterAnnotator, CharacterTarget};
use config::Config;
use db::migrations::run_migrations;
use db::Database;
use env_sync::EnvFile;
use error::StoreResult;

pub struct AppState {
    pub db: Arc<Database>,
    pub config: Config,
    pub env_file: Arc<EnvFile>,
    pub characters: Arc<CharacterAnnotator>,
}

impl AppState {
    /// Open the store, bring its schema up to date and subscribe the
    /// agent-side listeners to profile writes.
    pub fn initialize(config: Config) -> StoreResult<Self> {
        log::info!("Initializing database at {}", config.database_url);
        let db = Database::new(&config.database_url)?;
        let env_file = Arc::new(EnvFile::new(&config.agent_env_file));
        let characters = Arc::new(CharacterAnnotator::new(&config.characters_dir));

        let report = run_migrations(&db, &env_file)?;
        if !report.failed.is_empty() {
            log::warn!("Migrations will be retried on next start: {:?}", report.failed);
        }

        db.hooks().subscribe(env_file.clone());
        db.hooks().subscribe(characters.clone());
        log::info!("Registered {} profile listeners", db.hooks().len());

        Ok(Self {
            db: Arc::new(db),
            config,
            env_file,
            characters,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Serve,
    Migrate,
    /// Without a user, every completed profile is processed
    AnnotateCharacters {
        user_id: Option<String>,
        character: Option<String>,
    },
}

impl Command {
    fn parse(args: &[String]) -> Option<Self> {
        match args {
            [] => Some(Self::Serve),
            [cmd] if cmd == "serve" => Some(Self::Serve),
            [cmd] if cmd == "migrate" => Some(Self::Migrate),
            [cmd, rest @ ..] if cmd == "annotate-characters" && rest.len() <= 2 => {
                Some(Self::AnnotateCharacters {
                    user_id: rest.first().cloned(),
                    character: rest.get(1).cloned(),
                })
            }
            _ => None,
        }
    }
}

const USAGE: &str = "usage: allowme-backend [serve | migrate | annotate-characters [USER_ID [CHARACTER]]]";

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = Command::parse(&args) else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };

    let config = Config::from_env();
    log::info!("Agent env file: {:?}", config.agent_env_file);
    log::info!("Characters directory: {:?}", config.characters_dir);

    let state = AppState::initialize(config).map_err(|e| {
        log::error!("Failed to initialize profile store: {}", e);
        std::io::Error::other(e)
    })?;

    match command {
        Command::Migrate => {
            log::info!("Migrations finished");
            return Ok(());
        }
        Command::AnnotateCharacters { user_id: None, .. } => {
            let processed = state.characters.annotate_completed_profiles(&state.db);
            log::info!("Annotated character files for {} completed profile(s)", processed);
            return Ok(());
        }
        Command::AnnotateCharacters {
            user_id: Some(user_id),
            character,
        } => {
            let target = character.map_or(CharacterTarget::All, CharacterTarget::Named);
            if !state.characters.annotate_for_user(&state.db, &user_id, &target) {
                log::warn!("No character files updated for user {}", user_id);
            }
            return Ok(());
        }
        Command::Serve => {}
    }

    let port = state.config.port;
    let state = web::Data::new(state);

    log::info!("Starting allowMe backend on port {}", port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .wrap(cors)
            .configure(controllers::health::config)
            .configure(controllers::profile::config)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn parse(args: &[&str]) -> Option<Command> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        Command::parse(&args)
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!(parse(&[]), Some(Command::Serve));
        assert_eq!(parse(&["serve"]), Some(Command::Serve));
        assert_eq!(parse(&["migrate"]), Some(Command::Migrate));
        assert_eq!(
            parse(&["annotate-characters"]),
            Some(Command::AnnotateCharacters { user_id: None, character: None })
        );
        assert_eq!(
            parse(&["annotate-characters", "u1", "tutor"]),
            Some(Command::AnnotateCharacters {
                user_id: Some("u1".into()),
                character: Some("tutor".into())
            })
        );
        assert_eq!(parse(&["bogus"]), None);
        assert_eq!(parse(&["migrate", "extra"]), None);
    }

    #[test]
    fn test_initialize_migrates_and_subscribes() {
        let dir = tempdir().unwrap();
        let state = AppState::initialize(Config {
            port: 0,
            database_url: dir.path().join("data/allowme.db").to_string_lossy().into_owned(),
            agent_env_file: dir.path().join(".env"),
            characters_dir: dir.path().join("characters"),
        })
        .unwrap();

        assert!(state.db.table_exists("users"));
        assert!(state.db.table_exists("profiles"));
        assert_eq!(state.db.hooks().len(), 2);
    }
}
