use actix_web::{web, HttpResponse, Responder};

use crate::AppState;

/// Version from Cargo.toml, available at compile time
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/health").route(web::get().to(health_check)));
    cfg.service(web::resource("/api/version").route(web::get().to(get_version)));
    cfg.service(web::resource("/api/health/config").route(web::get().to(get_config_status)));
}

async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "version": VERSION
    }))
}

async fn get_version() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "version": VERSION
    }))
}

/// Whether the files the agent integration writes to are in place
async fn get_config_status(state: web::Data<AppState>) -> impl Responder {
    let character_files = state.characters.find_character_files().len();

    HttpResponse::Ok().json(serde_json::json!({
        "database_initialized": state.db.table_exists("profiles"),
        "env_file_configured": state.env_file.exists(),
        "characters_dir_configured": state.characters.dir().is_dir(),
        "character_files": character_files
    }))
}
