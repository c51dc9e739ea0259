use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;

use super::{failure, json_error_handler, store_failure};
use crate::db::Database;
use crate::error::StoreResult;
use crate::models::{NewUser, ProfileFields, UserResponse};
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .service(
            web::resource("/api/profile")
                .route(web::post().to(save_profile))
                .route(web::get().to(get_profile)),
        )
        .service(
            web::resource("/api/profile/{user_id}/completed").route(web::get().to(get_completion)),
        );
}

/// Body of `POST /api/profile`.
///
/// The form posts every profile field plus the signed-in user's identity.
/// Any other keys it echoes back (`id`, `isCompleted`, a nested `profile`)
/// are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSubmission {
    #[serde(default)]
    parent_email: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(flatten)]
    fields: ProfileFields,
}

impl ProfileSubmission {
    /// `parentEmail` wins over `email`; blank values count as missing
    fn account_email(&self) -> Option<String> {
        [&self.parent_email, &self.email]
            .into_iter()
            .filter_map(|e| e.as_deref().map(str::trim))
            .find(|e| !e.is_empty())
            .map(str::to_string)
    }

    fn new_user(&self, email: String) -> NewUser {
        let name = [&self.name, &self.fields.parent_name]
            .into_iter()
            .filter_map(|n| n.as_deref().map(str::trim))
            .find(|n| !n.is_empty())
            .unwrap_or(email.as_str())
            .to_string();

        NewUser {
            name,
            email,
            image: self.image.clone(),
            email_verified: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EmailQuery {
    email: Option<String>,
}

/// Find or create the user, then upsert their profile
fn save_submission(db: &Database, email: String, submission: &ProfileSubmission) -> StoreResult<UserResponse> {
    let user = match db.get_user_by_email(&email)? {
        Some(user) => user,
        None => db.create_user(&submission.new_user(email))?,
    };
    let profile = db.update_profile(&user.id, &submission.fields)?;
    Ok(UserResponse::new(user, Some(&profile)))
}

fn load_user(db: &Database, email: &str) -> StoreResult<Option<UserResponse>> {
    let Some(user) = db.get_user_by_email(email)? else {
        return Ok(None);
    };
    let profile = db.get_profile_by_user_id(&user.id)?;
    Ok(Some(UserResponse::new(user, profile.as_ref())))
}

async fn save_profile(
    state: web::Data<AppState>,
    body: web::Json<ProfileSubmission>,
) -> impl Responder {
    let submission = body.into_inner();
    let Some(email) = submission.account_email() else {
        return failure(StatusCode::BAD_REQUEST, "Email is required");
    };

    let db = state.db.clone();
    match web::block(move || save_submission(&db, email, &submission)).await {
        Ok(Ok(user)) => {
            log::info!(
                "Saved profile for user {} (completed: {})",
                user.user.id,
                user.profile.as_ref().is_some_and(|p| p.is_completed)
            );
            HttpResponse::Ok().json(serde_json::json!({
                "success": true,
                "user": user
            }))
        }
        Ok(Err(e)) => store_failure(&e),
        Err(e) => {
            log::error!("Profile save task failed: {}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to update profile")
        }
    }
}

async fn get_profile(state: web::Data<AppState>, query: web::Query<EmailQuery>) -> impl Responder {
    let Some(email) = query.into_inner().email.filter(|e| !e.trim().is_empty()) else {
        return failure(StatusCode::BAD_REQUEST, "Email is required");
    };

    let db = state.db.clone();
    match web::block(move || load_user(&db, email.trim())).await {
        Ok(Ok(Some(user))) => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "user": user
        })),
        Ok(Ok(None)) => failure(StatusCode::NOT_FOUND, "User not found"),
        Ok(Err(e)) => store_failure(&e),
        Err(e) => {
            log::error!("Profile lookup task failed: {}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load profile")
        }
    }
}

async fn get_completion(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let user_id = path.into_inner();
    let db = state.db.clone();
    match web::block(move || db.is_profile_completed(&user_id)).await {
        Ok(completed) => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "completed": completed
        })),
        Err(e) => {
            log::error!("Completion check task failed: {}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to check profile")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use actix_web::{test, App};
    use serde_json::{json, Value};
    use std::fs;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    const TUTOR_SYSTEM: &str = "You are a patient tutor.";

    fn setup() -> (TempDir, web::Data<AppState>) {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".env"), "PORT=3000\nOPENAI_API_KEY=old\n").unwrap();
        let characters = dir.path().join("characters");
        fs::create_dir(&characters).unwrap();
        fs::write(
            characters.join("tutor.character.json"),
            serde_json::to_string_pretty(&json!({"name": "Tutor", "system": TUTOR_SYSTEM})).unwrap(),
        )
        .unwrap();

        let config = Config {
            port: 0,
            database_url: dir.path().join("allowme.db").to_string_lossy().into_owned(),
            agent_env_file: dir.path().join(".env"),
            characters_dir: characters,
        };
        let state = AppState::initialize(config).unwrap();
        (dir, web::Data::new(state))
    }

    fn full_form() -> Value {
        json!({
            "parentEmail": "dana@example.com",
            "name": "Dana Parent",
            "parentName": "Dana",
            "studentName": "Sam",
            "school": "Lincoln Elementary",
            "grade": "5th",
            "parentTelegram": "@dana",
            "studentTelegram": "@sam",
            "parentWallet": "0xparent",
            "studentWallet": "0xstudent",
            "openaiKey": "sk-test-1234567890",
            "telegramToken": "123456:telegram-token",
            "evmKey": "0xdeadbeefcafebabe",
            "walletRpc": "https://rpc.example.org"
        })
    }

    fn tutor_system(dir: &Path) -> String {
        let raw = fs::read_to_string(dir.join("characters/tutor.character.json")).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        value["system"].as_str().unwrap().to_string()
    }

    macro_rules! post_profile {
        ($app:expr, $body:expr) => {{
            let req = test::TestRequest::post()
                .uri("/api/profile")
                .set_json($body)
                .to_request();
            test::call_service(&$app, req).await
        }};
    }

    #[actix_web::test]
    async fn test_full_form_completes_profile() {
        let (dir, state) = setup();
        let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;

        let resp = post_profile!(app, full_form());
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["user"]["email"], "dana@example.com");
        assert_eq!(body["user"]["name"], "Dana Parent");
        assert_eq!(body["user"]["profile"]["isCompleted"], true);
        assert_eq!(body["user"]["profile"]["openaiKey"], "sk-t...7890");

        let env = fs::read_to_string(dir.path().join(".env")).unwrap();
        assert!(env.contains("PORT=3000\n"));
        assert!(env.contains("OPENAI_API_KEY=sk-test-1234567890\n"));
        assert!(env.contains("TELEGRAM_BOT_TOKEN=123456:telegram-token\n"));
        assert!(env.contains("EVM_PRIVATE_KEY=0xdeadbeefcafebabe\n"));
        assert!(env.contains("EVM_PROVIDER_URL=https://rpc.example.org\n"));
        assert_eq!(env.matches("OPENAI_API_KEY=").count(), 1);

        let system = tutor_system(dir.path());
        assert!(system.starts_with(TUTOR_SYSTEM));
        assert!(system.ends_with("The student is in 5th grade."));
    }

    #[actix_web::test]
    async fn test_grade_change_replaces_sentence() {
        let (dir, state) = setup();
        let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;

        post_profile!(app, full_form());
        let resp = post_profile!(app, json!({"email": "dana@example.com", "grade": "6th"}));
        assert_eq!(resp.status(), StatusCode::OK);

        let system = tutor_system(dir.path());
        assert_eq!(system.matches("The student is in").count(), 1);
        assert!(system.ends_with("The student is in 6th grade."));
    }

    #[actix_web::test]
    async fn test_missing_grade_saves_incomplete_profile() {
        let (dir, state) = setup();
        let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;

        let mut form = full_form();
        form.as_object_mut().unwrap().remove("grade");
        let resp = post_profile!(app, form);
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["user"]["profile"]["isCompleted"], false);

        assert_eq!(tutor_system(dir.path()), TUTOR_SYSTEM);
        let user_id = body["user"]["id"].as_str().unwrap();
        assert!(!state.db.is_profile_completed(user_id));
    }

    #[actix_web::test]
    async fn test_client_completion_flag_is_ignored() {
        let (_dir, state) = setup();
        let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;

        let resp = post_profile!(
            app,
            json!({"parentEmail": "dana@example.com", "grade": "5th", "isCompleted": true})
        );
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["user"]["profile"]["isCompleted"], false);
    }

    #[actix_web::test]
    async fn test_resubmitting_reuses_user() {
        let (_dir, state) = setup();
        let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;

        let first: Value = test::read_body_json(post_profile!(app, full_form())).await;
        // The form echoes back the user it was given, including both email keys
        let mut echoed = full_form();
        echoed["email"] = json!("dana@example.com");
        echoed["id"] = first["user"]["id"].clone();
        echoed["profile"] = first["user"]["profile"].clone();
        let second: Value = test::read_body_json(post_profile!(app, echoed)).await;

        assert_eq!(second["success"], true);
        assert_eq!(first["user"]["id"], second["user"]["id"]);
        assert_eq!(first["user"]["profile"]["id"], second["user"]["profile"]["id"]);
    }

    #[actix_web::test]
    async fn test_missing_email_is_rejected() {
        let (_dir, state) = setup();
        let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;

        let resp = post_profile!(app, json!({"parentName": "Dana", "parentEmail": "  "}));
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Email is required");
    }

    #[actix_web::test]
    async fn test_malformed_body_uses_failure_shape() {
        let (_dir, state) = setup();
        let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/profile")
            .insert_header(("content-type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
    }

    #[actix_web::test]
    async fn test_get_profile_and_completion() {
        let (_dir, state) = setup();
        let app = test::init_service(App::new().app_data(state.clone()).configure(config)).await;

        let saved: Value = test::read_body_json(post_profile!(app, full_form())).await;
        let user_id = saved["user"]["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::get()
            .uri("/api/profile?email=dana@example.com")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["user"]["id"], user_id.as_str());
        assert_eq!(body["user"]["profile"]["evmKey"], "0xde...babe");

        let req = test::TestRequest::get()
            .uri(&format!("/api/profile/{}/completed", user_id))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, json!({"success": true, "completed": true}));

        let req = test::TestRequest::get()
            .uri("/api/profile?email=nobody@example.com")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get()
            .uri("/api/profile/unknown-user/completed")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["completed"], false);
    }
}
