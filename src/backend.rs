//! Managed backend client (Supabase REST)
//!
//! Password sign-in, blood test panels and the user profile.

use once_cell::sync::OnceCell;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::medications::parse_date;
use crate::models::{BloodTest, BloodTestInput, LabValues, Profile};

static HTTP_CLIENT: OnceCell<Client> = OnceCell::new();

/// Process-wide HTTP client (30 s timeout)
pub fn http_client() -> AppResult<&'static Client> {
    HTTP_CLIENT.get_or_try_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(AppError::from)
    })
}

/// Column names of the numeric lab fields
pub const LAB_FIELDS: [&str; 25] = [
    "globuli_rossi",
    "emoglobina",
    "ematocrito",
    "globuli_bianchi",
    "piastrine",
    "glicemia",
    "emoglobina_glicata",
    "creatinina",
    "azotemia",
    "got_ast",
    "gpt_alt",
    "gamma_gt",
    "colesterolo_totale",
    "colesterolo_hdl",
    "colesterolo_ldl",
    "trigliceridi",
    "sodio",
    "potassio",
    "vitamina_d",
    "vitamina_b12",
    "tsh",
    "ft3",
    "ft4",
    "ferritina",
    "pcr",
];

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
}

impl BackendConfig {
    pub fn new(url: &str, anon_key: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        }
    }
}

/// Signed-in user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionUser {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone)]
struct Session {
    access_token: String,
    user: SessionUser,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    user: AuthUser,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    email: Option<String>,
}

pub struct BackendClient {
    config: BackendConfig,
    client: &'static Client,
    session: Mutex<Option<Session>>,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> AppResult<Self> {
        Ok(Self {
            config,
            client: http_client()?,
            session: Mutex::new(None),
        })
    }

    fn session(&self) -> AppResult<std::sync::MutexGuard<'_, Option<Session>>> {
        self.session
            .lock()
            .map_err(|_| AppError::Custom("Session lock error".to_string()))
    }

    fn require_session(&self) -> AppResult<Session> {
        self.session()?.clone().ok_or(AppError::NotAuthenticated)
    }

    pub fn current_user(&self) -> AppResult<Option<SessionUser>> {
        Ok(self.session()?.as_ref().map(|s| s.user.clone()))
    }

    fn authorized(&self, builder: RequestBuilder, token: &str) -> RequestBuilder {
        builder
            .header("apikey", &self.config.anon_key)
            .header("Authorization", format!("Bearer {}", token))
    }

    /// Email / password grant
    pub async fn sign_in(&self, email: &str, password: &str) -> AppResult<SessionUser> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.config.url);

        let response = self
            .client
            .post(&url)
            .header("apikey", &self.config.anon_key)
            .json(&serde_json::json!({
                "email": email,
                "password": password
            }))
            .send()
            .await?;

        let response = check(response, "sign in").await?;
        let auth: AuthResponse = response.json().await?;
        let user = SessionUser {
            id: auth.user.id,
            email: auth.user.email,
        };

        *self.session()? = Some(Session {
            access_token: auth.access_token,
            user: user.clone(),
        });
        log::info!("[Backend] signed in as {}", user.id);
        Ok(user)
    }

    /// Local session is always dropped, even if the remote logout fails
    pub async fn sign_out(&self) -> AppResult<()> {
        let session = self.session()?.take();
        let Some(session) = session else {
            return Ok(());
        };

        let url = format!("{}/auth/v1/logout", self.config.url);
        let result = self
            .authorized(self.client.post(&url), &session.access_token)
            .send()
            .await;
        match result {
            Ok(r) if r.status().is_success() => {}
            Ok(r) => log::warn!("[Backend] logout returned {}", r.status()),
            Err(e) => log::warn!("[Backend] logout failed: {}", e),
        }
        log::info!("[Backend] signed out");
        Ok(())
    }

    pub async fn insert_blood_test(&self, input: &BloodTestInput) -> AppResult<()> {
        let session = self.require_session()?;

        let mut row = serde_json::to_value(input)?;
        if let Some(obj) = row.as_object_mut() {
            obj.insert("user_id".to_string(), serde_json::json!(session.user.id));
            let blank_notes = obj
                .get("notes")
                .and_then(|n| n.as_str())
                .map(|n| n.trim().is_empty())
                .unwrap_or(true);
            if blank_notes {
                obj.remove("notes");
            }
        }

        let url = format!("{}/rest/v1/blood_tests", self.config.url);
        let response = self
            .authorized(self.client.post(&url), &session.access_token)
            .header("Prefer", "return=minimal")
            .json(&[row])
            .send()
            .await?;
        check(response, "insert blood test").await?;

        log::info!("[Backend] blood test of {} saved", input.test_date);
        Ok(())
    }

    /// The user's panels, newest test date first
    pub async fn list_blood_tests(&self) -> AppResult<Vec<BloodTest>> {
        let session = self.require_session()?;
        let url = format!(
            "{}/rest/v1/blood_tests?user_id=eq.{}&order=test_date.desc&select=*",
            self.config.url, session.user.id
        );
        let response = self
            .authorized(self.client.get(&url), &session.access_token)
            .send()
            .await?;
        let response = check(response, "list blood tests").await?;
        Ok(response.json().await?)
    }

    pub async fn get_profile(&self) -> AppResult<Option<Profile>> {
        let session = self.require_session()?;
        let url = format!(
            "{}/rest/v1/profiles?id=eq.{}&select=*",
            self.config.url, session.user.id
        );
        let response = self
            .authorized(self.client.get(&url), &session.access_token)
            .send()
            .await?;
        let response = check(response, "get profile").await?;
        let profiles: Vec<Profile> = response.json().await?;
        Ok(profiles.into_iter().next())
    }
}

async fn check(response: Response, what: &str) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    log::error!("[Backend] {} failed ({}): {}", what, status, body);
    Err(AppError::Backend {
        status: status.as_u16(),
        message: backend_message(&body),
    })
}

/// Prefer the human readable field of a Supabase error body
fn backend_message(body: &str) -> String {
    let parsed: serde_json::Value = serde_json::from_str(body).unwrap_or_default();
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|k| parsed.get(k).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

// ============ Form input ============

/// Empty -> none. Accepts a decimal comma ("5,2").
pub fn parse_lab_value(text: &str) -> AppResult<Option<f64>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let value: f64 = text
        .replace(',', ".")
        .parse()
        .map_err(|_| AppError::InvalidInput(format!("'{}' is not a number", text)))?;
    if !value.is_finite() {
        return Err(AppError::InvalidInput(format!("'{}' is not a number", text)));
    }
    Ok(Some(value))
}

/// Blood test form as typed by the user: every lab field is free text
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BloodTestForm {
    pub test_date: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

impl BloodTestForm {
    pub fn into_input(self) -> AppResult<BloodTestInput> {
        let test_date = parse_date(&self.test_date)?;

        let mut values = serde_json::Map::new();
        for (name, text) in &self.fields {
            if !LAB_FIELDS.contains(&name.as_str()) {
                return Err(AppError::InvalidInput(format!("unknown lab field '{}'", name)));
            }
            if let Some(value) = parse_lab_value(text)? {
                values.insert(name.clone(), serde_json::json!(value));
            }
        }
        let values: LabValues = serde_json::from_value(serde_json::Value::Object(values))?;

        Ok(BloodTestInput {
            test_date,
            notes: self.notes.filter(|n| !n.trim().is_empty()),
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::spawn_server;
    use axum::{
        extract::{Query, State},
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Fake {
        inserted: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
        queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    }

    async fn token(
        Query(q): Query<HashMap<String, String>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        assert_eq!(q.get("grant_type").map(String::as_str), Some("password"));
        assert_eq!(headers["apikey"], "anon");
        if body["password"] != "secret" {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid_grant", "error_description": "Invalid login credentials" })),
            );
        }
        (
            StatusCode::OK,
            Json(json!({
                "access_token": "jwt-1",
                "token_type": "bearer",
                "user": { "id": "u1", "email": body["email"] }
            })),
        )
    }

    async fn insert(State(fake): State<Fake>, headers: HeaderMap, Json(body): Json<Value>) -> StatusCode {
        fake.inserted.lock().unwrap().push((headers, body));
        StatusCode::CREATED
    }

    async fn list(State(fake): State<Fake>, Query(q): Query<HashMap<String, String>>) -> Json<Value> {
        fake.queries.lock().unwrap().push(q);
        Json(json!([
            { "id": "b2", "user_id": "u1", "test_date": "2026-04-01", "notes": null, "glicemia": 99.0,
              "created_at": null, "updated_at": null },
            { "id": "b1", "user_id": "u1", "test_date": "2026-01-10", "notes": "fasting", "tsh": 2.1,
              "created_at": null, "updated_at": null }
        ]))
    }

    async fn profiles() -> Json<Value> {
        Json(json!([{ "id": "u1", "email": "anna@example.com", "created_at": null, "updated_at": null }]))
    }

    async fn fake_backend() -> (BackendClient, Fake) {
        let fake = Fake::default();
        let app = Router::new()
            .route("/auth/v1/token", post(token))
            .route("/auth/v1/logout", post(|| async { StatusCode::NO_CONTENT }))
            .route("/rest/v1/blood_tests", post(insert).get(list))
            .route("/rest/v1/profiles", get(profiles))
            .with_state(fake.clone());
        let base = spawn_server(app).await;
        let client = BackendClient::new(BackendConfig::new(&format!("{}/", base), "anon")).unwrap();
        (client, fake)
    }

    #[test]
    fn test_parse_lab_value() {
        assert_eq!(parse_lab_value("").unwrap(), None);
        assert_eq!(parse_lab_value("  ").unwrap(), None);
        assert_eq!(parse_lab_value("5,2").unwrap(), Some(5.2));
        assert_eq!(parse_lab_value("140").unwrap(), Some(140.0));
        assert!(parse_lab_value("abc").is_err());
        assert!(parse_lab_value("NaN").is_err());
    }

    #[test]
    fn test_form_into_input() {
        let mut fields = BTreeMap::new();
        fields.insert("glicemia".to_string(), "92,5".to_string());
        fields.insert("tsh".to_string(), "".to_string());
        let form = BloodTestForm {
            test_date: "2026-03-01".to_string(),
            notes: Some("  ".to_string()),
            fields,
        };
        let input = form.into_input().unwrap();
        assert_eq!(input.values.glicemia, Some(92.5));
        assert_eq!(input.values.tsh, None);
        assert!(input.notes.is_none());

        let mut fields = BTreeMap::new();
        fields.insert("cortisolo".to_string(), "10".to_string());
        let form = BloodTestForm {
            test_date: "2026-03-01".to_string(),
            notes: None,
            fields,
        };
        assert!(matches!(form.into_input(), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_form_deserializes_flat_fields() {
        let form: BloodTestForm = serde_json::from_value(json!({
            "test_date": "2026-03-01",
            "ferritina": "45"
        }))
        .unwrap();
        assert_eq!(form.fields["ferritina"], "45");
        assert!(form.notes.is_none());
    }

    #[test]
    fn test_backend_message() {
        assert_eq!(
            backend_message(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#),
            "Invalid login credentials"
        );
        assert_eq!(backend_message("plain failure"), "plain failure");
    }

    #[tokio::test]
    async fn test_requires_session() {
        let (client, _) = fake_backend().await;
        assert!(matches!(client.list_blood_tests().await, Err(AppError::NotAuthenticated)));
        assert!(matches!(client.get_profile().await, Err(AppError::NotAuthenticated)));
        assert!(client.sign_out().await.is_ok());
    }

    #[tokio::test]
    async fn test_sign_in_failure() {
        let (client, _) = fake_backend().await;
        let err = client.sign_in("anna@example.com", "wrong").await.unwrap_err();
        match err {
            AppError::Backend { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid login credentials");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(client.current_user().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_sends_only_present_fields() {
        let (client, fake) = fake_backend().await;
        client.sign_in("anna@example.com", "secret").await.unwrap();

        let input = BloodTestInput {
            test_date: chrono::NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            notes: None,
            values: LabValues {
                glicemia: Some(92.0),
                ..Default::default()
            },
        };
        client.insert_blood_test(&input).await.unwrap();

        let inserted = fake.inserted.lock().unwrap().clone();
        assert_eq!(inserted.len(), 1);
        let (headers, body) = &inserted[0];
        assert_eq!(headers["prefer"], "return=minimal");
        assert_eq!(headers["authorization"], "Bearer jwt-1");
        assert_eq!(
            body,
            &json!([{ "user_id": "u1", "test_date": "2026-03-01", "glicemia": 92.0 }])
        );
    }

    #[tokio::test]
    async fn test_list_profile_and_sign_out() {
        let (client, fake) = fake_backend().await;
        let user = client.sign_in("anna@example.com", "secret").await.unwrap();
        assert_eq!(user.id, "u1");

        let tests = client.list_blood_tests().await.unwrap();
        assert_eq!(tests.len(), 2);
        assert_eq!(tests[0].test_date, "2026-04-01");
        assert_eq!(tests[1].values.tsh, Some(2.1));

        let query = fake.queries.lock().unwrap()[0].clone();
        assert_eq!(query["user_id"], "eq.u1");
        assert_eq!(query["order"], "test_date.desc");

        let profile = client.get_profile().await.unwrap().unwrap();
        assert_eq!(profile.email.as_deref(), Some("anna@example.com"));

        client.sign_out().await.unwrap();
        assert!(client.current_user().unwrap().is_none());
        assert!(matches!(client.list_blood_tests().await, Err(AppError::NotAuthenticated)));
    }
}
