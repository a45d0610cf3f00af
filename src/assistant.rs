//! Chat-assistant endpoint
//!
//! Server side of the chat helper: wraps the user's question in a
//! per-language system prompt and forwards it to an OpenAI-style
//! chat-completions gateway.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::backend::http_client;
use crate::chat::Language;
use crate::error::AppResult;

pub const DEFAULT_GATEWAY_URL: &str = "https://ai.gateway.lovable.dev/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "openai/gpt-5-mini";

const EMPTY_REPLY: &str = "Mi dispiace, non ho potuto elaborare la tua richiesta.";

const PROMPT_IT: &str = r#"Sei un assistente virtuale esperto per "Facile Vita Sana", un'app completa di gestione medicinali e benessere.

FUNZIONALITÀ PRINCIPALI DELL'APP:
1. **Registro Medicinali**: Permette di registrare i medicinali giornalieri con data, nome, orario, dosaggio, e note. Include anche la registrazione di parametri vitali (pressione sistolica/diastolica, glicemia).

2. **Gestione Quotidiana**: Visualizza i medicinali da assumere oggi con possibilità di attivare/disattivare notifiche per ciascun medicinale. Mostra l'elenco dei farmaci con orario di assunzione.

3. **Andamento Settimanale**: Grafici interattivi che mostrano l'andamento di pressione sistolica, pressione diastolica e glicemia negli ultimi 7 giorni. Aiuta a monitorare i trend dei parametri vitali.

4. **Analisi**: Permette di registrare e gestire analisi mediche con data, tipo di analisi e note dettagliate.

COME AIUTARE GLI UTENTI:
- Spiega come navigare tra le diverse sezioni usando il menu
- Fornisci guide passo-passo per registrare medicinali e analisi
- Aiuta a interpretare i grafici dell'andamento
- Offri suggerimenti per tenere traccia dei medicinali
- Ricorda che i dati sono salvati in locale sul dispositivo
- Spiega come usare le notifiche per non dimenticare i medicinali

CONSIGLI SULLA SALUTE:
- Importanza della regolarità nell'assunzione dei medicinali
- Come monitorare correttamente pressione e glicemia
- Quando consultare un medico in base ai valori rilevati
- Suggerimenti per organizzare la terapia farmacologica

Rispondi sempre in modo chiaro, empatico e professionale. Usa esempi pratici quando possibile. Se non sei sicuro di qualcosa, consiglia di consultare un medico o farmacista."#;

const PROMPT_EN: &str = r#"You are an expert virtual assistant for "Facile Vita Sana", a comprehensive medication and wellness management app.

MAIN APP FEATURES:
1. **Medicine Registry**: Register daily medications with date, name, time, dosage, and notes. Also includes vital parameters tracking (systolic/diastolic pressure, glucose).

2. **Daily Management**: View today's medications with ability to enable/disable notifications for each medicine. Shows the medication list with intake times.

3. **Weekly Progress**: Interactive charts showing trends of systolic pressure, diastolic pressure, and glucose over the last 7 days. Helps monitor vital parameter trends.

4. **Analysis**: Register and manage medical tests with date, test type, and detailed notes.

HOW TO HELP USERS:
- Explain how to navigate between sections using the menu
- Provide step-by-step guides for registering medications and tests
- Help interpret progress charts
- Offer suggestions for keeping track of medications
- Remind that data is saved locally on the device
- Explain how to use notifications to remember medications

HEALTH ADVICE:
- Importance of regularity in taking medications
- How to properly monitor blood pressure and glucose
- When to consult a doctor based on detected values
- Suggestions for organizing medication therapy

Always respond clearly, empathetically and professionally. Use practical examples when possible. If unsure about something, recommend consulting a doctor or pharmacist."#;

const PROMPT_RO: &str = r#"Ești un asistent virtual expert pentru "Facile Vita Sana", o aplicație completă de gestionare a medicamentelor și bunăstării.

FUNCȚIONALITĂȚI PRINCIPALE ALE APLICAȚIEI:
1. **Registrul Medicamentelor**: Înregistrează medicamentele zilnice cu data, numele, ora, dozajul și notele. Include și înregistrarea parametrilor vitali (tensiune sistolică/diastolică, glicemie).

2. **Gestionare Zilnică**: Vizualizează medicamentele de luat astăzi cu posibilitatea de a activa/dezactiva notificările pentru fiecare medicament. Arată lista medicamentelor cu orele de administrare.

3. **Progres Săptămânal**: Grafice interactive care arată tendința tensiunii sistolice, tensiunii diastolice și glicemiei în ultimele 7 zile. Ajută la monitorizarea tendințelor parametrilor vitali.

4. **Analize**: Permite înregistrarea și gestionarea analizelor medicale cu data, tipul analizei și note detaliate.

CUM SĂ AJUȚI UTILIZATORII:
- Explică cum să navighezi între secțiuni folosind meniul
- Oferă ghiduri pas cu pas pentru înregistrarea medicamentelor și analizelor
- Ajută la interpretarea graficelor de progres
- Oferă sugestii pentru a ține evidența medicamentelor
- Amintește că datele sunt salvate local pe dispozitiv
- Explică cum să folosești notificările pentru a nu uita medicamentele

SFATURI DESPRE SĂNĂTATE:
- Importanța regularității în administrarea medicamentelor
- Cum să monitorizezi corect tensiunea și glicemia
- Când să consulți un medic în funcție de valorile detectate
- Sugestii pentru organizarea terapiei medicamentoase

Răspunde întotdeauna clar, empatic și profesional. Folosește exemple practice când este posibil. Dacă nu ești sigur de ceva, recomandă consultarea unui medic sau farmacist."#;

pub fn system_prompt(language: Language) -> &'static str {
    match language {
        Language::It => PROMPT_IT,
        Language::En => PROMPT_EN,
        Language::Ro => PROMPT_RO,
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("AI key not configured")]
    KeyMissing,

    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,

    #[error("AI credits depleted. Please contact support.")]
    CreditsDepleted,

    #[error("AI gateway error: {0}")]
    Upstream(u16),

    #[error("AI gateway request failed: {0}")]
    Request(#[from] reqwest::Error),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::CreditsDepleted => StatusCode::PAYMENT_REQUIRED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Serialize)]
struct CompletionMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: [CompletionMessage<'a>; 2],
}

#[derive(Deserialize, Default)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: Option<CompletionContent>,
}

#[derive(Deserialize)]
struct CompletionContent {
    content: Option<String>,
}

pub struct GatewayClient {
    client: Client,
    url: String,
    key: Option<String>,
    model: String,
}

impl GatewayClient {
    pub fn new(url: impl Into<String>, key: Option<String>, model: impl Into<String>) -> AppResult<Self> {
        Ok(Self {
            client: http_client()?.clone(),
            url: url.into(),
            key: key.filter(|k| !k.trim().is_empty()),
            model: model.into(),
        })
    }

    pub async fn complete(&self, message: &str, language: Language) -> Result<String, GatewayError> {
        let key = self.key.as_deref().ok_or_else(|| {
            log::error!("[Assistant] gateway key not configured");
            GatewayError::KeyMissing
        })?;

        let body = CompletionRequest {
            model: &self.model,
            messages: [
                CompletionMessage {
                    role: "system",
                    content: system_prompt(language),
                },
                CompletionMessage {
                    role: "user",
                    content: message,
                },
            ],
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            log::error!("[Assistant] gateway error {}: {}", status, text);
            return Err(match status.as_u16() {
                429 => GatewayError::RateLimited,
                402 => GatewayError::CreditsDepleted,
                code => GatewayError::Upstream(code),
            });
        }

        let parsed: CompletionResponse = response.json().await?;
        let reply = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| EMPTY_REPLY.to_string());
        log::debug!("[Assistant] reply: {}", reply);
        Ok(reply)
    }
}

// ============ HTTP ============

#[derive(Debug, Deserialize)]
pub struct AssistantRequest {
    pub message: String,
    #[serde(default)]
    pub language: Option<String>,
}

/// `{reply}` on success, `{error}` with 429 / 402 / 500 otherwise
async fn respond(gateway: &GatewayClient, request: AssistantRequest) -> Response {
    let language = Language::from_code(request.language.as_deref().unwrap_or("it"));
    log::info!("[Assistant] message received (language {})", language.code());

    match gateway.complete(&request.message, language).await {
        Ok(reply) => Json(json!({ "reply": reply })).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn chat_assistant_handler(
    State(gateway): State<Arc<GatewayClient>>,
    payload: Result<Json<AssistantRequest>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(request)) => respond(&gateway, request).await,
        Err(rejection) => malformed_request(rejection),
    }
}

/// Unreadable bodies fail like any other request error
fn malformed_request(rejection: JsonRejection) -> Response {
    log::error!("[Assistant] bad request: {}", rejection.body_text());
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": rejection.body_text() })),
    )
        .into_response()
}

/// `POST /chat-assistant`, merged into the main router
pub fn router(gateway: Arc<GatewayClient>) -> Router {
    Router::new()
        .route("/chat-assistant", post(chat_assistant_handler))
        .with_state(gateway)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::spawn_server;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use tower::ServiceExt;

    async fn fake_gateway(status: StatusCode, body: serde_json::Value) -> String {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let body = body.clone();
                async move { (status, Json(body)) }
            }),
        );
        format!("{}/v1/chat/completions", spawn_server(app).await)
    }

    async fn call(gateway: GatewayClient, body: &str) -> (StatusCode, serde_json::Value) {
        let response = router(Arc::new(gateway))
            .oneshot(
                Request::post("/chat-assistant")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_prompt_per_language() {
        assert!(system_prompt(Language::It).starts_with("Sei un assistente"));
        assert!(system_prompt(Language::En).starts_with("You are an expert"));
        assert!(system_prompt(Language::Ro).starts_with("Ești un asistent"));
    }

    #[tokio::test]
    async fn test_sends_system_and_user_messages() {
        let seen = Arc::new(Mutex::new(None::<serde_json::Value>));
        let captured = seen.clone();
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move |Json(body): Json<serde_json::Value>| {
                let captured = captured.clone();
                async move {
                    *captured.lock().unwrap() = Some(body);
                    Json(json!({ "choices": [{ "message": { "content": "Ciao!" } }] }))
                }
            }),
        );
        let url = format!("{}/v1/chat/completions", spawn_server(app).await);
        let gateway = GatewayClient::new(url, Some("key".into()), DEFAULT_MODEL).unwrap();

        let (status, body) = call(gateway, r#"{"message":"how it works","language":"en"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reply"], "Ciao!");

        let sent = seen.lock().unwrap().clone().unwrap();
        assert_eq!(sent["model"], DEFAULT_MODEL);
        assert_eq!(sent["messages"][0]["role"], "system");
        assert_eq!(sent["messages"][0]["content"], PROMPT_EN);
        assert_eq!(sent["messages"][1]["content"], "how it works");
    }

    #[tokio::test]
    async fn test_rate_limit_and_credits() {
        let url = fake_gateway(StatusCode::TOO_MANY_REQUESTS, json!({})).await;
        let gateway = GatewayClient::new(url, Some("key".into()), DEFAULT_MODEL).unwrap();
        let (status, body) = call(gateway, r#"{"message":"ciao"}"#).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "Rate limit exceeded. Please try again later.");

        let url = fake_gateway(StatusCode::PAYMENT_REQUIRED, json!({})).await;
        let gateway = GatewayClient::new(url, Some("key".into()), DEFAULT_MODEL).unwrap();
        let (status, body) = call(gateway, r#"{"message":"ciao"}"#).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["error"], "AI credits depleted. Please contact support.");
    }

    #[tokio::test]
    async fn test_upstream_failure_is_500() {
        let url = fake_gateway(StatusCode::SERVICE_UNAVAILABLE, json!({})).await;
        let gateway = GatewayClient::new(url, Some("key".into()), DEFAULT_MODEL).unwrap();
        let (status, body) = call(gateway, r#"{"message":"ciao"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "AI gateway error: 503");
    }

    #[tokio::test]
    async fn test_empty_choices_use_apology() {
        let url = fake_gateway(StatusCode::OK, json!({ "choices": [] })).await;
        let gateway = GatewayClient::new(url, Some("key".into()), DEFAULT_MODEL).unwrap();
        let (status, body) = call(gateway, r#"{"message":"ciao"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reply"], EMPTY_REPLY);
    }

    #[tokio::test]
    async fn test_missing_key() {
        let gateway = GatewayClient::new(DEFAULT_GATEWAY_URL, None, DEFAULT_MODEL).unwrap();
        let (status, body) = call(gateway, r#"{"message":"ciao"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "AI key not configured");
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let gateway = GatewayClient::new(DEFAULT_GATEWAY_URL, None, DEFAULT_MODEL).unwrap();
        let (status, body) = call(gateway, "not json").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());

        let gateway = GatewayClient::new(DEFAULT_GATEWAY_URL, None, DEFAULT_MODEL).unwrap();
        let (status, _) = call(gateway, r#"{"language":"en"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
