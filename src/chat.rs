//! Chat helper
//!
//! Sends the user's question to the remote chat endpoint and falls back to
//! a small keyword table when offline or when the endpoint fails.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::http_client;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    It,
    En,
    Ro,
}

impl Language {
    /// Accepts `en`, `en-US`, `RO`... Anything unknown is Italian.
    pub fn from_code(code: &str) -> Self {
        let primary = code
            .trim()
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match primary.as_str() {
            "en" => Language::En,
            "ro" => Language::Ro,
            _ => Language::It,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Language::It => "it",
            Language::En => "en",
            Language::Ro => "ro",
        }
    }
}

// ============ Offline replies ============

const IT_REPLIES: &[(&str, &str)] = &[
    ("come registro", "Per registrare un medicinale, vai alla sezione 'Registro Medicinali' dal menu principale. Seleziona la data, inserisci il nome del medicinale e l'orario di assunzione."),
    ("come funziona", "L'app permette di registrare i medicinali quotidiani, monitorare l'andamento settimanale dei parametri vitali e ricevere notifiche per gli orari di assunzione."),
    ("parametri vitali", "Puoi inserire pressione e glicemia nella sezione 'Registro Medicinali'. I dati verranno mostrati nel grafico dell'andamento settimanale."),
    ("notifiche", "Le notifiche vengono attivate automaticamente quando è l'ora di prendere un medicinale. Puoi disattivarle usando il pulsante ON/OFF nella sezione 'Gestione Quotidiana'."),
];
const IT_DEFAULT: &str = "Quando sei online, posso rispondere a domande più specifiche. Per ora: usa il menu per navigare tra Registro Medicinali, Gestione Quotidiana e Andamento.";

const EN_REPLIES: &[(&str, &str)] = &[
    ("how to register", "To register a medication, go to the 'Medicine Registry' section from the main menu. Select the date, enter the medication name and intake time."),
    ("how it works", "The app allows you to register daily medications, monitor weekly trends of vital parameters and receive notifications for intake times."),
    ("vital parameters", "You can enter blood pressure and glucose in the 'Medicine Registry' section. The data will be shown in the weekly progress chart."),
    ("notifications", "Notifications are automatically activated when it's time to take a medication. You can disable them using the ON/OFF button in the 'Daily Management' section."),
];
const EN_DEFAULT: &str = "When you're online, I can answer more specific questions. For now: use the menu to navigate between Medicine Registry, Daily Management and Progress.";

const RO_REPLIES: &[(&str, &str)] = &[
    ("cum înregistrez", "Pentru a înregistra un medicament, accesați secțiunea 'Registrul Medicamentelor' din meniul principal. Selectați data, introduceți numele medicamentului și ora administrării."),
    ("cum funcționează", "Aplicația vă permite să înregistrați medicamentele zilnice, să monitorizați tendințele săptămânale ale parametrilor vitali și să primiți notificări pentru orele de administrare."),
    ("parametri vitali", "Puteți introduce tensiunea arterială și glicemia în secțiunea 'Registrul Medicamentelor'. Datele vor fi afișate în graficul progresului săptămânal."),
    ("notificări", "Notificările sunt activate automat când este timpul să luați un medicament. Le puteți dezactiva folosind butonul ON/OFF din secțiunea 'Gestionare Zilnică'."),
];
const RO_DEFAULT: &str = "Când sunteți online, pot răspunde la întrebări mai specifice. Deocamdată: folosiți meniul pentru a naviga între Registrul Medicamentelor, Gestionare Zilnică și Progres.";

/// First keyword contained in the lowercased message wins
pub fn offline_reply(message: &str, language: Language) -> &'static str {
    let (table, default) = match language {
        Language::It => (IT_REPLIES, IT_DEFAULT),
        Language::En => (EN_REPLIES, EN_DEFAULT),
        Language::Ro => (RO_REPLIES, RO_DEFAULT),
    };
    let lowered = message.to_lowercase();
    table
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, reply)| *reply)
        .unwrap_or(default)
}

// ============ Remote endpoint ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub language: String,
}

/// Endpoint answer: either `reply` or `error`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ChatError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("credits exhausted: {0}")]
    CreditsExhausted(String),

    #[error("chat request failed: {0}")]
    Failed(String),
}

impl ChatError {
    pub fn classify(status: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == Some(429) || message.contains("Rate limit") {
            ChatError::RateLimited(message)
        } else if status == Some(402) || message.contains("credits") {
            ChatError::CreditsExhausted(message)
        } else {
            ChatError::Failed(message)
        }
    }
}

pub struct ChatClient {
    client: Client,
    endpoint: String,
}

impl ChatClient {
    pub fn new(endpoint: impl Into<String>) -> AppResult<Self> {
        Ok(Self {
            client: http_client()?.clone(),
            endpoint: endpoint.into(),
        })
    }

    pub async fn send(&self, message: &str, language: Language) -> Result<String, ChatError> {
        let request = ChatRequest {
            message: message.to_string(),
            language: language.code().to_string(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatError::Failed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ChatError::Failed(e.to_string()))?;
        let parsed: ChatResponse = serde_json::from_str(&body).unwrap_or_default();

        if let Some(error) = parsed.error {
            return Err(ChatError::classify(Some(status.as_u16()), error));
        }
        if !status.is_success() {
            return Err(ChatError::classify(Some(status.as_u16()), body));
        }
        parsed
            .reply
            .ok_or_else(|| ChatError::Failed("response has no reply".to_string()))
    }
}

/// Reply shown to the user, plus the transient notice if the remote failed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub reply: String,
    pub online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<ChatError>,
}

pub struct ChatAssistant {
    client: Option<ChatClient>,
}

impl ChatAssistant {
    /// Without a client every answer comes from the offline table
    pub fn new(client: Option<ChatClient>) -> Self {
        Self { client }
    }

    pub async fn reply(&self, message: &str, language: Language, online: bool) -> AppResult<ChatReply> {
        let message = message.trim();
        if message.is_empty() {
            return Err(AppError::InvalidInput("message is empty".to_string()));
        }

        let client = match (&self.client, online) {
            (Some(client), true) => client,
            _ => {
                return Ok(ChatReply {
                    reply: offline_reply(message, language).to_string(),
                    online: false,
                    notice: None,
                })
            }
        };

        match client.send(message, language).await {
            Ok(reply) => Ok(ChatReply {
                reply,
                online: true,
                notice: None,
            }),
            Err(e) => {
                log::warn!("[Chat] remote reply failed, using offline answer: {}", e);
                Ok(ChatReply {
                    reply: offline_reply(message, language).to_string(),
                    online: false,
                    notice: Some(e),
                })
            }
        }
    }
}
