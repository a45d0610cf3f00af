pub mod alerts;
pub mod analysis;
pub mod assistant;
pub mod backend;
pub mod chat;
pub mod config;
pub mod error;
pub mod medications;
pub mod models;
pub mod notification;
pub mod server;
pub mod status;
pub mod storage;
pub mod vitals;

#[cfg(test)]
mod test_util;

use chrono::Local;
use std::sync::{Arc, Mutex};

use alerts::{LogOsNotifier, LogOutput, NoticeBoard};
use assistant::GatewayClient;
use backend::BackendClient;
use chat::{ChatAssistant, ChatClient};
use config::AppConfig;
use error::AppResult;
use notification::{run_scheduler, ReminderService};
use server::AppState;
use storage::{Repository, SqliteKvStore};

const NOTICE_CAPACITY: usize = 50;

/// Open the store, start the reminder loop and serve the API until Ctrl-C
pub async fn run(config: AppConfig) -> AppResult<()> {
    log::info!("[App] data directory {:?}", config.data_dir);

    let store = SqliteKvStore::open(&config.data_dir)?;
    let repo = Arc::new(Mutex::new(Repository::new(store)));

    let notices = Arc::new(NoticeBoard::new(NOTICE_CAPACITY));
    let reminders = Arc::new(ReminderService::new(
        repo.clone(),
        Arc::new(LogOutput::new(notices.clone())),
        Arc::new(LogOsNotifier),
        Local::now().date_naive(),
        config.notifications_enabled,
    ));

    let chat_client = config.chat_endpoint.clone().map(ChatClient::new).transpose()?;
    if chat_client.is_none() {
        log::info!("[App] no chat endpoint configured, chat answers offline");
    }
    let gateway = GatewayClient::new(
        config.gateway_url.clone(),
        config.gateway_key.clone(),
        config.model.clone(),
    )?;
    let backend = match config.backend.clone() {
        Some(cfg) => Some(Arc::new(BackendClient::new(cfg)?)),
        None => {
            log::info!("[App] backend database not configured");
            None
        }
    };

    let scheduler = tokio::spawn(run_scheduler(reminders.clone(), config.poll_interval));

    let state = AppState {
        repo,
        reminders: reminders.clone(),
        notices,
        chat: Arc::new(ChatAssistant::new(chat_client)),
        gateway: Arc::new(gateway),
        backend,
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("[App] cannot listen for Ctrl-C: {}", e);
        }
        log::info!("[App] shutting down");
    };
    let served = server::start_server(state, config.port, shutdown).await;

    reminders.stop().await;
    if let Err(e) = scheduler.await {
        log::error!("[App] scheduler task failed: {}", e);
    }
    served
}
