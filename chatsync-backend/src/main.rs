//! `chatsync-backend` -- in-memory reference backend.
//!
//! Serves the socket and REST surfaces the client speaks, for local
//! development and the integration tests.
//!
//! ```bash
//! # Demo users alice/alice-token and bob/bob-token on 0.0.0.0:8080
//! cargo run --bin chatsync-backend
//!
//! cargo run --bin chatsync-backend -- --bind 127.0.0.1:9100 --config backend.toml
//! ```

use std::sync::Arc;

use clap::Parser;
use chatsync_backend::config::{BackendCliArgs, BackendConfig, UserAccount};
use chatsync_backend::server::{self, ServerState};
use chatsync_backend::store::ChatStore;
use chatsync_proto::message::UserId;

#[tokio::main]
async fn main() {
    let cli = BackendCliArgs::parse();

    let config = match BackendConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting chatsync backend");

    let store = ChatStore::with_max_pending_actions(config.max_pending_actions);
    let users = if config.users.is_empty() {
        tracing::info!("no users configured, seeding alice and bob");
        vec![
            UserAccount {
                id: "alice".into(),
                token: "alice-token".into(),
            },
            UserAccount {
                id: "bob".into(),
                token: "bob-token".into(),
            },
        ]
    } else {
        config.users.clone()
    };
    for account in &users {
        store.add_user(&UserId::new(&account.id), &account.token).await;
    }
    if let [first, second, ..] = users.as_slice() {
        let chat = store
            .create_chat(&UserId::new(&first.id), &UserId::new(&second.id))
            .await;
        tracing::info!(chat_id = %chat, "seeded chat");
    }

    let state = Arc::new(ServerState::with_store(store));
    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "backend listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start backend");
            std::process::exit(1);
        }
    }
}
