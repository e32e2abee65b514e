use std::sync::Arc;

use chrono::Duration;
use readearn_common::Config;
use readearn_ledger::Ledger;

use crate::telegram::ChannelMembership;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    /// Lifetime of issued bearer tokens.
    pub access_ttl: Duration,
    /// Secret the companion bot presents. `None` disables bot routes.
    pub bot_api_key: Option<Arc<str>>,
    /// Bot token that signs Telegram login payloads. `None` disables
    /// Telegram login.
    pub telegram_login_token: Option<Arc<str>>,
    /// `None` when no Telegram bot token is configured.
    pub membership: Option<Arc<dyn ChannelMembership>>,
}

impl AppState {
    pub fn new(
        ledger: Arc<Ledger>,
        config: &Config,
        membership: Option<Arc<dyn ChannelMembership>>,
    ) -> Self {
        Self {
            ledger,
            access_ttl: Duration::seconds(config.access_token_ttl_secs),
            bot_api_key: config.bot_api_key.as_deref().map(Arc::from),
            telegram_login_token: config.telegram.bot_token.as_deref().map(Arc::from),
            membership,
        }
    }
}
