//! # Read-and-Earn HTTP Server
//!
//! Thin axum glue over [`readearn_ledger::Ledger`]. Handlers resolve the
//! authenticated account, call exactly one ledger operation and serialize the
//! result.
//!
//! ## Endpoints
//!
//! | Method | Path | Auth |
//! |--------|------|------|
//! | GET | `/health` | none |
//! | POST | `/auth/telegram` | Telegram widget signature |
//! | POST | `/auth/wallet/nonce` | none |
//! | POST | `/auth/email`, `/auth/email/login` | none (password) |
//! | GET | `/me` | bearer |
//! | POST | `/wallet/connect` | bearer |
//! | POST | `/rewards/spin`, `/rewards/quiz` | bearer |
//! | POST | `/rewards/reading/session`, `/rewards/reading` | bearer |
//! | POST | `/tasks/telegram/follow` | bearer |
//! | POST | `/tasks/:platform/start`, `/tasks/:platform/verify` | bearer |
//! | POST | `/referral/apply` | bearer |
//! | GET | `/referral/levels`, `/referrals` | bearer |
//! | GET | `/leaderboard` | optional bearer |
//! | POST | `/premium`, `/premium/books` | bearer |
//! | POST | `/bot/referral` | bot key |
//!
//! ## Response Shape
//!
//! Applied operations return `200` with `{"applied": true, ...}`. Business
//! rejections return `400` with `{"applied": false, "code", "message"}` and
//! `retryAfterSecs` for time-gated ones. See [`error::ApiError`].

pub mod auth;
pub mod error;
pub mod handlers;
pub mod scheduler;
pub mod state;
pub mod telegram;

use axum::routing::{get, post};
use axum::Router;

pub use error::ApiError;
pub use state::AppState;

/// Builds the full route table over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/auth/telegram", post(handlers::login_telegram))
        .route("/auth/wallet/nonce", post(handlers::wallet_nonce))
        .route("/auth/email", post(handlers::register_email))
        .route("/auth/email/login", post(handlers::login_email))
        .route("/me", get(handlers::me))
        .route("/wallet/connect", post(handlers::connect_wallet))
        .route("/rewards/spin", post(handlers::claim_spin))
        .route("/rewards/quiz", post(handlers::claim_quiz))
        .route("/rewards/reading/session", post(handlers::open_reading_session))
        .route("/rewards/reading", post(handlers::claim_reading))
        .route("/tasks/telegram/follow", post(handlers::telegram_follow))
        .route("/tasks/:platform/start", post(handlers::start_task))
        .route("/tasks/:platform/verify", post(handlers::verify_task))
        .route("/referral/apply", post(handlers::apply_referral))
        .route("/referral/levels", get(handlers::referral_levels))
        .route("/referrals", get(handlers::referred_users))
        .route("/leaderboard", get(handlers::leaderboard))
        .route("/premium", post(handlers::set_premium))
        .route("/premium/books", post(handlers::unlock_book))
        .route("/bot/referral", post(handlers::bot_referral))
        .with_state(state)
}
