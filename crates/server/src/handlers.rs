//! Route handlers. Each one resolves the caller, performs one ledger
//! operation and serializes the outcome.

use std::collections::{BTreeMap, BTreeSet};

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use readearn_common::{
    time_until_next_reset, Account, AccountId, Profile, ReferralLevelReward, ResetCountdown,
    SocialPlatform, SocialTask, TelegramAuthPayload, TELEGRAM_AUTH_MAX_AGE_SECS,
};
use readearn_ledger::referral::parse_start_payload;
use readearn_ledger::{
    BotReferral, LeaderboardView, Outcome, QuizGrant, ReadingGrant, ReadingSession,
    ReferralBinding, ReferredUser, RejectReason, Settlement, SocialTaskStatus, SpinGrant,
    TaskVerification, WalletNonce,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::{issue_access_token, AuthUser, BotKey};
use crate::error::{outcome_value, respond, Applied, ApiError};
use crate::state::AppState;

type ApiResult<T> = Result<Json<Applied<T>>, ApiError>;

// ════════════════════════════════════════════════════════════════════════════════
// VIEWS
// ════════════════════════════════════════════════════════════════════════════════

/// Account fields safe to return to the owner. Nonces and the password hash
/// are never exposed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: AccountId,
    pub telegram_id: Option<i64>,
    pub wallet_address: Option<String>,
    pub email: Option<String>,
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
    pub lifetime_balance: u64,
    pub weekly_earned: i64,
    pub last_spin_at: Option<DateTime<Utc>>,
    pub last_book_reward_at: Option<DateTime<Utc>>,
    pub quiz_attempts_count: u8,
    pub telegram_reward_claimed: bool,
    pub social_tasks: Vec<SocialTask>,
    pub compulsory_bundle_awarded: bool,
    pub optional_bundle_awarded: bool,
    pub wallet_connected: bool,
    pub referred_by: Option<AccountId>,
    pub referral_count: u64,
    pub is_premium_user: bool,
    pub premium_books: BTreeSet<String>,
}

impl From<Account> for AccountView {
    fn from(a: Account) -> Self {
        Self {
            id: a.id,
            telegram_id: a.identity.telegram_id,
            wallet_address: a.identity.wallet_address,
            email: a.identity.email,
            profile: a.profile,
            created_at: a.created_at,
            lifetime_balance: a.lifetime_balance,
            weekly_earned: a.weekly_earned,
            last_spin_at: a.last_spin_at,
            last_book_reward_at: a.last_book_reward_at,
            quiz_attempts_count: a.quiz_attempts_count,
            telegram_reward_claimed: a.telegram_reward_claimed,
            social_tasks: a.social_tasks,
            compulsory_bundle_awarded: a.compulsory_bundle_awarded,
            optional_bundle_awarded: a.optional_bundle_awarded,
            wallet_connected: a.wallet_connected,
            referred_by: a.referred_by,
            referral_count: a.referral_count,
            is_premium_user: a.is_premium_user,
            premium_books: a.premium_books,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeView {
    pub account: AccountView,
    pub weekly_reset: ResetCountdown,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub account: AccountView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginView {
    pub token: String,
    pub created: bool,
    pub account: AccountView,
    /// Referral step result, `null` when nothing was attempted.
    pub referral: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct AccountEnvelope {
    pub account: AccountView,
}

#[derive(Debug, Serialize)]
pub struct Levels {
    pub levels: Vec<ReferralLevelReward>,
}

#[derive(Debug, Serialize)]
pub struct Downline {
    pub users: Vec<ReferredUser>,
}

#[derive(Debug, Serialize)]
pub struct BotReferralView {
    pub result: BotReferral,
}

// ════════════════════════════════════════════════════════════════════════════════
// REQUESTS
// ════════════════════════════════════════════════════════════════════════════════

/// Telegram Login Widget fields as sent by Telegram (`id`, `first_name`,
/// `auth_date`, `hash`, ...) plus an optional referral code.
#[derive(Debug, Deserialize)]
pub struct TelegramLoginRequest {
    #[serde(rename = "referralCode", default)]
    pub referral_code: Option<String>,
    #[serde(flatten)]
    pub auth: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct WalletRequest {
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SpinRequest {
    #[serde(default)]
    pub amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct QuizRequest {
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookRequest {
    pub book_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingClaimRequest {
    pub token: String,
    pub book_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReferralRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotReferralRequest {
    pub joiner_telegram_id: i64,
    /// Deep-link payload, `r<digits>` or `<digits>`.
    pub start_payload: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

fn platform(raw: &str) -> Result<SocialPlatform, ApiError> {
    raw.parse::<SocialPlatform>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

// ════════════════════════════════════════════════════════════════════════════════
// AUTH & ACCOUNT
// ════════════════════════════════════════════════════════════════════════════════

/// GET /health
pub async fn health() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /auth/telegram
///
/// The payload must carry a valid widget signature for the configured bot
/// and an `auth_date` less than a day from now.
pub async fn login_telegram(
    State(state): State<AppState>,
    Json(req): Json<TelegramLoginRequest>,
) -> ApiResult<LoginView> {
    let bot_token = state
        .telegram_login_token
        .clone()
        .ok_or_else(|| ApiError::Unavailable("telegram login is not configured".into()))?;
    let now = Utc::now();
    let user = TelegramAuthPayload::from_json(req.auth)
        .verify(&bot_token, now, TELEGRAM_AUTH_MAX_AGE_SECS)
        .map_err(|e| {
            debug!(error = %e, "telegram login rejected");
            ApiError::Unauthorized
        })?;

    let login = state
        .ledger
        .accounts
        .login_telegram(user.telegram_id, user.profile, req.referral_code.as_deref(), now)
        .await?;
    let token = issue_access_token(&state, login.account.id, now)?;
    info!(account = %login.account.id, created = login.created, "telegram login");
    Ok(Json(Applied::new(LoginView {
        token,
        created: login.created,
        referral: login.referral.as_ref().map(outcome_value),
        account: login.account.into(),
    })))
}

/// POST /auth/wallet/nonce
pub async fn wallet_nonce(
    State(state): State<AppState>,
    Json(req): Json<WalletRequest>,
) -> ApiResult<WalletNonce> {
    respond(state.ledger.accounts.wallet_nonce(&req.address, Utc::now()).await?)
}

/// POST /auth/email
pub async fn register_email(
    State(state): State<AppState>,
    Json(req): Json<EmailRequest>,
) -> ApiResult<Session> {
    let now = Utc::now();
    let account = match state
        .ledger
        .accounts
        .register_email(&req.email, &req.password, now)
        .await?
    {
        Outcome::Applied(acc) => acc,
        Outcome::Rejected(reason) => return Err(ApiError::Rejected(reason)),
    };
    let token = issue_access_token(&state, account.id, now)?;
    Ok(Json(Applied::new(Session {
        token,
        account: account.into(),
    })))
}

/// POST /auth/email/login
pub async fn login_email(
    State(state): State<AppState>,
    Json(req): Json<EmailRequest>,
) -> ApiResult<Session> {
    let account = match state.ledger.accounts.login_email(&req.email, &req.password).await? {
        Outcome::Applied(acc) => acc,
        Outcome::Rejected(reason) => return Err(ApiError::Rejected(reason)),
    };
    let token = issue_access_token(&state, account.id, Utc::now())?;
    info!(account = %account.id, "email login");
    Ok(Json(Applied::new(Session {
        token,
        account: account.into(),
    })))
}

/// GET /me
pub async fn me(AuthUser(id): AuthUser, State(state): State<AppState>) -> ApiResult<MeView> {
    let account = state.ledger.accounts.account(id).await?;
    Ok(Json(Applied::new(MeView {
        account: account.into(),
        weekly_reset: time_until_next_reset(Utc::now()),
    })))
}

/// POST /wallet/connect
pub async fn connect_wallet(
    AuthUser(id): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<WalletRequest>,
) -> ApiResult<Settlement> {
    respond(state.ledger.accounts.connect_wallet(id, &req.address, Utc::now()).await?)
}

// ════════════════════════════════════════════════════════════════════════════════
// REWARDS
// ════════════════════════════════════════════════════════════════════════════════

/// POST /rewards/spin
pub async fn claim_spin(
    AuthUser(id): AuthUser,
    State(state): State<AppState>,
    body: Option<Json<SpinRequest>>,
) -> ApiResult<SpinGrant> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    respond(state.ledger.rewards.claim_spin(id, req.amount, Utc::now()).await?)
}

/// POST /rewards/quiz
pub async fn claim_quiz(
    AuthUser(id): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<QuizRequest>,
) -> ApiResult<QuizGrant> {
    respond(state.ledger.rewards.claim_quiz(id, req.amount, Utc::now()).await?)
}

/// POST /rewards/reading/session
pub async fn open_reading_session(
    AuthUser(id): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<BookRequest>,
) -> ApiResult<ReadingSession> {
    respond(
        state
            .ledger
            .rewards
            .open_reading_session(id, &req.book_id, Utc::now())
            .await?,
    )
}

/// POST /rewards/reading
pub async fn claim_reading(
    AuthUser(id): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<ReadingClaimRequest>,
) -> ApiResult<ReadingGrant> {
    respond(
        state
            .ledger
            .rewards
            .claim_reading(id, &req.token, &req.book_id, Utc::now())
            .await?,
    )
}

// ════════════════════════════════════════════════════════════════════════════════
// SOCIAL TASKS
// ════════════════════════════════════════════════════════════════════════════════

/// POST /tasks/telegram/follow
pub async fn telegram_follow(
    AuthUser(id): AuthUser,
    State(state): State<AppState>,
) -> ApiResult<TaskVerification> {
    let membership = state
        .membership
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("telegram integration disabled".into()))?;
    let account = state.ledger.accounts.account(id).await?;
    let telegram_id = account
        .identity
        .telegram_id
        .ok_or_else(|| ApiError::BadRequest("account has no telegram id".into()))?;

    let joined = membership.is_channel_member(telegram_id).await.map_err(|e| {
        warn!(account = %id, error = %e, "membership lookup failed");
        ApiError::Unavailable("could not verify channel membership".into())
    })?;
    if !joined {
        return Err(ApiError::Rejected(RejectReason::NotChannelMember));
    }
    respond(state.ledger.rewards.record_telegram_follow(id, Utc::now()).await?)
}

/// POST /tasks/:platform/start
pub async fn start_task(
    AuthUser(id): AuthUser,
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> ApiResult<SocialTaskStatus> {
    let platform = platform(&raw)?;
    respond(state.ledger.rewards.start_social_task(id, platform, Utc::now()).await?)
}

/// POST /tasks/:platform/verify
pub async fn verify_task(
    AuthUser(id): AuthUser,
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> ApiResult<TaskVerification> {
    let platform = platform(&raw)?;
    respond(state.ledger.rewards.verify_social_task(id, platform, Utc::now()).await?)
}

// ════════════════════════════════════════════════════════════════════════════════
// REFERRALS & RANKINGS
// ════════════════════════════════════════════════════════════════════════════════

/// POST /referral/apply
pub async fn apply_referral(
    AuthUser(id): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<ReferralRequest>,
) -> ApiResult<ReferralBinding> {
    respond(state.ledger.referrals.bind_with_code(id, &req.code, Utc::now()).await?)
}

/// GET /referral/levels
pub async fn referral_levels(AuthUser(id): AuthUser, State(state): State<AppState>) -> ApiResult<Levels> {
    let levels = state.ledger.referrals.referral_levels(id).await?;
    Ok(Json(Applied::new(Levels { levels })))
}

/// GET /referrals
pub async fn referred_users(AuthUser(id): AuthUser, State(state): State<AppState>) -> ApiResult<Downline> {
    let users = state.ledger.referrals.referred_users(id).await?;
    Ok(Json(Applied::new(Downline { users })))
}

/// GET /leaderboard
pub async fn leaderboard(
    caller: Option<AuthUser>,
    State(state): State<AppState>,
) -> ApiResult<LeaderboardView> {
    let view = state
        .ledger
        .leaderboard
        .view(caller.map(|AuthUser(id)| id), Utc::now())
        .await?;
    Ok(Json(Applied::new(view)))
}

// ════════════════════════════════════════════════════════════════════════════════
// PREMIUM
// ════════════════════════════════════════════════════════════════════════════════

/// POST /premium
pub async fn set_premium(AuthUser(id): AuthUser, State(state): State<AppState>) -> ApiResult<AccountEnvelope> {
    let account = state.ledger.accounts.set_premium(id).await?;
    Ok(Json(Applied::new(AccountEnvelope {
        account: account.into(),
    })))
}

/// POST /premium/books
pub async fn unlock_book(
    AuthUser(id): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<BookRequest>,
) -> ApiResult<AccountEnvelope> {
    let outcome = state.ledger.accounts.unlock_premium_book(id, &req.book_id).await?;
    respond(outcome.map(|account| AccountEnvelope {
        account: account.into(),
    }))
}

// ════════════════════════════════════════════════════════════════════════════════
// BOT
// ════════════════════════════════════════════════════════════════════════════════

/// POST /bot/referral
pub async fn bot_referral(
    _bot: BotKey,
    State(state): State<AppState>,
    Json(req): Json<BotReferralRequest>,
) -> ApiResult<BotReferralView> {
    let referrer = parse_start_payload(&req.start_payload)
        .ok_or_else(|| ApiError::BadRequest("start payload is not a referral link".into()))?;
    let profile = Profile {
        first_name: req.first_name,
        last_name: req.last_name,
        username: req.username,
        photo_url: None,
    };
    let result = state
        .ledger
        .referrals
        .record_bot_referral(req.joiner_telegram_id, referrer, profile, Utc::now())
        .await?;
    Ok(Json(Applied::new(BotReferralView { result })))
}
