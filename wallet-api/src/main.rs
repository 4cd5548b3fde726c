use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpRequest, HttpResponse, HttpServer, Responder};
use chrono::{NaiveDate, Utc};
use common::{
    db, models,
    utils::{BetSlot, MatchOutcome, TxStatus, UserStatus},
};
use db::establish_connection;
use dotenv::dotenv;
use engine::engine::{CommissionPayment, Engine, SettlementSummary};
use engine::errors::EngineError;
use engine::ledger::Transaction;
use engine::predictions::{Bet, NewPrediction, Prediction};
use engine::vip::{VipLevel, VipTable};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use sqlx::{Pool, Postgres};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::gateway::GatewayClient;

mod config;
mod gateway;
mod metrics;

#[derive(Deserialize)]
struct RegisterRequest {
    country: String,
    referral_code: Option<String>,
}

#[derive(Deserialize)]
struct DepositRequest {
    user_id: i64,
    amount: i64,
    reference: Option<String>,
}

#[derive(Deserialize)]
struct WithdrawRequest {
    user_id: i64,
    amount: i64,
    reference: Option<String>,
}

#[derive(Deserialize)]
struct PlaceBetRequest {
    user_id: i64,
    prediction_id: i64,
    slot: String,
}

#[derive(Deserialize)]
struct ClaimRequest {
    user_id: i64,
}

#[derive(Deserialize)]
struct LedgerQuery {
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

#[derive(Deserialize)]
struct WebhookPayload {
    reference: String,
    status: String,
}

#[derive(Deserialize)]
struct StatusRequest {
    status: String,
}

#[derive(Deserialize)]
struct SettleRequest {
    result: String,
}

const LOCK_RETRIES: u32 = 2;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Lock-wait timeouts are transient. Retry a couple of times before
/// surfacing 503 to the client.
async fn retry_conflict<T, F, Fut>(mut call: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Err(EngineError::ConcurrencyConflict) if attempt < LOCK_RETRIES => {
                attempt += 1;
                tokio::time::sleep(LOCK_RETRY_DELAY).await;
            }
            outcome => return outcome,
        }
    }
}

fn error_response(err: EngineError) -> HttpResponse {
    match err {
        EngineError::Validation { .. } => HttpResponse::BadRequest().body(err.to_string()),
        EngineError::UserNotFound { .. } | EngineError::PredictionNotFound { .. } => {
            HttpResponse::NotFound().body(err.to_string())
        }
        EngineError::AccountNotActive => HttpResponse::Forbidden().body(err.to_string()),
        EngineError::InsufficientFunds { .. }
        | EngineError::AlreadyClaimed
        | EngineError::CyclicReferral
        | EngineError::PredictionNotActive
        | EngineError::DailyBetLimitExceeded
        | EngineError::DuplicateReference { .. } => HttpResponse::Conflict().body(err.to_string()),
        EngineError::ConcurrencyConflict => {
            HttpResponse::ServiceUnavailable().body(err.to_string())
        }
    }
}

fn authorized(req: &HttpRequest, config: &Config) -> bool {
    req.headers()
        .get("X-Admin-Token")
        .and_then(|value| value.to_str().ok())
        .map(|token| token == config.admin_token)
        .unwrap_or(false)
}

fn tx_row(tx: &Transaction) -> models::Transaction {
    models::Transaction {
        id: tx.id.clone(),
        user_id: tx.user_id,
        tx_type: tx.tx_type.to_string(),
        amount: tx.amount,
        balance_before: tx.balance_before,
        balance_after: tx.balance_after,
        status: tx.status.to_string(),
        reference: tx.reference.clone(),
        created_at: tx.created_at,
    }
}

fn bet_row(bet: &Bet) -> models::PredictionBet {
    models::PredictionBet {
        id: bet.id,
        user_id: bet.user_id,
        prediction_id: bet.prediction_id,
        slot: bet.slot.to_string(),
        amount: bet.amount,
        odds_x100: bet.odds_x100 as i32,
        status: bet.status.to_string(),
        placed_on: bet.placed_on,
        created_at: bet.created_at,
    }
}

fn prediction_row(p: &Prediction) -> models::Prediction {
    models::Prediction {
        id: p.id,
        home_team: p.home_team.clone(),
        away_team: p.away_team.clone(),
        league: p.league.clone(),
        match_date: p.match_date,
        predicted_outcome: p.predicted_outcome.to_string(),
        confidence: p.confidence as i16,
        odds_x100: p.odds_x100 as i32,
        refund_bps: p.refund_bps as i32,
        min_bet: p.min_bet,
        max_bet: p.max_bet,
        status: p.status.to_string(),
        result: p.result.map(|r| r.to_string()),
        created_at: p.created_at,
    }
}

fn vip_row(level: &VipLevel) -> models::VipLevel {
    models::VipLevel {
        level: level.level as i16,
        min_balance: level.min_balance,
        max_balance: level.max_balance,
        daily_reward: level.daily_reward,
        first_bet_bps: level.first_bet_bps as i32,
        second_bet_bps: level.second_bet_bps as i32,
        referral_bonus_bps: level.referral_bonus_bps as i32,
    }
}

fn run_row(run: &engine::engine::CommissionRun) -> models::CommissionRun {
    models::CommissionRun {
        period: run.period.clone(),
        last_processed_user: run.last_processed_user,
        processed: run.processed as i32,
        failed: run.failed as i32,
        skipped: run.skipped as i32,
        finished: run.finished,
        started_at: run.started_at,
        updated_at: Utc::now(),
    }
}

async fn persist_commissions(
    pool: &Pool<Postgres>,
    payments: &[CommissionPayment],
) -> anyhow::Result<()> {
    for payment in payments {
        db::insert_transaction(pool, &tx_row(&payment.transaction)).await?;
        db::add_referral_earnings(pool, payment.ancestor_id, payment.descendant_id, payment.amount)
            .await?;
        metrics::record_transaction(&payment.transaction.tx_type.to_string());
        metrics::record_commission(payment.level);
    }
    Ok(())
}

async fn persist_settlement(
    pool: &Pool<Postgres>,
    summary: &SettlementSummary,
) -> anyhow::Result<()> {
    db::update_prediction(
        pool,
        summary.prediction.id,
        &summary.prediction.status.to_string(),
        summary.prediction.result.map(|r| r.to_string()).as_deref(),
    )
    .await?;
    for settled in &summary.bets {
        db::update_bet_status(pool, settled.bet.id, &settled.bet.status.to_string()).await?;
        for tx in &settled.transactions {
            db::insert_transaction(pool, &tx_row(tx)).await?;
            metrics::record_transaction(&tx.tx_type.to_string());
        }
    }
    metrics::record_settlements("won", summary.won as u64);
    metrics::record_settlements("lost", summary.lost as u64);
    metrics::record_settlements("refunded", summary.refunded as u64);
    Ok(())
}

#[actix_web::post("/register")]
async fn register(req: web::Json<RegisterRequest>, app_state: web::Data<AppState>) -> impl Responder {
    let AppState { pool, engine, .. } = &**app_state;
    let RegisterRequest {
        country,
        referral_code,
    } = req.into_inner();

    let registered = match retry_conflict(|| {
        let engine = engine.clone();
        let country = country.clone();
        let referral_code = referral_code.clone();
        async move {
            engine
                .register_user(&country, referral_code.as_deref(), Utc::now())
                .await
        }
    })
    .await
    {
        Ok(registered) => registered,
        Err(e) => return error_response(e),
    };

    if let Err(e) = db::insert_user(
        pool,
        registered.user_id,
        &country,
        &UserStatus::ACTIVE.to_string(),
        &registered.referral_code,
        registered.referrer_id,
    )
    .await
    {
        error!("Failed to persist user {}: {}", registered.user_id, e);
        return HttpResponse::InternalServerError().body(format!("Failed to persist user: {}", e));
    }
    for (idx, ancestor) in registered.ancestors.iter().enumerate() {
        if let Some(ancestor_id) = ancestor {
            if let Err(e) =
                db::insert_referral(pool, *ancestor_id, registered.user_id, (idx + 1) as i16).await
            {
                error!(
                    "Failed to persist referral link {} -> {}: {}",
                    ancestor_id, registered.user_id, e
                );
                return HttpResponse::InternalServerError()
                    .body(format!("Failed to persist referral link: {}", e));
            }
        }
    }
    metrics::record_registration();

    HttpResponse::Created().json(json!({
        "user_id": registered.user_id,
        "referral_code": registered.referral_code,
        "referrer_id": registered.referrer_id,
    }))
}

#[actix_web::post("/deposit")]
async fn deposit(req: web::Json<DepositRequest>, app_state: web::Data<AppState>) -> impl Responder {
    let AppState {
        pool,
        engine,
        gateway,
        config,
    } = &**app_state;
    let DepositRequest {
        user_id,
        amount,
        reference,
    } = req.into_inner();
    info!("Deposit request from user {} for {} FCFA", user_id, amount);

    if amount < config.deposit_min_amount || amount > config.deposit_max_amount {
        return HttpResponse::BadRequest().body(format!(
            "Deposit amount must be between {} and {} FCFA",
            config.deposit_min_amount, config.deposit_max_amount
        ));
    }

    let (tx, fresh) = match retry_conflict(|| {
        let engine = engine.clone();
        let reference = reference.clone();
        async move { engine.deposit(user_id, amount, reference, Utc::now()).await }
    })
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => return error_response(e),
    };

    if fresh {
        if let Err(e) = db::insert_transaction(pool, &tx_row(&tx)).await {
            error!("Failed to persist deposit {}: {}", tx.reference, e);
            return HttpResponse::InternalServerError()
                .body(format!("Failed to record transaction: {}", e));
        }
        metrics::record_transaction(&tx.tx_type.to_string());
    }

    // A replayed reference that already settled must not hit the gateway again.
    if tx.status == TxStatus::PENDING {
        if let Err(e) = gateway.create_collection(amount, &tx.reference).await {
            warn!("Collection request failed for {}: {}", tx.reference, e);
            return HttpResponse::BadGateway().body(format!("Payment gateway unavailable: {}", e));
        }
    }

    HttpResponse::Ok().json(json!({
        "transaction_id": tx.id,
        "reference": tx.reference,
        "amount": tx.amount,
        "status": tx.status.to_string(),
    }))
}

#[actix_web::post("/withdraw")]
async fn withdraw(req: web::Json<WithdrawRequest>, app_state: web::Data<AppState>) -> impl Responder {
    let AppState {
        pool,
        engine,
        gateway,
        config,
    } = &**app_state;
    let WithdrawRequest {
        user_id,
        amount,
        reference,
    } = req.into_inner();
    info!(
        "Withdrawal request from user {} for {} FCFA",
        user_id, amount
    );

    if amount < config.withdrawal_min_amount || amount > config.withdrawal_max_amount {
        return HttpResponse::BadRequest().body(format!(
            "Withdrawal amount must be between {} and {} FCFA",
            config.withdrawal_min_amount, config.withdrawal_max_amount
        ));
    }

    let (tx, fresh) = match retry_conflict(|| {
        let engine = engine.clone();
        let reference = reference.clone();
        async move { engine.withdraw(user_id, amount, reference, Utc::now()).await }
    })
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => return error_response(e),
    };

    if fresh {
        if let Err(e) = db::insert_transaction(pool, &tx_row(&tx)).await {
            error!("Failed to persist withdrawal {}: {}", tx.reference, e);
            return HttpResponse::InternalServerError()
                .body(format!("Failed to record transaction: {}", e));
        }
        metrics::record_transaction(&tx.tx_type.to_string());
    }

    if tx.status == TxStatus::PENDING {
        if let Err(e) = gateway.initiate_payout(amount, &tx.reference).await {
            warn!("Payout initiation failed for {}: {}", tx.reference, e);
            // The hold must not outlive a payout that never started.
            match engine.confirm_withdrawal(&tx.reference, false).await {
                Ok(outcome) if outcome.changed => {
                    if let Err(e) = db::update_transaction(
                        pool,
                        &outcome.transaction.id,
                        &outcome.transaction.status.to_string(),
                        outcome.transaction.balance_before,
                        outcome.transaction.balance_after,
                    )
                    .await
                    {
                        error!(
                            "Failed to persist withdrawal release {}: {}",
                            outcome.transaction.id, e
                        );
                    }
                }
                Ok(_) => {}
                Err(release_err) => {
                    error!(
                        "Failed to release withdrawal hold {}: {}",
                        tx.reference, release_err
                    );
                }
            }
            return HttpResponse::BadGateway().body(format!("Payment gateway unavailable: {}", e));
        }
    }

    HttpResponse::Ok().json(json!({
        "transaction_id": tx.id,
        "reference": tx.reference,
        "amount": tx.amount,
        "status": tx.status.to_string(),
        "balance": tx.balance_after,
    }))
}

#[actix_web::post("/bets")]
async fn place_bet(req: web::Json<PlaceBetRequest>, app_state: web::Data<AppState>) -> impl Responder {
    let AppState { pool, engine, .. } = &**app_state;
    let PlaceBetRequest {
        user_id,
        prediction_id,
        slot,
    } = req.into_inner();

    let slot = match slot.parse::<BetSlot>() {
        Ok(slot) => slot,
        Err(_) => return HttpResponse::BadRequest().body(format!("Invalid bet slot: {}", slot)),
    };

    let placed = match retry_conflict(|| {
        let engine = engine.clone();
        async move { engine.place_bet(user_id, prediction_id, slot, Utc::now()).await }
    })
    .await
    {
        Ok(placed) => placed,
        Err(e) => return error_response(e),
    };

    if let Err(e) = db::insert_transaction(pool, &tx_row(&placed.stake)).await {
        error!("Failed to persist stake for bet {}: {}", placed.bet.id, e);
        return HttpResponse::InternalServerError()
            .body(format!("Failed to record transaction: {}", e));
    }
    if let Err(e) = db::insert_bet(pool, &bet_row(&placed.bet)).await {
        error!("Failed to persist bet {}: {}", placed.bet.id, e);
        return HttpResponse::InternalServerError().body(format!("Failed to record bet: {}", e));
    }
    metrics::record_transaction(&placed.stake.tx_type.to_string());
    metrics::record_bet_placed();

    HttpResponse::Created().json(json!({
        "bet_id": placed.bet.id,
        "prediction_id": placed.bet.prediction_id,
        "slot": placed.bet.slot.to_string(),
        "stake": placed.bet.amount,
        "odds_x100": placed.bet.odds_x100,
        "balance": placed.stake.balance_after,
    }))
}

#[actix_web::post("/daily-reward/claim")]
async fn claim_daily_reward(
    req: web::Json<ClaimRequest>,
    app_state: web::Data<AppState>,
) -> impl Responder {
    let AppState { pool, engine, .. } = &**app_state;
    let ClaimRequest { user_id } = req.into_inner();

    let outcome = match retry_conflict(|| {
        let engine = engine.clone();
        async move { engine.claim_daily_reward(user_id, Utc::now()).await }
    })
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => return error_response(e),
    };

    if let Err(e) = db::insert_transaction(pool, &tx_row(&outcome.reward)).await {
        error!("Failed to persist daily reward for user {}: {}", user_id, e);
        return HttpResponse::InternalServerError()
            .body(format!("Failed to record transaction: {}", e));
    }
    metrics::record_transaction(&outcome.reward.tx_type.to_string());
    if let Some(bonus) = &outcome.milestone_bonus {
        if let Err(e) = db::insert_transaction(pool, &tx_row(bonus)).await {
            error!(
                "Failed to persist milestone bonus for user {}: {}",
                user_id, e
            );
            return HttpResponse::InternalServerError()
                .body(format!("Failed to record transaction: {}", e));
        }
        metrics::record_transaction(&bonus.tx_type.to_string());
    }
    let milestones: Vec<i32> = outcome.milestones_paid.iter().map(|m| *m as i32).collect();
    if let Err(e) = db::upsert_daily_streak(
        pool,
        user_id,
        Some(outcome.last_claim_date),
        outcome.streak_count as i32,
        &milestones,
    )
    .await
    {
        error!("Failed to persist streak for user {}: {}", user_id, e);
        return HttpResponse::InternalServerError().body(format!("Failed to record streak: {}", e));
    }
    metrics::record_daily_reward();

    HttpResponse::Ok().json(json!({
        "reward": outcome.reward.amount,
        "streak_count": outcome.streak_count,
        "milestone_bonus": outcome.milestone_bonus.as_ref().map(|b| b.amount),
        "balance": outcome
            .milestone_bonus
            .as_ref()
            .map(|b| b.balance_after)
            .unwrap_or(outcome.reward.balance_after),
    }))
}

#[actix_web::get("/balance/{user_id}")]
async fn get_balance(path: web::Path<i64>, app_state: web::Data<AppState>) -> impl Responder {
    let user_id = path.into_inner();
    let AppState { engine, .. } = &**app_state;

    let (balance, folded) = match retry_conflict(|| {
        let engine = engine.clone();
        async move { engine.audit_balance(user_id).await }
    })
    .await
    {
        Ok(balances) => balances,
        Err(e) => return error_response(e),
    };
    if balance != folded {
        error!(
            "Ledger mismatch for user {}: counter={} fold={}",
            user_id, balance, folded
        );
        metrics::record_balance_mismatch();
    }

    let tier = match engine.vip_tier(user_id).await {
        Ok(tier) => tier,
        Err(e) => return error_response(e),
    };

    HttpResponse::Ok().json(json!({
        "user_id": user_id,
        "balance": balance,
        "vip_level": tier.level,
        "daily_reward": tier.daily_reward,
    }))
}

#[actix_web::get("/ledger/{user_id}")]
async fn get_ledger(
    path: web::Path<i64>,
    query: web::Query<LedgerQuery>,
    app_state: web::Data<AppState>,
) -> impl Responder {
    let user_id = path.into_inner();
    let LedgerQuery { from, to } = query.into_inner();
    let AppState { engine, .. } = &**app_state;

    match retry_conflict(|| {
        let engine = engine.clone();
        async move { engine.ledger(user_id, from, to).await }
    })
    .await
    {
        Ok(entries) => HttpResponse::Ok().json(entries),
        Err(e) => error_response(e),
    }
}

#[actix_web::get("/vip-levels")]
async fn get_vip_levels(app_state: web::Data<AppState>) -> impl Responder {
    let AppState { engine, .. } = &**app_state;
    HttpResponse::Ok().json(engine.vip_levels())
}

#[actix_web::get("/referrals/{user_id}")]
async fn get_referral_stats(path: web::Path<i64>, app_state: web::Data<AppState>) -> impl Responder {
    let user_id = path.into_inner();
    let AppState { engine, .. } = &**app_state;

    match retry_conflict(|| {
        let engine = engine.clone();
        async move { engine.referral_stats(user_id).await }
    })
    .await
    {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => error_response(e),
    }
}

#[actix_web::get("/predictions")]
async fn get_predictions(app_state: web::Data<AppState>) -> impl Responder {
    let AppState { engine, .. } = &**app_state;
    HttpResponse::Ok().json(engine.list_predictions().await)
}

#[actix_web::post("/webhooks/deposit")]
async fn deposit_webhook(
    req: HttpRequest,
    body: web::Bytes,
    app_state: web::Data<AppState>,
) -> impl Responder {
    let AppState {
        pool,
        engine,
        config,
        ..
    } = &**app_state;

    let signature = req
        .headers()
        .get("X-Gateway-Signature")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if !gateway::verify_signature(&config.gateway_webhook_secret, &body, signature) {
        warn!("Rejected deposit webhook with a bad signature");
        metrics::record_webhook_rejection();
        return HttpResponse::Unauthorized().body("Invalid signature");
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => return HttpResponse::BadRequest().body(format!("Invalid payload: {}", e)),
    };
    let success = match payload.status.to_uppercase().as_str() {
        "SUCCESS" => true,
        "FAILED" => false,
        other => {
            return HttpResponse::BadRequest().body(format!("Unknown webhook status: {}", other))
        }
    };
    info!(
        "Deposit webhook for {} (status: {})",
        payload.reference, payload.status
    );

    let outcome = match retry_conflict(|| {
        let engine = engine.clone();
        let reference = payload.reference.clone();
        async move { engine.confirm_deposit(&reference, success, Utc::now()).await }
    })
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => return error_response(e),
    };

    if outcome.changed {
        if let Err(e) = db::update_transaction(
            pool,
            &outcome.transaction.id,
            &outcome.transaction.status.to_string(),
            outcome.transaction.balance_before,
            outcome.transaction.balance_after,
        )
        .await
        {
            error!(
                "Failed to persist deposit confirmation {}: {}",
                outcome.transaction.id, e
            );
            return HttpResponse::InternalServerError()
                .body(format!("Failed to record transaction: {}", e));
        }
        if let Err(e) = persist_commissions(pool, &outcome.commissions).await {
            error!(
                "Failed to persist first-deposit commissions for {}: {}",
                payload.reference, e
            );
            return HttpResponse::InternalServerError()
                .body(format!("Failed to record commissions: {}", e));
        }
        metrics::record_commissions_skipped(outcome.commissions_skipped as u64);
    }

    HttpResponse::Ok().json(json!({
        "reference": payload.reference,
        "status": outcome.transaction.status.to_string(),
        "applied": outcome.changed,
    }))
}

#[actix_web::post("/webhooks/withdrawal")]
async fn withdrawal_webhook(
    req: HttpRequest,
    body: web::Bytes,
    app_state: web::Data<AppState>,
) -> impl Responder {
    let AppState {
        pool,
        engine,
        config,
        ..
    } = &**app_state;

    let signature = req
        .headers()
        .get("X-Gateway-Signature")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if !gateway::verify_signature(&config.gateway_webhook_secret, &body, signature) {
        warn!("Rejected withdrawal webhook with a bad signature");
        metrics::record_webhook_rejection();
        return HttpResponse::Unauthorized().body("Invalid signature");
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => return HttpResponse::BadRequest().body(format!("Invalid payload: {}", e)),
    };
    let success = match payload.status.to_uppercase().as_str() {
        "SUCCESS" => true,
        "FAILED" => false,
        other => {
            return HttpResponse::BadRequest().body(format!("Unknown webhook status: {}", other))
        }
    };
    info!(
        "Withdrawal webhook for {} (status: {})",
        payload.reference, payload.status
    );

    let outcome = match retry_conflict(|| {
        let engine = engine.clone();
        let reference = payload.reference.clone();
        async move { engine.confirm_withdrawal(&reference, success).await }
    })
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => return error_response(e),
    };

    if outcome.changed {
        if let Err(e) = db::update_transaction(
            pool,
            &outcome.transaction.id,
            &outcome.transaction.status.to_string(),
            outcome.transaction.balance_before,
            outcome.transaction.balance_after,
        )
        .await
        {
            error!(
                "Failed to persist withdrawal confirmation {}: {}",
                outcome.transaction.id, e
            );
            return HttpResponse::InternalServerError()
                .body(format!("Failed to record transaction: {}", e));
        }
    }

    HttpResponse::Ok().json(json!({
        "reference": payload.reference,
        "status": outcome.transaction.status.to_string(),
        "applied": outcome.changed,
    }))
}

#[actix_web::post("/admin/predictions")]
async fn create_prediction(
    req: HttpRequest,
    body: web::Json<NewPrediction>,
    app_state: web::Data<AppState>,
) -> impl Responder {
    let AppState {
        pool,
        engine,
        config,
        ..
    } = &**app_state;
    if !authorized(&req, config) {
        return HttpResponse::Unauthorized().body("Invalid admin token");
    }

    let prediction = match engine.create_prediction(body.into_inner(), Utc::now()).await {
        Ok(prediction) => prediction,
        Err(e) => return error_response(e),
    };

    if let Err(e) = db::insert_prediction(pool, &prediction_row(&prediction)).await {
        error!("Failed to persist prediction {}: {}", prediction.id, e);
        return HttpResponse::InternalServerError()
            .body(format!("Failed to persist prediction: {}", e));
    }

    HttpResponse::Created().json(prediction)
}

#[actix_web::post("/admin/predictions/{prediction_id}/close")]
async fn close_prediction(
    req: HttpRequest,
    path: web::Path<i64>,
    app_state: web::Data<AppState>,
) -> impl Responder {
    let prediction_id = path.into_inner();
    let AppState {
        pool,
        engine,
        config,
        ..
    } = &**app_state;
    if !authorized(&req, config) {
        return HttpResponse::Unauthorized().body("Invalid admin token");
    }

    let prediction = match retry_conflict(|| {
        let engine = engine.clone();
        async move { engine.close_prediction(prediction_id).await }
    })
    .await
    {
        Ok(prediction) => prediction,
        Err(e) => return error_response(e),
    };

    if let Err(e) = db::update_prediction(
        pool,
        prediction.id,
        &prediction.status.to_string(),
        prediction.result.map(|r| r.to_string()).as_deref(),
    )
    .await
    {
        error!("Failed to persist prediction {}: {}", prediction.id, e);
        return HttpResponse::InternalServerError()
            .body(format!("Failed to persist prediction: {}", e));
    }

    HttpResponse::Ok().json(prediction)
}

#[actix_web::post("/admin/predictions/{prediction_id}/settle")]
async fn settle_prediction(
    req: HttpRequest,
    path: web::Path<i64>,
    body: web::Json<SettleRequest>,
    app_state: web::Data<AppState>,
) -> impl Responder {
    let prediction_id = path.into_inner();
    let AppState {
        pool,
        engine,
        config,
        ..
    } = &**app_state;
    if !authorized(&req, config) {
        return HttpResponse::Unauthorized().body("Invalid admin token");
    }

    let result = match body.result.parse::<MatchOutcome>() {
        Ok(result) => result,
        Err(_) => {
            return HttpResponse::BadRequest()
                .body(format!("Invalid match result: {}", body.result))
        }
    };
    info!(
        "Settling prediction {} as {}",
        prediction_id,
        result.to_string()
    );

    let summary = match retry_conflict(|| {
        let engine = engine.clone();
        async move { engine.settle_prediction(prediction_id, result, Utc::now()).await }
    })
    .await
    {
        Ok(summary) => summary,
        Err(e) => return error_response(e),
    };

    if let Err(e) = persist_settlement(pool, &summary).await {
        error!(
            "Failed to persist settlement of prediction {}: {}",
            prediction_id, e
        );
        return HttpResponse::InternalServerError()
            .body(format!("Failed to record settlement: {}", e));
    }

    HttpResponse::Ok().json(json!({
        "prediction_id": summary.prediction.id,
        "result": result.to_string(),
        "won": summary.won,
        "lost": summary.lost,
        "refunded": summary.refunded,
        "skipped": summary.skipped,
        "failed": summary.failed,
    }))
}

#[actix_web::post("/admin/users/{user_id}/status")]
async fn set_user_status(
    req: HttpRequest,
    path: web::Path<i64>,
    body: web::Json<StatusRequest>,
    app_state: web::Data<AppState>,
) -> impl Responder {
    let user_id = path.into_inner();
    let AppState {
        pool,
        engine,
        config,
        ..
    } = &**app_state;
    if !authorized(&req, config) {
        return HttpResponse::Unauthorized().body("Invalid admin token");
    }

    let status = match body.status.parse::<UserStatus>() {
        Ok(status) => status,
        Err(_) => {
            return HttpResponse::BadRequest().body(format!("Invalid user status: {}", body.status))
        }
    };

    match retry_conflict(|| {
        let engine = engine.clone();
        async move { engine.set_user_status(user_id, status).await }
    })
    .await
    {
        Ok(()) => {}
        Err(e) => return error_response(e),
    }

    if let Err(e) = db::update_user_status(pool, user_id, &status.to_string()).await {
        error!("Failed to persist status for user {}: {}", user_id, e);
        return HttpResponse::InternalServerError().body(format!("Failed to persist status: {}", e));
    }

    HttpResponse::Ok().json(json!({
        "user_id": user_id,
        "status": status.to_string(),
    }))
}

#[actix_web::post("/admin/commissions/run")]
async fn run_commissions(req: HttpRequest, app_state: web::Data<AppState>) -> impl Responder {
    let AppState {
        pool,
        engine,
        config,
        ..
    } = &**app_state;
    if !authorized(&req, config) {
        return HttpResponse::Unauthorized().body("Invalid admin token");
    }

    let cancel = AtomicBool::new(false);
    let summary = engine.run_weekly_commissions(Utc::now(), &cancel).await;
    info!(
        "Commission run {} processed {} users ({} failed, {} skipped)",
        summary.period, summary.processed, summary.failed, summary.skipped
    );

    if let Err(e) = persist_commissions(pool, &summary.payments).await {
        error!(
            "Failed to persist commission payments for {}: {}",
            summary.period, e
        );
        return HttpResponse::InternalServerError()
            .body(format!("Failed to record commissions: {}", e));
    }
    if let Err(e) = db::upsert_commission_run(pool, &run_row(&summary.run)).await {
        error!(
            "Failed to persist commission run {}: {}",
            summary.period, e
        );
        return HttpResponse::InternalServerError()
            .body(format!("Failed to record commission run: {}", e));
    }
    metrics::record_commission_run(summary.processed, summary.failed);
    metrics::record_commissions_skipped(summary.skipped as u64);

    HttpResponse::Ok().json(json!({
        "period": summary.period,
        "processed": summary.processed,
        "failed": summary.failed,
        "skipped": summary.skipped,
        "finished": summary.finished,
        "payments": summary.payments.len(),
    }))
}

#[actix_web::post("/admin/settlements/sweep")]
async fn settlement_sweep(req: HttpRequest, app_state: web::Data<AppState>) -> impl Responder {
    let AppState {
        pool,
        engine,
        config,
        ..
    } = &**app_state;
    if !authorized(&req, config) {
        return HttpResponse::Unauthorized().body("Invalid admin token");
    }

    let cancel = AtomicBool::new(false);
    let summary = engine.settlement_sweep(Utc::now(), &cancel).await;
    info!(
        "Settlement sweep closed {} and resettled {} predictions",
        summary.closed.len(),
        summary.settlements.len()
    );

    for prediction in &summary.closed {
        if let Err(e) = db::update_prediction(
            pool,
            prediction.id,
            &prediction.status.to_string(),
            prediction.result.map(|r| r.to_string()).as_deref(),
        )
        .await
        {
            error!("Failed to persist prediction {}: {}", prediction.id, e);
            return HttpResponse::InternalServerError()
                .body(format!("Failed to persist prediction: {}", e));
        }
    }
    for settlement in &summary.settlements {
        if let Err(e) = persist_settlement(pool, settlement).await {
            error!(
                "Failed to persist settlement of prediction {}: {}",
                settlement.prediction.id, e
            );
            return HttpResponse::InternalServerError()
                .body(format!("Failed to record settlement: {}", e));
        }
    }

    HttpResponse::Ok().json(json!({
        "closed": summary.closed.len(),
        "settled": summary.settlements.len(),
        "failed": summary.failed,
    }))
}

#[actix_web::get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().content_type("text/plain").body("OK")
}

#[actix_web::get("/metrics")]
async fn metrics_endpoint() -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(format!("Failed to encode metrics: {}", e));
    }
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

struct AppState {
    pool: Pool<Postgres>,
    engine: Arc<Engine>,
    gateway: GatewayClient,
    config: Config,
}

fn default_vip_rows() -> Vec<models::VipLevel> {
    VipTable::default()
        .all()
        .iter()
        .filter(|level| level.level > 0)
        .map(vip_row)
        .collect()
}

async fn hydrate_engine(pool: &Pool<Postgres>, config: &Config) -> anyhow::Result<Engine> {
    let vip_rows = db::load_vip_levels(pool).await?;
    let users = db::load_users(pool).await?;
    let referrals = db::load_referrals(pool).await?;
    let streaks = db::load_daily_streaks(pool).await?;
    let transactions = db::load_transactions(pool).await?;
    let predictions = db::load_predictions(pool).await?;
    let bets = db::load_bets(pool).await?;
    let runs = db::load_commission_runs(pool).await?;

    info!(
        "Rebuilding wallet state from {} users and {} ledger rows",
        users.len(),
        transactions.len()
    );
    Engine::hydrate(
        &vip_rows,
        &users,
        &referrals,
        &streaks,
        &transactions,
        &predictions,
        &bets,
        &runs,
        config.daily_bet_limit,
    )
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().expect("Failed to load configuration");

    info!("Starting the wallet api");
    let pool = establish_connection(&config.database_url).await;
    db::ensure_schema(&pool)
        .await
        .expect("Failed to prepare the database schema");
    db::seed_vip_levels(&pool, &default_vip_rows())
        .await
        .expect("Failed to seed vip levels");

    let engine = Arc::new(
        hydrate_engine(&pool, &config)
            .await
            .expect("Failed to rebuild wallet state"),
    );
    let gateway = GatewayClient::new(
        config.gateway_api_url.clone(),
        config.gateway_api_key.clone(),
    );
    let address = config.server_address();
    let app_state = web::Data::new(AppState {
        pool,
        engine,
        gateway,
        config,
    });

    info!("Starting HTTP server on {}", address);
    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(Logger::default())
            .wrap(Cors::permissive())
            .service(health_check)
            .service(metrics_endpoint)
            .service(register)
            .service(deposit)
            .service(withdraw)
            .service(place_bet)
            .service(claim_daily_reward)
            .service(get_balance)
            .service(get_ledger)
            .service(get_vip_levels)
            .service(get_referral_stats)
            .service(get_predictions)
            .service(deposit_webhook)
            .service(withdrawal_webhook)
            .service(create_prediction)
            .service(close_prediction)
            .service(settle_prediction)
            .service(set_user_status)
            .service(run_commissions)
            .service(settlement_sweep)
    })
    .bind(address)?
    .run()
    .await
}
