use dotenv::dotenv;
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Server configuration
    pub server_host: String,
    pub server_port: u16,

    // Database configuration
    pub database_url: String,

    // Payment gateway
    pub gateway_api_url: String,
    pub gateway_api_key: String,
    pub gateway_webhook_secret: String,

    // Security
    pub admin_token: String,

    // Wallet limits, FCFA
    pub deposit_min_amount: i64,
    pub deposit_max_amount: i64,
    pub withdrawal_min_amount: i64,
    pub withdrawal_max_amount: i64,
    pub daily_bet_limit: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv().ok();

        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .expect("SERVER_PORT must be a valid port number");

        let database_url = env::var("DATABASE_URL")?;

        let gateway_api_url =
            env::var("GATEWAY_API_URL").unwrap_or_else(|_| "http://localhost:9090".to_string());

        let gateway_api_key =
            env::var("GATEWAY_API_KEY").expect("GATEWAY_API_KEY must be set for gateway calls");

        let gateway_webhook_secret = env::var("GATEWAY_WEBHOOK_SECRET")
            .expect("GATEWAY_WEBHOOK_SECRET must be set for secure operation");

        let admin_token =
            env::var("ADMIN_TOKEN").expect("ADMIN_TOKEN must be set for secure operation");

        let deposit_min_amount = env::var("DEPOSIT_MIN_AMOUNT")
            .unwrap_or_else(|_| "100".to_string())
            .parse::<i64>()
            .expect("DEPOSIT_MIN_AMOUNT must be a valid amount");

        let deposit_max_amount = env::var("DEPOSIT_MAX_AMOUNT")
            .unwrap_or_else(|_| "1000000".to_string())
            .parse::<i64>()
            .expect("DEPOSIT_MAX_AMOUNT must be a valid amount");

        let withdrawal_min_amount = env::var("WITHDRAWAL_MIN_AMOUNT")
            .unwrap_or_else(|_| "500".to_string())
            .parse::<i64>()
            .expect("WITHDRAWAL_MIN_AMOUNT must be a valid amount");

        let withdrawal_max_amount = env::var("WITHDRAWAL_MAX_AMOUNT")
            .unwrap_or_else(|_| "500000".to_string())
            .parse::<i64>()
            .expect("WITHDRAWAL_MAX_AMOUNT must be a valid amount");

        let daily_bet_limit = env::var("DAILY_BET_LIMIT")
            .unwrap_or_else(|_| "2".to_string())
            .parse::<u32>()
            .expect("DAILY_BET_LIMIT must be a valid number");

        Ok(Config {
            server_host,
            server_port,
            database_url,
            gateway_api_url,
            gateway_api_key,
            gateway_webhook_secret,
            admin_token,
            deposit_min_amount,
            deposit_max_amount,
            withdrawal_min_amount,
            withdrawal_max_amount,
            daily_bet_limit,
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}
