use anyhow::{Context, Result};

use staffchat_core::ChatConfig;
use staffchat_types::UserId;

/// Settings read from the environment (and `.env`, if present).
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub gateway_url: String,
    pub token: Option<String>,
    pub user_id: UserId,
    pub hotel_id: Option<i64>,
    pub page_size: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let api_url =
            std::env::var("STAFFCHAT_API_URL").unwrap_or_else(|_| "http://localhost:3000/api".into());
        let gateway_url = std::env::var("STAFFCHAT_GATEWAY_URL")
            .unwrap_or_else(|_| "ws://localhost:3000/gateway".into());
        let token = std::env::var("STAFFCHAT_TOKEN").ok().filter(|t| !t.is_empty());
        let user_id: UserId = std::env::var("STAFFCHAT_USER_ID")
            .context("STAFFCHAT_USER_ID is not set")?
            .parse()
            .context("STAFFCHAT_USER_ID must be an integer")?;
        let hotel_id = match std::env::var("STAFFCHAT_HOTEL_ID") {
            Ok(raw) => Some(raw.parse().context("STAFFCHAT_HOTEL_ID must be an integer")?),
            Err(_) => None,
        };
        let page_size = std::env::var("STAFFCHAT_PAGE_SIZE")
            .unwrap_or_else(|_| "50".into())
            .parse()
            .context("STAFFCHAT_PAGE_SIZE must be a positive integer")?;

        Ok(Self {
            api_url,
            gateway_url,
            token,
            user_id,
            hotel_id,
            page_size,
        })
    }

    pub fn chat_config(&self) -> ChatConfig {
        let config = ChatConfig::new(self.user_id).with_page_size(self.page_size);
        match self.hotel_id {
            Some(hotel_id) => config.with_hotel(hotel_id),
            None => config,
        }
    }
}
