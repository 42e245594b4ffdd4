use std::env;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::services::lifecycle::BookingPolicy;
use crate::services::pricing::{default_gst_rate, PricingPolicy};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    // Shared secret expected from the upstream auth gateway. Empty disables the check.
    pub api_token: String,
    pub gst_rate: Decimal,
    pub currency: String,
    pub cancellation_cutoff_hours: i64,
    pub razorpay_key_id: String,
    pub razorpay_key_secret: String,
    pub razorpay_webhook_secret: String,
    pub notify_url: String,
    pub gateway_timeout_secs: u64,
    pub notify_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "bikerent.db".to_string()),
            api_token: env::var("API_TOKEN").unwrap_or_default(),
            gst_rate: env::var("GST_RATE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_gst_rate),
            currency: env::var("CURRENCY").unwrap_or_else(|_| "INR".to_string()),
            cancellation_cutoff_hours: env::var("CANCELLATION_CUTOFF_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(24),
            razorpay_key_id: env::var("RAZORPAY_KEY_ID").unwrap_or_default(),
            razorpay_key_secret: env::var("RAZORPAY_KEY_SECRET").unwrap_or_default(),
            razorpay_webhook_secret: env::var("RAZORPAY_WEBHOOK_SECRET").unwrap_or_default(),
            notify_url: env::var("NOTIFY_URL").unwrap_or_default(),
            gateway_timeout_secs: env::var("GATEWAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            notify_timeout_secs: env::var("NOTIFY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        }
    }

    pub fn booking_policy(&self) -> BookingPolicy {
        BookingPolicy {
            pricing: PricingPolicy {
                tax_rate: self.gst_rate,
            },
            cancellation_cutoff: chrono::Duration::hours(self.cancellation_cutoff_hours.max(0)),
        }
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: ":memory:".to_string(),
            api_token: String::new(),
            gst_rate: default_gst_rate(),
            currency: "INR".to_string(),
            cancellation_cutoff_hours: 24,
            razorpay_key_id: String::new(),
            razorpay_key_secret: String::new(),
            razorpay_webhook_secret: String::new(),
            notify_url: String::new(),
            gateway_timeout_secs: 10,
            notify_timeout_secs: 5,
        }
    }
}
