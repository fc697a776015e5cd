//! Utility modules

pub mod memory_storage;
pub mod validation;

pub use memory_storage::*;
pub use validation::*;

use bigdecimal::BigDecimal;
use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Initializes the global tracing subscriber
///
/// `RUST_LOG` overrides the default `churchbook_core=info` filter. Does
/// nothing if the host application already installed a subscriber.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("churchbook_core=info"));

        if fmt().with_env_filter(filter).try_init().is_ok() {
            tracing::info!("churchbook-core tracing initialized");
        }
    });
}

/// Format an amount as whole won with thousands separators, e.g. `₩500,000`
pub fn format_won(amount: &BigDecimal) -> String {
    let (digits, _) = amount.round(0).with_scale(0).as_bigint_and_exponent();
    let digits = digits.to_string();
    let (sign, digits) = match digits.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", digits.as_str()),
    };

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{}₩{}", sign, grouped)
}
