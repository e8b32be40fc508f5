//! Neural option pricer: Black-Scholes pricing, implied-volatility
//! inversion, and a feed-forward log-price regressor whose predictions are
//! turned back into an implied-volatility smile for comparison with the
//! market.

pub mod config;
pub mod db;
pub mod errors;
pub mod feeds;
pub mod models;
pub mod server;
pub mod state;

pub use errors::{PricerError, PricerResult};
pub use models::black_scholes::black_scholes_price;
pub use models::implied_vol::implied_volatility;
pub use models::pipeline::{predict_smile, InferenceAssets, OptionQuote, SmileContext, SmileRow};
pub use models::OptionKind;
