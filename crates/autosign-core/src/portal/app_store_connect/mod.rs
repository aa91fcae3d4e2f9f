//! App Store Connect API backend.

mod certificates;
pub mod client;
mod devices;
pub mod models;
mod profiles;
pub mod token;

pub use client::AppStoreConnectClient;
pub use token::TokenEncoder;
