// Web scraping module: render the rates page and read its table
// Uses headless Chrome because the listing is filled in client-side

pub mod browser;
pub mod minfin;

pub use browser::{
    BrowserSession, ChromeSession, FetchOptions, LaunchConfig, ResourceKind, ResourcePolicy,
};
pub use minfin::{parse_bank_rates, BANKS_USD_URL};
