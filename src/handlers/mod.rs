pub mod config;
pub mod ledger;

pub use self::config::*;
pub use self::ledger::*;
