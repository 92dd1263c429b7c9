mod config;
mod csv_import;
mod fetch;
mod locations;
mod normalize;
mod rate_limit;
mod run;
mod store;

pub use config::*;
pub use csv_import::*;
pub use fetch::*;
pub use locations::*;
pub use normalize::*;
pub use rate_limit::*;
pub use run::*;
pub use store::*;
