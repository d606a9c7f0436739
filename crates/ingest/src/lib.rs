mod domains;
mod error;
mod fetcher;
mod model;
mod ndjson_handler;
mod pipeline;
mod report;
mod utils;
mod warehouse;

pub use domains::*;
pub use error::*;
pub use fetcher::*;
pub use model::*;
pub use ndjson_handler::*;
pub use pipeline::*;
pub use report::*;
pub use utils::*;
pub use warehouse::*;
