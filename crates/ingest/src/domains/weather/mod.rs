mod fetch_weather;
mod normalize_records;

pub use fetch_weather::*;
pub use normalize_records::*;
