mod geocoding;
mod grid;
mod weather;

pub use geocoding::*;
pub use grid::*;
pub use weather::*;
