mod resolve_grid;

pub use resolve_grid::*;
