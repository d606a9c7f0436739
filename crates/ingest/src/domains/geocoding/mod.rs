mod resolve_location;

pub use resolve_location::*;
