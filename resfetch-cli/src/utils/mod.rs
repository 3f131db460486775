pub mod headers;
pub mod progress;

pub use headers::parse_headers;
