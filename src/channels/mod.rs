mod http;

pub use http::{HttpChannel, NullChannel};
