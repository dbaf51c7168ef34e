mod ext;
mod request;

pub use ext::*;
pub use request::*;
