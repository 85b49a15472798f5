mod health;
mod root;

pub use health::health_check;
pub use root::{not_found, root};
