pub mod prelude;

pub mod tokens;
pub mod users;
