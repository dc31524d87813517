// Route handlers, one module per surface

pub mod health;
pub mod mail;
pub mod orders;
pub mod query;
pub mod stream;
