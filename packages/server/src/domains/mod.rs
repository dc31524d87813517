// Domain modules - business logic built on the kernel

pub mod mail;
pub mod orders;
pub mod search;
