pub mod batch;
pub mod check;
pub mod common;
pub mod inspect;
pub mod rewrite;
