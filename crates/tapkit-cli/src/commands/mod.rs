pub mod check;
pub mod discover;
pub mod sync;
pub mod test;
