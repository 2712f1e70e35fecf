pub mod error;
pub mod retry;
pub mod supabase;

pub use error::DbError;
