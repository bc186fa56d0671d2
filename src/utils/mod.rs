pub mod handle;
pub use handle::{Handle, Pool};
