//! Small internal helpers shared across kernel modules.
//!
//! **Exempt from the API stability guarantee.**
pub mod panicking;
pub mod prio_bitmap;

pub use prio_bitmap::PrioBitmap;
