#![allow(dead_code)]

pub mod content;
pub mod flags;
pub mod interactions;
pub mod profiles;
pub mod proposals;

pub use content::*;
pub use flags::*;
pub use interactions::*;
pub use profiles::*;
pub use proposals::*;
