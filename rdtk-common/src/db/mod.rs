//! Database models and queries

pub mod books;
pub mod init;
pub mod migrations;
pub mod settings;

pub use books::*;
pub use init::*;
pub use migrations::*;
pub use settings::*;
