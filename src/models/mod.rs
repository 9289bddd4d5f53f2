pub mod note;
pub mod settings;
pub mod trade;

pub use note::*;
pub use settings::*;
pub use trade::*;
