pub mod backup;
pub mod export;
pub mod notes;
pub mod settings;
pub mod stats;
pub mod trades;

pub use backup::*;
pub use export::*;
pub use notes::*;
pub use settings::*;
pub use stats::*;
pub use trades::*;
