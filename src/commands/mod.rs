pub mod accounts;
pub mod challenges;
pub mod imports;
pub mod stats;
pub mod trades;

pub use accounts::*;
pub use challenges::*;
pub use imports::*;
pub use stats::*;
pub use trades::*;
