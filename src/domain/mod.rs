pub mod fuel;
pub mod listing;
pub mod live;
pub mod merge;
pub mod price;
pub mod profile;
pub mod submission;

pub use fuel::*;
pub use listing::*;
pub use live::*;
pub use merge::*;
pub use price::*;
pub use profile::*;
pub use submission::*;
