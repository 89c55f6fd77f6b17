pub mod arg;
pub mod error;
pub mod model;
pub mod params;
pub mod spr;
pub mod states;
pub mod thread;
pub mod trans;
pub mod utils;

pub use arg::Arg;
pub use model::ArgModel;
