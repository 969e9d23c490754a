pub mod common;

pub use common::common_routes;
