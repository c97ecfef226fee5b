pub mod admin;
pub mod common;
pub mod records;

pub use admin::admin_routes;
pub use common::common_routes;
pub use records::record_routes;
