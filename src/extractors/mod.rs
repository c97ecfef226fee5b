//! Request extractors for caller identity and tenant selection.

pub mod caller;
pub mod tenant;

pub use caller::{Caller, Operator, ACCOUNT_ID_HEADER};
pub use tenant::{ActiveTenant, TenantOverride, TENANT_ID_HEADER};
