pub mod status;

pub use status::{CheckOwnerStatusError, CheckOwnerStatusQuery, CheckOwnerStatusResponse};
