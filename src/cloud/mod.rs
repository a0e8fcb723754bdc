pub mod client;
pub mod sync;
pub mod types;

pub use client::{CloudSubnetApi, Ec2ApiClient};
pub use sync::VpcSyncService;
