pub mod ipaddressallocation;
pub mod subnetpool;
