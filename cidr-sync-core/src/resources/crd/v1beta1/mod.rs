pub mod subnetpool;
