pub mod test_cluster;

pub use test_cluster::*;
