pub mod sparse_lu;
