pub mod evaluate;
pub mod kernels;
