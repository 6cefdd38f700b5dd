pub mod cms;
pub mod hll;

pub use cms::CountMinSketch;
pub use hll::HyperLogLog;
