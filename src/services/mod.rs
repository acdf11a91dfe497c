pub mod queue;
pub mod scratch;
pub mod storage;
pub mod transform;
