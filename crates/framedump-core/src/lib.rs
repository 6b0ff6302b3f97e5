pub mod demux;
pub mod encoder;
pub mod error;
pub mod frame;
