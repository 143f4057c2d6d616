mod addressing;
mod cidr;
mod lab;
mod topology;

pub use addressing::*;
pub use cidr::*;
pub use lab::*;
pub use topology::*;
