pub mod packet_builders;

pub use self::doubles::*;
pub use self::packet_builders::*;
