pub mod driver;
pub mod ops;
pub mod tap;
pub mod tc;

pub use driver::{IpRoute2, Link, NetDriver};
pub use ops::{DefaultNetlinkOps, NetlinkOps};
pub use tap::TapConfig;
