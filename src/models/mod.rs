pub mod attendance;
pub mod correction;
pub mod device;
pub mod employee;
pub mod external;
pub mod holiday;
pub mod mandays;
pub mod punch;
pub mod shift;
