pub mod deployment;
pub mod device_group;
