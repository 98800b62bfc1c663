mod audit;
mod build;
mod device;

pub(crate) use audit::{abi, checksec, perm};
pub(crate) use build::{build, build_defines, flags};
pub(crate) use device::{compile, device};
