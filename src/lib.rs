#![cfg_attr(not(feature = "std"), no_std)]
mod block;
pub mod error;
pub mod layout;
mod pooling;
#[cfg(feature = "train")]
pub mod training;
pub mod wide_resnet;

pub use block::{WideBasicBlock, WideBasicBlockConfig, WideStage, WideStageConfig};
pub use error::ConfigError;
pub use layout::NetworkLayout;
pub use pooling::ClassifierPooling;
pub use wide_resnet::*;

extern crate alloc;
