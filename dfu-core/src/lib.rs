//! Serial DFU bootloader core.
//!
//! At reset the [`boot::Bootloader`] consumes the boot control block, checks
//! the application image and either jumps to it or enters DFU mode. DFU mode
//! pulls a new image over a framed serial protocol into a staging region,
//! verifies it, and promotes it into the application region.
//!
//! The MCU is reached only through four traits: [`frame::Transport`],
//! [`flash::FlashHal`], [`bcb::BcbCell`] and [`platform::Platform`].

#![no_std]

#[macro_use]
mod fmt;

pub mod bcb;
pub mod boot;
pub mod checksum;
pub mod config;
pub mod error;
pub mod flash;
pub mod frame;
pub mod image;
pub mod layout;
pub mod platform;
pub mod promote;
pub mod protocol;
pub mod transfer;

#[cfg(test)]
mod testutil;

pub use boot::{BootAction, BootDecision, Bootloader};
pub use checksum::Checksum;
pub use config::{Config, PromotionPolicy};
pub use error::{Error, ErrorKind};
