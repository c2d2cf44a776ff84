//! On-disk format handling for Questlog
//!
//! This crate contains:
//! - Compressed disc image decoders (CSO/CISO, RVZ/WIA)
//! - Archive listing and extraction (zip, 7z, rar)
//! - A minimal ISO9660 reader for pulling files out of disc images
//! - The identity hash engine (capped MD5, text normalization)
//! - Trophy set parsing: definitions, unlock ledgers, TRP containers
//! - The local trophy scan provider

pub mod archive;
pub mod codec;
pub mod cso;
pub mod error;
pub mod hash;
pub mod identity;
pub mod iso;
pub mod rvz;
pub mod scan;
pub mod trophy;

mod util;

pub use error::{FormatError, Result};
