pub mod access;
pub mod evidence;
pub mod fingerprint;
pub mod pipeline;
pub mod usage;
